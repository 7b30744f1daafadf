use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout: Duration,
    pub connect_timeout: Duration,
}

/// Shared outbound client; every call inherits the bounded timeouts.
pub fn build_client(settings: &HttpSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .timeout(settings.timeout)
        .connect_timeout(settings.connect_timeout)
        .user_agent(concat!("watch-scout/", env!("CARGO_PKG_VERSION")))
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn client_enforces_request_timeout() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/slow");
                then.status(200).delay(Duration::from_millis(800));
            })
            .await;
        let client = build_client(&HttpSettings {
            timeout: Duration::from_millis(100),
            connect_timeout: Duration::from_secs(1),
        })
        .expect("client");

        let err = client
            .get(server.url("/slow"))
            .send()
            .await
            .expect_err("should time out");
        assert!(err.is_timeout(), "{err}");
    }
}
