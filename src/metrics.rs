use ::metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

// Recorded into the global Prometheus recorder; a no-op until one is installed.

pub fn inc_requests(route: &'static str) {
    counter!("requests_total", "route" => route).increment(1);
    trace!(target = "watch_scout.metrics", route, "requests_total_inc");
}

pub fn scan_item(outcome: &'static str) {
    counter!("scan_items_total", "outcome" => outcome).increment(1);
}

pub fn stage_elapsed(stage: &'static str, elapsed: Duration) {
    let elapsed_ms = elapsed.as_secs_f64() * 1000.0;
    histogram!("stage_elapsed_ms", "stage" => stage).record(elapsed_ms);
    trace!(
        target = "watch_scout.metrics",
        stage,
        elapsed_ms,
        "stage_elapsed"
    );
}
