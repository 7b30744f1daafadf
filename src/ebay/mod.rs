pub mod auth;
pub mod browse;
pub mod config;
pub mod listing;

pub use browse::BrowseClient;
pub use config::EbayConfig;
pub use listing::{NormalizedListing, RawListing, normalize};
