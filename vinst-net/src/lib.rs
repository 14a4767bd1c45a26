// vinst-net/src/lib.rs
pub mod http;
pub mod release;
pub mod validation;

pub use http::{build_http_client, download_to_file};
pub use release::{
    fetch_release_listing, parse_release_listing, release_endpoint, select_latest_release, Asset,
    AssetPolicy, Release, SUPPORTED_ARCHIVE_EXTENSIONS,
};
pub use validation::validate_url;
