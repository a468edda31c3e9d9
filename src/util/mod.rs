//! Small helpers shared by the directory loader and the crawler.

mod url_validator;

pub use url_validator::{validate_feed_url, UrlValidationError};
