//! Utility functions shared across the pipeline.
//!
//! - **URL validation**: refuses non-http(s), localhost and private-range
//!   URLs before they are handed to any proxy
//! - **Text processing**: char-counted truncation, whitespace cleanup,
//!   terminal widths and reading-time estimates
//! - **HTML flattening**: markup to teaser/paragraph text
//! - **Bounded worker pool**: fixed-size concurrency with ordered results
//!
//! # Examples
//!
//! ```
//! use myfeed::util::{clean_text, display_width, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.host_str(), Some("example.com"));
//!
//! assert_eq!(display_width("Hello 世界"), 10);
//! assert_eq!(clean_text("  spaced \n out  ", 100), "spaced out");
//! ```

mod html;
mod pool;
mod text;
mod url_validator;

pub use html::{html_to_text, strip_html};
pub use pool::run_bounded;
pub use text::{
    char_len, clean_text, collapse_whitespace, display_width, estimate_reading_minutes,
    strip_control_chars, truncate_chars, truncate_to_width,
};
pub use url_validator::{validate_url, UrlValidationError};
