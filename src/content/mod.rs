//! Readable article text: extraction from HTML and tiered resolution.

mod extract;
mod proxies;
mod resolver;

pub use extract::{extract_readable_text, MAX_EXTRACT_CHARS};
pub use proxies::{ContentError, ContentProxies};
pub use resolver::{resolve_full_text, FullText, FullTextResolver, FullTextSource};
