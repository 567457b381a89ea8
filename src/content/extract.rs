use std::sync::OnceLock;

use scraper::{ElementRef, Html, Selector};

use crate::util::{char_len, clean_text, collapse_whitespace};

/// Longest text returned by [`extract_readable_text`], in chars.
pub const MAX_EXTRACT_CHARS: usize = 5000;

/// A candidate must have more than this many chars to be accepted.
const MIN_CANDIDATE_CHARS: usize = 200;

/// Page chrome and widgets dropped before any text is read.
const NOISE_SELECTORS: &[&str] = &[
    "script",
    "style",
    "nav",
    "header",
    "footer",
    "aside",
    r#"[class*="ad-"]"#,
    r#"[id*="ad-"]"#,
    r#"[class*="sidebar"]"#,
    r#"[class*="comment"]"#,
    r#"[class*="related"]"#,
    r#"[class*="share"]"#,
    r#"[class*="social"]"#,
    r#"[class*="newsletter"]"#,
    r#"[class*="popup"]"#,
];

/// Containers likely to hold the article body, most specific first.
const CANDIDATE_SELECTORS: &[&str] = &[
    "article",
    r#"[itemprop="articleBody"]"#,
    r#"[class*="article-body"]"#,
    r#"[class*="article-content"]"#,
    r#"[class*="post-content"]"#,
    r#"[class*="entry-content"]"#,
    r#"[class*="story-body"]"#,
    r#"[class*="body-content"]"#,
    "main",
    r#"[role="main"]"#,
    ".content",
    "#content",
];

fn compile(list: &[&str]) -> Vec<Selector> {
    list.iter()
        .filter_map(|s| match Selector::parse(s) {
            Ok(sel) => Some(sel),
            Err(e) => {
                tracing::warn!(selector = s, error = %e, "Invalid selector");
                None
            }
        })
        .collect()
}

fn noise_selectors() -> &'static [Selector] {
    static CACHE: OnceLock<Vec<Selector>> = OnceLock::new();
    CACHE.get_or_init(|| compile(NOISE_SELECTORS))
}

fn candidate_selectors() -> &'static [Selector] {
    static CACHE: OnceLock<Vec<Selector>> = OnceLock::new();
    CACHE.get_or_init(|| compile(CANDIDATE_SELECTORS))
}

/// Pulls the readable body text out of an HTML page.
///
/// Noise elements are removed, then the first candidate container whose
/// text exceeds 200 chars wins, falling back to `<body>`. Returns `None`
/// when nothing long enough is found. Output is whitespace-collapsed and
/// capped at [`MAX_EXTRACT_CHARS`].
pub fn extract_readable_text(html: &str) -> Option<String> {
    let mut document = Html::parse_document(html);

    for selector in noise_selectors() {
        let doomed: Vec<_> = document.select(selector).map(|el| el.id()).collect();
        for id in doomed {
            if let Some(mut node) = document.tree.get_mut(id) {
                node.detach();
            }
        }
    }

    let candidate = candidate_selectors()
        .iter()
        .flat_map(|selector| document.select(selector).next())
        .map(element_text)
        .find(|text| char_len(text) > MIN_CANDIDATE_CHARS);

    let text = candidate.or_else(|| {
        let body = Selector::parse("body").ok()?;
        document
            .select(&body)
            .next()
            .map(element_text)
            .filter(|text| char_len(text) > MIN_CANDIDATE_CHARS)
    })?;

    Some(clean_text(&text, MAX_EXTRACT_CHARS))
}

fn element_text(el: ElementRef<'_>) -> String {
    let text: String = el.text().collect();
    collapse_whitespace(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filler(words: usize) -> String {
        (0..words).map(|i| format!("word{i}")).collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_prefers_article_and_drops_noise() {
        let html = format!(
            r#"<html><body>
                <nav>Home About Contact</nav>
                <article>
                    <h1>Title</h1>
                    <p>{}</p>
                    <div class="share-buttons">Share on everything</div>
                    <script>var tracking = 1;</script>
                </article>
                <footer>Copyright</footer>
            </body></html>"#,
            filler(60)
        );

        let text = extract_readable_text(&html).unwrap();
        assert!(text.starts_with("Title word0"));
        assert!(!text.contains("Share on everything"));
        assert!(!text.contains("tracking"));
        assert!(!text.contains("Home About"));
    }

    #[test]
    fn test_short_candidate_falls_through() {
        let html = format!(
            r#"<html><body>
                <article>Too short</article>
                <div class="entry-content">{}</div>
            </body></html>"#,
            filler(60)
        );
        let text = extract_readable_text(&html).unwrap();
        assert!(text.starts_with("word0"));
    }

    #[test]
    fn test_body_fallback() {
        let html = format!("<html><body><div><p>{}</p></div></body></html>", filler(60));
        let text = extract_readable_text(&html).unwrap();
        assert!(text.contains("word59"));
    }

    #[test]
    fn test_nothing_long_enough() {
        assert_eq!(extract_readable_text("<html><body><p>Hi</p></body></html>"), None);
        assert_eq!(extract_readable_text(""), None);
    }

    #[test]
    fn test_output_capped() {
        let html = format!("<article>{}</article>", filler(3000));
        let text = extract_readable_text(&html).unwrap();
        assert!(text.chars().count() <= MAX_EXTRACT_CHARS);
    }

    #[test]
    fn test_ad_and_comment_blocks_removed() {
        let html = format!(
            r#"<main><p>{}</p><div id="ad-slot">BUY NOW</div><section class="comments">First!</section></main>"#,
            filler(60)
        );
        let text = extract_readable_text(&html).unwrap();
        assert!(!text.contains("BUY NOW"));
        assert!(!text.contains("First!"));
    }

    #[test]
    fn test_inline_markup_keeps_words_whole() {
        let html = format!(
            "<article><p>{} un<em>believ</em>able <a href=\"#\">Rust</a>acean</p></article>",
            filler(60)
        );
        let text = extract_readable_text(&html).unwrap();
        assert!(text.ends_with("unbelievable Rustacean"), "got tail {:?}", &text[text.len() - 30..]);
    }

    #[test]
    fn test_inline_fragments_do_not_pad_length() {
        // 150 chars of text spread over 100 text nodes
        let html = format!("<html><body><article>{}</article></body></html>", "ab<b>c</b>".repeat(50));
        assert_eq!(extract_readable_text(&html), None);
    }
}
