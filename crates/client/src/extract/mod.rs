//! Metadata and readable text extraction from HTML.
//!
//! Extraction is behind the `Extractor` trait so fetchers do not depend on
//! the parsing engine. The bundled `HtmlExtractor` uses `scraper`:
//!
//! - Metadata comes from Open Graph, article and plain `<meta>` tags, with
//!   JSON-LD filling any gaps.
//! - `<link rel=canonical>` is resolved against the final response URL.
//! - Text is read from the block elements of the first `article`, `main`
//!   or `body` element.

mod metadata;
mod text;

use scrape_core::{Error, Metadata, WebPage};
use scraper::Html;
use sha2::{Digest, Sha256};
use url::Url;

/// Result of extracting one document.
#[derive(Debug, Clone, Default)]
pub struct Extracted {
    /// Canonical URL declared by the document, if any.
    pub canonical_url: Option<Url>,
    pub metadata: Metadata,
    pub content_text: String,
}

impl Extracted {
    /// Fill `page` with this extraction of the document served at `final_url`.
    ///
    /// The canonical URL falls back to `final_url`. The status code already
    /// recorded on the page is kept and the hostname follows the canonical
    /// URL.
    pub fn apply_to(self, page: &mut WebPage, final_url: Url) {
        let canonical = self.canonical_url.unwrap_or(final_url);
        page.metadata = Metadata {
            hostname: canonical.host_str().unwrap_or_default().to_string(),
            status_code: page.metadata.status_code,
            ..self.metadata
        };
        page.canonical_url = Some(canonical);
        page.content_text = self.content_text;
    }
}

/// Stable extractor trait for content extraction.
pub trait Extractor: Send + Sync {
    /// Extract metadata and readable text from `html` served at `base_url`.
    fn extract(&self, html: &str, base_url: &Url) -> Result<Extracted, Error>;
}

/// `scraper`-based extractor.
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlExtractor;

impl HtmlExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl Extractor for HtmlExtractor {
    fn extract(&self, html: &str, base_url: &Url) -> Result<Extracted, Error> {
        if html.trim().is_empty() {
            return Err(Error::ExtractFailed("empty document".into()));
        }

        let doc = Html::parse_document(html);
        let canonical_url = metadata::canonical_link(&doc, base_url);
        let mut metadata = metadata::read_metadata(&doc, base_url);
        let content_text = text::read_text(&doc);

        if content_text.is_empty() && metadata.title.is_empty() {
            return Err(Error::ExtractFailed("no readable content".into()));
        }
        metadata.fingerprint = fingerprint(&content_text);

        Ok(Extracted { canonical_url, metadata, content_text })
    }
}

/// Text extraction for `text/plain` bodies.
pub(crate) fn plain_text(body: &str) -> Extracted {
    let content_text = body.trim().to_string();
    let metadata = Metadata { fingerprint: fingerprint(&content_text), ..Metadata::default() };
    Extracted { canonical_url: None, metadata, content_text }
}

/// Short content digest for spotting unchanged pages across fetches.
pub fn fingerprint(content_text: &str) -> String {
    if content_text.is_empty() {
        return String::new();
    }
    let digest = Sha256::digest(content_text.as_bytes());
    hex::encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE_HTML: &str = r#"
        <!DOCTYPE html>
        <html lang="en">
        <head>
            <title>Test Article</title>
            <meta name="description" content="What the article is about.">
            <meta property="article:published_time" content="2024-01-15T12:00:00Z">
            <link rel="canonical" href="/articles/test-article">
        </head>
        <body>
            <nav><a href="/">Home</a></nav>
            <article>
                <h1>Main Heading</h1>
                <p>This is a test paragraph with some content.</p>
                <p>Another paragraph to make the content long enough.</p>
            </article>
        </body>
        </html>
    "#;

    fn base() -> Url {
        Url::parse("https://example.com/articles/test-article?utm_source=feed").unwrap()
    }

    #[test]
    fn test_extract_article() {
        let extracted = HtmlExtractor::new().extract(ARTICLE_HTML, &base()).unwrap();

        assert_eq!(extracted.canonical_url.as_ref().map(Url::as_str), Some("https://example.com/articles/test-article"));
        assert_eq!(extracted.metadata.title, "Test Article");
        assert_eq!(extracted.metadata.description, "What the article is about.");
        assert_eq!(extracted.metadata.language, "en");
        assert!(extracted.metadata.date.is_some());
        assert_eq!(
            extracted.content_text,
            "Main Heading\n\nThis is a test paragraph with some content.\n\nAnother paragraph to make the content long enough."
        );
        assert_eq!(extracted.metadata.fingerprint.len(), 16);
    }

    #[test]
    fn test_apply_to_page() {
        let extracted = HtmlExtractor::new().extract(ARTICLE_HTML, &base()).unwrap();
        let mut page = WebPage::new(base());
        page.metadata.status_code = Some(200);

        extracted.apply_to(&mut page, Url::parse("https://www.example.com/final").unwrap());

        assert_eq!(page.url().map(Url::as_str), Some("https://example.com/articles/test-article"));
        assert_eq!(page.metadata.status_code, Some(200));
        assert_eq!(page.metadata.hostname, "example.com");
        assert_eq!(page.metadata.title, "Test Article");
        assert!(page.content_text.starts_with("Main Heading"));
    }

    #[test]
    fn test_apply_without_canonical_uses_final_url() {
        let extracted = HtmlExtractor::new().extract("<p>Only text</p>", &base()).unwrap();
        let mut page = WebPage::new(base());
        extracted.apply_to(&mut page, Url::parse("https://www.example.com/final").unwrap());

        assert_eq!(page.canonical_url.as_ref().map(Url::as_str), Some("https://www.example.com/final"));
        assert_eq!(page.metadata.hostname, "www.example.com");
        assert_eq!(page.content_text, "Only text");
    }

    #[test]
    fn test_extract_empty_html() {
        let result = HtmlExtractor::new().extract("   ", &base());
        assert!(matches!(result, Err(Error::ExtractFailed(_))));
    }

    #[test]
    fn test_extract_no_content() {
        let result = HtmlExtractor::new().extract("<html><head><script>app()</script></head><body></body></html>", &base());
        assert!(matches!(result, Err(Error::ExtractFailed(_))));
    }

    #[test]
    fn test_fingerprint_stable() {
        assert_eq!(fingerprint("same text"), fingerprint("same text"));
        assert_ne!(fingerprint("same text"), fingerprint("other text"));
        assert_eq!(fingerprint(""), "");
    }

    #[test]
    fn test_plain_text() {
        let extracted = plain_text("  line one\nline two \n");
        assert_eq!(extracted.content_text, "line one\nline two");
        assert!(extracted.canonical_url.is_none());
        assert!(!extracted.metadata.fingerprint.is_empty());
    }
}
