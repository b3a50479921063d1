//! Normalization of user-supplied URL strings.

use scrape_core::{Error, WebPage};
use url::Url;

/// Error type for URL canonicalization failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum UrlError {
    #[error("empty URL")]
    Empty,

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<UrlError> for Error {
    fn from(err: UrlError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}

/// Turn loosely typed input into a fetchable URL.
///
/// Trims whitespace, defaults the scheme to `https`, lowercases the host and
/// drops the fragment. The query string is kept as given; tracking parameters
/// are removed later by the storage-backed fetcher.
pub fn canonicalize(input: &str) -> Result<Url, UrlError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(UrlError::Empty);
    }

    let candidate = if trimmed.contains("://") { trimmed.to_string() } else { format!("https://{trimmed}") };
    let mut parsed = Url::parse(&candidate).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(UrlError::UnsupportedScheme(parsed.scheme().to_string()));
    }

    if let Some(host) = parsed.host_str().map(str::to_lowercase) {
        parsed.set_host(Some(&host)).map_err(|e| UrlError::InvalidUrl(e.to_string()))?;
    }
    parsed.set_fragment(None);

    Ok(parsed)
}

/// Canonicalize each input, passing failures through unchanged.
///
/// Batch fetching answers every input, so an unusable string is kept and
/// reported on its own error page rather than dropped here.
pub fn canonicalize_batch<I, S>(inputs: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    inputs
        .into_iter()
        .map(|input| match canonicalize(input.as_ref()) {
            Ok(url) => url.to_string(),
            Err(_) => input.as_ref().to_string(),
        })
        .collect()
}

/// The inputs of one batch fetch.
///
/// Batch pages come back in completion order and carry the canonical URL they
/// were fetched under. Several inputs can share a canonical URL, so each page
/// is handed to exactly one still-unanswered input.
#[derive(Debug, Clone)]
pub struct BatchInputs {
    urls: Vec<String>,
    originals: Vec<Option<String>>,
}

impl BatchInputs {
    pub fn new<I, S>(inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let originals: Vec<String> = inputs.into_iter().map(|s| s.as_ref().to_string()).collect();
        let urls = canonicalize_batch(&originals);
        Self { urls, originals: originals.into_iter().map(Some).collect() }
    }

    /// Canonical URLs to hand to the batch, in input order.
    pub fn urls(&self) -> Vec<String> {
        self.urls.clone()
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    /// Match `page` to the first unanswered input with its canonical URL.
    ///
    /// Restores that input's string in `original_url` and returns its
    /// position, or `None` when every matching input already has a page.
    pub fn claim(&mut self, page: &mut WebPage) -> Option<usize> {
        let index = self
            .urls
            .iter()
            .zip(&self.originals)
            .position(|(url, original)| original.is_some() && *url == page.original_url)?;
        page.original_url = self.originals[index].take()?;
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalize_basic() {
        let url = canonicalize("https://example.com").unwrap();
        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_canonicalize_default_scheme() {
        let url = canonicalize("example.com/a/b").unwrap();
        assert_eq!(url.as_str(), "https://example.com/a/b");
    }

    #[test]
    fn test_canonicalize_lowercase_host() {
        let url = canonicalize("https://EXAMPLE.COM/Path").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
        assert_eq!(url.path(), "/Path");
    }

    #[test]
    fn test_canonicalize_keeps_query_drops_fragment() {
        let url = canonicalize("https://example.com/p?b=2&a=1&utm_source=x#section").unwrap();
        assert_eq!(url.query(), Some("b=2&a=1&utm_source=x"));
        assert_eq!(url.fragment(), None);
    }

    #[test]
    fn test_canonicalize_trim_whitespace() {
        let url = canonicalize("  https://example.com  ").unwrap();
        assert_eq!(url.as_str(), "https://example.com/");
    }

    #[test]
    fn test_canonicalize_unsupported_scheme() {
        assert!(matches!(canonicalize("file:///etc/passwd"), Err(UrlError::UnsupportedScheme(_))));
        assert!(matches!(canonicalize("ftp://example.com"), Err(UrlError::UnsupportedScheme(_))));
    }

    #[test]
    fn test_canonicalize_empty() {
        assert!(matches!(canonicalize(""), Err(UrlError::Empty)));
        assert!(matches!(canonicalize("   "), Err(UrlError::Empty)));
    }

    #[test]
    fn test_canonicalize_http_allowed() {
        let url = canonicalize("http://example.com").unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn test_url_error_maps_to_invalid_url() {
        let err: Error = canonicalize("http://").unwrap_err().into();
        assert!(err.to_string().starts_with("INVALID_URL"));
    }

    #[test]
    fn test_canonicalize_batch_passes_failures_through() {
        let urls = canonicalize_batch(["Example.com/x#top", "", "ftp://example.com/f"]);
        assert_eq!(urls, vec!["https://example.com/x", "", "ftp://example.com/f"]);
    }

    #[test]
    fn test_batch_inputs_answer_each_duplicate_once() {
        let mut inputs = BatchInputs::new(["example.com/one", "https://example.com/one", "nope"]);
        assert_eq!(inputs.urls(), vec!["https://example.com/one", "https://example.com/one", "nope"]);

        let answer = |url: &str| WebPage { original_url: url.to_string(), ..WebPage::default() };

        let mut first = answer("https://example.com/one");
        let mut second = answer("https://example.com/one");
        let mut third = answer("https://example.com/one");
        assert_eq!(inputs.claim(&mut first), Some(0));
        assert_eq!(inputs.claim(&mut second), Some(1));
        assert_eq!(inputs.claim(&mut third), None);
        assert_eq!(first.original_url, "example.com/one");
        assert_eq!(second.original_url, "https://example.com/one");

        let mut invalid = answer("nope");
        assert_eq!(inputs.claim(&mut invalid), Some(2));
        assert_eq!(invalid.original_url, "nope");
    }
}
