use url::Url;

/// Query parameters stripped before a URL is looked up or fetched.
pub const TRACKING_PARAMS: &[&str] = &["utm_source", "utm_medium", "utm_campaign", "utm_term", "utm_content", "utm_brand"];

/// Remove tracking parameters and the fragment.
///
/// Remaining query pairs are re-encoded sorted by key, so equivalent URLs
/// produce the same storage key. Matching is case-sensitive.
pub fn clean_url(url: &Url) -> Url {
    let mut cleaned = url.clone();
    cleaned.set_fragment(None);

    if url.query().is_none() {
        return cleaned;
    }

    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    if pairs.is_empty() {
        cleaned.set_query(None);
    } else {
        cleaned.query_pairs_mut().clear().extend_pairs(pairs);
    }

    tracing::trace!(from = %url, to = %cleaned, "cleaned url");
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean(s: &str) -> String {
        clean_url(&Url::parse(s).unwrap()).to_string()
    }

    #[test]
    fn test_strips_tracking_params() {
        assert_eq!(clean("https://ex.com/a?utm_source=x&utm_medium=y"), "https://ex.com/a");
        assert_eq!(clean("https://ex.com/a?utm_brand=b&id=3"), "https://ex.com/a?id=3");
    }

    #[test]
    fn test_sorts_remaining_params() {
        assert_eq!(clean("https://ex.com/?b=2&utm_term=t&a=1"), "https://ex.com/?a=1&b=2");
    }

    #[test]
    fn test_drops_fragment() {
        assert_eq!(clean("https://ex.com/page#section"), "https://ex.com/page");
    }

    #[test]
    fn test_case_sensitive() {
        assert_eq!(clean("https://ex.com/?UTM_SOURCE=x"), "https://ex.com/?UTM_SOURCE=x");
    }

    #[test]
    fn test_untouched_without_query() {
        assert_eq!(clean("https://ex.com/path"), "https://ex.com/path");
    }
}
