//! Utility functions and helpers.

pub mod hash;
pub mod http;
pub mod log;
pub mod xml;

use url::Url;

use crate::error::Result;

/// Resolve a potentially relative URL against a base URL string.
pub fn resolve(base_url: &str, href: &str) -> Option<String> {
    Url::parse(base_url)
        .ok()
        .and_then(|base| base.join(href).ok())
        .map(|u| u.to_string())
}

/// Append query parameters to a base URL, keeping any it already has.
pub fn with_query<'a, I>(base_url: &str, pairs: I) -> Result<String>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut url = Url::parse(base_url)?;
    url.query_pairs_mut().extend_pairs(pairs);
    Ok(url.to_string())
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve("https://example.com/api/items?page=1", "?page=2"),
            Some("https://example.com/api/items?page=2".to_string())
        );
        assert_eq!(
            resolve("https://example.com/path/", "https://other.com/x"),
            Some("https://other.com/x".to_string())
        );
        assert_eq!(resolve("not a url", "x"), None);
    }

    #[test]
    fn test_with_query() {
        let url = with_query(
            "http://museum.example/oai?set=paintings",
            [("verb", "ListRecords"), ("metadataPrefix", "oai_dc")],
        )
        .unwrap();
        assert_eq!(
            url,
            "http://museum.example/oai?set=paintings&verb=ListRecords&metadataPrefix=oai_dc"
        );
    }

    #[test]
    fn test_normalize_whitespace() {
        assert_eq!(normalize_whitespace("  a \n b\t c "), "a b c");
    }
}
