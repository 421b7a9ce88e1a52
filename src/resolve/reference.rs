//! Classification of user-supplied references.

use regex::Regex;
use url::Url;

use crate::error::{Error, Result};

/// What a reference points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Numeric identifier looked up on the metadata site.
    ContentId { site: String, id: u64 },
    /// HLS manifest.
    Hls(Url),
    /// Any other downloadable URL.
    Direct(Url),
}

/// Classify `reference`.
///
/// `metadata_site` is the configured base URL numeric identifiers resolve
/// against; without it only URLs are accepted.
pub fn classify(reference: &str, metadata_site: Option<&str>) -> Result<SourceRef> {
    let reference = reference.trim();
    if reference.is_empty() {
        return Err(Error::UnresolvableSource("empty reference".into()));
    }

    if reference.chars().all(|c| c.is_ascii_digit()) {
        let id = reference
            .parse::<u64>()
            .map_err(|_| Error::UnresolvableSource(format!("identifier out of range: {}", reference)))?;
        let site = metadata_site.ok_or_else(|| {
            Error::UnresolvableSource(
                "numeric identifiers need resolver.metadata_site to be configured".into(),
            )
        })?;
        return Ok(SourceRef::ContentId {
            site: site.trim_end_matches('/').to_string(),
            id,
        });
    }

    let url = Url::parse(reference)
        .map_err(|e| Error::UnresolvableSource(format!("'{}' is not a URL: {}", reference, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::UnresolvableSource(format!(
            "unsupported scheme '{}'",
            url.scheme()
        )));
    }
    if url.host_str().is_none() {
        return Err(Error::UnresolvableSource(format!("'{}' has no host", reference)));
    }

    if let Some(site) = metadata_site {
        if let Some(id) = content_id_on_site(&url, site)? {
            return Ok(SourceRef::ContentId {
                site: site.trim_end_matches('/').to_string(),
                id,
            });
        }
    }

    if url.path().to_ascii_lowercase().ends_with(".m3u8") {
        return Ok(SourceRef::Hls(url));
    }

    Ok(SourceRef::Direct(url))
}

/// Id of a `/videos/<id>/...` page on the metadata site.
fn content_id_on_site(url: &Url, site: &str) -> Result<Option<u64>> {
    let site = Url::parse(site)?;
    let same_host = match (url.host_str(), site.host_str()) {
        (Some(a), Some(b)) => a.trim_start_matches("www.") == b.trim_start_matches("www."),
        _ => false,
    };
    if !same_host {
        return Ok(None);
    }

    let pattern = Regex::new(r"^/videos/(\d+)(?:/|$)")
        .map_err(|e| Error::Config(format!("Invalid video path pattern: {}", e)))?;
    Ok(pattern
        .captures(url.path())
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok()))
}

/// Pull every http(s) URL out of a chat message.
pub fn extract_urls(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|w| w.trim_matches(|c: char| matches!(c, '<' | '>' | '(' | ')' | '"' | '\'' | ',')))
        .filter(|w| w.starts_with("http://") || w.starts_with("https://"))
        .filter(|w| Url::parse(w).is_ok())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: &str = "https://videos.example.com";

    #[test]
    fn test_bare_number() {
        assert_eq!(
            classify("123456", Some(SITE)).unwrap(),
            SourceRef::ContentId {
                site: SITE.to_string(),
                id: 123456
            }
        );
        assert!(classify("123456", None).is_err());
    }

    #[test]
    fn test_site_page() {
        let r = classify("https://www.videos.example.com/videos/987/some-title/", Some(SITE)).unwrap();
        assert_eq!(
            r,
            SourceRef::ContentId {
                site: SITE.to_string(),
                id: 987
            }
        );
    }

    #[test]
    fn test_other_page_on_site_is_direct() {
        let r = classify("https://videos.example.com/about", Some(SITE)).unwrap();
        assert!(matches!(r, SourceRef::Direct(_)));
    }

    #[test]
    fn test_hls_and_direct() {
        assert!(matches!(
            classify("https://cdn.example.org/live/master.M3U8?token=1", None).unwrap(),
            SourceRef::Hls(_)
        ));
        assert!(matches!(
            classify("https://cdn.example.org/file.mp4", None).unwrap(),
            SourceRef::Direct(_)
        ));
    }

    #[test]
    fn test_rejects() {
        assert!(classify("", None).is_err());
        assert!(classify("hello world", None).is_err());
        assert!(classify("ftp://example.org/file.mp4", None).is_err());
        assert!(classify("99999999999999999999999", Some(SITE)).is_err());
    }

    #[test]
    fn test_extract_urls() {
        let text = "look (https://a.example/x.mp4) and https://b.example/p.m3u8, not ftp://c";
        assert_eq!(
            extract_urls(text),
            vec!["https://a.example/x.mp4", "https://b.example/p.m3u8"]
        );
        assert!(extract_urls("/get 12345").is_empty());
    }
}
