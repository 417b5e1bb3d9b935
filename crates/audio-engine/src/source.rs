//! Locator parsing and source selection.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::probe::Hint;

use crate::error::{EngineError, Result};

/// Where a track's bytes come from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Locator {
    Local(PathBuf),
    Network(String),
}

impl Locator {
    /// Classify a locator string.
    ///
    /// `http(s)://` is a network stream, `file://` and bare paths are local.
    /// Any other scheme is rejected up front.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(EngineError::source_construction(raw, "empty locator"));
        }
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            let uri = trimmed
                .parse::<ureq::http::Uri>()
                .map_err(|e| EngineError::source_construction(raw, format!("invalid url: {e}")))?;
            if uri.host().is_none_or(str::is_empty) {
                return Err(EngineError::source_construction(raw, "url has no host"));
            }
            return Ok(Self::Network(trimmed.to_string()));
        }
        if lower.starts_with("file://") {
            let path = &trimmed["file://".len()..];
            if path.is_empty() {
                return Err(EngineError::source_construction(raw, "empty file uri"));
            }
            return Ok(Self::Local(PathBuf::from(percent_decode(path))));
        }
        if let Some((scheme, _)) = trimmed.split_once("://") {
            if is_scheme(scheme) {
                return Err(EngineError::source_construction(
                    raw,
                    format!("unsupported scheme: {scheme}"),
                ));
            }
        }
        Ok(Self::Local(PathBuf::from(trimmed)))
    }

    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }

    /// Container hint from the file extension, best-effort.
    pub fn hint(&self) -> Hint {
        let mut hint = Hint::new();
        let ext = match self {
            Self::Local(path) => path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase()),
            Self::Network(url) => infer_ext_from_url(url),
        };
        if let Some(ext) = ext {
            hint.with_extension(&ext);
        }
        hint
    }
}

/// Open a local file, mapping failures to a construction error.
pub fn open_local(path: &Path) -> Result<File> {
    if path.is_dir() {
        return Err(EngineError::source_construction(
            &path.to_string_lossy(),
            "is a directory",
        ));
    }
    File::open(path)
        .map_err(|e| EngineError::source_construction(&path.to_string_lossy(), e.to_string()))
}

fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

fn infer_ext_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let after_host = path.splitn(4, '/').nth(3)?;
    let last = after_host.rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

fn percent_decode(s: &str) -> String {
    urlencoding::decode(s)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| s.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_and_https_are_network() {
        assert!(Locator::parse("http://radio.example/stream").unwrap().is_network());
        assert!(Locator::parse("HTTPS://cdn.example/a.mp3").unwrap().is_network());
    }

    #[test]
    fn bare_paths_and_file_uris_are_local() {
        assert_eq!(
            Locator::parse("/music/a.flac").unwrap(),
            Locator::Local(PathBuf::from("/music/a.flac"))
        );
        assert_eq!(
            Locator::parse("file:///music/My%20Song.flac").unwrap(),
            Locator::Local(PathBuf::from("/music/My Song.flac"))
        );
    }

    #[test]
    fn empty_and_unknown_scheme_are_construction_errors() {
        assert!(matches!(
            Locator::parse("  "),
            Err(EngineError::SourceConstruction { .. })
        ));
        assert!(matches!(
            Locator::parse("rtsp://camera/feed"),
            Err(EngineError::SourceConstruction { .. })
        ));
    }

    #[test]
    fn malformed_urls_are_construction_errors() {
        for raw in ["http://", "https://", "http:// bad host/a.mp3"] {
            let err = Locator::parse(raw).unwrap_err();
            assert!(
                matches!(err, EngineError::SourceConstruction { .. }),
                "{raw}: {err}"
            );
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn url_extension_ignores_query() {
        assert_eq!(
            infer_ext_from_url("http://host/path/track.FLAC?token=1"),
            Some("flac".to_string())
        );
        assert_eq!(infer_ext_from_url("http://host/stream"), None);
        assert_eq!(infer_ext_from_url("http://host.example"), None);
    }

    #[test]
    fn missing_local_file_fails_to_open() {
        let err = open_local(Path::new("/definitely/not/here.flac")).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn percent_decode_falls_back_on_invalid_utf8() {
        assert_eq!(percent_decode("%41b"), "Ab");
        assert_eq!(percent_decode("%FF"), "%FF");
    }
}
