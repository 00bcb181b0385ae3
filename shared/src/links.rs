//! NoelShack link handling.
//!
//! The host answers an upload with a *base link*, the page that shows the
//! image inside the site layout, e.g.
//! `https://www.noelshack.com/2019-14-1-1554135563-cat.png`. The raw file
//! lives at the matching *direct link*,
//! `https://image.noelshack.com/fichiers/2019/14/1/1554135563-cat.png`.
//! Links from before 2018 have no day-of-week segment.

use serde::Deserialize;
use thiserror::Error;
use url::Url;

use crate::{truncate_message, AppError, ErrorKind, MAX_LINK_LENGTH, MAX_STATUS_MESSAGE_LENGTH};

const BASE_HOSTS: &[&str] = &["noelshack.com", "www.noelshack.com"];
const IMAGE_HOST: &str = "image.noelshack.com";
const FILES_PREFIX: &str = "/fichiers/";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("empty response from the image host")]
    EmptyResponse,

    #[error("the image host refused the upload: {0}")]
    Rejected(String),

    #[error("invalid link {link}: {reason}")]
    InvalidLink { link: String, reason: String },
}

impl From<LinkError> for AppError {
    fn from(e: LinkError) -> Self {
        let kind = match &e {
            LinkError::EmptyResponse | LinkError::Rejected(_) => ErrorKind::Server,
            LinkError::InvalidLink { .. } => ErrorKind::InvalidLink,
        };
        AppError::new(kind, e.to_string())
    }
}

/// Converts a base link to the direct link of the image file. Links that are
/// not NoelShack base links come back unchanged.
#[must_use]
pub fn noelshack_to_direct_link(base_link: &str) -> String {
    let Ok(parsed) = Url::parse(base_link.trim()) else {
        return base_link.to_string();
    };

    let Some(host) = parsed.host_str() else {
        return base_link.to_string();
    };

    if !BASE_HOSTS.contains(&host.to_ascii_lowercase().as_str()) {
        return base_link.to_string();
    }

    let path = parsed.path().trim_start_matches('/');
    match split_base_path(path) {
        Some(segments) => format!("https://{IMAGE_HOST}{FILES_PREFIX}{}", segments.join("/")),
        None => base_link.to_string(),
    }
}

/// `2019-14-1-1554135563-cat.png` -> `[2019, 14, 1, 1554135563-cat.png]`,
/// `2015-12-1427217181-cat.png` -> `[2015, 12, 1427217181-cat.png]`.
fn split_base_path(path: &str) -> Option<Vec<&str>> {
    let mut parts = path.splitn(3, '-');
    let year = parts.next()?;
    let week = parts.next()?;
    let rest = parts.next()?;

    let is_digits = |s: &str| !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit());
    if year.len() != 4 || !is_digits(year) || week.len() > 2 || !is_digits(week) {
        return None;
    }

    match rest.split_once('-') {
        Some((day, file)) if day.len() == 1 && is_digits(day) && !file.is_empty() => {
            Some(vec![year, week, day, file])
        }
        _ if !rest.is_empty() && rest.contains('-') => Some(vec![year, week, rest]),
        _ => None,
    }
}

/// True when `link` points to an image file on the NoelShack file host.
#[must_use]
pub fn is_noelshack_image_link(link: &str) -> bool {
    let Ok(parsed) = Url::parse(link) else {
        return false;
    };

    let host_ok = parsed
        .host_str()
        .is_some_and(|h| h.eq_ignore_ascii_case(IMAGE_HOST));
    let scheme_ok = matches!(parsed.scheme(), "http" | "https");
    let path = parsed.path();

    scheme_ok
        && host_ok
        && path.starts_with(FILES_PREFIX)
        && path
            .rsplit('/')
            .next()
            .and_then(|file| file.rsplit_once('.'))
            .is_some_and(|(stem, ext)| !stem.is_empty() && !ext.is_empty())
}

/// Checks that `link` is a usable http(s) link and returns it trimmed.
pub fn validate_link(link: &str) -> Result<String, LinkError> {
    let trimmed = link.trim();
    let invalid = |reason: &str| LinkError::InvalidLink {
        link: truncate_message(trimmed, 100),
        reason: reason.to_string(),
    };

    if trimmed.is_empty() {
        return Err(invalid("link cannot be empty"));
    }
    if trimmed.len() > MAX_LINK_LENGTH {
        return Err(invalid("link is too long"));
    }

    let parsed = Url::parse(trimmed).map_err(|e| invalid(&e.to_string()))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(invalid("only http and https links are allowed"));
    }
    if parsed.host_str().is_none() {
        return Err(invalid("link must have a host"));
    }

    Ok(trimmed.to_string())
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    url: Option<String>,
    #[serde(default, alias = "erreurs")]
    error: Option<serde_json::Value>,
}

/// Extracts the base link from the body returned by the upload endpoint.
///
/// The JSON webservice answers `{"url": "..."}` or `{"erreurs": ...}`; the
/// legacy endpoint answers with the bare link or a plain-text error.
pub fn parse_upload_response(body: &str) -> Result<String, LinkError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(LinkError::EmptyResponse);
    }

    if body.starts_with('{') {
        let response: UploadResponse = serde_json::from_str(body)
            .map_err(|e| LinkError::Rejected(format!("unreadable response: {e}")))?;

        if let Some(error) = response.error.filter(|e| !e.is_null()) {
            let message = match error {
                serde_json::Value::String(s) => s,
                other => other.to_string(),
            };
            return Err(LinkError::Rejected(truncate_message(&message, MAX_STATUS_MESSAGE_LENGTH)));
        }

        return match response.url {
            Some(url) => validate_link(&url),
            None => Err(LinkError::Rejected("response has no link".to_string())),
        };
    }

    if body.starts_with("http://") || body.starts_with("https://") {
        return validate_link(body);
    }

    Err(LinkError::Rejected(truncate_message(body, MAX_STATUS_MESSAGE_LENGTH)))
}

#[cfg(test)]
mod tests {
    use super::*;

    mod direct_link_tests {
        use super::*;

        #[test]
        fn test_current_format_with_day() {
            assert_eq!(
                noelshack_to_direct_link("https://www.noelshack.com/2019-14-1-1554135563-cat.png"),
                "https://image.noelshack.com/fichiers/2019/14/1/1554135563-cat.png"
            );
        }

        #[test]
        fn test_legacy_format_without_day() {
            assert_eq!(
                noelshack_to_direct_link("http://www.noelshack.com/2015-12-1427217181-cat.png"),
                "https://image.noelshack.com/fichiers/2015/12/1427217181-cat.png"
            );
        }

        #[test]
        fn test_host_without_www() {
            assert_eq!(
                noelshack_to_direct_link("https://noelshack.com/2020-01-3-1577900000-x.jpg"),
                "https://image.noelshack.com/fichiers/2020/01/3/1577900000-x.jpg"
            );
        }

        #[test]
        fn test_other_links_unchanged() {
            for link in [
                "https://example.com/2019-14-1-1554135563-cat.png",
                "https://image.noelshack.com/fichiers/2019/14/1/1554135563-cat.png",
                "https://www.noelshack.com/",
                "https://www.noelshack.com/abcd-14-1-x.png",
                "not a link",
                "",
            ] {
                assert_eq!(noelshack_to_direct_link(link), link);
            }
        }

        #[test]
        fn test_converted_links_are_image_links() {
            let direct =
                noelshack_to_direct_link("https://www.noelshack.com/2019-14-1-1554135563-cat.png");
            assert!(is_noelshack_image_link(&direct));
        }
    }

    mod image_link_tests {
        use super::*;

        #[test]
        fn test_valid_image_link() {
            assert!(is_noelshack_image_link(
                "https://image.noelshack.com/fichiers/2019/14/1/1554135563-cat.png"
            ));
        }

        #[test]
        fn test_rejects_base_link() {
            assert!(!is_noelshack_image_link(
                "https://www.noelshack.com/2019-14-1-1554135563-cat.png"
            ));
        }

        #[test]
        fn test_rejects_missing_extension_or_prefix() {
            assert!(!is_noelshack_image_link("https://image.noelshack.com/fichiers/2019/14/1/cat"));
            assert!(!is_noelshack_image_link("https://image.noelshack.com/minis/2019/14/1/cat.png"));
            assert!(!is_noelshack_image_link("ftp://image.noelshack.com/fichiers/2019/cat.png"));
            assert!(!is_noelshack_image_link(""));
        }
    }

    mod response_tests {
        use super::*;

        #[test]
        fn test_json_url() {
            let link = parse_upload_response(
                r#"{"url":"https://www.noelshack.com/2019-14-1-1554135563-cat.png"}"#,
            )
            .unwrap();
            assert_eq!(link, "https://www.noelshack.com/2019-14-1-1554135563-cat.png");
        }

        #[test]
        fn test_json_error() {
            let err = parse_upload_response(r#"{"erreurs":"Fichier trop volumineux"}"#).unwrap_err();
            assert_eq!(err, LinkError::Rejected("Fichier trop volumineux".into()));
        }

        #[test]
        fn test_json_null_error_with_url() {
            let link = parse_upload_response(
                r#"{"url":"https://www.noelshack.com/2019-14-1-1554135563-cat.png","erreurs":null}"#,
            )
            .unwrap();
            assert!(link.ends_with("cat.png"));
        }

        #[test]
        fn test_json_without_url() {
            assert!(matches!(parse_upload_response("{}"), Err(LinkError::Rejected(_))));
        }

        #[test]
        fn test_plain_link() {
            let link =
                parse_upload_response("  https://www.noelshack.com/2015-12-1427217181-a.png\n").unwrap();
            assert_eq!(link, "https://www.noelshack.com/2015-12-1427217181-a.png");
        }

        #[test]
        fn test_plain_error_and_empty() {
            assert!(matches!(parse_upload_response("Erreur"), Err(LinkError::Rejected(_))));
            assert_eq!(parse_upload_response("   "), Err(LinkError::EmptyResponse));
        }

        #[test]
        fn test_json_url_must_be_http() {
            let err = parse_upload_response(r#"{"url":"javascript:alert(1)"}"#).unwrap_err();
            assert!(matches!(err, LinkError::InvalidLink { .. }));
        }
    }

    #[test]
    fn test_link_error_maps_to_app_error() {
        let err: AppError = LinkError::InvalidLink {
            link: "x".into(),
            reason: "y".into(),
        }
        .into();
        assert_eq!(err.kind, ErrorKind::InvalidLink);

        let err: AppError = LinkError::Rejected("nope".into()).into();
        assert_eq!(err.kind, ErrorKind::Server);
    }
}
