//! URL metadata probing
//!
//! One HEAD request establishes everything the planner needs: artifact
//! size, content type, whether the origin honors byte ranges, and a
//! candidate file name. Origins that answer non-2xx or refuse ranges are
//! rejected before any work directory is created.

use crate::error::{Error, Result};
use crate::utils;
use reqwest::header;
use url::Url;

/// Fallback extension when neither the URL path nor the MIME type yields one.
const UNKNOWN_EXTENSION: &str = ".unknow";

/// Metadata describing a remote artifact, derived from a HEAD response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UrlMetadata {
    /// Dotted extension, e.g. `".bin"`; `".unknow"` when underivable
    pub file_type: String,
    /// `Content-Length`, defaulting to 0 when absent or unparseable
    pub size: u64,
    /// True iff the origin advertises `Accept-Ranges: bytes`
    pub accept_range: bool,
    /// Sanitized file name (probed candidate, or a random replacement)
    pub file_name: String,
    /// `Content-Type` token before any `;` parameter
    pub content_type: String,
}

/// True iff `url` parses as an absolute http(s) URL.
pub fn validate(url: &str) -> bool {
    matches!(Url::parse(url), Ok(parsed) if matches!(parsed.scheme(), "http" | "https"))
}

/// Probe `url` with a HEAD request and derive [`UrlMetadata`].
///
/// Fails with [`Error::BadUrl`] on invalid URLs, transport errors, and
/// non-2xx statuses.
pub async fn fetch_metadata(
    client: &reqwest::Client,
    url: &str,
    user_agent: &str,
) -> Result<UrlMetadata> {
    let parsed = Url::parse(url).map_err(|e| Error::BadUrl(format!("{url}: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::BadUrl(format!(
            "{url}: unsupported scheme '{}'",
            parsed.scheme()
        )));
    }

    let response = client
        .head(url)
        .header(header::USER_AGENT, user_agent)
        .send()
        .await
        .map_err(|e| Error::BadUrl(format!("HEAD {url} failed: {e}")))?;

    let status = response.status();
    if !status.is_success() {
        return Err(Error::BadUrl(format!("HEAD {url} returned {status}")));
    }

    let headers = response.headers();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or("").trim().to_string())
        .unwrap_or_default();

    let size = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .unwrap_or(0);

    let accept_range = headers
        .get(header::ACCEPT_RANGES)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("bytes"));

    let candidate = headers
        .get(header::CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(disposition_filename)
        .unwrap_or_else(|| last_path_segment(&parsed));

    let file_type = derive_extension(&candidate, &content_type);
    let file_name = utils::resolve_file_name(&candidate, &file_type);

    Ok(UrlMetadata {
        file_type,
        size,
        accept_range,
        file_name,
        content_type,
    })
}

/// Extract `filename="..."` (or an unquoted filename token) from a
/// Content-Disposition header value.
fn disposition_filename(value: &str) -> Option<String> {
    for part in value.split(';') {
        let part = part.trim();
        if let Some(rest) = part.strip_prefix("filename=") {
            let name = rest.trim().trim_matches('"');
            if !name.is_empty() {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Last non-empty path segment of the URL, or empty when the path is bare.
fn last_path_segment(url: &Url) -> String {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or("")
        .to_string()
}

/// Dotted extension from the candidate name if it has one, else from the
/// MIME subtype, else [`UNKNOWN_EXTENSION`].
fn derive_extension(candidate: &str, content_type: &str) -> String {
    if let Some((stem, ext)) = candidate.rsplit_once('.')
        && !stem.is_empty()
        && !ext.is_empty()
    {
        return format!(".{ext}");
    }

    if let Some((_, subtype)) = content_type.split_once('/')
        && !subtype.is_empty()
    {
        return format!(".{subtype}");
    }

    UNKNOWN_EXTENSION.to_string()
}
