//! Common test utilities: a byte-range-honoring mock origin.

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// The canonical test artifact: byte `k` is `k mod 256`.
pub fn pattern_body(len: usize) -> Vec<u8> {
    (0..len).map(|k| (k % 256) as u8).collect()
}

/// A GET responder that honors `Range: bytes=a-b` with 206 slices,
/// answers 416 past the end, and serves the full body on requests
/// without a Range header.
pub struct RangeOrigin {
    body: Vec<u8>,
}

impl Respond for RangeOrigin {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let total = self.body.len() as u64;
        let requested = request
            .headers
            .get("range")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_range_header);

        match requested {
            Some((start, end)) => {
                if start >= total {
                    return ResponseTemplate::new(416)
                        .insert_header("Content-Range", format!("bytes */{total}").as_str());
                }
                let end = end.min(total - 1);
                let slice = self.body[start as usize..=end as usize].to_vec();
                ResponseTemplate::new(206)
                    .insert_header(
                        "Content-Range",
                        format!("bytes {start}-{end}/{total}").as_str(),
                    )
                    .insert_header("Accept-Ranges", "bytes")
                    .set_body_bytes(slice)
            }
            None => ResponseTemplate::new(200).set_body_bytes(self.body.clone()),
        }
    }
}

fn parse_range_header(value: &str) -> Option<(u64, u64)> {
    let spec = value.strip_prefix("bytes=")?;
    let (start, end) = spec.split_once('-')?;
    Some((start.trim().parse().ok()?, end.trim().parse().ok()?))
}

/// Options for [`mount_origin`].
pub struct OriginOptions {
    pub accept_ranges: bool,
    pub content_type: &'static str,
    pub content_disposition: Option<&'static str>,
}

impl Default for OriginOptions {
    fn default() -> Self {
        Self {
            accept_ranges: true,
            content_type: "application/octet-stream",
            content_disposition: None,
        }
    }
}

/// Mount HEAD + ranged GET mocks for one artifact at `file_path`.
pub async fn mount_origin(
    server: &MockServer,
    file_path: &str,
    body: Vec<u8>,
    options: OriginOptions,
) {
    // A same-length dummy body makes the server advertise the real
    // Content-Length; the body itself is never sent for HEAD
    let mut head = ResponseTemplate::new(200)
        .set_body_bytes(vec![0u8; body.len()])
        .insert_header("Content-Type", options.content_type)
        .insert_header(
            "Accept-Ranges",
            if options.accept_ranges { "bytes" } else { "none" },
        );
    if let Some(disposition) = options.content_disposition {
        head = head.insert_header("Content-Disposition", disposition);
    }

    Mock::given(method("HEAD"))
        .and(path(file_path))
        .respond_with(head)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(file_path))
        .respond_with(RangeOrigin { body })
        .mount(server)
        .await;
}

/// Every `Range:` header value the origin saw on GET requests for
/// `file_path`, in arrival order.
pub async fn received_range_headers(server: &MockServer, file_path: &str) -> Vec<String> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .iter()
        .filter(|r| r.method.to_string() == "GET" && r.url.path() == file_path)
        .filter_map(|r| {
            r.headers
                .get("range")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        })
        .collect()
}
