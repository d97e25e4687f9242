//! Manifest persistence for resumable downloads
//!
//! Every work directory carries a `prometeo.config` file holding the
//! serialized [`Plan`]. The historical encoding is deliberately non-textual
//! but not cryptographic: JSON bytes, reversed, rendered as lowercase hex.
//! Decoding accepts both that form and plain JSON, so directories written
//! by either encoding rehydrate; the `plain-manifest` cargo feature makes
//! new installs write plain JSON.

use crate::error::{Error, Result};
use crate::types::Plan;
use std::fmt::Write as _;
use std::path::Path;

/// Manifest file name at the root of every work directory.
pub const MANIFEST_FILE: &str = "prometeo.config";

/// Per-download text log file name.
pub const LOG_FILE: &str = "prometeo.log";

/// Serialize a plan to its on-disk string form.
pub fn encode(plan: &Plan) -> Result<String> {
    let json = serde_json::to_vec(plan)
        .map_err(|e| Error::BadMetadata(format!("manifest encode failed: {e}")))?;

    if cfg!(feature = "plain-manifest") {
        return Ok(String::from_utf8_lossy(&json).into_owned());
    }

    let mut hex = String::with_capacity(json.len() * 2);
    for byte in json.iter().rev() {
        let _ = write!(hex, "{byte:02x}");
    }
    Ok(hex)
}

/// Deserialize a plan from its on-disk string form.
///
/// Tries the obfuscated hex form first, then plain JSON. Any failure is an
/// invalid manifest; callers garbage-collect the directory.
pub fn decode(raw: &str) -> Result<Plan> {
    let raw = raw.trim();

    if let Some(bytes) = hex_to_bytes(raw) {
        let json: Vec<u8> = bytes.into_iter().rev().collect();
        if let Ok(plan) = serde_json::from_slice::<Plan>(&json) {
            return validated(plan);
        }
    }

    match serde_json::from_str::<Plan>(raw) {
        Ok(plan) => validated(plan),
        Err(e) => Err(Error::BadMetadata(format!("invalid manifest: {e}"))),
    }
}

/// Schema-level sanity checks on a decoded plan. A manifest that parses but
/// describes an impossible plan is as invalid as one that does not parse.
fn validated(plan: Plan) -> Result<Plan> {
    if plan.name.is_empty() {
        return Err(Error::BadMetadata("invalid manifest: empty name".to_string()));
    }
    if plan.parts.is_empty() {
        return Err(Error::BadMetadata(
            "invalid manifest: no ranges in plan".to_string(),
        ));
    }
    let covered: u64 = plan.parts.iter().map(crate::types::Range::len).sum();
    if covered != plan.size {
        return Err(Error::BadMetadata(format!(
            "invalid manifest: ranges cover {covered} bytes of a {} byte plan",
            plan.size
        )));
    }
    Ok(plan)
}

fn hex_to_bytes(raw: &str) -> Option<Vec<u8>> {
    if raw.is_empty() || raw.len() % 2 != 0 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    raw.as_bytes()
        .chunks(2)
        .map(|pair| {
            let s = std::str::from_utf8(pair).ok()?;
            u8::from_str_radix(s, 16).ok()
        })
        .collect()
}

/// Write the manifest into `work_dir`, creating the directory if needed.
pub(crate) async fn write(work_dir: &Path, plan: &Plan) -> Result<()> {
    tokio::fs::create_dir_all(work_dir).await?;
    let encoded = encode(plan)?;
    tokio::fs::write(work_dir.join(MANIFEST_FILE), encoded).await?;
    Ok(())
}

/// Read and decode the manifest from `work_dir`.
pub(crate) async fn read(work_dir: &Path) -> Result<Plan> {
    let raw = tokio::fs::read_to_string(work_dir.join(MANIFEST_FILE)).await?;
    decode(&raw)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::partition_ranges;
    use std::path::PathBuf;

    fn sample_plan(size: u64, connections: usize) -> Plan {
        let work_dir = PathBuf::from("/tmp/prometeo/archive");
        Plan {
            url: "https://example.com/archive.tar.gz".to_string(),
            name: "archive.tar.gz".to_string(),
            size,
            destination: PathBuf::from("/home/user/archive.tar.gz"),
            work_dir: work_dir.clone(),
            content_type: "application/gzip".to_string(),
            parts: partition_ranges("archive.tar.gz", &work_dir, size, connections),
            speed_bps: 1_250_000,
            finished: false,
            resumed: false,
        }
    }

    #[test]
    fn round_trip_preserves_every_field() {
        let plan = sample_plan(1000, 4);
        let decoded = decode(&encode(&plan).unwrap()).unwrap();
        assert_eq!(decoded, plan);
    }

    #[test]
    fn round_trip_preserves_degenerate_ranges() {
        // size < connections produces end == start - 1 entries; the codec
        // must carry the negative inclusive end faithfully
        let plan = sample_plan(3, 4);
        let decoded = decode(&encode(&plan).unwrap()).unwrap();
        assert_eq!(decoded, plan);
        assert_eq!(decoded.parts[0].end, -1);
    }

    #[cfg(not(feature = "plain-manifest"))]
    #[test]
    fn encoded_form_is_lowercase_hex_of_reversed_json() {
        let plan = sample_plan(100, 2);
        let encoded = encode(&plan).unwrap();

        assert!(encoded.bytes().all(|b| b.is_ascii_hexdigit()));
        assert!(!encoded.bytes().any(|b| b.is_ascii_uppercase()));

        // First hex pair is the last JSON byte: '}'
        assert_eq!(&encoded[..2], format!("{:02x}", b'}'));

        // The obfuscation is shallow by design: the raw JSON must not be
        // visible in the stored form
        assert!(!encoded.contains("example.com"));
    }

    #[test]
    fn decode_accepts_plain_json_as_fallback() {
        let plan = sample_plan(500, 2);
        let json = serde_json::to_string(&plan).unwrap();
        assert_eq!(decode(&json).unwrap(), plan);
    }

    #[test]
    fn decode_rejects_garbage() {
        for raw in ["", "not a manifest", "zz00", "deadbeef", "{\"url\": 3}"] {
            let err = decode(raw).unwrap_err();
            assert!(
                matches!(err, Error::BadMetadata(_)),
                "{raw:?} should decode to BadMetadata, got {err:?}"
            );
        }
    }

    #[test]
    fn decode_rejects_plan_whose_ranges_do_not_cover_its_size() {
        let mut plan = sample_plan(1000, 4);
        plan.parts.pop();
        let json = serde_json::to_string(&plan).unwrap();
        assert!(matches!(decode(&json), Err(Error::BadMetadata(_))));
    }

    #[tokio::test]
    async fn write_then_read_through_the_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let work_dir = dir.path().join("archive");
        let plan = sample_plan(1000, 4);

        write(&work_dir, &plan).await.unwrap();
        assert!(work_dir.join(MANIFEST_FILE).exists());

        let loaded = read(&work_dir).await.unwrap();
        assert_eq!(loaded, plan);
    }

    #[tokio::test]
    async fn read_missing_manifest_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = read(dir.path()).await.unwrap_err();
        assert!(matches!(err, Error::Io(_)), "got {err:?}");
    }
}
