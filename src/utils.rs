//! Utility functions for naming and formatting

use rand::Rng;

/// Length of the random replacement base name, in hex characters.
const RANDOM_NAME_HEX_LEN: usize = 32;

/// A file name is acceptable on disk iff it is non-empty and every
/// character is ASCII alphanumeric, `.`, `_`, or `-`.
pub fn is_valid_file_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

/// Generate a random 32-hex-character base name.
pub fn random_base_name() -> String {
    let mut bytes = [0u8; RANDOM_NAME_HEX_LEN / 2];
    rand::thread_rng().fill(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Resolve the final file name from a probed candidate.
///
/// A valid candidate is kept as-is; anything else is replaced by a random
/// 32-hex-character base carrying the derived extension.
pub fn resolve_file_name(candidate: &str, extension: &str) -> String {
    if is_valid_file_name(candidate) {
        candidate.to_string()
    } else {
        format!("{}{extension}", random_base_name())
    }
}

/// Base name without its final extension, used to name the work directory.
///
/// `"archive.tar.gz"` → `"archive.tar"`; a name without a dot is returned
/// unchanged.
pub fn base_name_without_extension(name: &str) -> &str {
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Format a byte rate with 3 significant digits and a per-second unit.
///
/// Decimal units (1 kB = 1000 B), matching the Mbps-based ceiling math.
pub fn format_rate(bps: u64) -> String {
    const UNITS: [&str; 5] = ["B/s", "kB/s", "MB/s", "GB/s", "TB/s"];

    let mut value = bps as f64;
    let mut unit = 0;
    while value >= 1000.0 && unit < UNITS.len() - 1 {
        value /= 1000.0;
        unit += 1;
    }

    let rendered = if value >= 100.0 {
        format!("{value:.0}")
    } else if value >= 10.0 {
        format!("{value:.1}")
    } else {
        format!("{value:.2}")
    };
    format!("{rendered} {}", UNITS[unit])
}
