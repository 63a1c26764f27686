//! Format versioning and compatibility for persisted artifacts.

/// Current format version for manifests and Parquet key-value metadata.
///
/// Follows semver: MAJOR.MINOR.PATCH
/// - MAJOR: Breaking changes (layout or manifest field removals)
/// - MINOR: Additive changes (new optional fields)
/// - PATCH: Bug fixes, documentation
pub const FORMAT_VERSION: &str = "1.0.0";

/// Check if a persisted format version is readable by this build.
pub fn is_compatible(version: &str) -> bool {
    major(FORMAT_VERSION) == major(version)
}

fn major(version: &str) -> u32 {
    version
        .split('.')
        .next()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0)
}
