//! Module version grammar and precedence.
//!
//! Module versions are `v`-prefixed semantic versions. Parsing is delegated
//! to the `semver` crate; ordering follows semver precedence with build
//! metadata ignored.

use std::cmp::Ordering;

use crate::error::{Result, StoreError};

/// A parsed semantic version (without the leading `v`).
pub type Version = semver::Version;

/// Parse a module version string like "v1.2.3-rc.1".
pub fn parse_version(s: &str) -> Result<Version> {
    let rest = s
        .strip_prefix('v')
        .ok_or_else(|| StoreError::invalid_version(s, "missing leading 'v'"))?;
    Version::parse(rest).map_err(|e| StoreError::invalid_version(s, e.to_string()))
}

/// Strict grammar check used to gate list-file lines and sniffed versions.
pub fn is_valid_version(s: &str) -> bool {
    parse_version(s).is_ok()
}

/// Compare two parsed versions by precedence, ignoring build metadata.
pub fn precedence(a: &Version, b: &Version) -> Ordering {
    a.major
        .cmp(&b.major)
        .then(a.minor.cmp(&b.minor))
        .then(a.patch.cmp(&b.patch))
        .then_with(|| a.pre.cmp(&b.pre))
}

/// Compare two version strings. Invalid strings sort before valid ones and
/// among themselves lexically, so sorting never panics on bad input.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_version(a), parse_version(b)) {
        (Ok(va), Ok(vb)) => precedence(&va, &vb),
        (Ok(_), Err(_)) => Ordering::Greater,
        (Err(_), Ok(_)) => Ordering::Less,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Sort version strings ascending by precedence. The sort is stable.
pub fn sort_versions(versions: &mut [String]) {
    versions.sort_by(|a, b| compare_versions(a, b));
}
