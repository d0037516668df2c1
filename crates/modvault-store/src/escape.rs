//! Module path and version escaping.
//!
//! Case-insensitive filesystems cannot hold both `Foo` and `foo`, so every
//! uppercase ASCII letter is stored as `!` followed by its lowercase form.
//! Paths are checked against the module-path grammar before escaping and
//! after unescaping; versions are checked against the file-name grammar.

use crate::error::{Result, StoreError};

/// Which grammar an element is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElemKind {
    ModulePath,
    FilePath,
}

/// Check that `path` is a valid module path.
pub fn check_path(path: &str) -> Result<()> {
    check_elements(path, ElemKind::ModulePath).map_err(|d| StoreError::invalid_path(path, d))?;

    let first = path.split('/').next().unwrap_or_default();
    if !first.contains('.') {
        return Err(StoreError::invalid_path(path, "missing dot in first path element"));
    }
    if first.starts_with('-') {
        return Err(StoreError::invalid_path(path, "leading dash in first path element"));
    }
    if let Some(c) = first
        .chars()
        .find(|c| !matches!(c, '-' | '.' | '0'..='9' | 'a'..='z'))
    {
        return Err(StoreError::invalid_path(
            path,
            format!("invalid char {c:?} in first path element"),
        ));
    }
    if !has_valid_major_suffix(path) {
        return Err(StoreError::invalid_path(path, "invalid version suffix"));
    }
    Ok(())
}

/// Check that `path` is a valid slash-separated file path inside a module.
pub fn check_file_path(path: &str) -> Result<()> {
    check_elements(path, ElemKind::FilePath)
        .map_err(|d| StoreError::invalid_archive(format!("malformed file path '{path}': {d}")))
}

/// Escape a module path for use as a directory name.
pub fn escape_path(path: &str) -> Result<String> {
    check_path(path)?;
    escape_string(path).ok_or_else(|| StoreError::invalid_path(path, "cannot escape"))
}

/// Reverse [`escape_path`], validating the result.
pub fn unescape_path(escaped: &str) -> Result<String> {
    let path = unescape_string(escaped)
        .ok_or_else(|| StoreError::invalid_path(escaped, "invalid escaped module path"))?;
    check_path(&path)?;
    Ok(path)
}

/// Escape a version for use as a file-name stem.
pub fn escape_version(version: &str) -> Result<String> {
    if version.contains('!') {
        return Err(StoreError::invalid_version(version, "disallowed version string"));
    }
    check_elem(version, ElemKind::FilePath).map_err(|d| StoreError::invalid_version(version, d))?;
    escape_string(version).ok_or_else(|| StoreError::invalid_version(version, "cannot escape"))
}

/// Reverse [`escape_version`], validating the result.
pub fn unescape_version(escaped: &str) -> Result<String> {
    let version = unescape_string(escaped)
        .ok_or_else(|| StoreError::invalid_version(escaped, "invalid escaped version"))?;
    check_elem(&version, ElemKind::FilePath)
        .map_err(|d| StoreError::invalid_version(escaped, d))?;
    Ok(version)
}

fn escape_string(s: &str) -> Option<String> {
    let mut out = String::with_capacity(s.len() + 4);
    for c in s.chars() {
        if c == '!' || !c.is_ascii() {
            return None;
        }
        if c.is_ascii_uppercase() {
            out.push('!');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn unescape_string(escaped: &str) -> Option<String> {
    let mut out = String::with_capacity(escaped.len());
    let mut bang = false;
    for c in escaped.chars() {
        if !c.is_ascii() {
            return None;
        }
        if bang {
            bang = false;
            if !c.is_ascii_lowercase() {
                return None;
            }
            out.push(c.to_ascii_uppercase());
            continue;
        }
        if c == '!' {
            bang = true;
            continue;
        }
        if c.is_ascii_uppercase() {
            return None;
        }
        out.push(c);
    }
    if bang {
        return None;
    }
    Some(out)
}

fn check_elements(path: &str, kind: ElemKind) -> std::result::Result<(), String> {
    if path.is_empty() {
        return Err("empty string".to_string());
    }
    if kind == ElemKind::ModulePath && path.starts_with('-') {
        return Err("leading dash".to_string());
    }
    if path.starts_with('/') {
        return Err("leading slash".to_string());
    }
    if path.contains("//") {
        return Err("double slash".to_string());
    }
    if path.ends_with('/') {
        return Err("trailing slash".to_string());
    }
    path.split('/').try_for_each(|elem| check_elem(elem, kind))
}

fn check_elem(elem: &str, kind: ElemKind) -> std::result::Result<(), String> {
    if elem.is_empty() {
        return Err("empty path element".to_string());
    }
    if elem.chars().all(|c| c == '.') {
        return Err(format!("invalid path element {elem:?}"));
    }
    if kind == ElemKind::ModulePath && elem.starts_with('.') {
        return Err("leading dot in path element".to_string());
    }
    if elem.ends_with('.') {
        return Err("trailing dot in path element".to_string());
    }
    let allowed = match kind {
        ElemKind::ModulePath => module_path_ok,
        ElemKind::FilePath => file_name_ok,
    };
    if let Some(c) = elem.chars().find(|c| !allowed(*c)) {
        return Err(format!("invalid char {c:?}"));
    }

    // Windows device names are reserved regardless of extension.
    let short = elem.split('.').next().unwrap_or(elem);
    if is_reserved_name(short) {
        return Err(format!("{short:?} disallowed as path element component on Windows"));
    }

    // Elements that look like Windows 8.3 short names: `~` followed by digits.
    if kind == ElemKind::ModulePath {
        if let Some((_, suffix)) = short.rsplit_once('~') {
            if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) {
                return Err("trailing tilde and digits in path element".to_string());
            }
        }
    }
    Ok(())
}

fn module_path_ok(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '~')
}

fn file_name_ok(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_alphanumeric() || "!#$%&()+,-.=@[]^_{}~ ".contains(c);
    }
    c.is_alphabetic()
}

fn is_reserved_name(short: &str) -> bool {
    const RESERVED: &[&str] = &["CON", "PRN", "AUX", "NUL"];
    let upper = short.to_ascii_uppercase();
    if RESERVED.contains(&upper.as_str()) {
        return true;
    }
    match upper.strip_prefix("COM").or_else(|| upper.strip_prefix("LPT")) {
        Some(n) => n.len() == 1 && matches!(n.as_bytes()[0], b'1'..=b'9'),
        None => false,
    }
}

/// A trailing `/vN` element must name a major version of at least 2.
fn has_valid_major_suffix(path: &str) -> bool {
    let Some((_, last)) = path.rsplit_once('/') else {
        return true;
    };
    let Some(digits) = last.strip_prefix('v') else {
        return true;
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit() || b == b'.') {
        return true;
    }
    !(digits.contains('.') || digits.starts_with('0') || digits == "1")
}
