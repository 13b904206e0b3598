//! Validation of file names received from peers.
//!
//! A manifest entry names exactly one file inside the destination
//! directory. Anything that could address another location is refused.

use crate::{FileError, Result};
use std::path::{Component, Path};

const MAX_NAME_LEN: usize = 255;

/// Check that `name` is a single, plain path component.
///
/// # Errors
///
/// Returns [`FileError::InvalidName`] for empty names, NUL bytes, path
/// separators, `.`/`..`, absolute paths, or names over 255 bytes.
pub fn validate_file_name(name: &str) -> Result<&str> {
    let refuse = |reason| {
        Err(FileError::InvalidName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return refuse("empty");
    }
    if name.len() > MAX_NAME_LEN {
        return refuse("too long");
    }
    if name.contains('\0') {
        return refuse("contains NUL byte");
    }
    if name.contains('/') || name.contains('\\') {
        return refuse("contains path separator");
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(name),
        (Some(Component::ParentDir), _) => refuse("parent directory"),
        (Some(Component::RootDir | Component::Prefix(_)), _) => refuse("absolute path"),
        _ => refuse("not a plain file name"),
    }
}

/// Name to advertise for a local file: its final path component.
///
/// # Errors
///
/// Returns [`FileError::InvalidName`] if the path has no usable file name.
pub fn file_name_of(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FileError::InvalidName {
            name: path.display().to_string(),
            reason: "no UTF-8 file name",
        })?;
    validate_file_name(name).map(str::to_string)
}
