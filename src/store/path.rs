use std::sync::LazyLock;

use regex::Regex;

use crate::error::{Error, Result};
use crate::types::DEFAULT_NAMESPACE;

static DIRECTORY_PATH: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^(/[A-Za-z0-9_-]+)+$").ok());

/// Collapses duplicate and trailing slashes, then validates the result as a
/// directory path.
pub fn normalize_path(path: &str) -> Result<String> {
    let path = path.trim();

    if path.is_empty() {
        return Err(Error::invalid_input("Path cannot be empty"));
    }

    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let normalized = format!("/{}", segments.join("/"));
    validate_path(&normalized)?;
    Ok(normalized)
}

/// A directory key is `/` or one or more `/[A-Za-z0-9_-]+` segments.
pub fn validate_path(path: &str) -> Result<()> {
    if path == "/" {
        return Ok(());
    }
    if DIRECTORY_PATH.as_ref().is_some_and(|re| re.is_match(path)) {
        Ok(())
    } else {
        Err(Error::invalid_input(format!("invalid path '{path}'")))
    }
}

/// JSON path addressing one directory key. Only call with a validated path: the
/// key is quoted verbatim.
pub(crate) fn json_key(path: &str) -> String {
    format!("$.\"{path}\"")
}

/// Prefix shared by every path in a namespace.
#[must_use]
pub fn namespace_prefix(namespace: &str) -> String {
    format!("/{DEFAULT_NAMESPACE}/{namespace}/")
}
