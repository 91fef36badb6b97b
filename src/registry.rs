//! Destination name rules and the set of names held by in-flight sessions.

use std::collections::HashSet;
use std::sync::{Arc, LazyLock, Mutex, PoisonError};

use regex::Regex;

use crate::error::{Error, Result};

/// Longest accepted destination name.
pub const MAX_NAME_LEN: usize = 128;

/// Suffixes of files kept next to output directories; a directory with one
/// of these names would collide with another name's archive.
const RESERVED_SUFFIXES: [&str; 2] = [".zip", ".part"];

static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*$").expect("valid regex"));

/// Checks that `name` can be used as a directory below the storage root.
///
/// Names are 1 to [`MAX_NAME_LEN`] characters of `[A-Za-z0-9._-]`, start
/// with an alphanumeric character, never contain `..` and do not end in
/// `.zip` or `.part`.
///
/// # Errors
///
/// Returns [`Error::Validation`] describing the first rule that fails.
pub fn validate_directory_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(Error::Validation(format!(
            "Directory Name must be 1 to {MAX_NAME_LEN} characters long."
        )));
    }
    if !NAME_RE.is_match(name) || name.contains("..") {
        return Err(Error::Validation(
            "Directory Name may only contain letters, digits, '.', '_' and '-', \
             and must start with a letter or digit."
                .to_string(),
        ));
    }
    let lower = name.to_ascii_lowercase();
    if let Some(suffix) = RESERVED_SUFFIXES.iter().find(|s| lower.ends_with(*s)) {
        return Err(Error::Validation(format!(
            "Directory Name must not end in {suffix}."
        )));
    }
    Ok(())
}

/// Names reserved by sessions that are still running.
#[derive(Debug, Clone, Default)]
pub struct ActiveNames {
    names: Arc<Mutex<HashSet<String>>>,
}

impl ActiveNames {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserves `name` until the returned guard is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NameInUse`] if another session holds the name.
    pub fn reserve(&self, name: &str) -> Result<NameGuard> {
        let mut names = self.names.lock().unwrap_or_else(PoisonError::into_inner);
        if !names.insert(name.to_string()) {
            return Err(Error::NameInUse {
                name: name.to_string(),
            });
        }
        Ok(NameGuard {
            names: Arc::clone(&self.names),
            name: name.to_string(),
        })
    }

    /// Returns whether `name` is currently reserved.
    #[must_use]
    pub fn is_active(&self, name: &str) -> bool {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(name)
    }
}

/// Holds a destination name; releases it on drop.
#[derive(Debug)]
pub struct NameGuard {
    names: Arc<Mutex<HashSet<String>>>,
    name: String,
}

impl NameGuard {
    /// The reserved name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for NameGuard {
    fn drop(&mut self) {
        self.names
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["site", "my-site_2", "example.com", "A", "v1.2-final"] {
            assert!(validate_directory_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_unsafe_names() {
        for name in [
            "",
            ".hidden",
            "-flag",
            "a/b",
            "a\\b",
            "..",
            "a..b",
            "with space",
            "ünïcode",
            &"x".repeat(MAX_NAME_LEN + 1),
            "a.zip",
            "a.ZIP",
            "a.zip.part",
        ] {
            assert!(
                matches!(validate_directory_name(name), Err(Error::Validation(_))),
                "{name:?}"
            );
        }
    }

    #[test]
    fn names_never_alias_an_archive() {
        for name in ["site", "site.zip", "site.part", "example.com", "zip", "a.zipper"] {
            if validate_directory_name(name).is_ok() {
                let archive = format!("{name}.zip");
                assert!(validate_directory_name(&archive).is_err(), "{archive}");
                assert!(validate_directory_name(&format!("{archive}.part")).is_err());
            }
        }
        assert!(validate_directory_name("zip").is_ok());
        assert!(validate_directory_name("a.zipper").is_ok());
    }

    #[test]
    fn reservation_is_exclusive_until_dropped() {
        let active = ActiveNames::new();
        let guard = active.reserve("site").unwrap();
        assert_eq!(guard.name(), "site");
        assert!(active.is_active("site"));
        assert!(matches!(
            active.reserve("site"),
            Err(Error::NameInUse { name }) if name == "site"
        ));

        let other = active.reserve("other").unwrap();
        drop(guard);
        assert!(!active.is_active("site"));
        assert!(active.is_active("other"));
        assert!(active.reserve("site").is_ok());
        drop(other);
    }

    #[test]
    fn clones_share_state() {
        let active = ActiveNames::new();
        let clone = active.clone();
        let _guard = active.reserve("shared").unwrap();
        assert!(clone.is_active("shared"));
    }

    proptest! {
        #[test]
        fn valid_names_stay_below_root(name in "[A-Za-z0-9._/\\\\-]{0,40}") {
            if validate_directory_name(&name).is_ok() {
                let root = std::path::Path::new("/srv/sites");
                let joined = root.join(&name);
                prop_assert_eq!(joined.parent(), Some(root));
                prop_assert!(!name.contains('/'));
                prop_assert!(!name.contains(".."));
            }
        }
    }
}
