//! The syscall → errno catalog: a static mapping produced by a separate
//! man-page scraper, loaded once at generator startup and passed in by
//! reference rather than a module-level singleton.
//!
//! Grounded in `src/utils/errorMatching.py`, which scrapes `man2` pages
//! into exactly this shape (`json.dump(self.error_dict, file)`, a plain
//! `{syscall: [errno, ...]}` object) — `falla` only consumes that output,
//! via `serde_json`, the way `renacer` consumes its own JSON fixtures.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::errors::FallaError;

#[derive(Debug, Deserialize)]
#[serde(transparent)]
pub struct SyscallErrorCatalog {
    errors: HashMap<String, Vec<String>>,
}

impl SyscallErrorCatalog {
    /// Loads the catalog from a JSON file `{ "syscall": ["EINVAL", ...] }`.
    pub fn load(path: &Path) -> Result<Self, FallaError> {
        let data = fs::read_to_string(path)?;
        let catalog: SyscallErrorCatalog = serde_json::from_str(&data)?;
        Ok(catalog)
    }

    pub fn contains(&self, syscall: &str) -> bool {
        self.errors.contains_key(syscall)
    }

    pub fn errors_for(&self, syscall: &str) -> &[String] {
        self.errors.get(syscall).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_and_queries_a_catalog_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, r#"{"open": ["ENOENT", "EACCES"], "read": ["EIO"]}"#).unwrap();

        let catalog = SyscallErrorCatalog::load(&path).unwrap();
        assert!(catalog.contains("open"));
        assert!(!catalog.contains("write"));
        assert_eq!(catalog.errors_for("read"), &["EIO".to_string()]);
        assert_eq!(catalog.len(), 2);
    }

    #[test]
    fn rejects_malformed_catalog_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        fs::write(&path, "not json").unwrap();
        assert!(SyscallErrorCatalog::load(&path).is_err());
    }
}
