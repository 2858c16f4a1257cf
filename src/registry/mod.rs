// src/registry/mod.rs

//! Registry of installed packages
//!
//! The registry is a single JSON file holding an array of package names in
//! install order. It is the only source of truth for "is X installed":
//!
//! - Names match case-insensitively and keep their casing for display
//! - Every mutation rewrites the whole file through a temp file in the same
//!   directory, so a crash leaves the previous contents in place
//! - A file that is not a JSON array of strings is reported, never discarded

use crate::error::{Error, Result};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Registry identity: names compare by their lower-case form
pub fn names_match(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

pub struct InstallRegistry {
    path: PathBuf,
}

impl InstallRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create an empty registry if none exists
    ///
    /// Idempotent - calling it on an existing registry is safe.
    pub fn init(&self) -> Result<()> {
        if self.path.exists() {
            return Ok(());
        }

        debug!("Initializing registry at: {}", self.path.display());
        self.save(&[])?;
        info!("Registry initialized at {}", self.path.display());
        Ok(())
    }

    /// Read all registered names, initializing the file on first use
    pub fn load(&self) -> Result<Vec<String>> {
        self.init()?;

        let content =
            fs::read_to_string(&self.path).map_err(|e| Error::io("read registry", &self.path, e))?;
        serde_json::from_str::<Vec<String>>(&content).map_err(|e| Error::CorruptRegistry {
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Names in install order
    pub fn list(&self) -> Result<Vec<String>> {
        self.load()
    }

    pub fn contains(&self, name: &str) -> Result<bool> {
        Ok(self.load()?.iter().any(|n| names_match(n, name)))
    }

    /// Register a name; returns false if it was already present
    pub fn add(&self, name: &str) -> Result<bool> {
        let mut names = self.load()?;

        if names.iter().any(|n| names_match(n, name)) {
            debug!("{} is already registered", name);
            return Ok(false);
        }

        names.push(name.to_string());
        self.save(&names)?;
        info!("Registered package {}", name);
        Ok(true)
    }

    /// Remove every entry matching `name`; returns how many were removed
    ///
    /// The file is rewritten even when nothing matched.
    pub fn remove(&self, name: &str) -> Result<usize> {
        let mut names = self.load()?;
        let before = names.len();

        names.retain(|n| !names_match(n, name));
        self.save(&names)?;

        let removed = before - names.len();
        if removed > 0 {
            info!("Unregistered package {}", name);
        }
        Ok(removed)
    }

    /// Names containing `pattern`, case-insensitively
    pub fn search(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = pattern.to_lowercase();
        Ok(self
            .load()?
            .into_iter()
            .filter(|n| n.to_lowercase().contains(&pattern))
            .collect())
    }

    fn save(&self, names: &[String]) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent).map_err(|e| {
            Error::CoreError(format!(
                "Failed to create registry directory {}: {}",
                parent.display(),
                e
            ))
        })?;

        let encoded = serde_json::to_string_pretty(names)
            .map_err(|e| Error::CoreError(format!("Failed to encode registry: {}", e)))?;

        let write_error = |e| Error::io("write registry", &self.path, e);
        let mut tmp = NamedTempFile::new_in(&parent).map_err(write_error)?;
        tmp.write_all(encoded.as_bytes()).map_err(write_error)?;
        tmp.flush().map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;
        tmp.persist(&self.path).map_err(|e| {
            Error::CoreError(format!(
                "Failed to replace registry {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        debug!("Saved {} registry entries", names.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn registry_in(dir: &Path) -> InstallRegistry {
        InstallRegistry::new(dir.join("root/installed_packages.json"))
    }

    #[test]
    fn test_load_initializes_empty_registry() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        assert!(registry.load().unwrap().is_empty());
        assert!(registry.path().exists());

        let content = fs::read_to_string(registry.path()).unwrap();
        assert_eq!(serde_json::from_str::<Vec<String>>(&content).unwrap(), Vec::<String>::new());

        // Second load is a no-op
        assert!(registry.load().unwrap().is_empty());
    }

    #[test]
    fn test_add_is_idempotent_and_case_insensitive() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        assert!(registry.add("MyApp").unwrap());
        assert!(!registry.add("myapp").unwrap());
        assert!(!registry.add("MYAPP").unwrap());

        assert_eq!(registry.list().unwrap(), vec!["MyApp".to_string()]);
        assert!(registry.contains("myAPP").unwrap());
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        for name in ["zeta", "alpha", "mid"] {
            registry.add(name).unwrap();
        }

        let reopened = registry_in(dir.path());
        assert_eq!(reopened.list().unwrap(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_remove_all_matches() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        // Hand-written file with duplicates in different casing
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();
        fs::write(registry.path(), r#"["Tool", "other", "TOOL"]"#).unwrap();

        assert_eq!(registry.remove("tool").unwrap(), 2);
        assert_eq!(registry.list().unwrap(), vec!["other"]);
    }

    #[test]
    fn test_remove_missing_is_noop_and_persists() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        assert_eq!(registry.remove("ghost").unwrap(), 0);
        assert!(registry.path().exists());
        assert!(registry.list().unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_registry_fails_loudly() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.add("kept").unwrap();

        fs::write(registry.path(), "{not json").unwrap();

        assert!(matches!(registry.load(), Err(Error::CorruptRegistry { .. })));
        assert!(matches!(registry.add("new"), Err(Error::CorruptRegistry { .. })));
        assert!(matches!(registry.remove("kept"), Err(Error::CorruptRegistry { .. })));

        // Nothing overwrote the corrupt file
        assert_eq!(fs::read_to_string(registry.path()).unwrap(), "{not json");
    }

    #[test]
    fn test_unreadable_registry_is_core_error() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        fs::create_dir_all(registry.path()).unwrap();

        match registry.load() {
            Err(Error::CoreError(message)) => {
                assert!(message.contains("read registry"), "{}", message);
            }
            other => panic!("expected CoreError, got {:?}", other),
        }
        assert!(matches!(registry.add("x"), Err(Error::CoreError(_))));
    }

    #[test]
    fn test_wrong_shape_is_corrupt() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        fs::create_dir_all(registry.path().parent().unwrap()).unwrap();

        fs::write(registry.path(), r#"{"packages": []}"#).unwrap();
        assert!(matches!(registry.load(), Err(Error::CorruptRegistry { .. })));

        fs::write(registry.path(), "[1, 2]").unwrap();
        assert!(matches!(registry.load(), Err(Error::CorruptRegistry { .. })));
    }

    #[test]
    fn test_writes_leave_no_temp_files() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());

        registry.add("a").unwrap();
        registry.add("b").unwrap();
        registry.remove("a").unwrap();

        let entries: Vec<_> = fs::read_dir(registry.path().parent().unwrap())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("installed_packages.json")]);
    }

    #[test]
    fn test_names_match_unicode() {
        assert!(names_match("Äpfel", "äPFEL"));
        assert!(!names_match("apfel", "äpfel"));
    }

    #[test]
    fn test_search() {
        let dir = tempdir().unwrap();
        let registry = registry_in(dir.path());
        registry.add("Firefox").unwrap();
        registry.add("firewall").unwrap();
        registry.add("vim").unwrap();

        assert_eq!(registry.search("FIRE").unwrap(), vec!["Firefox", "firewall"]);
        assert!(registry.search("emacs").unwrap().is_empty());
    }
}
