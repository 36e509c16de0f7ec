//! Server configuration

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Storage, sandbox, and retention configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Directory for session document files (default: ./sessions_data)
    pub data_dir: PathBuf,
    /// SQLite database holding session records (default: ./sessions.db)
    pub db_path: PathBuf,
    /// Directories documents may be loaded from and written to.
    /// Empty means unrestricted.
    pub resource_dirs: Vec<String>,
    /// Sessions idle longer than this are purged (default: 24h)
    pub session_max_age: Duration,
    /// Period of the cleanup sweep (default: 1h)
    pub cleanup_interval: Duration,
    /// Suffix appended to the loaded file stem for derived output paths
    pub output_suffix: String,
    /// Maximum number of search_fields matches (default: 10)
    pub search_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./sessions_data"),
            db_path: PathBuf::from("./sessions.db"),
            resource_dirs: Vec::new(),
            session_max_age: Duration::from_secs(24 * 60 * 60),
            cleanup_interval: Duration::from_secs(60 * 60),
            output_suffix: "_filled".to_string(),
            search_limit: 10,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by `PDF_FORM_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(dir) = lookup("PDF_FORM_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("PDF_FORM_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(dirs) = lookup("PDF_FORM_RESOURCE_DIRS") {
            config.resource_dirs = std::env::split_paths(&dirs)
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.display().to_string())
                .collect();
        }
        if let Some(secs) = parse_secs(&lookup, "PDF_FORM_SESSION_MAX_AGE_SECS") {
            config.session_max_age = secs;
        }
        if let Some(secs) = parse_secs(&lookup, "PDF_FORM_CLEANUP_INTERVAL_SECS") {
            config.cleanup_interval = secs;
        }

        config
    }

    /// Directory the turn runner writes uploaded documents into
    pub fn work_dir(&self) -> PathBuf {
        self.data_dir.join("work")
    }

    /// Validate that a path is within allowed resource directories.
    /// If no resource_dirs are configured, all paths are allowed.
    pub fn validate_path_access(&self, path: &str) -> Result<PathBuf> {
        if self.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let canonical = std::fs::canonicalize(path).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        if self.is_allowed(&canonical) {
            Ok(canonical)
        } else {
            Err(Error::PathAccessDenied {
                path: path.to_string(),
            })
        }
    }

    /// Validate that an output path is within allowed resource directories.
    /// Canonicalizes the parent directory since the output file may not exist yet.
    pub fn validate_output_path_access(&self, path: &str) -> Result<PathBuf> {
        if self.resource_dirs.is_empty() {
            return Ok(PathBuf::from(path));
        }

        let path_obj = Path::new(path);
        let parent = match path_obj.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let canonical_parent = std::fs::canonicalize(parent).map_err(|_| Error::PathAccessDenied {
            path: path.to_string(),
        })?;

        let file_name = path_obj.file_name().ok_or_else(|| Error::PathAccessDenied {
            path: path.to_string(),
        })?;
        let canonical_target = canonical_parent.join(file_name);

        if self.is_allowed(&canonical_target) {
            Ok(canonical_target)
        } else {
            Err(Error::PathAccessDenied {
                path: path.to_string(),
            })
        }
    }

    /// The data directory is always reachable so turns can load their uploads
    fn is_allowed(&self, canonical: &Path) -> bool {
        self.resource_dirs
            .iter()
            .map(PathBuf::from)
            .chain(std::iter::once(self.data_dir.clone()))
            .filter_map(|dir| std::fs::canonicalize(dir).ok())
            .any(|dir| canonical.starts_with(dir))
    }
}

fn parse_secs(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    let raw = lookup(key)?;
    match raw.trim().parse::<u64>() {
        Ok(secs) => Some(Duration::from_secs(secs)),
        Err(e) => {
            tracing::warn!(key, value = %raw, error = %e, "Ignoring invalid duration");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_lookup(lookup(&[]));
        assert_eq!(config.data_dir, PathBuf::from("./sessions_data"));
        assert_eq!(config.session_max_age, Duration::from_secs(86_400));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3_600));
        assert_eq!(config.output_suffix, "_filled");
        assert_eq!(config.search_limit, 10);
        assert!(config.resource_dirs.is_empty());
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_lookup(lookup(&[
            ("PDF_FORM_DATA_DIR", "/var/lib/forms"),
            ("PDF_FORM_DB_PATH", "/var/lib/forms.db"),
            ("PDF_FORM_SESSION_MAX_AGE_SECS", "60"),
            ("PDF_FORM_CLEANUP_INTERVAL_SECS", "not-a-number"),
        ]));
        assert_eq!(config.data_dir, PathBuf::from("/var/lib/forms"));
        assert_eq!(config.db_path, PathBuf::from("/var/lib/forms.db"));
        assert_eq!(config.session_max_age, Duration::from_secs(60));
        assert_eq!(config.cleanup_interval, Duration::from_secs(3_600));
        assert_eq!(config.work_dir(), PathBuf::from("/var/lib/forms/work"));
    }

    #[test]
    fn test_unrestricted_without_resource_dirs() {
        let config = ServerConfig::default();
        assert!(config.validate_path_access("/any/where.pdf").is_ok());
        assert!(config.validate_output_path_access("/any/where.pdf").is_ok());
    }

    #[test]
    fn test_sandbox_rejects_outside_paths() {
        let allowed = tempfile::TempDir::new().unwrap();
        let outside = tempfile::TempDir::new().unwrap();
        let data = tempfile::TempDir::new().unwrap();
        let inside_file = allowed.path().join("form.pdf");
        let outside_file = outside.path().join("form.pdf");
        std::fs::write(&inside_file, b"x").unwrap();
        std::fs::write(&outside_file, b"x").unwrap();

        let config = ServerConfig {
            resource_dirs: vec![allowed.path().display().to_string()],
            data_dir: data.path().to_path_buf(),
            ..ServerConfig::default()
        };

        assert!(config
            .validate_path_access(&inside_file.display().to_string())
            .is_ok());
        assert!(matches!(
            config.validate_path_access(&outside_file.display().to_string()),
            Err(Error::PathAccessDenied { .. })
        ));
        assert!(config
            .validate_output_path_access(&allowed.path().join("out.pdf").display().to_string())
            .is_ok());
        assert!(config
            .validate_output_path_access(&outside.path().join("out.pdf").display().to_string())
            .is_err());

        let upload = data.path().join("upload.pdf");
        std::fs::write(&upload, b"x").unwrap();
        assert!(config
            .validate_path_access(&upload.display().to_string())
            .is_ok());
    }
}
