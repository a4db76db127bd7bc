use crate::error::{CellScribeError, Result};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// API key for the hosted backend.
///
/// Read from disk for every hosted call and dropped afterwards; the key itself
/// never appears in `Debug` output or logs.
#[derive(Clone)]
pub struct Credential {
    key: SecretString,
}

impl Credential {
    /// Read the first line of `path` as the API key.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            CellScribeError::Credential(format!(
                "cannot read credential file {}: {}",
                path.display(),
                e
            ))
        })?;

        let key = content.lines().next().unwrap_or("").trim();
        if key.is_empty() {
            return Err(CellScribeError::Credential(format!(
                "credential file {} is empty",
                path.display()
            )));
        }

        debug!("Loaded credential from {}", path.display());
        Ok(Self::new(key))
    }

    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: SecretString::from(key.into()),
        }
    }

    pub fn expose(&self) -> &str {
        self.key.expose_secret()
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_reads_first_line_only() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  abc123  ").unwrap();
        writeln!(file, "ignored").unwrap();

        let credential = Credential::from_file(file.path()).unwrap();
        assert_eq!(credential.expose(), "abc123");
    }

    #[test]
    fn test_empty_file_is_rejected() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let err = Credential::from_file(file.path()).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }

    #[test]
    fn test_missing_file_names_path() {
        let err = Credential::from_file(Path::new("/nonexistent/key.txt")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/key.txt"));
    }

    #[test]
    fn test_debug_is_redacted() {
        let credential = Credential::new("super-secret");
        assert!(!format!("{:?}", credential).contains("super-secret"));
    }
}
