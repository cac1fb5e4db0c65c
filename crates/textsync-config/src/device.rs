/// Device identity: an opaque lowercase id, stable per installation.
use std::fmt;

use anyhow::{bail, Result};

/// Lowercase device identifier.
///
/// Only used to break ordering ties between concurrent history entries,
/// never for ownership or authority.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

impl DeviceId {
    /// Generates a fresh random id (UUID v4, lowercase hyphenated).
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Normalizes `raw` to a trimmed, lowercase id.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is empty or whitespace.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.trim().to_lowercase();
        if id.is_empty() {
            bail!("Device id must not be empty");
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_is_lowercase_uuid() {
        let id = DeviceId::generate();
        assert_eq!(id.as_str().len(), 36);
        assert_eq!(id.as_str(), id.as_str().to_lowercase());
        assert!(uuid::Uuid::parse_str(id.as_str()).is_ok());
    }

    #[test]
    fn test_generate_is_unique() {
        assert_ne!(DeviceId::generate(), DeviceId::generate());
    }

    #[test]
    fn test_parse_normalizes() {
        let id = DeviceId::parse("  Laptop-A ").unwrap();
        assert_eq!(id.as_str(), "laptop-a");
        assert_eq!(id.to_string(), "laptop-a");
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert!(DeviceId::parse("").is_err());
        assert!(DeviceId::parse("   ").is_err());
    }
}
