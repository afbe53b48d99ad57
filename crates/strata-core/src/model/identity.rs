use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Opaque, stable key of an underlying record.
///
/// The same record must carry the same identity in vector and lexical
/// results; the merger joins on it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Identity derived from record content, for stores that cannot supply a
    /// key join. Prefixed so it never collides with a plain key.
    #[must_use]
    pub fn fingerprint(content: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content.as_bytes());
        Self(format!("sha256:{:x}", hasher.finalize()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for Identity {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for Identity {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_is_stable_and_content_sensitive() {
        let a = Identity::fingerprint("alpha");
        assert_eq!(a, Identity::fingerprint("alpha"));
        assert_ne!(a, Identity::fingerprint("beta"));
        assert!(a.as_str().starts_with("sha256:"));
        assert_eq!(a.as_str().len(), "sha256:".len() + 64);
    }

    #[test]
    fn integer_keys_render_as_text() {
        assert_eq!(Identity::from(42_i64).as_str(), "42");
        assert_eq!(Identity::from(42_i64), Identity::from("42"));
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&Identity::new("doc-7")).expect("serialize");
        assert_eq!(json, "\"doc-7\"");
    }
}
