use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Stable key of an enrolled identity.
///
/// Keys are compared as strings; integer keys are stored in their decimal form
/// so `IdentityKey::from(7u64) == IdentityKey::from("7")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(String);

impl IdentityKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for IdentityKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for IdentityKey {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

impl From<u32> for IdentityKey {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

/// Opaque encoded biometric feature set.
///
/// The payload encoding is owned by the extraction subsystem; this crate only
/// moves it around. A template is immutable once constructed and cloning it
/// shares the payload.
#[derive(Clone, PartialEq, Eq)]
pub struct Template {
    payload: Arc<[u8]>,
}

impl Template {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self { payload: Arc::from(payload.into()) }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Short SHA-256 digest of the payload, used to refer to a template in logs
    /// without exposing biometric data.
    pub fn digest(&self) -> String {
        format!("{:x}", Sha256::digest(&self.payload))[..12].to_string()
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("len", &self.payload.len())
            .field("digest", &self.digest())
            .finish()
    }
}

/// One enrolled sample in a gallery partition.
///
/// An identity may contribute several entries to the same partition (e.g. several
/// fingers), each with its own template and origin label.
#[derive(Debug, Clone, PartialEq)]
pub struct GalleryEntry {
    pub identity: IdentityKey,
    pub template: Template,
    /// Origin of the sample, e.g. which finger. `None` means unspecified.
    pub label: Option<String>,
}

impl GalleryEntry {
    pub fn new(identity: impl Into<IdentityKey>, template: Template, label: Option<&str>) -> Self {
        Self { identity: identity.into(), template, label: label.map(str::to_string) }
    }
}

/// Whether two origin labels may be compared against each other.
///
/// Unlabelled samples are compatible with everything.
pub(crate) fn labels_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_and_string_keys_are_equal() {
        assert_eq!(IdentityKey::from(7u64), IdentityKey::from("7"));
        assert_eq!(IdentityKey::from(7u32).to_string(), "7");
    }

    #[test]
    fn digest_is_stable_and_short() {
        let a = Template::new(vec![1, 2, 3]);
        let b = Template::new(vec![1, 2, 3]);
        assert_eq!(a.digest(), b.digest());
        assert_eq!(a.digest().len(), 12);
        assert_ne!(a.digest(), Template::new(vec![3, 2, 1]).digest());
    }

    #[test]
    fn debug_does_not_expose_payload() {
        let template = Template::new(vec![0xde, 0xad, 0xbe, 0xef]);
        let rendered = format!("{template:?}");
        assert!(rendered.contains("len: 4"));
        assert!(!rendered.contains("[222"));
    }

    #[test]
    fn label_compatibility() {
        assert!(labels_compatible(Some("thumb"), Some("thumb")));
        assert!(!labels_compatible(Some("thumb"), Some("index")));
        assert!(labels_compatible(None, Some("index")));
        assert!(labels_compatible(Some("thumb"), None));
    }
}
