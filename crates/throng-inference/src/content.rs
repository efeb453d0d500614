//! Content hashing.
//!
//! A [`ContentHash`] identifies one (content, cluster) pair: the same
//! content shown to two different clusters needs two analyses, while two
//! agents in the same cluster share one.

use sha2::{Digest, Sha256};
use throng_types::{ClusterKey, ContentDescriptor};

/// Field separator fed to the hasher between inputs.
const SEPARATOR: [u8; 1] = [0x1f];

/// SHA-256 digest of a content descriptor and cluster key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Hash `content` as seen by the cluster `key`.
    ///
    /// Line endings are normalized (CRLF to LF) so the same text pasted
    /// from different sources hashes identically.
    pub fn of(content: &ContentDescriptor, key: &ClusterKey) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(normalize(&content.topic).as_bytes());
        hasher.update(SEPARATOR);
        hasher.update(normalize(&content.text).as_bytes());
        hasher.update(SEPARATOR);
        hasher.update(key.encode().as_bytes());
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes.
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        self.0
            .iter()
            .take(4)
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

fn normalize(text: &str) -> String {
    text.replace("\r\n", "\n")
}

#[cfg(test)]
mod tests {
    use throng_types::{AgentId, AgentRecord, FeatureVector};

    use super::*;

    fn key(age: u8) -> ClusterKey {
        ClusterKey::of(&AgentRecord::new(
            AgentId::new(1),
            FeatureVector {
                age,
                education: 1,
                urban: false,
                economic_axis: 0.1,
                social_axis: 0.1,
            },
        ))
    }

    #[test]
    fn line_endings_do_not_change_the_hash() {
        let unix = ContentDescriptor::new("tax", "line one\nline two");
        let dos = ContentDescriptor::new("tax", "line one\r\nline two");
        assert_eq!(ContentHash::of(&unix, &key(30)), ContentHash::of(&dos, &key(30)));
    }

    #[test]
    fn cluster_is_part_of_the_hash() {
        let content = ContentDescriptor::new("tax", "rates go up");
        assert_ne!(ContentHash::of(&content, &key(20)), ContentHash::of(&content, &key(70)));
    }

    #[test]
    fn topic_and_text_boundary_is_unambiguous() {
        let a = ContentDescriptor::new("ab", "c");
        let b = ContentDescriptor::new("a", "bc");
        assert_ne!(ContentHash::of(&a, &key(30)), ContentHash::of(&b, &key(30)));
    }

    #[test]
    fn display_is_lowercase_hex() {
        let hash = ContentHash::of(&ContentDescriptor::new("t", "x"), &key(30));
        let text = hash.to_string();
        assert_eq!(text.len(), 64);
        assert!(text.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
        assert!(text.starts_with(&hash.short()));
    }
}
