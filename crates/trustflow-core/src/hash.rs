//! Stable hashing for plans, so parties can compare them out of band.

use blake3::Hasher;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Hash256(pub [u8; 32]);

impl Hash256 {
    pub fn to_hex(&self) -> String {
        let mut s = String::with_capacity(64);
        for b in &self.0 {
            use std::fmt::Write as _;
            let _ = write!(&mut s, "{:02x}", b);
        }
        s
    }

    /// First eight hex chars, for log lines.
    pub fn short(&self) -> String {
        self.to_hex()[..8].to_string()
    }
}

impl std::fmt::Display for Hash256 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

pub fn hash_bytes(bytes: &[u8]) -> Hash256 {
    let mut h = Hasher::new();
    h.update(bytes);
    Hash256(h.finalize().into())
}

/// Hash any serde-serializable value deterministically (via JSON).
///
/// Callers must only pass values whose serialization is ordered
/// (`BTreeMap`/`BTreeSet`, never `HashMap`).
pub fn hash_serde<T: Serialize>(v: &T) -> Result<Hash256, crate::error::Error> {
    let bytes = serde_json::to_vec(v)?;
    Ok(hash_bytes(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_is_64_chars_and_stable() {
        let a = hash_serde(&vec!["x", "y"]).unwrap();
        let b = hash_serde(&vec!["x", "y"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_hex().len(), 64);
        assert_eq!(a.short().len(), 8);
        assert_ne!(a, hash_bytes(b"other"));
    }
}
