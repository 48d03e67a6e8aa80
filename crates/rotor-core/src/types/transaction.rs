use serde::{Deserialize, Serialize};

use crate::hash::{hash_blake3, Hash};

/// An opaque client transaction carried inside a block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Hash,
    pub payload: String,
    pub timestamp_ms: u64,
}

impl Transaction {
    /// Create a transaction whose id is derived from its payload and timestamp
    pub fn new(payload: impl Into<String>, timestamp_ms: u64) -> Self {
        let payload = payload.into();
        Transaction {
            id: Self::compute_id(&payload, timestamp_ms),
            payload,
            timestamp_ms,
        }
    }

    fn compute_id(payload: &str, timestamp_ms: u64) -> Hash {
        let mut data = Vec::with_capacity(payload.len() + 8);
        data.extend_from_slice(payload.as_bytes());
        data.extend_from_slice(&timestamp_ms.to_be_bytes());
        hash_blake3(&data)
    }

    /// Check that `id` matches the payload and timestamp
    pub fn verify_id(&self) -> bool {
        Self::compute_id(&self.payload, self.timestamp_ms) == self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_depends_on_timestamp() {
        let a = Transaction::new("transfer 10", 1);
        let b = Transaction::new("transfer 10", 2);
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, Transaction::new("transfer 10", 1).id);
    }

    #[test]
    fn test_rewritten_payload_fails_verification() {
        let mut tx = Transaction::new("pay 5", 1);
        assert!(tx.verify_id());

        tx.payload = "pay 5000".to_string();
        assert!(!tx.verify_id());
    }
}
