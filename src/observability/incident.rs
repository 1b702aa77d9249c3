//! Correlation ids for handler failures.
//!
//! The XID is shown to the user; the two hashes let operators group log
//! events for the same failure without printing the message twice.

use sha2::{Digest, Sha256};

/// Length of the hex digests logged next to the XID.
const HASH_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub xid: String,
    pub error_hash: String,
    pub trace_hash: String,
}

impl Incident {
    pub fn new(message: &str, trace: &str) -> Self {
        let mut xid = uuid::Uuid::new_v4().simple().to_string();
        xid.truncate(12);
        Self { xid, error_hash: digest(message), trace_hash: digest(trace) }
    }
}

fn digest(text: &str) -> String {
    let mut hex = format!("{:x}", Sha256::digest(text.as_bytes()));
    hex.truncate(HASH_LEN);
    hex
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_stable_and_xids_unique() {
        let a = Incident::new("boom", "at handler");
        let b = Incident::new("boom", "at handler");
        assert_eq!(a.error_hash, b.error_hash);
        assert_eq!(a.trace_hash, b.trace_hash);
        assert_ne!(a.xid, b.xid);
        assert_eq!(a.xid.len(), 12);
        assert_eq!(a.error_hash.len(), HASH_LEN);
        assert_ne!(a.error_hash, Incident::new("other", "at handler").error_hash);
    }
}
