//! The locally committed chain tip.

use crate::{Header, H256};

/// Handle to the locally committed chain.
///
/// Consensus only needs the current tip: the nonce and previous-hash
/// invariants of incoming proposals are validated against it, and the
/// block processor advances it when a round commits. An absent tip means
/// the node is at genesis.
#[derive(Debug, Clone, Default)]
pub struct Blockchain {
    current_header: Option<Header>,
}

impl Blockchain {
    /// Creates an empty chain positioned at genesis.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a chain with an already-committed tip.
    pub fn with_tip(header: Header) -> Self {
        Self {
            current_header: Some(header),
        }
    }

    /// The current tip header, if any block has been committed.
    pub fn current_header(&self) -> Option<&Header> {
        self.current_header.as_ref()
    }

    /// The hash of the current tip header, if present.
    pub fn current_header_hash(&self) -> Option<H256> {
        self.current_header.as_ref().map(Header::hash)
    }

    /// The nonce of the current tip, or 0 at genesis.
    pub fn tip_nonce(&self) -> u64 {
        self.current_header.as_ref().map_or(0, |h| h.nonce)
    }

    /// Replaces the tip with a newly committed header.
    pub fn set_current_header(&mut self, header: Header) {
        self.current_header = Some(header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_chain_has_no_tip() {
        let chain = Blockchain::new();
        assert!(chain.current_header().is_none());
        assert!(chain.current_header_hash().is_none());
        assert_eq!(chain.tip_nonce(), 0);
    }

    #[test]
    fn test_tip_advances() {
        let mut chain = Blockchain::new();
        let header = Header::new(1, 5, 100, H256::NIL);
        let hash = header.hash();

        chain.set_current_header(header);
        assert_eq!(chain.tip_nonce(), 1);
        assert_eq!(chain.current_header_hash(), Some(hash));
    }
}
