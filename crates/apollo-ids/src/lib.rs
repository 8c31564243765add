//! Identifier types for the Apollo Snow consensus core.
//!
//! - [`Id`]: a 32-byte identifier naming a choice (a block or a proposal).
//!   The protocol only compares and hashes ids; it never interprets them.
//! - [`NodeId`]: a 20-byte identifier naming a peer in the membership.
//!
//! Both types render as CB58 (Base58 with a 4-byte checksum).

mod cb58;
mod id;
mod node_id;

pub use cb58::Cb58Error;
pub use id::{Id, IdError};
pub use node_id::{NodeId, NodeIdError, NODE_ID_PREFIX};

/// Length of an [`Id`] in bytes.
pub const ID_LEN: usize = 32;

/// Length of a [`NodeId`] in bytes.
pub const NODE_ID_LEN: usize = 20;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_text_form() {
        let id = Id::from_bytes([42u8; ID_LEN]);
        let decoded = id.to_string().parse::<Id>().unwrap();
        assert_eq!(id, decoded);
    }

    #[test]
    fn test_node_id_text_form() {
        let id = NodeId::from_bytes([42u8; NODE_ID_LEN]);
        let text = id.to_string();
        assert!(text.starts_with(NODE_ID_PREFIX));
        assert_eq!(text.parse::<NodeId>().unwrap(), id);
    }
}
