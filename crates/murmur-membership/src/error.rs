//! Membership error types

use crate::address::NodeAddress;
use thiserror::Error;

/// Result type for membership operations
pub type Result<T> = std::result::Result<T, MembershipError>;

/// Errors raised while decoding a wire buffer.
///
/// Every variant is recoverable: the offending buffer is dropped and the
/// tick moves on to the next queued message.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("buffer truncated: need {needed} more bytes, have {remaining}")]
    Truncated { needed: usize, remaining: usize },

    #[error("bad magic byte: 0x{0:02x}")]
    BadMagic(u8),

    #[error("unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),

    #[error("entry count {count} exceeds remaining payload ({remaining} bytes)")]
    EntryCountOverflow { count: u32, remaining: usize },

    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Membership errors
#[derive(Debug, Error)]
pub enum MembershipError {
    // ==================== Initialization Errors ====================
    #[error("invalid node identity: {0}")]
    InvalidIdentity(NodeAddress),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("node not started")]
    NotStarted,

    // ==================== Protocol Errors ====================
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    // ==================== Network Errors ====================
    #[error("transport error sending to {to}: {reason}")]
    Transport { to: NodeAddress, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl MembershipError {
    /// Check if this error halts the node
    pub fn is_fatal(&self) -> bool {
        matches!(self, MembershipError::InvalidIdentity(_))
    }

    /// Check if the node can keep ticking after this error
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            MembershipError::Decode(_) | MembershipError::Transport { .. }
        )
    }
}
