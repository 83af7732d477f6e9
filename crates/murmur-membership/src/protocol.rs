//! Wire protocol for membership messages
//!
//! Every frame starts with a 3-byte header followed by a tag-specific body.
//! All integers are big-endian.
//!
//! ```text
//! ┌───────┬─────────┬─────┬──────────────────────────────────────────┐
//! │ magic │ version │ tag │ body                                     │
//! │  u8   │   u8    │ u8  │                                          │
//! ├───────┴─────────┴─────┼──────────────────────────────────────────┤
//! │ JOIN-REQUEST (1)      │ sender: addr(6) heartbeat: i64           │
//! │ JOIN-REPLY   (2)      │ count: u32, count × (addr(6) i64)        │
//! │ HEARTBEAT    (3)      │ sender: addr(6) heartbeat: i64           │
//! │ GOSSIP       (4)      │ count: u32, count × (addr(6) i64)        │
//! └───────────────────────┴──────────────────────────────────────────┘
//! ```

use crate::address::NodeAddress;
use crate::error::DecodeError;
use crate::table::MemberEntry;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// First byte of every frame ('M')
pub const MAGIC: u8 = 0x4D;

/// Protocol version written by this implementation
pub const PROTOCOL_VERSION: u8 = 1;

/// magic + version + tag
pub const HEADER_LEN: usize = 3;

/// One (address, heartbeat) pair
pub const ENTRY_LEN: usize = NodeAddress::ENCODED_LEN + 8;

/// Largest frame accepted, one UDP datagram
pub const MAX_MESSAGE_SIZE: usize = 65_507;

/// Largest entry list that fits in a single frame
pub const MAX_ENTRIES_PER_MESSAGE: usize = (MAX_MESSAGE_SIZE - HEADER_LEN - 4) / ENTRY_LEN;

/// Message type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    JoinRequest = 1,
    JoinReply = 2,
    Heartbeat = 3,
    Gossip = 4,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::JoinRequest => "join_request",
            MessageType::JoinReply => "join_reply",
            MessageType::Heartbeat => "heartbeat",
            MessageType::Gossip => "gossip",
        }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = DecodeError;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            1 => Ok(MessageType::JoinRequest),
            2 => Ok(MessageType::JoinReply),
            3 => Ok(MessageType::Heartbeat),
            4 => Ok(MessageType::Gossip),
            other => Err(DecodeError::UnknownMessageType(other)),
        }
    }
}

/// Identity/heartbeat pair carried in list messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GossipEntry {
    pub address: NodeAddress,
    pub heartbeat: i64,
}

impl GossipEntry {
    pub fn new(address: NodeAddress, heartbeat: i64) -> Self {
        Self { address, heartbeat }
    }
}

impl From<&MemberEntry> for GossipEntry {
    fn from(entry: &MemberEntry) -> Self {
        Self {
            address: entry.address,
            heartbeat: entry.heartbeat,
        }
    }
}

/// Membership protocol messages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Joining node → introducer
    JoinRequest { sender: NodeAddress, heartbeat: i64 },
    /// Introducer → joining node, full table snapshot
    JoinReply { entries: Vec<GossipEntry> },
    /// Point-to-point liveness ping
    Heartbeat { sender: NodeAddress, heartbeat: i64 },
    /// Periodic full-table exchange
    Gossip { entries: Vec<GossipEntry> },
}

impl Message {
    /// Build a JOIN-REPLY from a table snapshot
    pub fn join_reply(snapshot: &[MemberEntry]) -> Self {
        Message::JoinReply {
            entries: entries_from(snapshot),
        }
    }

    /// Build a GOSSIP from a table snapshot
    pub fn gossip(snapshot: &[MemberEntry]) -> Self {
        Message::Gossip {
            entries: entries_from(snapshot),
        }
    }

    pub fn message_type(&self) -> MessageType {
        match self {
            Message::JoinRequest { .. } => MessageType::JoinRequest,
            Message::JoinReply { .. } => MessageType::JoinReply,
            Message::Heartbeat { .. } => MessageType::Heartbeat,
            Message::Gossip { .. } => MessageType::Gossip,
        }
    }

    /// Exact encoded size in bytes
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::JoinRequest { .. } | Message::Heartbeat { .. } => HEADER_LEN + ENTRY_LEN,
            Message::JoinReply { entries } | Message::Gossip { entries } => {
                HEADER_LEN + 4 + entries.len() * ENTRY_LEN
            }
        }
    }

    /// Serialize to an owned frame
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        buf.put_u8(MAGIC);
        buf.put_u8(PROTOCOL_VERSION);
        buf.put_u8(self.message_type() as u8);

        match self {
            Message::JoinRequest { sender, heartbeat } | Message::Heartbeat { sender, heartbeat } => {
                sender.encode(&mut buf);
                buf.put_i64(*heartbeat);
            }
            Message::JoinReply { entries } | Message::Gossip { entries } => {
                buf.put_u32(entries.len() as u32);
                for entry in entries {
                    entry.address.encode(&mut buf);
                    buf.put_i64(entry.heartbeat);
                }
            }
        }

        buf.freeze()
    }

    /// Parse a frame. Never reads past the declared entry list.
    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(DecodeError::MessageTooLarge {
                size: data.len(),
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut buf = data;
        ensure(buf.remaining(), HEADER_LEN)?;
        let magic = buf.get_u8();
        if magic != MAGIC {
            return Err(DecodeError::BadMagic(magic));
        }
        let version = buf.get_u8();
        if version != PROTOCOL_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let message_type = MessageType::try_from(buf.get_u8())?;

        let message = match message_type {
            MessageType::JoinRequest => {
                let (sender, heartbeat) = decode_pair(&mut buf)?;
                Message::JoinRequest { sender, heartbeat }
            }
            MessageType::Heartbeat => {
                let (sender, heartbeat) = decode_pair(&mut buf)?;
                Message::Heartbeat { sender, heartbeat }
            }
            MessageType::JoinReply => Message::JoinReply {
                entries: decode_entries(&mut buf)?,
            },
            MessageType::Gossip => Message::Gossip {
                entries: decode_entries(&mut buf)?,
            },
        };

        if buf.has_remaining() {
            return Err(DecodeError::TrailingBytes(buf.remaining()));
        }
        Ok(message)
    }
}

fn entries_from(snapshot: &[MemberEntry]) -> Vec<GossipEntry> {
    snapshot
        .iter()
        .take(MAX_ENTRIES_PER_MESSAGE)
        .map(GossipEntry::from)
        .collect()
}

fn ensure(remaining: usize, needed: usize) -> Result<(), DecodeError> {
    if remaining < needed {
        return Err(DecodeError::Truncated { needed, remaining });
    }
    Ok(())
}

fn decode_pair(buf: &mut &[u8]) -> Result<(NodeAddress, i64), DecodeError> {
    ensure(buf.remaining(), ENTRY_LEN)?;
    let address = NodeAddress::decode(buf)?;
    let heartbeat = buf.get_i64();
    Ok((address, heartbeat))
}

fn decode_entries(buf: &mut &[u8]) -> Result<Vec<GossipEntry>, DecodeError> {
    ensure(buf.remaining(), 4)?;
    let count = buf.get_u32();

    // Validate the declared count against what is actually there before
    // allocating anything
    let fits = (count as usize)
        .checked_mul(ENTRY_LEN)
        .is_some_and(|len| len <= buf.remaining());
    if !fits {
        return Err(DecodeError::EntryCountOverflow {
            count,
            remaining: buf.remaining(),
        });
    }

    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let (address, heartbeat) = decode_pair(buf)?;
        entries.push(GossipEntry { address, heartbeat });
    }
    Ok(entries)
}
