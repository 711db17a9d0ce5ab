// src/raknet/mod.rs
//! # RakNet wire format
//!
//! Packet structures for the slice of RakNet the proxy terminates: datagrams
//! with their encapsulated packets, ACK/NACK frames, and the two offline
//! connection openers it observes for MTU and the Offline -> Online edge.

pub mod ack;
pub mod datagram;
pub mod offline;
pub mod reliability;

// --- Re-exports ---
pub use ack::AckNack;
pub use datagram::{Datagram, EncapsulatedPacket, Reliability};

// --- Packet IDs ---
pub const OPEN_CONNECTION_REQUEST_2: u8 = 0x07;
pub const OPEN_CONNECTION_REPLY_2: u8 = 0x08;
pub const DISCONNECT_NOTIFICATION: u8 = 0x15;

/// Magic byte sequence carried by every offline RakNet message.
pub const OFFLINE_MESSAGE_DATA_ID: [u8; 16] = [
    0x00, 0xff, 0xff, 0x00, 0xfe, 0xfe, 0xfe, 0xfe, 0xfd, 0xfd, 0xfd, 0xfd, 0x12, 0x34, 0x56, 0x78,
];
