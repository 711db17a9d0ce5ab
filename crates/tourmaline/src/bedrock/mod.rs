// src/bedrock/mod.rs
//! # Bedrock application layer
//!
//! The proxy only understands the slice of the application protocol it has
//! to: the batch container every game packet travels in, and the three
//! packets involved in the encryption handover.

pub mod batch;
pub mod jwt;
pub mod login;

pub use batch::{BatchCodec, BatchPacket, BATCH_ID};
pub use jwt::JsonWebToken;
pub use login::{LoginPacket, ResourcePackResponsePacket, ServerHandshakePacket};
