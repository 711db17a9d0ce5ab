// src/raknet/reliability/mod.rs
//! Inbound admission (reliable window, split reassembly) and outbound
//! re-origination (fragmentation, index/sequence stamping).

pub mod receive_window;
pub mod send_queue;
pub mod split_handler;

pub use receive_window::{Admission, ReliableWindow};
pub use send_queue::OutboundChannel;
pub use split_handler::SplitHandler;
