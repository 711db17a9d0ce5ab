// src/raknet/reliability/send_queue.rs
use crate::raknet::datagram::{Datagram, EncapsulatedPacket};
use bytes::Bytes;

/// Per-fragment overhead reserved below the MTU for datagram and
/// encapsulation headers.
pub const SPLIT_HEADROOM: usize = 60;

/// Outbound stamping state for one peer: every payload the proxy
/// re-originates toward that peer gets fresh, strictly monotonic message
/// indices and datagram sequence numbers from here.
#[derive(Debug, Default)]
pub struct OutboundChannel {
    next_message_index: u32,
    next_sequence_number: u32,
    next_split_id: u16,
}

impl OutboundChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-frames `payload` into datagrams that fit `mtu_size`, copying
    /// reliability and ordering metadata from `template` and stamping fresh
    /// indices.
    ///
    /// The fragment layout is `floor(len / max_payload)` full fragments plus
    /// one remainder fragment. When the payload divides evenly the remainder
    /// fragment is empty and still emitted; peers tolerate the empty tail and
    /// the split count stays consistent with the id allocation.
    pub fn package(
        &mut self,
        template: &EncapsulatedPacket,
        payload: Bytes,
        mtu_size: u16,
    ) -> Vec<Datagram> {
        let max_payload = (mtu_size as usize).saturating_sub(SPLIT_HEADROOM).max(1);
        let quotient = payload.len() / max_payload;
        let remainder = payload.len() % max_payload;

        let mut buffers = Vec::with_capacity(quotient + 1);
        for i in 0..quotient {
            buffers.push(payload.slice(i * max_payload..(i + 1) * max_payload));
        }
        buffers.push(payload.slice(quotient * max_payload..quotient * max_payload + remainder));

        let split_id = if buffers.len() > 1 {
            let id = self.next_split_id;
            self.next_split_id = self.next_split_id.wrapping_add(1);
            Some(id)
        } else {
            None
        };
        let split_count = buffers.len() as u32;

        let mut datagrams = Vec::with_capacity(buffers.len());
        for (i, buffer) in buffers.into_iter().enumerate() {
            let message_index = if template.reliability.is_reliable() {
                let index = self.next_message_index;
                self.next_message_index = self.next_message_index.wrapping_add(1);
                Some(index)
            } else {
                None
            };

            let packet = EncapsulatedPacket {
                reliability: template.reliability,
                is_split: split_id.is_some(),
                message_index,
                sequence_index: template.sequence_index,
                order_index: template.order_index,
                order_channel: template.order_channel,
                split_count: split_id.map(|_| split_count),
                split_id,
                split_index: split_id.map(|_| i as u32),
                buffer,
            };

            let mut datagram = Datagram::new(self.next_sequence_number);
            self.next_sequence_number = self.next_sequence_number.wrapping_add(1);
            datagram.packets.push(packet);
            datagrams.push(datagram);
        }

        datagrams
    }
}
