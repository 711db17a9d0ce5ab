// src/raknet/reliability/split_handler.rs
use crate::error::{ProxyError, Result};
use crate::raknet::datagram::EncapsulatedPacket;
use bytes::{Bytes, BytesMut};
use log::trace;
use tourmaline_binary::BinaryError;

/// Fixed number of concurrent reassemblies per origin. A peer that needs a
/// fifth is either broken or hostile; the session dies.
pub const MAX_SPLITS: usize = 4;

/// Reassembly state for one split set.
#[derive(Debug)]
struct SplitMemory {
    id: u16,
    count: u32,
    /// Received fragments, indexed by split index. `None` until the fragment arrives.
    parts: Vec<Option<Bytes>>,
    received: u32,
}

/// Reassembles split encapsulated packets over a fixed slot table.
#[derive(Debug, Default)]
pub struct SplitHandler {
    slots: [Option<SplitMemory>; MAX_SPLITS],
}

impl SplitHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one split fragment. Returns the reassembled payload once every
    /// fragment of the set has arrived; `None` while parts are still missing
    /// (duplicate fragments are dropped the same way).
    pub fn collect(&mut self, packet: &EncapsulatedPacket) -> Result<Option<Bytes>> {
        let id = packet
            .split_id
            .ok_or_else(|| BinaryError::InvalidData("Split packet without split_id".to_string()))?;
        let count = packet.split_count.ok_or_else(|| {
            BinaryError::InvalidData("Split packet without split_count".to_string())
        })?;
        let index = packet.split_index.ok_or_else(|| {
            BinaryError::InvalidData("Split packet without split_index".to_string())
        })?;

        if count == 0 || index >= count {
            return Err(BinaryError::InvalidData(format!(
                "Invalid split descriptor: index {} of {}",
                index, count
            ))
            .into());
        }

        let slot = self.memory_of(id, count)?;
        let memory = slot.as_mut().expect("memory_of always fills the slot");

        if index >= memory.count {
            return Err(BinaryError::InvalidData(format!(
                "Split index {} outside announced count {}",
                index, memory.count
            ))
            .into());
        }

        let part = &mut memory.parts[index as usize];
        if part.is_some() {
            trace!("Dropping duplicate fragment {} of split set {}", index, id);
            return Ok(None);
        }
        *part = Some(packet.buffer.clone());
        memory.received += 1;

        if memory.received < memory.count {
            return Ok(None);
        }

        // Complete: concatenate in index order and free the slot.
        let memory = slot.take().expect("slot was just populated");
        let total: usize = memory.parts.iter().map(|p| p.as_ref().map_or(0, |b| b.len())).sum();
        let mut payload = BytesMut::with_capacity(total);
        for part in memory.parts {
            payload.extend_from_slice(&part.expect("all fragments received"));
        }
        trace!("Split set {} complete ({} bytes)", id, payload.len());
        Ok(Some(payload.freeze()))
    }

    /// Resolves the slot for a split id: an existing reassembly wins, then the
    /// first free slot; a full table is fatal.
    fn memory_of(&mut self, id: u16, count: u32) -> Result<&mut Option<SplitMemory>> {
        let mut free = None;
        let mut found = None;
        for (i, slot) in self.slots.iter().enumerate() {
            match slot {
                Some(memory) if memory.id == id => {
                    found = Some(i);
                    break;
                }
                None if free.is_none() => free = Some(i),
                _ => {}
            }
        }

        let i = match found {
            Some(i) => i,
            None => {
                let i = free.ok_or(ProxyError::TooManySplits)?;
                self.slots[i] = Some(SplitMemory {
                    id,
                    count,
                    parts: vec![None; count as usize],
                    received: 0,
                });
                i
            }
        };
        Ok(&mut self.slots[i])
    }

    /// Number of reassemblies currently in progress.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raknet::datagram::Reliability;

    fn fragment(id: u16, index: u32, count: u32, body: &'static [u8]) -> EncapsulatedPacket {
        EncapsulatedPacket {
            reliability: Reliability::Reliable,
            is_split: true,
            message_index: Some(index),
            sequence_index: None,
            order_index: None,
            order_channel: None,
            split_count: Some(count),
            split_id: Some(id),
            split_index: Some(index),
            buffer: Bytes::from_static(body),
        }
    }

    #[test]
    fn test_reassembly_in_order() {
        let mut handler = SplitHandler::new();
        assert!(handler.collect(&fragment(1, 0, 3, b"AAA")).unwrap().is_none());
        assert!(handler.collect(&fragment(1, 1, 3, b"BBB")).unwrap().is_none());
        let payload = handler.collect(&fragment(1, 2, 3, b"CC")).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"AAABBBCC");
        assert_eq!(handler.active(), 0);
    }

    #[test]
    fn test_reassembly_out_of_order() {
        let mut handler = SplitHandler::new();
        assert!(handler.collect(&fragment(9, 2, 3, b"33")).unwrap().is_none());
        assert!(handler.collect(&fragment(9, 0, 3, b"11")).unwrap().is_none());
        let payload = handler.collect(&fragment(9, 1, 3, b"22")).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"112233");
    }

    #[test]
    fn test_duplicate_fragment_dropped() {
        let mut handler = SplitHandler::new();
        assert!(handler.collect(&fragment(4, 0, 2, b"xx")).unwrap().is_none());
        // Same fragment again: dropped, no progress.
        assert!(handler.collect(&fragment(4, 0, 2, b"xx")).unwrap().is_none());
        let payload = handler.collect(&fragment(4, 1, 2, b"yy")).unwrap().unwrap();
        assert_eq!(payload.as_ref(), b"xxyy");
    }

    #[test]
    fn test_interleaved_sets() {
        let mut handler = SplitHandler::new();
        assert!(handler.collect(&fragment(1, 0, 2, b"a")).unwrap().is_none());
        assert!(handler.collect(&fragment(2, 0, 2, b"x")).unwrap().is_none());
        assert_eq!(handler.active(), 2);

        let first = handler.collect(&fragment(1, 1, 2, b"b")).unwrap().unwrap();
        assert_eq!(first.as_ref(), b"ab");
        let second = handler.collect(&fragment(2, 1, 2, b"y")).unwrap().unwrap();
        assert_eq!(second.as_ref(), b"xy");
        assert_eq!(handler.active(), 0);
    }

    #[test]
    fn test_fifth_concurrent_split_is_fatal() {
        let mut handler = SplitHandler::new();
        for id in 0..4u16 {
            assert!(handler.collect(&fragment(id, 0, 2, b"p")).unwrap().is_none());
        }
        assert_eq!(handler.active(), 4);
        assert!(matches!(
            handler.collect(&fragment(99, 0, 2, b"p")),
            Err(ProxyError::TooManySplits)
        ));
    }

    #[test]
    fn test_completed_set_frees_its_slot() {
        let mut handler = SplitHandler::new();
        for id in 0..4u16 {
            assert!(handler.collect(&fragment(id, 0, 2, b"p")).unwrap().is_none());
        }
        handler.collect(&fragment(0, 1, 2, b"q")).unwrap().unwrap();
        // Slot freed, a new set fits again.
        assert!(handler.collect(&fragment(50, 0, 2, b"r")).unwrap().is_none());
    }

    #[test]
    fn test_bad_descriptor_rejected() {
        let mut handler = SplitHandler::new();
        let bad = fragment(1, 5, 3, b"zz");
        assert!(matches!(handler.collect(&bad), Err(ProxyError::Binary(_))));

        let zero = fragment(1, 0, 0, b"zz");
        assert!(matches!(handler.collect(&zero), Err(ProxyError::Binary(_))));
    }
}
