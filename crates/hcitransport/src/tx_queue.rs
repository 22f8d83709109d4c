//! Outbound frame queue
//!
//! [`TxQueue`] is the producer side, cheap to clone and safe to use from any
//! task or interrupt. [`TxDrain`] is the single consumer owned by the task that
//! writes to the wire. It remembers how far into the current frame it got, so
//! frames leave in chunks and two frames are never interleaved.

use crate::error::{Result, TransportError};
use crate::h4::HciBuffer;
use crate::hci::packet::{self, PacketType};
use crate::pool::{BoundedFifo, SlotPool};
use critical_section::Mutex;
use log::error;
use std::cell::RefCell;
use std::sync::Arc;

/// A queued outbound frame
struct TxEntry {
    pkt_type: PacketType,
    buf: HciBuffer,
    len: usize,
}

struct TxList {
    entries: SlotPool<TxEntry>,
    order: BoundedFifo<usize>,
}

struct TxShared {
    list: Mutex<RefCell<TxList>>,
    capacity: usize,
}

/// One chunk copied out by [`TxDrain::dequeue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxChunk {
    /// Bytes written to the output slice
    pub len: usize,
    /// This chunk finished its frame
    pub last: bool,
}

/// Create a queue with room for `capacity` frames
pub fn tx_queue(capacity: usize) -> (TxQueue, TxDrain) {
    let shared = Arc::new(TxShared {
        list: Mutex::new(RefCell::new(TxList {
            entries: SlotPool::new(capacity),
            order: BoundedFifo::new(capacity),
        })),
        capacity,
    });

    let queue = TxQueue {
        shared: Arc::clone(&shared),
    };
    let drain = TxDrain {
        shared,
        cursor: None,
    };
    (queue, drain)
}

/// Producer handle of the outbound queue
#[derive(Clone)]
pub struct TxQueue {
    shared: Arc<TxShared>,
}

impl TxQueue {
    /// Queue the first `len` bytes of `buf` for transmission
    ///
    /// Command Complete and Command Status events go to the head of the queue,
    /// everything else to the tail. The queue owns `buf` from here on and frees
    /// it once the last byte has been dequeued.
    ///
    /// # Errors
    ///
    /// `PoolExhausted` if every entry is in use. The pool is sized to hold every
    /// configured buffer, so this points at a configuration error.
    pub fn enqueue(&self, pkt_type: PacketType, buf: HciBuffer, len: usize) -> Result<()> {
        if len == 0 || len > buf.len() {
            return Err(TransportError::InvalidFrame(format!(
                "{} frame of {} bytes queued with length {}",
                pkt_type,
                buf.len(),
                len
            )));
        }

        let priority =
            pkt_type == PacketType::Event && buf.byte(0).map_or(false, packet::is_priority_event);
        let entry = TxEntry { pkt_type, buf, len };

        let rejected = critical_section::with(|cs| {
            let mut list = self.shared.list.borrow_ref_mut(cs);
            let slot = match list.entries.insert(entry) {
                Ok(slot) => slot,
                Err(entry) => return Some(entry),
            };

            // The order ring has the same capacity as the entry pool
            let queued = if priority {
                list.order.push_front(slot)
            } else {
                list.order.push_back(slot)
            };
            queued.err().and_then(|slot| list.entries.remove(slot))
        });

        match rejected {
            // Dropped here, outside the critical section
            Some(entry) => {
                error!(
                    "TX queue full ({} entries), {} frame of {} bytes not sent",
                    self.shared.capacity, entry.pkt_type, entry.len
                );
                Err(TransportError::PoolExhausted("tx queue"))
            }
            None => Ok(()),
        }
    }

    /// Number of frames waiting (not counting one being sent)
    pub fn len(&self) -> usize {
        critical_section::with(|cs| self.shared.list.borrow_ref(cs).order.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of free entries
    pub fn available(&self) -> usize {
        critical_section::with(|cs| self.shared.list.borrow_ref(cs).entries.available())
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Drop every waiting frame, freeing its buffer
    pub fn flush(&self) -> usize {
        let flushed = critical_section::with(|cs| {
            let mut list = self.shared.list.borrow_ref_mut(cs);
            let slots: Vec<usize> = list.order.drain().collect();
            slots
                .into_iter()
                .filter_map(|slot| list.entries.remove(slot))
                .collect::<Vec<_>>()
        });
        flushed.len()
    }
}

/// Frame being sent and how many of its bytes already went out
struct TxCursor {
    entry: TxEntry,
    offset: usize,
}

/// Consumer side of the outbound queue
pub struct TxDrain {
    shared: Arc<TxShared>,
    cursor: Option<TxCursor>,
}

impl TxDrain {
    /// Copy the next chunk of outbound bytes into `out`
    ///
    /// A new frame starts with a one-byte chunk holding its H4 packet
    /// indicator. After that the frame's own bytes follow in chunks of at most
    /// `out.len()` bytes. The frame's buffer is freed as soon as its last chunk
    /// has been copied.
    ///
    /// # Returns
    ///
    /// `None` when nothing is waiting (or `out` is empty)
    pub fn dequeue(&mut self, out: &mut [u8]) -> Option<TxChunk> {
        if out.is_empty() {
            return None;
        }

        if let Some(cursor) = self.cursor.as_mut() {
            let end = cursor.entry.len;
            let want = (end - cursor.offset).min(out.len());
            let n = cursor.entry.buf.copy_to(cursor.offset, &mut out[..want]);
            cursor.offset += n;

            let last = n == 0 || cursor.offset >= end;
            if last {
                self.cursor = None;
            }
            return Some(TxChunk { len: n, last });
        }

        let entry = critical_section::with(|cs| {
            let mut list = self.shared.list.borrow_ref_mut(cs);
            let slot = list.order.pop_front()?;
            list.entries.remove(slot)
        })?;

        out[0] = entry.pkt_type.tag();
        self.cursor = Some(TxCursor { entry, offset: 0 });
        Some(TxChunk { len: 1, last: false })
    }

    /// Whether a frame is part way out
    pub fn in_progress(&self) -> bool {
        self.cursor.is_some()
    }

    /// Whether nothing is in progress or waiting
    pub fn is_idle(&self) -> bool {
        self.cursor.is_none()
            && critical_section::with(|cs| self.shared.list.borrow_ref(cs).order.is_empty())
    }

    /// Abandon the frame in progress and every waiting frame
    pub fn flush(&mut self) -> usize {
        let partial = usize::from(self.cursor.take().is_some());
        let queue = TxQueue {
            shared: Arc::clone(&self.shared),
        };
        partial + queue.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BufferConfig;
    use crate::h4::{acquire, HciAllocator, PoolAllocator};
    use crate::hci::constants::*;

    fn frame(bytes: &[u8]) -> HciBuffer {
        let pkt_type = match bytes[0] {
            EVT_CMD_COMPLETE | EVT_CMD_STATUS | EVT_NUM_COMPLETED_PACKETS => PacketType::Event,
            _ => PacketType::Acl,
        };
        HciBuffer::from_bytes(pkt_type, bytes)
    }

    /// Dequeue whole frames as (indicator, bytes)
    fn drain_frames(drain: &mut TxDrain, max_len: usize) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        let mut out = vec![0u8; max_len];
        while let Some(chunk) = drain.dequeue(&mut out) {
            assert_eq!(chunk.len, 1);
            assert!(!chunk.last);
            let tag = out[0];

            let mut bytes = Vec::new();
            loop {
                let chunk = drain.dequeue(&mut out).unwrap();
                assert!(chunk.len <= max_len);
                bytes.extend_from_slice(&out[..chunk.len]);
                if chunk.last {
                    break;
                }
            }
            frames.push((tag, bytes));
        }
        frames
    }

    #[test]
    fn test_fifo_order() {
        let (queue, mut drain) = tx_queue(4);
        for i in 0..3u8 {
            let buf = frame(&[0x40, 0x00, 0x01, 0x00, i]);
            queue.enqueue(PacketType::Acl, buf, 5).unwrap();
        }
        assert_eq!(queue.len(), 3);

        let frames = drain_frames(&mut drain, 64);
        assert_eq!(frames.len(), 3);
        for (i, (tag, bytes)) in frames.iter().enumerate() {
            assert_eq!(*tag, HCI_ACL_PKT);
            assert_eq!(bytes[4], i as u8);
        }
        assert!(drain.is_idle());
    }

    #[test]
    fn test_command_complete_jumps_the_queue() {
        let (queue, mut drain) = tx_queue(8);
        for i in 0..4u8 {
            queue
                .enqueue(PacketType::Acl, frame(&[0x40, 0x00, 0x01, 0x00, i]), 5)
                .unwrap();
        }
        let event = [EVT_CMD_COMPLETE, 4, 1, 0x03, 0x0C, 0x00];
        queue.enqueue(PacketType::Event, frame(&event), 6).unwrap();

        let frames = drain_frames(&mut drain, 64);
        assert_eq!(frames[0], (HCI_EVENT_PKT, event.to_vec()));
        let order: Vec<u8> = frames[1..].iter().map(|(_, bytes)| bytes[4]).collect();
        assert_eq!(order, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_other_events_keep_their_place() {
        let (queue, mut drain) = tx_queue(4);
        queue
            .enqueue(PacketType::Acl, frame(&[0x40, 0x00, 0x01, 0x00, 9]), 5)
            .unwrap();
        let event = [EVT_NUM_COMPLETED_PACKETS, 5, 1, 0x40, 0x00, 0x01, 0x00];
        queue.enqueue(PacketType::Event, frame(&event), 7).unwrap();

        let frames = drain_frames(&mut drain, 64);
        assert_eq!(frames[0].0, HCI_ACL_PKT);
        assert_eq!(frames[1], (HCI_EVENT_PKT, event.to_vec()));
    }

    #[test]
    fn test_chunks_are_clamped_and_never_interleave() {
        let (queue, mut drain) = tx_queue(4);
        let payload: Vec<u8> = (0..10).collect();
        queue
            .enqueue(PacketType::Acl, frame(&payload), payload.len())
            .unwrap();

        let mut out = [0u8; 4];
        assert_eq!(drain.dequeue(&mut out), Some(TxChunk { len: 1, last: false }));
        assert_eq!(drain.dequeue(&mut out), Some(TxChunk { len: 4, last: false }));
        assert_eq!(out, [0, 1, 2, 3]);

        // A priority event arriving mid-frame waits for the frame to finish
        let event = [EVT_CMD_STATUS, 4, 0, 1, 0x03, 0x0C];
        queue.enqueue(PacketType::Event, frame(&event), 6).unwrap();

        assert_eq!(drain.dequeue(&mut out), Some(TxChunk { len: 4, last: false }));
        assert_eq!(out, [4, 5, 6, 7]);
        assert_eq!(drain.dequeue(&mut out), Some(TxChunk { len: 2, last: true }));
        assert_eq!(&out[..2], &[8, 9]);
        assert!(!drain.in_progress());

        assert_eq!(drain.dequeue(&mut out), Some(TxChunk { len: 1, last: false }));
        assert_eq!(out[0], HCI_EVENT_PKT);
        assert_eq!(drain.dequeue(&mut [0u8; 0]), None);
    }

    #[test]
    fn test_declared_length_limits_the_frame() {
        let (queue, mut drain) = tx_queue(2);
        queue
            .enqueue(PacketType::Acl, frame(&[0x40, 0x00, 0x01, 0x00, 7, 0xEE, 0xEE]), 5)
            .unwrap();

        let frames = drain_frames(&mut drain, 64);
        assert_eq!(frames, vec![(HCI_ACL_PKT, vec![0x40, 0x00, 0x01, 0x00, 7])]);

        let err = queue.enqueue(PacketType::Acl, frame(&[0x40, 0x00]), 5);
        assert!(matches!(err, Err(TransportError::InvalidFrame(_))));
    }

    #[test]
    fn test_buffer_released_after_last_chunk() {
        let allocator = PoolAllocator::new(&BufferConfig::default());
        let dyn_alloc: Arc<dyn HciAllocator> = allocator.clone();
        let before = allocator.available(PacketType::Command);

        let mut buf = acquire(&dyn_alloc, PacketType::Command, false).unwrap();
        buf.append(&[0x03, 0x0C, 0x00]);

        let (queue, mut drain) = tx_queue(2);
        queue.enqueue(PacketType::Command, buf, 3).unwrap();
        assert_eq!(allocator.available(PacketType::Command), before - 1);

        let mut out = [0u8; 2];
        drain.dequeue(&mut out).unwrap();
        drain.dequeue(&mut out).unwrap();
        assert_eq!(allocator.available(PacketType::Command), before - 1);
        assert_eq!(drain.dequeue(&mut out), Some(TxChunk { len: 1, last: true }));
        assert_eq!(allocator.available(PacketType::Command), before);
    }

    #[test]
    fn test_pool_exhaustion_is_reported() {
        let (queue, _drain) = tx_queue(2);
        for _ in 0..2 {
            queue
                .enqueue(PacketType::Acl, frame(&[0x40, 0x00, 0x00, 0x00]), 4)
                .unwrap();
        }
        assert_eq!(queue.available(), 0);

        let err = queue.enqueue(PacketType::Acl, frame(&[0x40, 0x00, 0x00, 0x00]), 4);
        assert!(matches!(err, Err(TransportError::PoolExhausted(_))));
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_flush_frees_everything() {
        let allocator = PoolAllocator::new(&BufferConfig::default());
        let dyn_alloc: Arc<dyn HciAllocator> = allocator.clone();
        let before = allocator.available(PacketType::Acl);

        let (queue, mut drain) = tx_queue(4);
        for _ in 0..3 {
            let mut buf = acquire(&dyn_alloc, PacketType::Acl, false).unwrap();
            buf.append(&[0x40, 0x00, 0x02, 0x00, 1, 2]);
            queue.enqueue(PacketType::Acl, buf, 6).unwrap();
        }

        // Start one frame so there is a cursor to abandon
        let mut out = [0u8; 3];
        drain.dequeue(&mut out).unwrap();
        drain.dequeue(&mut out).unwrap();

        assert_eq!(drain.flush(), 3);
        assert!(drain.is_idle());
        assert_eq!(queue.available(), 4);
        assert_eq!(allocator.available(PacketType::Acl), before);
    }
}
