//! Frame storage and the move-only HCI buffer handle
//!
//! Command and event frames live in flat, fixed-capacity storage. ACL and ISO
//! payloads grow block by block from a shared [`BlockPool`], so an append can
//! stop part way through when the pool runs dry.
//!
//! [`HciBuffer`] ties a storage to the allocator it came from. Dropping the
//! handle gives the storage back; [`HciBuffer::into_storage`] hands it over
//! without releasing it.

use super::alloc::{self, HciAllocator};
use crate::hci::PacketType;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Fixed pool of equally sized data blocks backing scatter buffers
pub struct BlockPool {
    block_size: usize,
    capacity: usize,
    free: Mutex<Vec<Box<[u8]>>>,
}

impl BlockPool {
    /// Create a pool holding `count` blocks of `block_size` bytes each
    pub fn new(block_size: usize, count: usize) -> Arc<Self> {
        let free = (0..count)
            .map(|_| vec![0u8; block_size].into_boxed_slice())
            .collect();

        Arc::new(Self {
            block_size,
            capacity: count,
            free: Mutex::new(free),
        })
    }

    /// Size of every block in bytes
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Total number of blocks owned by the pool
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of blocks currently free
    pub fn available(&self) -> usize {
        self.lock().len()
    }

    fn take(&self) -> Option<Box<[u8]>> {
        self.lock().pop()
    }

    fn give(&self, block: Box<[u8]>) {
        self.lock().push(block);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Box<[u8]>>> {
        // A poisoned pool still holds valid blocks
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl fmt::Debug for BlockPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockPool")
            .field("block_size", &self.block_size)
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .finish()
    }
}

/// Contiguous storage with a fixed capacity
struct FlatBuf {
    data: Box<[u8]>,
    len: usize,
}

/// Block-chained storage drawing from a [`BlockPool`]
struct ScatterBuf {
    pool: Arc<BlockPool>,
    blocks: Vec<Box<[u8]>>,
    len: usize,
}

impl ScatterBuf {
    fn append(&mut self, bytes: &[u8]) -> usize {
        let block_size = self.pool.block_size();
        let mut written = 0;

        while written < bytes.len() {
            let offset = self.len % block_size;
            if offset == 0 && self.len / block_size == self.blocks.len() {
                match self.pool.take() {
                    Some(block) => self.blocks.push(block),
                    None => break,
                }
            }

            let block = &mut self.blocks[self.len / block_size];
            let n = (block_size - offset).min(bytes.len() - written);
            block[offset..offset + n].copy_from_slice(&bytes[written..written + n]);
            written += n;
            self.len += n;
        }

        written
    }

    fn copy_to(&self, offset: usize, out: &mut [u8]) -> usize {
        let block_size = self.pool.block_size();
        let mut pos = offset;
        let mut copied = 0;

        while copied < out.len() && pos < self.len {
            let block = &self.blocks[pos / block_size];
            let in_block = pos % block_size;
            let n = (block_size - in_block)
                .min(out.len() - copied)
                .min(self.len - pos);
            out[copied..copied + n].copy_from_slice(&block[in_block..in_block + n]);
            copied += n;
            pos += n;
        }

        copied
    }

    fn clear(&mut self) {
        for block in self.blocks.drain(..) {
            self.pool.give(block);
        }
        self.len = 0;
    }
}

impl Drop for ScatterBuf {
    fn drop(&mut self) {
        self.clear();
    }
}

enum Repr {
    Flat(FlatBuf),
    Scatter(ScatterBuf),
}

/// Raw frame storage handed out by an [`HciAllocator`]
///
/// The `tag` is free for the allocator to mark which class a storage belongs
/// to; the transport never interprets it.
pub struct FrameStorage {
    repr: Repr,
    tag: u8,
}

impl FrameStorage {
    /// Flat storage able to hold `capacity` bytes
    pub fn flat(capacity: usize) -> Self {
        Self {
            repr: Repr::Flat(FlatBuf {
                data: vec![0u8; capacity].into_boxed_slice(),
                len: 0,
            }),
            tag: 0,
        }
    }

    /// Flat storage holding exactly `bytes`
    pub fn from_slice(bytes: &[u8]) -> Self {
        let mut storage = Self::flat(bytes.len());
        storage.append(bytes);
        storage
    }

    /// Scatter storage growing from `pool`
    pub fn scatter(pool: Arc<BlockPool>) -> Self {
        let blocks = Vec::with_capacity(pool.capacity());
        Self {
            repr: Repr::Scatter(ScatterBuf { pool, blocks, len: 0 }),
            tag: 0,
        }
    }

    /// Set the allocator-private class tag
    pub fn with_tag(mut self, tag: u8) -> Self {
        self.tag = tag;
        self
    }

    /// Allocator-private class tag
    pub fn tag(&self) -> u8 {
        self.tag
    }

    /// Number of bytes stored
    pub fn len(&self) -> usize {
        match &self.repr {
            Repr::Flat(buf) => buf.len,
            Repr::Scatter(buf) => buf.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fixed capacity for flat storage, `None` for scatter storage
    pub fn capacity(&self) -> Option<usize> {
        match &self.repr {
            Repr::Flat(buf) => Some(buf.data.len()),
            Repr::Scatter(_) => None,
        }
    }

    pub fn is_scatter(&self) -> bool {
        matches!(self.repr, Repr::Scatter(_))
    }

    /// Append as many of `bytes` as fit and return how many were stored
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        match &mut self.repr {
            Repr::Flat(buf) => {
                let n = bytes.len().min(buf.data.len() - buf.len);
                buf.data[buf.len..buf.len + n].copy_from_slice(&bytes[..n]);
                buf.len += n;
                n
            }
            Repr::Scatter(buf) => buf.append(bytes),
        }
    }

    /// Copy stored bytes starting at `offset` into `out`, returning the count copied
    pub fn copy_to(&self, offset: usize, out: &mut [u8]) -> usize {
        match &self.repr {
            Repr::Flat(buf) => {
                if offset >= buf.len {
                    return 0;
                }
                let n = out.len().min(buf.len - offset);
                out[..n].copy_from_slice(&buf.data[offset..offset + n]);
                n
            }
            Repr::Scatter(buf) => buf.copy_to(offset, out),
        }
    }

    /// The stored bytes, if they are contiguous
    pub fn as_slice(&self) -> Option<&[u8]> {
        match &self.repr {
            Repr::Flat(buf) => Some(&buf.data[..buf.len]),
            Repr::Scatter(_) => None,
        }
    }

    /// Copy the stored bytes into a new vector
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.len()];
        self.copy_to(0, &mut out);
        out
    }

    /// Forget the contents; scatter blocks go back to their pool
    pub fn clear(&mut self) {
        match &mut self.repr {
            Repr::Flat(buf) => buf.len = 0,
            Repr::Scatter(buf) => buf.clear(),
        }
    }
}

impl fmt::Debug for FrameStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameStorage")
            .field("len", &self.len())
            .field("scatter", &self.is_scatter())
            .field("tag", &self.tag)
            .finish()
    }
}

/// Owned HCI frame buffer
///
/// Exactly one party owns a frame at any time. Whoever holds the handle last
/// releases the storage to its allocator by dropping it.
pub struct HciBuffer {
    pkt_type: PacketType,
    storage: Option<FrameStorage>,
    owner: Option<Arc<dyn HciAllocator>>,
}

impl HciBuffer {
    /// Wrap a storage that must be returned to `owner`
    pub fn new(pkt_type: PacketType, storage: FrameStorage, owner: Arc<dyn HciAllocator>) -> Self {
        Self {
            pkt_type,
            storage: Some(storage),
            owner: Some(owner),
        }
    }

    /// Wrap a storage that belongs to no allocator
    pub fn detached(pkt_type: PacketType, storage: FrameStorage) -> Self {
        Self {
            pkt_type,
            storage: Some(storage),
            owner: None,
        }
    }

    /// Detached buffer holding a copy of `bytes`
    pub fn from_bytes(pkt_type: PacketType, bytes: &[u8]) -> Self {
        Self::detached(pkt_type, FrameStorage::from_slice(bytes))
    }

    pub fn pkt_type(&self) -> PacketType {
        self.pkt_type
    }

    pub fn len(&self) -> usize {
        self.storage().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Byte at `index`, if stored
    pub fn byte(&self, index: usize) -> Option<u8> {
        let mut out = [0u8; 1];
        match self.storage().copy_to(index, &mut out) {
            1 => Some(out[0]),
            _ => None,
        }
    }

    /// See [`FrameStorage::append`]
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        self.storage_mut().append(bytes)
    }

    /// See [`FrameStorage::copy_to`]
    pub fn copy_to(&self, offset: usize, out: &mut [u8]) -> usize {
        self.storage().copy_to(offset, out)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.storage().to_vec()
    }

    pub fn storage(&self) -> &FrameStorage {
        self.storage
            .as_ref()
            .expect("storage is present until the buffer is consumed")
    }

    fn storage_mut(&mut self) -> &mut FrameStorage {
        self.storage
            .as_mut()
            .expect("storage is present until the buffer is consumed")
    }

    /// Take the storage out without returning it to the allocator
    pub fn into_storage(mut self) -> FrameStorage {
        self.owner = None;
        self.storage
            .take()
            .expect("storage is present until the buffer is consumed")
    }
}

impl Drop for HciBuffer {
    fn drop(&mut self) {
        if let (Some(storage), Some(owner)) = (self.storage.take(), self.owner.take()) {
            alloc::release(owner.as_ref(), self.pkt_type, storage);
        }
    }
}

impl fmt::Debug for HciBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HciBuffer")
            .field("pkt_type", &self.pkt_type)
            .field("len", &self.storage.as_ref().map(FrameStorage::len))
            .field("pooled", &self.owner.is_some())
            .finish()
    }
}
