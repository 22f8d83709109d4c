//! DMA descriptors and descriptor chains
//!
//! A descriptor owns one fixed-size buffer. The driver hands descriptors to
//! the DMA engine and gets them back on completion, so ownership of the memory
//! moves with the descriptor across the interrupt/task boundary.

use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Descriptor control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DescFlags: u8 {
        /// More chunks of the same HCI frame follow
        const SUB_FRAME = 0x01;
        /// Last descriptor of the transaction
        const EOF = 0x02;
        /// Descriptor belongs to the DMA engine
        const OWNER_DMA = 0x04;
    }
}

/// One DMA transfer descriptor with its buffer
pub struct DmaDescriptor {
    buf: Box<[u8]>,
    length: usize,
    flags: DescFlags,
}

impl DmaDescriptor {
    /// A descriptor with a zeroed buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            buf: vec![0u8; size].into_boxed_slice(),
            length: 0,
            flags: DescFlags::empty(),
        }
    }

    /// Buffer size in bytes
    pub fn size(&self) -> usize {
        self.buf.len()
    }

    /// Number of valid bytes
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Mark the first `length` bytes as valid, clamped to the buffer
    pub fn set_len(&mut self, length: usize) {
        self.length = length.min(self.buf.len());
    }

    /// The valid bytes
    pub fn data(&self) -> &[u8] {
        &self.buf[..self.length]
    }

    /// The whole buffer, for the engine or the driver to fill
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }

    /// Copy `bytes` into the buffer and mark them valid
    pub fn fill(&mut self, bytes: &[u8]) -> usize {
        let n = bytes.len().min(self.buf.len());
        self.buf[..n].copy_from_slice(&bytes[..n]);
        self.set_len(n);
        n
    }

    pub fn flags(&self) -> DescFlags {
        self.flags
    }

    pub fn insert_flags(&mut self, flags: DescFlags) {
        self.flags.insert(flags);
    }

    pub fn is_eof(&self) -> bool {
        self.flags.contains(DescFlags::EOF)
    }

    /// Clear length and flags before the descriptor is reused
    pub fn reset(&mut self) {
        self.length = 0;
        self.flags = DescFlags::empty();
    }
}

impl fmt::Debug for DmaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaDescriptor")
            .field("size", &self.size())
            .field("length", &self.length)
            .field("flags", &self.flags)
            .finish()
    }
}

/// Descriptors submitted to the engine as one transaction, in transfer order
#[derive(Debug, Default)]
pub struct DescriptorChain {
    descs: Vec<DmaDescriptor>,
}

impl DescriptorChain {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            descs: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, desc: DmaDescriptor) {
        self.descs.push(desc);
    }

    /// Number of descriptors
    pub fn len(&self) -> usize {
        self.descs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DmaDescriptor> {
        self.descs.iter()
    }

    /// Total number of valid bytes across the chain
    pub fn total_len(&self) -> usize {
        self.descs.iter().map(DmaDescriptor::len).sum()
    }

    /// Concatenated valid bytes
    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.total_len());
        for desc in &self.descs {
            bytes.extend_from_slice(desc.data());
        }
        bytes
    }

    /// Hand every descriptor to the engine and mark the last one end-of-frame
    pub fn seal(&mut self) {
        for desc in &mut self.descs {
            desc.insert_flags(DescFlags::OWNER_DMA);
        }
        if let Some(last) = self.descs.last_mut() {
            last.insert_flags(DescFlags::EOF);
        }
    }
}

impl IntoIterator for DescriptorChain {
    type Item = DmaDescriptor;
    type IntoIter = std::vec::IntoIter<DmaDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.descs.into_iter()
    }
}
