//! Buffer allocation contract for the H4 transport
//!
//! The transport never allocates frame memory itself. It asks an
//! [`HciAllocator`] for storage of the right class and gives it back through the
//! matching free function when the frame dies.

use super::buffer::{BlockPool, FrameStorage, HciBuffer};
use crate::config::BufferConfig;
use crate::hci::PacketType;
use std::fmt;
use std::sync::{Arc, Mutex};

/// Pluggable buffer acquire/release strategy
///
/// Any `alloc_*` returning `None` is an allocation failure, except
/// `alloc_evt(true)`: the discardable class may run dry under load and the frame
/// is then dropped.
pub trait HciAllocator: Send + Sync {
    fn alloc_cmd(&self) -> Option<FrameStorage>;
    fn alloc_acl(&self) -> Option<FrameStorage>;
    fn alloc_evt(&self, discardable: bool) -> Option<FrameStorage>;
    fn alloc_iso(&self) -> Option<FrameStorage>;

    fn free_cmd(&self, storage: FrameStorage);
    fn free_acl(&self, storage: FrameStorage);
    fn free_evt(&self, storage: FrameStorage);
    fn free_iso(&self, storage: FrameStorage);
}

/// Allocate a buffer of the class matching `pkt_type`
///
/// `discardable` only matters for events.
pub fn acquire(
    allocator: &Arc<dyn HciAllocator>,
    pkt_type: PacketType,
    discardable: bool,
) -> Option<HciBuffer> {
    let storage = match pkt_type {
        PacketType::Command => allocator.alloc_cmd(),
        PacketType::Acl => allocator.alloc_acl(),
        PacketType::Event => allocator.alloc_evt(discardable),
        PacketType::Iso => allocator.alloc_iso(),
    }?;

    Some(HciBuffer::new(pkt_type, storage, Arc::clone(allocator)))
}

/// Return `storage` through the free function matching `pkt_type`
pub(crate) fn release(allocator: &dyn HciAllocator, pkt_type: PacketType, storage: FrameStorage) {
    match pkt_type {
        PacketType::Command => allocator.free_cmd(storage),
        PacketType::Acl => allocator.free_acl(storage),
        PacketType::Event => allocator.free_evt(storage),
        PacketType::Iso => allocator.free_iso(storage),
    }
}

const CLASS_DEFAULT: u8 = 0;
const CLASS_DISCARDABLE: u8 = 1;

/// One fixed set of preallocated storages
struct ClassPool {
    capacity: usize,
    free: Mutex<Vec<FrameStorage>>,
}

impl ClassPool {
    fn new(count: usize, mut make: impl FnMut() -> FrameStorage) -> Self {
        Self {
            capacity: count,
            free: Mutex::new((0..count).map(|_| make()).collect()),
        }
    }

    fn take(&self) -> Option<FrameStorage> {
        self.lock().pop()
    }

    fn give(&self, mut storage: FrameStorage) {
        storage.clear();
        let mut free = self.lock();
        // Storages from another allocator must not grow the pool
        if free.len() < self.capacity {
            free.push(storage);
        }
    }

    fn available(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FrameStorage>> {
        self.free.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Fixed-capacity allocator backed by preallocated pools
///
/// Every class is sized from [`BufferConfig`] at construction. ACL and ISO
/// buffers share one pool of data blocks and grow on demand, so a long data
/// frame can run out of blocks part way through.
pub struct PoolAllocator {
    cmd: ClassPool,
    evt: ClassPool,
    evt_discardable: ClassPool,
    acl: ClassPool,
    iso: ClassPool,
    data_blocks: Arc<BlockPool>,
}

impl PoolAllocator {
    /// Create an allocator with the pool sizes from `config`
    pub fn new(config: &BufferConfig) -> Arc<Self> {
        let data_blocks = BlockPool::new(config.data_block_size, config.data_block_count);

        Arc::new(Self {
            cmd: ClassPool::new(config.cmd_count, || FrameStorage::flat(config.cmd_size)),
            evt: ClassPool::new(config.evt_count, || {
                FrameStorage::flat(config.evt_size).with_tag(CLASS_DEFAULT)
            }),
            evt_discardable: ClassPool::new(config.evt_discardable_count, || {
                FrameStorage::flat(config.evt_size).with_tag(CLASS_DISCARDABLE)
            }),
            acl: ClassPool::new(config.acl_count, || FrameStorage::scatter(Arc::clone(&data_blocks))),
            iso: ClassPool::new(config.iso_count, || FrameStorage::scatter(Arc::clone(&data_blocks))),
            data_blocks,
        })
    }

    /// Free buffers left in the class used for `pkt_type`
    pub fn available(&self, pkt_type: PacketType) -> usize {
        match pkt_type {
            PacketType::Command => self.cmd.available(),
            PacketType::Acl => self.acl.available(),
            PacketType::Event => self.evt.available(),
            PacketType::Iso => self.iso.available(),
        }
    }

    /// Free buffers left in the discardable event class
    pub fn discardable_available(&self) -> usize {
        self.evt_discardable.available()
    }

    /// Free data blocks shared by ACL and ISO
    pub fn data_blocks_available(&self) -> usize {
        self.data_blocks.available()
    }
}

impl HciAllocator for PoolAllocator {
    fn alloc_cmd(&self) -> Option<FrameStorage> {
        self.cmd.take()
    }

    fn alloc_acl(&self) -> Option<FrameStorage> {
        self.acl.take()
    }

    fn alloc_evt(&self, discardable: bool) -> Option<FrameStorage> {
        if discardable {
            self.evt_discardable.take()
        } else {
            self.evt.take()
        }
    }

    fn alloc_iso(&self) -> Option<FrameStorage> {
        self.iso.take()
    }

    fn free_cmd(&self, storage: FrameStorage) {
        self.cmd.give(storage);
    }

    fn free_acl(&self, storage: FrameStorage) {
        self.acl.give(storage);
    }

    fn free_evt(&self, storage: FrameStorage) {
        match storage.tag() {
            CLASS_DISCARDABLE => self.evt_discardable.give(storage),
            _ => self.evt.give(storage),
        }
    }

    fn free_iso(&self, storage: FrameStorage) {
        self.iso.give(storage);
    }
}

impl fmt::Debug for PoolAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolAllocator")
            .field("cmd", &self.cmd.available())
            .field("evt", &self.evt.available())
            .field("evt_discardable", &self.evt_discardable.available())
            .field("acl", &self.acl.available())
            .field("iso", &self.iso.available())
            .field("data_blocks", &self.data_blocks.available())
            .finish()
    }
}
