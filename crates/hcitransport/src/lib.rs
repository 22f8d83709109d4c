//! hcitransport - Bluetooth HCI transport layer
//!
//! This library moves HCI frames between a host stack and a controller. The two
//! may share a chip, in which case frames are handed over directly, or sit at
//! either end of a UART carrying H4 framing, driven either polled or through
//! chained DMA descriptors.
//!
//! Every buffer comes from preallocated pools sized once at init, and every
//! frame buffer has exactly one owner at a time.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod h4;
pub mod hci;
pub mod pool;
pub mod sync;
pub mod tx_queue;
pub mod uart;

// Re-export common types for convenience
pub use config::{Backend, BufferConfig, DmaConfig, Role, TransportConfig, UartConfig};
pub use dispatch::{Controller, Direction, HciTransport, HostReceiver, TransportHal};
pub use error::{Result, TransportError};
pub use h4::{HciAllocator, HciBuffer, H4Error, H4Parser, PoolAllocator};
pub use hci::PacketType;
pub use tx_queue::{tx_queue, TxChunk, TxDrain, TxQueue};
pub use uart::{DmaEvents, DmaUart, TransportSink, UartRx, UartTx};
