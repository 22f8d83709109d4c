//! Transport configuration
//!
//! All pools are sized here, once, at init. Nothing grows at runtime.

use crate::error::{Result, TransportError};
use crate::hci::constants::*;
use std::time::Duration;

/// Which transport backend carries the frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// Host and controller share the chip; frames are handed over directly
    PassThrough,
    /// UART driven byte by byte from two tasks
    Uart,
    /// UART driven by chained DMA descriptors from one worker task
    UartDma,
}

/// Which side of the HCI this build implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Local host stack, remote controller
    Host,
    /// Local controller, remote host
    Controller,
}

/// Buffer pool sizes for each allocation class
#[derive(Debug, Clone)]
pub struct BufferConfig {
    /// Number of command buffers
    pub cmd_count: usize,
    /// Capacity of a command buffer in bytes
    pub cmd_size: usize,
    /// Number of high-priority event buffers
    pub evt_count: usize,
    /// Number of discardable (advertising report) event buffers
    pub evt_discardable_count: usize,
    /// Capacity of an event buffer in bytes
    pub evt_size: usize,
    /// Number of ACL buffers
    pub acl_count: usize,
    /// Number of ISO buffers
    pub iso_count: usize,
    /// Size of a data block backing ACL/ISO payloads
    pub data_block_size: usize,
    /// Number of data blocks shared by ACL and ISO buffers
    pub data_block_count: usize,
}

impl BufferConfig {
    /// Number of TX queue entries needed so every buffer can be queued at once
    pub fn tx_queue_capacity(&self) -> usize {
        self.cmd_count + self.evt_count + self.evt_discardable_count + self.acl_count + self.iso_count
    }
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            cmd_count: 4,
            cmd_size: HCI_COMMAND_HDR_LEN + HCI_MAX_PARAM_LEN,
            evt_count: 16,
            evt_discardable_count: 16,
            evt_size: HCI_EVENT_HDR_LEN + HCI_MAX_PARAM_LEN,
            acl_count: 12,
            iso_count: 4,
            data_block_size: 256,
            data_block_count: 48,
        }
    }
}

/// Polled UART settings
#[derive(Debug, Clone)]
pub struct UartConfig {
    /// Size of the RX scratch buffer handed to each read
    pub rx_scratch_size: usize,
    /// Largest chunk written to the UART at once
    pub tx_chunk_size: usize,
    /// How long an RX read may block before the task checks for shutdown
    pub rx_poll_timeout: Duration,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            rx_scratch_size: 256,
            tx_chunk_size: 128,
            rx_poll_timeout: Duration::from_millis(100),
        }
    }
}

/// UART DMA settings
#[derive(Debug, Clone)]
pub struct DmaConfig {
    /// Size of one RX reception block
    pub rx_block_size: usize,
    /// Number of RX data blocks
    pub rx_block_count: usize,
    /// Number of RX info records queued from interrupt to worker
    pub rx_info_count: usize,
    /// Number of TX descriptors
    pub tx_descriptor_count: usize,
    /// Buffer size of one TX descriptor
    pub tx_descriptor_size: usize,
}

impl Default for DmaConfig {
    fn default() -> Self {
        Self {
            rx_block_size: 512,
            rx_block_count: 4,
            rx_info_count: 8,
            tx_descriptor_count: 16,
            tx_descriptor_size: 256,
        }
    }
}

/// Complete transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Selected backend
    pub backend: Backend,
    /// Build role
    pub role: Role,
    /// Buffer pools
    pub buffers: BufferConfig,
    /// Polled UART settings
    pub uart: UartConfig,
    /// UART DMA settings
    pub dma: DmaConfig,
}

impl TransportConfig {
    /// Configuration for `backend` and `role` with default pool sizes
    pub fn new(backend: Backend, role: Role) -> Self {
        Self {
            backend,
            role,
            ..Self::default()
        }
    }

    /// Check that every pool and block has a usable size
    pub fn validate(&self) -> Result<()> {
        let b = &self.buffers;
        if b.cmd_size < HCI_COMMAND_HDR_LEN {
            return Err(invalid("command buffer smaller than a command header"));
        }
        if b.evt_size < HCI_LE_META_HDR_LEN {
            return Err(invalid("event buffer smaller than an LE meta header"));
        }
        if b.data_block_size == 0 {
            return Err(invalid("data block size must be non-zero"));
        }
        if b.tx_queue_capacity() == 0 {
            return Err(invalid("no buffers configured"));
        }

        match self.backend {
            Backend::PassThrough => {}
            Backend::Uart => {
                if self.uart.rx_scratch_size == 0 || self.uart.tx_chunk_size == 0 {
                    return Err(invalid("UART scratch and chunk sizes must be non-zero"));
                }
            }
            Backend::UartDma => {
                let d = &self.dma;
                if d.rx_block_size == 0 || d.rx_block_count == 0 {
                    return Err(invalid("DMA RX needs at least one non-empty block"));
                }
                if d.rx_info_count == 0 {
                    return Err(invalid("DMA RX needs at least one info record"));
                }
                if d.tx_descriptor_count == 0 || d.tx_descriptor_size == 0 {
                    return Err(invalid("DMA TX needs at least one non-empty descriptor"));
                }
            }
        }

        Ok(())
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: Backend::PassThrough,
            role: Role::Host,
            buffers: BufferConfig::default(),
            uart: UartConfig::default(),
            dma: DmaConfig::default(),
        }
    }
}

fn invalid(reason: &str) -> TransportError {
    TransportError::InvalidConfig(reason.to_string())
}
