//! Hardware interfaces consumed by the UART transports
//!
//! Register programming lives behind these traits. The polled transport needs
//! blocking byte reads and writes; the DMA transport needs descriptor
//! submission plus completion callbacks raised from interrupt context.

use super::descriptor::{DescriptorChain, DmaDescriptor};
use std::io;
use std::sync::Arc;
use std::time::Duration;

/// Receive half of a polled UART
pub trait UartRx: Send {
    /// Wait up to `timeout` for data and read what is available into `buf`
    ///
    /// Returns `Ok(0)` when the timeout expires without data.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;
}

/// Transmit half of a polled UART
pub trait UartTx: Send {
    /// Write some of `data`, returning how many bytes were accepted
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Wait until written bytes have left the peripheral
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Completion callbacks a DMA engine raises, typically from its interrupt
///
/// Implementations must not block and must not allocate.
pub trait DmaEvents: Send + Sync {
    /// A reception finished; `desc.len()` bytes were received
    fn rx_done(&self, desc: DmaDescriptor);

    /// A transmit transaction finished; the chain comes back whole
    fn tx_done(&self, chain: DescriptorChain);
}

/// UART attached to a descriptor-based DMA engine
pub trait DmaUart: Send + Sync {
    /// Register the completion handler before any transfer starts
    fn attach(&self, events: Arc<dyn DmaEvents>);

    /// Drop the completion handler
    fn detach(&self);

    /// Arm a single-descriptor reception
    fn start_rx(&self, desc: DmaDescriptor);

    /// Start transmitting a descriptor chain
    fn start_tx(&self, chain: DescriptorChain);
}
