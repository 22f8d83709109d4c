//! UART transports
//!
//! Two drivers move H4 bytes over a UART. [`polled`] runs one blocking task
//! per direction. [`dma`] feeds descriptor chains to a DMA engine and does all
//! parsing and queue work in a single worker task woken by the completion
//! interrupts.
//!
//! Both drivers hand completed frames upward through a [`TransportSink`].

pub mod descriptor;
pub mod dma;
pub mod hal;
pub mod polled;

#[cfg(test)]
pub(crate) mod mock;

pub use descriptor::{DescFlags, DescriptorChain, DmaDescriptor};
pub use dma::{DmaShared, DmaWorker, TxState, UartDmaTransport};
pub use hal::{DmaEvents, DmaUart, UartRx, UartTx};
pub use polled::{UartRxTask, UartTransport, UartTxTask};

use crate::h4::{FrameCallback, H4Error, H4Parser, HciBuffer};
use crate::hci::PacketType;
use log::warn;
use std::sync::Arc;

/// Receiver of everything a UART driver reads off the wire
pub trait TransportSink: Send + Sync {
    /// Take ownership of a complete frame, or hand it back to reject it
    fn deliver(&self, pkt_type: PacketType, buf: HciBuffer) -> Result<(), HciBuffer>;

    /// An inbound frame was lost, either to a sync loss or because it could
    /// not be stored
    fn sync_lost(&self, err: &H4Error);
}

/// Feed one read's worth of bytes, reporting every parser error to `sink`
///
/// A frame that could not be stored is skipped by the parser, so parsing
/// carries on with the rest of `data`. After a sync loss the rest is dropped.
pub(crate) fn feed_stream(parser: &mut H4Parser, sink: &dyn TransportSink, data: &[u8], what: &str) {
    let mut data = data;
    while let Err(err) = parser.feed(data) {
        sink.sync_lost(&err);
        if err.is_sync_loss() {
            warn!("{}: {}, dropping {} bytes", what, err, data.len() - err.consumed);
            return;
        }
        warn!("{}: {}, skipping frame", what, err);
        data = &data[err.consumed..];
    }
}

/// Parser callback forwarding every frame to `sink`
pub fn frame_callback(sink: Arc<dyn TransportSink>) -> FrameCallback {
    Box::new(move |pkt_type, buf| sink.deliver(pkt_type, buf))
}
