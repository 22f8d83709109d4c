//! DMA UART transport
//!
//! Completion interrupts do only constant-time bookkeeping inside a critical
//! section: record what arrived, re-arm reception, recycle transmit
//! descriptors, and give the worker signal. The worker task does the rest. It
//! submits the next transmit chain, parses received buffers in arrival order,
//! and puts receive buffers back into circulation.
//!
//! Receive buffers come from a fixed pool, and so do the records describing
//! them. Exhausting either stalls reception until the worker catches up, but
//! never drops or reorders bytes.

use super::descriptor::{DescFlags, DescriptorChain, DmaDescriptor};
use super::hal::{DmaEvents, DmaUart};
use super::{feed_stream, TransportSink};
use crate::config::DmaConfig;
use crate::error::Result;
use crate::h4::H4Parser;
use crate::pool::{BoundedFifo, FreeList};
use crate::sync::Semaphore;
use crate::tx_queue::TxDrain;
use critical_section::Mutex;
use log::{debug, error, trace, warn};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

const TX_IDLE: u8 = 0;
const TX_SUBMITTING: u8 = 1;
const TX_COMPLETED: u8 = 2;

/// Transmit side of the DMA engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Nothing in flight
    Idle,
    /// A chain is being built or transferred
    Submitting,
    /// The engine finished a chain the worker has not seen yet
    Completed,
}

impl TxState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            TX_SUBMITTING => TxState::Submitting,
            TX_COMPLETED => TxState::Completed,
            _ => TxState::Idle,
        }
    }
}

/// A filled receive buffer waiting for the worker
struct RxInfo {
    desc: DmaDescriptor,
}

struct RxState {
    blocks: FreeList<DmaDescriptor>,
    infos: BoundedFifo<RxInfo>,
    /// Buffer received while every record was in use
    held: Option<DmaDescriptor>,
    info_exhausted: bool,
    /// Reception stopped because no buffer was free
    rearm_pending: bool,
}

/// State shared between the completion handlers and the worker
pub struct DmaShared {
    engine: Arc<dyn DmaUart>,
    rx: Mutex<RefCell<RxState>>,
    tx_pool: Mutex<RefCell<FreeList<DmaDescriptor>>>,
    tx_state: AtomicU8,
    signal: Arc<Semaphore>,
}

impl DmaShared {
    /// Allocate every descriptor and record up front
    pub fn new(config: &DmaConfig, engine: Arc<dyn DmaUart>, signal: Arc<Semaphore>) -> Arc<Self> {
        let rx_blocks = (0..config.rx_block_count)
            .map(|_| DmaDescriptor::new(config.rx_block_size))
            .collect();
        let tx_descs = (0..config.tx_descriptor_count)
            .map(|_| DmaDescriptor::new(config.tx_descriptor_size))
            .collect();

        Arc::new(Self {
            engine,
            rx: Mutex::new(RefCell::new(RxState {
                blocks: FreeList::new(rx_blocks),
                infos: BoundedFifo::new(config.rx_info_count),
                held: None,
                info_exhausted: false,
                rearm_pending: false,
            })),
            tx_pool: Mutex::new(RefCell::new(FreeList::new(tx_descs))),
            tx_state: AtomicU8::new(TX_IDLE),
            signal,
        })
    }

    /// Arm the first reception
    ///
    /// Returns false if the receive pool is empty.
    pub fn arm_rx(&self) -> bool {
        let desc = critical_section::with(|cs| {
            let mut rx = self.rx.borrow_ref_mut(cs);
            let desc = rx.blocks.take();
            if desc.is_none() {
                rx.rearm_pending = true;
            }
            desc
        });

        match desc {
            Some(desc) => {
                self.engine.start_rx(desc);
                true
            }
            None => false,
        }
    }

    pub fn tx_state(&self) -> TxState {
        TxState::from_raw(self.tx_state.load(Ordering::Acquire))
    }

    /// Transmit descriptors not owned by the engine
    pub fn tx_descriptors_available(&self) -> usize {
        critical_section::with(|cs| self.tx_pool.borrow_ref(cs).available())
    }

    /// Receive buffers neither armed nor waiting to be parsed
    pub fn rx_blocks_available(&self) -> usize {
        critical_section::with(|cs| self.rx.borrow_ref(cs).blocks.available())
    }

    /// Received buffers waiting for the worker
    pub fn rx_pending(&self) -> usize {
        critical_section::with(|cs| {
            let rx = self.rx.borrow_ref(cs);
            rx.infos.len() + usize::from(rx.held.is_some())
        })
    }

    fn take_tx_descriptor(&self) -> Option<DmaDescriptor> {
        critical_section::with(|cs| self.tx_pool.borrow_ref_mut(cs).take())
    }

    fn give_tx_descriptor(&self, mut desc: DmaDescriptor) {
        desc.reset();
        critical_section::with(|cs| {
            let _ = self.tx_pool.borrow_ref_mut(cs).give(desc);
        });
    }

    /// Next received buffer in arrival order, and whether it was the held one
    fn next_rx(&self) -> Option<(DmaDescriptor, bool)> {
        critical_section::with(|cs| {
            let mut rx = self.rx.borrow_ref_mut(cs);
            // Records first: the held buffer arrived after all of them
            if let Some(info) = rx.infos.pop_front() {
                return Some((info.desc, false));
            }
            if rx.info_exhausted {
                rx.info_exhausted = false;
                return rx.held.take().map(|desc| (desc, true));
            }
            None
        })
    }

    /// Put a parsed buffer back into circulation
    fn recycle_rx(&self, mut desc: DmaDescriptor, held: bool) {
        desc.reset();
        let rearm = critical_section::with(|cs| {
            let mut rx = self.rx.borrow_ref_mut(cs);
            if held || rx.rearm_pending {
                rx.rearm_pending = false;
                return Some(desc);
            }
            let _ = rx.blocks.give(desc);
            None
        });

        if let Some(desc) = rearm {
            trace!("DMA RX re-armed from worker");
            self.engine.start_rx(desc);
        }
    }
}

impl DmaEvents for DmaShared {
    fn rx_done(&self, desc: DmaDescriptor) {
        let rearm = critical_section::with(|cs| {
            let mut rx = self.rx.borrow_ref_mut(cs);
            if let Err(info) = rx.infos.push_back(RxInfo { desc }) {
                // Out of records: park the buffer and leave reception stopped
                rx.held = Some(info.desc);
                rx.info_exhausted = true;
                return None;
            }

            let next = rx.blocks.take();
            if next.is_none() {
                rx.rearm_pending = true;
            }
            next
        });

        self.signal.give();
        if let Some(desc) = rearm {
            self.engine.start_rx(desc);
        }
    }

    fn tx_done(&self, chain: DescriptorChain) {
        critical_section::with(|cs| {
            let mut pool = self.tx_pool.borrow_ref_mut(cs);
            for mut desc in chain {
                desc.reset();
                let _ = pool.give(desc);
            }
        });

        self.tx_state.store(TX_COMPLETED, Ordering::Release);
        self.signal.give();
    }
}

/// Task-context half of the DMA transport
pub struct DmaWorker {
    shared: Arc<DmaShared>,
    parser: H4Parser,
    drain: TxDrain,
    sink: Arc<dyn TransportSink>,
    chain_capacity: usize,
}

impl DmaWorker {
    pub fn new(
        shared: Arc<DmaShared>,
        parser: H4Parser,
        drain: TxDrain,
        sink: Arc<dyn TransportSink>,
    ) -> Self {
        let chain_capacity = shared.tx_descriptors_available();
        Self {
            shared,
            parser,
            drain,
            sink,
            chain_capacity,
        }
    }

    pub fn shared(&self) -> &Arc<DmaShared> {
        &self.shared
    }

    pub fn parser(&self) -> &H4Parser {
        &self.parser
    }

    /// One pass over both directions, run each time the signal is given
    pub fn service(&mut self) {
        self.service_tx();
        self.service_rx();
    }

    /// Drop every queued frame
    pub fn flush(&mut self) -> usize {
        self.drain.flush()
    }

    fn service_tx(&mut self) {
        let shared = Arc::clone(&self.shared);
        let state = &shared.tx_state;
        let _ = state.compare_exchange(TX_COMPLETED, TX_IDLE, Ordering::AcqRel, Ordering::Acquire);
        if state
            .compare_exchange(TX_IDLE, TX_SUBMITTING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // Previous chain still in flight
            return;
        }

        let chain = self.build_chain();
        if chain.is_empty() {
            state.store(TX_IDLE, Ordering::Release);
            return;
        }

        trace!(
            "DMA TX chain: {} descriptors, {} bytes",
            chain.len(),
            chain.total_len()
        );
        shared.engine.start_tx(chain);
    }

    /// Fill descriptors with queued chunks until the current frame ends, the
    /// queue runs dry, or no descriptor is left
    fn build_chain(&mut self) -> DescriptorChain {
        let mut chain = DescriptorChain::with_capacity(self.chain_capacity);

        while let Some(mut desc) = self.shared.take_tx_descriptor() {
            let Some(chunk) = self.drain.dequeue(desc.buffer_mut()) else {
                self.shared.give_tx_descriptor(desc);
                break;
            };

            desc.set_len(chunk.len);
            if !chunk.last {
                desc.insert_flags(DescFlags::SUB_FRAME);
            }
            chain.push(desc);
            if chunk.last {
                break;
            }
        }

        if !chain.is_empty() && self.drain.in_progress() {
            debug!("DMA TX out of descriptors mid-frame, continuing next round");
        }
        chain.seal();
        chain
    }

    fn service_rx(&mut self) {
        while let Some((desc, held)) = self.shared.next_rx() {
            if held {
                warn!("DMA RX records exhausted, resuming from held buffer");
            }

            feed_stream(&mut self.parser, self.sink.as_ref(), desc.data(), "DMA RX");
            self.shared.recycle_rx(desc, held);
        }
    }
}

/// DMA UART transport running its worker on a dedicated thread
pub struct UartDmaTransport {
    shared: Arc<DmaShared>,
    running: Arc<AtomicBool>,
    signal: Arc<Semaphore>,
    worker: Option<JoinHandle<()>>,
}

impl UartDmaTransport {
    /// Attach to `engine`, arm reception and spawn the worker
    pub fn start(
        config: &DmaConfig,
        engine: Arc<dyn DmaUart>,
        parser: H4Parser,
        drain: TxDrain,
        sink: Arc<dyn TransportSink>,
        signal: Arc<Semaphore>,
    ) -> Result<Self> {
        let shared = DmaShared::new(config, Arc::clone(&engine), Arc::clone(&signal));
        engine.attach(Arc::clone(&shared) as Arc<dyn DmaEvents>);

        let mut worker = DmaWorker::new(Arc::clone(&shared), parser, drain, sink);
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let running = Arc::clone(&running);
            let signal = Arc::clone(&signal);
            thread::Builder::new()
                .name("hci-uart-dma".into())
                .spawn(move || {
                    loop {
                        signal.take();
                        if !running.load(Ordering::Acquire) {
                            break;
                        }
                        worker.service();
                    }
                    let dropped = worker.flush();
                    debug!("DMA worker stopped, {} frames dropped", dropped);
                })
        };

        let handle = match handle {
            Ok(handle) => handle,
            Err(e) => {
                engine.detach();
                return Err(e.into());
            }
        };

        if !shared.arm_rx() {
            error!("DMA RX pool empty, reception not started");
        }

        Ok(Self {
            shared,
            running,
            signal,
            worker: Some(handle),
        })
    }

    pub fn shared(&self) -> &Arc<DmaShared> {
        &self.shared
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop the worker and detach from the engine
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.signal.give();

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("DMA worker panicked");
            }
            self.shared.engine.detach();
        }
    }
}

impl Drop for UartDmaTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
