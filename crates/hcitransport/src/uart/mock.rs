//! In-memory hardware for driver and dispatch tests

use super::descriptor::{DescriptorChain, DmaDescriptor};
use super::hal::{DmaEvents, DmaUart, UartRx, UartTx};
use super::TransportSink;
use crate::h4::{H4Error, HciBuffer};
use crate::hci::PacketType;
use std::io;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// Receive half fed through a channel, one chunk per send
pub struct MockRx {
    incoming: Receiver<Vec<u8>>,
    pending: Vec<u8>,
}

impl MockRx {
    pub fn new() -> (Self, Sender<Vec<u8>>) {
        let (tx, rx) = mpsc::channel();
        (
            Self {
                incoming: rx,
                pending: Vec::new(),
            },
            tx,
        )
    }
}

impl UartRx for MockRx {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        if self.pending.is_empty() {
            match self.incoming.recv_timeout(timeout) {
                Ok(bytes) => self.pending = bytes,
                Err(RecvTimeoutError::Timeout) => return Ok(0),
                Err(RecvTimeoutError::Disconnected) => {
                    thread::sleep(timeout);
                    return Ok(0);
                }
            }
        }

        let n = self.pending.len().min(buf.len());
        buf[..n].copy_from_slice(&self.pending[..n]);
        self.pending.drain(..n);
        Ok(n)
    }
}

/// Transmit half recording everything written
///
/// `max_write` limits how much one write call accepts.
#[derive(Clone)]
pub struct MockTx {
    pub written: Arc<Mutex<Vec<u8>>>,
    max_write: usize,
    writes: usize,
    fail_on: Option<usize>,
}

impl MockTx {
    pub fn new(max_write: usize) -> Self {
        Self {
            written: Arc::new(Mutex::new(Vec::new())),
            max_write,
            writes: 0,
            fail_on: None,
        }
    }

    /// Port whose `nth` write call (counting from 1) fails once
    pub fn failing_once(max_write: usize, nth: usize) -> Self {
        Self {
            fail_on: Some(nth),
            ..Self::new(max_write)
        }
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.written.lock().unwrap().clone()
    }
}

impl UartTx for MockTx {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.writes += 1;
        if self.fail_on == Some(self.writes) {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "UART busy"));
        }
        let n = data.len().min(self.max_write);
        self.written.lock().unwrap().extend_from_slice(&data[..n]);
        Ok(n)
    }
}

/// DMA engine that completes transfers when the test says so
///
/// With `auto_complete` every transmit chain finishes as soon as it starts.
pub struct MockDma {
    events: Mutex<Option<Arc<dyn DmaEvents>>>,
    armed: Mutex<Option<DmaDescriptor>>,
    in_flight: Mutex<Option<DescriptorChain>>,
    /// Flags and bytes of every submitted chain
    pub chains: Mutex<Vec<(Vec<super::DescFlags>, Vec<u8>)>>,
    auto_complete: bool,
}

impl MockDma {
    pub fn new(auto_complete: bool) -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(None),
            armed: Mutex::new(None),
            in_flight: Mutex::new(None),
            chains: Mutex::new(Vec::new()),
            auto_complete,
        })
    }

    fn events(&self) -> Option<Arc<dyn DmaEvents>> {
        self.events.lock().unwrap().clone()
    }

    pub fn is_rx_armed(&self) -> bool {
        self.armed.lock().unwrap().is_some()
    }

    pub fn tx_in_flight(&self) -> bool {
        self.in_flight.lock().unwrap().is_some()
    }

    /// Deliver `bytes` into the armed descriptor and raise the RX interrupt
    ///
    /// Returns how many bytes fit, or `None` if reception is not armed.
    pub fn receive(&self, bytes: &[u8]) -> Option<usize> {
        let mut desc = self.armed.lock().unwrap().take()?;
        let n = desc.fill(bytes);
        self.events()?.rx_done(desc);
        Some(n)
    }

    /// Deliver `bytes` in as many receptions as needed
    pub fn receive_all(&self, mut bytes: &[u8]) -> bool {
        while !bytes.is_empty() {
            match self.receive(bytes) {
                Some(n) => bytes = &bytes[n..],
                None => return false,
            }
        }
        true
    }

    /// Finish the chain in flight and raise the TX interrupt
    pub fn complete_tx(&self) -> bool {
        let chain = self.in_flight.lock().unwrap().take();
        match (chain, self.events()) {
            (Some(chain), Some(events)) => {
                events.tx_done(chain);
                true
            }
            _ => false,
        }
    }

    /// All bytes transmitted so far
    pub fn sent(&self) -> Vec<u8> {
        self.chains
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, bytes)| bytes.iter().copied())
            .collect()
    }
}

impl DmaUart for MockDma {
    fn attach(&self, events: Arc<dyn DmaEvents>) {
        *self.events.lock().unwrap() = Some(events);
    }

    fn detach(&self) {
        *self.events.lock().unwrap() = None;
    }

    fn start_rx(&self, desc: DmaDescriptor) {
        let previous = self.armed.lock().unwrap().replace(desc);
        assert!(previous.is_none(), "reception armed twice");
    }

    fn start_tx(&self, chain: DescriptorChain) {
        assert!(
            chain.iter().last().map_or(false, DmaDescriptor::is_eof),
            "chain not terminated"
        );
        let flags = chain.iter().map(|desc| desc.flags()).collect();
        self.chains.lock().unwrap().push((flags, chain.to_vec()));

        if self.auto_complete {
            if let Some(events) = self.events() {
                events.tx_done(chain);
                return;
            }
        }
        let previous = self.in_flight.lock().unwrap().replace(chain);
        assert!(previous.is_none(), "two chains in flight");
    }
}

/// Sink keeping every frame and sync loss it sees
#[derive(Default)]
pub struct RecordingSink {
    pub frames: Mutex<Vec<(PacketType, Vec<u8>)>>,
    pub sync_losses: Mutex<Vec<H4Error>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn frames(&self) -> Vec<(PacketType, Vec<u8>)> {
        self.frames.lock().unwrap().clone()
    }

    pub fn sync_loss_count(&self) -> usize {
        self.sync_losses.lock().unwrap().len()
    }
}

impl TransportSink for RecordingSink {
    fn deliver(&self, pkt_type: PacketType, buf: HciBuffer) -> Result<(), HciBuffer> {
        self.frames.lock().unwrap().push((pkt_type, buf.to_vec()));
        Ok(())
    }

    fn sync_lost(&self, err: &H4Error) {
        self.sync_losses.lock().unwrap().push(err.clone());
    }
}

/// Poll `cond` until it holds or `timeout` passes
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    cond()
}
