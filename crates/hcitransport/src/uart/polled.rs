//! Polled UART transport
//!
//! The receive task reads whatever the port has into a scratch buffer and
//! feeds it to the H4 parser. The transmit task sleeps on the queue signal,
//! then copies frames out chunk by chunk and writes them in full.

use super::hal::{UartRx, UartTx};
use super::{feed_stream, TransportSink};
use crate::config::UartConfig;
use crate::error::Result;
use crate::h4::H4Parser;
use crate::sync::Semaphore;
use crate::tx_queue::TxDrain;
use log::{debug, error};
use std::io;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Receive side: port, parser and the scratch buffer between them
pub struct UartRxTask {
    port: Box<dyn UartRx>,
    parser: H4Parser,
    sink: Arc<dyn TransportSink>,
    scratch: Box<[u8]>,
    timeout: Duration,
}

impl UartRxTask {
    pub fn new(
        config: &UartConfig,
        port: Box<dyn UartRx>,
        parser: H4Parser,
        sink: Arc<dyn TransportSink>,
    ) -> Self {
        Self {
            port,
            parser,
            sink,
            scratch: vec![0u8; config.rx_scratch_size].into_boxed_slice(),
            timeout: config.rx_poll_timeout,
        }
    }

    /// Read once and parse what arrived
    ///
    /// # Returns
    ///
    /// Number of bytes read, zero on timeout
    pub fn poll(&mut self) -> io::Result<usize> {
        let n = self.port.read(&mut self.scratch, self.timeout)?;
        if n == 0 {
            return Ok(0);
        }

        feed_stream(&mut self.parser, self.sink.as_ref(), &self.scratch[..n], "UART RX");
        Ok(n)
    }

    pub fn parser(&self) -> &H4Parser {
        &self.parser
    }
}

/// Transmit side: port, queue consumer and the chunk buffer between them
pub struct UartTxTask {
    port: Box<dyn UartTx>,
    drain: TxDrain,
    chunk: Box<[u8]>,
    /// Bytes of `chunk` dequeued but not yet accepted by the port
    pending: Range<usize>,
    pending_last: bool,
}

impl UartTxTask {
    pub fn new(config: &UartConfig, port: Box<dyn UartTx>, drain: TxDrain) -> Self {
        Self {
            port,
            drain,
            chunk: vec![0u8; config.tx_chunk_size].into_boxed_slice(),
            pending: 0..0,
            pending_last: false,
        }
    }

    /// Write queued frames until the queue is empty
    ///
    /// A failed write keeps the unwritten part of the current chunk, and the
    /// next call sends it before dequeuing anything else.
    ///
    /// # Returns
    ///
    /// Number of frames completed
    pub fn drain(&mut self) -> io::Result<usize> {
        let mut frames = 0;
        loop {
            if self.pending.is_empty() {
                let Some(chunk) = self.drain.dequeue(&mut self.chunk) else {
                    break;
                };
                self.pending = 0..chunk.len;
                self.pending_last = chunk.last;
            }

            self.write_pending()?;
            if self.pending_last {
                self.pending_last = false;
                frames += 1;
            }
        }
        if frames > 0 {
            self.port.flush()?;
        }
        Ok(frames)
    }

    fn write_pending(&mut self) -> io::Result<()> {
        while !self.pending.is_empty() {
            match self.port.write(&self.chunk[self.pending.clone()])? {
                0 => return Err(io::Error::new(io::ErrorKind::WriteZero, "UART accepted no bytes")),
                n => self.pending.start += n,
            }
        }
        Ok(())
    }

    /// Bytes dequeued but not yet written
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Drop every frame still queued, including a partly written one
    pub fn flush(&mut self) -> usize {
        let partial = usize::from(!self.pending.is_empty() && self.pending_last);
        self.pending = 0..0;
        self.pending_last = false;
        self.drain.flush() + partial
    }
}

/// Polled UART transport with one thread per direction
pub struct UartTransport {
    running: Arc<AtomicBool>,
    signal: Arc<Semaphore>,
    rx_thread: Option<JoinHandle<()>>,
    tx_thread: Option<JoinHandle<()>>,
}

impl UartTransport {
    /// Spawn the receive and transmit tasks
    ///
    /// `signal` is given whenever a frame is queued on the other end of
    /// `drain`.
    pub fn start(
        config: &UartConfig,
        rx: Box<dyn UartRx>,
        tx: Box<dyn UartTx>,
        parser: H4Parser,
        drain: TxDrain,
        sink: Arc<dyn TransportSink>,
        signal: Arc<Semaphore>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let mut rx_task = UartRxTask::new(config, rx, parser, sink);
        let mut tx_task = UartTxTask::new(config, tx, drain);
        let backoff = config.rx_poll_timeout;

        let rx_thread = {
            let running = Arc::clone(&running);
            thread::Builder::new()
                .name("hci-uart-rx".into())
                .spawn(move || {
                    while running.load(Ordering::Acquire) {
                        match rx_task.poll() {
                            Ok(_) => {}
                            Err(e)
                                if matches!(
                                    e.kind(),
                                    io::ErrorKind::TimedOut
                                        | io::ErrorKind::WouldBlock
                                        | io::ErrorKind::Interrupted
                                ) => {}
                            Err(e) => {
                                error!("UART read failed: {}", e);
                                thread::sleep(backoff);
                            }
                        }
                    }
                    debug!("UART RX task stopped");
                })?
        };

        let tx_thread = {
            let running_tx = Arc::clone(&running);
            let signal = Arc::clone(&signal);
            let spawned = thread::Builder::new()
                .name("hci-uart-tx".into())
                .spawn(move || {
                    loop {
                        signal.take();
                        if !running_tx.load(Ordering::Acquire) {
                            break;
                        }
                        if let Err(e) = tx_task.drain() {
                            error!("UART write failed: {}", e);
                        }
                    }
                    let dropped = tx_task.flush();
                    debug!("UART TX task stopped, {} frames dropped", dropped);
                });

            match spawned {
                Ok(handle) => handle,
                Err(e) => {
                    running.store(false, Ordering::Release);
                    let _ = rx_thread.join();
                    return Err(e.into());
                }
            }
        };

        Ok(Self {
            running,
            signal,
            rx_thread: Some(rx_thread),
            tx_thread: Some(tx_thread),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Stop both tasks and wait for them
    pub fn shutdown(&mut self) {
        self.running.store(false, Ordering::Release);
        self.signal.give();

        for handle in [self.rx_thread.take(), self.tx_thread.take()].into_iter().flatten() {
            if handle.join().is_err() {
                error!("UART task panicked");
            }
        }
    }
}

impl Drop for UartTransport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
