//! Transport dispatch
//!
//! [`HciTransport`] is the one entry point both stacks use. A frame is sent
//! in a [`Direction`]; the configured [`Role`] and [`Backend`] decide whether
//! it is handed to the local side or queued for the UART. Frames read off the
//! UART come back through the same router and go to the local side.
//!
//! | Backend     | Role       | Host to controller | Controller to host |
//! |-------------|------------|--------------------|--------------------|
//! | PassThrough | any        | local controller   | local host         |
//! | UART        | Host       | UART               | local host         |
//! | UART        | Controller | local controller   | UART               |

use crate::config::{Backend, Role, TransportConfig};
use crate::error::{Result, TransportError};
use crate::h4::{acquire, H4Error, H4Parser, HciAllocator, HciBuffer};
use crate::hci::constants::*;
use crate::hci::packet::{self, PacketType};
use crate::sync::Semaphore;
use crate::tx_queue::{tx_queue, TxQueue};
use crate::uart::{
    frame_callback, DmaShared, DmaUart, TransportSink, UartDmaTransport, UartRx, UartTransport,
    UartTx,
};
use log::{debug, error, info, log_enabled, trace, warn, Level};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Which way a frame travels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    HostToController,
    ControllerToHost,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::HostToController => write!(f, "host->controller"),
            Direction::ControllerToHost => write!(f, "controller->host"),
        }
    }
}

/// Local link layer receiving frames from the host
///
/// Each ingest takes ownership on `Ok` and hands the buffer back on `Err`.
pub trait Controller: Send + Sync {
    /// Whether the controller accepts frames right now
    fn is_enabled(&self) -> bool;

    fn ingest_command(&self, buf: HciBuffer) -> std::result::Result<(), HciBuffer>;

    fn ingest_acl(&self, buf: HciBuffer) -> std::result::Result<(), HciBuffer>;

    fn ingest_iso(&self, buf: HciBuffer) -> std::result::Result<(), HciBuffer>;
}

/// Local host stack callback receiving events and inbound data
pub type HostReceiver =
    Box<dyn Fn(PacketType, HciBuffer) -> std::result::Result<(), HciBuffer> + Send + Sync>;

/// Installed form of a [`HostReceiver`], called without the lock held
type SharedReceiver =
    Arc<dyn Fn(PacketType, HciBuffer) -> std::result::Result<(), HciBuffer> + Send + Sync>;

/// Hardware handed to [`HciTransport::init`], one variant per backend
pub enum TransportHal {
    PassThrough,
    Uart {
        rx: Box<dyn UartRx>,
        tx: Box<dyn UartTx>,
    },
    UartDma(Arc<dyn DmaUart>),
}

impl TransportHal {
    pub fn backend(&self) -> Backend {
        match self {
            TransportHal::PassThrough => Backend::PassThrough,
            TransportHal::Uart { .. } => Backend::Uart,
            TransportHal::UartDma(_) => Backend::UartDma,
        }
    }
}

enum Route {
    Local,
    Wire,
}

/// Routing state shared with the UART driver threads
struct Router {
    role: Role,
    backend: Backend,
    allocator: Arc<dyn HciAllocator>,
    controller: Arc<dyn Controller>,
    host: RwLock<Option<SharedReceiver>>,
    tx: Option<TxQueue>,
    signal: Arc<Semaphore>,
}

impl Router {
    fn route(&self, direction: Direction) -> Route {
        match (self.backend, self.role, direction) {
            (Backend::PassThrough, _, _) => Route::Local,
            (_, Role::Host, Direction::HostToController)
            | (_, Role::Controller, Direction::ControllerToHost) => Route::Wire,
            _ => Route::Local,
        }
    }

    fn dispatch(&self, buf: HciBuffer, direction: Direction) -> Result<()> {
        match (self.route(direction), direction) {
            (Route::Wire, _) => self.transmit(buf),
            (Route::Local, Direction::HostToController) => self.to_controller(buf),
            (Route::Local, Direction::ControllerToHost) => self.to_host(buf),
        }
    }

    fn transmit(&self, buf: HciBuffer) -> Result<()> {
        let queue = self.tx.as_ref().ok_or(TransportError::BackendMismatch)?;
        let len = wire_len(&buf)?;
        trace_frame("UART TX", &buf, len);

        queue.enqueue(buf.pkt_type(), buf, len)?;
        self.signal.give();
        Ok(())
    }

    fn to_controller(&self, buf: HciBuffer) -> Result<()> {
        let pkt_type = buf.pkt_type();
        if !self.controller.is_enabled() {
            debug!("Controller disabled, dropping {} frame", pkt_type);
            return Err(TransportError::ControllerDisabled);
        }
        self.ingest(buf)
            .map_err(|_| TransportError::Rejected(pkt_type))
    }

    /// Current host callback
    ///
    /// The receiver may register a replacement while it runs.
    fn host_receiver(&self) -> Option<SharedReceiver> {
        self.host.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn set_host_receiver(&self, receiver: Option<SharedReceiver>) {
        *self.host.write().unwrap_or_else(|e| e.into_inner()) = receiver;
    }

    fn to_host(&self, buf: HciBuffer) -> Result<()> {
        let pkt_type = buf.pkt_type();
        let Some(receiver) = self.host_receiver() else {
            warn!("No host receiver, dropping {} frame", pkt_type);
            return Err(TransportError::NoReceiver);
        };
        receiver(pkt_type, buf).map_err(|_| TransportError::Rejected(pkt_type))
    }

    fn ingest(&self, buf: HciBuffer) -> std::result::Result<(), HciBuffer> {
        match buf.pkt_type() {
            PacketType::Command => self.controller.ingest_command(buf),
            PacketType::Acl => self.controller.ingest_acl(buf),
            PacketType::Iso => self.controller.ingest_iso(buf),
            PacketType::Event => {
                warn!("Dropping event addressed to the controller");
                Ok(())
            }
        }
    }
}

impl TransportSink for Router {
    fn deliver(&self, pkt_type: PacketType, buf: HciBuffer) -> std::result::Result<(), HciBuffer> {
        trace_frame("UART RX", &buf, buf.len());

        match self.role {
            Role::Controller => {
                if !self.controller.is_enabled() {
                    debug!("Controller disabled, dropping {} frame from host", pkt_type);
                    return Ok(());
                }
                self.ingest(buf)
            }
            Role::Host => {
                match self.host_receiver() {
                    Some(receiver) => receiver(pkt_type, buf),
                    None => {
                        warn!("No host receiver, dropping {} frame", pkt_type);
                        Err(buf)
                    }
                }
            }
        }
    }

    fn sync_lost(&self, err: &H4Error) {
        error!("H4 receive error: {}", err);

        let Some(mut buf) = acquire(&self.allocator, PacketType::Event, false) else {
            error!("No event buffer for the hardware error event");
            return;
        };
        let event = packet::hardware_error_event(HW_ERR_H4_SYNC_LOSS);
        if buf.append(&event) < event.len() {
            error!("Hardware error event does not fit an event buffer");
            return;
        }

        if let Err(e) = self.dispatch(buf, Direction::ControllerToHost) {
            error!("Hardware error event not delivered: {}", e);
        }
    }
}

/// Frame length declared by the header of `buf`
///
/// The transmit length always comes from the frame itself.
fn wire_len(buf: &HciBuffer) -> Result<usize> {
    let pkt_type = buf.pkt_type();
    let mut hdr = [0u8; HCI_MAX_HDR_LEN];
    let n = buf.copy_to(0, &mut hdr);

    let len = packet::frame_len(pkt_type, &hdr[..n]).ok_or_else(|| {
        TransportError::InvalidFrame(format!("{} frame shorter than its header", pkt_type))
    })?;
    if len > buf.len() {
        return Err(TransportError::InvalidFrame(format!(
            "{} frame declares {} bytes but holds {}",
            pkt_type,
            len,
            buf.len()
        )));
    }
    Ok(len)
}

fn trace_frame(what: &str, buf: &HciBuffer, len: usize) {
    if log_enabled!(Level::Trace) {
        let bytes = buf.to_vec();
        trace!(
            "{} {}: {}",
            what,
            buf.pkt_type(),
            hex::encode(&bytes[..len.min(bytes.len())])
        );
    }
}

enum Driver {
    PassThrough,
    Uart(UartTransport),
    UartDma(UartDmaTransport),
}

/// HCI transport instance
///
/// Created with [`init`](Self::init) and torn down with
/// [`deinit`](Self::deinit) or by dropping it.
pub struct HciTransport {
    router: Arc<Router>,
    driver: Option<Driver>,
}

impl HciTransport {
    /// Bring the transport up
    ///
    /// # Arguments
    ///
    /// * `config` - Backend, role and pool sizes
    /// * `allocator` - Source of every frame buffer the transport creates
    /// * `controller` - Local controller, used when frames are routed to it
    /// * `hal` - Hardware for the configured backend
    /// * `host_receiver` - Local host callback, may be registered later
    ///
    /// # Errors
    ///
    /// `BackendMismatch` if `hal` is for a different backend, `InvalidConfig`
    /// for unusable pool sizes, `Io` if a driver task cannot be spawned.
    pub fn init(
        config: TransportConfig,
        allocator: Arc<dyn HciAllocator>,
        controller: Arc<dyn Controller>,
        hal: TransportHal,
        host_receiver: Option<HostReceiver>,
    ) -> Result<Self> {
        config.validate()?;
        if hal.backend() != config.backend {
            return Err(TransportError::BackendMismatch);
        }

        let (queue, drain) = tx_queue(config.buffers.tx_queue_capacity());
        let signal = Arc::new(Semaphore::new());
        let router = Arc::new(Router {
            role: config.role,
            backend: config.backend,
            allocator: Arc::clone(&allocator),
            controller,
            host: RwLock::new(host_receiver.map(SharedReceiver::from)),
            tx: (config.backend != Backend::PassThrough).then_some(queue),
            signal: Arc::clone(&signal),
        });

        let sink: Arc<dyn TransportSink> = router.clone();
        let parser = || H4Parser::new(Arc::clone(&allocator), config.role, frame_callback(Arc::clone(&sink)));

        let driver = match hal {
            TransportHal::PassThrough => Driver::PassThrough,
            TransportHal::Uart { rx, tx } => Driver::Uart(UartTransport::start(
                &config.uart,
                rx,
                tx,
                parser(),
                drain,
                Arc::clone(&sink),
                signal,
            )?),
            TransportHal::UartDma(engine) => Driver::UartDma(UartDmaTransport::start(
                &config.dma,
                engine,
                parser(),
                drain,
                Arc::clone(&sink),
                signal,
            )?),
        };

        info!(
            "HCI transport up: {:?} backend, {:?} role",
            config.backend, config.role
        );
        Ok(Self {
            router,
            driver: Some(driver),
        })
    }

    pub fn role(&self) -> Role {
        self.router.role
    }

    pub fn backend(&self) -> Backend {
        self.router.backend
    }

    pub fn is_running(&self) -> bool {
        self.driver.is_some()
    }

    /// Install or replace the local host callback
    ///
    /// May be called from inside the current receiver.
    pub fn register_host_receiver(&self, receiver: HostReceiver) {
        self.router.set_host_receiver(Some(receiver.into()));
    }

    /// Send a frame in `direction`
    ///
    /// Ownership of `buf` passes to the transport in every case; a frame that
    /// cannot be delivered is freed before the error is returned. Frames for
    /// the UART are queued with the length their header declares, trailing
    /// bytes are not sent.
    ///
    /// # Errors
    ///
    /// * `InvalidFrame` - Header missing or longer than the buffer
    /// * `ControllerDisabled` - Local controller not accepting frames
    /// * `NoReceiver` - No host callback registered
    /// * `Rejected` - The local receiver refused the frame
    /// * `PoolExhausted` - TX queue full
    pub fn send(&self, buf: HciBuffer, direction: Direction) -> Result<()> {
        if self.driver.is_none() {
            return Err(TransportError::NotRunning);
        }
        self.router.dispatch(buf, direction)
    }

    /// Copy `frame` into a buffer from the transport's allocator and send it
    pub fn send_frame(&self, pkt_type: PacketType, frame: &[u8], direction: Direction) -> Result<()> {
        let mut buf = acquire(&self.router.allocator, pkt_type, false)
            .ok_or(TransportError::AllocationFailed)?;
        if buf.append(frame) < frame.len() {
            return Err(TransportError::InvalidFrame(format!(
                "{} byte {} frame does not fit a buffer",
                frame.len(),
                pkt_type
            )));
        }
        self.send(buf, direction)
    }

    /// Frames waiting for the UART
    pub fn tx_pending(&self) -> usize {
        self.router.tx.as_ref().map_or(0, TxQueue::len)
    }

    /// DMA pool state, when running on the DMA backend
    pub fn dma(&self) -> Option<&Arc<DmaShared>> {
        match &self.driver {
            Some(Driver::UartDma(transport)) => Some(transport.shared()),
            _ => None,
        }
    }

    /// Stop the driver tasks and free everything still queued
    pub fn deinit(&mut self) {
        let Some(driver) = self.driver.take() else {
            return;
        };

        match driver {
            Driver::PassThrough => {}
            Driver::Uart(mut transport) => transport.shutdown(),
            Driver::UartDma(mut transport) => transport.shutdown(),
        }

        if let Some(queue) = &self.router.tx {
            let dropped = queue.flush();
            if dropped > 0 {
                debug!("Dropped {} queued frames", dropped);
            }
        }
        self.router.set_host_receiver(None);
        info!("HCI transport stopped");
    }
}

impl Drop for HciTransport {
    fn drop(&mut self) {
        self.deinit();
    }
}
