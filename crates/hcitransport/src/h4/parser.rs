//! H4 framing state machine
//!
//! [`H4Parser::feed`] takes byte chunks of any size and keeps its position
//! between calls. Within one call it moves through as many states as the input
//! allows, so a chunk holding several frames delivers all of them.
//!
//! The parser reports structured status only and never logs. What to do about
//! a sync loss is up to the caller.

use super::alloc::{self, HciAllocator};
use super::buffer::HciBuffer;
use crate::config::Role;
use crate::hci::constants::*;
use crate::hci::packet::{self, PacketType};
use std::convert::TryFrom;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Receives each completed frame
///
/// Returning `Ok` means the callback took ownership. Returning the buffer in
/// `Err` rejects the frame and the parser frees it.
pub type FrameCallback = Box<dyn FnMut(PacketType, HciBuffer) -> Result<(), HciBuffer> + Send>;

/// Parser position within the current frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum H4State {
    /// Expecting a packet indicator
    WaitType,
    /// Accumulating the header of the current packet type
    WaitHeader,
    /// Copying payload bytes into the frame buffer
    WaitPayload,
    /// Frame complete, about to be handed to the callback
    Completed,
}

/// Why a frame was abandoned
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum H4ErrorKind {
    #[error("unknown packet indicator 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("no {0} buffer available")]
    AllocationFailed(PacketType),

    #[error("{len} byte frame does not fit a {capacity} byte buffer")]
    FrameTooLong { len: usize, capacity: usize },

    #[error("payload append stopped after {appended} of {wanted} bytes")]
    PartialAppend { appended: usize, wanted: usize },

    #[error("no progress in state {0:?}")]
    Stalled(H4State),
}

/// Parser failure with the exact number of input bytes consumed by the call
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} ({consumed} bytes consumed)")]
pub struct H4Error {
    pub kind: H4ErrorKind,
    pub consumed: usize,
}

impl H4ErrorKind {
    /// Whether the byte stream can no longer be trusted to be aligned on a
    /// frame boundary
    pub fn is_sync_loss(&self) -> bool {
        matches!(self, H4ErrorKind::UnknownPacketType(_) | H4ErrorKind::Stalled(_))
    }
}

impl H4Error {
    pub fn is_sync_loss(&self) -> bool {
        self.kind.is_sync_loss()
    }
}

/// Outcome of one state handler
enum Step {
    /// The handler used `n` bytes and the next state may run
    Advance(usize),
    /// The handler used `n` bytes and ran out of input
    NeedMore(usize),
}

struct Fault {
    kind: H4ErrorKind,
    used: usize,
}

impl Fault {
    fn new(kind: H4ErrorKind, used: usize) -> Self {
        Self { kind, used }
    }
}

/// Incremental H4 parser
///
/// One parser belongs to one transport instance and is driven by one task.
pub struct H4Parser {
    allocator: Arc<dyn HciAllocator>,
    on_frame: FrameCallback,
    role: Role,
    state: H4State,
    pkt_type: PacketType,
    hdr: [u8; HCI_MAX_HDR_LEN],
    hdr_len: usize,
    min_hdr_len: usize,
    frame_len: usize,
    acc_len: usize,
    buf: Option<HciBuffer>,
}

impl H4Parser {
    /// Create a parser drawing buffers from `allocator`
    ///
    /// # Arguments
    ///
    /// * `allocator` - Source of frame buffers
    /// * `role` - In controller builds a rejected frame is fatal
    /// * `on_frame` - Receives every completed frame
    pub fn new(allocator: Arc<dyn HciAllocator>, role: Role, on_frame: FrameCallback) -> Self {
        Self {
            allocator,
            on_frame,
            role,
            state: H4State::WaitType,
            pkt_type: PacketType::Command,
            hdr: [0; HCI_MAX_HDR_LEN],
            hdr_len: 0,
            min_hdr_len: 0,
            frame_len: 0,
            acc_len: 0,
            buf: None,
        }
    }

    pub fn state(&self) -> H4State {
        self.state
    }

    /// True between frames
    pub fn is_idle(&self) -> bool {
        self.state == H4State::WaitType
    }

    /// Feed received bytes
    ///
    /// # Returns
    ///
    /// The number of bytes consumed, which is all of `data` unless an error is
    /// returned. On error the frame in progress is freed and
    /// [`H4Error::consumed`] tells how far the parser got.
    ///
    /// After a sync loss the parser is back in [`H4State::WaitType`]. After any
    /// other error the header was valid, so the parser stays in
    /// [`H4State::WaitPayload`] and skips the rest of the declared payload
    /// when fed again; feeding `&data[consumed..]` keeps the stream aligned.
    pub fn feed(&mut self, data: &[u8]) -> Result<usize, H4Error> {
        let mut consumed = 0;

        loop {
            let input = &data[consumed..];
            if input.is_empty() && self.state != H4State::Completed {
                break;
            }

            let before = self.state;
            let step = match self.state {
                H4State::WaitType => self.on_type(input),
                H4State::WaitHeader => self.on_header(input),
                H4State::WaitPayload => self.on_payload(input),
                H4State::Completed => Ok(self.on_completed()),
            };

            match step {
                Ok(Step::Advance(n)) => {
                    consumed += n;
                    if n == 0 && self.state == before {
                        self.reset();
                        return Err(H4Error {
                            kind: H4ErrorKind::Stalled(before),
                            consumed,
                        });
                    }
                }
                Ok(Step::NeedMore(n)) => {
                    consumed += n;
                    break;
                }
                Err(fault) => {
                    if fault.kind.is_sync_loss() {
                        self.reset();
                    } else {
                        self.skip_frame();
                    }
                    return Err(H4Error {
                        kind: fault.kind,
                        consumed: consumed + fault.used,
                    });
                }
            }
        }

        Ok(consumed)
    }

    /// Drop any partial frame and wait for the next packet indicator
    pub fn reset(&mut self) {
        self.buf = None;
        self.state = H4State::WaitType;
        self.hdr_len = 0;
        self.min_hdr_len = 0;
        self.frame_len = 0;
        self.acc_len = 0;
    }

    /// Free the frame in progress but keep counting its payload bytes
    fn skip_frame(&mut self) {
        self.buf = None;
        if self.acc_len >= self.frame_len {
            self.reset();
        } else {
            self.state = H4State::WaitPayload;
        }
    }

    fn on_type(&mut self, input: &[u8]) -> Result<Step, Fault> {
        let pkt_type = PacketType::try_from(input[0])
            .map_err(|tag| Fault::new(H4ErrorKind::UnknownPacketType(tag), 0))?;

        self.pkt_type = pkt_type;
        self.min_hdr_len = pkt_type.min_header_len();
        self.hdr_len = 0;
        self.state = H4State::WaitHeader;
        Ok(Step::Advance(1))
    }

    /// Copy header bytes until `min_hdr_len` are held, clipped to the input
    fn pull_header(&mut self, input: &[u8]) -> usize {
        let need = self.min_hdr_len.saturating_sub(self.hdr_len);
        let n = need.min(input.len());
        self.hdr[self.hdr_len..self.hdr_len + n].copy_from_slice(&input[..n]);
        self.hdr_len += n;
        n
    }

    fn on_header(&mut self, input: &[u8]) -> Result<Step, Fault> {
        let mut used = self.pull_header(input);
        if self.hdr_len < self.min_hdr_len {
            return Ok(Step::NeedMore(used));
        }

        let mut discardable = false;
        if self.pkt_type == PacketType::Event && self.hdr[0] == EVT_LE_META_EVENT && self.hdr[1] > 0 {
            // The sub-event code decides which buffer class to use
            if self.min_hdr_len < HCI_LE_META_HDR_LEN {
                self.min_hdr_len = HCI_LE_META_HDR_LEN;
                used += self.pull_header(&input[used..]);
                if self.hdr_len < self.min_hdr_len {
                    return Ok(Step::NeedMore(used));
                }
            }
            discardable = packet::is_discardable_subevent(self.hdr[2]);
        }

        let frame_len = packet::frame_len(self.pkt_type, &self.hdr[..self.hdr_len])
            .ok_or_else(|| Fault::new(H4ErrorKind::Stalled(H4State::WaitHeader), used))?;
        self.frame_len = frame_len;
        self.acc_len = self.hdr_len;

        match alloc::acquire(&self.allocator, self.pkt_type, discardable) {
            Some(mut buf) => {
                if let Some(capacity) = buf.storage().capacity() {
                    if frame_len > capacity {
                        return Err(Fault::new(
                            H4ErrorKind::FrameTooLong { len: frame_len, capacity },
                            used,
                        ));
                    }
                }

                let appended = buf.append(&self.hdr[..self.hdr_len]);
                if appended < self.hdr_len {
                    return Err(Fault::new(
                        H4ErrorKind::PartialAppend {
                            appended,
                            wanted: self.hdr_len,
                        },
                        used,
                    ));
                }
                self.buf = Some(buf);
            }
            // Out of discardable buffers: skip the frame but stay in sync
            None if discardable => self.buf = None,
            None => {
                return Err(Fault::new(H4ErrorKind::AllocationFailed(self.pkt_type), used));
            }
        }

        self.state = if self.acc_len >= self.frame_len {
            H4State::Completed
        } else {
            H4State::WaitPayload
        };

        Ok(Step::Advance(used))
    }

    fn on_payload(&mut self, input: &[u8]) -> Result<Step, Fault> {
        let remaining = self.frame_len - self.acc_len;
        let n = remaining.min(input.len());

        if let Some(buf) = self.buf.as_mut() {
            let appended = buf.append(&input[..n]);
            if appended < n {
                self.acc_len += appended;
                return Err(Fault::new(
                    H4ErrorKind::PartialAppend { appended, wanted: n },
                    appended,
                ));
            }
        }

        self.acc_len += n;
        if self.acc_len == self.frame_len {
            self.state = H4State::Completed;
            Ok(Step::Advance(n))
        } else {
            Ok(Step::NeedMore(n))
        }
    }

    fn on_completed(&mut self) -> Step {
        if let Some(buf) = self.buf.take() {
            if let Err(rejected) = (self.on_frame)(self.pkt_type, buf) {
                assert!(
                    self.role != Role::Controller,
                    "controller could not accept {} frame",
                    self.pkt_type
                );
                drop(rejected);
            }
        }

        self.reset();
        Step::Advance(0)
    }
}

impl fmt::Debug for H4Parser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("H4Parser")
            .field("state", &self.state)
            .field("role", &self.role)
            .field("pkt_type", &self.pkt_type)
            .field("hdr", &&self.hdr[..self.hdr_len])
            .field("frame_len", &self.frame_len)
            .field("acc_len", &self.acc_len)
            .finish()
    }
}
