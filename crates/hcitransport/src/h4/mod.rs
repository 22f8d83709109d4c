//! H4 framing
//!
//! This module turns a UART byte stream into typed HCI frames:
//! - [`parser`]: the incremental framing state machine
//! - [`alloc`]: the pluggable buffer allocation contract
//! - [`buffer`]: frame storage and the owned buffer handle

pub mod alloc;
pub mod buffer;
pub mod parser;


pub use alloc::{acquire, HciAllocator, PoolAllocator};
pub use buffer::{BlockPool, FrameStorage, HciBuffer};
pub use parser::{FrameCallback, H4Error, H4ErrorKind, H4Parser, H4State};
