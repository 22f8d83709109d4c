//! Bluetooth HCI (Host Controller Interface) packet definitions
//!
//! This module provides the packet-level knowledge used by the H4 transport.

pub mod constants;
pub mod packet;

#[cfg(test)]
mod tests;

pub use packet::{encode_frame, frame_len, PacketType};
