//! HCI packet types and H4 framing helpers
//!
//! This module knows just enough about HCI headers to size a frame: which packet
//! indicators exist, how long each header is, and where the length field lives.
//! Command and event semantics are left to the layers above the transport.

use crate::hci::constants::*;
use byteorder::{ByteOrder, LittleEndian};
use std::convert::TryFrom;
use std::fmt;

/// HCI packet type carried by the H4 packet indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// HCI Command packet (host to controller)
    Command = HCI_COMMAND_PKT,
    /// HCI ACL data packet
    Acl = HCI_ACL_PKT,
    /// HCI Event packet (controller to host)
    Event = HCI_EVENT_PKT,
    /// HCI ISO data packet
    Iso = HCI_ISO_PKT,
}

impl PacketType {
    /// The H4 packet indicator octet
    pub fn tag(self) -> u8 {
        self as u8
    }

    /// Number of header bytes needed before the frame length is known
    ///
    /// LE Meta events need one more byte (the sub-event code) which the parser
    /// pulls separately once it has seen the event code.
    pub fn min_header_len(self) -> usize {
        match self {
            Self::Command => HCI_COMMAND_HDR_LEN,
            Self::Acl => HCI_ACL_HDR_LEN,
            Self::Event => HCI_EVENT_HDR_LEN,
            Self::Iso => HCI_ISO_HDR_LEN,
        }
    }
}

impl TryFrom<u8> for PacketType {
    type Error = u8;

    fn try_from(tag: u8) -> Result<Self, Self::Error> {
        match tag {
            HCI_COMMAND_PKT => Ok(Self::Command),
            HCI_ACL_PKT => Ok(Self::Acl),
            HCI_EVENT_PKT => Ok(Self::Event),
            HCI_ISO_PKT => Ok(Self::Iso),
            other => Err(other),
        }
    }
}

impl fmt::Display for PacketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "command",
            Self::Acl => "ACL",
            Self::Event => "event",
            Self::Iso => "ISO",
        };
        f.write_str(name)
    }
}

/// Compute the total frame length (header included, packet indicator excluded)
///
/// # Arguments
///
/// * `pkt_type` - The packet type the header belongs to
/// * `header` - At least `pkt_type.min_header_len()` header bytes
///
/// # Returns
///
/// The declared frame length, or `None` if `header` is too short
pub fn frame_len(pkt_type: PacketType, header: &[u8]) -> Option<usize> {
    if header.len() < pkt_type.min_header_len() {
        return None;
    }

    let len = match pkt_type {
        PacketType::Command => header[2] as usize + HCI_COMMAND_HDR_LEN,
        PacketType::Acl => LittleEndian::read_u16(&header[2..4]) as usize + HCI_ACL_HDR_LEN,
        PacketType::Iso => {
            (LittleEndian::read_u16(&header[2..4]) & HCI_ISO_LEN_MASK) as usize + HCI_ISO_HDR_LEN
        }
        PacketType::Event => header[1] as usize + HCI_EVENT_HDR_LEN,
    };

    Some(len)
}

/// Whether an LE Meta sub-event is allocated from the discardable event class
pub fn is_discardable_subevent(subevent: u8) -> bool {
    matches!(
        subevent,
        EVT_LE_ADVERTISING_REPORT | EVT_LE_DIRECT_ADVERTISING_REPORT | EVT_LE_EXT_ADVERTISING_REPORT
    )
}

/// Whether an outbound event should jump ahead of queued traffic
///
/// Command Complete and Command Status return flow-control credits to the host,
/// so they are sent before anything already waiting.
pub fn is_priority_event(event_code: u8) -> bool {
    event_code == EVT_CMD_COMPLETE || event_code == EVT_CMD_STATUS
}

/// Encode a frame for the wire by prefixing the H4 packet indicator
pub fn encode_frame(pkt_type: PacketType, frame: &[u8]) -> Vec<u8> {
    let mut packet = Vec::with_capacity(frame.len() + 1);
    packet.push(pkt_type.tag());
    packet.extend_from_slice(frame);
    packet
}

/// Build the bytes of an HCI Hardware Error event (without packet indicator)
pub fn hardware_error_event(hardware_code: u8) -> [u8; 3] {
    [EVT_HARDWARE_ERROR, 1, hardware_code]
}
