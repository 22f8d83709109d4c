//! HCI protocol constants
//!
//! This module contains the constants the transport needs from the Bluetooth HCI
//! protocol: H4 packet indicators, header sizes and the few event codes that
//! influence framing or queueing.

// H4 packet indicators
pub const HCI_COMMAND_PKT: u8 = 0x01;
pub const HCI_ACL_PKT: u8 = 0x02;
pub const HCI_SCO_PKT: u8 = 0x03;
pub const HCI_EVENT_PKT: u8 = 0x04;
pub const HCI_ISO_PKT: u8 = 0x05;

// Header sizes (without the packet indicator)
pub const HCI_COMMAND_HDR_LEN: usize = 3;
pub const HCI_ACL_HDR_LEN: usize = 4;
pub const HCI_EVENT_HDR_LEN: usize = 2;
pub const HCI_ISO_HDR_LEN: usize = 4;

/// LE Meta events carry the sub-event code right after the event header
pub const HCI_LE_META_HDR_LEN: usize = HCI_EVENT_HDR_LEN + 1;

/// Largest header the framing state machine ever accumulates
pub const HCI_MAX_HDR_LEN: usize = 4;

// Maximum size of HCI command/event parameters
pub const HCI_MAX_PARAM_LEN: usize = 255;

/// ISO data load length occupies the low 15 bits; the top bit is reserved
pub const HCI_ISO_LEN_MASK: u16 = 0x7FFF;

// HCI Events
pub const EVT_CMD_COMPLETE: u8 = 0x0E;
pub const EVT_CMD_STATUS: u8 = 0x0F;
pub const EVT_HARDWARE_ERROR: u8 = 0x10;
pub const EVT_NUM_COMPLETED_PACKETS: u8 = 0x13;
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta Events
pub const EVT_LE_CONN_COMPLETE: u8 = 0x01;
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;
pub const EVT_LE_CONN_UPDATE_COMPLETE: u8 = 0x03;
pub const EVT_LE_DIRECT_ADVERTISING_REPORT: u8 = 0x0B;
pub const EVT_LE_EXT_ADVERTISING_REPORT: u8 = 0x0D;

/// Hardware code reported in the Hardware Error event raised on H4 sync loss
pub const HW_ERR_H4_SYNC_LOSS: u8 = 0x01;
