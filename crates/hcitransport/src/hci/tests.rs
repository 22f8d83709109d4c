//! Unit tests for HCI packet sizing and encoding

use super::constants::*;
use super::packet::*;
use std::convert::TryFrom;

#[test]
fn test_packet_type_tags() {
    assert_eq!(PacketType::try_from(0x01), Ok(PacketType::Command));
    assert_eq!(PacketType::try_from(0x02), Ok(PacketType::Acl));
    assert_eq!(PacketType::try_from(0x04), Ok(PacketType::Event));
    assert_eq!(PacketType::try_from(0x05), Ok(PacketType::Iso));

    // SCO is not carried by this transport
    assert_eq!(PacketType::try_from(HCI_SCO_PKT), Err(HCI_SCO_PKT));
    assert_eq!(PacketType::try_from(0x00), Err(0x00));
    assert_eq!(PacketType::try_from(0xFF), Err(0xFF));

    assert_eq!(PacketType::Iso.tag(), HCI_ISO_PKT);
}

#[test]
fn test_min_header_len() {
    assert_eq!(PacketType::Command.min_header_len(), 3);
    assert_eq!(PacketType::Acl.min_header_len(), 4);
    assert_eq!(PacketType::Iso.min_header_len(), 4);
    assert_eq!(PacketType::Event.min_header_len(), 2);
}

#[test]
fn test_frame_len() {
    // Reset: opcode 0x0C03, no parameters
    assert_eq!(frame_len(PacketType::Command, &[0x03, 0x0C, 0x00]), Some(3));
    assert_eq!(frame_len(PacketType::Command, &[0x01, 0x20, 0x08]), Some(11));

    // ACL: handle 0x0010, 2 data bytes
    assert_eq!(frame_len(PacketType::Acl, &[0x10, 0x00, 0x02, 0x00]), Some(6));
    assert_eq!(frame_len(PacketType::Acl, &[0x10, 0x00, 0x00, 0x01]), Some(260));

    // Command Complete with 4 parameter bytes
    assert_eq!(frame_len(PacketType::Event, &[EVT_CMD_COMPLETE, 4]), Some(6));

    // ISO ignores the reserved top bit
    assert_eq!(frame_len(PacketType::Iso, &[0x01, 0x00, 0x05, 0x80]), Some(9));
    assert_eq!(frame_len(PacketType::Iso, &[0x01, 0x00, 0xFF, 0xFF]), Some(0x7FFF + 4));

    // Too short
    assert_eq!(frame_len(PacketType::Acl, &[0x10, 0x00, 0x02]), None);
    assert_eq!(frame_len(PacketType::Event, &[EVT_CMD_COMPLETE]), None);
}

#[test]
fn test_event_classes() {
    assert!(is_priority_event(EVT_CMD_COMPLETE));
    assert!(is_priority_event(EVT_CMD_STATUS));
    assert!(!is_priority_event(EVT_LE_META_EVENT));
    assert!(!is_priority_event(EVT_NUM_COMPLETED_PACKETS));

    assert!(is_discardable_subevent(EVT_LE_ADVERTISING_REPORT));
    assert!(is_discardable_subevent(EVT_LE_EXT_ADVERTISING_REPORT));
    assert!(is_discardable_subevent(EVT_LE_DIRECT_ADVERTISING_REPORT));
    assert!(!is_discardable_subevent(EVT_LE_CONN_COMPLETE));
}

#[test]
fn test_encode_frame() {
    let packet = encode_frame(PacketType::Command, &[0x03, 0x0C, 0x00]);
    assert_eq!(packet, vec![HCI_COMMAND_PKT, 0x03, 0x0C, 0x00]);

    let event = hardware_error_event(HW_ERR_H4_SYNC_LOSS);
    assert_eq!(event, [EVT_HARDWARE_ERROR, 1, HW_ERR_H4_SYNC_LOSS]);
    assert_eq!(frame_len(PacketType::Event, &event), Some(event.len()));
}
