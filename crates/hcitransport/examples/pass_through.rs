//! Example: Pass-through transport
//!
//! This example wires a host callback and a toy controller to a pass-through
//! transport, sends an HCI Reset and answers it with Command Complete.

use hcitransport::hci::constants::EVT_CMD_COMPLETE;
use hcitransport::{
    Backend, Controller, Direction, HciBuffer, HciTransport, HostReceiver, PacketType,
    PoolAllocator, Role, TransportConfig, TransportHal,
};
use std::sync::Arc;

struct PrintingController;

impl Controller for PrintingController {
    fn is_enabled(&self) -> bool {
        true
    }

    fn ingest_command(&self, buf: HciBuffer) -> Result<(), HciBuffer> {
        println!("Controller got command: {:02x?}", buf.to_vec());
        Ok(())
    }

    fn ingest_acl(&self, buf: HciBuffer) -> Result<(), HciBuffer> {
        println!("Controller got {} bytes of ACL data", buf.len());
        Ok(())
    }

    fn ingest_iso(&self, buf: HciBuffer) -> Result<(), HciBuffer> {
        println!("Controller got {} bytes of ISO data", buf.len());
        Ok(())
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = TransportConfig::new(Backend::PassThrough, Role::Host);
    let allocator = PoolAllocator::new(&config.buffers);
    let host: HostReceiver = Box::new(|pkt_type, buf| {
        println!("Host got {}: {:02x?}", pkt_type, buf.to_vec());
        Ok(())
    });

    let transport = HciTransport::init(
        config,
        allocator,
        Arc::new(PrintingController),
        TransportHal::PassThrough,
        Some(host),
    )?;

    // Send a Reset command
    println!("Sending HCI Reset command...");
    transport.send_frame(PacketType::Command, &[0x03, 0x0C, 0x00], Direction::HostToController)?;

    println!("Answering with Command Complete...");
    transport.send_frame(
        PacketType::Event,
        &[EVT_CMD_COMPLETE, 4, 0x01, 0x03, 0x0C, 0x00],
        Direction::ControllerToHost,
    )?;

    Ok(())
}
