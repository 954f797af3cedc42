use crate::error::TransmitFault;
use crate::radio::{ParkingReport, Transmitter};
use std::net::{SocketAddr, UdpSocket};
use tracing::debug;

/// Sends each report as one JSON datagram to the concentrator.
#[derive(Debug)]
pub struct UdpTransmitter {
    socket: UdpSocket,
    concentrator: SocketAddr,
}

impl UdpTransmitter {
    pub fn new(concentrator: SocketAddr) -> Result<Self, TransmitFault> {
        let bind_addr: SocketAddr = if concentrator.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        } else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = UdpSocket::bind(bind_addr).map_err(|err| TransmitFault::Link(err.to_string()))?;
        Ok(Self {
            socket,
            concentrator,
        })
    }

    pub fn concentrator(&self) -> SocketAddr {
        self.concentrator
    }
}

pub fn encode_report(report: &ParkingReport) -> Result<Vec<u8>, TransmitFault> {
    serde_json::to_vec(report).map_err(|err| TransmitFault::Encode(err.to_string()))
}

impl Transmitter for UdpTransmitter {
    fn send(&mut self, report: &ParkingReport) -> Result<(), TransmitFault> {
        let payload = encode_report(report)?;
        let written = self
            .socket
            .send_to(&payload, self.concentrator)
            .map_err(|err| TransmitFault::Link(err.to_string()))?;
        debug!(
            bytes = written,
            concentrator = %self.concentrator,
            "Report datagram sent"
        );
        Ok(())
    }
}
