use crate::error::TransmitFault;
use serde::Serialize;
use tracing::info;

pub mod mock;
pub mod udp;

/// Parking-state report as handed to the transport. Encoding is the
/// transport's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ParkingReport {
    pub deviation: u16,
    pub occupied: bool,
    pub destination_address: u32,
}

pub trait Transmitter {
    fn send(&mut self, report: &ParkingReport) -> Result<(), TransmitFault>;
}

impl<T: Transmitter + ?Sized> Transmitter for Box<T> {
    fn send(&mut self, report: &ParkingReport) -> Result<(), TransmitFault> {
        (**self).send(report)
    }
}

/// Transport used when no concentrator is configured: reports only reach the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTransmitter;

impl Transmitter for LogTransmitter {
    fn send(&mut self, report: &ParkingReport) -> Result<(), TransmitFault> {
        info!(
            deviation = report.deviation,
            occupied = report.occupied,
            destination = report.destination_address,
            "Parking report"
        );
        Ok(())
    }
}
