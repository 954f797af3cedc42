use crate::error::TransmitFault;
use crate::radio::{ParkingReport, Transmitter};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Sent {
    reports: Vec<ParkingReport>,
    fail: bool,
}

/// Keeps every report it is asked to send. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingTransmitter {
    sent: Arc<Mutex<Sent>>,
}

impl RecordingTransmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports are still recorded but `send` returns a link fault.
    pub fn failing() -> Self {
        let transmitter = Self::default();
        transmitter.lock().fail = true;
        transmitter
    }

    pub fn reports(&self) -> Vec<ParkingReport> {
        self.lock().reports.clone()
    }

    pub fn count(&self) -> usize {
        self.lock().reports.len()
    }

    fn lock(&self) -> MutexGuard<'_, Sent> {
        self.sent
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transmitter for RecordingTransmitter {
    fn send(&mut self, report: &ParkingReport) -> Result<(), TransmitFault> {
        let mut sent = self.lock();
        sent.reports.push(*report);
        if sent.fail {
            Err(TransmitFault::Link("mock link down".to_string()))
        } else {
            Ok(())
        }
    }
}
