use crate::error::SensorFault;
use crate::sensor::{MagVector, Magnetometer};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MockState {
    bus_available: bool,
    resting: MagVector,
    scripted: VecDeque<Result<MagVector, SensorFault>>,
    powered: bool,
    acquired: bool,
    reads: u32,
    resets: u32,
    acquisitions: u32,
}

/// Scripted magnetometer. Clones share the same script, so a test can keep a
/// handle after moving one into a detector.
#[derive(Debug, Clone)]
pub struct MockMagnetometer {
    state: Arc<Mutex<MockState>>,
}

impl MockMagnetometer {
    /// Sensor that always reads `resting` unless a scripted result is queued.
    pub fn resting_at(resting: MagVector) -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                bus_available: true,
                resting,
                ..MockState::default()
            })),
        }
    }

    pub fn unreachable() -> Self {
        let mock = Self::resting_at(MagVector::default());
        mock.set_bus_available(false);
        mock
    }

    pub fn push_reading(&self, vector: MagVector) {
        self.lock().scripted.push_back(Ok(vector));
    }

    pub fn push_fault(&self, reason: &str) {
        self.lock()
            .scripted
            .push_back(Err(SensorFault::Read(reason.to_string())));
    }

    pub fn set_resting(&self, resting: MagVector) {
        self.lock().resting = resting;
    }

    pub fn set_bus_available(&self, available: bool) {
        self.lock().bus_available = available;
    }

    pub fn reads(&self) -> u32 {
        self.lock().reads
    }

    pub fn resets(&self) -> u32 {
        self.lock().resets
    }

    pub fn acquisitions(&self) -> u32 {
        self.lock().acquisitions
    }

    pub fn is_powered(&self) -> bool {
        self.lock().powered
    }

    pub fn is_acquired(&self) -> bool {
        self.lock().acquired
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Magnetometer for MockMagnetometer {
    fn acquire(&mut self) -> Result<(), SensorFault> {
        let mut state = self.lock();
        if !state.bus_available {
            return Err(SensorFault::BusUnavailable("mock bus offline".to_string()));
        }
        state.acquired = true;
        state.acquisitions += 1;
        Ok(())
    }

    fn release(&mut self) {
        self.lock().acquired = false;
    }

    fn power_on(&mut self) -> Result<(), SensorFault> {
        self.lock().powered = true;
        Ok(())
    }

    fn power_off(&mut self) -> Result<(), SensorFault> {
        self.lock().powered = false;
        Ok(())
    }

    fn read_vector(&mut self) -> Result<MagVector, SensorFault> {
        let mut state = self.lock();
        state.reads += 1;
        match state.scripted.pop_front() {
            Some(result) => result,
            None => Ok(state.resting),
        }
    }

    fn reset(&mut self) -> Result<(), SensorFault> {
        self.lock().resets += 1;
        Ok(())
    }
}
