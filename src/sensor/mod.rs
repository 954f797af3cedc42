use crate::error::SensorFault;
use serde::Serialize;

pub mod mock;
#[cfg(target_os = "linux")]
pub mod qmc5883l;

/// Raw three-axis magnetometer reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MagVector {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl MagVector {
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }

    /// Decode six little-endian bytes ordered X, Y, Z.
    pub const fn from_le_bytes(data: [u8; 6]) -> Self {
        Self {
            x: i16::from_le_bytes([data[0], data[1]]),
            y: i16::from_le_bytes([data[2], data[3]]),
            z: i16::from_le_bytes([data[4], data[5]]),
        }
    }

    /// Sum of absolute per-axis differences, saturated to `u16`.
    pub fn deviation_from(&self, baseline: &MagVector) -> u16 {
        let total = (i32::from(self.x) - i32::from(baseline.x)).abs()
            + (i32::from(self.y) - i32::from(baseline.y)).abs()
            + (i32::from(self.z) - i32::from(baseline.z)).abs();
        u16::try_from(total).unwrap_or(u16::MAX)
    }
}

/// Magnetometer on an exclusively owned bus.
///
/// The bus is acquired right before a read and released right after; it is
/// never held across a control-loop sleep.
pub trait Magnetometer {
    fn acquire(&mut self) -> Result<(), SensorFault>;
    fn release(&mut self);
    fn power_on(&mut self) -> Result<(), SensorFault>;
    fn power_off(&mut self) -> Result<(), SensorFault>;
    fn read_vector(&mut self) -> Result<MagVector, SensorFault>;
    fn reset(&mut self) -> Result<(), SensorFault>;
}

impl<M: Magnetometer + ?Sized> Magnetometer for Box<M> {
    fn acquire(&mut self) -> Result<(), SensorFault> {
        (**self).acquire()
    }
    fn release(&mut self) {
        (**self).release()
    }
    fn power_on(&mut self) -> Result<(), SensorFault> {
        (**self).power_on()
    }
    fn power_off(&mut self) -> Result<(), SensorFault> {
        (**self).power_off()
    }
    fn read_vector(&mut self) -> Result<MagVector, SensorFault> {
        (**self).read_vector()
    }
    fn reset(&mut self) -> Result<(), SensorFault> {
        (**self).reset()
    }
}
