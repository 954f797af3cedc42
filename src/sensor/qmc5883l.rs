//! Minimal QMC5883L magnetometer driver over the Raspberry Pi I2C bus.

use crate::error::SensorFault;
use crate::sensor::{MagVector, Magnetometer};
use rppal::i2c::I2c;
use tracing::debug;

pub const DEFAULT_I2C_ADDRESS_7BIT: u8 = 0x0d;

const REG_DATA_X_LSB: u8 = 0x00;
const REG_STATUS: u8 = 0x06;
const REG_CONTROL_1: u8 = 0x09;
const REG_CONTROL_2: u8 = 0x0a;
const REG_SET_RESET_PERIOD: u8 = 0x0b;

const STATUS_DATA_READY: u8 = 0x01;
const STATUS_OVERFLOW: u8 = 0x02;

// Continuous mode, 200 Hz, 8 G range, 512x oversampling.
const CONTROL_1_CONTINUOUS: u8 = 0x1d;
const CONTROL_1_STANDBY: u8 = 0x00;
const CONTROL_2_SOFT_RESET: u8 = 0x80;

pub struct Qmc5883l {
    bus_id: u8,
    address: u8,
    i2c: Option<I2c>,
}

impl Qmc5883l {
    pub fn new(bus_id: u8, address: u8) -> Self {
        Self {
            bus_id,
            address,
            i2c: None,
        }
    }

    fn bus(&self) -> Result<&I2c, SensorFault> {
        self.i2c
            .as_ref()
            .ok_or_else(|| SensorFault::BusUnavailable("bus not acquired".to_string()))
    }

    fn write_register(&self, register: u8, value: u8) -> Result<(), SensorFault> {
        self.bus()?
            .smbus_write_byte(register, value)
            .map_err(|err| SensorFault::Control(format!("write {register:#04x}: {err}")))
    }
}

impl Magnetometer for Qmc5883l {
    fn acquire(&mut self) -> Result<(), SensorFault> {
        let mut i2c = I2c::with_bus(self.bus_id)
            .map_err(|err| SensorFault::BusUnavailable(err.to_string()))?;
        i2c.set_slave_address(u16::from(self.address))
            .map_err(|err| SensorFault::BusUnavailable(err.to_string()))?;
        self.i2c = Some(i2c);
        Ok(())
    }

    fn release(&mut self) {
        self.i2c = None;
    }

    fn power_on(&mut self) -> Result<(), SensorFault> {
        self.write_register(REG_SET_RESET_PERIOD, 0x01)?;
        self.write_register(REG_CONTROL_1, CONTROL_1_CONTINUOUS)
    }

    fn power_off(&mut self) -> Result<(), SensorFault> {
        self.write_register(REG_CONTROL_1, CONTROL_1_STANDBY)
    }

    fn read_vector(&mut self) -> Result<MagVector, SensorFault> {
        let bus = self.bus()?;
        let status = bus
            .smbus_read_byte(REG_STATUS)
            .map_err(|err| SensorFault::Read(format!("status: {err}")))?;
        if status & STATUS_DATA_READY == 0 {
            return Err(SensorFault::Read("data not ready".to_string()));
        }
        if status & STATUS_OVERFLOW != 0 {
            return Err(SensorFault::Read("measurement overflow".to_string()));
        }

        let mut raw = [0u8; 6];
        bus.block_read(REG_DATA_X_LSB, &mut raw)
            .map_err(|err| SensorFault::Read(format!("data: {err}")))?;
        let vector = MagVector::from_le_bytes(raw);
        debug!(x = vector.x, y = vector.y, z = vector.z, "Magnetometer sample");
        Ok(vector)
    }

    fn reset(&mut self) -> Result<(), SensorFault> {
        self.write_register(REG_CONTROL_2, CONTROL_2_SOFT_RESET)?;
        self.write_register(REG_SET_RESET_PERIOD, 0x01)?;
        self.write_register(REG_CONTROL_1, CONTROL_1_CONTINUOUS)
    }
}
