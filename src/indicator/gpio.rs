use crate::error::NodeError;
use crate::indicator::{Indicator, IndicatorLed};
use rppal::gpio::{Gpio, OutputPin};

/// Active-high LEDs on two BCM GPIO pins.
pub struct GpioIndicator {
    activity: OutputPin,
    parking_state: OutputPin,
}

impl GpioIndicator {
    pub fn new(activity_pin: u8, parking_state_pin: u8) -> Result<Self, NodeError> {
        let gpio = Gpio::new().map_err(|err| NodeError::Gpio(err.to_string()))?;
        let activity = gpio
            .get(activity_pin)
            .map_err(|err| NodeError::Gpio(format!("pin {activity_pin}: {err}")))?
            .into_output_low();
        let parking_state = gpio
            .get(parking_state_pin)
            .map_err(|err| NodeError::Gpio(format!("pin {parking_state_pin}: {err}")))?
            .into_output_low();
        Ok(Self {
            activity,
            parking_state,
        })
    }
}

impl Indicator for GpioIndicator {
    fn set(&mut self, led: IndicatorLed, on: bool) {
        let pin = match led {
            IndicatorLed::Activity => &mut self.activity,
            IndicatorLed::ParkingState => &mut self.parking_state,
        };
        if on {
            pin.set_high();
        } else {
            pin.set_low();
        }
    }
}
