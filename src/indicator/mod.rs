use serde::Serialize;

#[cfg(target_os = "linux")]
pub mod gpio;
pub mod mock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorLed {
    Activity,
    ParkingState,
}

/// Side-effect only; the detector never reads an indicator back.
pub trait Indicator {
    fn set(&mut self, led: IndicatorLed, on: bool);

    fn all_off(&mut self) {
        self.set(IndicatorLed::Activity, false);
        self.set(IndicatorLed::ParkingState, false);
    }
}

impl<I: Indicator + ?Sized> Indicator for Box<I> {
    fn set(&mut self, led: IndicatorLed, on: bool) {
        (**self).set(led, on)
    }
}

/// Indicator for boards without LEDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullIndicator;

impl Indicator for NullIndicator {
    fn set(&mut self, _led: IndicatorLed, _on: bool) {}
}
