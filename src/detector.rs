//! Magnetometer-based parking detection.
//!
//! The detector compares each sample against a baseline captured at
//! calibration and reports occupancy changes over the radio. Every report
//! window also forces a report so the concentrator sees the node is alive.

use crate::error::{NodeError, SensorFault};
use crate::indicator::{Indicator, IndicatorLed};
use crate::radio::{ParkingReport, Transmitter};
use crate::sensor::{MagVector, Magnetometer};
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_THRESHOLD: u16 = 250;
pub const DEFAULT_DESTINATION_ADDRESS: u32 = 30007;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Occupancy {
    Vacant,
    Occupied,
}

impl Occupancy {
    /// Strictly above the threshold is occupied.
    pub fn from_deviation(deviation: u16, threshold: u16) -> Self {
        if deviation > threshold {
            Occupancy::Occupied
        } else {
            Occupancy::Vacant
        }
    }

    pub fn is_occupied(self) -> bool {
        matches!(self, Occupancy::Occupied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportOutcome {
    Reported,
    Unchanged,
    SensorUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    Uninitialized,
    Calibrated(MagVector),
}

/// Counts change events between reports.
///
/// The count is bumped before every report and cleared right after, so the
/// gate it exposes never holds a report back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DebounceCounter {
    count: u8,
}

impl DebounceCounter {
    /// Record a change event; returns whether the report may go out.
    pub fn register_change(&mut self) -> bool {
        self.count = self.count.saturating_add(1);
        self.count > 0
    }

    pub fn reset(&mut self) {
        self.count = 0;
    }

    pub fn count(&self) -> u8 {
        self.count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorSettings {
    pub threshold: u16,
    pub destination_address: u32,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            destination_address: DEFAULT_DESTINATION_ADDRESS,
        }
    }
}

/// Hardware settle and display delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectorTiming {
    pub calibration_settle: Duration,
    pub sample_settle: Duration,
    pub reset_settle: Duration,
    pub indicator_flash: Duration,
}

impl DetectorTiming {
    pub const fn immediate() -> Self {
        Self {
            calibration_settle: Duration::ZERO,
            sample_settle: Duration::ZERO,
            reset_settle: Duration::ZERO,
            indicator_flash: Duration::ZERO,
        }
    }
}

impl Default for DetectorTiming {
    fn default() -> Self {
        Self {
            calibration_settle: Duration::from_millis(200),
            sample_settle: Duration::from_millis(7),
            reset_settle: Duration::from_millis(100),
            indicator_flash: Duration::from_millis(75),
        }
    }
}

/// Result of the most recent detection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DetectionSnapshot {
    pub outcome: ReportOutcome,
    pub deviation: Option<u16>,
    pub occupancy: Option<Occupancy>,
    pub reports_sent: u64,
}

pub struct ParkingDetector<M, T, I> {
    sensor: M,
    transmitter: T,
    indicator: I,
    settings: DetectorSettings,
    timing: DetectorTiming,
    calibration: Calibration,
    occupancy: Option<Occupancy>,
    // None until the first report, so the first sample always announces itself.
    previous: Option<Occupancy>,
    debounce: DebounceCounter,
    last_deviation: Option<u16>,
    reports_sent: u64,
}

impl<M, T, I> ParkingDetector<M, T, I>
where
    M: Magnetometer,
    T: Transmitter,
    I: Indicator,
{
    pub fn new(
        sensor: M,
        transmitter: T,
        indicator: I,
        settings: DetectorSettings,
        timing: DetectorTiming,
    ) -> Self {
        Self {
            sensor,
            transmitter,
            indicator,
            settings,
            timing,
            calibration: Calibration::Uninitialized,
            occupancy: None,
            previous: None,
            debounce: DebounceCounter::default(),
            last_deviation: None,
            reports_sent: 0,
        }
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn baseline(&self) -> Option<MagVector> {
        match self.calibration {
            Calibration::Calibrated(baseline) => Some(baseline),
            Calibration::Uninitialized => None,
        }
    }

    pub fn occupancy(&self) -> Option<Occupancy> {
        self.occupancy
    }

    pub fn previous_occupancy(&self) -> Option<Occupancy> {
        self.previous
    }

    pub fn debounce(&self) -> DebounceCounter {
        self.debounce
    }

    pub fn reports_sent(&self) -> u64 {
        self.reports_sent
    }

    pub fn settings(&self) -> DetectorSettings {
        self.settings
    }

    pub fn indicator_mut(&mut self) -> &mut I {
        &mut self.indicator
    }

    /// Power the magnetometer down outside of a read cycle.
    pub fn power_down_sensor(&mut self) -> Result<(), SensorFault> {
        self.sensor.acquire()?;
        let result = self.sensor.power_off();
        self.sensor.release();
        result
    }

    /// Capture the baseline. Replaces any earlier calibration.
    pub fn calibrate(&mut self) -> Result<MagVector, NodeError> {
        self.indicator.set(IndicatorLed::ParkingState, true);
        let result = self.read_calibration();
        self.indicator.set(IndicatorLed::ParkingState, false);

        let baseline = result?;
        self.calibration = Calibration::Calibrated(baseline);
        info!(
            x = baseline.x,
            y = baseline.y,
            z = baseline.z,
            "Parking sensor calibrated"
        );
        Ok(baseline)
    }

    fn read_calibration(&mut self) -> Result<MagVector, NodeError> {
        self.sensor.acquire()?;
        let result = self.powered_read(self.timing.calibration_settle, false);
        self.sensor.release();
        Ok(result?)
    }

    /// One detection cycle. Must follow a successful `calibrate`.
    pub fn sample(&mut self, report_time: bool) -> Result<ReportOutcome, NodeError> {
        let Calibration::Calibrated(baseline) = self.calibration else {
            return Err(NodeError::NotCalibrated);
        };

        let vector = match self.acquire_sample() {
            Ok(vector) => vector,
            Err(fault) => {
                warn!(error = %fault, "Parking sensor unavailable");
                return Ok(ReportOutcome::SensorUnavailable);
            }
        };

        let deviation = vector.deviation_from(&baseline);
        let occupancy = Occupancy::from_deviation(deviation, self.settings.threshold);
        self.occupancy = Some(occupancy);
        self.last_deviation = Some(deviation);
        self.flash_state(occupancy);

        let changed = self.previous != Some(occupancy);
        debug!(
            deviation,
            occupied = occupancy.is_occupied(),
            changed,
            report_time,
            "Parking sample"
        );
        if !(changed || report_time) {
            return Ok(ReportOutcome::Unchanged);
        }

        if self.debounce.register_change() || report_time {
            self.transmit(deviation, occupancy);
            self.previous = Some(occupancy);
            self.debounce.reset();
        }
        Ok(ReportOutcome::Reported)
    }

    pub fn snapshot(&self, outcome: ReportOutcome) -> DetectionSnapshot {
        DetectionSnapshot {
            outcome,
            deviation: self.last_deviation,
            occupancy: self.occupancy,
            reports_sent: self.reports_sent,
        }
    }

    fn acquire_sample(&mut self) -> Result<MagVector, SensorFault> {
        self.sensor.acquire()?;
        let result = self.powered_read(self.timing.sample_settle, true);
        self.sensor.release();
        result
    }

    /// Power on, read with one reset-and-retry, power off.
    fn powered_read(
        &mut self,
        settle: Duration,
        signal_retry: bool,
    ) -> Result<MagVector, SensorFault> {
        self.sensor.power_on()?;
        pause(settle);
        let result = match self.sensor.read_vector() {
            Ok(vector) => Ok(vector),
            Err(fault) => {
                warn!(error = %fault, "Magnetometer read failed, resetting");
                if signal_retry {
                    self.indicator.set(IndicatorLed::ParkingState, true);
                    self.indicator.set(IndicatorLed::Activity, true);
                }
                let retried = match self.sensor.reset() {
                    Ok(()) => {
                        pause(self.timing.reset_settle);
                        self.sensor.read_vector()
                    }
                    Err(reset_fault) => Err(reset_fault),
                };
                if signal_retry {
                    self.indicator.all_off();
                }
                retried
            }
        };
        if let Err(fault) = self.sensor.power_off() {
            warn!(error = %fault, "Failed to power off magnetometer");
        }
        result
    }

    fn flash_state(&mut self, occupancy: Occupancy) {
        let led = match occupancy {
            Occupancy::Occupied => IndicatorLed::ParkingState,
            Occupancy::Vacant => IndicatorLed::Activity,
        };
        self.indicator.set(led, true);
        pause(self.timing.indicator_flash);
        self.indicator.all_off();
    }

    fn transmit(&mut self, deviation: u16, occupancy: Occupancy) {
        let report = ParkingReport {
            deviation,
            occupied: occupancy.is_occupied(),
            destination_address: self.settings.destination_address,
        };
        if let Err(err) = self.transmitter.send(&report) {
            warn!(error = %err, "Parking report transmit failed");
        }
        self.reports_sent += 1;
        info!(
            deviation,
            occupied = report.occupied,
            destination = report.destination_address,
            "Parking report sent"
        );
    }
}

fn pause(duration: Duration) {
    if !duration.is_zero() {
        std::thread::sleep(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicator::mock::RecordingIndicator;
    use crate::radio::mock::RecordingTransmitter;
    use crate::sensor::mock::MockMagnetometer;

    type TestDetector = ParkingDetector<MockMagnetometer, RecordingTransmitter, RecordingIndicator>;

    struct Fixture {
        detector: TestDetector,
        sensor: MockMagnetometer,
        radio: RecordingTransmitter,
        leds: RecordingIndicator,
    }

    fn fixture(baseline: MagVector) -> Fixture {
        let sensor = MockMagnetometer::resting_at(baseline);
        let radio = RecordingTransmitter::new();
        let leds = RecordingIndicator::new();
        let detector = ParkingDetector::new(
            sensor.clone(),
            radio.clone(),
            leds.clone(),
            DetectorSettings::default(),
            DetectorTiming::immediate(),
        );
        Fixture {
            detector,
            sensor,
            radio,
            leds,
        }
    }

    fn calibrated(baseline: MagVector) -> Fixture {
        let mut fixture = fixture(baseline);
        fixture.detector.calibrate().expect("calibration succeeds");
        fixture
    }

    #[test]
    fn threshold_comparison_is_strict() {
        assert_eq!(Occupancy::from_deviation(250, 250), Occupancy::Vacant);
        assert_eq!(Occupancy::from_deviation(251, 250), Occupancy::Occupied);
        assert_eq!(Occupancy::from_deviation(0, 0), Occupancy::Vacant);
        assert_eq!(Occupancy::from_deviation(u16::MAX, 250), Occupancy::Occupied);
    }

    #[test]
    fn sample_before_calibration_fails_fast() {
        let mut fixture = fixture(MagVector::default());

        let result = fixture.detector.sample(false);

        assert!(matches!(result, Err(NodeError::NotCalibrated)));
        assert_eq!(fixture.sensor.reads(), 0);
        assert_eq!(fixture.radio.count(), 0);
    }

    #[test]
    fn calibration_stores_baseline_and_powers_down() {
        let mut fixture = fixture(MagVector::new(12, -7, 40));

        let baseline = fixture.detector.calibrate().expect("calibration succeeds");

        assert_eq!(baseline, MagVector::new(12, -7, 40));
        assert_eq!(
            fixture.detector.calibration(),
            Calibration::Calibrated(baseline)
        );
        assert!(!fixture.sensor.is_powered());
        assert!(!fixture.sensor.is_acquired());
        assert!(!fixture.leds.is_on(IndicatorLed::ParkingState));
    }

    #[test]
    fn calibration_retries_once_after_fault() {
        let mut fixture = fixture(MagVector::new(1, 2, 3));
        fixture.sensor.push_fault("glitch");

        let baseline = fixture.detector.calibrate().expect("retry succeeds");

        assert_eq!(baseline, MagVector::new(1, 2, 3));
        assert_eq!(fixture.sensor.resets(), 1);
    }

    #[test]
    fn calibration_fails_when_bus_unreachable() {
        let sensor = MockMagnetometer::unreachable();
        let mut detector = ParkingDetector::new(
            sensor,
            RecordingTransmitter::new(),
            RecordingIndicator::new(),
            DetectorSettings::default(),
            DetectorTiming::immediate(),
        );

        let result = detector.calibrate();

        assert!(matches!(result, Err(NodeError::SensorUnavailable(_))));
        assert_eq!(detector.calibration(), Calibration::Uninitialized);
    }

    #[test]
    fn first_sample_reports_then_unchanged() {
        let mut fixture = calibrated(MagVector::default());

        assert_eq!(fixture.detector.sample(false).ok(), Some(ReportOutcome::Reported));
        assert_eq!(fixture.detector.sample(false).ok(), Some(ReportOutcome::Unchanged));

        let reports = fixture.radio.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(
            reports[0],
            ParkingReport {
                deviation: 0,
                occupied: false,
                destination_address: DEFAULT_DESTINATION_ADDRESS,
            }
        );
    }

    #[test]
    fn car_arrival_is_reported_once() {
        let mut fixture = calibrated(MagVector::new(0, 0, 0));
        fixture.sensor.set_resting(MagVector::new(100, 100, 100));

        assert_eq!(fixture.detector.sample(false).ok(), Some(ReportOutcome::Reported));
        assert_eq!(fixture.detector.occupancy(), Some(Occupancy::Occupied));
        assert_eq!(fixture.detector.sample(false).ok(), Some(ReportOutcome::Unchanged));

        let reports = fixture.radio.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].deviation, 300);
        assert!(reports[0].occupied);
    }

    #[test]
    fn departure_after_arrival_is_reported() {
        let mut fixture = calibrated(MagVector::default());
        fixture.sensor.push_reading(MagVector::new(200, 0, 100));
        fixture.sensor.push_reading(MagVector::new(200, 0, 100));
        fixture.sensor.push_reading(MagVector::new(5, 5, 5));

        let outcomes: Vec<_> = (0..3)
            .map(|_| fixture.detector.sample(false).ok())
            .collect();

        assert_eq!(
            outcomes,
            vec![
                Some(ReportOutcome::Reported),
                Some(ReportOutcome::Unchanged),
                Some(ReportOutcome::Reported),
            ]
        );
        assert_eq!(fixture.detector.previous_occupancy(), Some(Occupancy::Vacant));
        assert_eq!(fixture.detector.reports_sent(), 2);
    }

    #[test]
    fn report_window_forces_report_without_change() {
        let mut fixture = calibrated(MagVector::default());
        fixture.detector.sample(false).expect("first sample");

        let outcome = fixture.detector.sample(true).expect("report window sample");

        assert_eq!(outcome, ReportOutcome::Reported);
        assert_eq!(fixture.radio.count(), 2);
        assert_eq!(fixture.detector.debounce().count(), 0);
    }

    #[test]
    fn retry_after_single_fault_matches_direct_read() {
        let mut direct = calibrated(MagVector::default());
        direct.sensor.push_reading(MagVector::new(90, 90, 90));
        let mut retried = calibrated(MagVector::default());
        retried.sensor.push_fault("noise");
        retried.sensor.push_reading(MagVector::new(90, 90, 90));

        let direct_outcome = direct.detector.sample(false).expect("direct sample");
        let retried_outcome = retried.detector.sample(false).expect("retried sample");

        assert_eq!(direct_outcome, retried_outcome);
        assert_eq!(direct.radio.reports(), retried.radio.reports());
        assert_eq!(retried.sensor.resets(), 1);
        assert_eq!(retried.detector.occupancy(), Some(Occupancy::Occupied));
    }

    #[test]
    fn retry_lights_both_indicators_then_clears() {
        let mut fixture = calibrated(MagVector::default());
        fixture.leds.clear();
        fixture.sensor.push_fault("noise");

        fixture.detector.sample(false).expect("sample");

        let events = fixture.leds.events();
        assert_eq!(
            &events[..2],
            &[(IndicatorLed::ParkingState, true), (IndicatorLed::Activity, true)]
        );
        assert!(!fixture.leds.is_on(IndicatorLed::ParkingState));
        assert!(!fixture.leds.is_on(IndicatorLed::Activity));
    }

    #[test]
    fn persistent_fault_leaves_state_untouched() {
        let mut fixture = calibrated(MagVector::new(3, 3, 3));
        fixture.sensor.set_resting(MagVector::new(400, 0, 0));
        fixture.detector.sample(false).expect("first sample");
        let baseline = fixture.detector.baseline();
        let occupancy = fixture.detector.occupancy();
        let previous = fixture.detector.previous_occupancy();
        let debounce = fixture.detector.debounce();

        fixture.sensor.push_fault("first");
        fixture.sensor.push_fault("second");
        let outcome = fixture.detector.sample(true).expect("sample");

        assert_eq!(outcome, ReportOutcome::SensorUnavailable);
        assert_eq!(fixture.detector.baseline(), baseline);
        assert_eq!(fixture.detector.occupancy(), occupancy);
        assert_eq!(fixture.detector.previous_occupancy(), previous);
        assert_eq!(fixture.detector.debounce(), debounce);
        assert_eq!(fixture.radio.count(), 1);
        assert!(!fixture.sensor.is_powered());
    }

    #[test]
    fn unreachable_bus_reports_sensor_unavailable() {
        let mut fixture = calibrated(MagVector::default());
        fixture.sensor.set_bus_available(false);

        let outcome = fixture.detector.sample(false).expect("sample");

        assert_eq!(outcome, ReportOutcome::SensorUnavailable);
        assert_eq!(fixture.detector.occupancy(), None);
        assert_eq!(fixture.radio.count(), 0);
    }

    #[test]
    fn transmit_failure_still_counts_as_reported() {
        let sensor = MockMagnetometer::resting_at(MagVector::default());
        let mut detector = ParkingDetector::new(
            sensor,
            RecordingTransmitter::failing(),
            RecordingIndicator::new(),
            DetectorSettings::default(),
            DetectorTiming::immediate(),
        );
        detector.calibrate().expect("calibration succeeds");

        assert_eq!(detector.sample(false).ok(), Some(ReportOutcome::Reported));
        assert_eq!(detector.sample(false).ok(), Some(ReportOutcome::Unchanged));
    }

    #[test]
    fn indicator_flash_reflects_occupancy() {
        let mut fixture = calibrated(MagVector::default());
        fixture.leds.clear();
        fixture.sensor.push_reading(MagVector::new(300, 0, 0));

        fixture.detector.sample(false).expect("sample");

        let events = fixture.leds.events();
        assert_eq!(events[0], (IndicatorLed::ParkingState, true));
        assert!(!fixture.leds.is_on(IndicatorLed::ParkingState));
    }

    #[test]
    fn debounce_counter_never_gates() {
        let mut counter = DebounceCounter::default();

        assert!(counter.register_change());
        assert_eq!(counter.count(), 1);
        counter.reset();
        assert_eq!(counter.count(), 0);
    }
}
