//! Control loop and sampling triggers.
//!
//! The periodic loop and the fast-cadence worker both sample through a
//! [`SamplingHandle`], which lets only one detection cycle run at a time.

use crate::clock::Clock;
use crate::detector::{DetectionSnapshot, ParkingDetector, ReportOutcome};
use crate::error::NodeError;
use crate::indicator::Indicator;
use crate::radio::Transmitter;
use crate::schedule::{Advice, ScheduleAdvisor};
use crate::sensor::{MagVector, Magnetometer};
use crate::state::NodeState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, TryLockError};
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, warn};

const STOP_POLL_STEP: Duration = Duration::from_millis(100);

pub struct SamplingHandle<M, T, I> {
    detector: Arc<Mutex<ParkingDetector<M, T, I>>>,
}

impl<M, T, I> Clone for SamplingHandle<M, T, I> {
    fn clone(&self) -> Self {
        Self {
            detector: Arc::clone(&self.detector),
        }
    }
}

impl<M, T, I> SamplingHandle<M, T, I>
where
    M: Magnetometer,
    T: Transmitter,
    I: Indicator,
{
    pub fn new(detector: ParkingDetector<M, T, I>) -> Self {
        Self {
            detector: Arc::new(Mutex::new(detector)),
        }
    }

    /// Waits for any in-flight sample to finish, then samples.
    pub fn sample_blocking(
        &self,
        report_time: bool,
    ) -> Result<(ReportOutcome, DetectionSnapshot), NodeError> {
        let mut detector = self.detector.lock().map_err(|_| NodeError::StateLock)?;
        run_sample(&mut detector, report_time)
    }

    /// Samples only if no other trigger is mid-sample.
    pub fn try_sample(
        &self,
        report_time: bool,
    ) -> Result<(ReportOutcome, DetectionSnapshot), NodeError> {
        let mut detector = match self.detector.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(NodeError::SampleInProgress),
            Err(TryLockError::Poisoned(_)) => return Err(NodeError::StateLock),
        };
        run_sample(&mut detector, report_time)
    }

    pub fn with_detector<R>(
        &self,
        f: impl FnOnce(&mut ParkingDetector<M, T, I>) -> R,
    ) -> Result<R, NodeError> {
        let mut detector = self.detector.lock().map_err(|_| NodeError::StateLock)?;
        Ok(f(&mut detector))
    }
}

fn run_sample<M, T, I>(
    detector: &mut ParkingDetector<M, T, I>,
    report_time: bool,
) -> Result<(ReportOutcome, DetectionSnapshot), NodeError>
where
    M: Magnetometer,
    T: Transmitter,
    I: Indicator,
{
    let outcome = detector.sample(report_time)?;
    Ok((outcome, detector.snapshot(outcome)))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleReport {
    pub advice: Advice,
    pub outcome: Option<ReportOutcome>,
    pub sleep: Duration,
}

pub struct ControlLoop<C, M, T, I> {
    clock: C,
    advisor: ScheduleAdvisor,
    sampler: SamplingHandle<M, T, I>,
    state: Arc<RwLock<NodeState>>,
    fallback_sleep: Duration,
}

impl<C, M, T, I> ControlLoop<C, M, T, I>
where
    C: Clock,
    M: Magnetometer,
    T: Transmitter,
    I: Indicator,
{
    pub fn new(
        clock: C,
        advisor: ScheduleAdvisor,
        sampler: SamplingHandle<M, T, I>,
        state: Arc<RwLock<NodeState>>,
        fallback_sleep: Duration,
    ) -> Self {
        Self {
            clock,
            advisor,
            sampler,
            state,
            fallback_sleep,
        }
    }

    pub fn sampler(&self) -> &SamplingHandle<M, T, I> {
        &self.sampler
    }

    pub fn advisor(&self) -> &ScheduleAdvisor {
        &self.advisor
    }

    /// LEDs off, magnetometer down, then calibrate. A failure here is fatal.
    pub fn startup(&mut self) -> Result<MagVector, NodeError> {
        let baseline = self.sampler.with_detector(|detector| {
            detector.indicator_mut().all_off();
            // Only the magnetometer is modeled on the shared bus, so it is the
            // only peripheral put into low power before calibration.
            if let Err(err) = detector.power_down_sensor() {
                warn!(error = %err, "Failed to power down magnetometer before calibration");
            }
            detector.calibrate()
        })??;

        let mut guard = self.state.write().map_err(|_| NodeError::StateLock)?;
        guard.set_baseline(baseline);
        Ok(baseline)
    }

    /// Asks the advisor what to do now and does it. Returns how long to
    /// sleep before the next cycle.
    pub fn run_cycle(&mut self) -> Result<CycleReport, NodeError> {
        let now = self.clock.now_unix();
        let advice = self.advisor.compute(now);
        match self.state.write() {
            Ok(mut guard) => guard.set_advice(advice, SystemTime::now()),
            Err(_) => warn!("Node state lock poisoned, advice not published"),
        }

        if advice.sleep_secs != 0 {
            return Ok(CycleReport {
                advice,
                outcome: None,
                sleep: Duration::from_secs(u64::from(advice.sleep_secs)),
            });
        }

        let (outcome, snapshot) = self.sampler.sample_blocking(self.advisor.is_report_time())?;
        debug!(outcome = ?outcome, "Detection cycle finished");
        publish_detection(&self.state, snapshot);

        Ok(CycleReport {
            advice,
            outcome: Some(outcome),
            sleep: self.fallback_sleep,
        })
    }

    /// Runs cycles until `stop` is set. The node itself never sets it; a
    /// failed cycle is logged and the loop carries on after the fallback sleep.
    pub fn run(&mut self, stop: &AtomicBool) {
        info!(
            fallback_sleep_secs = self.fallback_sleep.as_secs(),
            "Control loop running"
        );
        while !stop.load(Ordering::Relaxed) {
            let sleep = match self.run_cycle() {
                Ok(report) => report.sleep,
                Err(err) => {
                    warn!(error = %err, "Control cycle failed");
                    self.fallback_sleep
                }
            };
            sleep_with_stop(sleep, stop);
        }
        info!("Control loop stopped");
    }
}

/// Status publishing never blocks detection; failures are only logged.
fn publish_detection(state: &Arc<RwLock<NodeState>>, snapshot: DetectionSnapshot) {
    let result = match state.write() {
        Ok(mut guard) => guard.set_detection(snapshot, SystemTime::now()),
        Err(_) => Err(NodeError::StateLock),
    };
    if let Err(err) = result {
        warn!(error = %err, "Failed to publish detection");
    }
}

/// Temporary faster sampling requested out of band, e.g. by a button.
#[derive(Debug)]
pub struct FastCadence {
    interval: Duration,
    timeout: Duration,
    active_until: Mutex<Option<Instant>>,
}

impl FastCadence {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            active_until: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts (or restarts) fast sampling until `now + timeout`.
    pub fn request(&self, now: Instant) -> Result<Instant, NodeError> {
        let until = now + self.timeout;
        let mut guard = self.active_until.lock().map_err(|_| NodeError::StateLock)?;
        *guard = Some(until);
        info!(timeout_secs = self.timeout.as_secs(), "Fast cadence requested");
        Ok(until)
    }

    pub fn cancel(&self) -> Result<(), NodeError> {
        let mut guard = self.active_until.lock().map_err(|_| NodeError::StateLock)?;
        if guard.take().is_some() {
            info!("Fast cadence cancelled");
        }
        Ok(())
    }

    /// Time left in fast mode; reverts to normal cadence once expired.
    pub fn remaining(&self, now: Instant) -> Result<Option<Duration>, NodeError> {
        let mut guard = self.active_until.lock().map_err(|_| NodeError::StateLock)?;
        let active_until = *guard;
        match active_until {
            Some(until) if until > now => Ok(Some(until - now)),
            Some(_) => {
                *guard = None;
                info!("Fast cadence timed out");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    pub fn is_active(&self, now: Instant) -> Result<bool, NodeError> {
        Ok(self.remaining(now)?.is_some())
    }
}

/// One fast-cadence tick: samples if fast mode is active and no other
/// sample is running. Returns the outcome when a sample was taken.
pub fn fast_cadence_tick<M, T, I>(
    cadence: &FastCadence,
    sampler: &SamplingHandle<M, T, I>,
    state: &Arc<RwLock<NodeState>>,
    now: Instant,
) -> Result<Option<ReportOutcome>, NodeError>
where
    M: Magnetometer,
    T: Transmitter,
    I: Indicator,
{
    if !cadence.is_active(now)? {
        return Ok(None);
    }
    let report_time = match state.read() {
        Ok(guard) => guard.is_report_time(),
        Err(_) => {
            warn!("Node state lock poisoned, sampling outside the report window");
            false
        }
    };
    match sampler.try_sample(report_time) {
        Ok((outcome, snapshot)) => {
            publish_detection(state, snapshot);
            Ok(Some(outcome))
        }
        Err(NodeError::SampleInProgress) => {
            debug!("Skipping fast cadence sample, detector busy");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

pub fn spawn_fast_cadence_thread<M, T, I>(
    cadence: Arc<FastCadence>,
    sampler: SamplingHandle<M, T, I>,
    state: Arc<RwLock<NodeState>>,
    stop: Arc<AtomicBool>,
) -> std::thread::JoinHandle<()>
where
    M: Magnetometer + Send + 'static,
    T: Transmitter + Send + 'static,
    I: Indicator + Send + 'static,
{
    std::thread::spawn(move || {
        while !stop.load(Ordering::Relaxed) {
            match fast_cadence_tick(&cadence, &sampler, &state, Instant::now()) {
                Ok(Some(_)) => sleep_with_stop(cadence.interval(), &stop),
                Ok(None) => std::thread::sleep(STOP_POLL_STEP),
                Err(err) => {
                    warn!(error = %err, "Fast cadence sample failed");
                    sleep_with_stop(cadence.interval(), &stop);
                }
            }
        }
    })
}

fn sleep_with_stop(duration: Duration, stop: &AtomicBool) {
    let mut slept = Duration::ZERO;
    while slept < duration {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        let step = STOP_POLL_STEP.min(duration - slept);
        std::thread::sleep(step);
        slept += step;
    }
}
