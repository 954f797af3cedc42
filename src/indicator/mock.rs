use crate::indicator::{Indicator, IndicatorLed};
use std::sync::{Arc, Mutex, MutexGuard};

/// Records every LED change. Clones share one log.
#[derive(Debug, Clone, Default)]
pub struct RecordingIndicator {
    log: Arc<Mutex<Vec<(IndicatorLed, bool)>>>,
}

impl RecordingIndicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(IndicatorLed, bool)> {
        self.lock().clone()
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Last state written for `led`, `false` if never touched.
    pub fn is_on(&self, led: IndicatorLed) -> bool {
        self.lock()
            .iter()
            .rev()
            .find(|(changed, _)| *changed == led)
            .map(|(_, on)| *on)
            .unwrap_or(false)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<(IndicatorLed, bool)>> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Indicator for RecordingIndicator {
    fn set(&mut self, led: IndicatorLed, on: bool) {
        self.lock().push((led, on));
    }
}
