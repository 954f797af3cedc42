use crate::detector::DetectionSnapshot;
use crate::error::NodeError;
use crate::schedule::Advice;
use crate::sensor::MagVector;
use std::time::SystemTime;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviceRecord {
    pub advice: Advice,
    pub timestamp: SystemTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectionRecord {
    pub snapshot: DetectionSnapshot,
    pub timestamp: SystemTime,
}

/// What the node last decided, shared between the control loop, the fast
/// cadence worker and the status API.
#[derive(Debug)]
pub struct NodeState {
    baseline: Option<MagVector>,
    advice: Option<AdviceRecord>,
    detection: Option<DetectionRecord>,
    detection_tx: watch::Sender<Option<DetectionRecord>>,
}

impl NodeState {
    pub fn new() -> Self {
        let (detection_tx, _detection_rx) = watch::channel(None);
        Self {
            baseline: None,
            advice: None,
            detection: None,
            detection_tx,
        }
    }

    pub fn baseline(&self) -> Option<MagVector> {
        self.baseline
    }

    pub fn set_baseline(&mut self, baseline: MagVector) {
        self.baseline = Some(baseline);
    }

    pub fn advice(&self) -> Option<&AdviceRecord> {
        self.advice.as_ref()
    }

    pub fn set_advice(&mut self, advice: Advice, timestamp: SystemTime) {
        self.advice = Some(AdviceRecord { advice, timestamp });
    }

    /// Last report-window flag computed by the schedule advisor.
    pub fn is_report_time(&self) -> bool {
        self.advice
            .map(|record| record.advice.is_report_time)
            .unwrap_or(false)
    }

    pub fn detection(&self) -> Option<&DetectionRecord> {
        self.detection.as_ref()
    }

    pub fn subscribe_detection(&self) -> watch::Receiver<Option<DetectionRecord>> {
        self.detection_tx.subscribe()
    }

    pub fn set_detection(
        &mut self,
        snapshot: DetectionSnapshot,
        timestamp: SystemTime,
    ) -> Result<(), NodeError> {
        let record = DetectionRecord {
            snapshot,
            timestamp,
        };
        self.detection = Some(record);
        // No subscribers is normal on a headless node.
        if self.detection_tx.receiver_count() == 0 {
            return Ok(());
        }
        self.detection_tx
            .send(Some(record))
            .map_err(|_| NodeError::WatchSend)
    }
}

impl Default for NodeState {
    fn default() -> Self {
        Self::new()
    }
}
