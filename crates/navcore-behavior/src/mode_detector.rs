//! Mode detector: raw perception samples in, edge-triggered stage changes out.

use futures_util::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Raw perception sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sample {
    /// Stair detection level; anything above zero means a stair ahead.
    StairLevel(i8),
    /// Whether the tracked target has stopped moving.
    TargetStatic(bool),
}

/// A stage the behavior manager may react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageChange {
    StairDetected,
    TargetStatic,
}

#[derive(Debug, Default)]
pub struct ModeDetector {
    stair_detected: bool,
    target_static: bool,
}

impl ModeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one sample in.  A change is reported once on the rising edge and
    /// not again until the signal has fallen back.
    pub fn observe(&mut self, sample: Sample) -> Option<StageChange> {
        let (flag, now, change) = match sample {
            Sample::StairLevel(level) => {
                (&mut self.stair_detected, level > 0, StageChange::StairDetected)
            }
            Sample::TargetStatic(is_static) => {
                (&mut self.target_static, is_static, StageChange::TargetStatic)
            }
        };
        let rising = now && !*flag;
        *flag = now;
        if rising {
            debug!(?change, "stage change detected");
            Some(change)
        } else {
            None
        }
    }

    /// Turn a sample channel into a stream of stage changes.  The stream ends
    /// when every sender is dropped.
    pub fn stages(self, samples: mpsc::Receiver<Sample>) -> BoxStream<'static, StageChange> {
        stream::unfold((self, samples), |(mut detector, mut samples)| async move {
            while let Some(sample) = samples.recv().await {
                if let Some(change) = detector.observe(sample) {
                    return Some((change, (detector, samples)));
                }
            }
            None
        })
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stair_is_reported_once_per_detection() {
        let mut detector = ModeDetector::new();
        assert_eq!(detector.observe(Sample::StairLevel(0)), None);
        assert_eq!(
            detector.observe(Sample::StairLevel(2)),
            Some(StageChange::StairDetected)
        );
        assert_eq!(detector.observe(Sample::StairLevel(1)), None);
        assert_eq!(detector.observe(Sample::StairLevel(-1)), None);
        assert_eq!(
            detector.observe(Sample::StairLevel(1)),
            Some(StageChange::StairDetected)
        );
    }

    #[test]
    fn signals_are_tracked_independently() {
        let mut detector = ModeDetector::new();
        assert_eq!(
            detector.observe(Sample::TargetStatic(true)),
            Some(StageChange::TargetStatic)
        );
        assert_eq!(
            detector.observe(Sample::StairLevel(1)),
            Some(StageChange::StairDetected)
        );
        assert_eq!(detector.observe(Sample::TargetStatic(true)), None);
    }

    #[tokio::test]
    async fn stage_stream_filters_repeats_and_ends_with_senders() {
        let (tx, rx) = mpsc::channel(8);
        for sample in [
            Sample::StairLevel(1),
            Sample::StairLevel(1),
            Sample::TargetStatic(false),
            Sample::TargetStatic(true),
        ] {
            tx.send(sample).await.unwrap();
        }
        drop(tx);

        let stages: Vec<_> = ModeDetector::new().stages(rx).collect().await;
        assert_eq!(
            stages,
            vec![StageChange::StairDetected, StageChange::TargetStatic]
        );
    }
}
