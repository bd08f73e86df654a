//! Behavior arbitration: exactly one high-level behavior at a time.
//!
//! ```text
//!               auto-tracking trigger
//! NormTracking ───────────────────────► AutoTracking ──aborted──► Abnorm
//!      │  ▲                                                       ▲   │
//!      │  └───── jump succeeded ─────┐                            │   │
//!      └── stair trigger ──► StairJumping ───── jump failed ──────┘   │
//!      ▲                                                              │
//!      └──────────────────────────── recover ─────────────────────────┘
//! ```
//!
//! Leaving `NormTracking` switches base tracking off first; a switch whose
//! base-tracking call fails does not happen.  There is deliberately no edge
//! from `AutoTracking` back to `NormTracking`.

use std::pin::pin;
use std::time::Duration;

use futures_util::{Stream, StreamExt};
use navcore_middleware::ServiceClient;
use navcore_runtime::base::SetBoolClient;
use navcore_runtime::{ExecutorContext, TaskCallbacks, TaskExecutor};
use navcore_types::{AutoTrackingGoal, BehaviorMode, NavError, StairJumpGoal};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, error, info, instrument, warn};

use crate::auto_tracking::AutoTracking;
use crate::mode_detector::StageChange;
use crate::stair_jumping::StairJumping;

/// Result of a mode-switch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModeSwitch {
    Switched(BehaviorMode),
    /// Another behavior is active; carries the unchanged mode.
    Ignored(BehaviorMode),
}

/// Completion of a behavior executor, as seen by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BehaviorSignal {
    JumpSucceeded,
    JumpFailed,
    AutoTrackingFailed,
}

pub struct BehaviorManager {
    mode: Mutex<BehaviorMode>,
    tracking: SetBoolClient,
    switch_timeout: Duration,
    auto_tracking: AutoTracking,
    stair_jumping: StairJumping,
    signals: Mutex<mpsc::UnboundedReceiver<BehaviorSignal>>,
}

fn notify(tx: &mpsc::UnboundedSender<BehaviorSignal>, signal: BehaviorSignal) {
    if tx.send(signal).is_err() {
        debug!(?signal, "behavior manager gone, signal dropped");
    }
}

impl BehaviorManager {
    pub fn new(ctx: &ExecutorContext) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();

        let (ok, failed) = (tx.clone(), tx.clone());
        let stair_jumping = StairJumping::new(
            ctx,
            TaskCallbacks::new()
                .on_success(move || notify(&ok, BehaviorSignal::JumpSucceeded))
                .on_abort(move || notify(&failed, BehaviorSignal::JumpFailed)),
        );
        let auto_tracking = AutoTracking::new(
            ctx,
            TaskCallbacks::new().on_abort(move || notify(&tx, BehaviorSignal::AutoTrackingFailed)),
        );

        let switch_timeout = ctx.config.timeouts.tracking_switch();
        Self {
            mode: Mutex::new(BehaviorMode::NormTracking),
            tracking: ServiceClient::new(
                ctx.services.clone(),
                &ctx.config.endpoints.tracking_command,
                switch_timeout,
            ),
            switch_timeout,
            auto_tracking,
            stair_jumping,
            signals: Mutex::new(rx),
        }
    }

    pub async fn mode(&self) -> BehaviorMode {
        *self.mode.lock().await
    }

    pub fn auto_tracking(&self) -> &AutoTracking {
        &self.auto_tracking
    }

    pub fn stair_jumping(&self) -> &StairJumping {
        &self.stair_jumping
    }

    pub async fn request_auto_tracking(&self) -> Result<ModeSwitch, NavError> {
        self.leave_norm_tracking(BehaviorMode::AutoTracking, || {
            self.auto_tracking.start(AutoTrackingGoal { enable: true })
        })
        .await
    }

    pub async fn request_stair_jump(&self) -> Result<ModeSwitch, NavError> {
        self.leave_norm_tracking(BehaviorMode::StairJumping, || {
            self.stair_jumping.start(StairJumpGoal)
        })
        .await
    }

    /// The mode lock is held across the whole switch, so concurrent
    /// triggers queue and then see the new mode.
    #[instrument(skip(self, start))]
    async fn leave_norm_tracking<T>(
        &self,
        target: BehaviorMode,
        start: impl FnOnce() -> Result<T, NavError>,
    ) -> Result<ModeSwitch, NavError> {
        let mut mode = self.mode.lock().await;
        if *mode != BehaviorMode::NormTracking {
            info!(current = ?*mode, "behavior already active, trigger ignored");
            return Ok(ModeSwitch::Ignored(*mode));
        }

        self.set_base_tracking(false).await?;
        if let Err(e) = start() {
            error!(error = %e, "behavior executor refused to start");
            if let Err(e) = self.set_base_tracking(true).await {
                warn!(error = %e, "base tracking not restored");
            }
            return Err(e);
        }
        *mode = target;
        info!(mode = ?target, "behavior mode switched");
        Ok(ModeSwitch::Switched(target))
    }

    /// Apply an executor completion.  Signals that do not match the current
    /// mode are stale and ignored.
    pub async fn handle_signal(&self, signal: BehaviorSignal) -> BehaviorMode {
        let mut mode = self.mode.lock().await;
        match (signal, *mode) {
            (BehaviorSignal::JumpSucceeded, BehaviorMode::StairJumping) => {
                if let Err(e) = self.set_base_tracking(true).await {
                    warn!(error = %e, "base tracking not restored after jump");
                }
                *mode = BehaviorMode::NormTracking;
                info!("stair jumped, back to normal tracking");
            }
            (BehaviorSignal::JumpFailed, BehaviorMode::StairJumping)
            | (BehaviorSignal::AutoTrackingFailed, BehaviorMode::AutoTracking) => {
                *mode = BehaviorMode::Abnorm;
                error!(?signal, "behavior failed, waiting for recovery");
            }
            (signal, current) => debug!(?signal, ?current, "stale behavior signal ignored"),
        }
        *mode
    }

    /// Wait for the next executor completion and apply it.
    pub async fn dispatch_next_signal(&self) -> Option<BehaviorMode> {
        let signal = self.signals.lock().await.recv().await?;
        Some(self.handle_signal(signal).await)
    }

    /// External recovery from `Abnorm`: base tracking back on, normal mode.
    pub async fn recover(&self) -> Result<ModeSwitch, NavError> {
        let mut mode = self.mode.lock().await;
        if *mode != BehaviorMode::Abnorm {
            return Ok(ModeSwitch::Ignored(*mode));
        }
        self.set_base_tracking(true).await?;
        *mode = BehaviorMode::NormTracking;
        info!("recovered to normal tracking");
        Ok(ModeSwitch::Switched(BehaviorMode::NormTracking))
    }

    /// Drive the manager from a stage-change stream until it ends.
    pub async fn run<S>(&self, stages: S)
    where
        S: Stream<Item = StageChange> + Send,
    {
        let mut stages = pin!(stages);
        let mut signals = self.signals.lock().await;
        loop {
            tokio::select! {
                Some(signal) = signals.recv() => {
                    self.handle_signal(signal).await;
                }
                stage = stages.next() => {
                    let result = match stage {
                        Some(StageChange::StairDetected) => self.request_stair_jump().await,
                        Some(StageChange::TargetStatic) => self.request_auto_tracking().await,
                        None => break,
                    };
                    if let Err(e) = result {
                        error!(error = %e, "mode switch failed");
                    }
                }
            }
        }
        info!("stage stream ended, behavior manager stopped");
    }

    /// One `switch_timeout` bounds the whole switch, connect included.
    async fn set_base_tracking(&self, enable: bool) -> Result<(), NavError> {
        let switched = tokio::time::timeout(
            self.switch_timeout,
            self.tracking.set(enable, self.switch_timeout),
        )
        .await
        .unwrap_or_else(|_| {
            Err(NavError::Timeout {
                endpoint: self.tracking.name().to_string(),
                timeout_ms: self.switch_timeout.as_millis() as u64,
            })
        });
        match switched {
            Ok(()) => {
                debug!(enable, "base tracking switched");
                Ok(())
            }
            Err(e) => {
                error!(enable, error = %e, "base tracking switch failed");
                Err(e)
            }
        }
    }
}
