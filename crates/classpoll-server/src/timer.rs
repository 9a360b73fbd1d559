//! Countdown timer for the active poll.
//!
//! The timer never touches session state itself. It emits events into
//! the coordinator's command queue, stamped with the epoch of the poll
//! it was started for, so a fire that races a manual end is discarded
//! by the epoch check on the receiving side.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::coordinator::Command;

/// Emitted once per second while a poll is running, then once on
/// expiry. `epoch` identifies the poll generation the timer belongs to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimerEvent {
    Tick { epoch: u64, remaining: u32 },
    Expired { epoch: u64 },
}

/// Handle to a running countdown. Dropping the handle does not stop
/// the timer; call [`TimerHandle::cancel`].
pub struct TimerHandle {
    cancel: CancellationToken,
}

impl TimerHandle {
    /// Stop the countdown. Safe to call more than once, and safe to
    /// call after the timer has already expired.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

/// Start a countdown of `duration_secs` seconds. Emits a tick for each
/// remaining value from `duration_secs` down to 0 inclusive (one tick
/// per second), then a single `Expired` event.
pub fn start(duration_secs: u32, epoch: u64, tx: mpsc::Sender<Command>) -> TimerHandle {
    let cancel = CancellationToken::new();
    let task_cancel = cancel.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));

        for remaining in (0..=duration_secs).rev() {
            tokio::select! {
                biased;
                _ = task_cancel.cancelled() => return,
                _ = interval.tick() => {}
            }
            if tx
                .send(Command::Timer(TimerEvent::Tick { epoch, remaining }))
                .await
                .is_err()
            {
                return;
            }
        }

        if !task_cancel.is_cancelled() {
            let _ = tx.send(Command::Timer(TimerEvent::Expired { epoch })).await;
        }
    });

    TimerHandle { cancel }
}
