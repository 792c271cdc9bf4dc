//! Decoder session state shared by the dispatcher and the interpreter.
//!
//! ## Locks
//! - `protocol`: expected marker, ready/retry flags and the intentional-stop flag.
//!   Paired with a [`Condvar`] that is notified whenever `ready` flips to `true`.
//! - `playback`: what the decoder last reported (playing, paused, progress).
//!
//! The two are independent; neither is held while taking the other.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::protocol::READY_MARKER;

#[derive(Debug, Default)]
pub(crate) struct ProtocolState {
    /// Reply prefix that unblocks the command in flight. `None` accepts any line.
    pub(crate) expected_marker: Option<&'static str>,
    pub(crate) ready: bool,
    pub(crate) retry: bool,
    pub(crate) expecting_stop: bool,
    /// A command was written and its acknowledgement has not been consumed yet.
    in_flight: bool,
    /// The decoder was relaunched while `in_flight` was unanswered.
    restarted: bool,
}

/// Playback fields derived from decoder output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PlaybackState {
    pub playing: bool,
    pub paused: bool,
    pub progress_secs: u32,
    pub duration_secs: u32,
}

/// How a wait for the decoder's acknowledgement ended.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    Ready,
    Cancelled,
    /// The decoder died or was relaunched before answering.
    Lost,
}

impl ProtocolState {
    /// Consume a finished wait. A relaunch takes precedence over the new decoder's ready line.
    fn settled(&mut self) -> Option<WaitOutcome> {
        if std::mem::take(&mut self.restarted) {
            self.in_flight = false;
            return Some(WaitOutcome::Lost);
        }
        if self.ready {
            self.in_flight = false;
            return Some(WaitOutcome::Ready);
        }
        None
    }
}

#[derive(Debug, Default)]
pub(crate) struct Session {
    protocol: Mutex<ProtocolState>,
    ready_cv: Condvar,
    playback: Mutex<PlaybackState>,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn protocol(&self) -> MutexGuard<'_, ProtocolState> {
        self.protocol.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn playback_mut(&self) -> MutexGuard<'_, PlaybackState> {
        self.playback.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reset everything for a freshly launched decoder: wait for its ready marker.
    ///
    /// An unanswered command in flight is reported to its waiter as lost, whichever
    /// thread triggered the relaunch.
    pub(crate) fn reset_for_start(&self) {
        let lost_command = {
            let mut p = self.protocol();
            let lost_command = p.in_flight && !p.ready;
            if lost_command {
                p.restarted = true;
            }
            p.in_flight = false;
            p.expecting_stop = false;
            p.ready = false;
            p.retry = false;
            p.expected_marker = Some(READY_MARKER);
            lost_command
        };
        *self.playback_mut() = PlaybackState::default();
        if lost_command {
            self.ready_cv.notify_all();
        }
    }

    pub(crate) fn is_ready(&self) -> bool {
        self.protocol().ready
    }

    /// Mark a command as in flight, expecting `marker` as its acknowledgement.
    pub(crate) fn begin_command(&self, marker: &'static str, is_stop: bool) {
        let mut p = self.protocol();
        if is_stop {
            p.expecting_stop = true;
        }
        p.expected_marker = Some(marker);
        p.ready = false;
        p.retry = false;
        p.in_flight = true;
        p.restarted = false;
    }

    /// Feed one decoder line into the readiness state machine.
    ///
    /// An error reply always completes the wait and requests a resend; any other
    /// line completes it when it carries the expected marker.
    pub(crate) fn observe_line(&self, line: &str, is_error: bool) {
        let mut p = self.protocol();
        let was_ready = p.ready;
        if is_error {
            p.retry = true;
            p.ready = true;
        } else if !p.ready && p.expected_marker.is_none_or(|m| line.starts_with(m)) {
            p.ready = true;
        }
        let now_ready = p.ready;
        drop(p);
        if now_ready && !was_ready {
            self.ready_cv.notify_all();
        }
    }

    /// Forget the command in flight; it never reached the decoder.
    pub(crate) fn abandon_command(&self) {
        self.protocol().in_flight = false;
    }

    /// Consume the retry request for the command that just completed.
    pub(crate) fn take_retry(&self) -> bool {
        std::mem::take(&mut self.protocol().retry)
    }

    /// Clear the intentional-stop flag, returning whether it was set.
    pub(crate) fn take_expecting_stop(&self) -> bool {
        std::mem::take(&mut self.protocol().expecting_stop)
    }

    /// Block until `ready`, the engine is cancelled, or the decoder is gone.
    ///
    /// The decoder counts as gone when `alive` says so or when it was relaunched
    /// under the command in flight. Waits in slices of `poll` so `cancel` and
    /// `alive` are re-checked; there is no overall timeout.
    pub(crate) fn wait_ready(
        &self,
        cancel: &AtomicBool,
        poll: Duration,
        mut alive: impl FnMut() -> bool,
    ) -> WaitOutcome {
        let mut p = self.protocol();
        loop {
            if let Some(outcome) = p.settled() {
                return outcome;
            }
            if cancel.load(Ordering::Relaxed) {
                return WaitOutcome::Cancelled;
            }
            drop(p);
            if !alive() {
                let mut p = self.protocol();
                p.in_flight = false;
                p.restarted = false;
                return WaitOutcome::Lost;
            }
            p = self.protocol();
            if let Some(outcome) = p.settled() {
                return outcome;
            }
            let (guard, _timeout) = self
                .ready_cv
                .wait_timeout(p, poll)
                .unwrap_or_else(PoisonError::into_inner);
            p = guard;
        }
    }

    pub(crate) fn playback(&self) -> PlaybackState {
        *self.playback_mut()
    }

    pub(crate) fn on_stopped(&self) {
        *self.playback_mut() = PlaybackState::default();
    }

    pub(crate) fn on_active(&self, paused: bool) {
        let mut s = self.playback_mut();
        s.playing = true;
        s.paused = paused;
    }

    pub(crate) fn on_progress(&self, elapsed: f64, remaining: f64) {
        let mut s = self.playback_mut();
        s.duration_secs = round_secs(elapsed + remaining);
        s.progress_secs = round_secs(elapsed);
    }
}

fn round_secs(value: f64) -> u32 {
    if value.is_finite() && value > 0.0 {
        value.round().min(u32::MAX as f64) as u32
    } else {
        0
    }
}
