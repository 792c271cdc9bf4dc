//! Command dispatcher worker.
//!
//! Drains queued [`DecoderCommand`]s in batches and writes them to the decoder
//! one at a time, never sending a command before the previous one was
//! acknowledged.

use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::engine::EngineShared;
use crate::protocol::{DecoderCommand, coalesce_seeks};
use crate::session::WaitOutcome;

pub(crate) fn run(shared: Arc<EngineShared>, commands: Receiver<DecoderCommand>) {
    let poll = shared.config.poll_interval;
    while !shared.is_shutdown() {
        let first = match commands.recv_timeout(poll) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        let mut batch = vec![first];
        batch.extend(commands.try_iter());
        for command in coalesce_seeks(batch) {
            if !deliver(&shared, &command) {
                tracing::debug!("dispatcher cancelled");
                return;
            }
        }
    }
    tracing::debug!("dispatcher stopped");
}

/// Send one command until the decoder accepts it. Returns `false` on shutdown.
fn deliver(shared: &EngineShared, command: &DecoderCommand) -> bool {
    let line = command.to_line();
    let mut resends: u32 = 0;
    loop {
        if !await_idle_decoder(shared) {
            return false;
        }

        tracing::debug!(command = %line, "decoder <-");
        if let Err(e) = shared.supervisor.send_command(command) {
            tracing::warn!(command = %line, "decoder write failed: {e}");
            shared.supervisor.stop(true);
        } else {
            match wait_for_reply(shared) {
                WaitOutcome::Cancelled => return false,
                WaitOutcome::Ready => {
                    if !shared.session.take_retry() {
                        return true;
                    }
                    tracing::warn!(command = %line, "decoder rejected command, resending");
                }
                WaitOutcome::Lost => {
                    tracing::warn!(command = %line, "decoder exited before acknowledging, resending");
                }
            }
        }

        resends += 1;
        if shared
            .config
            .max_command_retries
            .is_some_and(|max| resends > max)
        {
            tracing::warn!(command = %line, resends, "dropping command after repeated failures");
            return true;
        }
    }
}

/// Block until a decoder is running and idle, starting one on demand.
fn await_idle_decoder(shared: &EngineShared) -> bool {
    loop {
        if shared.is_shutdown() {
            return false;
        }
        if !shared.supervisor.ensure_running() {
            if !shared.pause(shared.config.restart_delay) {
                return false;
            }
            continue;
        }
        match wait_for_reply(shared) {
            WaitOutcome::Ready => return true,
            WaitOutcome::Cancelled => return false,
            WaitOutcome::Lost => tracing::debug!("decoder exited while idle"),
        }
    }
}

fn wait_for_reply(shared: &EngineShared) -> WaitOutcome {
    shared
        .session
        .wait_ready(&shared.shutdown, shared.config.poll_interval, || {
            shared.supervisor.is_running()
        })
}
