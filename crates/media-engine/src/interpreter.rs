//! Response interpreter worker: applies decoder output to the session, strictly
//! in arrival order.

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::engine::EngineHandle;
use crate::protocol::{DecoderMessage, PlayState};

pub(crate) fn run(handle: EngineHandle, lines: Receiver<String>) {
    let poll = handle.shared.config.poll_interval;
    while !handle.shared.is_shutdown() {
        let first = match lines.recv_timeout(poll) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        handle_line(&handle, &first);
        for line in lines.try_iter() {
            handle_line(&handle, &line);
        }
    }
    tracing::debug!("interpreter stopped");
}

fn handle_line(handle: &EngineHandle, line: &str) {
    let session = &handle.shared.session;
    let message = DecoderMessage::parse(line);
    if !matches!(message, DecoderMessage::Frame { .. }) {
        tracing::debug!(line, "decoder ->");
    }
    session.observe_line(line, matches!(message, DecoderMessage::Error(_)));

    match message {
        DecoderMessage::Ready => handle.set_volume(handle.shared.config.startup_volume),
        DecoderMessage::Status(PlayState::Stopped) => {
            session.on_stopped();
            if !session.take_expecting_stop() {
                tracing::info!("track finished, advancing");
                handle.next();
            }
        }
        DecoderMessage::Status(PlayState::Paused) => session.on_active(true),
        DecoderMessage::Status(PlayState::Playing) => session.on_active(false),
        DecoderMessage::Error(message) => tracing::error!(%message, "decoder reported error"),
        DecoderMessage::Frame { elapsed, remaining } => session.on_progress(elapsed, remaining),
        DecoderMessage::Ignored => {}
        DecoderMessage::Unknown => tracing::warn!(line, "unrecognized decoder output"),
    }
}
