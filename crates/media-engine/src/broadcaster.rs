//! Periodic status push to the installed [`StatusSink`](crate::engine::StatusSink).

use crate::engine::EngineHandle;

pub(crate) fn run(handle: EngineHandle) {
    let config = &handle.shared.config;
    loop {
        let delay = match handle.shared.sink() {
            Some(sink) => {
                sink.publish(&handle.status());
                config.status_interval
            }
            None => config.idle_retry,
        };
        if !handle.shared.pause(delay) {
            break;
        }
    }
    tracing::debug!("status broadcaster stopped");
}
