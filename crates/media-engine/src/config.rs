use std::path::PathBuf;
use std::time::Duration;

/// How to launch the external decoder process.
#[derive(Clone, Debug)]
pub struct DecoderConfig {
    /// Executable name or path (resolved through `PATH` when bare).
    pub program: PathBuf,
    /// Arguments that put the decoder in line-oriented remote-control mode.
    pub args: Vec<String>,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("mpg123"),
            args: vec!["-R".to_string()],
        }
    }
}

/// Engine tuning shared by the dispatcher, interpreter and broadcaster workers.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub decoder: DecoderConfig,
    /// Output level requested every time the decoder announces it is ready.
    pub startup_volume: u8,
    /// Resend cap for commands the decoder rejects; `None` retries forever.
    pub max_command_retries: Option<u32>,
    /// Interval between status snapshots pushed to the sink.
    pub status_interval: Duration,
    /// Wait before re-checking when no status sink is installed.
    pub idle_retry: Duration,
    /// Upper bound on any single wait so shutdown and process liveness are observed.
    pub poll_interval: Duration,
    /// Back-off after a failed decoder launch.
    pub restart_delay: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            decoder: DecoderConfig::default(),
            startup_volume: 100,
            max_command_retries: None,
            status_interval: Duration::from_millis(200),
            idle_retry: Duration::from_millis(500),
            poll_interval: Duration::from_millis(50),
            restart_delay: Duration::from_secs(1),
        }
    }
}
