//! Lifecycle of the external decoder process.
//!
//! Exactly one decoder runs at a time. Its stdout is read line by line on a
//! dedicated thread and forwarded to the interpreter over a channel; stdin stays
//! with the supervisor so only the dispatcher writes to it.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use crossbeam_channel::Sender;

use crate::config::DecoderConfig;
use crate::protocol::DecoderCommand;
use crate::session::Session;

/// Liveness and teardown hooks for a launched decoder.
pub trait ProcessControl: Send {
    fn has_exited(&mut self) -> bool;
    fn kill(&mut self) -> io::Result<()>;
    /// Reap the process after a kill.
    fn wait(&mut self) -> io::Result<()>;
}

/// Pipes and control handle of a freshly launched decoder.
pub struct DecoderProcess {
    pub stdin: Box<dyn Write + Send>,
    pub stdout: Box<dyn Read + Send>,
    pub control: Box<dyn ProcessControl>,
}

/// Starts decoder processes. Production uses [`CommandLauncher`].
pub trait DecoderLauncher: Send + Sync {
    fn launch(&self) -> Result<DecoderProcess>;
}

/// Launch the decoder as an OS subprocess with piped stdin/stdout.
pub struct CommandLauncher {
    config: DecoderConfig,
}

impl CommandLauncher {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }
}

impl DecoderLauncher for CommandLauncher {
    fn launch(&self) -> Result<DecoderProcess> {
        let mut child = Command::new(&self.config.program)
            .args(&self.config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("spawn decoder {:?}", self.config.program))?;
        let stdin = child.stdin.take().context("decoder stdin not piped")?;
        let stdout = child.stdout.take().context("decoder stdout not piped")?;
        Ok(DecoderProcess {
            stdin: Box::new(stdin),
            stdout: Box::new(stdout),
            control: Box::new(child),
        })
    }
}

impl ProcessControl for Child {
    fn has_exited(&mut self) -> bool {
        !matches!(self.try_wait(), Ok(None))
    }

    fn kill(&mut self) -> io::Result<()> {
        Child::kill(self)
    }

    fn wait(&mut self) -> io::Result<()> {
        Child::wait(self).map(|_| ())
    }
}

struct RunningDecoder {
    stdin: Option<Box<dyn Write + Send>>,
    control: Box<dyn ProcessControl>,
    started_at: Instant,
}

pub(crate) struct DecoderSupervisor {
    launcher: Arc<dyn DecoderLauncher>,
    session: Arc<Session>,
    lines_tx: Sender<String>,
    /// Bumped on every start/stop; readers of older generations stop forwarding.
    generation: Arc<AtomicU64>,
    /// Set once by [`DecoderSupervisor::close`], always while holding `current`.
    closed: AtomicBool,
    current: Mutex<Option<RunningDecoder>>,
}

impl DecoderSupervisor {
    pub(crate) fn new(
        launcher: Arc<dyn DecoderLauncher>,
        session: Arc<Session>,
        lines_tx: Sender<String>,
    ) -> Self {
        Self {
            launcher,
            session,
            lines_tx,
            generation: Arc::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    fn current(&self) -> MutexGuard<'_, Option<RunningDecoder>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn is_running(&self) -> bool {
        let mut current = self.current();
        current
            .as_mut()
            .is_some_and(|decoder| !decoder.control.has_exited())
    }

    /// Start the decoder unless one is already alive. Returns whether one is running afterwards.
    pub(crate) fn ensure_running(&self) -> bool {
        let mut current = self.current();
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        if current
            .as_mut()
            .is_some_and(|decoder| !decoder.control.has_exited())
        {
            return true;
        }
        match self.start_locked(&mut current) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!("decoder start failed: {e:#}");
                false
            }
        }
    }

    /// Replace any existing decoder with a fresh one.
    pub(crate) fn start(&self) -> Result<()> {
        let mut current = self.current();
        self.start_locked(&mut current)
    }

    fn start_locked(&self, current: &mut Option<RunningDecoder>) -> Result<()> {
        if let Some(old) = current.take() {
            self.teardown(old);
        }
        if self.closed.load(Ordering::SeqCst) {
            bail!("decoder supervisor is closed");
        }

        tracing::info!("starting decoder process");
        self.session.reset_for_start();
        let process = self.launcher.launch()?;

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let generation_now = self.generation.clone();
        let lines_tx = self.lines_tx.clone();
        let stdout = process.stdout;
        let spawned = std::thread::Builder::new()
            .name("decoder-stdout".to_string())
            .spawn(move || read_lines(stdout, generation, &generation_now, &lines_tx));
        let running = RunningDecoder {
            stdin: Some(process.stdin),
            control: process.control,
            started_at: Instant::now(),
        };
        if let Err(e) = spawned {
            self.teardown(running);
            return Err(e).context("spawn decoder stdout reader");
        }
        *current = Some(running);
        Ok(())
    }

    /// Terminate the decoder. Without `force`, does nothing unless it is running.
    pub(crate) fn stop(&self, force: bool) {
        let mut current = self.current();
        let running = current
            .as_mut()
            .is_some_and(|decoder| !decoder.control.has_exited());
        if !force && !running {
            return;
        }
        if let Some(decoder) = current.take() {
            self.teardown(decoder);
        }
    }

    /// Kill the decoder for good; later starts fail.
    pub(crate) fn close(&self) {
        let mut current = self.current();
        self.closed.store(true, Ordering::SeqCst);
        if let Some(decoder) = current.take() {
            self.teardown(decoder);
        }
    }

    /// Best-effort teardown: every step runs even when an earlier one failed.
    fn teardown(&self, mut decoder: RunningDecoder) {
        tracing::info!(
            uptime_ms = decoder.started_at.elapsed().as_millis() as u64,
            "stopping decoder process"
        );
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(e) = decoder.control.kill() {
            tracing::debug!("decoder kill: {e}");
        }
        if let Some(mut stdin) = decoder.stdin.take() {
            if let Err(e) = stdin.flush() {
                tracing::debug!("decoder stdin flush: {e}");
            }
        }
        if let Err(e) = decoder.control.wait() {
            tracing::debug!("decoder wait: {e}");
        }
    }

    /// Mark `command` in flight and write it, so a concurrent relaunch sees it either
    /// unsent or unanswered.
    pub(crate) fn send_command(&self, command: &DecoderCommand) -> io::Result<()> {
        let mut current = self.current();
        self.session.begin_command(
            command.expected_marker(),
            matches!(command, DecoderCommand::Stop),
        );
        let written = write_locked(&mut current, &command.to_line());
        if written.is_err() {
            self.session.abandon_command();
        }
        written
    }

}

fn write_locked(current: &mut Option<RunningDecoder>, line: &str) -> io::Result<()> {
    let stdin = current
        .as_mut()
        .and_then(|decoder| decoder.stdin.as_mut())
        .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "decoder not running"))?;
    stdin.write_all(line.as_bytes())?;
    stdin.write_all(b"\n")?;
    stdin.flush()
}

fn read_lines(
    stdout: Box<dyn Read + Send>,
    generation: u64,
    generation_now: &AtomicU64,
    lines_tx: &Sender<String>,
) {
    let reader = BufReader::new(stdout);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::debug!("decoder stdout read: {e}");
                break;
            }
        };
        if generation_now.load(Ordering::SeqCst) != generation {
            break;
        }
        if lines_tx.send(line).is_err() {
            break;
        }
    }
    tracing::debug!(generation, "decoder stdout closed");
}
