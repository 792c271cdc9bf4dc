//! Playback engine: owns the workers and exposes the control API.
//!
//! ```text
//!  EngineHandle ──(DecoderCommand)──▶ dispatcher ──stdin──▶ decoder
//!       ▲                                                    │
//!       └──── next() on natural end ◀── interpreter ◀─stdout─┘
//!  broadcaster ──(PlaybackStatus)──▶ StatusSink
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use media_types::{PlaybackStatus, TrackInfo};

use crate::config::EngineConfig;
use crate::playlist::{Playlist, RESTART_THRESHOLD_SECS};
use crate::protocol::DecoderCommand;
use crate::session::{PlaybackState, Session};
use crate::supervisor::{CommandLauncher, DecoderLauncher, DecoderSupervisor};
use crate::{broadcaster, dispatcher, interpreter};

/// Maps a removable-device id to the directory it is mounted on.
pub trait MountResolver: Send + Sync {
    /// `None` when the device is unknown or not mounted.
    fn mount_path(&self, device_id: &str) -> Option<PathBuf>;
}

/// Receives periodic status snapshots.
pub trait StatusSink: Send + Sync {
    fn publish(&self, status: &PlaybackStatus);
}

pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) session: Arc<Session>,
    pub(crate) supervisor: DecoderSupervisor,
    pub(crate) shutdown: AtomicBool,
    playlist: Mutex<Playlist>,
    commands_tx: Sender<DecoderCommand>,
    mounts: Arc<dyn MountResolver>,
    sink: Mutex<Option<Arc<dyn StatusSink>>>,
}

impl EngineShared {
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    fn playlist(&self) -> MutexGuard<'_, Playlist> {
        self.playlist.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn sink(&self) -> Option<Arc<dyn StatusSink>> {
        self.sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sleep for `duration` in poll-sized slices. Returns `false` once shutdown is requested.
    pub(crate) fn pause(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_shutdown() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(self.config.poll_interval));
        }
    }
}

/// Cheap, cloneable control surface of a running [`PlaybackEngine`].
#[derive(Clone)]
pub struct EngineHandle {
    pub(crate) shared: Arc<EngineShared>,
}

impl EngineHandle {
    /// Load the current track, skipping entries whose file cannot be found.
    pub fn play(&self) {
        let attempts = self.shared.playlist().len();
        for _ in 0..attempts {
            let Some(track) = self.shared.playlist().current().cloned() else {
                return;
            };
            self.send(DecoderCommand::Stop);
            match self.resolve(&track) {
                Some(path) => {
                    tracing::info!(track = %track.label(), path = %path.display(), "loading track");
                    self.send(DecoderCommand::Load(path));
                    return;
                }
                None => {
                    tracing::error!(
                        track_id = track.id,
                        device = %track.device_id,
                        path = %track.relative_path,
                        "track file not found, skipping"
                    );
                    if !self.shared.playlist().next() {
                        tracing::info!("reached end of playlist");
                        return;
                    }
                }
            }
        }
        if attempts > 0 {
            tracing::warn!(tracks = attempts, "no playable track in playlist");
        }
    }

    fn resolve(&self, track: &TrackInfo) -> Option<PathBuf> {
        let mount = self.shared.mounts.mount_path(&track.device_id)?;
        let path = mount.join(&track.relative_path);
        path.exists().then_some(path)
    }

    pub fn stop(&self) {
        if self.shared.session.playback().playing {
            self.send(DecoderCommand::Stop);
        }
    }

    pub fn toggle_play_pause(&self) {
        if self.shared.session.playback().playing {
            self.send(DecoderCommand::TogglePause);
        } else {
            self.play();
        }
    }

    pub fn toggle_shuffle(&self) -> bool {
        let shuffle = self.shared.playlist().toggle_shuffle();
        tracing::info!(shuffle, "shuffle toggled");
        shuffle
    }

    pub fn toggle_repeat(&self) -> bool {
        let repeat = self.shared.playlist().toggle_repeat();
        tracing::info!(repeat, "repeat toggled");
        repeat
    }

    /// Play the track at `position` in the active order. See [`Playlist::jump_to`].
    pub fn jump_to_playlist_position(&self, position: i64) -> bool {
        let moved = self.shared.playlist().jump_to(position);
        if moved {
            self.play();
        }
        moved
    }

    pub fn next(&self) -> bool {
        let moved = self.shared.playlist().next();
        if moved {
            self.play();
        }
        moved
    }

    pub fn previous(&self) -> bool {
        let moved = self.shared.playlist().previous();
        if moved {
            self.play();
        }
        moved
    }

    /// Restart the current track once it has played a few seconds, else go back one.
    pub fn previous_or_restart(&self) -> bool {
        let playback = self.shared.session.playback();
        if playback.playing && playback.progress_secs >= RESTART_THRESHOLD_SECS {
            self.seek_seconds(0);
            true
        } else {
            self.previous()
        }
    }

    /// Jump to an absolute offset in the current track. Ignored while stopped.
    pub fn seek_seconds(&self, offset: u32) {
        if self.shared.session.playback().playing {
            self.send(DecoderCommand::Seek(offset));
        }
    }

    /// Append tracks; playback starts when the playlist was empty.
    pub fn add_tracks(&self, tracks: Vec<TrackInfo>) {
        let count = tracks.len();
        let was_empty = self.shared.playlist().add(tracks);
        tracing::info!(count, "tracks queued");
        if was_empty && count > 0 {
            self.play();
        }
    }

    pub fn clear_playlist(&self) {
        let playing = self.shared.session.playback().playing;
        if self.shared.playlist().clear(playing) {
            self.send(DecoderCommand::Stop);
        }
        tracing::info!("playlist cleared");
    }

    pub fn set_volume(&self, level: u8) {
        self.send(DecoderCommand::SetVolume(level.min(100)));
    }

    /// Whether tracks on `device_id` can currently be played.
    pub fn device_available(&self, device_id: &str) -> bool {
        self.shared.mounts.mount_path(device_id).is_some()
    }

    pub fn playback(&self) -> PlaybackState {
        self.shared.session.playback()
    }

    pub fn playlist_len(&self) -> usize {
        self.shared.playlist().len()
    }

    pub fn status(&self) -> PlaybackStatus {
        let playback = self.shared.session.playback();
        let playlist = self.shared.playlist();
        PlaybackStatus {
            playlist_position: playlist.position(),
            playlist: playlist.active_ids(),
            is_paused: playback.paused,
            is_playing: playback.playing,
            position: playback.progress_secs,
            duration: playback.duration_secs,
            is_repeat_all: playlist.is_repeat(),
            is_shuffle: playlist.is_shuffle(),
            can_move_next: playlist.can_move_next(),
            can_move_previous: playlist.can_move_previous(playback.progress_secs),
        }
    }

    pub fn set_status_sink(&self, sink: Option<Arc<dyn StatusSink>>) {
        *self
            .shared
            .sink
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = sink;
    }

    fn send(&self, command: DecoderCommand) {
        if self.shared.is_shutdown() {
            return;
        }
        self.shared.supervisor.ensure_running();
        if self.shared.commands_tx.send(command).is_err() {
            tracing::debug!("dispatcher gone, command dropped");
        }
    }
}

/// Owns the engine workers. Dropping it shuts the engine down.
pub struct PlaybackEngine {
    handle: EngineHandle,
    workers: Vec<JoinHandle<()>>,
}

impl PlaybackEngine {
    /// Start an engine that drives the configured decoder executable.
    pub fn start(config: EngineConfig, mounts: Arc<dyn MountResolver>) -> Result<Self> {
        let launcher = Arc::new(CommandLauncher::new(config.decoder.clone()));
        Self::with_launcher(config, mounts, launcher)
    }

    pub fn with_launcher(
        config: EngineConfig,
        mounts: Arc<dyn MountResolver>,
        launcher: Arc<dyn DecoderLauncher>,
    ) -> Result<Self> {
        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let (lines_tx, lines_rx) = crossbeam_channel::unbounded();
        let session = Arc::new(Session::new());
        let supervisor = DecoderSupervisor::new(launcher, session.clone(), lines_tx);
        let shared = Arc::new(EngineShared {
            config,
            session,
            supervisor,
            shutdown: AtomicBool::new(false),
            playlist: Mutex::new(Playlist::new()),
            commands_tx,
            mounts,
            sink: Mutex::new(None),
        });
        let mut engine = Self {
            handle: EngineHandle { shared },
            workers: Vec::with_capacity(3),
        };

        let handle = engine.handle.clone();
        engine.spawn_worker("decoder-interpreter", move || {
            interpreter::run(handle, lines_rx)
        })?;
        let shared = engine.handle.shared.clone();
        engine.spawn_worker("decoder-dispatcher", move || {
            dispatcher::run(shared, commands_rx)
        })?;
        let handle = engine.handle.clone();
        engine.spawn_worker("status-broadcaster", move || broadcaster::run(handle))?;

        tracing::info!("playback engine started");
        Ok(engine)
    }

    fn spawn_worker(&mut self, name: &str, f: impl FnOnce() + Send + 'static) -> Result<()> {
        let worker = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(f)
            .with_context(|| format!("spawn {name} thread"))?;
        self.workers.push(worker);
        Ok(())
    }

    pub fn handle(&self) -> EngineHandle {
        self.handle.clone()
    }

    /// Stop the workers and kill the decoder. Idempotent.
    pub fn shutdown(&mut self) {
        let shared = &self.handle.shared;
        if shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }
        shared.supervisor.close();
        for worker in self.workers.drain(..) {
            let name = worker.thread().name().unwrap_or("worker").to_string();
            if worker.join().is_err() {
                tracing::warn!(thread = %name, "engine worker panicked");
            }
        }
        tracing::info!("playback engine stopped");
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}
