//! Line-oriented TCP control listener.
//!
//! Each client sends one command per line and receives exactly one reply line:
//! `OK`, `OK <payload>` or `ERR <code> <message>`.

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};

use media_engine::EngineHandle;
use media_types::{TrackId, TrackInfo};

use crate::catalog::TrackCatalog;

const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Parsed control command.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlRequest {
    Echo(String),
    Play,
    Stop,
    Pause,
    Next,
    Previous,
    Shuffle,
    Repeat,
    Jump(i64),
    Seek(u32),
    Volume(u8),
    Queue { replace: bool, ids: Vec<TrackId> },
    Clear,
    Status,
    Library,
}

/// Rejection sent back to the client.
#[derive(Debug, PartialEq, Eq)]
pub enum ControlError {
    MissingTracks,
    InvalidTracks(Vec<TrackId>),
    OutOfBounds { position: i64, len: usize },
    UnknownCommand(String),
    InvalidArgument(String),
    Internal(String),
}

impl ControlError {
    pub fn code(&self) -> &'static str {
        match self {
            ControlError::MissingTracks => "missing_tracks",
            ControlError::InvalidTracks(_) => "invalid_tracks",
            ControlError::OutOfBounds { .. } => "out_of_bounds",
            ControlError::UnknownCommand(_) => "unknown_command",
            ControlError::InvalidArgument(_) => "invalid_argument",
            ControlError::Internal(_) => "internal",
        }
    }

    /// Render the error as a reply line (without newline).
    pub fn into_reply(self) -> String {
        let code = self.code();
        let message = match self {
            ControlError::MissingTracks => "no track ids given".to_string(),
            ControlError::InvalidTracks(ids) => {
                let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
                format!("unknown track ids: {}", ids.join(","))
            }
            ControlError::OutOfBounds { position, len } => {
                format!("position {position} outside playlist of {len}")
            }
            ControlError::UnknownCommand(verb) => format!("unknown command: {verb}"),
            ControlError::InvalidArgument(msg) | ControlError::Internal(msg) => msg,
        };
        format!("ERR {code} {message}")
    }
}

fn parse_arg<T: std::str::FromStr>(verb: &str, arg: Option<&str>) -> Result<T, ControlError> {
    let arg = arg.ok_or_else(|| ControlError::InvalidArgument(format!("{verb} needs an argument")))?;
    arg.parse()
        .map_err(|_| ControlError::InvalidArgument(format!("{verb}: cannot parse {arg:?}")))
}

impl ControlRequest {
    pub fn parse(line: &str) -> Result<Self, ControlError> {
        let line = line.trim();
        let (verb, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let verb_lower = verb.to_ascii_lowercase();
        let first = rest.split_whitespace().next();
        Ok(match verb_lower.as_str() {
            "echo" => ControlRequest::Echo(rest.to_string()),
            "play" => ControlRequest::Play,
            "stop" => ControlRequest::Stop,
            "pause" => ControlRequest::Pause,
            "next" => ControlRequest::Next,
            "previous" | "prev" => ControlRequest::Previous,
            "shuffle" => ControlRequest::Shuffle,
            "repeat" => ControlRequest::Repeat,
            "jump" => ControlRequest::Jump(parse_arg("jump", first)?),
            "seek" => ControlRequest::Seek(parse_arg("seek", first)?),
            "volume" => {
                let level: u8 = parse_arg("volume", first)?;
                if level > 100 {
                    return Err(ControlError::InvalidArgument(format!(
                        "volume must be 0-100, got {level}"
                    )));
                }
                ControlRequest::Volume(level)
            }
            "queue" => {
                let (replace, list) = match rest.split_once(char::is_whitespace) {
                    Some((flag, list)) if flag.eq_ignore_ascii_case("replace") => (true, list),
                    _ if rest.eq_ignore_ascii_case("replace") => (true, ""),
                    _ => (false, rest),
                };
                let ids = list
                    .split(|c: char| c == ',' || c.is_whitespace())
                    .filter(|s| !s.is_empty())
                    .map(|s| {
                        s.parse::<TrackId>().map_err(|_| {
                            ControlError::InvalidArgument(format!("queue: bad track id {s:?}"))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if ids.is_empty() {
                    return Err(ControlError::MissingTracks);
                }
                ControlRequest::Queue { replace, ids }
            }
            "clear" => ControlRequest::Clear,
            "status" => ControlRequest::Status,
            "library" => ControlRequest::Library,
            _ => return Err(ControlError::UnknownCommand(verb.to_string())),
        })
    }
}

/// Apply a request to the engine. `Ok(Some(..))` carries a reply payload.
pub fn execute(
    engine: &EngineHandle,
    catalog: &dyn TrackCatalog,
    request: ControlRequest,
) -> Result<Option<String>, ControlError> {
    match request {
        ControlRequest::Echo(text) => return Ok(Some(text)),
        ControlRequest::Play => engine.play(),
        ControlRequest::Stop => engine.stop(),
        ControlRequest::Pause => engine.toggle_play_pause(),
        ControlRequest::Next => {
            engine.next();
        }
        ControlRequest::Previous => {
            engine.previous_or_restart();
        }
        ControlRequest::Shuffle => return Ok(Some(engine.toggle_shuffle().to_string())),
        ControlRequest::Repeat => return Ok(Some(engine.toggle_repeat().to_string())),
        ControlRequest::Jump(position) => {
            let len = engine.playlist_len();
            if position < 0 || position as u64 >= len as u64 {
                return Err(ControlError::OutOfBounds { position, len });
            }
            engine.jump_to_playlist_position(position);
        }
        ControlRequest::Seek(secs) => engine.seek_seconds(secs),
        ControlRequest::Volume(level) => engine.set_volume(level),
        ControlRequest::Queue { replace, ids } => {
            let mut tracks = Vec::with_capacity(ids.len());
            let mut unknown = Vec::new();
            for id in ids {
                match catalog.track(id) {
                    Some(track) => tracks.push(track),
                    None => unknown.push(id),
                }
            }
            if !unknown.is_empty() {
                return Err(ControlError::InvalidTracks(unknown));
            }
            if replace {
                engine.clear_playlist();
            }
            engine.add_tracks(tracks);
        }
        ControlRequest::Clear => engine.clear_playlist(),
        ControlRequest::Status => {
            let json = serde_json::to_string(&engine.status())
                .map_err(|e| ControlError::Internal(format!("encode status: {e}")))?;
            return Ok(Some(json));
        }
        ControlRequest::Library => {
            let tracks: Vec<TrackInfo> = catalog
                .tracks()
                .into_iter()
                .filter(|track| engine.device_available(&track.device_id))
                .collect();
            let json = serde_json::to_string(&tracks)
                .map_err(|e| ControlError::Internal(format!("encode library: {e}")))?;
            return Ok(Some(json));
        }
    }
    Ok(None)
}

/// Parse, execute and render one command line.
pub fn handle_line(engine: &EngineHandle, catalog: &dyn TrackCatalog, line: &str) -> String {
    match ControlRequest::parse(line).and_then(|request| execute(engine, catalog, request)) {
        Ok(None) => "OK".to_string(),
        Ok(Some(payload)) => format!("OK {payload}"),
        Err(e) => {
            tracing::debug!(line, code = e.code(), "control command rejected");
            e.into_reply()
        }
    }
}

/// Accept loop for control clients; one thread per client.
pub struct ControlServer {
    local_addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    acceptor: Option<JoinHandle<()>>,
}

impl ControlServer {
    pub fn spawn(
        bind: SocketAddr,
        engine: EngineHandle,
        catalog: Arc<dyn TrackCatalog>,
    ) -> Result<Self> {
        let listener = TcpListener::bind(bind).with_context(|| format!("bind {bind}"))?;
        listener
            .set_nonblocking(true)
            .context("set control listener nonblocking")?;
        let local_addr = listener.local_addr().context("control listener address")?;
        tracing::info!(bind = %local_addr, "control listener ready");

        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = shutdown.clone();
        let acceptor = std::thread::Builder::new()
            .name("control-accept".to_string())
            .spawn(move || accept_loop(listener, &stop, engine, catalog))
            .context("spawn control accept thread")?;
        Ok(Self {
            local_addr,
            shutdown,
            acceptor: Some(acceptor),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting new clients. Connected clients finish on disconnect.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(acceptor) = self.acceptor.take() {
            let _ = acceptor.join();
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn accept_loop(
    listener: TcpListener,
    shutdown: &AtomicBool,
    engine: EngineHandle,
    catalog: Arc<dyn TrackCatalog>,
) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                tracing::info!(peer = %peer, "control client connected");
                let engine = engine.clone();
                let catalog = catalog.clone();
                let spawned = std::thread::Builder::new()
                    .name("control-client".to_string())
                    .spawn(move || {
                        if let Err(e) = serve_client(stream, &engine, catalog.as_ref()) {
                            tracing::warn!(peer = %peer, "control client error: {e:#}");
                        }
                        tracing::info!(peer = %peer, "control client disconnected");
                    });
                if let Err(e) = spawned {
                    tracing::warn!("spawn control client thread: {e}");
                }
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(ACCEPT_POLL),
            Err(e) => {
                tracing::warn!("control accept error: {e}");
                std::thread::sleep(ACCEPT_POLL);
            }
        }
    }
    tracing::debug!("control listener stopped");
}

fn serve_client(stream: TcpStream, engine: &EngineHandle, catalog: &dyn TrackCatalog) -> Result<()> {
    stream
        .set_nonblocking(false)
        .context("set control client blocking")?;
    let reader = BufReader::new(stream.try_clone().context("clone control stream")?);
    let mut writer = stream;
    for line in reader.lines() {
        let line = line.context("read control command")?;
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(engine, catalog, &line);
        writeln!(writer, "{reply}").context("write control reply")?;
    }
    Ok(())
}
