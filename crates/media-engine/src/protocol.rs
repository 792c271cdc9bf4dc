//! Decoder remote-control vocabulary (`mpg123 -R` compatible).
//!
//! Outbound commands are single lines (`S`, `L <path>`, `J <n>s`, `P`, `V <level>`).
//! Inbound lines start with an `@X` marker naming the message class.

use std::path::PathBuf;

/// Marker the decoder prints once it accepts commands.
pub const READY_MARKER: &str = "@R";

/// Logical commands the dispatcher can send to the decoder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecoderCommand {
    Stop,
    Load(PathBuf),
    Seek(u32),
    TogglePause,
    SetVolume(u8),
}

impl DecoderCommand {
    /// Wire form, without the trailing newline.
    pub fn to_line(&self) -> String {
        match self {
            DecoderCommand::Stop => "S".to_string(),
            DecoderCommand::Load(path) => format!("L {}", path.display()),
            DecoderCommand::Seek(secs) => format!("J {secs}s"),
            DecoderCommand::TogglePause => "P".to_string(),
            DecoderCommand::SetVolume(level) => format!("V {}", (*level).min(100)),
        }
    }

    /// Reply prefix that acknowledges this command class.
    pub fn expected_marker(&self) -> &'static str {
        match self {
            DecoderCommand::Stop | DecoderCommand::TogglePause => "@P",
            DecoderCommand::Load(_) => "@S",
            DecoderCommand::Seek(_) => "@J",
            DecoderCommand::SetVolume(_) => "@V",
        }
    }

    pub fn is_seek(&self) -> bool {
        matches!(self, DecoderCommand::Seek(_))
    }
}

/// Playback state reported by `@P`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Paused,
    Playing,
}

/// One parsed line of decoder output.
#[derive(Clone, Debug, PartialEq)]
pub enum DecoderMessage {
    Ready,
    Status(PlayState),
    Error(String),
    Frame { elapsed: f64, remaining: f64 },
    /// Recognized class the engine does not act on (`@S`, `@I`, `@V`, `@J`).
    Ignored,
    Unknown,
}

impl DecoderMessage {
    pub fn parse(line: &str) -> Self {
        let line = line.trim_end_matches(['\r', '\n']);
        let (marker, rest) = match line.split_once(' ') {
            Some((marker, rest)) => (marker, rest),
            None => (line, ""),
        };
        match marker {
            READY_MARKER => DecoderMessage::Ready,
            "@P" => match rest.trim() {
                "0" => DecoderMessage::Status(PlayState::Stopped),
                "1" => DecoderMessage::Status(PlayState::Paused),
                "2" => DecoderMessage::Status(PlayState::Playing),
                _ => DecoderMessage::Unknown,
            },
            "@E" => DecoderMessage::Error(rest.to_string()),
            "@F" => {
                let fields: Vec<&str> = rest.split(' ').collect();
                DecoderMessage::Frame {
                    elapsed: parse_seconds(fields.get(2).copied()),
                    remaining: parse_seconds(fields.get(3).copied()),
                }
            }
            "@S" | "@I" | "@V" | "@J" => DecoderMessage::Ignored,
            _ => DecoderMessage::Unknown,
        }
    }
}

fn parse_seconds(field: Option<&str>) -> f64 {
    field
        .and_then(|f| f.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(0.0)
}

/// Drop every seek except the last one in a drained batch.
///
/// Only the final seek intent matters; earlier ones would make the decoder jump
/// through stale offsets.
pub fn coalesce_seeks(batch: Vec<DecoderCommand>) -> Vec<DecoderCommand> {
    let last_seek = batch.iter().rposition(DecoderCommand::is_seek);
    batch
        .into_iter()
        .enumerate()
        .filter(|(idx, cmd)| !cmd.is_seek() || Some(*idx) == last_seek)
        .map(|(_, cmd)| cmd)
        .collect()
}
