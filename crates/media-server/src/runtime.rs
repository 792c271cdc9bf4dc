//! Server runtime: resolves settings and wires the engine to its listeners.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;

use media_engine::{EngineConfig, PlaybackEngine};

use crate::catalog::JsonCatalog;
use crate::cli::Args;
use crate::config::{self, ServerConfig};
use crate::control::ControlServer;
use crate::discovery::{self, DiscoveryConfig};
use crate::mounts::ConfiguredMounts;
use crate::notify::NotificationServer;

const SHUTDOWN_POLL: Duration = Duration::from_millis(200);

/// Fully resolved settings (config file plus command-line overrides).
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub command_bind: SocketAddr,
    pub notification_bind: SocketAddr,
    pub catalog_path: PathBuf,
    pub engine: EngineConfig,
    pub devices: Vec<(String, PathBuf)>,
    /// `None` disables mDNS advertisement.
    pub discovery: Option<DiscoveryConfig>,
}

/// Load server config from disk, falling back to `config.toml` next to the executable.
pub fn load_config(path: Option<&Path>) -> Result<ServerConfig> {
    match path {
        Some(path) => ServerConfig::load(path),
        None => {
            let auto_path = std::env::current_exe()
                .ok()
                .and_then(|path| path.parent().map(|dir| dir.join("config.toml")));
            match auto_path {
                Some(path) if path.exists() => ServerConfig::load(&path),
                _ => Err(anyhow::anyhow!("config file is required; use --config")),
            }
        }
    }
}

/// Merge command-line overrides into the file config.
pub fn resolve(args: &Args, cfg: &ServerConfig) -> Result<RuntimeConfig> {
    let command_bind = match args.command_bind {
        Some(addr) => addr,
        None => config::command_bind_from_config(cfg)?,
    };
    let notification_bind = match args.notification_bind {
        Some(addr) => addr,
        None => config::notification_bind_from_config(cfg)?,
    };
    let mut engine = config::engine_config_from_config(cfg)?;
    if let Some(program) = args.decoder.as_ref() {
        engine.decoder.program = program.clone();
    }
    Ok(RuntimeConfig {
        command_bind,
        notification_bind,
        catalog_path: config::catalog_path_from_config(cfg)?,
        engine,
        devices: config::devices_from_config(cfg),
        discovery: if args.no_discovery {
            None
        } else {
            config::discovery_from_config(cfg)
        },
    })
}

/// Validate the catalog and device table without starting anything.
pub fn check_config(config: &RuntimeConfig) -> Result<()> {
    let catalog = JsonCatalog::load(&config.catalog_path)?;
    let mounts = ConfiguredMounts::new(config.devices.clone());
    for (id, path) in mounts.unavailable() {
        tracing::warn!(device = id, path = %path.display(), "device mount directory missing");
    }
    tracing::info!(
        command_bind = %config.command_bind,
        notification_bind = %config.notification_bind,
        decoder = %config.engine.decoder.program.display(),
        tracks = catalog.len(),
        devices = mounts.len(),
        discovery = config.discovery.is_some(),
        "config ok"
    );
    Ok(())
}

/// Run until Ctrl-C.
pub fn run(config: RuntimeConfig) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = shutdown.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        flag.store(true, Ordering::Relaxed);
    }) {
        tracing::warn!("install ctrl-c handler: {e}");
    }
    run_until(config, &shutdown)
}

/// Run until `shutdown` is set, then stop listeners, engine and decoder.
pub fn run_until(config: RuntimeConfig, shutdown: &AtomicBool) -> Result<()> {
    let catalog = Arc::new(JsonCatalog::load(&config.catalog_path)?);
    let mounts = Arc::new(ConfiguredMounts::new(config.devices));
    for (id, path) in mounts.unavailable() {
        tracing::warn!(device = id, path = %path.display(), "device not mounted yet");
    }
    tracing::info!(
        decoder = %config.engine.decoder.program.display(),
        tracks = catalog.len(),
        devices = mounts.len(),
        "starting carmedia"
    );

    let mut engine = PlaybackEngine::start(config.engine, mounts)?;
    let notifications = Arc::new(NotificationServer::spawn(config.notification_bind)?);
    engine.handle().set_status_sink(Some(notifications.clone()));
    let mut control = ControlServer::spawn(config.command_bind, engine.handle(), catalog)?;
    let advertiser = config.discovery.as_ref().and_then(|settings| {
        discovery::spawn_advertiser(settings, control.local_addr(), notifications.local_addr())
    });

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(SHUTDOWN_POLL);
    }

    tracing::info!("shutting down");
    if let Some(advertiser) = advertiser {
        advertiser.shutdown();
    }
    control.shutdown();
    engine.handle().set_status_sink(None);
    notifications.shutdown();
    engine.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::io::{BufRead, BufReader, Write};
    use std::net::TcpStream;

    #[test]
    fn cli_overrides_take_precedence() {
        let cfg: ServerConfig = toml::from_str(
            r#"
command_bind = "127.0.0.1:5000"
catalog_path = "catalog.json"
[decoder]
program = "mpg123"
"#,
        )
        .unwrap();
        let args = Args::try_parse_from([
            "carmedia",
            "--command-bind",
            "127.0.0.1:6000",
            "--decoder",
            "/opt/bin/mpg321",
        ])
        .unwrap();

        let resolved = resolve(&args, &cfg).unwrap();
        assert_eq!(resolved.command_bind, "127.0.0.1:6000".parse().unwrap());
        assert_eq!(resolved.notification_bind, "0.0.0.0:4201".parse().unwrap());
        assert_eq!(resolved.engine.decoder.program, PathBuf::from("/opt/bin/mpg321"));
        assert_eq!(resolved.catalog_path, PathBuf::from("catalog.json"));
        assert_eq!(resolved.discovery, Some(DiscoveryConfig::default()));

        let quiet = Args::try_parse_from(["carmedia", "--no-discovery"]).unwrap();
        assert_eq!(resolve(&quiet, &cfg).unwrap().discovery, None);
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(dir.path().join("nope.toml").as_path())).is_err());
    }

    fn local_config(dir: &Path) -> RuntimeConfig {
        let catalog_path = dir.join("catalog.json");
        std::fs::write(
            &catalog_path,
            r#"[{"id": 5, "device_id": "usb", "relative_path": "05.mp3"}]"#,
        )
        .unwrap();
        RuntimeConfig {
            command_bind: "127.0.0.1:0".parse().unwrap(),
            notification_bind: "127.0.0.1:0".parse().unwrap(),
            catalog_path,
            engine: EngineConfig {
                decoder: media_engine::DecoderConfig {
                    program: dir.join("no-decoder"),
                    args: vec![],
                },
                restart_delay: Duration::from_millis(10),
                ..EngineConfig::default()
            },
            devices: vec![("usb".to_string(), dir.join("usb"))],
            discovery: None,
        }
    }

    #[test]
    fn check_config_requires_readable_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = local_config(dir.path());
        check_config(&config).unwrap();
        config.catalog_path = dir.path().join("missing.json");
        assert!(check_config(&config).is_err());
    }

    #[test]
    fn run_until_stops_when_flag_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let shutdown = Arc::new(AtomicBool::new(false));
        let flag = shutdown.clone();
        let runner = std::thread::spawn(move || run_until(config, &flag));

        std::thread::sleep(Duration::from_millis(100));
        shutdown.store(true, Ordering::Relaxed);
        runner.join().unwrap().unwrap();
    }

    #[test]
    fn control_listener_reaches_engine() {
        let dir = tempfile::tempdir().unwrap();
        let config = local_config(dir.path());
        let catalog = Arc::new(JsonCatalog::load(&config.catalog_path).unwrap());
        let engine = PlaybackEngine::start(
            config.engine,
            Arc::new(ConfiguredMounts::new(config.devices)),
        )
        .unwrap();
        let control = ControlServer::spawn(config.command_bind, engine.handle(), catalog).unwrap();

        let mut stream = TcpStream::connect(control.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        stream.write_all(b"queue 5\nqueue 6\n").unwrap();

        let mut reply = String::new();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "OK\n");
        reply.clear();
        reader.read_line(&mut reply).unwrap();
        assert_eq!(reply, "ERR invalid_tracks unknown track ids: 6\n");
        assert_eq!(engine.handle().playlist_len(), 1);
    }
}
