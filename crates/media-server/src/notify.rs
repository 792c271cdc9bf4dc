//! Status notification fan-out over TCP.
//!
//! Every connected client receives one JSON line per published snapshot.
//! Publishing never blocks the engine: snapshots go through a bounded channel
//! and are dropped while it is full.

use std::io::{ErrorKind, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};

use media_engine::StatusSink;
use media_types::PlaybackStatus;

const QUEUE_DEPTH: usize = 8;
const POLL: Duration = Duration::from_millis(100);
const WRITE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connected clients. Streams are shared so writes can run without holding the lock.
type Clients = Arc<Mutex<Vec<(SocketAddr, Arc<TcpStream>)>>>;

pub struct NotificationServer {
    local_addr: SocketAddr,
    tx: Sender<String>,
    clients: Clients,
    shutdown: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl NotificationServer {
    pub fn spawn(bind: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(bind).with_context(|| format!("bind {bind}"))?;
        listener
            .set_nonblocking(true)
            .context("set notification listener nonblocking")?;
        let local_addr = listener
            .local_addr()
            .context("notification listener address")?;
        tracing::info!(bind = %local_addr, "notification listener ready");

        let (tx, rx) = crossbeam_channel::bounded::<String>(QUEUE_DEPTH);
        let clients: Clients = Arc::new(Mutex::new(Vec::new()));
        let shutdown = Arc::new(AtomicBool::new(false));
        let server = Self {
            local_addr,
            tx,
            clients: clients.clone(),
            shutdown: shutdown.clone(),
            workers: Mutex::new(Vec::with_capacity(2)),
        };

        let acceptor = {
            let clients = clients.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("notify-accept".to_string())
                .spawn(move || accept_loop(listener, &clients, &shutdown))
                .context("spawn notification accept thread")?
        };
        server.workers().push(acceptor);
        let writer = std::thread::Builder::new()
            .name("notify-writer".to_string())
            .spawn(move || write_loop(rx, &clients, &shutdown))
            .context("spawn notification writer thread")?;
        server.workers().push(writer);
        Ok(server)
    }

    fn workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn client_count(&self) -> usize {
        lock_clients(&self.clients).len()
    }

    /// Stop both threads and disconnect every client. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let workers: Vec<_> = self.workers().drain(..).collect();
        for worker in workers {
            let _ = worker.join();
        }
        for (_, stream) in lock_clients(&self.clients).drain(..) {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
    }
}

impl Drop for NotificationServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl StatusSink for NotificationServer {
    fn publish(&self, status: &PlaybackStatus) {
        let line = match serde_json::to_string(status) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("encode status: {e}");
                return;
            }
        };
        match self.tx.try_send(line) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => tracing::debug!("notification queue full; snapshot dropped"),
        }
    }
}

fn lock_clients<S>(clients: &Mutex<Vec<(SocketAddr, S)>>) -> MutexGuard<'_, Vec<(SocketAddr, S)>> {
    clients.lock().unwrap_or_else(PoisonError::into_inner)
}

fn accept_loop(listener: TcpListener, clients: &Clients, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, peer)) => {
                let ready = stream
                    .set_nonblocking(false)
                    .and_then(|()| stream.set_write_timeout(Some(WRITE_TIMEOUT)));
                if let Err(e) = ready {
                    tracing::warn!(peer = %peer, "notification client setup failed: {e}");
                    continue;
                }
                tracing::info!(peer = %peer, "notification client connected");
                lock_clients(clients).push((peer, Arc::new(stream)));
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => std::thread::sleep(POLL),
            Err(e) => {
                tracing::warn!("notification accept error: {e}");
                std::thread::sleep(POLL);
            }
        }
    }
}

fn write_loop(rx: Receiver<String>, clients: &Clients, shutdown: &AtomicBool) {
    while !shutdown.load(Ordering::Relaxed) {
        let line = match rx.recv_timeout(POLL) {
            Ok(line) => line,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };
        fan_out(&line, clients);
    }
}

/// Write `line` to every client without holding the client lock, then drop the
/// clients whose write failed. Returns how many were dropped.
fn fan_out<S>(line: &str, clients: &Mutex<Vec<(SocketAddr, Arc<S>)>>) -> usize
where
    for<'a> &'a S: Write,
{
    let targets: Vec<(SocketAddr, Arc<S>)> = lock_clients(clients)
        .iter()
        .map(|(peer, stream)| (*peer, stream.clone()))
        .collect();
    let mut failed = Vec::new();
    for (peer, stream) in targets {
        let mut writer = &*stream;
        let written = writer
            .write_all(line.as_bytes())
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = written {
            tracing::info!(peer = %peer, "notification client dropped: {e}");
            failed.push(stream);
        }
    }
    if !failed.is_empty() {
        lock_clients(clients)
            .retain(|(_, stream)| !failed.iter().any(|gone| Arc::ptr_eq(gone, stream)));
    }
    failed.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};
    use std::sync::OnceLock;
    use std::time::Instant;

    type TestClients = Mutex<Vec<(SocketAddr, Arc<TestClient>)>>;

    /// Writer that records whether the client list was locked while it was written to.
    struct TestClient {
        clients: OnceLock<Arc<TestClients>>,
        fail: bool,
        written: Mutex<Vec<u8>>,
        saw_lock_held: AtomicBool,
    }

    impl TestClient {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                clients: OnceLock::new(),
                fail,
                written: Mutex::new(Vec::new()),
                saw_lock_held: AtomicBool::new(false),
            })
        }
    }

    impl Write for &TestClient {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if let Some(clients) = self.clients.get() {
                if clients.try_lock().is_err() {
                    self.saw_lock_held.store(true, Ordering::SeqCst);
                }
            }
            if self.fail {
                return Err(std::io::Error::new(ErrorKind::BrokenPipe, "gone"));
            }
            self.written.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn fan_out_writes_without_holding_client_lock() {
        let healthy = TestClient::new(false);
        let broken = TestClient::new(true);
        let clients: Arc<TestClients> = Arc::new(Mutex::new(vec![
            ("127.0.0.1:5001".parse().unwrap(), broken.clone()),
            ("127.0.0.1:5002".parse().unwrap(), healthy.clone()),
        ]));
        for client in [&healthy, &broken] {
            let _ = client.clients.set(clients.clone());
        }

        assert_eq!(fan_out("{\"IsPlaying\":true}", &clients), 1);
        assert_eq!(
            healthy.written.lock().unwrap().as_slice(),
            b"{\"IsPlaying\":true}\n"
        );
        assert!(!healthy.saw_lock_held.load(Ordering::SeqCst));
        assert!(!broken.saw_lock_held.load(Ordering::SeqCst));

        let remaining = clients.lock().unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(Arc::ptr_eq(&remaining[0].1, &healthy));
    }

    fn wait_for(pred: impl Fn() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if pred() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn delivers_json_lines_to_connected_clients() {
        let server = NotificationServer::spawn("127.0.0.1:0".parse().unwrap()).unwrap();
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        assert!(wait_for(|| server.client_count() == 1));

        let status = PlaybackStatus {
            playlist_position: 1,
            playlist: vec![4, 9],
            is_playing: true,
            position: 12,
            duration: 200,
            can_move_previous: true,
            ..PlaybackStatus::default()
        };
        server.publish(&status);

        let mut line = String::new();
        BufReader::new(stream).read_line(&mut line).unwrap();
        let received: PlaybackStatus = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(received, status);
        assert!(line.contains("\"PlaylistPosition\":1"));
    }

    #[test]
    fn disconnected_clients_are_dropped() {
        let server = NotificationServer::spawn("127.0.0.1:0".parse().unwrap()).unwrap();
        let stream = TcpStream::connect(server.local_addr()).unwrap();
        assert!(wait_for(|| server.client_count() == 1));
        drop(stream);

        assert!(wait_for(|| {
            server.publish(&PlaybackStatus::default());
            server.client_count() == 0
        }));
    }

    #[test]
    fn publish_without_clients_never_blocks() {
        let server = NotificationServer::spawn("127.0.0.1:0".parse().unwrap()).unwrap();
        for _ in 0..(QUEUE_DEPTH * 4) {
            server.publish(&PlaybackStatus::default());
        }
        server.shutdown();
        server.publish(&PlaybackStatus::default());
        assert_eq!(server.client_count(), 0);
    }
}
