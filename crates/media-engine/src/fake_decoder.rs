//! In-process stand-in for the decoder subprocess.
//!
//! Replies like `mpg123 -R` by default and records every command line at the
//! moment it is written. A command written before the previous one got its
//! acknowledging reply (or an `@E`) is counted as an overlap.

use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Result, bail};
use crossbeam_channel::{Receiver, Sender};

use crate::supervisor::{DecoderLauncher, DecoderProcess, ProcessControl};

type Responder = dyn Fn(&FakeDecoder, &str, usize) -> Vec<String> + Send + Sync;

#[derive(Clone)]
pub(crate) struct FakeDecoder {
    inner: Arc<FakeInner>,
}

#[derive(Default)]
struct FakeInner {
    commands: Mutex<Vec<String>>,
    seen: Mutex<HashMap<String, usize>>,
    /// Acknowledgement marker the last written command is still waiting for.
    outstanding: Mutex<Option<&'static str>>,
    overlaps: AtomicUsize,
    launches: AtomicUsize,
    kills: AtomicUsize,
    fail_launches: AtomicBool,
    fail_kills: AtomicBool,
    paused: AtomicBool,
    responder: Mutex<Option<Arc<Responder>>>,
    stdout: Mutex<Option<Sender<Vec<u8>>>>,
    exited: Mutex<Option<Arc<AtomicBool>>>,
}

impl FakeDecoder {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(FakeInner::default()),
        }
    }

    /// Replace the reply script. The `usize` is how many times the same line was seen before.
    pub(crate) fn set_responder(
        &self,
        responder: impl Fn(&FakeDecoder, &str, usize) -> Vec<String> + Send + Sync + 'static,
    ) {
        *self.inner.responder.lock().unwrap() = Some(Arc::new(responder));
    }

    /// Replies of a well-behaved decoder; the acknowledging line always comes last.
    pub(crate) fn default_replies(&self, line: &str) -> Vec<String> {
        let (verb, rest) = line.split_once(' ').unwrap_or((line, ""));
        let replies: Vec<String> = match verb {
            "S" => vec!["@P 0".into()],
            "L" => vec![
                "@I ID3:fake".into(),
                "@P 2".into(),
                "@S 1.0 3 44100 Joint-Stereo 0 417 2 0 0 0 128 0 1".into(),
            ],
            "J" => vec!["@J 0".into()],
            "P" => {
                let paused = !self.inner.paused.fetch_xor(true, Ordering::SeqCst);
                vec![if paused { "@P 1" } else { "@P 2" }.into()]
            }
            "V" => vec![format!("@V {rest}.000000%")],
            _ => vec!["@E Unknown command".into()],
        };
        replies
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.inner.commands.lock().unwrap().clone()
    }

    pub(crate) fn overlaps(&self) -> usize {
        self.inner.overlaps.load(Ordering::SeqCst)
    }

    pub(crate) fn launches(&self) -> usize {
        self.inner.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn kills(&self) -> usize {
        self.inner.kills.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_launches(&self, fail: bool) {
        self.inner.fail_launches.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_kills(&self, fail: bool) {
        self.inner.fail_kills.store(fail, Ordering::SeqCst);
    }

    /// Push an unsolicited line to the running decoder's stdout.
    pub(crate) fn emit(&self, line: &str) {
        if let Some(tx) = self.inner.stdout.lock().unwrap().as_ref() {
            let _ = tx.send(format!("{line}\n").into_bytes());
        }
    }

    /// Simulate the process dying on its own.
    pub(crate) fn crash(&self) {
        if let Some(exited) = self.inner.exited.lock().unwrap().as_ref() {
            exited.store(true, Ordering::SeqCst);
        }
        self.inner.stdout.lock().unwrap().take();
    }

    /// Poll the recorded commands until `pred` holds or `timeout` passes.
    pub(crate) fn wait_until(&self, timeout: Duration, pred: impl Fn(&[String]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if pred(&self.commands()) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    fn record(&self, line: String) {
        let previous = self.inner.outstanding.lock().unwrap().replace(ack_marker(&line));
        if previous.is_some() {
            self.inner.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.inner.commands.lock().unwrap().push(line);
    }

    /// Clear the outstanding command once `reply` answers it.
    fn settle(&self, reply: &str) {
        let mut outstanding = self.inner.outstanding.lock().unwrap();
        if outstanding.is_some_and(|marker| reply.starts_with(marker)) || reply.starts_with("@E") {
            *outstanding = None;
        }
    }

    fn respond(&self, line: &str, out: &Sender<Vec<u8>>) {
        let seen = {
            let mut seen = self.inner.seen.lock().unwrap();
            let count = seen.entry(line.to_string()).or_insert(0);
            let before = *count;
            *count += 1;
            before
        };
        let responder = self.inner.responder.lock().unwrap().clone();
        let replies = match responder {
            Some(responder) => responder(self, line, seen),
            None => self.default_replies(line),
        };
        for reply in replies {
            self.settle(&reply);
            let _ = out.send(format!("{reply}\n").into_bytes());
        }
    }
}

impl DecoderLauncher for FakeDecoder {
    fn launch(&self) -> Result<DecoderProcess> {
        if self.inner.fail_launches.load(Ordering::SeqCst) {
            bail!("fake decoder refused to launch");
        }
        self.inner.launches.fetch_add(1, Ordering::SeqCst);
        self.inner.outstanding.lock().unwrap().take();
        self.inner.paused.store(false, Ordering::SeqCst);

        let (out_tx, out_rx) = crossbeam_channel::unbounded::<Vec<u8>>();
        let (in_tx, in_rx) = crossbeam_channel::unbounded::<String>();
        let exited = Arc::new(AtomicBool::new(false));
        let _ = out_tx.send(b"@R MPG123 (fake)\n".to_vec());
        *self.inner.stdout.lock().unwrap() = Some(out_tx.clone());
        *self.inner.exited.lock().unwrap() = Some(exited.clone());

        let fake = self.clone();
        let exited_for_thread = exited.clone();
        std::thread::spawn(move || {
            for line in in_rx.iter() {
                if exited_for_thread.load(Ordering::SeqCst) {
                    break;
                }
                fake.respond(&line, &out_tx);
            }
        });

        Ok(DecoderProcess {
            stdin: Box::new(FakeStdin {
                fake: self.clone(),
                tx: in_tx,
                buf: Vec::new(),
            }),
            stdout: Box::new(FakeStdout {
                rx: out_rx,
                pending: Vec::new(),
                pos: 0,
            }),
            control: Box::new(FakeControl {
                fake: self.clone(),
                exited,
            }),
        })
    }
}

fn ack_marker(line: &str) -> &'static str {
    match line.split_once(' ').map_or(line, |(verb, _)| verb) {
        "S" | "P" => "@P",
        "L" => "@S",
        "J" => "@J",
        "V" => "@V",
        _ => "@E",
    }
}

struct FakeStdin {
    fake: FakeDecoder,
    tx: Sender<String>,
    buf: Vec<u8>,
}

impl Write for FakeStdin {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buf.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]).into_owned();
            self.fake.record(line.clone());
            self.tx
                .send(line)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "fake decoder gone"))?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

struct FakeStdout {
    rx: Receiver<Vec<u8>>,
    pending: Vec<u8>,
    pos: usize,
}

impl Read for FakeStdout {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos >= self.pending.len() {
            match self.rx.recv() {
                Ok(chunk) => {
                    self.pending = chunk;
                    self.pos = 0;
                }
                Err(_) => return Ok(0),
            }
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

struct FakeControl {
    fake: FakeDecoder,
    exited: Arc<AtomicBool>,
}

impl ProcessControl for FakeControl {
    fn has_exited(&mut self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    fn kill(&mut self) -> io::Result<()> {
        if self.fake.inner.fail_kills.load(Ordering::SeqCst) {
            return Err(io::Error::other("kill refused"));
        }
        self.fake.inner.kills.fetch_add(1, Ordering::SeqCst);
        self.exited.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn wait(&mut self) -> io::Result<()> {
        if self.exited.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(io::Error::other("still running"))
        }
    }
}
