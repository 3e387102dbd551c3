//! Append-only write-behind command log.
//!
//! Grounded in the teacher's background-task shape in
//! `storage::expiry::ExpirySweeper` (a single task draining work off a
//! channel, logging and continuing past errors) generalized from an
//! in-process sweep to a durable, ordered command log. Unlike the
//! sweeper, the producer side here is synchronous (called directly from
//! `CommandHandler::execute`), so the channel is a plain bounded
//! `std::sync::mpsc` rather than a tokio channel: backpressure on a full
//! channel is a blocking `send`, exactly as specified.

use crate::protocol::{ParseError, RespParser, RespValue};
use bytes::{Bytes, BytesMut};
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::thread::JoinHandle;
use tracing::{error, warn};

const CHANNEL_CAPACITY: usize = 65536;

#[derive(Debug, thiserror::Error)]
pub enum AofError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("protocol error during replay: {0}")]
    Parse(#[from] ParseError),
}

struct Record {
    db_index: usize,
    payload: Vec<u8>,
}

/// Cloneable handle used by command handlers to append write commands.
/// Capturing `db_index` by value in each `Record` sidesteps the
/// closure-captures-loop-variable hazard that a shared mutable index would
/// otherwise invite.
#[derive(Clone)]
pub struct AofHandle {
    tx: SyncSender<Record>,
}

impl AofHandle {
    /// Appends one write command's full original argument array (including
    /// the command name) for database `db_index`. Read-only commands must
    /// not call this.
    pub fn append(&self, db_index: usize, command: &[RespValue]) {
        let payload = RespValue::Array(command.to_vec()).serialize();
        if self.tx.send(Record { db_index, payload }).is_err() {
            warn!("AOF writer has shut down; dropping append");
        }
    }
}

pub struct Aof {
    handle: AofHandle,
    worker: Option<JoinHandle<()>>,
}

impl Aof {
    /// Replays an existing log against `apply`, then opens the append
    /// handle and spawns the background writer. Replay always completes
    /// before the file is reopened for new writes, so no append can race a
    /// replay read.
    pub fn open(path: impl AsRef<Path>, apply: impl FnMut(usize, RespValue)) -> Result<Self, AofError> {
        let path = path.as_ref();
        Self::replay(path, apply)?;

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let (tx, rx) = sync_channel(CHANNEL_CAPACITY);
        let worker = std::thread::spawn(move || Self::run_writer(file, rx));

        Ok(Self { handle: AofHandle { tx }, worker: Some(worker) })
    }

    pub fn handle(&self) -> AofHandle {
        self.handle.clone()
    }

    /// Drops this AOF's sender, letting the writer thread drain and exit,
    /// then joins it. Other outstanding `AofHandle` clones (e.g. held by
    /// still-open connections) keep the channel alive until they too drop.
    pub fn shutdown(self) {
        let Aof { handle, worker } = self;
        drop(handle);
        if let Some(w) = worker {
            let _ = w.join();
        }
    }

    fn replay(path: &Path, mut apply: impl FnMut(usize, RespValue)) -> Result<(), AofError> {
        if !path.exists() {
            return Ok(());
        }

        let mut raw = Vec::new();
        BufReader::new(File::open(path)?).read_to_end(&mut raw)?;
        let mut buf = BytesMut::from(&raw[..]);

        let mut parser = RespParser::new();
        let mut db_index = 0usize;

        loop {
            match parser.parse(&buf) {
                Ok(Some((value, consumed))) => {
                    let _ = buf.split_to(consumed);
                    if let Some(n) = select_target(&value) {
                        db_index = n;
                        continue;
                    }
                    apply(db_index, value);
                }
                // Incomplete trailing record: a truncated tail from a crash
                // mid-write. Stop cleanly, keeping everything read so far.
                Ok(None) => break,
                // First unrecoverable parse error: same recovery boundary.
                Err(_) => break,
            }
        }

        Ok(())
    }

    fn run_writer(mut file: File, rx: Receiver<Record>) {
        // `None` until the first record is written, mirroring Redis's
        // `aof_selected_db = -1`: the append handle is opened in append
        // mode, so the file's existing tail may end under any db, and we
        // have no way to know which without re-reading it. Forcing a
        // `SELECT` ahead of the very first record after open guarantees
        // correctness regardless of what db the previous run left active.
        let mut current_db: Option<usize> = None;
        let mut writer = BufWriter::new(&mut file);

        while let Ok(record) = rx.recv() {
            if current_db != Some(record.db_index) {
                let select = RespValue::Array(vec![
                    RespValue::bulk_string(Bytes::from_static(b"SELECT")),
                    RespValue::bulk_string(Bytes::from(record.db_index.to_string())),
                ])
                .serialize();
                if let Err(e) = writer.write_all(&select) {
                    error!(error = %e, "AOF write error on SELECT record");
                    continue;
                }
                current_db = Some(record.db_index);
            }

            if let Err(e) = writer.write_all(&record.payload) {
                error!(error = %e, "AOF write error");
                continue;
            }
            if let Err(e) = writer.flush() {
                error!(error = %e, "AOF flush error");
            }
        }
    }
}

fn select_target(value: &RespValue) -> Option<usize> {
    let args = value.as_array()?;
    let name = args.first()?.as_str()?;
    if !name.eq_ignore_ascii_case("SELECT") {
        return None;
    }
    args.get(1)?.as_str()?.parse::<usize>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("nimbuskv-aof-test-{}-{}", std::process::id(), name))
    }

    #[test]
    fn replay_empty_when_file_absent() {
        let path = tmp_path("absent");
        let _ = std::fs::remove_file(&path);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let aof = Aof::open(&path, move |db, cmd| seen2.lock().unwrap().push((db, cmd))).unwrap();
        assert!(seen.lock().unwrap().is_empty());
        aof.shutdown();
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn append_then_replay_reproduces_commands() {
        let path = tmp_path("roundtrip");
        let _ = std::fs::remove_file(&path);

        {
            let aof = Aof::open(&path, |_, _| {}).unwrap();
            let handle = aof.handle();
            handle.append(1, &[RespValue::bulk_string(Bytes::from("SET")), RespValue::bulk_string(Bytes::from("a")), RespValue::bulk_string(Bytes::from("1"))]);
            handle.append(2, &[RespValue::bulk_string(Bytes::from("SET")), RespValue::bulk_string(Bytes::from("b")), RespValue::bulk_string(Bytes::from("2"))]);
            aof.shutdown();
        }

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let aof = Aof::open(&path, move |db, cmd| seen2.lock().unwrap().push((db, cmd))).unwrap();
        aof.shutdown();

        let recorded = seen.lock().unwrap();
        assert_eq!(recorded.len(), 2);
        assert_eq!(recorded[0].0, 1);
        assert_eq!(recorded[1].0, 2);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn replay_stops_cleanly_at_truncated_tail() {
        let path = tmp_path("truncated");
        let mut f = File::create(&path).unwrap();
        f.write_all(b"*3\r\n$3\r\nSET\r\n$1\r\na\r\n$1\r\n1\r\n*3\r\n$3\r\nSET\r\n$1\r\nb\r\n$3\r\n1").unwrap();
        drop(f);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = Arc::clone(&seen);
        let aof = Aof::open(&path, move |db, cmd| seen2.lock().unwrap().push((db, cmd))).unwrap();
        aof.shutdown();

        assert_eq!(seen.lock().unwrap().len(), 1);
        let _ = std::fs::remove_file(&path);
    }
}
