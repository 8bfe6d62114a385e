//! Write-ahead log: append-only, line-delimited JSON.
//!
//! Every admitted message is serialized to a single JSON line before it is
//! offered to the queue. Each append opens the file in create-or-append mode
//! and closes it again, serialized by an internal lock so concurrent
//! producers cannot interleave lines. I/O errors are logged and swallowed;
//! the live path continues and relies on replication and the queue.

use crate::message::Message;
use crate::Result;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, warn};

#[derive(Debug)]
pub struct WalAppender {
    path: PathBuf,
    append_lock: Mutex<()>,
}

impl WalAppender {
    /// Create an appender for `path`, creating parent directories up front.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(Self {
            path,
            append_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one message as a JSON line. Errors are logged, never returned:
    /// a degraded WAL must not stall admission.
    pub fn append(&self, msg: &Message) {
        let line = match serde_json::to_string(msg) {
            Ok(line) => line,
            Err(e) => {
                error!("wal serialize failed id={} err={}", msg.id, e);
                return;
            }
        };

        let _guard = self.append_lock.lock().expect("wal append lock poisoned");
        let result = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| {
                file.write_all(line.as_bytes())?;
                file.write_all(b"\n")
            });

        if let Err(e) = result {
            error!(
                "wal append failed id={} path={} err={}",
                msg.id,
                self.path.display(),
                e
            );
        }
    }

    /// Line-iterate the log, handing each decodable record to `sink`.
    /// Corrupt lines are logged and skipped. Returns the number of records
    /// delivered; a missing file counts as an empty log.
    pub fn replay<F: FnMut(Message)>(&self, mut sink: F) -> Result<usize> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut delivered = 0usize;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Message>(&line) {
                Ok(msg) => {
                    sink(msg);
                    delivered += 1;
                }
                Err(e) => {
                    warn!(
                        "wal replay skipping corrupt line {} path={} err={}",
                        line_no + 1,
                        self.path.display(),
                        e
                    );
                }
            }
        }
        Ok(delivered)
    }
}
