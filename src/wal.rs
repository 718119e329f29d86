use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::limits::MAX_WAL_FRAME_BYTES;
use crate::model::Event;

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("encoding WAL record failed: {0}")]
    Encode(#[from] bincode::Error),
    #[error("WAL write failed, batch rolled back: {0}")]
    Io(#[from] io::Error),
    #[error("WAL write failed ({write}); rollback to offset {offset} failed ({rollback})")]
    RollbackFailed {
        write: io::Error,
        rollback: io::Error,
        offset: u64,
    },
    #[error("compacted WAL installed but could not be reopened: {0}")]
    ReopenFailed(io::Error),
}

/// Switches that make the next I/O of a given kind fail. Test builds only.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct Faults {
    pub writes: std::sync::atomic::AtomicBool,
    pub rollbacks: std::sync::atomic::AtomicBool,
    pub reopens: std::sync::atomic::AtomicBool,
}

#[cfg(test)]
impl Faults {
    fn check(flag: &std::sync::atomic::AtomicBool, what: &str) -> io::Result<()> {
        if flag.load(std::sync::atomic::Ordering::SeqCst) {
            Err(io::Error::other(format!("injected {what} failure")))
        } else {
            Ok(())
        }
    }
}

/// Append one `[u32 len][bincode][u32 crc32]` frame to `buf`.
fn encode_frame(buf: &mut Vec<u8>, event: &Event) -> Result<(), WalError> {
    let payload = bincode::serialize(event)?;
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    Ok(())
}

/// Read the next frame payload. `None` means clean EOF, a torn frame, or a
/// checksum mismatch: everything from here on is unusable.
fn read_frame(reader: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_WAL_FRAME_BYTES {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    let mut crc_buf = [0u8; 4];
    for buf in [&mut payload[..], &mut crc_buf[..]] {
        match reader.read_exact(buf) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e),
        }
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

/// Result of scanning a log file.
#[derive(Debug)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix. Anything past it is a torn tail.
    pub valid_len: u64,
}

/// Append-only Write-Ahead Log.
///
/// Each commit writes a whole batch of frames with one `write_all` and one
/// fsync. A failed commit truncates the file back to where the batch began, so
/// the log never holds a record the in-memory state did not apply.
pub struct Wal {
    file: File,
    path: PathBuf,
    /// Length of the durable, valid prefix.
    len: u64,
    appends_since_compact: u64,
    #[cfg(test)]
    faults: std::sync::Arc<Faults>,
}

impl Wal {
    /// Open (or create) the log, replay it, and cut off any torn tail so that
    /// later appends stay readable.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let replay = Self::replay(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > replay.valid_len {
            warn!(
                path = %path.display(),
                discarded_bytes = on_disk - replay.valid_len,
                "truncating torn WAL tail"
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        let wal = Self {
            file,
            path: path.to_path_buf(),
            len: replay.valid_len,
            appends_since_compact: replay.events.len() as u64,
            #[cfg(test)]
            faults: Default::default(),
        };
        Ok((wal, replay.events))
    }

    /// Durably append a batch. All-or-nothing.
    pub fn commit(&mut self, events: &[Event]) -> Result<(), WalError> {
        let mut buf = Vec::new();
        for event in events {
            encode_frame(&mut buf, event)?;
        }
        let start = self.len;
        let written = self
            .fault_on_write()
            .and_then(|()| self.file.write_all(&buf))
            .and_then(|()| self.file.sync_data());
        match written {
            Ok(()) => {
                self.len += buf.len() as u64;
                self.appends_since_compact += events.len() as u64;
                Ok(())
            }
            Err(write) => match self.rollback_to(start) {
                Ok(()) => Err(WalError::Io(write)),
                Err(rollback) => Err(WalError::RollbackFailed {
                    write,
                    rollback,
                    offset: start,
                }),
            },
        }
    }

    /// Drop everything past `offset`.
    pub(crate) fn rollback_to(&mut self, offset: u64) -> io::Result<()> {
        self.fault_on_rollback()?;
        self.file.set_len(offset)?;
        self.file.sync_all()?;
        self.len = offset;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write compacted events to a temp file and fsync. Slow; the writer task
    /// runs it between batches.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> Result<(), WalError> {
        let mut buf = Vec::new();
        for event in events {
            encode_frame(&mut buf, event)?;
        }
        let mut file = File::create(path.with_extension("wal.tmp"))?;
        file.write_all(&buf)?;
        file.sync_all()?;
        Ok(())
    }

    /// Rename the temp file over the log and reopen it.
    ///
    /// A failed rename leaves the old log in place and usable. A failed reopen
    /// does not: `self.file` still points at the replaced inode, so the caller
    /// must stop writing.
    pub fn swap_compact_file(&mut self) -> Result<(), WalError> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let reopened = self.fault_on_reopen().and_then(|()| {
            let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            let len = file.metadata()?.len();
            Ok((file, len))
        });
        let (file, len) = reopened.map_err(WalError::ReopenFailed)?;
        self.file = file;
        self.len = len;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn faults(&self) -> std::sync::Arc<Faults> {
        self.faults.clone()
    }

    #[cfg(test)]
    fn fault_on_write(&self) -> io::Result<()> {
        Faults::check(&self.faults.writes, "write")
    }

    #[cfg(not(test))]
    fn fault_on_write(&self) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn fault_on_rollback(&self) -> io::Result<()> {
        Faults::check(&self.faults.rollbacks, "rollback")
    }

    #[cfg(not(test))]
    fn fault_on_rollback(&self) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn fault_on_reopen(&self) -> io::Result<()> {
        Faults::check(&self.faults.reopens, "reopen")
    }

    #[cfg(not(test))]
    fn fault_on_reopen(&self) -> io::Result<()> {
        Ok(())
    }

    /// Scan the log from disk. Stops at the first unusable frame.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    events: Vec::new(),
                    valid_len: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0u64;

        while let Some(payload) = read_frame(&mut reader)? {
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => events.push(event),
                Err(_) => break,
            }
            valid_len += 8 + payload.len() as u64;
        }

        Ok(Replay { events, valid_len })
    }
}
