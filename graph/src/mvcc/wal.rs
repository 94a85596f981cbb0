use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use fs4::FileExt;
use serde_derive::{Deserialize, Serialize};

use crate::error::{CResult, Error};
use super::TransactionId;

/// A write-ahead log record. The engine appends one per transaction state
/// change, while holding its lock, so a replayed prefix is always consistent
/// with the id counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalRecord {
    Begin(TransactionId),
    Commit(TransactionId),
    Abort(TransactionId),
}

impl WalRecord {
    pub fn id(&self) -> TransactionId {
        match *self {
            WalRecord::Begin(id) | WalRecord::Commit(id) | WalRecord::Abort(id) => id,
        }
    }
}

/// The durability sink the transaction engine appends to. The engine calls
/// these while holding its internal lock; implementations only need to append.
pub trait Wal: Send {
    fn tx_begin(&mut self, id: TransactionId) -> CResult<()>;

    fn tx_commit(&mut self, id: TransactionId) -> CResult<()>;

    fn tx_abort(&mut self, id: TransactionId) -> CResult<()>;
}

/// An append-only log file of [`WalRecord`]s, each encoded as:
///
/// - Record length as big-endian u32.
/// - The bincode-encoded record.
pub struct FileWal {
    /// Path to the log file.
    pub(crate) path: PathBuf,
    /// The opened file containing the log.
    file: std::fs::File,
}

impl FileWal {
    /// Opens a log file, or creates one if it does not exist. Takes out an
    /// exclusive lock on the file until it is closed, or errors if the lock
    /// is already held.
    pub fn new(path: PathBuf) -> CResult<Self> {
        if let Some(dir) = path.parent() {
            match std::fs::create_dir_all(dir) {
                Ok(_) => {}
                Err(err) => {
                    return Err(Error::Internal(format!("{}:{:?}", err, dir.to_str())))
                }
            }
        }

        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        // 锁文件。 不允许其他进程篡改。
        file.try_lock_exclusive()?;

        Ok(Self { path, file })
    }

    /// Appends a record and flushes it to the file.
    pub fn append(&mut self, record: &WalRecord) -> CResult<()> {
        let bytes = bincode::serialize(record)?;
        self.file.seek(SeekFrom::End(0))?;
        self.file.write_u32::<BigEndian>(bytes.len() as u32)?;
        self.file.write_all(&bytes)?;
        self.file.flush()?;
        Ok(())
    }

    /// Reads all records back from the start of the file, for recovery on
    /// startup. An incomplete entry at the end of the file is assumed to be
    /// an interrupted write and truncated away.
    pub fn replay(&mut self) -> CResult<Vec<WalRecord>> {
        let mut records = Vec::new();
        let file_len = self.file.metadata()?.len();
        let mut r = BufReader::new(&mut self.file);

        let mut pos = r.seek(SeekFrom::Start(0))?;
        while pos < file_len {
            // Read the next entry from the file, returning it together with
            // the position it ends at.
            let mut result = || -> Result<(WalRecord, u64), std::io::Error> {
                let len = r.read_u32::<BigEndian>()?;
                if pos + 4 + len as u64 > file_len {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "record extends beyond end of file",
                    ));
                }
                let mut bytes = vec![0; len as usize];
                r.read_exact(&mut bytes)?;
                let record = bincode::deserialize(&bytes).map_err(|err| {
                    std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
                })?;
                Ok((record, pos + 4 + len as u64))
            };

            match result() {
                Ok((record, next)) => {
                    records.push(record);
                    pos = next;
                }
                // If an incomplete entry was found at the end of the file,
                // assume an incomplete write and truncate the file.
                Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => {
                    log::error!("Found incomplete wal entry at offset {}, truncating file", pos);
                    drop(r);
                    self.file.set_len(pos)?;
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(records)
    }
}

impl Wal for FileWal {
    fn tx_begin(&mut self, id: TransactionId) -> CResult<()> {
        self.append(&WalRecord::Begin(id))
    }

    fn tx_commit(&mut self, id: TransactionId) -> CResult<()> {
        self.append(&WalRecord::Commit(id))
    }

    fn tx_abort(&mut self, id: TransactionId) -> CResult<()> {
        self.append(&WalRecord::Abort(id))
    }
}

/// An in-memory record sink, for tests and for engines that want the append
/// ordering without a file. Clones share the same record list.
#[derive(Clone, Default)]
pub struct MemoryWal {
    records: Arc<Mutex<Vec<WalRecord>>>,
}

impl MemoryWal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<WalRecord> {
        self.records.lock().map(|records| records.clone()).unwrap_or_default()
    }

    fn push(&mut self, record: WalRecord) -> CResult<()> {
        self.records.lock()?.push(record);
        Ok(())
    }
}

impl Wal for MemoryWal {
    fn tx_begin(&mut self, id: TransactionId) -> CResult<()> {
        self.push(WalRecord::Begin(id))
    }

    fn tx_commit(&mut self, id: TransactionId) -> CResult<()> {
        self.push(WalRecord::Commit(id))
    }

    fn tx_abort(&mut self, id: TransactionId) -> CResult<()> {
        self.push(WalRecord::Abort(id))
    }
}
