use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Encode a single record to [len][bincode][crc32] format. Returns the bytes written.
fn encode_record<T: Serialize>(writer: &mut impl Write, record: &T) -> io::Result<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(8 + payload.len() as u64)
}

/// Read one `u32` field. `Ok(None)` on a clean or truncated end of file.
fn read_u32(reader: &mut impl Read) -> io::Result<Option<u32>> {
    let mut buf = [0u8; 4];
    match reader.read_exact(&mut buf) {
        Ok(()) => Ok(Some(u32::from_le_bytes(buf))),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// Append-only Write-Ahead Log.
///
/// Format per entry: `[u32: len][bincode: record][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated or corrupt tail (crash mid-write) is discarded on replay.
/// - Records buffered since the last `flush_sync` can be taken back with `rollback`.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    pending_bytes: u64,
    pending_records: u64,
    /// A rollback failed, so the tail may hold records that were reported as failed.
    broken: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let committed_len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
            committed_len,
            pending_bytes: 0,
            pending_records: 0,
            broken: false,
        })
    }

    /// Append and fsync one record. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without flushing. Durable only after `flush_sync()`.
    pub fn append_buffered<T: Serialize>(&mut self, record: &T) -> io::Result<()> {
        if self.broken {
            return Err(io::Error::other(format!(
                "{} has an unrecoverable tail; appends refused until compaction",
                self.path.display()
            )));
        }
        self.pending_bytes += encode_record(&mut self.writer, record)?;
        self.pending_records += 1;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.committed_len += self.pending_bytes;
        self.pending_bytes = 0;
        self.pending_records = 0;
        Ok(())
    }

    /// Discard everything since the last successful `flush_sync`, both the
    /// buffer and any bytes that already reached the file.
    pub fn rollback(&mut self) -> io::Result<()> {
        let result = self.truncate_to_committed();
        if result.is_err() {
            self.broken = true;
        }
        self.appends_since_compact -= self.pending_records;
        self.pending_bytes = 0;
        self.pending_records = 0;
        result
    }

    fn truncate_to_committed(&mut self) -> io::Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        // into_parts hands back the unwritten buffer instead of flushing it.
        let (file, _discarded) =
            std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();
        drop(file);
        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Rewrite the log as exactly `records`: temp file, fsync, rename over, reopen.
    pub fn compact<T: Serialize>(&mut self, records: &[T]) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        let mut len = 0;
        {
            let mut writer = BufWriter::new(File::create(&tmp_path)?);
            for record in records {
                len += encode_record(&mut writer, record)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        self.committed_len = len;
        self.pending_bytes = 0;
        self.pending_records = 0;
        self.broken = false;
        Ok(())
    }

    /// Replay the WAL from disk, returning all valid records in order.
    /// Replay stops at the first truncated or corrupt entry.
    pub fn replay<T: DeserializeOwned>(path: &Path) -> io::Result<Vec<T>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let Some(len) = read_u32(&mut reader)? else {
                break;
            };

            let mut payload = vec![0u8; len as usize];
            match reader.read_exact(&mut payload) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    tracing::warn!("{}: truncated entry after {} records", path.display(), records.len());
                    break;
                }
                Err(e) => return Err(e),
            }

            let Some(stored_crc) = read_u32(&mut reader)? else {
                tracing::warn!("{}: truncated entry after {} records", path.display(), records.len());
                break;
            };
            if stored_crc != crc32fast::hash(&payload) {
                tracing::warn!("{}: checksum mismatch after {} records", path.display(), records.len());
                break;
            }

            match bincode::deserialize::<T>(&payload) {
                Ok(record) => records.push(record),
                Err(e) => {
                    tracing::warn!("{}: undecodable entry after {} records: {e}", path.display(), records.len());
                    break;
                }
            }
        }

        Ok(records)
    }
}
