use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Bytes of framing around each payload: length prefix + CRC.
const FRAME_OVERHEAD: u64 = 8;

fn write_record<R: Serialize>(writer: &mut impl Write, record: &R) -> io::Result<u64> {
    let payload =
        bincode::serialize(record).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "record too large"))?;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(payload.len() as u64 + FRAME_OVERHEAD)
}

/// Fill `buf` completely, or report `false` if the file ends first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Read one framed record. `Ok(None)` marks the end of the usable log: clean
/// EOF, a torn write or a checksum mismatch.
fn read_record<R: DeserializeOwned>(reader: &mut impl Read) -> io::Result<Option<(R, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_full(reader, &mut payload)? {
        return Ok(None);
    }
    let mut crc_buf = [0u8; 4];
    if !read_full(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    match bincode::deserialize::<R>(&payload) {
        Ok(record) => Ok(Some((record, len as u64 + FRAME_OVERHEAD))),
        Err(_) => Ok(None),
    }
}

/// Result of scanning a log file.
#[derive(Debug)]
pub struct Replay<R> {
    pub records: Vec<R>,
    /// Length of the intact prefix. Anything after it is a torn or corrupt tail.
    pub valid_len: u64,
    pub file_len: u64,
}

impl<R> Replay<R> {
    pub fn discarded_bytes(&self) -> u64 {
        self.file_len - self.valid_len
    }
}

/// Append-only write-ahead log of `R` records.
///
/// Each entry is `[u32 le: len][bincode payload][u32 le: crc32(payload)]`.
/// Replay stops at the first entry that is short or fails its checksum.
pub struct Wal<R> {
    writer: BufWriter<File>,
    path: PathBuf,
    /// Bytes written, including records not yet synced.
    len: u64,
    /// Length and append count as of the last successful `flush_sync`.
    synced_len: u64,
    synced_appends: u64,
    appends_since_compact: u64,
    _record: PhantomData<fn(R)>,
}

impl<R: Serialize + DeserializeOwned> Wal<R> {
    /// Open (or create) the log for appending.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            len,
            synced_len: len,
            synced_appends: 0,
            appends_since_compact: 0,
            _record: PhantomData,
        })
    }

    /// Replay the log, cut off any damaged tail, and open it for appending.
    /// Without the cut, records appended after a torn entry would be
    /// unreachable on the next replay.
    pub fn recover(path: &Path) -> io::Result<(Self, Vec<R>)> {
        let replay = Self::replay(path)?;
        if replay.discarded_bytes() > 0 {
            tracing::warn!(
                "WAL {}: discarding {} bytes of damaged tail",
                path.display(),
                replay.discarded_bytes()
            );
            OpenOptions::new()
                .write(true)
                .open(path)?
                .set_len(replay.valid_len)?;
        }
        let wal = Self::open(path)?;
        Ok((wal, replay.records))
    }

    /// Scan every intact record. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Replay<R>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    records: Vec::new(),
                    valid_len: 0,
                    file_len: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut records = Vec::new();
        let mut valid_len = 0u64;
        while let Some((record, size)) = read_record::<R>(&mut reader)? {
            records.push(record);
            valid_len += size;
        }
        Ok(Replay {
            records,
            valid_len,
            file_len,
        })
    }

    /// Append and fsync a single record. Tests only; the engine batches with
    /// `append_buffered` + `flush_sync`.
    #[cfg(test)]
    pub fn append(&mut self, record: &R) -> io::Result<()> {
        self.append_buffered(record)?;
        self.flush_sync()
    }

    /// Buffer a record without syncing. Durable only after `flush_sync`.
    pub fn append_buffered(&mut self, record: &R) -> io::Result<()> {
        self.len += write_record(&mut self.writer, record)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        self.synced_len = self.len;
        self.synced_appends = self.appends_since_compact;
        Ok(())
    }

    /// Drop everything written since the last successful `flush_sync`, both
    /// the buffer and any bytes that already reached the file. Later appends
    /// then follow the last intact record instead of a torn one.
    pub fn rollback(&mut self) -> io::Result<()> {
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let old = std::mem::replace(&mut self.writer, BufWriter::new(file));
        let (old_file, _unwritten) = old.into_parts();
        old_file.set_len(self.synced_len)?;
        old_file.sync_all()?;
        self.len = self.synced_len;
        self.appends_since_compact = self.synced_appends;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write a replacement log next to the live one and fsync it.
    pub fn write_compact_file(path: &Path, records: &[R]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(Self::compact_tmp_path(path))?);
        for record in records {
            write_record(&mut writer, record)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the replacement over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let len = file.metadata()?.len();
        self.writer = BufWriter::new(file);
        self.len = len;
        self.synced_len = len;
        self.synced_appends = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, records: &[R]) -> io::Result<()> {
        Self::write_compact_file(&self.path, records)?;
        self.swap_compact_file()
    }
}
