use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::model::Event;

/// Bytes around each payload: u32 length before, u32 crc32 after.
const FRAME_OVERHEAD: u64 = 8;

/// Largest payload a record may carry. A longer length prefix is corruption.
const MAX_RECORD_BYTES: usize = 1 << 20;

/// Encode a single event as `[len][bincode][crc32]`.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload = bincode::serialize(event).map_err(|e| io::Error::new(ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_RECORD_BYTES {
        return Err(io::Error::new(ErrorKind::InvalidData, "event too large for a wal record"));
    }
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

enum Frame {
    Event(Event, u64),
    End,
    /// A partial or corrupt record. Nothing after it is trusted.
    Torn,
}

/// Fill `buf`, telling a clean end of file apart from a short read.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<Option<usize>> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => return Ok(if filled == 0 { None } else { Some(filled) }),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(filled))
}

fn decode_event(reader: &mut impl Read) -> io::Result<Frame> {
    let mut len_buf = [0u8; 4];
    match read_full(reader, &mut len_buf)? {
        None => return Ok(Frame::End),
        Some(4) => {}
        Some(_) => return Ok(Frame::Torn),
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_RECORD_BYTES {
        return Ok(Frame::Torn);
    }

    let mut payload = vec![0u8; len];
    if len > 0 && read_full(reader, &mut payload)? != Some(len) {
        return Ok(Frame::Torn);
    }
    let mut crc_buf = [0u8; 4];
    if read_full(reader, &mut crc_buf)? != Some(4) {
        return Ok(Frame::Torn);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Frame::Torn);
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Frame::Event(event, len as u64 + FRAME_OVERHEAD)),
        Err(_) => Ok(Frame::Torn),
    }
}

/// Every intact event from the start of the log, and the byte length they span.
fn read_log(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut reader = BufReader::new(file);
    let mut events = Vec::new();
    let mut valid_len = 0u64;
    while let Frame::Event(event, size) = decode_event(&mut reader)? {
        events.push(event);
        valid_len += size;
    }
    Ok((events, valid_len))
}

/// Append-only log of membership, amenity, schedule and reservation events
/// for one tenant. The engine's state is whatever replaying it produces.
///
/// Each record is `[u32 len][bincode Event][u32 crc32]`, little-endian, where
/// `len` counts the payload only. A crash mid-append leaves a torn tail, which
/// `open` cuts off before new records go in after it.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the log at `path`, returning it with the events it holds.
    pub fn open(path: &Path) -> io::Result<(Self, Vec<Event>)> {
        let (events, valid_len) = read_log(path)?;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let on_disk = file.metadata()?.len();
        if on_disk > valid_len {
            warn!(
                "{}: dropping {} bytes of torn tail after {} events",
                path.display(),
                on_disk - valid_len,
                events.len()
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        if !events.is_empty() {
            info!("{}: replayed {} events", path.display(), events.len());
        }
        let wal = Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        };
        Ok((wal, events))
    }

    /// Events currently on disk, without opening for writes.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        read_log(path).map(|(events, _)| events)
    }

    /// Append and fsync one event. The writer task batches with
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer one event. Not durable until `flush_sync`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        self.path.with_extension("wal.tmp")
    }

    /// Write a snapshot to `<name>.wal.tmp` and fsync it. The live log is untouched.
    pub fn write_compact_file(&self, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(self.tmp_path())?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the snapshot over the log and reopen for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.tmp_path(), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }
}
