use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc32fast::hash(&payload).to_le_bytes())?;
    Ok(())
}

/// Read exactly `buf.len()` bytes. `Ok(false)` means the log ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// Upper bound on one encoded event. A length prefix above it can only come
/// from a torn or corrupt entry.
const MAX_ENTRY_LEN: usize = 1 << 20;

/// Decode the next entry and the bytes it occupied. `Ok(None)` on a clean
/// end, a torn tail, or a corrupt entry.
fn decode_next(reader: &mut impl Read) -> io::Result<Option<(Event, u64)>> {
    let mut len_buf = [0u8; 4];
    if !read_full(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }
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
    // Intact bytes that do not decode were written by another build.
    let event = bincode::deserialize::<Event>(&payload)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    Ok(Some((event, (len + 8) as u64)))
}

/// What `Wal::replay` recovered.
#[derive(Debug)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Length of the intact prefix of the file.
    pub valid_len: u64,
    /// Bytes after the intact prefix; appending behind them would hide every
    /// later entry from the next replay.
    pub torn_bytes: u64,
}

/// Append-only Write-Ahead Log for property and reservation events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A torn last entry (crash mid-write) is discarded on replay.
pub struct Wal {
    writer: BufWriter<File>,
    path: PathBuf,
    appends_since_compact: u64,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            path: path.to_path_buf(),
            appends_since_compact: 0,
        })
    }

    /// Append and fsync one event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Buffer an event without flushing; `flush_sync` commits the batch.
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

    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Write compacted events to `<wal>.tmp` and fsync. Slow; the swap is separate.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.with_extension("wal.tmp"))?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the compacted file over the live log and reopen it.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        fs::rename(self.path.with_extension("wal.tmp"), &self.path)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Replay the WAL from disk, stopping at the first torn or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Ok(Replay {
                    events: Vec::new(),
                    valid_len: 0,
                    torn_bytes: 0,
                });
            }
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();
        let mut valid_len = 0;
        while let Some((event, consumed)) = decode_next(&mut reader)? {
            events.push(event);
            valid_len += consumed;
        }
        Ok(Replay {
            events,
            valid_len,
            torn_bytes: file_len.saturating_sub(valid_len),
        })
    }

    /// Cut the log back to `len` bytes and fsync.
    pub fn truncate(path: &Path, len: u64) -> io::Result<()> {
        let file = OpenOptions::new().write(true).open(path)?;
        file.set_len(len)?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CancellationPolicy, Location, Property, Span};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("stayd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn property_created(id: Ulid) -> Event {
        Event::PropertyCreated {
            property: Property {
                id,
                owner_id: Ulid::new(),
                name: "Harbour flat".into(),
                description: String::new(),
                address: "4 Quay Street".into(),
                price_per_night: dec!(100.00),
                deposit: dec!(25.00),
                cancellation_policy: CancellationPolicy::Free,
                cancellation_fee_per_night: Decimal::ZERO,
                location: Location::default(),
                window: Span::new(0, 1_000_000),
                available: true,
            },
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let pid = Ulid::new();
        let rid = Ulid::new();
        let events = vec![
            property_created(pid),
            Event::ReservationCreated {
                id: rid,
                property_id: pid,
                guest_id: Ulid::new(),
                span: Span::new(1_000, 2_000),
                reserved: true,
            },
            Event::ReservationStateChanged {
                id: rid,
                property_id: pid,
                reserved: false,
            },
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 3);
        }

        assert_eq!(Wal::replay(&path).unwrap().events, events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_drops_torn_tail() {
        let path = tmp_path("torn_tail.wal");
        let event = property_created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0u8; 6]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert_eq!(replay.torn_bytes, 6);
        assert_eq!(replay.valid_len, fs::metadata(&path).unwrap().len() - 6);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().events.is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("bad_crc.wal");
        let payload = bincode::serialize(&Event::PropertyDeleted { id: Ulid::new() }).unwrap();
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        assert!(Wal::replay(&path).unwrap().events.is_empty());
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_shrinks_log_and_resets_counter() {
        let path = tmp_path("compact.wal");
        let pid = Ulid::new();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&property_created(pid)).unwrap();
        for _ in 0..20 {
            let rid = Ulid::new();
            wal.append(&Event::ReservationCreated {
                id: rid,
                property_id: pid,
                guest_id: Ulid::new(),
                span: Span::new(0, 10),
                reserved: true,
            })
            .unwrap();
            wal.append(&Event::ReservationDeleted {
                id: rid,
                property_id: pid,
            })
            .unwrap();
        }
        let before = fs::metadata(&path).unwrap().len();

        let kept = vec![property_created(pid)];
        wal.compact(&kept).unwrap();
        assert_eq!(wal.appends_since_compact(), 0);
        assert!(fs::metadata(&path).unwrap().len() < before);
        assert_eq!(Wal::replay(&path).unwrap().events.len(), 1);

        // Appends after compaction land in the new file.
        wal.append(&Event::PropertyDeleted { id: pid }).unwrap();
        assert_eq!(Wal::replay(&path).unwrap().events.len(), 2);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn truncate_then_append_is_replayed() {
        let path = tmp_path("truncate_then_append.wal");
        let first = property_created(Ulid::new());
        let second = property_created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[0xAB; 11]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        Wal::truncate(&path, replay.valid_len).unwrap();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&second).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![first, second]);
        assert_eq!(replay.torn_bytes, 0);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn oversized_length_prefix_is_treated_as_torn() {
        let path = tmp_path("oversized_len.wal");
        let event = property_created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&u32::MAX.to_le_bytes()).unwrap();
            f.write_all(&[0u8; 16]).unwrap();
        }

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events, vec![event]);
        assert_eq!(replay.torn_bytes, 20);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn intact_but_undecodable_entry_is_an_error() {
        let path = tmp_path("undecodable.wal");
        let payload = [0xFFu8; 8];
        {
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&crc32fast::hash(&payload).to_le_bytes()).unwrap();
        }

        let err = Wal::replay(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        let _ = fs::remove_file(&path);
    }
}
