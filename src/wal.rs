use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

enum Record {
    Event(Event),
    /// Clean end of file.
    End,
    /// Torn write or bit rot; everything from here on is dropped.
    Damaged(&'static str),
}

fn read_exact_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn decode_next(reader: &mut impl Read) -> io::Result<Record> {
    let mut len_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut len_buf)? {
        return Ok(Record::End);
    }
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; len];
    if !read_exact_or_eof(reader, &mut payload)? {
        return Ok(Record::Damaged("truncated payload"));
    }
    let mut crc_buf = [0u8; 4];
    if !read_exact_or_eof(reader, &mut crc_buf)? {
        return Ok(Record::Damaged("truncated checksum"));
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(Record::Damaged("checksum mismatch"));
    }
    match bincode::deserialize::<Event>(&payload) {
        Ok(event) => Ok(Record::Event(event)),
        Err(_) => Ok(Record::Damaged("undecodable payload")),
    }
}

/// Append-only Write-Ahead Log of scheduling events.
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

    /// Buffer one event without flushing. Call `flush_sync()` after the batch.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        encode_event(&mut self.writer, event)?;
        self.appends_since_compact += 1;
        Ok(())
    }

    /// Flush the BufWriter and fsync the underlying file.
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

    /// Write the compacted event list to `<wal>.tmp` and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let tmp_path = path.with_extension("wal.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        let tmp_path = self.path.with_extension("wal.tmp");
        fs::rename(&tmp_path, &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.writer = BufWriter::new(file);
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Replay the WAL from disk, returning all valid events.
    /// A damaged tail is logged and dropped; a missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut reader = BufReader::new(file);
        let mut events = Vec::new();

        loop {
            match decode_next(&mut reader)? {
                Record::Event(event) => events.push(event),
                Record::End => break,
                Record::Damaged(why) => {
                    tracing::warn!(
                        "wal {}: {why} after {} records, discarding tail",
                        path.display(),
                        events.len()
                    );
                    break;
                }
            }
        }

        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Span, WeeklyRule};
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fairslot_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn created(id: Ulid) -> Event {
        Event::SalespersonCreated {
            id,
            name: "Carla".into(),
            contact: None,
            target_share: 50.0,
            active: true,
        }
    }

    #[test]
    fn append_and_replay() {
        let path = tmp_path("append_and_replay.wal");
        let sp = Ulid::new();
        let events = vec![
            created(sp),
            Event::RuleAdded {
                salesperson_id: sp,
                rule: WeeklyRule {
                    id: Ulid::new(),
                    weekday: 1,
                    start_minute: 540,
                    end_minute: 720,
                    granularity_minutes: 30,
                },
            },
            Event::AppointmentBooked {
                id: Ulid::new(),
                salesperson_id: sp,
                lead_id: Some("lead-42".into()),
                scheduled_at: 1_900_000_000_000,
                duration_minutes: 30,
                notes: None,
            },
        ];

        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, events);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_handles_truncation() {
        let path = tmp_path("truncation.wal");
        let event = created(Ulid::new());
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap(); // header + partial payload
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![event]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn replay_nonexistent_file() {
        let path = tmp_path("nonexistent.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn replay_stops_at_bad_crc() {
        let path = tmp_path("corrupt_crc.wal");
        let good = created(Ulid::new());
        let bad = Event::SalespersonDeleted { id: Ulid::new() };
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&good).unwrap();
        }
        {
            let payload = bincode::serialize(&bad).unwrap();
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEADBEEFu32.to_le_bytes()).unwrap();
        }

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed, vec![good]);
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn compact_replaces_history() {
        let path = tmp_path("compact.wal");
        let sp = Ulid::new();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&created(sp)).unwrap();
            for _ in 0..10 {
                let id = Ulid::new();
                wal.append(&Event::BlackoutAdded {
                    id,
                    salesperson_id: sp,
                    span: Span::new(1000, 2000),
                    reason: Some("ferias".into()),
                })
                .unwrap();
                wal.append(&Event::BlackoutRemoved { id, salesperson_id: sp }).unwrap();
            }
        }
        let before = fs::metadata(&path).unwrap().len();

        let compacted = vec![created(sp)];
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.compact(&compacted).unwrap();
            assert_eq!(wal.appends_since_compact(), 0);
            wal.append(&Event::AssignmentRecorded { salesperson_id: sp }).unwrap();
        }

        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compacted WAL should be smaller: {after} < {before}");

        let replayed = Wal::replay(&path).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0], compacted[0]);
        assert_eq!(replayed[1], Event::AssignmentRecorded { salesperson_id: sp });
        let _ = fs::remove_file(&path);
    }

    #[test]
    fn buffered_appends_count_until_flush() {
        let path = tmp_path("buffered_flush.wal");
        let events: Vec<Event> = (0..5).map(|_| created(Ulid::new())).collect();
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append_buffered(e).unwrap();
            }
            assert_eq!(wal.appends_since_compact(), 5);
            wal.flush_sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
        let _ = fs::remove_file(&path);
    }
}
