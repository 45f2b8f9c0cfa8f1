use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::model::Event;

/// Anything larger is a corrupt length prefix, not a real record.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Frame one event as `[u32 len][bincode payload][u32 crc32]`, little endian.
fn write_frame(out: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("event of {} bytes exceeds the frame limit", payload.len()),
        ));
    }
    out.write_all(&(payload.len() as u32).to_le_bytes())?;
    out.write_all(&payload)?;
    out.write_all(&crc32fast::hash(&payload).to_le_bytes())
}

/// Read the next frame's payload. `Ok(None)` at a clean end, a torn tail,
/// or a checksum mismatch; replay stops there.
fn read_frame(input: &mut impl Read) -> io::Result<Option<Vec<u8>>> {
    let mut word = [0u8; 4];
    if !read_or_eof(input, &mut word)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(word) as usize;
    if len > MAX_FRAME_LEN {
        return Ok(None);
    }
    let mut payload = vec![0u8; len];
    if !read_or_eof(input, &mut payload)? || !read_or_eof(input, &mut word)? {
        return Ok(None);
    }
    if u32::from_le_bytes(word) != crc32fast::hash(&payload) {
        return Ok(None);
    }
    Ok(Some(payload))
}

fn read_or_eof(input: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match input.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

fn open_append(path: &Path) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(BufWriter::new(file))
}

/// Append-only event log backing the booking store.
///
/// Writes are buffered; nothing is durable until [`Wal::sync`] returns.
/// A batch that fails to append or sync must be dropped with
/// [`Wal::discard_pending`] before the next one starts.
pub struct Wal {
    out: BufWriter<File>,
    path: PathBuf,
    appended: u64,
    /// File length as of the last successful sync or rewrite.
    synced_len: u64,
    /// Appends since then.
    pending: u64,
    /// Set when a failed batch could not be cut off the file.
    poisoned: bool,
}

impl Wal {
    /// Open the log for appending. A torn or corrupt tail left by a crash is
    /// cut off first so new frames land right after the last intact one.
    pub fn open(path: &Path) -> io::Result<Self> {
        let (_, intact) = scan(path)?;
        let out = open_append(path)?;
        if out.get_ref().metadata()?.len() > intact {
            warn!("truncating {} to its last intact frame at {intact} bytes", path.display());
            out.get_ref().set_len(intact)?;
            out.get_ref().sync_all()?;
        }
        Ok(Self {
            out,
            path: path.to_path_buf(),
            appended: 0,
            synced_len: intact,
            pending: 0,
            poisoned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Buffer one event. Call [`Wal::sync`] to commit the batch.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        self.pending += 1;
        self.appended += 1;
        write_frame(&mut self.out, event)
    }

    /// Flush buffered frames and fsync.
    pub fn sync(&mut self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL is unusable after a failed rollback"));
        }
        self.out.flush()?;
        self.out.get_ref().sync_all()?;
        self.synced_len = self.out.get_ref().metadata()?.len();
        self.pending = 0;
        Ok(())
    }

    /// Throw away everything appended since the last successful sync: the
    /// frames still buffered and any bytes that already reached the file.
    /// If the file cannot be cut back the log refuses all further writes.
    pub fn discard_pending(&mut self) -> io::Result<()> {
        let result = self.truncate_to_synced();
        if result.is_err() {
            self.poisoned = true;
        }
        self.appended = self.appended.saturating_sub(self.pending);
        self.pending = 0;
        result
    }

    fn truncate_to_synced(&mut self) -> io::Result<()> {
        let fresh = open_append(&self.path)?;
        let (file, _unwritten) = std::mem::replace(&mut self.out, fresh).into_parts();
        file.set_len(self.synced_len)?;
        file.sync_all()
    }

    /// Appends since open or the last rewrite.
    pub fn appended(&self) -> u64 {
        self.appended
    }

    /// Replace the log with `snapshot`: written to a sibling temp file,
    /// fsynced, then renamed over the live log.
    pub fn rewrite(&mut self, snapshot: &[Event]) -> io::Result<()> {
        self.sync()?;
        let tmp = self.path.with_extension("wal.tmp");
        {
            let mut staged = BufWriter::new(File::create(&tmp)?);
            for event in snapshot {
                write_frame(&mut staged, event)?;
            }
            staged.flush()?;
            staged.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        self.out = open_append(&self.path)?;
        self.synced_len = self.out.get_ref().metadata()?.len();
        self.appended = 0;
        self.pending = 0;
        Ok(())
    }

    /// Every intact event in the log, in append order. A missing file is an empty log.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        Ok(scan(path)?.0)
    }
}

/// Intact events and the byte length they cover.
fn scan(path: &Path) -> io::Result<(Vec<Event>, u64)> {
    let mut input = match File::open(path) {
        Ok(f) => BufReader::new(f),
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok((Vec::new(), 0)),
        Err(e) => return Err(e),
    };
    let mut events = Vec::new();
    let mut intact = 0u64;
    while let Some(payload) = read_frame(&mut input)? {
        match bincode::deserialize::<Event>(&payload) {
            Ok(event) => events.push(event),
            Err(_) => break,
        }
        intact += payload.len() as u64 + 8;
    }
    Ok((events, intact))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn tmp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("consultd_test_wal");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = fs::remove_file(&path);
        path
    }

    fn slot_freed() -> Event {
        Event::SlotFreed { id: Ulid::new() }
    }

    #[test]
    fn append_sync_and_replay() {
        let path = tmp_path("append_replay.wal");
        let events = vec![
            Event::ExpertAvailabilityChanged {
                id: Ulid::new(),
                is_available: false,
            },
            slot_freed(),
        ];
        {
            let mut wal = Wal::open(&path).unwrap();
            for e in &events {
                wal.append(e).unwrap();
            }
            assert_eq!(wal.appended(), 2);
            wal.sync().unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), events);
    }

    #[test]
    fn replay_missing_file_is_empty() {
        let path = tmp_path("missing.wal");
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn torn_tail_is_dropped() {
        let path = tmp_path("torn_tail.wal");
        let event = slot_freed();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&event).unwrap();
            wal.sync().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        assert_eq!(Wal::replay(&path).unwrap(), vec![event]);
    }

    #[test]
    fn bad_checksum_stops_replay() {
        let path = tmp_path("bad_crc.wal");
        {
            let payload = bincode::serialize(&slot_freed()).unwrap();
            let mut f = File::create(&path).unwrap();
            f.write_all(&(payload.len() as u32).to_le_bytes()).unwrap();
            f.write_all(&payload).unwrap();
            f.write_all(&0xDEAD_BEEFu32.to_le_bytes()).unwrap();
        }
        assert!(Wal::replay(&path).unwrap().is_empty());
    }

    #[test]
    fn rewrite_replaces_history_and_keeps_appending() {
        let path = tmp_path("rewrite.wal");
        let mut wal = Wal::open(&path).unwrap();
        for _ in 0..20 {
            wal.append(&slot_freed()).unwrap();
        }
        wal.sync().unwrap();
        let before = fs::metadata(&path).unwrap().len();

        let snapshot = vec![slot_freed()];
        wal.rewrite(&snapshot).unwrap();
        assert_eq!(wal.appended(), 0);
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "rewritten log should shrink: {after} < {before}");

        let tail = slot_freed();
        wal.append(&tail).unwrap();
        wal.sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![snapshot[0].clone(), tail]);
    }

    #[test]
    fn discarded_batch_never_replays() {
        let path = tmp_path("discarded_batch.wal");
        let (kept, failed, after) = (slot_freed(), slot_freed(), slot_freed());
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        wal.sync().unwrap();

        wal.append(&failed).unwrap();
        wal.discard_pending().unwrap();
        assert_eq!(wal.appended(), 1);

        // The next successful sync must not carry the dropped frame along.
        wal.append(&after).unwrap();
        wal.sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept, after]);
    }

    #[test]
    fn discard_cuts_frames_that_already_hit_the_file() {
        let path = tmp_path("discard_flushed.wal");
        let kept = slot_freed();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&kept).unwrap();
        wal.sync().unwrap();
        let synced = fs::metadata(&path).unwrap().len();

        // Enough frames to spill past the write buffer.
        for _ in 0..2_000 {
            wal.append(&slot_freed()).unwrap();
        }
        assert!(fs::metadata(&path).unwrap().len() > synced);
        wal.discard_pending().unwrap();

        assert_eq!(fs::metadata(&path).unwrap().len(), synced);
        assert_eq!(Wal::replay(&path).unwrap(), vec![kept]);
    }

    #[test]
    fn open_cuts_torn_tail_before_appending() {
        let path = tmp_path("torn_then_append.wal");
        let first = slot_freed();
        {
            let mut wal = Wal::open(&path).unwrap();
            wal.append(&first).unwrap();
            wal.sync().unwrap();
        }
        {
            let mut f = OpenOptions::new().append(true).open(&path).unwrap();
            f.write_all(&[9u8, 0, 0, 0, 1, 2]).unwrap();
        }
        let second = slot_freed();
        let mut wal = Wal::open(&path).unwrap();
        wal.append(&second).unwrap();
        wal.sync().unwrap();
        assert_eq!(Wal::replay(&path).unwrap(), vec![first, second]);
    }
}
