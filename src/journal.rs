use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

const FRAME_OVERHEAD: u64 = 8;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(event: &Event) -> io::Result<Vec<u8>> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "event too large"))?;
    let crc = crc32fast::hash(&payload);
    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD as usize);
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Outcome of reading a journal file front to back.
#[derive(Debug, Default)]
pub struct Replay {
    pub events: Vec<Event>,
    /// Byte length of the valid prefix.
    pub valid_len: u64,
    /// True when bytes after the valid prefix were discarded.
    pub torn_tail: bool,
}

/// Append-only event journal.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`. Every append
/// is written and fsynced before it returns. A failed append is cut back
/// off the file; if that fails too the journal refuses further appends. A
/// torn last entry left by a crash is cut off when the journal is reopened.
pub struct Journal {
    file: File,
    path: PathBuf,
    /// Length of the committed prefix.
    len: u64,
    appends: u64,
    poisoned: bool,
}

impl Journal {
    /// Replay `path` and open it for appending after the last valid entry.
    pub fn open(path: &Path) -> io::Result<(Self, Replay)> {
        let replay = Self::replay(path)?;
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)?;
        if replay.torn_tail {
            tracing::warn!(
                path = %path.display(),
                valid_len = replay.valid_len,
                "discarding torn journal tail"
            );
            file.set_len(replay.valid_len)?;
            file.sync_all()?;
        }
        file.seek(SeekFrom::Start(replay.valid_len))?;
        Ok((
            Self {
                file,
                path: path.to_path_buf(),
                len: replay.valid_len,
                appends: 0,
                poisoned: false,
            },
            replay,
        ))
    }

    /// Append one event and make it durable. On error nothing of the event
    /// stays in the file.
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("journal unusable after a failed rollback"));
        }
        let frame = encode_event(event)?;
        if let Err(e) = self.write_frame(&frame) {
            self.rollback();
            return Err(e);
        }
        self.len += frame.len() as u64;
        self.appends += 1;
        Ok(())
    }

    fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        self.file.write_all(frame)?;
        self.file.sync_data()
    }

    /// Cut the file back to the committed prefix.
    fn rollback(&mut self) {
        let len = self.len;
        let result = self
            .file
            .set_len(len)
            .and_then(|()| self.file.seek(SeekFrom::Start(len)))
            .and_then(|_| self.file.sync_data());
        if let Err(e) = result {
            tracing::error!(path = %self.path.display(), len, "journal rollback failed: {e}");
            self.poisoned = true;
        }
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends since this handle was opened.
    pub fn appends(&self) -> u64 {
        self.appends
    }

    /// Read all valid events from `path`. Reading stops at the first
    /// truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Replay> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Replay::default()),
            Err(e) => return Err(e),
        };
        let file_len = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        let mut replay = Replay::default();

        loop {
            let mut len_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut len_buf)? {
                break;
            }
            let len = u32::from_le_bytes(len_buf) as u64;
            if replay.valid_len + FRAME_OVERHEAD + len > file_len {
                break;
            }

            let mut payload = vec![0u8; len as usize];
            if !read_frame_part(&mut reader, &mut payload)? {
                break;
            }
            let mut crc_buf = [0u8; 4];
            if !read_frame_part(&mut reader, &mut crc_buf)? {
                break;
            }
            if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
                break;
            }
            match bincode::deserialize::<Event>(&payload) {
                Ok(event) => replay.events.push(event),
                Err(_) => break,
            }
            replay.valid_len += FRAME_OVERHEAD + len;
        }

        replay.torn_tail = replay.valid_len < file_len;
        Ok(replay)
    }
}

/// Fill `buf`, returning false on a clean or partial end of file.
fn read_frame_part(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}
