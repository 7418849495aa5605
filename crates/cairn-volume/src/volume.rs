use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use cairn_types::DocumentId;
use tracing::debug;

use crate::config::{SyncMode, VolumeConfig};
use crate::error::{VolumeError, VolumeResult};
use crate::path::volume_path;

/// Byte offset of a record inside a volume.
pub type Position = u32;

/// Width of the tail header and of every record's length prefix.
pub const HEADER_SIZE: Position = 4;

const ZERO_BLOCK: [u8; 1024] = [0u8; 1024];

/// Open file plus the tail observed in its header.
struct VolumeFile {
    file: File,
    tail: Position,
}

/// Append-only record log backed by one pre-allocated file.
///
/// All file access is serialized behind a mutex. A read validates the record
/// against the tail at the moment the read starts, so readers never observe
/// a record whose tail update has not been persisted.
///
/// After [`close`](Volume::close) or [`delete`](Volume::delete) every read and
/// write fails with [`VolumeError::Closed`].
pub struct Volume {
    path: PathBuf,
    config: VolumeConfig,
    state: Mutex<Option<VolumeFile>>,
}

impl Volume {
    /// Open the volume at `path`, creating and zero-filling it first if it
    /// does not exist.
    pub fn open_or_create(path: &Path, config: VolumeConfig) -> VolumeResult<Self> {
        if !path.exists() {
            create_file(path, config.size)?;
        }

        let mut file = OpenOptions::new().read(true).write(true).open(path)?;
        let tail = read_tail(&mut file)?;
        if tail < HEADER_SIZE {
            return Err(VolumeError::CorruptHeader { tail });
        }

        debug!(path = %path.display(), tail, "volume opened");
        Ok(Self {
            path: path.to_path_buf(),
            config,
            state: Mutex::new(Some(VolumeFile { file, tail })),
        })
    }

    /// Open the volume owned by `id` in the hierarchical layout below `dir`.
    pub fn open_in_dir(dir: &Path, id: &DocumentId, config: VolumeConfig) -> VolumeResult<Self> {
        Self::open_or_create(&volume_path(dir, id), config)
    }

    /// Read the record stored at `position`.
    pub fn read(&self, position: Position) -> VolumeResult<Vec<u8>> {
        let mut guard = self.lock();
        let vf = guard.as_mut().ok_or(VolumeError::Closed)?;
        read_record(&mut vf.file, position, vf.tail)
    }

    /// Append a record and return its position.
    ///
    /// The payload is written first and the header tail second, so a crash
    /// between the two leaves the record unreachable rather than torn.
    pub fn write(&self, data: &[u8]) -> VolumeResult<Position> {
        let mut guard = self.lock();
        let vf = guard.as_mut().ok_or(VolumeError::Closed)?;

        let position = vf.tail;
        let overflow = || VolumeError::TailOverflow {
            tail: position,
            len: data.len(),
        };
        let len = Position::try_from(data.len()).map_err(|_| overflow())?;
        let new_tail = position
            .checked_add(HEADER_SIZE)
            .and_then(|t| t.checked_add(len))
            .ok_or_else(overflow)?;

        vf.file.seek(SeekFrom::Start(u64::from(position)))?;
        vf.file.write_all(&len.to_be_bytes())?;
        vf.file.write_all(data)?;
        write_tail(&mut vf.file, new_tail)?;
        vf.file.flush()?;
        if matches!(self.config.sync_mode, SyncMode::EveryWrite) {
            vf.file.sync_data()?;
        }
        vf.tail = new_tail;

        debug!(position, len, "volume append");
        Ok(position)
    }

    /// All records from the header to the tail, in write order.
    pub fn records(&self) -> VolumeResult<Vec<(Position, Vec<u8>)>> {
        let mut guard = self.lock();
        let vf = guard.as_mut().ok_or(VolumeError::Closed)?;

        let mut records = Vec::new();
        let mut position = HEADER_SIZE;
        while position < vf.tail {
            let payload = read_record(&mut vf.file, position, vf.tail)?;
            let next = position as usize + HEADER_SIZE as usize + payload.len();
            records.push((position, payload));
            position = next as Position;
        }
        Ok(records)
    }

    /// Current tail: the position the next record will be written at.
    pub fn tail(&self) -> VolumeResult<Position> {
        self.lock()
            .as_ref()
            .map(|vf| vf.tail)
            .ok_or(VolumeError::Closed)
    }

    /// Close the volume file. The instance cannot be used afterwards.
    pub fn close(&self) {
        if self.lock().take().is_some() {
            debug!(path = %self.path.display(), "volume closed");
        }
    }

    /// Close the volume and remove its file.
    pub fn delete(&self) -> VolumeResult<()> {
        self.close();
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        debug!(path = %self.path.display(), "volume deleted");
        Ok(())
    }

    /// Whether `close` or `delete` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().is_none()
    }

    /// Path to the volume file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, Option<VolumeFile>> {
        self.state.lock().expect("volume mutex poisoned")
    }
}

impl std::fmt::Debug for Volume {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Volume")
            .field("path", &self.path)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Create a zero-filled file of `size` bytes whose header points just past
/// itself.
fn create_file(path: &Path, size: u64) -> VolumeResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let mut writer = BufWriter::new(file);
    let mut remaining = size.max(u64::from(HEADER_SIZE));
    while remaining > 0 {
        let n = remaining.min(ZERO_BLOCK.len() as u64) as usize;
        writer.write_all(&ZERO_BLOCK[..n])?;
        remaining -= n as u64;
    }
    let mut file = writer.into_inner().map_err(|e| e.into_error())?;
    write_tail(&mut file, HEADER_SIZE)?;
    file.sync_all()?;

    debug!(path = %path.display(), size, "volume created");
    Ok(())
}

fn read_tail(file: &mut File) -> VolumeResult<Position> {
    let mut buf = [0u8; HEADER_SIZE as usize];
    file.seek(SeekFrom::Start(0))?;
    file.read_exact(&mut buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => VolumeError::Truncated { position: 0 },
        _ => VolumeError::Io(e),
    })?;
    Ok(Position::from_be_bytes(buf))
}

fn write_tail(file: &mut File, tail: Position) -> VolumeResult<()> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&tail.to_be_bytes())?;
    Ok(())
}

fn read_record(file: &mut File, position: Position, tail: Position) -> VolumeResult<Vec<u8>> {
    let header_end = u64::from(position) + u64::from(HEADER_SIZE);
    if position < HEADER_SIZE || header_end > u64::from(tail) {
        return Err(VolumeError::OutOfRange { position, tail });
    }

    let truncated = |e: io::Error| match e.kind() {
        io::ErrorKind::UnexpectedEof => VolumeError::Truncated { position },
        _ => VolumeError::Io(e),
    };

    file.seek(SeekFrom::Start(u64::from(position)))?;
    let mut len_buf = [0u8; HEADER_SIZE as usize];
    file.read_exact(&mut len_buf).map_err(truncated)?;
    let len = Position::from_be_bytes(len_buf);

    if header_end + u64::from(len) > u64::from(tail) {
        return Err(VolumeError::OutOfRange { position, tail });
    }

    let mut payload = vec![0u8; len as usize];
    file.read_exact(&mut payload).map_err(truncated)?;
    Ok(payload)
}
