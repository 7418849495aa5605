use std::sync::{Mutex, MutexGuard};

use crate::error::{VolumeError, VolumeResult};
use crate::volume::{Position, Volume, HEADER_SIZE};

/// An append-only log of length-prefixed records.
///
/// Implementations share the volume framing, so positions handed out by one
/// implementation have the same meaning in the other.
pub trait RecordLog: Send + Sync {
    /// Append a record and return its position.
    fn append(&self, payload: &[u8]) -> VolumeResult<Position>;

    /// Read the record at `position`.
    fn read(&self, position: Position) -> VolumeResult<Vec<u8>>;

    /// Every record in write order.
    fn records(&self) -> VolumeResult<Vec<(Position, Vec<u8>)>>;

    /// Release the log and remove its backing storage. Further use fails
    /// with [`VolumeError::Closed`].
    fn delete(&self) -> VolumeResult<()>;
}

impl RecordLog for Volume {
    fn append(&self, payload: &[u8]) -> VolumeResult<Position> {
        self.write(payload)
    }

    fn read(&self, position: Position) -> VolumeResult<Vec<u8>> {
        Volume::read(self, position)
    }

    fn records(&self) -> VolumeResult<Vec<(Position, Vec<u8>)>> {
        Volume::records(self)
    }

    fn delete(&self) -> VolumeResult<()> {
        Volume::delete(self)
    }
}

/// In-memory record log with the volume byte layout.
///
/// Intended for tests and ephemeral stores. The buffer starts with the
/// 4-byte header so the first record sits at [`HEADER_SIZE`], exactly as in
/// a file-backed [`Volume`].
pub struct MemoryLog {
    buf: Mutex<Option<Vec<u8>>>,
}

impl MemoryLog {
    /// Create an empty log.
    pub fn new() -> Self {
        Self {
            buf: Mutex::new(Some(HEADER_SIZE.to_be_bytes().to_vec())),
        }
    }

    /// Number of bytes in use, header included.
    pub fn len(&self) -> usize {
        self.lock().as_ref().map_or(0, Vec::len)
    }

    /// Returns `true` if no record has been appended.
    pub fn is_empty(&self) -> bool {
        self.len() <= HEADER_SIZE as usize
    }

    fn lock(&self) -> MutexGuard<'_, Option<Vec<u8>>> {
        self.buf.lock().expect("lock poisoned")
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryLog").field("len", &self.len()).finish()
    }
}

fn slice_record(buf: &[u8], position: Position) -> VolumeResult<Vec<u8>> {
    let tail = buf.len() as Position;
    let start = position as usize;
    let header_end = start + HEADER_SIZE as usize;
    if position < HEADER_SIZE || header_end > buf.len() {
        return Err(VolumeError::OutOfRange { position, tail });
    }
    let mut len_buf = [0u8; HEADER_SIZE as usize];
    len_buf.copy_from_slice(&buf[start..header_end]);
    let end = header_end + Position::from_be_bytes(len_buf) as usize;
    if end > buf.len() {
        return Err(VolumeError::OutOfRange { position, tail });
    }
    Ok(buf[header_end..end].to_vec())
}

impl RecordLog for MemoryLog {
    fn append(&self, payload: &[u8]) -> VolumeResult<Position> {
        let mut guard = self.lock();
        let buf = guard.as_mut().ok_or(VolumeError::Closed)?;

        let position = buf.len() as Position;
        let len = Position::try_from(payload.len())
            .ok()
            .filter(|len| {
                HEADER_SIZE
                    .checked_add(*len)
                    .and_then(|n| position.checked_add(n))
                    .is_some()
            })
            .ok_or(VolumeError::TailOverflow {
                tail: position,
                len: payload.len(),
            })?;

        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(payload);
        let tail = buf.len() as Position;
        buf[..HEADER_SIZE as usize].copy_from_slice(&tail.to_be_bytes());
        Ok(position)
    }

    fn read(&self, position: Position) -> VolumeResult<Vec<u8>> {
        let guard = self.lock();
        let buf = guard.as_ref().ok_or(VolumeError::Closed)?;
        slice_record(buf, position)
    }

    fn records(&self) -> VolumeResult<Vec<(Position, Vec<u8>)>> {
        let guard = self.lock();
        let buf = guard.as_ref().ok_or(VolumeError::Closed)?;

        let mut records = Vec::new();
        let mut position = HEADER_SIZE;
        while (position as usize) < buf.len() {
            let payload = slice_record(buf, position)?;
            let next = position + HEADER_SIZE + payload.len() as Position;
            records.push((position, payload));
            position = next;
        }
        Ok(records)
    }

    fn delete(&self) -> VolumeResult<()> {
        self.lock().take();
        Ok(())
    }
}
