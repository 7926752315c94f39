//! File-backed append-only log.
//!
//! # Frame Format
//!
//! Every block is stored as one frame, back to back, from the start of the
//! file:
//!
//! ```text
//! +----------+-----------------------------------------+
//! | 0-3      | payload_length (4 bytes, little endian) |
//! | 4-7      | CRC32 of the payload (4 bytes)          |
//! | 8-N      | payload (the block bytes)               |
//! +----------+-----------------------------------------+
//! ```
//!
//! On open the file is scanned once to rebuild the frame index. A frame that
//! is cut short, claims more bytes than the file holds, or fails its checksum
//! marks the end of the log: it and everything after it are truncated, since
//! only the final append of a crashed process can be incomplete.
//!
//! Appends write at the end of the last complete frame, not at the end of the
//! file. An append that fails partway cuts the file back to that position, so
//! a later append never lands behind a torn frame.

// Frame lengths are bounded by u32.
#![allow(clippy::cast_possible_truncation)]

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use crate::storage::log::{Log, LogError, Offset};

/// Frame header size: payload length (4) + checksum (4).
const FRAME_HEADER_SIZE: u64 = 8;

/// Location of one frame in the file.
#[derive(Debug, Clone, Copy)]
struct Frame {
    /// Byte position of the frame header.
    position: u64,
    /// Payload length in bytes.
    len: u32,
}

/// Append handle and the end of the last complete frame.
struct Writer {
    file: File,
    end: u64,
}

/// An append-only log stored in a single file.
pub struct FileLog {
    path: PathBuf,
    /// Appends are serialized through this lock.
    writer: Mutex<Writer>,
    /// Independent handle for positional reads.
    #[cfg(unix)]
    reader: File,
    /// Index of complete frames, in offset order.
    frames: RwLock<Vec<Frame>>,
}

impl FileLog {
    /// Open the log at `path`, creating an empty one if it doesn't exist.
    pub fn open(path: &Path) -> Result<Self, LogError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let (frames, valid_end) = scan_frames(&mut file)?;
        let file_len = file.metadata()?.len();
        if valid_end < file_len {
            tracing::warn!(
                "truncating {} bytes of incomplete log tail in {}",
                file_len - valid_end,
                path.display()
            );
            file.set_len(valid_end)?;
            file.sync_all()?;
        }

        tracing::info!(
            "opened file log {} with {} blocks",
            path.display(),
            frames.len()
        );

        Ok(Self {
            path: path.to_path_buf(),
            #[cfg(unix)]
            reader: file.try_clone()?,
            writer: Mutex::new(Writer {
                file,
                end: valid_end,
            }),
            frames: RwLock::new(frames),
        })
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn frame(&self, offset: Offset) -> Result<Frame, LogError> {
        let frames = self.frames.read().map_err(|_| LogError::LockPoisoned)?;
        let length = frames.len() as u64;
        usize::try_from(offset)
            .ok()
            .and_then(|i| frames.get(i).copied())
            .ok_or(LogError::OutOfBounds { offset, length })
    }

    #[cfg(unix)]
    fn read_at(&self, buf: &mut [u8], position: u64) -> Result<(), LogError> {
        self.reader.read_exact_at(buf, position)?;
        Ok(())
    }

    #[cfg(not(unix))]
    fn read_at(&self, buf: &mut [u8], position: u64) -> Result<(), LogError> {
        let mut writer = self.writer.lock().map_err(|_| LogError::LockPoisoned)?;
        writer.file.seek(SeekFrom::Start(position))?;
        writer.file.read_exact(buf)?;
        Ok(())
    }
}

impl Log for FileLog {
    fn append(&self, block: &[u8]) -> Result<Offset, LogError> {
        let len = u32::try_from(block.len()).map_err(|_| {
            LogError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "block larger than 4GiB",
            ))
        })?;

        let mut frame_bytes = Vec::with_capacity(FRAME_HEADER_SIZE as usize + block.len());
        frame_bytes.extend_from_slice(&len.to_le_bytes());
        frame_bytes.extend_from_slice(&crc32fast::hash(block).to_le_bytes());
        frame_bytes.extend_from_slice(block);

        let mut writer = self.writer.lock().map_err(|_| LogError::LockPoisoned)?;
        let position = writer.end;
        if let Err(e) = write_frame(&mut writer.file, position, &frame_bytes) {
            tracing::warn!("append failed at byte {position}, cutting log back: {e}");
            writer.file.set_len(position)?;
            return Err(e);
        }
        writer.end = position + frame_bytes.len() as u64;

        // Publish the frame only once its bytes are fully written.
        let mut frames = self.frames.write().map_err(|_| LogError::LockPoisoned)?;
        let offset = frames.len() as Offset;
        frames.push(Frame { position, len });
        drop(frames);
        drop(writer);

        Ok(offset)
    }

    fn read(&self, offset: Offset) -> Result<Vec<u8>, LogError> {
        let frame = self.frame(offset)?;

        let mut header = [0u8; FRAME_HEADER_SIZE as usize];
        self.read_at(&mut header, frame.position)?;
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let mut payload = vec![0u8; frame.len as usize];
        self.read_at(&mut payload, frame.position + FRAME_HEADER_SIZE)?;

        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(LogError::ChecksumMismatch {
                offset,
                expected,
                actual,
            });
        }
        Ok(payload)
    }

    fn len(&self) -> u64 {
        self.frames.read().map_or(0, |frames| frames.len() as u64)
    }

    fn sync(&self) -> Result<(), LogError> {
        let writer = self.writer.lock().map_err(|_| LogError::LockPoisoned)?;
        writer.file.sync_data()?;
        Ok(())
    }
}

/// Scan the file from the start, returning the complete frames and the byte
/// position just past the last one.
fn scan_frames(file: &mut File) -> Result<(Vec<Frame>, u64), LogError> {
    let file_len = file.metadata()?.len();
    file.seek(SeekFrom::Start(0))?;
    let mut reader = BufReader::new(&*file);
    let mut frames = Vec::new();
    let mut position = 0u64;

    loop {
        let mut header = [0u8; FRAME_HEADER_SIZE as usize];
        if !read_full(&mut reader, &mut header)? {
            break;
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let expected = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let remaining = file_len.saturating_sub(position + FRAME_HEADER_SIZE);
        if u64::from(len) > remaining {
            tracing::warn!("log frame at byte {position} claims {len} bytes, {remaining} remain");
            break;
        }

        let mut payload = vec![0u8; len as usize];
        if !read_full(&mut reader, &mut payload)? {
            break;
        }
        if crc32fast::hash(&payload) != expected {
            tracing::warn!("checksum mismatch in log frame at byte {position}");
            break;
        }

        frames.push(Frame { position, len });
        position += FRAME_HEADER_SIZE + u64::from(len);
    }

    Ok((frames, position))
}

fn write_frame(file: &mut File, position: u64, frame: &[u8]) -> Result<(), LogError> {
    file.seek(SeekFrom::Start(position))?;
    file.write_all(frame)?;
    Ok(())
}

/// Fill `buf` completely. Returns `false` if the input ended first.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> Result<bool, LogError> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(LogError::Io(e)),
    }
}
