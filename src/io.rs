//! Positioned byte sources.
//!
//! The reader never moves a shared cursor: every access is a positioned
//! read through [`ReadAt`], so several traversals can run over one source
//! at the same time.
//!
//! * Naturally positioned sources (`[u8]`, `Vec<u8>`, [`std::fs::File`])
//!   implement [`ReadAt`] directly and need no locking.
//! * Plain `Read + Seek` sources go through [`Locked`], which performs
//!   seek-then-read as one critical section under a mutex.
//!
//! [`FileReader`] is the bounded view handed out for a single file: bytes
//! outside its `[start, end)` range are unreachable through it.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex};

/// A source that can read at an absolute offset without a shared cursor.
pub trait ReadAt {
    /// Read up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` means `offset` is at or past
    /// the end of the source.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Fill `buf` completely from `offset`, failing with
    /// [`io::ErrorKind::UnexpectedEof`] if the source ends first.
    fn read_exact_at(&self, mut offset: u64, mut buf: &mut [u8]) -> io::Result<()> {
        while !buf.is_empty() {
            match self.read_at(offset, buf) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => {
                    buf = &mut buf[n..];
                    offset += n as u64;
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(src) = self.get(start..) else {
            return Ok(0);
        };
        let n = src.len().min(buf.len());
        buf[..n].copy_from_slice(&src[..n]);
        Ok(n)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }
}

impl<const N: usize> ReadAt for [u8; N] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Box<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (**self).read_at(offset, buf)
    }
}

#[cfg(unix)]
impl ReadAt for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(self, buf, offset)
    }
}

#[cfg(windows)]
impl ReadAt for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(self, buf, offset)
    }
}

/// Adapter that turns a `Read + Seek` source into a [`ReadAt`] one.
///
/// Each positioned read locks the inner source, seeks, and reads. Concurrent
/// callers therefore never observe each other's cursor movements.
#[derive(Debug)]
pub struct Locked<R> {
    inner: Mutex<R>,
}

impl<R: Read + Seek> Locked<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Consume the adapter, returning the inner source.
    pub fn into_inner(self) -> io::Result<R> {
        self.inner.into_inner().map_err(|_| poisoned())
    }
}

impl<R: Read + Seek> ReadAt for Locked<R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.inner.lock().map_err(|_| poisoned())?;
        inner.seek(SeekFrom::Start(offset))?;
        inner.read(buf)
    }
}

fn poisoned() -> io::Error {
    io::Error::other("source lock poisoned")
}

/// Bounded, positioned view over one file's `[start, end)` byte range.
///
/// Implements [`Read`] and [`Seek`] relative to the start of the file, and
/// [`ReadAt`] with file-relative offsets.
#[derive(Debug)]
pub struct FileReader<'a, R: ?Sized> {
    src: &'a R,
    start: u64,
    len: u64,
    pos: u64,
}

impl<'a, R: ReadAt + ?Sized> FileReader<'a, R> {
    pub(crate) fn new(src: &'a R, start: u64, end: u64) -> Self {
        Self {
            src,
            start,
            len: end.saturating_sub(start),
            pos: 0,
        }
    }

    /// Size of the file in bytes.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Absolute offset of the first byte within the underlying source.
    pub fn start(&self) -> u64 {
        self.start
    }
}

impl<R: ReadAt + ?Sized> ReadAt for FileReader<'_, R> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len {
            return Ok(0);
        }
        let avail = (self.len - offset).min(buf.len() as u64) as usize;
        self.src.read_at(self.start + offset, &mut buf[..avail])
    }
}

impl<R: ReadAt + ?Sized> Read for FileReader<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = ReadAt::read_at(&*self, self.pos, buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl<R: ReadAt + ?Sized> Seek for FileReader<'_, R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(d) => self.len.checked_add_signed(d),
            SeekFrom::Current(d) => self.pos.checked_add_signed(d),
        };
        match target {
            Some(n) => {
                self.pos = n;
                Ok(n)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::thread;

    use super::*;

    #[test]
    fn slice_read_at_clamps_to_end() {
        let data = [1u8, 2, 3, 4];
        let mut buf = [0u8; 8];
        assert_eq!(data.read_at(2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[3, 4]);
        assert_eq!(data.read_at(4, &mut buf).unwrap(), 0);
        assert_eq!(data.read_at(100, &mut buf).unwrap(), 0);
    }

    #[test]
    fn read_exact_at_reports_eof() {
        let data = vec![1u8, 2, 3];
        let mut buf = [0u8; 4];
        let err = data.read_exact_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn file_reader_is_bounded() {
        let data: Vec<u8> = (0..32).collect();
        let mut r = FileReader::new(&data, 8, 12);
        let mut out = Vec::new();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, [8, 9, 10, 11]);

        r.seek(SeekFrom::End(-1)).unwrap();
        out.clear();
        r.read_to_end(&mut out).unwrap();
        assert_eq!(out, [11]);

        let mut buf = [0u8; 16];
        assert_eq!(ReadAt::read_at(&r, 2, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], &[10, 11]);
        assert!(r.seek(SeekFrom::Current(-100)).is_err());
    }

    #[test]
    fn locked_source_serializes_concurrent_reads() {
        let data: Vec<u8> = (0..=255).collect();
        let src = Arc::new(Locked::new(Cursor::new(data)));

        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let src = Arc::clone(&src);
                thread::spawn(move || {
                    for i in 0..200u64 {
                        let off = (i * 7 + t as u64 * 13) % 250;
                        let mut buf = [0u8; 4];
                        src.read_exact_at(off, &mut buf).unwrap();
                        assert_eq!(buf[0] as u64, off);
                        assert_eq!(buf[3] as u64, off + 3);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
