use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

/// A random-access byte source. `read_at` performs a positioned read;
/// returning fewer bytes than requested is a short read, not an error —
/// callers distinguish a short read from EOF. Positioned reads must be
/// idempotent: repeated reads at the same offset/length return the same
/// bytes.
pub trait Reader: Send + Sync {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    /// Convenience wrapper that treats a short read as
    /// [`io::ErrorKind::UnexpectedEof`].
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let n = self.read_at(offset, buf)?;
        if n != buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("short read: wanted {} bytes, got {}", buf.len(), n),
            ));
        }
        Ok(())
    }
}

/// Shared handle to a [`Reader`], used as the `Packet::reader` back-channel
/// for source streamers that drive their own pull loop.
pub type SharedReader = Arc<dyn Reader>;

impl Reader for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.as_slice().read_at(offset, buf)
    }
}

impl Reader for &'static [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        (*self).read_at(offset, buf)
    }
}

impl Reader for [u8] {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        let offset = offset as usize;
        if offset >= self.len() {
            return Ok(0);
        }
        let available = &self[offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        Ok(n)
    }
}

/// A positioned reader backed by an on-disk file.
pub struct FileReader {
    file: File,
}

impl FileReader {
    pub fn open(path: impl AsRef<std::path::Path>) -> io::Result<Self> {
        Ok(FileReader { file: File::open(path)? })
    }
}

impl Reader for FileReader {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read_at(buf, offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slice_reader_short_read_at_eof() {
        let data: &[u8] = b"hello world";
        let mut buf = [0u8; 8];
        let n = data.read_at(6, &mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf[..5], b"world");
    }

    #[test]
    fn read_exact_at_fails_on_short_read() {
        let data: &[u8] = b"hi";
        let mut buf = [0u8; 4];
        let err = data.read_exact_at(0, &mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
