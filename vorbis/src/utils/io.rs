//! Pull-style byte sources feeding the page reader.

use std::io::Read;

use anyhow::Result;

/// A pull-style source of bytes. The page reader drives this; blocking and
/// buffering are the implementation's concern.
pub trait ByteSource {
    /// Fills as much of `buf` as possible. Returns the number of bytes
    /// written; 0 means end of source.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// True once the source has been fully consumed.
    fn reached_end(&self) -> bool;
}

/// Constant-memory source over a byte slice.
#[derive(Debug)]
pub struct SliceSource<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceSource<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl ByteSource for SliceSource<'_> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.data.len() - self.pos);
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn reached_end(&self) -> bool {
        self.pos == self.data.len()
    }
}

/// Source over any [`Read`] implementation (files, stdin, sockets).
pub struct ReadSource<R: Read> {
    inner: R,
    eof: bool,
}

impl<R: Read> ReadSource<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, eof: false }
    }
}

impl<R: Read> ByteSource for ReadSource<R> {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.inner.read(&mut buf[filled..])?;
            if n == 0 {
                self.eof = true;
                break;
            }
            filled += n;
        }

        Ok(filled)
    }

    fn reached_end(&self) -> bool {
        self.eof
    }
}

#[test]
fn test_slice_source_reads_and_ends() {
    let mut src = SliceSource::new(&[1, 2, 3, 4, 5]);
    let mut buf = [0u8; 3];
    assert_eq!(src.read(&mut buf).unwrap(), 3);
    assert_eq!(buf, [1, 2, 3]);
    assert!(!src.reached_end());
    assert_eq!(src.read(&mut buf).unwrap(), 2);
    assert_eq!(&buf[..2], &[4, 5]);
    assert!(src.reached_end());
    assert_eq!(src.read(&mut buf).unwrap(), 0);
}

#[test]
fn test_read_source_fills_across_short_reads() {
    struct Dribble(Vec<u8>);
    impl Read for Dribble {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.0.is_empty() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.0.remove(0);
            Ok(1)
        }
    }

    let mut src = ReadSource::new(Dribble(vec![9, 8, 7]));
    let mut buf = [0u8; 2];
    assert_eq!(src.read(&mut buf).unwrap(), 2);
    assert_eq!(buf, [9, 8]);
    assert!(!src.reached_end());
    assert_eq!(src.read(&mut buf).unwrap(), 1);
    assert!(src.reached_end());
}
