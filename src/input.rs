use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use anyhow::Result;
use vorbis::utils::io::ByteSource;

/// Unified input reader that handles both file and pipe input with buffered
/// reading. Feeds the decoder directly as its [`ByteSource`].
pub struct InputReader {
    reader: Box<dyn Read>,
    is_pipe: bool,
    eof: bool,
}

impl InputReader {
    /// Create a new InputReader from a path
    /// Use "-" for stdin pipe input
    pub fn new<P: AsRef<Path>>(input_path: P) -> Result<Self> {
        let path_str = input_path.as_ref().to_string_lossy();
        let is_pipe = path_str == "-";

        let reader: Box<dyn Read> = if is_pipe {
            Box::new(io::stdin().lock())
        } else {
            let file = File::open(input_path)?;
            Box::new(BufReader::new(file))
        };

        Ok(Self {
            reader,
            is_pipe,
            eof: false,
        })
    }

    /// Check if this is pipe input
    pub fn is_pipe(&self) -> bool {
        self.is_pipe
    }
}

impl ByteSource for InputReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.reader.read(&mut buf[filled..])?;
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
