//! Page extraction from a byte source.
//!
//! Reads one Ogg page at a time: fixed header, segment table, data, CRC
//! validation. A zero-length read at a header boundary is the end of the
//! physical stream; a short read anywhere else fails the stream. Packets
//! spanning pages are not supported, so the last lacing value of every page
//! must terminate a packet.

use anyhow::{Result, bail};

use crate::structs::page::{HEADER_LEN, Page, PageHeader};
use crate::utils::crc::{CRC_OGG_PAGE_ALG, Crc32};
use crate::utils::errors::FramingError;
use crate::utils::io::ByteSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    ReadHeader,
    ReadSegmentsAndData,
    EndOfStream,
}

/// Pulls pages off a [`ByteSource`].
pub struct PageReader<S: ByteSource> {
    source: S,
    state: ReadState,
    crc: Crc32,
}

impl<S: ByteSource> PageReader<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: ReadState::ReadHeader,
            crc: Crc32::new(&CRC_OGG_PAGE_ALG),
        }
    }

    /// Reads the next page. `None` once the source is exhausted at a page
    /// boundary; anything else that cuts a page short is an error.
    pub fn next_page(&mut self) -> Result<Option<Page>> {
        if self.state == ReadState::EndOfStream {
            return Ok(None);
        }

        let mut raw_header = [0u8; HEADER_LEN];
        let got = self.source.read(&mut raw_header)?;
        if got == 0 {
            self.state = ReadState::EndOfStream;
            return Ok(None);
        }
        if got < HEADER_LEN {
            bail!(FramingError::ShortRead {
                wanted: HEADER_LEN,
                got,
            });
        }

        let header = PageHeader::parse(&raw_header)?;
        self.state = ReadState::ReadSegmentsAndData;

        let mut segment_table = vec![0u8; header.num_segments as usize];
        self.read_exact(&mut segment_table)?;
        if let Some(&last) = segment_table.last() {
            if last == 255 {
                bail!(FramingError::PacketSpansPages);
            }
        }

        let data_len: usize = segment_table.iter().map(|&len| len as usize).sum();
        let mut data = vec![0u8; data_len];
        self.read_exact(&mut data)?;

        let page = Page {
            header,
            raw_header,
            segment_table,
            data,
        };
        page.verify_crc(&self.crc)?;

        self.state = ReadState::ReadHeader;
        Ok(Some(page))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<()> {
        let got = self.source.read(buf)?;
        if got < buf.len() {
            bail!(FramingError::ShortRead {
                wanted: buf.len(),
                got,
            });
        }
        Ok(())
    }
}
