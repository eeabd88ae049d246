//! Ogg page framing structures.
//!
//! A page carries a fixed 27-byte header, a segment table of up to 255
//! lacing values and up to 65025 bytes of packet data. The stored CRC covers
//! the header image (CRC field zeroed), the segment table and the data.

use anyhow::{Result, bail};

use crate::utils::crc::Crc32;
use crate::utils::errors::FramingError;

/// Capture pattern opening every page.
pub const CAPTURE_PATTERN: [u8; 4] = *b"OggS";

/// Size of the fixed page header on the wire.
pub const HEADER_LEN: usize = 27;

/// The first packet of this page continues one from the previous page.
pub const FLAG_CONTINUED: u8 = 0x1;
/// First page of a logical stream (bos).
pub const FLAG_FIRST: u8 = 0x2;
/// Last page of a logical stream (eos).
pub const FLAG_LAST: u8 = 0x4;

/// Parsed fixed-prefix page header, fields in host representation.
#[derive(Debug, Clone, Copy)]
pub struct PageHeader {
    pub header_type: u8,
    /// End PCM sample position of the last packet completing on this page.
    pub granule_position: i64,
    pub serial: u32,
    pub sequence: u32,
    pub crc: u32,
    pub num_segments: u8,
}

impl PageHeader {
    /// Parses and validates the fixed header. Multi-byte fields are stored
    /// little-endian on the wire.
    pub fn parse(raw: &[u8; HEADER_LEN]) -> Result<Self> {
        let capture: [u8; 4] = raw[0..4].try_into().expect("slice length");
        if capture != CAPTURE_PATTERN {
            bail!(FramingError::InvalidCapturePattern(capture));
        }
        if raw[4] != 0 {
            bail!(FramingError::UnsupportedStreamVersion(raw[4]));
        }

        Ok(Self {
            header_type: raw[5],
            granule_position: i64::from_le_bytes(raw[6..14].try_into().expect("slice length")),
            serial: u32::from_le_bytes(raw[14..18].try_into().expect("slice length")),
            sequence: u32::from_le_bytes(raw[18..22].try_into().expect("slice length")),
            crc: u32::from_le_bytes(raw[22..26].try_into().expect("slice length")),
            num_segments: raw[26],
        })
    }

    pub fn is_continued(&self) -> bool {
        self.header_type & FLAG_CONTINUED != 0
    }

    pub fn is_first(&self) -> bool {
        self.header_type & FLAG_FIRST != 0
    }

    pub fn is_last(&self) -> bool {
        self.header_type & FLAG_LAST != 0
    }
}

/// A complete page: parsed header, raw header image (kept for the CRC
/// digest), segment table and concatenated segment data.
#[derive(Debug, Clone)]
pub struct Page {
    pub header: PageHeader,
    pub raw_header: [u8; HEADER_LEN],
    pub segment_table: Vec<u8>,
    pub data: Vec<u8>,
}

impl Page {
    /// Recomputes the checksum with the CRC field zeroed and compares it
    /// against the stored value.
    pub fn verify_crc(&self, crc: &Crc32) -> Result<()> {
        let mut image = self.raw_header;
        image[22..26].fill(0);

        let mut calculated = crc.init;
        calculated = crc.update(calculated, &image);
        calculated = crc.update(calculated, &self.segment_table);
        calculated = crc.update(calculated, &self.data);

        if calculated != self.header.crc {
            bail!(FramingError::CrcMismatch {
                stored: self.header.crc,
                calculated,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn build_page(
    header_type: u8,
    granule_position: i64,
    serial: u32,
    sequence: u32,
    packets: &[&[u8]],
) -> Vec<u8> {
    use crate::utils::crc::CRC_OGG_PAGE_ALG;

    let mut segment_table = Vec::new();
    let mut data = Vec::new();
    for packet in packets {
        let mut left = packet.len();
        loop {
            let lace = left.min(255);
            segment_table.push(lace as u8);
            left -= lace;
            if lace < 255 {
                break;
            }
        }
        data.extend_from_slice(packet);
    }

    let mut page = Vec::with_capacity(HEADER_LEN + segment_table.len() + data.len());
    page.extend_from_slice(&CAPTURE_PATTERN);
    page.push(0);
    page.push(header_type);
    page.extend_from_slice(&granule_position.to_le_bytes());
    page.extend_from_slice(&serial.to_le_bytes());
    page.extend_from_slice(&sequence.to_le_bytes());
    page.extend_from_slice(&0u32.to_le_bytes());
    page.push(segment_table.len() as u8);
    page.extend_from_slice(&segment_table);
    page.extend_from_slice(&data);

    let crc = Crc32::new(&CRC_OGG_PAGE_ALG);
    let checksum = crc.checksum(&page);
    page[22..26].copy_from_slice(&checksum.to_le_bytes());

    page
}

#[test]
fn test_header_parse_round_trip() {
    let bytes = build_page(FLAG_FIRST, -1, 0xDEAD_0001, 0, &[b"abc"]);
    let raw: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
    let header = PageHeader::parse(&raw).unwrap();

    assert!(header.is_first());
    assert!(!header.is_last());
    assert!(!header.is_continued());
    assert_eq!(header.granule_position, -1);
    assert_eq!(header.serial, 0xDEAD_0001);
    assert_eq!(header.sequence, 0);
    assert_eq!(header.num_segments, 1);
}

#[test]
fn test_header_rejects_bad_magic_and_version() {
    let mut bytes = build_page(0, 0, 1, 0, &[b"x"]);
    bytes[0] = b'Q';
    let raw: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
    assert!(PageHeader::parse(&raw).is_err());

    let mut bytes = build_page(0, 0, 1, 0, &[b"x"]);
    bytes[4] = 1;
    let raw: [u8; HEADER_LEN] = bytes[..HEADER_LEN].try_into().unwrap();
    assert!(PageHeader::parse(&raw).is_err());
}
