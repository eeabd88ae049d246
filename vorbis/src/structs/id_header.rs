//! Vorbis identification header.

use anyhow::{Result, bail};

use crate::utils::errors::HeaderError;

/// Fixed-layout identification header, 23 bytes after the packet type byte
/// and the "vorbis" magic. All multi-byte fields are little-endian.
#[derive(Debug, Clone, Copy)]
pub struct IdHeader {
    pub vorbis_version: u32,
    pub audio_channels: u8,
    pub audio_sample_rate: u32,
    pub bitrate_maximum: u32,
    pub bitrate_nominal: u32,
    pub bitrate_minimum: u32,
    /// Low nibble: log2(blocksize_0); high nibble: log2(blocksize_1).
    pub blocksizes_exp: u8,
}

/// Byte length of the header body following the 7-byte prelude.
pub const ID_HEADER_BODY_LEN: usize = 23;

impl IdHeader {
    /// Parses the header body and checks its invariants: version 0, at least
    /// one channel, both blocksizes powers of two in [64, 8192] with
    /// blocksize_0 <= blocksize_1, framing bit set.
    pub fn parse(body: &[u8]) -> Result<Self> {
        if body.len() != ID_HEADER_BODY_LEN {
            bail!(HeaderError::BadLength {
                read: body.len(),
                expected: ID_HEADER_BODY_LEN,
            });
        }

        let header = Self {
            vorbis_version: u32::from_le_bytes(body[0..4].try_into().expect("slice length")),
            audio_channels: body[4],
            audio_sample_rate: u32::from_le_bytes(body[5..9].try_into().expect("slice length")),
            bitrate_maximum: u32::from_le_bytes(body[9..13].try_into().expect("slice length")),
            bitrate_nominal: u32::from_le_bytes(body[13..17].try_into().expect("slice length")),
            bitrate_minimum: u32::from_le_bytes(body[17..21].try_into().expect("slice length")),
            blocksizes_exp: body[21],
        };
        let framing_flag = body[22];

        if header.vorbis_version != 0 {
            bail!(HeaderError::UnsupportedVersion(header.vorbis_version));
        }
        if header.audio_channels == 0 {
            bail!(HeaderError::NoChannels);
        }
        for exp in [header.blocksize_0_exp(), header.blocksize_1_exp()] {
            if !(6..=13).contains(&exp) {
                bail!(HeaderError::InvalidBlocksize(1u32 << exp));
            }
        }
        if header.blocksize_0() > header.blocksize_1() {
            bail!(HeaderError::BlocksizeOrder {
                bs0: header.blocksize_0(),
                bs1: header.blocksize_1(),
            });
        }
        if framing_flag != 1 {
            bail!(HeaderError::MissingFramingBit);
        }

        Ok(header)
    }

    fn blocksize_0_exp(&self) -> u8 {
        self.blocksizes_exp & 0x0F
    }

    fn blocksize_1_exp(&self) -> u8 {
        (self.blocksizes_exp & 0xF0) >> 4
    }

    /// Short blocksize, a power of two in [64, 8192].
    pub fn blocksize_0(&self) -> u16 {
        1u16 << self.blocksize_0_exp()
    }

    /// Long blocksize, a power of two in [64, 8192].
    pub fn blocksize_1(&self) -> u16 {
        1u16 << self.blocksize_1_exp()
    }
}

#[cfg(test)]
pub(crate) fn build_id_body(channels: u8, sample_rate: u32, bs0_exp: u8, bs1_exp: u8) -> Vec<u8> {
    let mut body = Vec::with_capacity(ID_HEADER_BODY_LEN);
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(channels);
    body.extend_from_slice(&sample_rate.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.extend_from_slice(&128_000u32.to_le_bytes());
    body.extend_from_slice(&0u32.to_le_bytes());
    body.push(bs0_exp | (bs1_exp << 4));
    body.push(1);
    body
}

#[test]
fn test_parse_valid_header() {
    let header = IdHeader::parse(&build_id_body(2, 48000, 8, 11)).unwrap();
    assert_eq!(header.audio_channels, 2);
    assert_eq!(header.audio_sample_rate, 48000);
    assert_eq!(header.blocksize_0(), 256);
    assert_eq!(header.blocksize_1(), 2048);
}

#[test]
fn test_parse_rejects_invariant_violations() {
    // blocksize_0 > blocksize_1
    assert!(IdHeader::parse(&build_id_body(2, 48000, 11, 8)).is_err());
    // blocksize out of [64, 8192]
    assert!(IdHeader::parse(&build_id_body(2, 48000, 5, 8)).is_err());
    assert!(IdHeader::parse(&build_id_body(2, 48000, 8, 14)).is_err());
    // zero channels
    assert!(IdHeader::parse(&build_id_body(0, 48000, 8, 11)).is_err());

    // framing bit clear
    let mut body = build_id_body(2, 48000, 8, 11);
    *body.last_mut().unwrap() = 0;
    assert!(IdHeader::parse(&body).is_err());

    // non-zero version
    let mut body = build_id_body(2, 48000, 8, 11);
    body[0] = 1;
    assert!(IdHeader::parse(&body).is_err());

    // wrong length
    assert!(IdHeader::parse(&[0u8; 22]).is_err());
}
