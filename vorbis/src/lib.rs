//! Ogg Vorbis I stream parser and PCM decoder.
//!
//! ## Technical Overview
//!
//! Decodes Ogg-encapsulated Vorbis I audio into per-channel `f32` PCM.
//!
//! ### Container Structure
//!
//! **External Structure**: Ogg pages carrying a segment table that delimits
//! variable-length packets. **Internal Structure**: per logical stream, an
//! identification header, a comment header and a setup header followed by an
//! unbounded sequence of audio packets.
//!
//! ### Audio Packet Pipeline
//!
//! Floor curve decode, residue vector decode, channel-coupling inverse,
//! floor-residue product, inverse MDCT and windowed overlap-add. Completed
//! PCM spans are handed to the host between the midpoints of consecutive
//! windows.
//!
//! ## Quick Start
//!
//! Feed a byte source to a [`process::Decoder`] and receive results through
//! the [`process::DecodeCallbacks`] trait:
//!
//! ```rust,no_run
//! use vorbis::process::{Control, Decoder, DecodeCallbacks};
//! use vorbis::structs::id_header::IdHeader;
//! use vorbis::utils::io::SliceSource;
//!
//! #[derive(Default)]
//! struct SampleCounter {
//!     channels: u8,
//!     samples: usize,
//! }
//!
//! impl DecodeCallbacks for SampleCounter {
//!     fn got_header(&mut self, header: &IdHeader) -> Control {
//!         self.channels = header.audio_channels;
//!         Control::Continue
//!     }
//!
//!     fn got_pcm_data(&mut self, pcm: &[&[f32]]) -> Control {
//!         self.samples += pcm[0].len();
//!         Control::Continue
//!     }
//! }
//!
//! let data = std::fs::read("audio.ogg")?;
//! let mut decoder = Decoder::new(SliceSource::new(&data), SampleCounter::default());
//! decoder.run()?;
//! let counter = decoder.into_callbacks();
//! println!("{} samples over {} channels", counter.samples, counter.channels);
//! # Ok::<(), anyhow::Error>(())
//! ```

/// Streaming decode pipeline.
///
/// 1. **Page Extraction** ([`process::extract`]): Frames the raw byte source
///    into CRC-validated Ogg pages.
///
/// 2. **Packet Decoding** ([`process::decode`]): Routes each stream's
///    packets and synthesizes PCM from audio packets.
pub mod process;

/// Data structures for the container framing and the Vorbis setup.
///
/// - **Pages** ([`structs::page`]): Ogg framing units
/// - **Identification** ([`structs::id_header`]): Stream parameters
/// - **Codebooks** ([`structs::codebook`]): Huffman and VQ decode tables
/// - **Floors** ([`structs::floor`]): Spectral envelopes
/// - **Residues** ([`structs::residue`]): Spectral detail coding
/// - **Mappings** ([`structs::mapping`]): Channel and coupling layout
/// - **Modes** ([`structs::mode`]): Window selection
pub mod structs;

/// Utility functions and supporting infrastructure.
///
/// - **Bitstream I/O** ([`utils::bitstream_io`]): LSb-first bit reading
/// - **CRC Validation** ([`utils::crc`]): Ogg page checksums
/// - **Error Handling** ([`utils::errors`]): Error types
/// - **Inverse MDCT** ([`utils::imdct`]): Spectral-to-time transform
/// - **Debug Tap** ([`utils::tap`]): Checkpoint observer
/// - **Byte Sources** ([`utils::io`]): Input abstraction
pub mod utils;

#[cfg(test)]
pub(crate) mod testutil {
    /// LSb-first bit writer for crafting packet payloads in tests, the
    /// mirror image of the packet bit reader.
    pub struct BitWriter {
        bytes: Vec<u8>,
        bit: u32,
    }

    impl BitWriter {
        pub fn new() -> Self {
            Self {
                bytes: Vec::new(),
                bit: 0,
            }
        }

        pub fn put(&mut self, value: u64, bits: u32) {
            for i in 0..bits {
                if self.bit == 0 {
                    self.bytes.push(0);
                }
                let bit = ((value >> i) & 1) as u8;
                if let Some(last) = self.bytes.last_mut() {
                    *last |= bit << self.bit;
                }
                self.bit = (self.bit + 1) & 7;
            }
        }

        /// Returns the bytes written so far, the final byte zero-padded.
        pub fn finish(self) -> Vec<u8> {
            self.bytes
        }
    }

    #[test]
    fn writer_matches_reader() {
        use crate::utils::bitstream_io::BsIoSliceReader;

        let mut w = BitWriter::new();
        w.put(0b101, 3);
        w.put(0x7FF, 11);
        w.put(1, 1);
        let bytes = w.finish();

        let mut r = BsIoSliceReader::from_slice(&bytes);
        assert_eq!(r.get_n::<u8>(3).unwrap(), 0b101);
        assert_eq!(r.get_n::<u16>(11).unwrap(), 0x7FF);
        assert!(r.get().unwrap());
    }
}
