//! Mode configuration and precomputed window shapes.
//!
//! A mode selects the blocksize (via its block flag) and the mapping. Long
//! modes keep four window shapes keyed by the previous/next window flags of
//! the audio packet; short modes need only one. Slopes follow the Vorbis
//! window function `sin(pi/2 * sin^2(pi/2 * (i + 0.5) / len))`.

use std::f32::consts::FRAC_PI_2;

use anyhow::{Result, bail};

use crate::structs::id_header::IdHeader;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ModeError;

#[derive(Debug, Clone)]
pub struct Mode {
    /// True selects the long window (blocksize_1).
    pub block_flag: bool,
    pub window_type: u16,
    pub transform_type: u16,
    pub mapping: u8,
    /// Blocksize selected by the block flag.
    pub blocksize: u16,
    /// One window per (prev, next) combination for long modes, a single
    /// window for short modes; each `blocksize` samples.
    windows: Vec<f32>,
}

impl Mode {
    pub fn parse(
        reader: &mut BsIoSliceReader,
        num_mappings: usize,
        header: &IdHeader,
    ) -> Result<Self> {
        let block_flag = reader.get()?;
        let window_type = reader.get_n::<u16>(16)?;
        if window_type != 0 {
            bail!(ModeError::InvalidWindowType(window_type));
        }
        let transform_type = reader.get_n::<u16>(16)?;
        if transform_type != 0 {
            bail!(ModeError::InvalidTransformType(transform_type));
        }
        let mapping = reader.get_n::<u8>(8)?;
        if mapping as usize >= num_mappings {
            bail!(ModeError::MappingOutOfRange {
                index: mapping as usize,
                count: num_mappings,
            });
        }

        let mut mode = Self {
            block_flag,
            window_type,
            transform_type,
            mapping,
            blocksize: 0,
            windows: Vec::new(),
        };
        mode.precalc(header);
        Ok(mode)
    }

    fn precalc(&mut self, header: &IdHeader) {
        let blocksize_0 = header.blocksize_0() as usize;
        let blocksize_1 = header.blocksize_1() as usize;
        let blocksize = if self.block_flag {
            blocksize_1
        } else {
            blocksize_0
        };
        self.blocksize = blocksize as u16;

        let num_windows = if self.block_flag { 4 } else { 1 };
        self.windows = vec![0.0; blocksize * num_windows];
        for win_idx in 0..num_windows {
            let window = &mut self.windows[win_idx * blocksize..(win_idx + 1) * blocksize];
            let prev = win_idx & 1 != 0;
            let next = win_idx & 2 != 0;
            let left = (if prev { blocksize_1 } else { blocksize_0 }) / 2;
            let right = (if next { blocksize_1 } else { blocksize_0 }) / 2;
            let left_begin = blocksize / 4 - left / 2;
            let right_begin = blocksize - blocksize / 4 - right / 2;

            for i in 0..left {
                let x = (FRAC_PI_2 * (i as f32 + 0.5) / left as f32).sin();
                window[left_begin + i] = (FRAC_PI_2 * x * x).sin();
            }
            for sample in window.iter_mut().take(right_begin).skip(left_begin + left) {
                *sample = 1.0;
            }
            for i in 0..right {
                let x = (FRAC_PI_2 * (right as f32 - i as f32 - 0.5) / right as f32).sin();
                window[right_begin + i] = (FRAC_PI_2 * x * x).sin();
            }
        }
    }

    /// Window shape for the packet's previous/next window flags. Short modes
    /// have a single shape.
    pub fn window(&self, prev: bool, next: bool) -> &[f32] {
        let win_idx = if self.block_flag {
            (prev as usize) | ((next as usize) << 1)
        } else {
            0
        };
        let blocksize = self.blocksize as usize;
        &self.windows[win_idx * blocksize..(win_idx + 1) * blocksize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::id_header::build_id_body;
    use crate::testutil::BitWriter;

    fn test_header() -> IdHeader {
        IdHeader::parse(&build_id_body(2, 48000, 6, 7)).unwrap()
    }

    fn parse_mode(block_flag: bool) -> Mode {
        let mut w = BitWriter::new();
        w.put(block_flag as u64, 1);
        w.put(0, 16);
        w.put(0, 16);
        w.put(0, 8);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        Mode::parse(&mut reader, 1, &test_header()).unwrap()
    }

    #[test]
    fn short_mode_has_one_symmetric_window() {
        let mode = parse_mode(false);
        assert_eq!(mode.blocksize, 64);
        let w = mode.window(false, false);
        assert_eq!(w.len(), 64);
        // All four flag combinations select the same shape.
        assert_eq!(w, mode.window(true, true));
        for i in 0..32 {
            assert!((w[i] - w[63 - i]).abs() < 1e-6, "symmetry at {i}");
        }
        assert!(w[0] > 0.0 && w[0] < 0.01);
        assert!((w[31] - w[32]).abs() < 0.1);
    }

    #[test]
    fn long_mode_window_slopes_are_power_complementary() {
        let mode = parse_mode(true);
        assert_eq!(mode.blocksize, 128);

        // Full-long shape: rising slope over the first half, falling over
        // the second, the falling slope mirroring the rising one. In the
        // overlap of consecutive windows sample i of the rising slope sits
        // on sample i of the falling slope; their squares must sum to one.
        let w = mode.window(true, true);
        let half = 64;
        for i in 0..half {
            let rising = w[i];
            let falling = w[half + i];
            assert!((falling - w[half - 1 - i]).abs() < 1e-6, "mirror at {i}");
            assert!(
                (rising * rising + falling * falling - 1.0).abs() < 1e-6,
                "power complement at {i}"
            );
        }
    }

    #[test]
    fn long_mode_short_prev_window_has_leading_zeros() {
        let mode = parse_mode(true);
        // prev short: left slope is blocksize_0/2 = 32 samples starting at
        // 128/4 - 16 = 16; everything before stays zero.
        let w = mode.window(false, true);
        for i in 0..16 {
            assert_eq!(w[i], 0.0);
        }
        assert!(w[16] > 0.0);
        assert!((w[48] - 1.0).abs() < 1e-6);
    }
}
