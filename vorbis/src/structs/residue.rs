//! Residue vector decoding, types 0, 1 and 2.
//!
//! The residue carries the fine spectral detail as VQ-coded partitions over
//! 8 cascade passes. Type 2 interleaves all channels into one long vector
//! and reduces to a type-1 decode over a single channel followed by a
//! deinterleave.

use anyhow::{Result, bail, ensure};

use crate::structs::codebook::Codebook;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::ResidueError;

/// Sentinel for "no book transmitted for this (class, pass)".
const NO_BOOK: i16 = -1;

#[derive(Debug, Clone)]
pub struct Residue {
    pub residue_type: u16,
    /// Sample offsets into the half-blocksize spectrum.
    pub begin: u32,
    pub end: u32,
    pub partition_size: u32,
    pub num_classifications: u8,
    pub classbook: u8,
    pub cascades: Vec<u32>,
    /// `num_classifications * 8` entries, one per (class, pass).
    books: Vec<i16>,
}

impl Residue {
    pub fn parse(reader: &mut BsIoSliceReader, num_codebooks: usize) -> Result<Self> {
        let residue_type = reader.get_n::<u16>(16)?;
        if residue_type > 2 {
            bail!(ResidueError::InvalidType(residue_type));
        }

        let begin = reader.get_n::<u32>(24)?;
        let end = reader.get_n::<u32>(24)?;
        if begin > end {
            bail!(ResidueError::BeginAfterEnd { begin, end });
        }
        let partition_size = reader.get_n::<u32>(24)? + 1;
        let num_classifications = reader.get_n::<u8>(6)? + 1;
        let classbook = reader.get_n::<u8>(8)?;
        if classbook as usize >= num_codebooks {
            bail!(ResidueError::ClassbookOutOfRange {
                index: classbook as usize,
                count: num_codebooks,
            });
        }

        let mut cascades = Vec::with_capacity(num_classifications as usize);
        for _ in 0..num_classifications {
            let low_bits = reader.get_n::<u32>(3)?;
            let high_bits = if reader.get()? {
                reader.get_n::<u32>(5)?
            } else {
                0
            };
            cascades.push(high_bits * 8 + low_bits);
        }

        let mut books = Vec::with_capacity(num_classifications as usize * 8);
        for &cascade in &cascades {
            for pass in 0..8 {
                if cascade & (1 << pass) != 0 {
                    let book = reader.get_n::<u8>(8)?;
                    if book as usize >= num_codebooks {
                        bail!(ResidueError::BookOutOfRange {
                            index: book as usize,
                            count: num_codebooks,
                        });
                    }
                    books.push(book as i16);
                } else {
                    books.push(NO_BOOK);
                }
            }
        }

        Ok(Self {
            residue_type,
            begin,
            end,
            partition_size,
            num_classifications,
            classbook,
            cascades,
            books,
        })
    }

    /// Spectrum length covered by one channel for a window of `window_len`.
    pub fn decode_len(&self, window_len: usize) -> usize {
        window_len / 2
    }

    /// Decodes residue vectors for one submap. `out` holds one
    /// zero-initialized vector of `decode_len` samples per channel;
    /// `channel_used` carries the per-channel floor flags. `type_override`
    /// lets the type-2 path re-enter as type 1.
    pub fn decode(
        &self,
        reader: &mut BsIoSliceReader,
        codebooks: &[Codebook],
        channel_used: &[bool],
        decode_len: usize,
        out: &mut [Vec<f32>],
        type_override: Option<u16>,
    ) -> Result<()> {
        let residue_type = type_override.unwrap_or(self.residue_type);
        let num_channels = out.len();

        ensure!(num_channels > 0, "residue decode over zero channels");
        if channel_used.len() != num_channels {
            bail!(ResidueError::ChannelCountMismatch {
                used: channel_used.len(),
                out: num_channels,
            });
        }
        for v in out.iter() {
            if v.len() != decode_len {
                bail!(ResidueError::BadVectorLength {
                    len: v.len(),
                    expected: decode_len,
                });
            }
        }

        if residue_type == 2 {
            let mut flat = vec![vec![0f32; num_channels * decode_len]];
            self.decode(
                reader,
                codebooks,
                &[true],
                num_channels * decode_len,
                &mut flat,
                Some(1),
            )?;
            for (j, chan) in out.iter_mut().enumerate() {
                for (i, sample) in chan.iter_mut().enumerate() {
                    *sample = flat[0][j + num_channels * i];
                }
            }
            return Ok(());
        }

        let limit_begin = (self.begin as usize).min(decode_len);
        let limit_end = (self.end as usize).min(decode_len);
        let class_codebook = &codebooks[self.classbook as usize];
        let classwords_per_codeword = class_codebook.dimensions as usize;
        let partition_size = self.partition_size as usize;

        let n_to_read = limit_end - limit_begin;
        if n_to_read == 0 {
            return Ok(());
        }
        let partitions_to_read = n_to_read / partition_size;

        // Oversized by one codeword so pass-0 digit stores never clip.
        let stride = partitions_to_read + classwords_per_codeword;
        let mut classifications = vec![0u8; num_channels * stride];

        for pass in 0..8usize {
            let mut partition_count = 0;
            while partition_count < partitions_to_read {
                if pass == 0 {
                    for (j, &used) in channel_used.iter().enumerate() {
                        if !used {
                            continue;
                        }
                        let mut temp = class_codebook.decode_scalar(reader)?;
                        for i in (0..classwords_per_codeword).rev() {
                            classifications[j * stride + i + partition_count] =
                                (temp % self.num_classifications as u32) as u8;
                            temp /= self.num_classifications as u32;
                        }
                    }
                }

                for _ in 0..classwords_per_codeword {
                    if partition_count >= partitions_to_read {
                        break;
                    }
                    for (j, &used) in channel_used.iter().enumerate() {
                        if used && partition_count < partitions_to_read {
                            let vq_class =
                                classifications[j * stride + partition_count] as usize;
                            let vq_book = self.books[vq_class * 8 + pass];
                            if vq_book != NO_BOOK {
                                let offset = limit_begin + partition_count * partition_size;
                                self.decode_partition(
                                    reader,
                                    &codebooks[vq_book as usize],
                                    residue_type,
                                    &mut out[j][offset..],
                                )?;
                            }
                        }
                        partition_count += 1;
                    }
                }
            }
        }

        Ok(())
    }

    fn decode_partition(
        &self,
        reader: &mut BsIoSliceReader,
        vq_codebook: &Codebook,
        residue_type: u16,
        v: &mut [f32],
    ) -> Result<()> {
        let dims = vq_codebook.dimensions as usize;
        let partition_size = self.partition_size as usize;

        if residue_type == 0 {
            if partition_size % dims != 0 {
                bail!(ResidueError::PartitionSizeNotMultiple {
                    partition_size,
                    dimensions: dims,
                });
            }
            let step = partition_size / dims;
            for k in 0..step {
                let temp = vq_codebook.decode_vector(reader)?;
                for (l, &e) in temp.iter().enumerate() {
                    v[k + l * step] += e;
                }
            }
        } else {
            let mut k = 0;
            while k < partition_size {
                let temp = vq_codebook.decode_vector(reader)?;
                for &e in temp {
                    if k == partition_size {
                        break;
                    }
                    v[k] += e;
                    k += 1;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::codebook::CODEBOOK_SYNC;
    use crate::testutil::BitWriter;

    /// Classbook: 1 dimension, two entries of length 1 (classes 0 and 1).
    fn class_book() -> Codebook {
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(1, 16);
        w.put(2, 24);
        w.put(0, 1);
        w.put(0, 1);
        w.put(0, 5);
        w.put(0, 5);
        w.put(0, 4);
        w.put(0, 8);
        let bytes = w.finish();
        Codebook::parse(&mut BsIoSliceReader::from_slice(&bytes)).unwrap()
    }

    /// Value book: 2 dimensions, 4 entries of length 2, lookup type 1 with
    /// multiplicands [1, 2]; row e = [1 + (e & 1), 1 + (e >> 1)].
    fn value_book() -> Codebook {
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(2, 16);
        w.put(4, 24);
        w.put(0, 1);
        w.put(0, 1);
        for _ in 0..4 {
            w.put(1, 5);
        }
        w.put(1, 4);
        w.put(0, 32);
        w.put(1 | (788 << 21), 32);
        w.put(1, 4);
        w.put(0, 1);
        w.put(1, 2);
        w.put(2, 2);
        w.put(0, 8);
        let bytes = w.finish();
        Codebook::parse(&mut BsIoSliceReader::from_slice(&bytes)).unwrap()
    }

    fn test_residue(residue_type: u16) -> Residue {
        Residue {
            residue_type,
            begin: 0,
            end: 4,
            partition_size: 2,
            num_classifications: 2,
            classbook: 0,
            cascades: vec![1, 0],
            // Class 0 decodes with book 1 on pass 0; class 1 transmits
            // nothing.
            books: {
                let mut books = vec![NO_BOOK; 16];
                books[0] = 1;
                books
            },
        }
    }

    fn packet_bits() -> Vec<u8> {
        // Partition 0 classified 0, decoded from value-book entry 2 (row
        // [1, 2]); partition 1 classified 1, silent.
        let mut w = BitWriter::new();
        w.put(0, 1); // classword for partition 0 -> class 0
        w.put(1, 1); // value codeword 10 -> entry 2, MSb first
        w.put(0, 1);
        w.put(1, 1); // classword for partition 1 -> class 1
        w.finish()
    }

    #[test]
    fn type1_decode_adds_vq_rows() {
        let codebooks = vec![class_book(), value_book()];
        let residue = test_residue(1);

        let bytes = packet_bits();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut out = vec![vec![0f32; 4]];
        residue
            .decode(&mut reader, &codebooks, &[true], 4, &mut out, None)
            .unwrap();
        assert_eq!(out[0], vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn type2_reduces_to_type1_and_deinterleaves() {
        let codebooks = vec![class_book(), value_book()];
        let residue = test_residue(2);

        let bytes = packet_bits();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut out = vec![vec![0f32; 2], vec![0f32; 2]];
        residue
            .decode(&mut reader, &codebooks, &[true, false], 2, &mut out, None)
            .unwrap();

        // Flat vector [1, 2, 0, 0] deinterleaved over two channels.
        assert_eq!(out[0], vec![1.0, 0.0]);
        assert_eq!(out[1], vec![2.0, 0.0]);
    }

    #[test]
    fn zero_span_reads_nothing() {
        let codebooks = vec![class_book(), value_book()];
        let mut residue = test_residue(1);
        residue.begin = 4;
        residue.end = 4;

        let mut reader = BsIoSliceReader::from_slice(&[]);
        let mut out = vec![vec![0f32; 4]];
        residue
            .decode(&mut reader, &codebooks, &[true], 4, &mut out, None)
            .unwrap();
        assert_eq!(out[0], vec![0.0; 4]);
    }

    #[test]
    fn begin_and_end_clamp_to_spectrum() {
        let codebooks = vec![class_book(), value_book()];
        let mut residue = test_residue(1);
        residue.end = 24;

        // decode_len 4 clamps the span back to the whole spectrum.
        let bytes = packet_bits();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mut out = vec![vec![0f32; 4]];
        residue
            .decode(&mut reader, &codebooks, &[true], 4, &mut out, None)
            .unwrap();
        assert_eq!(out[0], vec![1.0, 2.0, 0.0, 0.0]);
    }

    #[test]
    fn parse_reads_cascade_books() {
        let mut w = BitWriter::new();
        w.put(1, 16); // type 1
        w.put(0, 24); // begin
        w.put(32, 24); // end
        w.put(3, 24); // partition size 4
        w.put(1, 6); // 2 classifications
        w.put(0, 8); // classbook
        // Class 0: cascade low bits 001, no high bits.
        w.put(1, 3);
        w.put(0, 1);
        // Class 1: low 000 + flag + high 00001 -> cascade 0b1000.
        w.put(0, 3);
        w.put(1, 1);
        w.put(1, 5);
        // One book per set cascade bit.
        w.put(1, 8);
        w.put(1, 8);
        w.put(0, 8);
        let bytes = w.finish();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let residue = Residue::parse(&mut reader, 2).unwrap();
        assert_eq!(residue.residue_type, 1);
        assert_eq!(residue.partition_size, 4);
        assert_eq!(residue.cascades, vec![1, 8]);
        assert_eq!(residue.books[0], 1);
        assert_eq!(residue.books[1], NO_BOOK);
        assert_eq!(residue.books[8 + 3], 1);

        // begin > end is rejected.
        let mut w = BitWriter::new();
        w.put(0, 16);
        w.put(8, 24);
        w.put(4, 24);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        assert!(Residue::parse(&mut reader, 2).is_err());
    }
}
