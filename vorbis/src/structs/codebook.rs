//! Codebook parsing, canonical codeword assignment and VQ decode.
//!
//! A codebook carries a multiset of codeword lengths from which the canonical
//! prefix code is reconstructed, plus an optional vector-quantization lookup
//! table of `entries * dimensions` values materialized at parse time. Scalar
//! decode walks a flat binary tree built from the assigned codewords; the
//! tree produces the same entry for every bit sequence as a linear scan over
//! the (length, codeword) pairs would.

use anyhow::{Result, bail, ensure};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::CodebookError;
use crate::utils::{float32_unpack, ilog, lookup1_values};

/// 24-bit sync pattern opening every codebook.
pub const CODEBOOK_SYNC: u32 = 0x56_43_42;

/// Sentinel in the decode tree: branch not assigned.
const VACANT: i32 = 0;

/// A used codebook entry. `num` is the entry's index in the full entry list
/// (the value scalar decode returns), `codeword` the canonically assigned
/// code of `len` bits.
#[derive(Debug, Clone, Copy)]
pub struct Entry {
    pub num: u32,
    pub len: u8,
    pub codeword: u32,
}

#[derive(Debug, Clone, Default)]
pub struct Codebook {
    pub dimensions: u16,
    pub num_entries: u32,
    pub ordered: bool,
    pub sparse: bool,
    /// Used entries in entry-number order.
    entries: Vec<Entry>,
    pub lookup_type: u8,
    minimum_value: f64,
    delta_value: f64,
    value_bits: u8,
    sequence_p: bool,
    multiplicands: Vec<u32>,
    /// Flat `num_entries * dimensions` VQ table (empty for lookup type 0).
    lookup_table: Vec<f32>,
    /// Binary decision tree over codeword bits, MSb first. Positive values
    /// index the next node, negative values encode `-(entry_num + 1)`.
    decode_tree: Vec<[i32; 2]>,
}

impl Codebook {
    pub fn parse(reader: &mut BsIoSliceReader) -> Result<Self> {
        let sync = reader.get_n::<u32>(24)?;
        if sync != CODEBOOK_SYNC {
            bail!(CodebookError::InvalidSync(sync));
        }

        let mut book = Self {
            dimensions: reader.get_n(16)?,
            num_entries: reader.get_n(24)?,
            ..Default::default()
        };
        if book.dimensions == 0 {
            bail!(CodebookError::ZeroDimensions);
        }
        if book.num_entries == 0 {
            bail!(CodebookError::ZeroEntries);
        }

        book.ordered = reader.get()?;
        if !book.ordered {
            book.sparse = reader.get()?;
            if book.sparse {
                // Unused entries keep their slot in the numbering: `num` is
                // the full-list index, which also indexes the VQ table.
                for i in 0..book.num_entries {
                    if reader.get()? {
                        let len = reader.get_n::<u8>(5)? + 1;
                        book.entries.push(Entry {
                            num: i,
                            len,
                            codeword: 0,
                        });
                    }
                }
            } else {
                for i in 0..book.num_entries {
                    let len = reader.get_n::<u8>(5)? + 1;
                    book.entries.push(Entry {
                        num: i,
                        len,
                        codeword: 0,
                    });
                }
            }
        } else {
            let mut cur_len = reader.get_n::<u8>(5)? as u32 + 1;
            let mut cur_entry = 0u32;
            while cur_entry < book.num_entries {
                if cur_len > 32 {
                    bail!(CodebookError::InvalidCodewordLength(cur_len));
                }
                let number =
                    reader.get_n::<u32>(ilog((book.num_entries - cur_entry) as u64))?;
                if cur_entry + number > book.num_entries {
                    bail!(CodebookError::OrderedCountMismatch {
                        assigned: cur_entry + number,
                        declared: book.num_entries,
                    });
                }
                for i in cur_entry..cur_entry + number {
                    book.entries.push(Entry {
                        num: i,
                        len: cur_len as u8,
                        codeword: 0,
                    });
                }
                cur_entry += number;
                cur_len += 1;
            }
        }

        book.assign_codewords()?;
        book.build_decode_tree()?;

        book.lookup_type = reader.get_n(4)?;
        match book.lookup_type {
            0 => {}
            1 | 2 => {
                book.minimum_value = float32_unpack(reader.get_n(32)?);
                book.delta_value = float32_unpack(reader.get_n(32)?);
                book.value_bits = reader.get_n::<u8>(4)? + 1;
                book.sequence_p = reader.get()?;

                let num_lookup_values = if book.lookup_type == 1 {
                    lookup1_values(book.num_entries, book.dimensions) as u64
                } else {
                    book.num_entries as u64 * book.dimensions as u64
                };
                book.multiplicands = Vec::with_capacity(num_lookup_values as usize);
                for _ in 0..num_lookup_values {
                    book.multiplicands
                        .push(reader.get_n(book.value_bits as u32)?);
                }
                book.build_vq();
            }
            t => bail!(CodebookError::InvalidLookupType(t)),
        }

        ensure!(!reader.reached_end()?, "codebook ran past the packet end");
        Ok(book)
    }

    /// Canonical codeword assignment: walk the used entries in order, hand
    /// each the next vacant codeword of its length, then update the
    /// next-available markers so the codeword and every shorter prefix are
    /// consumed. The final marker state must describe a fully used tree.
    fn assign_codewords(&mut self) -> Result<()> {
        let mut marker = [0u64; 32];

        for entry in &mut self.entries {
            let len = entry.len as usize;
            debug_assert!((1..=32).contains(&len));
            let mut codeword = marker[len - 1];
            if codeword >> len != 0 {
                bail!(CodebookError::Overspecified(len as u8));
            }
            entry.codeword = codeword as u32;

            for j in (1..=len).rev() {
                if marker[j - 1] & 1 != 0 {
                    if j == 1 {
                        marker[0] += 1;
                    } else {
                        marker[j - 1] = marker[j - 2] << 1;
                    }
                    if marker[j - 1] > 1u64 << j {
                        bail!(CodebookError::Overspecified(j as u8));
                    }
                    break;
                }
                marker[j - 1] += 1;
            }

            for j in len + 1..=32 {
                if marker[j - 1] >> 1 == codeword {
                    codeword = marker[j - 1];
                    marker[j - 1] = marker[j - 2] << 1;
                } else {
                    break;
                }
            }
        }

        for (i, &m) in marker.iter().enumerate() {
            if m != 1u64 << (i + 1) {
                bail!(CodebookError::Underspecified((i + 1) as u8));
            }
        }

        Ok(())
    }

    fn build_decode_tree(&mut self) -> Result<()> {
        let mut tree: Vec<[i32; 2]> = vec![[VACANT; 2]];

        for entry in &self.entries {
            let mut node = 0usize;
            for bit_pos in (0..entry.len as u32).rev() {
                let bit = ((entry.codeword >> bit_pos) & 1) as usize;
                if bit_pos == 0 {
                    debug_assert_eq!(tree[node][bit], VACANT);
                    tree[node][bit] = -(entry.num as i32) - 1;
                } else {
                    let next = tree[node][bit];
                    if next > 0 {
                        node = next as usize;
                    } else {
                        debug_assert_eq!(next, VACANT);
                        tree.push([VACANT; 2]);
                        let idx = (tree.len() - 1) as i32;
                        tree[node][bit] = idx;
                        node = idx as usize;
                    }
                }
            }
        }

        self.decode_tree = tree;
        Ok(())
    }

    fn build_vq(&mut self) {
        let dims = self.dimensions as usize;
        let n = self.num_entries as usize;
        let m = self.multiplicands.len();
        self.lookup_table = vec![0.0; n * dims];

        if self.lookup_type == 1 {
            for entry_idx in 0..n {
                let mut last = 0f64;
                let mut index_divisor = 1usize;
                for dim in 0..dims {
                    let mult_offset = (entry_idx / index_divisor) % m;
                    let value = (self.multiplicands[mult_offset] as f64 * self.delta_value
                        + self.minimum_value
                        + last) as f32;
                    self.lookup_table[entry_idx * dims + dim] = value;
                    if self.sequence_p {
                        last = value as f64;
                    }
                    index_divisor *= m;
                }
            }
        } else {
            debug_assert_eq!(self.lookup_table.len(), m);
            let mut offset = 0usize;
            for _ in 0..n {
                let mut last = 0f64;
                for _ in 0..dims {
                    let value = (self.multiplicands[offset] as f64 * self.delta_value
                        + self.minimum_value
                        + last) as f32;
                    self.lookup_table[offset] = value;
                    if self.sequence_p {
                        last = value as f64;
                    }
                    offset += 1;
                }
            }
        }
    }

    /// Decodes one codeword from the stream and returns its entry number.
    pub fn decode_scalar(&self, reader: &mut BsIoSliceReader) -> Result<u32> {
        let mut node = 0usize;
        loop {
            let bit = reader.get()? as usize;
            let next = self.decode_tree[node][bit];
            if next < 0 {
                return Ok((-next - 1) as u32);
            }
            if next == VACANT {
                bail!(CodebookError::IncompleteDecodeTree);
            }
            node = next as usize;
        }
    }

    /// Decodes one codeword and returns its `dimensions`-element row of the
    /// VQ lookup table.
    pub fn decode_vector(&self, reader: &mut BsIoSliceReader) -> Result<&[f32]> {
        let index = self.decode_scalar(reader)?;
        if self.lookup_type == 0 {
            bail!(CodebookError::NoVqTable);
        }
        if index >= self.num_entries {
            bail!(CodebookError::InvalidLookupIndex {
                index,
                entries: self.num_entries,
            });
        }

        let dims = self.dimensions as usize;
        let offset = index as usize * dims;
        Ok(&self.lookup_table[offset..offset + dims])
    }

    /// Used entries in entry-number order.
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BitWriter;

    fn simple_scalar_book() -> Vec<u8> {
        // Unordered, dense, lengths {1, 2, 2}, no lookup table.
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(1, 16); // dimensions
        w.put(3, 24); // entries
        w.put(0, 1); // ordered
        w.put(0, 1); // sparse
        w.put(0, 5); // len 1
        w.put(1, 5); // len 2
        w.put(1, 5); // len 2
        w.put(0, 4); // lookup type
        w.put(0, 8); // trailing byte so the parse-end probe has room
        w.finish()
    }

    #[test]
    fn parses_and_assigns_canonical_codewords() {
        let bytes = simple_scalar_book();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let book = Codebook::parse(&mut reader).unwrap();

        let words: Vec<(u8, u32)> = book.entries().iter().map(|e| (e.len, e.codeword)).collect();
        assert_eq!(words, vec![(1, 0b0), (2, 0b10), (2, 0b11)]);
    }

    #[test]
    fn decode_scalar_inverts_assignment() {
        let bytes = simple_scalar_book();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let book = Codebook::parse(&mut reader).unwrap();

        // Codeword bits enter the stream one at a time, MSb of the word
        // first: 0 -> entry 0, 10 -> entry 1, 11 -> entry 2.
        let mut w = BitWriter::new();
        for bit in [0u64, 1, 0, 1, 1] {
            w.put(bit, 1);
        }
        let stream = w.finish();
        let mut r = BsIoSliceReader::from_slice(&stream);
        assert_eq!(book.decode_scalar(&mut r).unwrap(), 0);
        assert_eq!(book.decode_scalar(&mut r).unwrap(), 1);
        assert_eq!(book.decode_scalar(&mut r).unwrap(), 2);
    }

    #[test]
    fn rejects_underspecified_lengths() {
        // Lengths {1, 2} leave the tree half empty.
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(1, 16);
        w.put(2, 24);
        w.put(0, 1);
        w.put(0, 1);
        w.put(0, 5);
        w.put(1, 5);
        w.put(0, 4);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let err = Codebook::parse(&mut reader).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CodebookError>(),
            Some(CodebookError::Underspecified(_))
        ));
    }

    #[test]
    fn rejects_overspecified_lengths() {
        // Three codewords of length 1 cannot fit a binary tree.
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(1, 16);
        w.put(3, 24);
        w.put(0, 1);
        w.put(0, 1);
        for _ in 0..3 {
            w.put(0, 5);
        }
        w.put(0, 4);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let err = Codebook::parse(&mut reader).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CodebookError>(),
            Some(CodebookError::Overspecified(_))
        ));
    }

    #[test]
    fn ordered_length_runs() {
        // Runs: one entry of length 1, one of length 2, two of length 3.
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(1, 16);
        w.put(4, 24);
        w.put(1, 1); // ordered
        w.put(0, 5); // initial length 1
        w.put(1, 3); // ilog(4) bits: 1 entry of len 1
        w.put(1, 2); // ilog(3) bits: 1 entry of len 2
        w.put(2, 2); // ilog(2) bits: 2 entries of len 3
        w.put(0, 4); // lookup type
        w.put(0, 8);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let book = Codebook::parse(&mut reader).unwrap();

        let words: Vec<(u8, u32)> = book.entries().iter().map(|e| (e.len, e.codeword)).collect();
        assert_eq!(words, vec![(1, 0b0), (2, 0b10), (3, 0b110), (3, 0b111)]);
    }

    #[test]
    fn sparse_entries_keep_full_list_numbers() {
        // Entries 0 and 2 unused; the used entries keep numbers 1 and 3.
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(1, 16);
        w.put(4, 24);
        w.put(0, 1); // ordered
        w.put(1, 1); // sparse
        w.put(0, 1); // entry 0 unused
        w.put(1, 1);
        w.put(0, 5); // len 1
        w.put(0, 1); // entry 2 unused
        w.put(1, 1);
        w.put(0, 5); // len 1
        w.put(0, 4);
        w.put(0, 8);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let book = Codebook::parse(&mut reader).unwrap();

        let nums: Vec<u32> = book.entries().iter().map(|e| e.num).collect();
        assert_eq!(nums, vec![1, 3]);
    }

    fn vq_book() -> Vec<u8> {
        // dims 2, 4 entries of length 2, lookup type 1, minimum 0, delta 1,
        // multiplicands [1, 2].
        let mut w = BitWriter::new();
        w.put(CODEBOOK_SYNC as u64, 24);
        w.put(2, 16);
        w.put(4, 24);
        w.put(0, 1);
        w.put(0, 1);
        for _ in 0..4 {
            w.put(1, 5); // len 2
        }
        w.put(1, 4); // lookup type 1
        w.put(0, 32); // minimum = 0.0
        w.put(1 | (788 << 21), 32); // delta = 1.0
        w.put(1, 4); // value_bits = 2
        w.put(0, 1); // sequence_p
        w.put(1, 2);
        w.put(2, 2);
        w.put(0, 8);
        w.finish()
    }

    #[test]
    fn vq_lookup1_table() {
        let bytes = vq_book();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let book = Codebook::parse(&mut reader).unwrap();

        // multiplicands [1, 2]: row e = [m[e % 2], m[(e / 2) % 2]].
        // Codeword 10 selects entry 2; its bits enter the stream MSb first.
        let mut w = BitWriter::new();
        w.put(1, 1);
        w.put(0, 1);
        let stream = w.finish();
        let mut r = BsIoSliceReader::from_slice(&stream);
        assert_eq!(book.decode_vector(&mut r).unwrap(), &[1.0, 2.0]);
    }

    #[test]
    fn scalar_book_has_no_vq() {
        let bytes = simple_scalar_book();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let book = Codebook::parse(&mut reader).unwrap();

        let stream = [0u8];
        let mut r = BsIoSliceReader::from_slice(&stream);
        let err = book.decode_vector(&mut r).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CodebookError>(),
            Some(CodebookError::NoVqTable)
        ));
    }
}
