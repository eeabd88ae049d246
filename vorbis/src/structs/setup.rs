//! Setup header: codebooks, floors, residues, mappings and modes.

use anyhow::{Result, bail, ensure};

use crate::structs::codebook::Codebook;
use crate::structs::floor::Floor;
use crate::structs::id_header::IdHeader;
use crate::structs::mapping::Mapping;
use crate::structs::mode::Mode;
use crate::structs::residue::Residue;
use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::SetupError;

/// Parsed setup header. Immutable once built; audio packets only read it.
#[derive(Debug, Clone, Default)]
pub struct Setup {
    pub codebooks: Vec<Codebook>,
    pub floors: Vec<Floor>,
    pub residues: Vec<Residue>,
    pub mappings: Vec<Mapping>,
    pub modes: Vec<Mode>,
}

impl Setup {
    pub fn parse(reader: &mut BsIoSliceReader, header: &IdHeader) -> Result<Self> {
        let mut setup = Setup::default();

        let count = reader.get_n::<u16>(8)? as usize + 1;
        for _ in 0..count {
            setup.codebooks.push(Codebook::parse(reader)?);
        }
        ensure!(
            !reader.reached_end()?,
            "setup packet exhausted after codebooks"
        );

        // Time-domain transform placeholders.
        let count = reader.get_n::<u8>(6)? as usize + 1;
        for _ in 0..count {
            let placeholder = reader.get_n::<u16>(16)?;
            if placeholder != 0 {
                bail!(SetupError::NonZeroTimePlaceholder(placeholder));
            }
        }
        ensure!(
            !reader.reached_end()?,
            "setup packet exhausted after time transforms"
        );

        let count = reader.get_n::<u8>(6)? as usize + 1;
        for _ in 0..count {
            setup
                .floors
                .push(Floor::parse(reader, setup.codebooks.len())?);
        }
        ensure!(!reader.reached_end()?, "setup packet exhausted after floors");

        let count = reader.get_n::<u8>(6)? as usize + 1;
        for _ in 0..count {
            setup
                .residues
                .push(Residue::parse(reader, setup.codebooks.len())?);
        }
        ensure!(
            !reader.reached_end()?,
            "setup packet exhausted after residues"
        );

        let count = reader.get_n::<u8>(6)? as usize + 1;
        for _ in 0..count {
            setup.mappings.push(Mapping::parse(
                reader,
                header.audio_channels,
                setup.floors.len(),
                setup.residues.len(),
            )?);
        }
        ensure!(
            !reader.reached_end()?,
            "setup packet exhausted after mappings"
        );

        let count = reader.get_n::<u8>(6)? as usize + 1;
        for _ in 0..count {
            setup
                .modes
                .push(Mode::parse(reader, setup.mappings.len(), header)?);
        }
        ensure!(!reader.reached_end()?, "setup packet exhausted after modes");

        if !reader.get()? {
            bail!(SetupError::MissingFramingBit);
        }
        ensure!(!reader.reached_end()?, "setup packet ends at the framing bit");

        // Nothing but zero padding may follow.
        if reader.get_n::<u8>(8)? != 0 {
            bail!(SetupError::TrailingData);
        }
        if !reader.reached_end()? {
            bail!(SetupError::TrailingData);
        }

        Ok(setup)
    }
}

#[cfg(test)]
pub(crate) fn write_minimal_setup(w: &mut crate::testutil::BitWriter) {
    use crate::structs::codebook::CODEBOOK_SYNC;

    // One scalar codebook: 1 dimension, lengths {1, 2, 2}.
    w.put(0, 8); // codebook count - 1
    w.put(CODEBOOK_SYNC as u64, 24);
    w.put(1, 16);
    w.put(3, 24);
    w.put(0, 1);
    w.put(0, 1);
    w.put(0, 5);
    w.put(1, 5);
    w.put(1, 5);
    w.put(0, 4);

    // One time-domain placeholder.
    w.put(0, 6);
    w.put(0, 16);

    // One type-1 floor with zero partitions.
    w.put(0, 6);
    w.put(1, 16); // floor type
    w.put(0, 5); // partitions
    w.put(0, 2); // multiplier - 1
    w.put(7, 4); // range bits

    // One type-0 residue with an empty span and no cascade books.
    w.put(0, 6);
    w.put(0, 16); // residue type
    w.put(0, 24); // begin
    w.put(0, 24); // end
    w.put(0, 24); // partition size - 1
    w.put(0, 6); // classifications - 1
    w.put(0, 8); // classbook
    w.put(0, 3); // cascade low bits
    w.put(0, 1); // no high bits

    // One mapping: single submap, no couplings.
    w.put(0, 6);
    w.put(0, 16); // mapping type
    w.put(0, 1); // submap count flag
    w.put(0, 1); // coupling flag
    w.put(0, 2); // reserved
    w.put(0, 8); // time placeholder
    w.put(0, 8); // floor
    w.put(0, 8); // residue

    // One short mode.
    w.put(0, 6);
    w.put(0, 1); // block flag
    w.put(0, 16); // window type
    w.put(0, 16); // transform type
    w.put(0, 8); // mapping

    w.put(1, 1); // framing
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structs::id_header::build_id_body;
    use crate::testutil::BitWriter;

    fn test_header() -> IdHeader {
        IdHeader::parse(&build_id_body(2, 48000, 6, 7)).unwrap()
    }

    #[test]
    fn parses_minimal_setup() {
        let mut w = BitWriter::new();
        write_minimal_setup(&mut w);
        let bytes = w.finish();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let setup = Setup::parse(&mut reader, &test_header()).unwrap();
        assert_eq!(setup.codebooks.len(), 1);
        assert_eq!(setup.floors.len(), 1);
        assert_eq!(setup.residues.len(), 1);
        assert_eq!(setup.mappings.len(), 1);
        assert_eq!(setup.modes.len(), 1);
        assert_eq!(setup.modes[0].blocksize, 64);
    }

    #[test]
    fn parsing_is_idempotent() {
        let mut w = BitWriter::new();
        write_minimal_setup(&mut w);
        let bytes = w.finish();

        let header = test_header();
        let mut first_reader = BsIoSliceReader::from_slice(&bytes);
        let first = Setup::parse(&mut first_reader, &header).unwrap();
        let mut second_reader = BsIoSliceReader::from_slice(&bytes);
        let second = Setup::parse(&mut second_reader, &header).unwrap();

        assert_eq!(format!("{first:?}"), format!("{second:?}"));
    }

    #[test]
    fn rejects_missing_framing_bit() {
        let mut w = BitWriter::new();
        write_minimal_setup(&mut w);
        let mut bytes = w.finish();
        // The framing bit is the last bit written; clear it.
        let framing_byte = bytes.len() - 1;
        bytes[framing_byte] = 0;

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        assert!(Setup::parse(&mut reader, &test_header()).is_err());
    }

    #[test]
    fn rejects_nonzero_trailing_bytes() {
        let mut w = BitWriter::new();
        write_minimal_setup(&mut w);
        w.put(0xFF, 16);
        let bytes = w.finish();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        assert!(Setup::parse(&mut reader, &test_header()).is_err());
    }
}
