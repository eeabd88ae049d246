//! Channel mapping: submap association and coupling pairs.

use anyhow::{Result, bail};

use crate::utils::bitstream_io::BsIoSliceReader;
use crate::utils::errors::MappingError;
use crate::utils::ilog;

/// A polar coupling step: the magnitude channel carries the dominant
/// amplitude, the angle channel the difference.
#[derive(Debug, Clone, Copy)]
pub struct Coupling {
    pub magnitude: u16,
    pub angle: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct Submap {
    pub floor: u8,
    pub residue: u8,
}

#[derive(Debug, Clone)]
pub struct Mapping {
    pub couplings: Vec<Coupling>,
    /// Channel to submap index; all zero when there is a single submap.
    pub muxs: Vec<u8>,
    pub submaps: Vec<Submap>,
}

impl Mapping {
    pub fn parse(
        reader: &mut BsIoSliceReader,
        num_channels: u8,
        num_floors: usize,
        num_residues: usize,
    ) -> Result<Self> {
        let bits = ilog(num_channels as u64 - 1);
        let mapping_type = reader.get_n::<u16>(16)?;
        if mapping_type != 0 {
            bail!(MappingError::InvalidType(mapping_type));
        }

        let num_submaps = if reader.get()? {
            reader.get_n::<u8>(4)? as usize + 1
        } else {
            1
        };

        let mut couplings = Vec::new();
        if reader.get()? {
            let coupling_steps = reader.get_n::<u8>(8)? as usize + 1;
            for _ in 0..coupling_steps {
                let magnitude = reader.get_n::<u16>(bits)?;
                let angle = reader.get_n::<u16>(bits)?;
                if magnitude == angle {
                    bail!(MappingError::CouplingSelfPair(magnitude));
                }
                for channel in [magnitude, angle] {
                    if channel >= num_channels as u16 {
                        bail!(MappingError::ChannelOutOfRange {
                            channel,
                            channels: num_channels,
                        });
                    }
                }
                couplings.push(Coupling { magnitude, angle });
            }
        }

        let reserved = reader.get_n::<u8>(2)?;
        if reserved != 0 {
            bail!(MappingError::ReservedBitsNonZero(reserved));
        }

        let mut muxs = vec![0u8; num_channels as usize];
        if num_submaps > 1 {
            for mux in &mut muxs {
                *mux = reader.get_n(4)?;
                if *mux as usize >= num_submaps {
                    bail!(MappingError::MuxOutOfRange {
                        mux: *mux,
                        submaps: num_submaps,
                    });
                }
            }
        }

        let mut submaps = Vec::with_capacity(num_submaps);
        for _ in 0..num_submaps {
            // Time configuration placeholder, explicitly discarded.
            reader.get_n::<u8>(8)?;
            let floor = reader.get_n::<u8>(8)?;
            if floor as usize >= num_floors {
                bail!(MappingError::FloorOutOfRange {
                    index: floor as usize,
                    count: num_floors,
                });
            }
            let residue = reader.get_n::<u8>(8)?;
            if residue as usize >= num_residues {
                bail!(MappingError::ResidueOutOfRange {
                    index: residue as usize,
                    count: num_residues,
                });
            }
            submaps.push(Submap { floor, residue });
        }

        Ok(Self {
            couplings,
            muxs,
            submaps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::BitWriter;

    #[test]
    fn parses_stereo_coupled_mapping() {
        let mut w = BitWriter::new();
        w.put(0, 16); // type
        w.put(0, 1); // single submap
        w.put(1, 1); // couplings present
        w.put(0, 8); // one coupling step
        w.put(0, 1); // magnitude channel 0 (ilog(1) = 1 bit)
        w.put(1, 1); // angle channel 1
        w.put(0, 2); // reserved
        w.put(0, 8); // time placeholder
        w.put(0, 8); // floor
        w.put(0, 8); // residue
        let bytes = w.finish();

        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mapping = Mapping::parse(&mut reader, 2, 1, 1).unwrap();
        assert_eq!(mapping.couplings.len(), 1);
        assert_eq!(mapping.couplings[0].magnitude, 0);
        assert_eq!(mapping.couplings[0].angle, 1);
        assert_eq!(mapping.muxs, vec![0, 0]);
        assert_eq!(mapping.submaps.len(), 1);
    }

    #[test]
    fn rejects_self_coupling_and_reserved_bits() {
        let mut w = BitWriter::new();
        w.put(0, 16);
        w.put(0, 1);
        w.put(1, 1);
        w.put(0, 8);
        w.put(1, 1); // magnitude channel 1
        w.put(1, 1); // angle channel 1: self pair
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        assert!(Mapping::parse(&mut reader, 2, 1, 1).is_err());

        let mut w = BitWriter::new();
        w.put(0, 16);
        w.put(0, 1);
        w.put(0, 1); // no couplings
        w.put(3, 2); // reserved bits set
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        assert!(Mapping::parse(&mut reader, 2, 1, 1).is_err());
    }

    #[test]
    fn mono_mapping_uses_zero_bit_coupling_fields() {
        // ilog(0) = 0: magnitude and angle would both read zero bits, which
        // collides as a self pair; valid mono mappings carry no couplings.
        let mut w = BitWriter::new();
        w.put(0, 16);
        w.put(0, 1);
        w.put(0, 1);
        w.put(0, 2);
        w.put(0, 8);
        w.put(0, 8);
        w.put(0, 8);
        let bytes = w.finish();
        let mut reader = BsIoSliceReader::from_slice(&bytes);
        let mapping = Mapping::parse(&mut reader, 1, 1, 1).unwrap();
        assert!(mapping.couplings.is_empty());
        assert_eq!(mapping.muxs, vec![0]);
    }
}
