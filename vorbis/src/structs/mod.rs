//! Data structures for the Ogg container and the Vorbis setup.
//!
//! - **Pages** ([`page`]): Ogg framing units with CRC validation
//! - **Identification** ([`id_header`]): channel count, rates, blocksizes
//! - **Codebooks** ([`codebook`]): Huffman trees and VQ lookup tables
//! - **Floors** ([`floor`]): spectral envelope configurations
//! - **Residues** ([`residue`]): partitioned VQ detail coding
//! - **Mappings** ([`mapping`]): channel/submap association and coupling
//! - **Modes** ([`mode`]): window selection and precomputed shapes
//! - **Setup** ([`setup`]): the assembled immutable stream configuration

pub mod codebook;
pub mod floor;
pub mod id_header;
pub mod mapping;
pub mod mode;
pub mod page;
pub mod residue;
pub mod setup;
