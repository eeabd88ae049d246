#[derive(thiserror::Error, Debug)]
pub enum FramingError {
    #[error("Invalid capture pattern, expected \"OggS\". Read {0:02X?}")]
    InvalidCapturePattern([u8; 4]),

    #[error("Unsupported stream structure version. Read {0}, expected 0")]
    UnsupportedStreamVersion(u8),

    #[error("Short read inside a page: wanted {wanted} bytes, got {got}")]
    ShortRead { wanted: usize, got: usize },

    #[error("Page CRC mismatch. Stored {stored:#010X}, calculated {calculated:#010X}")]
    CrcMismatch { stored: u32, calculated: u32 },

    #[error("Last segment has length 255: packets spanning pages are not supported")]
    PacketSpansPages,

    #[error("Segment table does not delimit the page data: {left} trailing bytes")]
    TrailingSegmentData { left: u32 },

    #[error("Page with first flag for serial {0:#010X}, but that stream is already live")]
    DuplicateSerial(u32),

    #[error("Page for serial {0:#010X}, but no such stream was registered")]
    UnknownSerial(u32),
}

#[derive(thiserror::Error, Debug)]
pub enum HeaderError {
    #[error("Header packet too short: {0} bytes")]
    PacketTooShort(usize),

    #[error("Invalid header packet type. Read {read}, expected {expected}")]
    InvalidPacketType { read: u8, expected: u8 },

    #[error("Header magic is not \"vorbis\". Read {0:02X?}")]
    InvalidMagic([u8; 6]),

    #[error("Unsupported Vorbis version {0}")]
    UnsupportedVersion(u32),

    #[error("Identification header declares zero audio channels")]
    NoChannels,

    #[error("Identification header is {read} bytes after the magic, expected {expected}")]
    BadLength { read: usize, expected: usize },

    #[error("Blocksize {0} is out of range [64, 8192]")]
    InvalidBlocksize(u32),

    #[error("blocksize_0 = {bs0} exceeds blocksize_1 = {bs1}")]
    BlocksizeOrder { bs0: u16, bs1: u16 },

    #[error("Identification header framing bit is not set")]
    MissingFramingBit,
}

#[derive(thiserror::Error, Debug)]
pub enum CodebookError {
    #[error("Invalid codebook sync pattern. Read {0:#08X}, expected 0x564342")]
    InvalidSync(u32),

    #[error("Codebook declares zero dimensions")]
    ZeroDimensions,

    #[error("Codebook declares zero entries")]
    ZeroEntries,

    #[error("Ordered codebook assigns {assigned} entries but declares {declared}")]
    OrderedCountMismatch { assigned: u32, declared: u32 },

    #[error("Codeword length {0} exceeds 32 bits")]
    InvalidCodewordLength(u32),

    #[error("Scalar decode walked into an unassigned branch of the codeword tree")]
    IncompleteDecodeTree,

    #[error("Codeword lengths are overspecified at length {0}")]
    Overspecified(u8),

    #[error("Codeword lengths are underspecified: tree is not fully used at length {0}")]
    Underspecified(u8),

    #[error("Invalid VQ lookup type {0}")]
    InvalidLookupType(u8),

    #[error("Decoded scalar {index} is not below the entry count {entries}")]
    InvalidLookupIndex { index: u32, entries: u32 },

    #[error("Vector decode on a codebook without a VQ lookup table")]
    NoVqTable,
}

#[derive(thiserror::Error, Debug)]
pub enum FloorError {
    #[error("Invalid floor type {0}")]
    InvalidType(u16),

    #[error("Floor book index {index} is not below the codebook count {count}")]
    BookOutOfRange { index: usize, count: usize },

    #[error("Floor 0 curve synthesis is not supported")]
    Floor0SynthesisUnsupported,

    #[error("Partition class index {index} is not below the class count {count}")]
    ClassOutOfRange { index: usize, count: usize },

    #[error("Transmitted {ys} floor Y values for {xs} X coordinates")]
    PointCountMismatch { ys: usize, xs: usize },

    #[error("Floor X coordinate {0} appears twice")]
    DuplicateX(u32),

    #[error("Predicted floor value {predicted} exceeds the range {range}")]
    PredictionOutOfRange { predicted: i64, range: u32 },

    #[error("Floor point {0} has no low/high neighbor")]
    MissingNeighbor(usize),

    #[error("Synthesized floor value {0} is outside the inverse-dB table")]
    CurveOutOfRange(i64),
}

#[derive(thiserror::Error, Debug)]
pub enum ResidueError {
    #[error("Invalid residue type {0}")]
    InvalidType(u16),

    #[error("Residue begin {begin} exceeds end {end}")]
    BeginAfterEnd { begin: u32, end: u32 },

    #[error("Residue classbook {index} is not below the codebook count {count}")]
    ClassbookOutOfRange { index: usize, count: usize },

    #[error("Residue classbook has zero dimensions")]
    ZeroClasswords,

    #[error("Residue book {index} is not below the codebook count {count}")]
    BookOutOfRange { index: usize, count: usize },

    #[error("Partition size {partition_size} is not a multiple of the book dimension {dimensions}")]
    PartitionSizeNotMultiple {
        partition_size: usize,
        dimensions: usize,
    },

    #[error("Channel count mismatch: {used} used-flags for {out} output vectors")]
    ChannelCountMismatch { used: usize, out: usize },

    #[error("Residue output vector has length {len}, expected {expected}")]
    BadVectorLength { len: usize, expected: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum MappingError {
    #[error("Invalid mapping type {0}, expected 0")]
    InvalidType(u16),

    #[error("Coupling magnitude and angle both name channel {0}")]
    CouplingSelfPair(u16),

    #[error("Coupling channel {channel} is not below the channel count {channels}")]
    ChannelOutOfRange { channel: u16, channels: u8 },

    #[error("Mapping reserved bits are not zero. Read {0:#04b}")]
    ReservedBitsNonZero(u8),

    #[error("Channel mux {mux} is not below the submap count {submaps}")]
    MuxOutOfRange { mux: u8, submaps: usize },

    #[error("Submap floor {index} is not below the floor count {count}")]
    FloorOutOfRange { index: usize, count: usize },

    #[error("Submap residue {index} is not below the residue count {count}")]
    ResidueOutOfRange { index: usize, count: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum ModeError {
    #[error("Invalid window type {0}, expected 0")]
    InvalidWindowType(u16),

    #[error("Invalid transform type {0}, expected 0")]
    InvalidTransformType(u16),

    #[error("Mode mapping {index} is not below the mapping count {count}")]
    MappingOutOfRange { index: usize, count: usize },
}

#[derive(thiserror::Error, Debug)]
pub enum SetupError {
    #[error("Time-domain transform placeholder is {0:#06X}, expected 0")]
    NonZeroTimePlaceholder(u16),

    #[error("Setup header framing bit is not set")]
    MissingFramingBit,

    #[error("Setup header has non-zero trailing bits")]
    TrailingData,
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
    #[error("Setup header before the identification header")]
    SetupBeforeId,

    #[error("Audio packet before the setup header")]
    AudioBeforeSetup,

    #[error("Packet type bit is set: not an audio packet")]
    NotAudioPacket,

    #[error("Mode index {index} is not below the mode count {count}")]
    ModeOutOfRange { index: usize, count: usize },

    #[error("Stop requested by callback")]
    CallbackStop,
}
