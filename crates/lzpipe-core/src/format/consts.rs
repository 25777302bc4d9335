/// Magic number opening a self-describing frame.
pub const FRAME_MAGIC: u32 = 0x184D_2204;
/// Magic number opening a legacy stream.
pub const LEGACY_MAGIC: u32 = 0x184C_2102;
/// First of the sixteen skippable-frame magic numbers.
pub const SKIPPABLE_MAGIC_BASE: u32 = 0x184D_2A50;
/// Mask that maps every skippable-frame magic onto [`SKIPPABLE_MAGIC_BASE`].
pub const SKIPPABLE_MAGIC_MASK: u32 = 0xFFFF_FFF0;

/// Size of a magic number on disk.
pub const MAGIC_SIZE: usize = 4;
/// Size of a block length word (and of every checksum) on disk.
pub const BLOCK_HEADER_SIZE: usize = 4;

/// Fixed uncompressed block size of the legacy format.
pub const LEGACY_BLOCK_SIZE: usize = 8 * 1024 * 1024;
/// Largest dictionary window handed to the codec.
pub const MAX_DICT_SIZE: usize = 64 * 1024;

/// Version carried in the two high bits of the frame descriptor flags.
pub const FRAME_VERSION: u8 = 0b01;
/// High bit of a block length word: the block is stored uncompressed.
pub const BLOCK_UNCOMPRESSED_FLAG: u32 = 0x8000_0000;
/// Block length word that terminates the block sequence of a frame.
pub const END_MARK: u32 = 0;

pub(crate) const FLG_VERSION_SHIFT: u8 = 6;
pub(crate) const FLG_BLOCK_INDEPENDENCE: u8 = 1 << 5;
pub(crate) const FLG_BLOCK_CHECKSUM: u8 = 1 << 4;
pub(crate) const FLG_CONTENT_SIZE: u8 = 1 << 3;
pub(crate) const FLG_CONTENT_CHECKSUM: u8 = 1 << 2;
pub(crate) const FLG_RESERVED: u8 = 1 << 1;
pub(crate) const FLG_DICT_ID: u8 = 1;
pub(crate) const BD_BLOCK_SIZE_SHIFT: u8 = 4;
pub(crate) const BD_RESERVED_MASK: u8 = 0b1000_1111;
