//! Sizes of the units the collector works in. All sizes are in bytes unless the name says
//! otherwise.

pub const LOG_BITS_IN_BYTE: u8 = 3;
pub const BITS_IN_BYTE: usize = 1 << LOG_BITS_IN_BYTE;

pub const LOG_BYTES_IN_MBYTE: u8 = 20;
pub const BYTES_IN_MBYTE: usize = 1 << LOG_BYTES_IN_MBYTE;

#[cfg(target_pointer_width = "32")]
pub const LOG_BYTES_IN_WORD: u8 = 2;
#[cfg(target_pointer_width = "64")]
pub const LOG_BYTES_IN_WORD: u8 = 3;
pub const BYTES_IN_WORD: usize = 1 << LOG_BYTES_IN_WORD;
pub const LOG_BITS_IN_WORD: usize = LOG_BITS_IN_BYTE as usize + LOG_BYTES_IN_WORD as usize;
pub const BITS_IN_WORD: usize = 1 << LOG_BITS_IN_WORD;

/// The granule of memory reservation and commit.
pub const LOG_BYTES_IN_PAGE: u8 = 12;
pub const BYTES_IN_PAGE: usize = 1 << LOG_BYTES_IN_PAGE;

/// A card is the unit of the remembered sets and of the block offset table.
pub const LOG_BYTES_IN_CARD: u8 = 9;
pub const BYTES_IN_CARD: usize = 1 << LOG_BYTES_IN_CARD;
pub const WORDS_IN_CARD: usize = BYTES_IN_CARD >> LOG_BYTES_IN_WORD;

/// Region sizes are powers of two in `[MIN_REGION_BYTES, MAX_REGION_BYTES]`.
pub const MIN_REGION_BYTES: usize = 64 << 10;
pub const MAX_REGION_BYTES: usize = 32 << LOG_BYTES_IN_MBYTE;
pub const DEFAULT_REGION_BYTES: usize = BYTES_IN_MBYTE;

static_assertions::const_assert!(MIN_REGION_BYTES % BYTES_IN_CARD == 0);
static_assertions::const_assert!(
    DEFAULT_REGION_BYTES >= MIN_REGION_BYTES && DEFAULT_REGION_BYTES <= MAX_REGION_BYTES
);
