//! # lzwpack
//!
//! Adaptive LZW compression with a fixed code width and a hashed dictionary.
//! The compressed stream is a run of `bits`-wide codes packed LSB first,
//! terminated by the code `EOS`.  There is no header, so the code width and
//! dictionary capacity must be supplied identically to both ends.
//!
//! * `tools::bit_stream` packs and unpacks codes
//! * `tools::dictionary` maps (parent,symbol) pairs to codes
//! * `lzw` runs the encoder and decoder

pub mod tools;
pub mod lzw;

pub type DYNERR = Box<dyn std::error::Error>;
pub type STDRESULT = Result<(),Box<dyn std::error::Error>>;

/// A dictionary symbol: a byte value, or `EOS`
pub type Symbol = u16;
/// A dictionary code as written to the stream
pub type Code = u32;

/// end of stream symbol, also the terminating code of every stream
pub const EOS: Symbol = 256;
/// number of root level symbols, including `EOS`
pub const SYMBOLS: usize = 257;
/// first code assigned to a learned sequence
pub const FIRST_CODE: Code = 257;
/// virtual parent of every root level entry
pub const ROOT_CODE: Code = Code::MAX;
/// code value marking an empty dictionary slot
pub const UNUSED: Code = Code::MAX;

/// Errors raised by the bit stream, the dictionary, and the coders
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stream mode `{0}`, expected r or w")]
    InvalidMode(String),
    #[error("bit width {0} is outside 1..=64")]
    BadWidth(usize),
    #[error("operation not allowed on a stream in {0:?} mode")]
    WrongMode(tools::bit_stream::Mode),
    #[error("bit stream buffer must hold at least one word")]
    BadBufferSize,
    #[error("bit stream is closed")]
    StreamClosed,
    #[error("code width {0} is outside 9..=32")]
    BadCodeWidth(usize),
    #[error("dictionary capacity {0} is too small, need more than 257 slots")]
    DictionaryTooSmall(usize),
    #[error("could not allocate dictionary with {0} slots")]
    OutOfMemory(usize),
    #[error("slot {slot} is outside dictionary of capacity {capacity}")]
    SlotOutOfRange { slot: usize, capacity: usize },
    #[error("dictionary is full")]
    DictionaryFull,
    #[error("corrupt code {0} in compressed stream")]
    CorruptCode(u64)
}
