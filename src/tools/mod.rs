//! Building blocks shared by the LZW encoder and decoder.

pub mod bit_stream;
pub mod dictionary;
