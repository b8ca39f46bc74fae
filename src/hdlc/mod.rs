//! HDLC-derived frame codec.
//!
//! - **Framing**: [`Header`], [`encode_frame`], [`decode_frame`]
//! - **Control byte**: [`Control`] with one variant per frame type
//! - **Checksums**: CRC-16 over the header and over the payload

pub mod checksum;
mod frame;

pub use frame::*;
