//! Bencode, the serialization format of `.torrent` files and tracker
//! responses.
//!
//! ```text
//! integer      i<decimal>e        i-42e
//! byte string  <len>:<bytes>      4:spam
//! list         l<values>e         l4:spam4:eggse
//! dictionary   d<key><value>...e  d3:cow3:mooe
//! ```
//!
//! Decoding is positional: every step returns how many bytes it consumed.
//! Encoding is canonical: dictionary keys are sorted by their raw bytes,
//! which is what makes the info-hash of a torrent reproducible.
mod decode;
mod encode;
mod value;

pub use decode::{decode, decode_exact};
pub use encode::{encode, encode_into};
pub use value::Value;
