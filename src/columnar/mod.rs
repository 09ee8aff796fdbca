//! The primitive column codecs of the binary format.
//!
//! Every per-op attribute is stored as a column: a byte stream produced by
//! one of the streaming encoder/decoder pairs in this module. Run length
//! encoding ([`rle`]) covers integers and strings, [`delta`] wraps signed
//! RLE for near-monotonic sequences, [`boolean`] stores alternating run
//! counts, and [`value`] stores heterogeneous scalars as a (meta, raw)
//! column pair. Nullability is carried by RLE null runs; optional boolean
//! columns are simply omitted while every row reads as false.

pub(crate) mod boolean;
pub(crate) mod delta;
pub(crate) mod encoding;
pub(crate) mod rle;
pub(crate) mod value;

pub(crate) use boolean::{BooleanDecoder, BooleanEncoder};
pub(crate) use delta::{DeltaDecoder, DeltaEncoder};
pub(crate) use encoding::{DecodeError, Decoder, Encodable};
pub(crate) use rle::{RleDecoder, RleEncoder};
pub(crate) use value::{ValueDecoder, ValueEncoder};
