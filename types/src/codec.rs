//! Envelope wire codec.
//!
//! Envelopes travel as named-field MessagePack so that schema growth stays
//! backward compatible: fields absent on the wire decode to their defaults.

use crate::v1;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("encode envelope: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode envelope: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

pub fn marshal(envelope: &v1::Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(envelope)?)
}

pub fn unmarshal(bytes: &[u8]) -> Result<v1::Envelope, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}
