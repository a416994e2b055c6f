//! Schematic decoding.
//!
//! Reads Sponge schematic files (versions 1 to 3), the format written by
//! WorldEdit and most structure tools:
//! - **v1/v2**: root compound holds `Palette` and `BlockData`
//! - **v3**: root wraps a `Schematic` compound with a `Blocks` container
//!
//! Files may be gzip-compressed (the usual case) or raw NBT.

mod decoder;
mod model;

#[cfg(test)]
pub(crate) mod fixtures;

pub use decoder::{decode, decode_file, DecodeError, SUPPORTED_VERSIONS};
pub use model::{Dimensions, StructureModel};
