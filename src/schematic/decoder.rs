use std::io;
use std::path::{Path, PathBuf};

use nbt::{Blob, Value};
use thiserror::Error;
use tracing::debug;

use super::model::{Dimensions, StructureModel};
use crate::block::{BlockPos, BlockRegistry, BlockState};

/// Sponge schematic versions this decoder understands
pub const SUPPORTED_VERSIONS: [i32; 3] = [1, 2, 3];

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors raised while turning bytes into a [`StructureModel`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The stream ended before the document or block data was complete
    #[error("schematic data is truncated: {0}")]
    Truncated(String),

    /// The stream is not a well-formed schematic document
    #[error("malformed schematic: {0}")]
    Malformed(String),

    #[error("unsupported schematic version {0}")]
    UnsupportedVersion(i32),

    #[error("invalid dimensions {width}x{height}x{length}")]
    InvalidDimensions { width: i64, height: i64, length: i64 },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' has unexpected type (expected {expected})")]
    UnexpectedTag {
        field: &'static str,
        expected: &'static str,
    },

    /// A palette identifier the block registry does not know
    #[error("unresolved block state '{0}'")]
    UnresolvedBlockState(String),

    #[error("failed to read '{}': {message}", path.display())]
    Io { path: PathBuf, message: String },
}

impl From<nbt::Error> for DecodeError {
    fn from(err: nbt::Error) -> Self {
        match err {
            nbt::Error::IncompleteNbtValue => DecodeError::Truncated("incomplete NBT document".to_string()),
            nbt::Error::IoError(ref e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                DecodeError::Truncated(e.to_string())
            }
            other => DecodeError::Malformed(other.to_string()),
        }
    }
}

/// Read a schematic file from disk and decode it
pub fn decode_file(path: &Path, registry: &dyn BlockRegistry) -> Result<StructureModel, DecodeError> {
    let bytes = std::fs::read(path).map_err(|e| DecodeError::Io {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    decode(&bytes, registry)
}

/// Decode a Sponge schematic document.
///
/// Pure function of `bytes` and the registry; safe to call from any number of
/// threads at once.
pub fn decode(bytes: &[u8], registry: &dyn BlockRegistry) -> Result<StructureModel, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Truncated("empty input".to_string()));
    }

    let mut reader = bytes;
    let blob = if bytes.starts_with(&GZIP_MAGIC) {
        Blob::from_gzip_reader(&mut reader)?
    } else {
        Blob::from_reader(&mut reader)?
    };

    // v3 nests everything below a `Schematic` compound
    let root = match blob.get("Schematic") {
        Some(nested @ Value::Compound(_)) => Root::Nested(nested),
        _ => Root::Document(&blob),
    };
    let root = |key: &'static str| root.get(key);

    let version = int_field(root("Version"), "Version")?;
    if !SUPPORTED_VERSIONS.contains(&version) {
        return Err(DecodeError::UnsupportedVersion(version));
    }

    let width = extent_field(root("Width"), "Width")?;
    let height = extent_field(root("Height"), "Height")?;
    let length = extent_field(root("Length"), "Length")?;
    if width <= 0 || height <= 0 || length <= 0 {
        return Err(DecodeError::InvalidDimensions { width, height, length });
    }
    let dimensions = Dimensions::new(width as u32, height as u32, length as u32)?;

    let data_version = match root("DataVersion") {
        Some(value) => Some(int_field(Some(value), "DataVersion")?),
        None => None,
    };
    let offset = match root("Offset") {
        Some(Value::IntArray(xyz)) if xyz.len() == 3 => BlockPos::new(xyz[0], xyz[1], xyz[2]),
        Some(_) => {
            return Err(DecodeError::UnexpectedTag {
                field: "Offset",
                expected: "int array of length 3",
            })
        }
        None => BlockPos::ORIGIN,
    };

    let (palette_value, data_value) = if version >= 3 {
        match root("Blocks") {
            Some(Value::Compound(blocks)) => (blocks.get("Palette"), blocks.get("Data")),
            Some(_) => {
                return Err(DecodeError::UnexpectedTag {
                    field: "Blocks",
                    expected: "compound",
                })
            }
            None => return Err(DecodeError::MissingField("Blocks")),
        }
    } else {
        (root("Palette"), root("BlockData"))
    };

    let palette = resolve_palette(palette_value, registry)?;

    let data = match data_value {
        Some(Value::ByteArray(data)) => data,
        Some(_) => {
            return Err(DecodeError::UnexpectedTag {
                field: "BlockData",
                expected: "byte array",
            })
        }
        None => return Err(DecodeError::MissingField("BlockData")),
    };

    // Every cell takes at least one byte, so a short array cannot be valid
    let volume = dimensions.volume();
    if (data.len() as u64) < volume {
        return Err(DecodeError::Truncated(format!(
            "block data holds {} bytes for {} cells",
            data.len(),
            volume
        )));
    }

    let cells = read_varints(data, volume as usize)?;
    let model = StructureModel::new(dimensions, palette, cells)?
        .with_metadata(version as u8, data_version, offset);

    debug!(
        "Decoded v{} schematic {}x{}x{} ({} palette entries)",
        version,
        width,
        height,
        length,
        model.palette().len()
    );
    Ok(model)
}

/// Compound holding the schematic fields
#[derive(Clone, Copy)]
enum Root<'a> {
    Document(&'a Blob),
    Nested(&'a Value),
}

impl<'a> Root<'a> {
    fn get(self, key: &'static str) -> Option<&'a Value> {
        match self {
            Root::Document(blob) => blob.get(key),
            Root::Nested(Value::Compound(fields)) => fields.get(key),
            Root::Nested(_) => None,
        }
    }
}

fn int_field(value: Option<&Value>, field: &'static str) -> Result<i32, DecodeError> {
    match value {
        Some(Value::Int(v)) => Ok(*v),
        Some(Value::Short(v)) => Ok(*v as i32),
        Some(Value::Byte(v)) => Ok(*v as i32),
        Some(_) => Err(DecodeError::UnexpectedTag { field, expected: "int" }),
        None => Err(DecodeError::MissingField(field)),
    }
}

/// Dimension fields are shorts in the format; some exporters write ints
fn extent_field(value: Option<&Value>, field: &'static str) -> Result<i64, DecodeError> {
    match value {
        Some(Value::Short(v)) => Ok(*v as i64),
        Some(Value::Int(v)) => Ok(*v as i64),
        Some(_) => Err(DecodeError::UnexpectedTag { field, expected: "short" }),
        None => Err(DecodeError::MissingField(field)),
    }
}

/// Palette compound maps identifier -> index; turn it into an index-ordered
/// vector of resolved states
fn resolve_palette(
    value: Option<&Value>,
    registry: &dyn BlockRegistry,
) -> Result<Vec<BlockState>, DecodeError> {
    let entries = match value {
        Some(Value::Compound(entries)) => entries,
        Some(_) => {
            return Err(DecodeError::UnexpectedTag {
                field: "Palette",
                expected: "compound",
            })
        }
        None => return Err(DecodeError::MissingField("Palette")),
    };
    if entries.is_empty() {
        return Err(DecodeError::Malformed("palette is empty".to_string()));
    }

    let mut slots: Vec<Option<BlockState>> = vec![None; entries.len()];
    for (identifier, index) in entries.iter() {
        let index = match index {
            Value::Int(i) => *i,
            _ => {
                return Err(DecodeError::UnexpectedTag {
                    field: "Palette",
                    expected: "int values",
                })
            }
        };
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| slots.get_mut(i))
            .ok_or_else(|| {
                DecodeError::Malformed(format!(
                    "palette index {} for '{}' outside 0..{}",
                    index,
                    identifier,
                    entries.len()
                ))
            })?;
        if slot.is_some() {
            return Err(DecodeError::Malformed(format!("palette index {} used twice", index)));
        }
        let state = registry
            .resolve(identifier)
            .ok_or_else(|| DecodeError::UnresolvedBlockState(identifier.clone()))?;
        *slot = Some(state);
    }

    // Indices are unique and in range, so every slot is filled
    Ok(slots.into_iter().flatten().collect())
}

/// Decode `count` unsigned LEB128 varints, rejecting trailing bytes
fn read_varints(data: &[i8], count: usize) -> Result<Vec<u32>, DecodeError> {
    let mut values = Vec::with_capacity(count);
    let mut bytes = data.iter().map(|&b| b as u8);

    for cell in 0..count {
        let mut value: u32 = 0;
        let mut shift = 0;
        loop {
            let byte = bytes.next().ok_or_else(|| {
                DecodeError::Truncated(format!("block data ended at cell {} of {}", cell, count))
            })?;
            value |= ((byte & 0x7f) as u32) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 28 {
                return Err(DecodeError::Malformed(format!("varint too long at cell {}", cell)));
            }
        }
        values.push(value);
    }

    if bytes.next().is_some() {
        return Err(DecodeError::Malformed("trailing bytes after block data".to_string()));
    }
    Ok(values)
}
