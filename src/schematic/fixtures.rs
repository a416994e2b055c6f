//! Builders for Sponge schematic byte fixtures used across the test suites.

use std::collections::HashMap;

use nbt::{Blob, Value};

/// In-memory description of a schematic file, serialised on demand
#[derive(Debug, Clone)]
pub(crate) struct SchematicFixture {
    version: i32,
    width: i32,
    height: i32,
    length: i32,
    palette: Vec<String>,
    cells: Vec<u32>,
    data_version: Option<i32>,
    offset: Option<[i32; 3]>,
    include_palette: bool,
    int_extents: bool,
}

impl SchematicFixture {
    pub(crate) fn new(width: i32, height: i32, length: i32) -> Self {
        Self {
            version: 2,
            width,
            height,
            length,
            palette: vec!["minecraft:stone".to_string()],
            cells: Vec::new(),
            data_version: None,
            offset: None,
            include_palette: true,
            int_extents: false,
        }
    }

    /// Solid cube of a single block type
    pub(crate) fn filled(width: i32, height: i32, length: i32, block: &str) -> Self {
        let volume = (width as i64 * height as i64 * length as i64).max(0) as usize;
        Self::new(width, height, length).palette(&[block]).cells(vec![0; volume])
    }

    pub(crate) fn version(mut self, version: i32) -> Self {
        self.version = version;
        self
    }

    pub(crate) fn palette(mut self, names: &[&str]) -> Self {
        self.palette = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub(crate) fn cells(mut self, cells: Vec<u32>) -> Self {
        self.cells = cells;
        self
    }

    pub(crate) fn data_version(mut self, data_version: i32) -> Self {
        self.data_version = Some(data_version);
        self
    }

    pub(crate) fn offset(mut self, offset: [i32; 3]) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Write extents as `Int` tags instead of `Short`, as some exporters do
    pub(crate) fn int_extents(mut self) -> Self {
        self.int_extents = true;
        self
    }

    pub(crate) fn without_palette(mut self) -> Self {
        self.include_palette = false;
        self
    }

    /// Gzip-compressed document, as written by schematic tools
    pub(crate) fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.to_blob().to_gzip_writer(&mut out).unwrap();
        out
    }

    /// Uncompressed NBT document
    pub(crate) fn to_raw_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.to_blob().to_writer(&mut out).unwrap();
        out
    }

    fn to_blob(&self) -> Blob {
        let mut fields: HashMap<String, Value> = HashMap::new();
        fields.insert("Version".to_string(), Value::Int(self.version));
        let extent = |v: i32| if self.int_extents { Value::Int(v) } else { Value::Short(v as i16) };
        fields.insert("Width".to_string(), extent(self.width));
        fields.insert("Height".to_string(), extent(self.height));
        fields.insert("Length".to_string(), extent(self.length));
        if let Some(dv) = self.data_version {
            fields.insert("DataVersion".to_string(), Value::Int(dv));
        }
        if let Some(offset) = self.offset {
            fields.insert("Offset".to_string(), Value::IntArray(offset.to_vec()));
        }

        let palette: HashMap<String, Value> = self
            .palette
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), Value::Int(i as i32)))
            .collect();
        let data = Value::ByteArray(encode_varints(&self.cells));

        if self.version >= 3 {
            let mut blocks: HashMap<String, Value> = HashMap::new();
            if self.include_palette {
                blocks.insert("Palette".to_string(), Value::Compound(palette));
            }
            blocks.insert("Data".to_string(), data);
            fields.insert("Blocks".to_string(), Value::Compound(blocks));

            let mut blob = Blob::new();
            blob.insert("Schematic", Value::Compound(fields)).unwrap();
            blob
        } else {
            if self.include_palette {
                fields.insert("PaletteMax".to_string(), Value::Int(self.palette.len() as i32));
                fields.insert("Palette".to_string(), Value::Compound(palette));
            }
            fields.insert("BlockData".to_string(), data);

            let mut blob = Blob::named("Schematic");
            for (key, value) in fields {
                blob.insert(key, value).unwrap();
            }
            blob
        }
    }
}

fn encode_varints(values: &[u32]) -> Vec<i8> {
    let mut out = Vec::with_capacity(values.len());
    for &value in values {
        let mut v = value;
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte as i8);
            if v == 0 {
                break;
            }
        }
    }
    out
}
