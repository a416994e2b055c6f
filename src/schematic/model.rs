//! Decoded structure model.

use crate::block::{BlockPos, BlockState};

use super::DecodeError;

/// Structure extent along each axis, all strictly positive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
    pub length: u32,
}

impl Dimensions {
    /// Each extent must be positive and fit an `i32` coordinate, and the
    /// cell count must fit a `u64`
    pub fn new(width: u32, height: u32, length: u32) -> Result<Self, DecodeError> {
        let in_range = |v: u32| v > 0 && v <= i32::MAX as u32;
        let volume = (width as u64)
            .checked_mul(height as u64)
            .and_then(|v| v.checked_mul(length as u64));
        if !(in_range(width) && in_range(height) && in_range(length)) || volume.is_none() {
            return Err(DecodeError::InvalidDimensions {
                width: width as i64,
                height: height as i64,
                length: length as i64,
            });
        }
        Ok(Self { width, height, length })
    }

    /// Number of cells in the bounding box (saturates for extents that
    /// bypassed [`Dimensions::new`])
    pub fn volume(&self) -> u64 {
        (self.width as u64)
            .saturating_mul(self.height as u64)
            .saturating_mul(self.length as u64)
    }

    /// Whether a local coordinate lies inside the bounding box
    pub fn contains(&self, pos: BlockPos) -> bool {
        pos.x >= 0
            && pos.y >= 0
            && pos.z >= 0
            && (pos.x as u32) < self.width
            && (pos.y as u32) < self.height
            && (pos.z as u32) < self.length
    }

    /// Sponge layout: x varies fastest, then z, then y
    fn index(&self, pos: BlockPos) -> usize {
        let (x, y, z) = (pos.x as usize, pos.y as usize, pos.z as usize);
        let (w, l) = (self.width as usize, self.length as usize);
        x + z * w + y * w * l
    }

    fn position(&self, index: usize) -> BlockPos {
        let (w, l) = (self.width as usize, self.length as usize);
        let x = index % w;
        let z = (index / w) % l;
        let y = index / (w * l);
        BlockPos::new(x as i32, y as i32, z as i32)
    }
}

/// Immutable, decoded structure: dimensions plus a palette-indexed block grid.
///
/// Cells are stored densely, one palette index per cell, so every block the
/// model yields is inside `dimensions` by construction.
#[derive(Debug, Clone, PartialEq)]
pub struct StructureModel {
    dimensions: Dimensions,
    palette: Vec<BlockState>,
    cells: Vec<u32>,
    format_version: u8,
    data_version: Option<i32>,
    offset: BlockPos,
}

impl StructureModel {
    /// Build a model from a resolved palette and one palette index per cell
    pub fn new(
        dimensions: Dimensions,
        palette: Vec<BlockState>,
        cells: Vec<u32>,
    ) -> Result<Self, DecodeError> {
        let volume = dimensions.volume();
        if (cells.len() as u64) < volume {
            return Err(DecodeError::Truncated(format!(
                "expected {} cells, found {}",
                volume,
                cells.len()
            )));
        }
        if cells.len() as u64 > volume {
            return Err(DecodeError::Malformed(format!(
                "expected {} cells, found {}",
                volume,
                cells.len()
            )));
        }
        if let Some(bad) = cells.iter().find(|&&idx| idx as usize >= palette.len()) {
            return Err(DecodeError::Malformed(format!(
                "block data references palette index {} but the palette has {} entries",
                bad,
                palette.len()
            )));
        }

        Ok(Self {
            dimensions,
            palette,
            cells,
            format_version: 2,
            data_version: None,
            offset: BlockPos::ORIGIN,
        })
    }

    /// Attach format metadata read from the file header
    pub fn with_metadata(mut self, format_version: u8, data_version: Option<i32>, offset: BlockPos) -> Self {
        self.format_version = format_version;
        self.data_version = data_version;
        self.offset = offset;
        self
    }

    pub fn dimensions(&self) -> Dimensions {
        self.dimensions
    }

    pub fn palette(&self) -> &[BlockState] {
        &self.palette
    }

    pub fn format_version(&self) -> u8 {
        self.format_version
    }

    /// Game data version the schematic was exported with, if recorded
    pub fn data_version(&self) -> Option<i32> {
        self.data_version
    }

    /// Offset recorded by the exporting tool; informational only
    pub fn offset(&self) -> BlockPos {
        self.offset
    }

    /// Block at a local coordinate, or `None` outside the bounding box
    pub fn block_at(&self, pos: BlockPos) -> Option<BlockState> {
        if !self.dimensions.contains(pos) {
            return None;
        }
        let idx = self.cells[self.dimensions.index(pos)];
        Some(self.palette[idx as usize])
    }

    /// Every cell in storage order, air included
    pub fn blocks(&self) -> impl Iterator<Item = (BlockPos, BlockState)> + '_ {
        self.cells
            .iter()
            .enumerate()
            .map(|(i, &idx)| (self.dimensions.position(i), self.palette[idx as usize]))
    }

    /// Number of cells that are not air
    pub fn solid_count(&self) -> usize {
        self.cells
            .iter()
            .filter(|&&idx| !self.palette[idx as usize].is_air())
            .count()
    }

    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }
}
