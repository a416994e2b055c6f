//! Pasting decoded structures into a world.
//!
//! A paste streams one `set_block` call per placed cell into a [`WorldSink`].
//! Pastes are best effort: when the sink rejects a write the paste stops and
//! reports failure, but blocks already written stay in the world.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{error, info, info_span};
use uuid::Uuid;

use crate::block::{BlockPos, BlockState};
use crate::cache::StructureHandle;
use crate::schematic::{Dimensions, StructureModel};

/// Default origin when none is configured, matching a flat lobby floor
pub const DEFAULT_ORIGIN: BlockPos = BlockPos::new(0, 64, 0);

/// Number of writes issued per sink lock when pasting into a shared sink
pub const DEFAULT_BATCH_SIZE: usize = 4096;

/// Write target for pasted blocks
pub trait WorldSink {
    fn set_block(&mut self, pos: BlockPos, state: BlockState) -> Result<(), SinkError>;
}

impl<S: WorldSink + ?Sized> WorldSink for &mut S {
    fn set_block(&mut self, pos: BlockPos, state: BlockState) -> Result<(), SinkError> {
        (**self).set_block(pos, state)
    }
}

impl<S: WorldSink + ?Sized> WorldSink for Box<S> {
    fn set_block(&mut self, pos: BlockPos, state: BlockState) -> Result<(), SinkError> {
        (**self).set_block(pos, state)
    }
}

/// A sink shared between tasks; every write goes through its mutex
pub type SharedSink<S> = Arc<Mutex<S>>;

/// Wrap a sink so it can be handed to concurrent pastes
pub fn shared<S: WorldSink>(sink: S) -> SharedSink<S> {
    Arc::new(Mutex::new(sink))
}

/// Reasons a sink refuses a write
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    #[error("position {0} is outside the world")]
    OutOfBounds(BlockPos),

    #[error("write at {pos} rejected: {reason}")]
    Rejected { pos: BlockPos, reason: String },
}

/// Clockwise rotation around the vertical axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    None,
    Clockwise90,
    Clockwise180,
    Clockwise270,
}

impl Rotation {
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::None),
            90 => Some(Rotation::Clockwise90),
            180 => Some(Rotation::Clockwise180),
            270 => Some(Rotation::Clockwise270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> i32 {
        match self {
            Rotation::None => 0,
            Rotation::Clockwise90 => 90,
            Rotation::Clockwise180 => 180,
            Rotation::Clockwise270 => 270,
        }
    }
}

/// Per-call paste settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasteOptions {
    pub origin: BlockPos,
    pub rotation: Rotation,
    pub mirror: bool,
    pub paste_air: bool,
    /// Run the paste on the blocking pool instead of the calling task
    #[serde(rename = "async")]
    pub run_async: bool,
}

impl Default for PasteOptions {
    fn default() -> Self {
        Self {
            origin: DEFAULT_ORIGIN,
            rotation: Rotation::None,
            mirror: false,
            paste_air: false,
            run_async: true,
        }
    }
}

impl PasteOptions {
    pub fn at(origin: BlockPos) -> Self {
        Self { origin, ..Self::default() }
    }
}

/// Outcome of one paste call
#[derive(Debug, Clone)]
pub enum PasteResult {
    Success {
        blocks_placed: u64,
        elapsed: Duration,
        handle: Arc<StructureHandle>,
    },
    /// Blocks placed before the failure remain in the world
    Failure { message: String, blocks_placed: u64 },
}

impl PasteResult {
    pub fn is_success(&self) -> bool {
        matches!(self, PasteResult::Success { .. })
    }

    pub fn blocks_placed(&self) -> u64 {
        match self {
            PasteResult::Success { blocks_placed, .. } | PasteResult::Failure { blocks_placed, .. } => {
                *blocks_placed
            }
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            PasteResult::Success { .. } => None,
            PasteResult::Failure { message, .. } => Some(message),
        }
    }
}

/// Maps local structure coordinates to their transformed local position.
///
/// Mirroring flips the x axis, then the footprint is rotated clockwise. Both
/// steps keep the result inside `[0, rotated dimensions)`, so the origin
/// always marks the minimum corner of the pasted box.
#[derive(Debug, Clone, Copy)]
pub struct Transform {
    dimensions: Dimensions,
    rotation: Rotation,
    mirror: bool,
}

impl Transform {
    pub fn new(dimensions: Dimensions, rotation: Rotation, mirror: bool) -> Self {
        Self { dimensions, rotation, mirror }
    }

    pub fn is_identity(&self) -> bool {
        self.rotation == Rotation::None && !self.mirror
    }

    pub fn apply(&self, pos: BlockPos) -> BlockPos {
        let w = self.dimensions.width as i32;
        let l = self.dimensions.length as i32;
        let x = if self.mirror { w - 1 - pos.x } else { pos.x };
        let z = pos.z;
        let (x, z) = match self.rotation {
            Rotation::None => (x, z),
            Rotation::Clockwise90 => (l - 1 - z, x),
            Rotation::Clockwise180 => (w - 1 - x, l - 1 - z),
            Rotation::Clockwise270 => (z, w - 1 - x),
        };
        BlockPos::new(x, pos.y, z)
    }

    /// Minimum and maximum world corners of the pasted box at `origin`,
    /// `None` if the far corner overflows
    pub fn world_bounds(&self, origin: BlockPos) -> Option<(BlockPos, BlockPos)> {
        let d = self.output_dimensions();
        let far = BlockPos::new(d.width as i32 - 1, d.height as i32 - 1, d.length as i32 - 1);
        origin.checked_add(far).map(|corner| (origin, corner))
    }

    /// Bounding box after rotation (width and length swap on quarter turns)
    pub fn output_dimensions(&self) -> Dimensions {
        let d = self.dimensions;
        match self.rotation {
            Rotation::Clockwise90 | Rotation::Clockwise270 => Dimensions {
                width: d.length,
                height: d.height,
                length: d.width,
            },
            Rotation::None | Rotation::Clockwise180 => d,
        }
    }
}

/// World-space writes a paste would issue, in order.
///
/// `None` when the transformed box placed at `options.origin` does not fit
/// in `i32` coordinates.
pub fn placements(
    model: &StructureModel,
    options: PasteOptions,
) -> Option<impl Iterator<Item = (BlockPos, BlockState)> + '_> {
    let transform = Transform::new(model.dimensions(), options.rotation, options.mirror);
    let origin = options.origin;
    let paste_air = options.paste_air;
    // Every local position lies between zero and the far corner
    transform.world_bounds(origin)?;
    Some(
        model
            .blocks()
            .filter(move |(_, state)| paste_air || !state.is_air())
            .map(move |(pos, state)| (origin + transform.apply(pos), state)),
    )
}

/// Applies structure handles to world sinks
#[derive(Debug, Clone, Copy)]
pub struct PasteEngine {
    batch_size: usize,
}

impl Default for PasteEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PasteEngine {
    pub fn new() -> Self {
        Self { batch_size: DEFAULT_BATCH_SIZE }
    }

    /// Writes per sink lock for [`PasteEngine::paste_shared`]; at least one
    pub fn with_batch_size(batch_size: usize) -> Self {
        Self { batch_size: batch_size.max(1) }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Paste on the calling thread into an exclusively borrowed sink.
    ///
    /// Always synchronous: `options.run_async` only applies to
    /// [`PasteEngine::paste_shared`].
    pub fn paste<S: WorldSink + ?Sized>(
        &self,
        handle: &Arc<StructureHandle>,
        sink: &mut S,
        options: &PasteOptions,
    ) -> PasteResult {
        self.drive(handle, options, |batch| write_batch(&mut *sink, batch))
    }

    /// Paste into a sink shared with other tasks.
    ///
    /// With `options.run_async` the paste runs on the blocking pool and the
    /// caller only awaits the result; otherwise it runs inline. Either way
    /// the sink is locked once per batch, so concurrent pastes interleave
    /// between batches but never call the sink at the same time. A paste that
    /// has started always runs to the end of its placements.
    pub async fn paste_shared<S>(
        &self,
        handle: Arc<StructureHandle>,
        sink: SharedSink<S>,
        options: PasteOptions,
    ) -> PasteResult
    where
        S: WorldSink + Send + 'static,
    {
        if !options.run_async {
            return self.paste_locked(&handle, &sink, &options);
        }

        let engine = *self;
        let name = handle.name().to_string();
        match tokio::task::spawn_blocking(move || engine.paste_locked(&handle, &sink, &options)).await {
            Ok(result) => result,
            Err(err) => {
                error!("Paste task for '{}' did not complete: {}", name, err);
                PasteResult::Failure {
                    message: format!("paste of '{}' did not complete: {}", name, err),
                    blocks_placed: 0,
                }
            }
        }
    }

    fn paste_locked<S: WorldSink>(
        &self,
        handle: &Arc<StructureHandle>,
        sink: &SharedSink<S>,
        options: &PasteOptions,
    ) -> PasteResult {
        self.drive(handle, options, |batch| write_batch(&mut *sink.lock(), batch))
    }

    fn drive<W>(&self, handle: &Arc<StructureHandle>, options: &PasteOptions, mut write: W) -> PasteResult
    where
        W: FnMut(&[(BlockPos, BlockState)]) -> Result<usize, (usize, SinkError)>,
    {
        let span = info_span!("paste", structure = handle.name(), operation = %Uuid::new_v4());
        let _enter = span.enter();
        info!(
            "Pasting structure '{}' at {} (rotation {}, mirror {}, air {})",
            handle.name(),
            options.origin,
            options.rotation.degrees(),
            options.mirror,
            options.paste_air
        );

        let started = Instant::now();
        let mut placed: u64 = 0;
        let Some(mut pending) = placements(handle.model(), *options) else {
            error!(
                "Structure '{}' does not fit the coordinate range at {}",
                handle.name(),
                options.origin
            );
            return PasteResult::Failure {
                message: format!("'{}' extends past the coordinate range at {}", handle.name(), options.origin),
                blocks_placed: 0,
            };
        };
        let mut batch = Vec::with_capacity(self.batch_size.min(handle.model().cell_count()));

        loop {
            batch.clear();
            batch.extend(pending.by_ref().take(self.batch_size));
            if batch.is_empty() {
                break;
            }
            match write(&batch) {
                Ok(written) => placed += written as u64,
                Err((written, err)) => {
                    placed += written as u64;
                    error!(
                        "Failed to paste structure '{}' after {} blocks: {}",
                        handle.name(),
                        placed,
                        err
                    );
                    return PasteResult::Failure {
                        message: format!("failed to paste '{}': {}", handle.name(), err),
                        blocks_placed: placed,
                    };
                }
            }
        }

        let elapsed = started.elapsed();
        info!(
            "Pasted structure '{}' - {} blocks placed in {}ms",
            handle.name(),
            placed,
            elapsed.as_millis()
        );
        PasteResult::Success {
            blocks_placed: placed,
            elapsed,
            handle: handle.clone(),
        }
    }
}

/// Write a batch, reporting how many writes landed before any failure
fn write_batch<S: WorldSink + ?Sized>(
    sink: &mut S,
    batch: &[(BlockPos, BlockState)],
) -> Result<usize, (usize, SinkError)> {
    for (written, &(pos, state)) in batch.iter().enumerate() {
        sink.set_block(pos, state).map_err(|err| (written, err))?;
    }
    Ok(batch.len())
}
