//! Structure assets for the lobby: decode Sponge schematics, keep them in
//! a bounded LRU cache and paste them into the world at startup or on
//! demand.

pub mod block;
pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod paste;
pub mod schematic;
pub mod telemetry;

pub use block::{BlockPos, BlockRegistry, BlockState, PaletteRegistry};
pub use cache::{CacheStatistics, HandleSource, LoadError, StructureCache, StructureHandle};
pub use config::{ConfigError, SchematicsConfig, StructureEntry, StructureSpec};
pub use orchestrator::{
    LifecycleState, OrchestratorError, PasteOverrides, StartupReport, StructureOrchestrator,
    SCHEMATICS_DIR,
};
pub use paste::{PasteEngine, PasteOptions, PasteResult, Rotation, SharedSink, SinkError, WorldSink};
pub use schematic::{DecodeError, Dimensions, StructureModel};
