//! Lifecycle of the schematic subsystem: configuration, warm preload,
//! startup pastes, reload and shutdown.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::block::{BlockPos, BlockRegistry};
use crate::cache::{CacheStatistics, HandleSource, LoadError, StructureCache, StructureHandle};
use crate::config::{ConfigError, SchematicsConfig, StructureSpec};
use crate::paste::{PasteEngine, PasteOptions, PasteResult, Rotation, SharedSink, WorldSink};
use crate::schematic::decode_file;

/// Folder under the data directory where schematic files are kept
pub const SCHEMATICS_DIR: &str = "schematics";

/// Orchestrator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Reloading,
    ShuttingDown,
    Shutdown,
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("schematic subsystem has been shut down")]
    ShutDown,

    #[error("schematics are disabled or not initialized")]
    Disabled,

    #[error("structure '{0}' is not configured")]
    UnknownStructure(String),

    #[error("structure '{0}' is disabled in configuration")]
    EntryDisabled(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Load(#[from] LoadError),
}

/// Caller-supplied changes to an entry's configured paste options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PasteOverrides {
    pub origin: Option<BlockPos>,
    pub rotation: Option<Rotation>,
    pub mirror: Option<bool>,
    pub paste_air: Option<bool>,
    pub run_async: Option<bool>,
}

impl PasteOverrides {
    pub fn apply(&self, base: PasteOptions) -> PasteOptions {
        PasteOptions {
            origin: self.origin.unwrap_or(base.origin),
            rotation: self.rotation.unwrap_or(base.rotation),
            mirror: self.mirror.unwrap_or(base.mirror),
            paste_air: self.paste_air.unwrap_or(base.paste_air),
            run_async: self.run_async.unwrap_or(base.run_async),
        }
    }
}

/// Outcome of one entry in a startup batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryReport {
    pub name: String,
    pub blocks_placed: u64,
    pub error: Option<String>,
}

/// Summary of `paste_startup_structures`
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    /// Attempted entries in the order they were pasted
    pub entries: Vec<EntryReport>,
    /// Entries disabled in configuration
    pub skipped: usize,
    pub total_blocks: u64,
    pub elapsed: Duration,
}

impl StartupReport {
    pub fn pasted(&self) -> usize {
        self.entries.iter().filter(|e| e.error.is_none()).count()
    }

    pub fn failed(&self) -> usize {
        self.entries.len() - self.pasted()
    }

    pub fn pasted_names(&self) -> Vec<&str> {
        self.entries
            .iter()
            .filter(|e| e.error.is_none())
            .map(|e| e.name.as_str())
            .collect()
    }
}

struct Active {
    config: SchematicsConfig,
    cache: Arc<StructureCache>,
}

/// Coordinates the schematic cache and paste engine for the lobby.
///
/// Lifecycle: `Uninitialized -> Initializing -> Ready (-> Reloading -> Ready)
/// -> ShuttingDown -> Shutdown`. Once shut down, every call except
/// `shutdown` fails with [`OrchestratorError::ShutDown`].
pub struct StructureOrchestrator {
    registry: Arc<dyn BlockRegistry>,
    data_dir: PathBuf,
    engine: PasteEngine,
    state: LifecycleState,
    active: Option<Active>,
    /// Background preloads; aborted on reload and shutdown
    background: JoinSet<()>,
}

impl StructureOrchestrator {
    pub fn new(registry: Arc<dyn BlockRegistry>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            data_dir: data_dir.into(),
            engine: PasteEngine::new(),
            state: LifecycleState::Uninitialized,
            active: None,
            background: JoinSet::new(),
        }
    }

    pub fn with_engine(mut self, engine: PasteEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// True once initialized with `enabled = true`
    pub fn is_enabled(&self) -> bool {
        self.active.is_some()
    }

    pub fn cache(&self) -> Option<&Arc<StructureCache>> {
        self.active.as_ref().map(|a| &a.cache)
    }

    pub fn stats(&self) -> Option<CacheStatistics> {
        self.cache().map(|c| c.stats())
    }

    fn ensure_running(&self) -> Result<(), OrchestratorError> {
        match self.state {
            LifecycleState::ShuttingDown | LifecycleState::Shutdown => Err(OrchestratorError::ShutDown),
            _ => Ok(()),
        }
    }

    /// Read configuration, build the cache and warm it.
    ///
    /// Only an invalid cache size fails this call; entries that are
    /// misconfigured or fail to decode are logged and skipped.
    ///
    /// Initializing again drops the previous cache and any preload still
    /// running, like [`StructureOrchestrator::reload`].
    pub async fn initialize(&mut self, config: SchematicsConfig) -> Result<(), OrchestratorError> {
        self.ensure_running()?;
        self.state = LifecycleState::Initializing;
        self.stop_background();
        self.start(config).await
    }

    async fn start(&mut self, config: SchematicsConfig) -> Result<(), OrchestratorError> {
        match self.build(config).await {
            Ok(()) => {
                self.state = LifecycleState::Ready;
                Ok(())
            }
            Err(err) => {
                error!("Failed to initialize schematic subsystem: {}", err);
                self.active = None;
                self.state = LifecycleState::Uninitialized;
                Err(err)
            }
        }
    }

    async fn build(&mut self, config: SchematicsConfig) -> Result<(), OrchestratorError> {
        if !config.enabled {
            info!("Schematics are disabled in configuration");
            self.active = None;
            return Ok(());
        }

        let max_size = config.effective_cache_size()?;
        info!("Initializing schematic service (cache size {})...", max_size);

        let folder = self.data_dir.join(SCHEMATICS_DIR);
        if let Err(err) = std::fs::create_dir_all(&folder) {
            error!("Failed to create schematics folder {}: {}", folder.display(), err);
        }
        let cache = Arc::new(StructureCache::new(max_size));

        let mut preload = Vec::new();
        for (enabled, spec) in config.entries() {
            match spec {
                Ok(spec) if enabled => preload.push(spec),
                Ok(spec) => debug!("Skipping disabled schematic: {}", spec.name),
                Err(err) => error!("Skipping schematic entry: {}", err),
            }
        }

        if config.async_operations {
            for spec in preload {
                let cache = cache.clone();
                let registry = self.registry.clone();
                let data_dir = self.data_dir.clone();
                self.background.spawn(async move {
                    preload_entry(&cache, registry, &data_dir, &spec).await;
                });
            }
            info!("Schematic preload started in background");
        } else {
            for spec in &preload {
                preload_entry(&cache, self.registry.clone(), &self.data_dir, spec).await;
            }
            info!("Schematics loaded - {} schematics cached", cache.len());
        }

        self.active = Some(Active { config, cache });
        Ok(())
    }

    /// Wait for background preloads to finish; returns how many completed
    pub async fn wait_for_preload(&mut self) -> usize {
        let mut completed = 0;
        while let Some(joined) = self.background.join_next().await {
            match joined {
                Ok(()) => completed += 1,
                Err(err) if err.is_cancelled() => debug!("Preload task cancelled"),
                Err(err) => error!("Preload task failed: {}", err),
            }
        }
        completed
    }

    /// Paste every enabled entry in declared order, one at a time.
    ///
    /// Each paste finishes (success or failure) before the next starts, so
    /// overlapping structures layer in configuration order. Failures are
    /// recorded in the report and never stop the batch.
    pub async fn paste_startup_structures<S>(
        &mut self,
        sink: SharedSink<S>,
    ) -> Result<StartupReport, OrchestratorError>
    where
        S: WorldSink + Send + 'static,
    {
        self.ensure_running()?;
        let Some(active) = &self.active else {
            debug!("Schematic service not available - skipping startup paste");
            return Ok(StartupReport::default());
        };
        if !active.config.paste_on_startup {
            debug!("Startup schematic pasting is disabled");
            return Ok(StartupReport::default());
        }

        info!("Pasting startup schematics...");
        let started = Instant::now();
        let mut report = StartupReport::default();

        for (enabled, spec) in active.config.entries() {
            let spec = match spec {
                Ok(spec) if !enabled => {
                    debug!("Skipping disabled schematic: {}", spec.name);
                    report.skipped += 1;
                    continue;
                }
                Ok(spec) => spec,
                Err(err) if !enabled => {
                    debug!("Skipping disabled schematic entry: {}", err);
                    report.skipped += 1;
                    continue;
                }
                Err(err) => {
                    error!("Failed to paste startup schematic: {}", err);
                    report.entries.push(EntryReport {
                        name: err_entry_name(&err),
                        blocks_placed: 0,
                        error: Some(err.to_string()),
                    });
                    continue;
                }
            };

            info!("Pasting startup schematic: {}", spec.name);
            let handle =
                match load_spec(&active.cache, self.registry.clone(), &self.data_dir, &spec).await {
                    Ok(handle) => handle,
                    Err(err) => {
                        error!("Failed to load startup schematic '{}': {}", spec.name, err);
                        report.entries.push(EntryReport {
                            name: spec.name,
                            blocks_placed: 0,
                            error: Some(err.to_string()),
                        });
                        continue;
                    }
                };

            let result = self.engine.paste_shared(handle, sink.clone(), spec.options).await;
            report.total_blocks += result.blocks_placed();
            match &result {
                PasteResult::Success { blocks_placed, elapsed, .. } => info!(
                    "Successfully pasted startup schematic '{}' - {} blocks in {}ms",
                    spec.name,
                    blocks_placed,
                    elapsed.as_millis()
                ),
                PasteResult::Failure { message, .. } => {
                    error!("Failed to paste startup schematic '{}': {}", spec.name, message)
                }
            }
            report.entries.push(EntryReport {
                name: spec.name,
                blocks_placed: result.blocks_placed(),
                error: result.error().map(str::to_string),
            });
        }

        report.elapsed = started.elapsed();
        if report.pasted() > 0 {
            info!(
                "Startup schematic pasting complete - {} schematics pasted, {} failed, {} total blocks in {}ms",
                report.pasted(),
                report.failed(),
                report.total_blocks,
                report.elapsed.as_millis()
            );
        } else {
            warn!("No startup schematics were pasted successfully");
        }
        Ok(report)
    }

    /// Load a configured structure through the cache
    pub async fn load(&self, name: &str) -> Result<Arc<StructureHandle>, OrchestratorError> {
        let (active, spec) = self.configured(name)?;
        Ok(load_spec(&active.cache, self.registry.clone(), &self.data_dir, &spec).await?)
    }

    /// Load a schematic file that is not part of the configuration
    pub async fn load_file(
        &self,
        name: &str,
        path: impl AsRef<Path>,
    ) -> Result<Arc<StructureHandle>, OrchestratorError> {
        self.ensure_running()?;
        let active = self.active.as_ref().ok_or(OrchestratorError::Disabled)?;
        let path = path.as_ref().to_path_buf();
        let registry = self.registry.clone();
        let source = HandleSource::File(path.clone());
        let handle = active
            .cache
            .load(name, source, move || decode_file(&path, &*registry))
            .await?;
        Ok(handle)
    }

    /// Paste a configured structure, optionally overriding its configured
    /// placement
    pub async fn paste_named<S>(
        &self,
        name: &str,
        sink: SharedSink<S>,
        overrides: PasteOverrides,
    ) -> Result<PasteResult, OrchestratorError>
    where
        S: WorldSink + Send + 'static,
    {
        let (active, spec) = self.configured(name)?;
        let handle = load_spec(&active.cache, self.registry.clone(), &self.data_dir, &spec).await?;
        let options = overrides.apply(spec.options);
        Ok(self.engine.paste_shared(handle, sink, options).await)
    }

    fn configured(&self, name: &str) -> Result<(&Active, StructureSpec), OrchestratorError> {
        self.ensure_running()?;
        let active = self.active.as_ref().ok_or(OrchestratorError::Disabled)?;
        let index = active
            .config
            .files
            .iter()
            .position(|e| e.name.as_deref() == Some(name))
            .ok_or_else(|| OrchestratorError::UnknownStructure(name.to_string()))?;
        let entry = &active.config.files[index];
        if !entry.enabled {
            return Err(OrchestratorError::EntryDisabled(name.to_string()));
        }
        let spec = entry.validate(index, active.config.async_operations)?;
        Ok((active, spec))
    }

    /// Drop the current cache and start over with `config`.
    ///
    /// Background preloads are aborted and loads still decoding are
    /// discarded rather than cached.
    pub async fn reload(&mut self, config: SchematicsConfig) -> Result<(), OrchestratorError> {
        self.ensure_running()?;
        info!("Reloading schematic manager...");
        self.state = LifecycleState::Reloading;
        self.stop_background();
        self.start(config).await?;
        info!("Schematic manager reloaded successfully");
        Ok(())
    }

    /// Abort background work and clear the cache. Safe to call repeatedly.
    ///
    /// Pastes already running on the blocking pool finish their writes; no
    /// new work starts afterwards.
    pub fn shutdown(&mut self) {
        if self.state == LifecycleState::Shutdown {
            return;
        }
        info!("Shutting down schematic manager...");
        self.state = LifecycleState::ShuttingDown;
        self.stop_background();
        self.state = LifecycleState::Shutdown;
        info!("Schematic manager shutdown complete");
    }

    fn stop_background(&mut self) {
        self.background.abort_all();
        // Detach the aborted tasks; they never touch the new cache
        self.background = JoinSet::new();
        if let Some(active) = self.active.take() {
            active.cache.clear();
        }
    }
}

/// Decode a configured entry through the cache
async fn load_spec(
    cache: &StructureCache,
    registry: Arc<dyn BlockRegistry>,
    data_dir: &Path,
    spec: &StructureSpec,
) -> Result<Arc<StructureHandle>, LoadError> {
    let path = spec.resolve_file(data_dir);
    cache
        .load(&spec.name, HandleSource::ConfigEntry, move || {
            debug!("Loading schematic from file: {}", path.display());
            decode_file(&path, &*registry)
        })
        .await
}

async fn preload_entry(
    cache: &StructureCache,
    registry: Arc<dyn BlockRegistry>,
    data_dir: &Path,
    spec: &StructureSpec,
) {
    match load_spec(cache, registry, data_dir, spec).await {
        Ok(handle) => {
            let dims = handle.model().dimensions();
            debug!(
                "Pre-loaded schematic: {} ({}x{}x{})",
                spec.name, dims.width, dims.height, dims.length
            );
        }
        Err(err) => error!("Failed to pre-load schematic '{}': {}", spec.name, err),
    }
}

fn err_entry_name(err: &ConfigError) -> String {
    match err {
        ConfigError::MissingName(index) => format!("#{}", index),
        ConfigError::MissingFile(name)
        | ConfigError::DuplicateName(name)
        | ConfigError::InvalidRotation { name, .. } => name.clone(),
        ConfigError::InvalidCacheSize(_) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockState, PaletteRegistry};
    use crate::config::StructureEntry;
    use crate::paste::{shared, SinkError};
    use crate::schematic::fixtures::SchematicFixture;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        writes: Vec<(BlockPos, BlockState)>,
        reject_above: Option<i32>,
    }

    impl WorldSink for RecordingSink {
        fn set_block(&mut self, pos: BlockPos, state: BlockState) -> Result<(), SinkError> {
            if self.reject_above.is_some_and(|max| pos.y > max) {
                return Err(SinkError::OutOfBounds(pos));
            }
            self.writes.push((pos, state));
            Ok(())
        }
    }

    struct Lobby {
        dir: TempDir,
        registry: Arc<PaletteRegistry>,
    }

    impl Lobby {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::create_dir_all(dir.path().join("schematics")).unwrap();
            Self { dir, registry: Arc::new(PaletteRegistry::new()) }
        }

        fn write(&self, file: &str, fixture: SchematicFixture) {
            std::fs::write(self.dir.path().join(file), fixture.to_bytes()).unwrap();
        }

        fn orchestrator(&self) -> StructureOrchestrator {
            StructureOrchestrator::new(self.registry.clone(), self.dir.path())
        }
    }

    fn entry(name: &str, file: &str, enabled: bool, origin: [i32; 3]) -> StructureEntry {
        StructureEntry {
            name: Some(name.to_string()),
            enabled,
            file: Some(PathBuf::from(file)),
            origin: Some(origin),
            ..Default::default()
        }
    }

    fn config(files: Vec<StructureEntry>) -> SchematicsConfig {
        SchematicsConfig {
            enabled: true,
            cache_max_size: 8,
            async_operations: false,
            paste_on_startup: true,
            files,
            ..Default::default()
        }
    }

    /// spawn (2x1x2 stone), parkour (disabled), arena (3x1x1 glass)
    fn three_entry_lobby() -> (Lobby, SchematicsConfig) {
        let lobby = Lobby::new();
        lobby.write("schematics/spawn.schem", SchematicFixture::filled(2, 1, 2, "minecraft:stone"));
        lobby.write("schematics/parkour.schem", SchematicFixture::filled(1, 1, 1, "minecraft:gold_block"));
        lobby.write("schematics/arena.schem", SchematicFixture::filled(3, 1, 1, "minecraft:glass"));
        let config = config(vec![
            entry("spawn", "schematics/spawn.schem", true, [0, 64, 0]),
            entry("parkour", "schematics/parkour.schem", false, [50, 64, 0]),
            entry("arena", "schematics/arena.schem", true, [100, 64, 0]),
        ]);
        (lobby, config)
    }

    #[tokio::test]
    async fn test_disabled_config_is_noop() {
        let lobby = Lobby::new();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(SchematicsConfig::default()).await.unwrap();

        assert_eq!(orchestrator.state(), LifecycleState::Ready);
        assert!(!orchestrator.is_enabled());
        assert!(orchestrator.stats().is_none());

        let sink = shared(RecordingSink::default());
        let report = orchestrator.paste_startup_structures(sink.clone()).await.unwrap();
        assert!(report.entries.is_empty());
        assert!(sink.lock().writes.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_preloads_enabled_entries() {
        let (lobby, config) = three_entry_lobby();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();

        let cache = orchestrator.cache().unwrap();
        assert!(cache.contains("spawn"));
        assert!(cache.contains("arena"));
        assert!(!cache.contains("parkour"));
        assert_eq!(orchestrator.stats().unwrap().load_count, 2);
    }

    #[tokio::test]
    async fn test_preload_failures_do_not_abort() {
        let lobby = Lobby::new();
        lobby.write("ok.schem", SchematicFixture::filled(1, 1, 1, "minecraft:stone"));
        lobby.write("zero.schem", SchematicFixture::new(0, 1, 1));
        let mut files = vec![
            entry("missing", "nope.schem", true, [0, 0, 0]),
            entry("zero", "zero.schem", true, [0, 0, 0]),
            entry("ok", "ok.schem", true, [0, 0, 0]),
        ];
        files.push(StructureEntry { name: Some("no_file".into()), ..Default::default() });

        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config(files)).await.unwrap();

        let cache = orchestrator.cache().unwrap();
        assert_eq!(cache.names(), vec!["ok".to_string()]);
        assert_eq!(orchestrator.state(), LifecycleState::Ready);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_background_preload() {
        let (lobby, mut config) = three_entry_lobby();
        config.async_operations = true;
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();

        assert_eq!(orchestrator.wait_for_preload().await, 2);
        assert_eq!(orchestrator.cache().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_startup_paste_skips_disabled_in_order() {
        let (lobby, config) = three_entry_lobby();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();

        let sink = shared(RecordingSink::default());
        let report = orchestrator.paste_startup_structures(sink.clone()).await.unwrap();

        assert_eq!(report.pasted_names(), vec!["spawn", "arena"]);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.failed(), 0);
        assert_eq!(report.total_blocks, 4 + 3);

        let writes = &sink.lock().writes;
        assert_eq!(writes.len(), 7);
        // spawn's blocks all land before arena's
        assert!(writes[..4].iter().all(|(p, _)| p.x < 50));
        assert!(writes[4..].iter().all(|(p, _)| p.x >= 100));
    }

    #[tokio::test]
    async fn test_startup_paste_continues_after_failure() {
        let lobby = Lobby::new();
        lobby.write("low.schem", SchematicFixture::filled(2, 1, 1, "minecraft:stone"));
        lobby.write("tall.schem", SchematicFixture::filled(1, 4, 1, "minecraft:stone"));
        let mut orchestrator = lobby.orchestrator();
        orchestrator
            .initialize(config(vec![
                entry("missing", "nope.schem", true, [0, 0, 0]),
                entry("tall", "tall.schem", true, [0, 0, 0]),
                entry("low", "low.schem", true, [10, 0, 0]),
            ]))
            .await
            .unwrap();

        let sink = shared(RecordingSink { reject_above: Some(1), ..Default::default() });
        let report = orchestrator.paste_startup_structures(sink.clone()).await.unwrap();

        assert_eq!(report.entries.len(), 3);
        assert!(report.entries[0].error.is_some());
        // tall placed two layers before the sink refused the third
        assert_eq!(report.entries[1].blocks_placed, 2);
        assert!(report.entries[1].error.is_some());
        assert_eq!(report.pasted_names(), vec!["low"]);
        assert_eq!(report.total_blocks, 4);
        assert_eq!(sink.lock().writes.len(), 4);
    }

    #[tokio::test]
    async fn test_startup_paste_disabled_flag() {
        let (lobby, mut config) = three_entry_lobby();
        config.paste_on_startup = false;
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();

        let sink = shared(RecordingSink::default());
        let report = orchestrator.paste_startup_structures(sink.clone()).await.unwrap();
        assert!(report.entries.is_empty());
        assert!(sink.lock().writes.is_empty());
    }

    #[tokio::test]
    async fn test_initialize_twice_drops_earlier_preloads() {
        let (lobby, mut config) = three_entry_lobby();
        config.async_operations = true;
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config.clone()).await.unwrap();

        config.files.truncate(1);
        orchestrator.initialize(config).await.unwrap();

        assert_eq!(orchestrator.wait_for_preload().await, 1);
        assert_eq!(orchestrator.cache().unwrap().names(), vec!["spawn".to_string()]);
        assert_eq!(orchestrator.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_initialize_creates_schematics_folder() {
        let dir = TempDir::new().unwrap();
        let data_dir = dir.path().join("lobby");
        let mut orchestrator = StructureOrchestrator::new(Arc::new(PaletteRegistry::new()), &data_dir);
        orchestrator.initialize(config(Vec::new())).await.unwrap();
        assert!(data_dir.join(SCHEMATICS_DIR).is_dir());

        // Disabled subsystems leave the data directory alone
        let other = dir.path().join("disabled");
        let mut orchestrator = StructureOrchestrator::new(Arc::new(PaletteRegistry::new()), &other);
        orchestrator.initialize(SchematicsConfig::default()).await.unwrap();
        assert!(!other.exists());
    }

    #[tokio::test]
    async fn test_negative_cache_size_is_fatal() {
        let (lobby, mut config) = three_entry_lobby();
        config.cache_max_size = -5;
        let mut orchestrator = lobby.orchestrator();

        let err = orchestrator.initialize(config).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Config(ConfigError::InvalidCacheSize(-5))));
        assert_eq!(orchestrator.state(), LifecycleState::Uninitialized);
        assert!(!orchestrator.is_enabled());
    }

    #[tokio::test]
    async fn test_paste_named_with_overrides() {
        let (lobby, config) = three_entry_lobby();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();

        let sink = shared(RecordingSink::default());
        let overrides = PasteOverrides {
            origin: Some(BlockPos::new(-10, 5, -10)),
            rotation: Some(Rotation::Clockwise90),
            ..Default::default()
        };
        let result = orchestrator.paste_named("arena", sink.clone(), overrides).await.unwrap();
        assert!(result.is_success());

        // 3x1x1 row along x becomes a row along z after a quarter turn
        let writes = sink.lock().writes.clone();
        assert!(writes.iter().all(|(p, _)| p.x == -10 && p.y == 5));
        let mut zs: Vec<i32> = writes.iter().map(|(p, _)| p.z).collect();
        zs.sort();
        assert_eq!(zs, vec![-10, -9, -8]);

        let missing = orchestrator.paste_named("nope", sink.clone(), PasteOverrides::default()).await;
        assert!(matches!(missing, Err(OrchestratorError::UnknownStructure(_))));
        let disabled = orchestrator.paste_named("parkour", sink, PasteOverrides::default()).await;
        assert!(matches!(disabled, Err(OrchestratorError::EntryDisabled(_))));
    }

    #[tokio::test]
    async fn test_load_file_outside_config() {
        let (lobby, config) = three_entry_lobby();
        lobby.write("extra.schem", SchematicFixture::filled(2, 2, 2, "minecraft:dirt"));
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();

        let path = lobby.dir.path().join("extra.schem");
        let handle = orchestrator.load_file("extra", &path).await.unwrap();
        assert_eq!(handle.source(), &HandleSource::File(path));
        assert_eq!(handle.model().solid_count(), 8);
        assert!(orchestrator.load("spawn").await.is_ok());
    }

    #[tokio::test]
    async fn test_reload_swaps_cache() {
        let (lobby, config) = three_entry_lobby();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config.clone()).await.unwrap();
        let old_cache = orchestrator.cache().unwrap().clone();

        let mut next = config;
        next.files.truncate(1);
        orchestrator.reload(next).await.unwrap();

        assert_eq!(orchestrator.state(), LifecycleState::Ready);
        assert!(old_cache.is_empty());
        assert_eq!(orchestrator.cache().unwrap().names(), vec!["spawn".to_string()]);
        assert_eq!(orchestrator.stats().unwrap().load_count, 1);
    }

    #[tokio::test]
    async fn test_reload_can_disable() {
        let (lobby, config) = three_entry_lobby();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config).await.unwrap();
        orchestrator.reload(SchematicsConfig::default()).await.unwrap();
        assert!(!orchestrator.is_enabled());
        assert_eq!(orchestrator.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_shutdown_is_terminal_and_idempotent() {
        let (lobby, config) = three_entry_lobby();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.initialize(config.clone()).await.unwrap();
        let cache = orchestrator.cache().unwrap().clone();

        orchestrator.shutdown();
        orchestrator.shutdown();
        assert_eq!(orchestrator.state(), LifecycleState::Shutdown);
        assert!(cache.is_empty());
        assert!(orchestrator.stats().is_none());

        let sink = shared(RecordingSink::default());
        assert!(matches!(
            orchestrator.paste_startup_structures(sink.clone()).await,
            Err(OrchestratorError::ShutDown)
        ));
        assert!(matches!(
            orchestrator.paste_named("spawn", sink, PasteOverrides::default()).await,
            Err(OrchestratorError::ShutDown)
        ));
        assert!(matches!(orchestrator.initialize(config.clone()).await, Err(OrchestratorError::ShutDown)));
        assert!(matches!(orchestrator.reload(config).await, Err(OrchestratorError::ShutDown)));
    }

    #[test]
    fn test_shutdown_before_initialize() {
        let lobby = Lobby::new();
        let mut orchestrator = lobby.orchestrator();
        orchestrator.shutdown();
        assert_eq!(orchestrator.state(), LifecycleState::Shutdown);

        let sink = shared(RecordingSink::default());
        tokio_test::assert_err!(tokio_test::block_on(orchestrator.paste_startup_structures(sink)));
    }

    #[test]
    fn test_overrides_apply() {
        let base = PasteOptions::default();
        let merged = PasteOverrides { mirror: Some(true), ..Default::default() }.apply(base);
        assert!(merged.mirror);
        assert_eq!(merged.origin, base.origin);
        assert_eq!(PasteOverrides::default().apply(base), base);
    }
}
