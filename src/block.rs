//! Block positions, block states and the registry that resolves on-disk
//! identifiers into runtime states.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Add;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Integer block coordinate, either local to a structure or in world space
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const ORIGIN: BlockPos = BlockPos { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    /// Component-wise sum, `None` if any axis leaves the `i32` range
    pub fn checked_add(self, rhs: BlockPos) -> Option<BlockPos> {
        Some(BlockPos::new(
            self.x.checked_add(rhs.x)?,
            self.y.checked_add(rhs.y)?,
            self.z.checked_add(rhs.z)?,
        ))
    }
}

impl Add for BlockPos {
    type Output = BlockPos;

    fn add(self, rhs: BlockPos) -> BlockPos {
        BlockPos::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl From<[i32; 3]> for BlockPos {
    fn from([x, y, z]: [i32; 3]) -> Self {
        BlockPos::new(x, y, z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Runtime block state as handed out by a [`BlockRegistry`].
///
/// The id is opaque to this crate; only the air flag carries meaning here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockState {
    id: u32,
    air: bool,
}

impl BlockState {
    /// A placeable (non-air) state
    pub const fn solid(id: u32) -> Self {
        Self { id, air: false }
    }

    /// An air state, skipped by pastes that do not paste air
    pub const fn air(id: u32) -> Self {
        Self { id, air: true }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn is_air(&self) -> bool {
        self.air
    }
}

/// Resolves on-disk block identifiers (`minecraft:oak_log[axis=y]`) to
/// runtime block states.
pub trait BlockRegistry: Send + Sync {
    /// Returns `None` when the identifier is unknown to the registry
    fn resolve(&self, identifier: &str) -> Option<BlockState>;
}

impl<R: BlockRegistry + ?Sized> BlockRegistry for std::sync::Arc<R> {
    fn resolve(&self, identifier: &str) -> Option<BlockState> {
        (**self).resolve(identifier)
    }
}

const DEFAULT_NAMESPACE: &str = "minecraft";
const AIR_BLOCKS: [&str; 3] = ["minecraft:air", "minecraft:cave_air", "minecraft:void_air"];

/// In-memory registry that interns identifiers as they are first seen.
///
/// Identifiers are normalised to `namespace:path[properties]` with the
/// `minecraft` namespace filled in when omitted. In strict mode only
/// identifiers registered up front resolve.
pub struct PaletteRegistry {
    states: RwLock<HashMap<String, BlockState>>,
    next_id: AtomicU32,
    strict: bool,
}

impl PaletteRegistry {
    /// Permissive registry: any well-formed identifier resolves
    pub fn new() -> Self {
        let registry = Self {
            states: RwLock::new(HashMap::new()),
            next_id: AtomicU32::new(0),
            strict: false,
        };
        for air in AIR_BLOCKS {
            registry.intern(air.to_string());
        }
        registry
    }

    /// Strict registry that only resolves the given identifiers (plus air)
    pub fn strict<'a>(known: impl IntoIterator<Item = &'a str>) -> Self {
        let mut registry = Self::new();
        registry.strict = true;
        for identifier in known {
            if let Some(normalized) = normalize(identifier) {
                registry.intern(normalized);
            }
        }
        registry
    }

    /// Number of distinct states interned so far
    pub fn len(&self) -> usize {
        self.states.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn intern(&self, normalized: String) -> BlockState {
        let mut states = self.states.write();
        if let Some(state) = states.get(&normalized) {
            return *state;
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let state = if AIR_BLOCKS.contains(&base_name(&normalized)) {
            BlockState::air(id)
        } else {
            BlockState::solid(id)
        };
        states.insert(normalized, state);
        state
    }
}

impl Default for PaletteRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockRegistry for PaletteRegistry {
    fn resolve(&self, identifier: &str) -> Option<BlockState> {
        let normalized = normalize(identifier)?;
        if let Some(state) = self.states.read().get(&normalized) {
            return Some(*state);
        }
        if self.strict {
            return None;
        }
        Some(self.intern(normalized))
    }
}

/// Identifier without its `[properties]` suffix
fn base_name(identifier: &str) -> &str {
    identifier.split('[').next().unwrap_or(identifier)
}

/// Normalise an identifier, rejecting malformed ones
fn normalize(identifier: &str) -> Option<String> {
    let identifier = identifier.trim();
    let (base, properties) = match identifier.find('[') {
        Some(idx) => {
            let props = &identifier[idx..];
            if !props.ends_with(']') {
                return None;
            }
            (&identifier[..idx], props)
        }
        None => (identifier, ""),
    };

    let (namespace, path) = match base.split_once(':') {
        Some((ns, path)) => (ns, path),
        None => (DEFAULT_NAMESPACE, base),
    };

    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || "_-./".contains(c))
    };
    if !valid(namespace) || !valid(path) {
        return None;
    }

    // Property order varies between exporters; sort so equal states intern once
    let properties = if properties.is_empty() {
        String::new()
    } else {
        let inner = &properties[1..properties.len() - 1];
        let mut pairs: Vec<&str> = inner.split(',').map(str::trim).filter(|p| !p.is_empty()).collect();
        if pairs.iter().any(|p| !p.contains('=')) {
            return None;
        }
        let unique: HashSet<&str> = pairs.iter().map(|p| p.split('=').next().unwrap_or(p)).collect();
        if unique.len() != pairs.len() {
            return None;
        }
        pairs.sort_unstable();
        format!("[{}]", pairs.join(","))
    };

    Some(format!("{namespace}:{path}{properties}"))
}
