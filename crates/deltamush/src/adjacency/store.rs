//! Cross-session adjacency caches keyed by mesh identity.
//!
//! Building the graph is the most expensive step of the whole system, so a
//! host engine persists it between sessions. The core only sees the
//! [`AdjacencyStore`] trait; the two stores here cover tests/tools (memory)
//! and editor-style caching (one JSON file per mesh).

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use deltamush_config::AdjacencySettings;
use glam::Vec3;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AdjacencyGraph, build_adjacency};
use crate::error::{DeltaMushError, Result};

/// Key-value store for built adjacency graphs.
pub trait AdjacencyStore {
    /// Fetch the cached graph for a mesh, if any.
    ///
    /// Unreadable entries are reported as a miss.
    fn load(&self, mesh_id: &str) -> Option<AdjacencyGraph>;

    /// Cache a graph for a mesh, replacing any previous entry.
    fn store(&self, mesh_id: &str, graph: &AdjacencyGraph) -> Result<()>;
}

/// Flattened on-disk form: `w` rows of `h` slots.
#[derive(Debug, Serialize, Deserialize)]
struct AdjacencyRecord {
    w: usize,
    h: usize,
    storage: Vec<i32>,
}

impl AdjacencyRecord {
    fn from_graph(graph: &AdjacencyGraph) -> Self {
        Self {
            w: graph.vertex_count(),
            h: graph.max_neighbors(),
            storage: graph.slots().to_vec(),
        }
    }

    fn into_graph(self) -> Result<AdjacencyGraph> {
        AdjacencyGraph::from_raw(self.w, self.h, self.storage)
    }
}

/// In-process store. Uses interior mutability so it can be shared.
#[derive(Debug, Default)]
pub struct MemoryAdjacencyStore {
    graphs: RwLock<HashMap<String, AdjacencyGraph>>,
}

impl MemoryAdjacencyStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached meshes.
    pub fn len(&self) -> usize {
        self.graphs
            .read()
            .expect("MemoryAdjacencyStore lock poisoned")
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AdjacencyStore for MemoryAdjacencyStore {
    fn load(&self, mesh_id: &str) -> Option<AdjacencyGraph> {
        let graphs = self
            .graphs
            .read()
            .expect("MemoryAdjacencyStore lock poisoned");
        graphs.get(mesh_id).cloned()
    }

    fn store(&self, mesh_id: &str, graph: &AdjacencyGraph) -> Result<()> {
        let mut graphs = self
            .graphs
            .write()
            .expect("MemoryAdjacencyStore lock poisoned");
        graphs.insert(mesh_id.to_string(), graph.clone());
        Ok(())
    }
}

/// One `<mesh_id>.adj` JSON file per mesh inside a directory.
#[derive(Debug, Clone)]
pub struct JsonFileAdjacencyStore {
    dir: PathBuf,
}

impl JsonFileAdjacencyStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File backing a mesh entry.
    pub fn path_for(&self, mesh_id: &str) -> PathBuf {
        self.dir.join(format!("{mesh_id}.adj"))
    }
}

impl AdjacencyStore for JsonFileAdjacencyStore {
    fn load(&self, mesh_id: &str) -> Option<AdjacencyGraph> {
        let path = self.path_for(mesh_id);
        let json = match fs::read_to_string(&path) {
            Ok(json) => json,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("adjacency cache {}: read failed: {}", path.display(), e);
                return None;
            }
        };

        let graph = serde_json::from_str::<AdjacencyRecord>(&json)
            .map_err(DeltaMushError::from)
            .and_then(AdjacencyRecord::into_graph);
        match graph {
            Ok(graph) => Some(graph),
            Err(e) => {
                warn!("adjacency cache {}: ignoring corrupt entry: {}", path.display(), e);
                None
            }
        }
    }

    fn store(&self, mesh_id: &str, graph: &AdjacencyGraph) -> Result<()> {
        fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string(&AdjacencyRecord::from_graph(graph))?;
        fs::write(self.path_for(mesh_id), json)?;
        Ok(())
    }
}

/// Fetch a graph from the store, building and caching it on a miss.
///
/// A cached graph is only used when it has one row per vertex and the
/// requested row width; anything else is rebuilt and overwritten.
pub fn load_or_build(
    store: &dyn AdjacencyStore,
    mesh_id: &str,
    positions: &[Vec3],
    triangles: &[[u32; 3]],
    settings: &AdjacencySettings,
) -> Result<AdjacencyGraph> {
    if let Some(graph) = store.load(mesh_id) {
        if graph.vertex_count() == positions.len()
            && graph.max_neighbors() == settings.max_neighbors
        {
            debug!("load_or_build: cache hit for {}", mesh_id);
            return Ok(graph);
        }
        warn!(
            "load_or_build: cached graph for {} is {}x{}, mesh needs {}x{}; rebuilding",
            mesh_id,
            graph.vertex_count(),
            graph.max_neighbors(),
            positions.len(),
            settings.max_neighbors
        );
    } else {
        debug!("load_or_build: cache miss for {}", mesh_id);
    }

    let graph = build_adjacency(positions, triangles, settings)?;
    store.store(mesh_id, &graph)?;
    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_meshes;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0);
        std::env::temp_dir().join(format!(
            "deltamush-{}-{}-{}",
            name,
            std::process::id(),
            nanos
        ))
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let (positions, triangles) = test_meshes::tetrahedron();
        let store = MemoryAdjacencyStore::new();
        assert!(store.load("tetra").is_none());

        let built = load_or_build(
            &store,
            "tetra",
            &positions,
            &triangles,
            &AdjacencySettings::default(),
        )
        .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.load("tetra"), Some(built));
    }

    #[test]
    fn test_file_store_roundtrip() {
        let dir = scratch_dir("roundtrip");
        let store = JsonFileAdjacencyStore::new(&dir);
        let (positions, triangles) = test_meshes::tetrahedron();
        let graph = build_adjacency(&positions, &triangles, &AdjacencySettings::default()).unwrap();

        store.store("tetra", &graph).unwrap();
        let loaded = store.load("tetra").unwrap();
        assert_eq!(loaded.slots(), graph.slots());
        assert_eq!(loaded.vertex_count(), 4);
        assert_eq!(loaded.max_neighbors(), 16);

        let json = fs::read_to_string(store.path_for("tetra")).unwrap();
        assert!(json.contains("\"w\":4"));
        assert!(json.contains("\"h\":16"));

        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_store_corrupt_entry_is_a_miss() {
        let dir = scratch_dir("corrupt");
        let store = JsonFileAdjacencyStore::new(&dir);
        fs::create_dir_all(&dir).unwrap();
        fs::write(store.path_for("broken"), "{ \"w\": 2, \"h\": 2, \"storage\": [0] }").unwrap();
        assert!(store.load("broken").is_none());
        assert!(store.load("missing").is_none());
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_mismatched_cache_is_rebuilt() {
        let (positions, triangles) = test_meshes::tetrahedron();
        let store = MemoryAdjacencyStore::new();
        let narrow = AdjacencyGraph::from_raw(4, 2, vec![-1; 8]).unwrap();
        store.store("tetra", &narrow).unwrap();

        let graph = load_or_build(
            &store,
            "tetra",
            &positions,
            &triangles,
            &AdjacencySettings::default(),
        )
        .unwrap();
        assert_eq!(graph.max_neighbors(), 16);
        assert_eq!(graph.valence(0), 3);
        assert_eq!(store.load("tetra").unwrap().max_neighbors(), 16);
    }
}
