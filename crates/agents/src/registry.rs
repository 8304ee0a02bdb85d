//! The agent registry — loads a descriptor directory, serves lookups,
//! reloads atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;

use orch_domain::{Error, Result};

use crate::descriptor::{AgentDescriptor, CostTier};

/// Lookup filter for `list`.
#[derive(Debug, Clone, Default)]
pub struct AgentFilter {
    pub capability_tag: Option<String>,
    pub cost_tier: Option<CostTier>,
}

#[derive(Debug)]
struct Snapshot {
    agents: HashMap<String, Arc<AgentDescriptor>>,
    /// Ids in load order (stable listing).
    order: Vec<String>,
}

#[derive(Debug)]
pub struct AgentRegistry {
    dir: PathBuf,
    snapshot: RwLock<Arc<Snapshot>>,
}

impl AgentRegistry {
    /// Load every descriptor in `dir`. Name collisions and parse errors
    /// fail the load; nothing partial is served.
    pub fn load(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let snapshot = Self::read_dir(&dir)?;
        tracing::info!(dir = %dir.display(), agents = snapshot.order.len(), "agent registry loaded");
        Ok(Self {
            dir,
            snapshot: RwLock::new(Arc::new(snapshot)),
        })
    }

    fn read_dir(dir: &Path) -> Result<Snapshot> {
        let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(|e| Error::Config(format!("agents dir {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        entries.sort();

        let mut agents = HashMap::new();
        let mut order = Vec::new();
        for path in entries {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let raw = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("{name}: {e}")))?;
            let descriptor = AgentDescriptor::parse(&name, &raw)?;
            if agents.contains_key(&descriptor.id) {
                return Err(Error::Config(format!("duplicate agent id {} ({name})", descriptor.id)));
            }
            order.push(descriptor.id.clone());
            agents.insert(descriptor.id.clone(), Arc::new(descriptor));
        }

        if agents.is_empty() {
            return Err(Error::Config(format!("agents dir {} holds no descriptors", dir.display())));
        }
        Ok(Snapshot { agents, order })
    }

    /// Re-read the directory. The old snapshot keeps serving until the new
    /// one validates completely.
    pub fn reload(&self) -> Result<usize> {
        let fresh = Self::read_dir(&self.dir)?;
        let count = fresh.order.len();
        *self.snapshot.write() = Arc::new(fresh);
        tracing::info!(agents = count, "agent registry reloaded");
        Ok(count)
    }

    pub fn get(&self, id: &str) -> Option<Arc<AgentDescriptor>> {
        self.snapshot.read().agents.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.snapshot.read().agents.contains_key(id)
    }

    pub fn list(&self, filter: &AgentFilter) -> Vec<Arc<AgentDescriptor>> {
        let snap = self.snapshot.read().clone();
        snap.order
            .iter()
            .filter_map(|id| snap.agents.get(id))
            .filter(|a| {
                filter
                    .capability_tag
                    .as_deref()
                    .map_or(true, |tag| a.has_tag(tag))
                    && filter.cost_tier.map_or(true, |t| a.cost_tier == t)
            })
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
