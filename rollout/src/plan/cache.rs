//! Execution plan cache

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::debug;

use crate::config::store::ResolvedPair;
use crate::models::OsFamily;
use crate::plan::builder::ExecutionPlanBuilder;
use crate::plan::step::ExecutionPlan;

/// Cache key. The catalog generation keeps plans built from superseded
/// definitions from being served after a refresh.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PlanKey {
    pub generation: u64,
    pub installation_id: String,
    pub profile_id: String,
    pub os: OsFamily,
}

impl PlanKey {
    pub fn for_pair(pair: &ResolvedPair) -> Self {
        Self {
            generation: pair.generation,
            installation_id: pair.installation.id.clone(),
            profile_id: pair.profile.id.clone(),
            os: pair.installation.os,
        }
    }
}

/// Plan cache entry
#[derive(Debug, Clone)]
struct PlanCacheEntry {
    plan: Arc<ExecutionPlan>,
    inserted: u64,
}

/// In-memory plan cache
pub struct PlanCache {
    entries: RwLock<HashMap<PlanKey, PlanCacheEntry>>,
    builder: ExecutionPlanBuilder,
    capacity: usize,
    counter: AtomicU64,
}

impl PlanCache {
    /// Create a new plan cache
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            builder: ExecutionPlanBuilder::new(),
            capacity: capacity.max(1),
            counter: AtomicU64::new(0),
        }
    }

    /// Get a cached plan
    pub fn get(&self, key: &PlanKey) -> Option<Arc<ExecutionPlan>> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(key).map(|e| e.plan.clone())
    }

    /// Return the cached plan for `pair`, building it on a miss
    pub fn get_or_build(&self, pair: &ResolvedPair) -> Arc<ExecutionPlan> {
        let key = PlanKey::for_pair(pair);
        if let Some(plan) = self.get(&key) {
            return plan;
        }

        let plan = Arc::new(self.builder.build(&pair.installation, &pair.profile));

        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());

        // Another submission may have built the same plan meanwhile
        if let Some(existing) = entries.get(&key) {
            return existing.plan.clone();
        }

        // Evict oldest if at capacity
        if entries.len() >= self.capacity {
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, e)| e.inserted)
                .map(|(k, _)| k.clone())
            {
                entries.remove(&oldest);
            }
        }

        debug!(
            installation_id = %key.installation_id,
            profile_id = %key.profile_id,
            os = %key.os,
            steps = plan.len(),
            "Cached execution plan"
        );

        entries.insert(
            key,
            PlanCacheEntry {
                plan: plan.clone(),
                inserted: self.counter.fetch_add(1, Ordering::Relaxed),
            },
        );
        plan
    }

    /// Clear the cache
    pub fn clear(&self) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.clear();
    }

    /// Get cache size
    pub fn len(&self) -> usize {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
