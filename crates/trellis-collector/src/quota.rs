use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;

use trellis_tree::ObjectTree;
use trellis_types::SIndex;

use crate::error::CollectorResult;

/// Storage quota contract consulted by the collector.
pub trait QuotaCheck: Send + Sync {
    fn is_over_quota(&self, sidx: SIndex) -> bool;
}

/// Unlimited storage.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoQuota;

impl QuotaCheck for NoQuota {
    fn is_over_quota(&self, _sidx: SIndex) -> bool {
        false
    }
}

/// The same byte limit for every store.
///
/// Usage is tracked per store and updated by whoever writes content.
#[derive(Debug)]
pub struct FixedQuota {
    limit: u64,
    usage: RwLock<HashMap<SIndex, u64>>,
}

impl FixedQuota {
    pub fn new(limit: u64) -> Self {
        Self {
            limit,
            usage: RwLock::new(HashMap::new()),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    pub fn usage(&self, sidx: SIndex) -> u64 {
        self.usage
            .read()
            .expect("lock poisoned")
            .get(&sidx)
            .copied()
            .unwrap_or(0)
    }

    pub fn set_usage(&self, sidx: SIndex, bytes: u64) {
        self.usage.write().expect("lock poisoned").insert(sidx, bytes);
    }

    pub fn add_usage(&self, sidx: SIndex, bytes: u64) {
        let mut usage = self.usage.write().expect("lock poisoned");
        let used = usage.entry(sidx).or_insert(0);
        *used = used.saturating_add(bytes);
    }

    /// Recompute a store's usage from the content branches of its live
    /// files.
    pub fn refresh(&self, tree: &ObjectTree, sidx: SIndex) -> CollectorResult<u64> {
        let mut bytes = 0u64;
        for oa in tree.list(sidx)? {
            if !oa.is_file() || tree.is_deleted(oa.soid)? {
                continue;
            }
            for kidx in tree.branches(oa.soid)? {
                if let Some(ca) = tree.get_ca(oa.soid, kidx)? {
                    bytes = bytes.saturating_add(ca.length);
                }
            }
        }
        self.set_usage(sidx, bytes);
        debug!(sidx = %sidx, bytes, limit = self.limit, "quota usage refreshed");
        Ok(bytes)
    }
}

impl QuotaCheck for FixedQuota {
    fn is_over_quota(&self, sidx: SIndex) -> bool {
        self.usage(sidx) > self.limit
    }
}
