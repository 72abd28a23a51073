// src/dag/cache.rs

use std::collections::HashMap;

use blake3::Hasher;
use tracing::debug;

use crate::config::model::JobDeclaration;
use crate::types::JobId;

/// Deterministic cache key for a job: its type plus its configuration.
///
/// `serde_json` maps are key-sorted, so identical configurations serialize
/// identically regardless of declaration order.
pub fn cache_key(decl: &JobDeclaration) -> String {
    let mut hasher = Hasher::new();
    hasher.update(decl.job_type.as_bytes());
    hasher.update(&[0]);
    for (key, value) in &decl.config {
        hasher.update(key.as_bytes());
        hasher.update(&[0]);
        hasher.update(value.to_string().as_bytes());
        hasher.update(&[0]);
    }
    hasher.finalize().to_hex().to_string()
}

/// Per-execution map from cache key to the job that first completed with it.
#[derive(Debug, Default)]
pub struct JobCache {
    entries: HashMap<String, JobId>,
}

impl JobCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed job whose key matches `decl`, if any.
    pub fn lookup(&self, decl: &JobDeclaration) -> Option<&JobId> {
        self.entries.get(&cache_key(decl))
    }

    /// Remember `decl` as completed. The first job to complete a key keeps it.
    pub fn record(&mut self, decl: &JobDeclaration) {
        let key = cache_key(decl);
        if !self.entries.contains_key(&key) {
            debug!(job = %decl.id, key = %key, "recording cache entry");
            self.entries.insert(key, decl.id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn key_ignores_id_and_name_but_not_config() {
        let mut a = JobDeclaration::new("a", "train");
        a.config.insert("lr".to_string(), json!(0.1));
        a.config.insert("model".to_string(), json!({ "size": "7b", "arch": "llama" }));

        let mut b = a.clone();
        b.id = "b".to_string();
        b.name = "other".to_string();
        assert_eq!(cache_key(&a), cache_key(&b));

        b.config.insert("lr".to_string(), json!(0.2));
        assert_ne!(cache_key(&a), cache_key(&b));

        let mut c = a.clone();
        c.job_type = "evaluate".to_string();
        assert_ne!(cache_key(&a), cache_key(&c));
    }

    #[test]
    fn first_completion_owns_the_entry() {
        let a = JobDeclaration::new("a", "train");
        let mut b = a.clone();
        b.id = "b".to_string();

        let mut cache = JobCache::new();
        assert!(cache.lookup(&a).is_none());
        cache.record(&a);
        cache.record(&b);
        assert_eq!(cache.lookup(&b).map(String::as_str), Some("a"));
    }
}
