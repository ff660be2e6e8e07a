use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::proxy::memory::{MemoryPressure, MemorySubscriber};

const SIGNATURE_TTL: Duration = Duration::from_secs(30 * 60);
const CACHE_LIMIT: usize = 16;

#[derive(Clone, Debug)]
struct CacheEntry {
    signature: String,
    timestamp: SystemTime,
}

impl CacheEntry {
    fn new(signature: String) -> Self {
        Self {
            signature,
            timestamp: SystemTime::now(),
        }
    }

    fn is_expired(&self) -> bool {
        self.timestamp.elapsed().unwrap_or(Duration::ZERO) > SIGNATURE_TTL
    }
}

/// Most recent thought signatures keyed by model, one map for reasoning and
/// one for tool calls. Keyed by model on purpose: concurrent sessions on the
/// same model share a slot, trading rare interleaving errors for simplicity
/// under token rotation.
pub struct SignatureCache {
    reasoning: Mutex<HashMap<String, CacheEntry>>,
    tool: Mutex<HashMap<String, CacheEntry>>,
}

impl SignatureCache {
    pub fn new() -> Self {
        Self {
            reasoning: Mutex::new(HashMap::new()),
            tool: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_reasoning(&self, model: &str, signature: String) {
        Self::insert(&self.reasoning, model, signature);
    }

    pub fn get_reasoning(&self, model: &str) -> Option<String> {
        Self::fetch(&self.reasoning, model)
    }

    pub fn set_tool(&self, model: &str, signature: String) {
        Self::insert(&self.tool, model, signature);
    }

    pub fn get_tool(&self, model: &str) -> Option<String> {
        Self::fetch(&self.tool, model)
    }

    fn insert(map: &Mutex<HashMap<String, CacheEntry>>, model: &str, signature: String) {
        if signature.is_empty() {
            return;
        }
        let Ok(mut cache) = map.lock() else { return };
        cache.insert(model.to_string(), CacheEntry::new(signature));
        if cache.len() > CACHE_LIMIT {
            cache.retain(|_, entry| !entry.is_expired());
        }
        while cache.len() > CACHE_LIMIT {
            // Still over after dropping expired entries: evict the oldest.
            let oldest = cache
                .iter()
                .min_by_key(|(_, entry)| entry.timestamp)
                .map(|(model, _)| model.clone());
            match oldest {
                Some(model) => {
                    cache.remove(&model);
                }
                None => break,
            }
        }
    }

    fn fetch(map: &Mutex<HashMap<String, CacheEntry>>, model: &str) -> Option<String> {
        let Ok(mut cache) = map.lock() else {
            return None;
        };
        match cache.get(model) {
            Some(entry) if !entry.is_expired() => Some(entry.signature.clone()),
            Some(_) => {
                cache.remove(model);
                None
            }
            None => None,
        }
    }

    #[cfg(test)]
    fn backdate(&self, model: &str, age: Duration) {
        for map in [&self.reasoning, &self.tool] {
            if let Some(entry) = map.lock().unwrap().get_mut(model) {
                entry.timestamp = SystemTime::now() - age;
            }
        }
    }
}

impl Default for SignatureCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySubscriber for SignatureCache {
    fn cleanup(&self, pressure: MemoryPressure) {
        match pressure {
            MemoryPressure::High => {
                for map in [&self.reasoning, &self.tool] {
                    if let Ok(mut cache) = map.lock() {
                        cache.retain(|_, entry| !entry.is_expired());
                    }
                }
            }
            MemoryPressure::Critical => {
                for map in [&self.reasoning, &self.tool] {
                    if let Ok(mut cache) = map.lock() {
                        cache.clear();
                    }
                }
            }
            _ => {}
        }
    }
}
