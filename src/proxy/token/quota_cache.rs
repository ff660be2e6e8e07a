use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::proxy::memory::{MemoryPressure, MemorySubscriber};
use crate::proxy::token::types::now_ms;

/// Reads older than this are treated as stale and return None.
const READ_TTL_MS: i64 = 5 * 60 * 1000;
/// Entries older than this are dropped by the sweep.
const SWEEP_TTL_MS: i64 = 60 * 60 * 1000;
const SWEEP_INTERVAL_SECS: u64 = 60 * 60;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelQuota {
    pub remaining: i64,
    #[serde(rename = "resetTime")]
    pub reset_time: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaRecord {
    #[serde(rename = "lastUpdated")]
    pub last_updated: i64,
    pub models: HashMap<String, ModelQuota>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct QuotaFileMeta {
    #[serde(rename = "lastCleanup")]
    last_cleanup: i64,
    ttl: i64,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct QuotaFile {
    meta: QuotaFileMeta,
    quotas: HashMap<String, QuotaRecord>,
}

/// Per-credential per-model remaining-quota snapshot, persisted so cold
/// starts keep the last-known picture.
pub struct QuotaCache {
    path: PathBuf,
    entries: DashMap<String, QuotaRecord>,
    write_lock: Mutex<()>,
}

impl QuotaCache {
    pub fn new(path: PathBuf) -> Self {
        let cache = Self {
            path,
            entries: DashMap::new(),
            write_lock: Mutex::new(()),
        };
        cache.load();
        cache
    }

    fn load(&self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::read_to_string(&self.path)
            .map_err(|e| e.to_string())
            .and_then(|raw| serde_json::from_str::<QuotaFile>(&raw).map_err(|e| e.to_string()))
        {
            Ok(file) => {
                for (key, record) in file.quotas {
                    self.entries.insert(key, record);
                }
                debug!("Loaded {} quota record(s)", self.entries.len());
            }
            Err(e) => warn!("[W-QUOTA-LOAD] ignoring unreadable quota file: {}", e),
        }
    }

    pub fn update(&self, refresh_token: &str, models: HashMap<String, ModelQuota>) {
        self.entries.insert(
            refresh_token.to_string(),
            QuotaRecord {
                last_updated: now_ms(),
                models,
            },
        );
    }

    /// Returns the record only while it is fresh (under the 5 minute TTL).
    pub fn get(&self, refresh_token: &str) -> Option<QuotaRecord> {
        let entry = self.entries.get(refresh_token)?;
        if now_ms() - entry.last_updated < READ_TTL_MS {
            Some(entry.clone())
        } else {
            None
        }
    }

    pub async fn persist(&self) {
        let _guard = self.write_lock.lock().await;
        let file = QuotaFile {
            meta: QuotaFileMeta {
                last_cleanup: now_ms(),
                ttl: SWEEP_TTL_MS,
            },
            quotas: self
                .entries
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        if let Some(parent) = self.path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        match serde_json::to_string_pretty(&file) {
            Ok(body) => {
                if let Err(e) = std::fs::write(&self.path, body) {
                    warn!("[W-QUOTA-PERSIST] failed to write {}: {}", self.path.display(), e);
                }
            }
            Err(e) => warn!("[W-QUOTA-PERSIST] failed to serialize quotas: {}", e),
        }
    }

    fn sweep(&self) -> usize {
        let cutoff = now_ms() - SWEEP_TTL_MS;
        let before = self.entries.len();
        self.entries.retain(|_, record| record.last_updated >= cutoff);
        before - self.entries.len()
    }

    fn prune_stale_reads(&self) -> usize {
        let cutoff = now_ms() - READ_TTL_MS;
        let before = self.entries.len();
        self.entries.retain(|_, record| record.last_updated >= cutoff);
        before - self.entries.len()
    }

    /// Hourly sweep task; drops hour-old entries and persists the survivors.
    pub fn start_sweeper(self: std::sync::Arc<Self>, cancel: CancellationToken) {
        let cache = self;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so startup stays quiet.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let dropped = cache.sweep();
                        if dropped > 0 {
                            info!("Quota sweep removed {} stale record(s)", dropped);
                        }
                        cache.persist().await;
                    }
                    _ = cancel.cancelled() => {
                        debug!("Quota sweeper stopped");
                        return;
                    }
                }
            }
        });
    }

    #[cfg(test)]
    fn backdate(&self, refresh_token: &str, age_ms: i64) {
        if let Some(mut entry) = self.entries.get_mut(refresh_token) {
            entry.last_updated = now_ms() - age_ms;
        }
    }
}

impl MemorySubscriber for QuotaCache {
    fn cleanup(&self, pressure: MemoryPressure) {
        match pressure {
            MemoryPressure::High => {
                let dropped = self.prune_stale_reads();
                if dropped > 0 {
                    debug!("[QuotaCache] pressure prune removed {} entries", dropped);
                }
            }
            MemoryPressure::Critical => {
                let dropped = self.entries.len();
                self.entries.clear();
                info!("[QuotaCache] critical pressure cleared {} entries", dropped);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn temp_cache() -> QuotaCache {
        let path = std::env::temp_dir()
            .join(format!("apogee-quota-{}", uuid::Uuid::new_v4()))
            .join("quotas.json");
        QuotaCache::new(path)
    }

    fn sample_models() -> HashMap<String, ModelQuota> {
        HashMap::from([(
            "gemini-3-pro-high".to_string(),
            ModelQuota {
                remaining: 42,
                reset_time: "2026-08-02T12:00:00Z".to_string(),
            },
        )])
    }

    #[test]
    fn fresh_entry_is_readable_until_ttl() {
        let cache = temp_cache();
        cache.update("rt-1", sample_models());
        assert!(cache.get("rt-1").is_some());

        cache.backdate("rt-1", READ_TTL_MS + 1);
        assert!(cache.get("rt-1").is_none());
    }

    #[test]
    fn sweep_drops_hour_old_entries_only() {
        let cache = temp_cache();
        cache.update("rt-old", sample_models());
        cache.update("rt-new", sample_models());
        cache.backdate("rt-old", SWEEP_TTL_MS + 1);

        assert_eq!(cache.sweep(), 1);
        assert!(cache.entries.contains_key("rt-new"));
        assert!(!cache.entries.contains_key("rt-old"));
    }

    #[tokio::test]
    async fn persists_and_reloads_snapshot() {
        let cache = temp_cache();
        cache.update("rt-1", sample_models());
        cache.persist().await;

        let reloaded = QuotaCache::new(cache.path.clone());
        let record = reloaded.get("rt-1").expect("persisted record");
        assert_eq!(
            record.models.get("gemini-3-pro-high").map(|m| m.remaining),
            Some(42)
        );
    }

    #[test]
    fn pressure_high_prunes_and_critical_clears() {
        let cache = Arc::new(temp_cache());
        cache.update("rt-stale", sample_models());
        cache.update("rt-fresh", sample_models());
        cache.backdate("rt-stale", READ_TTL_MS + 1);

        cache.cleanup(MemoryPressure::High);
        assert!(cache.entries.contains_key("rt-fresh"));
        assert!(!cache.entries.contains_key("rt-stale"));

        cache.cleanup(MemoryPressure::Critical);
        assert!(cache.entries.is_empty());
    }
}
