use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const TICK_INTERVAL_SECS: u64 = 30;
const RECLAIM_COOLDOWN: Duration = Duration::from_secs(10);

/// Discrete pressure tier derived from process heap against thresholds at
/// 0.3·H / 0.6·H / H of the configured high-water mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryPressure {
    Low,
    Medium,
    High,
    Critical,
}

/// Bounded pool sizes handed to subscribers; values descend as pressure rises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolSizes {
    pub chunk: usize,
    pub tool_call: usize,
    pub line_buffer: usize,
}

pub fn pool_sizes_for(pressure: MemoryPressure) -> PoolSizes {
    match pressure {
        MemoryPressure::Low => PoolSizes {
            chunk: 64,
            tool_call: 32,
            line_buffer: 128,
        },
        MemoryPressure::Medium => PoolSizes {
            chunk: 32,
            tool_call: 16,
            line_buffer: 64,
        },
        MemoryPressure::High => PoolSizes {
            chunk: 16,
            tool_call: 8,
            line_buffer: 32,
        },
        MemoryPressure::Critical => PoolSizes {
            chunk: 4,
            tool_call: 2,
            line_buffer: 8,
        },
    }
}

pub trait MemorySubscriber: Send + Sync {
    fn cleanup(&self, pressure: MemoryPressure);
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryReport {
    pub pressure: MemoryPressure,
    pub heap_mb: u64,
    pub peak_heap_mb: u64,
    pub high_mb: u64,
    pub cleanup_count: u64,
    pub reclaim_passes: u64,
    pub pool_sizes: PoolSizes,
}

struct RegulatorState {
    pressure: MemoryPressure,
    heap_bytes: u64,
    last_reclaim: Option<Instant>,
}

/// Process-wide tier-based regulator. Observes heap on a 30 s tick,
/// reclassifies, and broadcasts cleanup to subscribers when the tier moves.
pub struct MemoryRegulator {
    high_bytes: u64,
    state: Mutex<RegulatorState>,
    subscribers: Mutex<Vec<Arc<dyn MemorySubscriber>>>,
    peak_heap_bytes: AtomicU64,
    cleanup_count: AtomicU64,
    reclaim_passes: AtomicU64,
}

impl MemoryRegulator {
    pub fn new(high_mb: u64) -> Self {
        Self {
            high_bytes: high_mb.max(1) * 1024 * 1024,
            state: Mutex::new(RegulatorState {
                pressure: MemoryPressure::Low,
                heap_bytes: 0,
                last_reclaim: None,
            }),
            subscribers: Mutex::new(Vec::new()),
            peak_heap_bytes: AtomicU64::new(0),
            cleanup_count: AtomicU64::new(0),
            reclaim_passes: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn MemorySubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    pub fn classify(&self, heap_bytes: u64) -> MemoryPressure {
        let high = self.high_bytes as f64;
        let heap = heap_bytes as f64;
        if heap < 0.3 * high {
            MemoryPressure::Low
        } else if heap < 0.6 * high {
            MemoryPressure::Medium
        } else if heap <= high {
            MemoryPressure::High
        } else {
            MemoryPressure::Critical
        }
    }

    /// One observation step; the timer calls this with a real reading, tests
    /// call it with simulated ones. Returns the (possibly unchanged) tier.
    pub fn observe(&self, heap_bytes: u64) -> MemoryPressure {
        self.peak_heap_bytes.fetch_max(heap_bytes, Ordering::Relaxed);
        let pressure = self.classify(heap_bytes);

        let changed = {
            let mut state = self.state.lock().unwrap();
            state.heap_bytes = heap_bytes;
            let changed = state.pressure != pressure;
            state.pressure = pressure;
            changed
        };

        if changed {
            info!(
                "Memory pressure changed to {:?} ({} MB)",
                pressure,
                heap_bytes / (1024 * 1024)
            );
            self.broadcast(pressure);
        }

        match pressure {
            MemoryPressure::High => self.try_reclaim(false),
            MemoryPressure::Critical => self.try_reclaim(true),
            _ => {}
        }

        pressure
    }

    fn broadcast(&self, pressure: MemoryPressure) {
        let subscribers = self.subscribers.lock().unwrap().clone();
        for subscriber in subscribers {
            subscriber.cleanup(pressure);
            self.cleanup_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Allocator-release pass. Rust has no collector to hint, so this only
    /// accounts the pass; the actual release is the subscribers shrinking
    /// their pools. `force` (critical tier) ignores the 10 s cooldown.
    fn try_reclaim(&self, force: bool) {
        let mut state = self.state.lock().unwrap();
        let due = match state.last_reclaim {
            Some(at) => at.elapsed() >= RECLAIM_COOLDOWN,
            None => true,
        };
        if force || due {
            state.last_reclaim = Some(Instant::now());
            self.reclaim_passes.fetch_add(1, Ordering::Relaxed);
            debug!("Reclaim pass triggered (forced: {})", force);
        }
    }

    pub fn current_pressure(&self) -> MemoryPressure {
        self.state.lock().unwrap().pressure
    }

    pub fn pool_sizes(&self) -> PoolSizes {
        pool_sizes_for(self.current_pressure())
    }

    pub fn report(&self) -> MemoryReport {
        let (pressure, heap_bytes) = {
            let state = self.state.lock().unwrap();
            (state.pressure, state.heap_bytes)
        };
        MemoryReport {
            pressure,
            heap_mb: heap_bytes / (1024 * 1024),
            peak_heap_mb: self.peak_heap_bytes.load(Ordering::Relaxed) / (1024 * 1024),
            high_mb: self.high_bytes / (1024 * 1024),
            cleanup_count: self.cleanup_count.load(Ordering::Relaxed),
            reclaim_passes: self.reclaim_passes.load(Ordering::Relaxed),
            pool_sizes: pool_sizes_for(pressure),
        }
    }

    /// 30 s observation loop. Never blocks a request path: it owns its own
    /// task and sysinfo handle.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) {
        let regulator = self;
        tokio::spawn(async move {
            let pid = Pid::from_u32(std::process::id());
            let mut system = System::new();
            let mut interval =
                tokio::time::interval(Duration::from_secs(TICK_INTERVAL_SECS));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        system.refresh_processes_specifics(
                            ProcessesToUpdate::Some(&[pid]),
                            true,
                            ProcessRefreshKind::nothing().with_memory(),
                        );
                        match system.process(pid) {
                            Some(process) => {
                                regulator.observe(process.memory());
                            }
                            None => warn!("[W-MEMORY-PROBE] process reading unavailable"),
                        }
                    }
                    _ = cancel.cancelled() => {
                        debug!("Memory regulator stopped");
                        return;
                    }
                }
            }
        });
    }
}
