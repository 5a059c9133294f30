//! Explicit node context threaded through HTTP handlers and the
//! scheduler, replacing any notion of a process-wide singleton.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};

use crate::config::NodeConfig;
use crate::extractor::FactExtractor;
use crate::store::Store;
use crate::sync::PeerClient;

/// Last-run timestamps for every idle task plus the main cycle, used
/// both for throttling (`scheduler.rs`) and for `GET /debug/idle_state`.
#[derive(Debug, Default)]
pub struct ScheduleState {
    pub last_main_cycle: Option<Instant>,
    pub last_idle_learning: Option<Instant>,
    pub last_code_introspection: Option<Instant>,
    pub last_data_quality: Option<Instant>,
    pub last_fragment_audit: Option<Instant>,
    pub last_health_snapshot: Option<Instant>,
    pub last_self_checks: Option<Instant>,
}

pub struct NodeContext {
    pub config: NodeConfig,
    pub store: Store,
    pub client: PeerClient,
    pub head_lock: Mutex<()>,
    pub schedule: RwLock<ScheduleState>,
    pub extractor: Arc<dyn FactExtractor>,
    pub started_at: Instant,
    /// Per-task timestamp of the last "still throttled, skipping" log
    /// line, so repeated skips inside one throttle window debounce to
    /// at most one debug line per task per 60s.
    skip_log_last: Mutex<HashMap<&'static str, Instant>>,
}

impl NodeContext {
    pub fn new(config: NodeConfig, store: Store, extractor: Arc<dyn FactExtractor>) -> Self {
        let client = PeerClient::new(config.advertised_url.clone());
        Self {
            config,
            store,
            client,
            head_lock: Mutex::new(()),
            schedule: RwLock::new(ScheduleState::default()),
            extractor,
            started_at: Instant::now(),
            skip_log_last: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` at most once per 60s per `task_name`, so callers
    /// can debounce a repeated "still throttled" log line.
    pub fn should_log_skip(&self, task_name: &'static str) -> bool {
        const DEBOUNCE: std::time::Duration = std::time::Duration::from_secs(60);
        let now = Instant::now();
        let mut guard = self.skip_log_last.lock();
        match guard.get(task_name) {
            Some(last) if now.duration_since(*last) < DEBOUNCE => false,
            _ => {
                guard.insert(task_name, now);
                true
            }
        }
    }
}
