use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

/// Sliding-window filter for identical queries.
///
/// Keys are exact query texts, values the last time they were admitted.
/// Many requests only read; admission and the periodic sweep take the write
/// lock briefly.
pub struct DedupWindow {
    window: Duration,
    max_entries: usize,
    seen: RwLock<HashMap<String, Instant>>,
}

impl DedupWindow {
    pub fn new(window: Duration, max_entries: usize) -> Self {
        Self {
            window,
            max_entries: max_entries.max(1),
            seen: RwLock::new(HashMap::new()),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn is_recent(&self, text: &str) -> bool {
        self.is_recent_at(text, Instant::now())
    }

    pub fn is_recent_at(&self, text: &str, now: Instant) -> bool {
        let seen = self.seen.read();
        seen.get(text)
            .map(|last| self.within_window(*last, now))
            .unwrap_or(false)
    }

    /// Records `text` unless it was admitted within the window.
    /// Returns `false` for a duplicate.
    pub fn try_admit(&self, text: &str) -> bool {
        self.try_admit_at(text, Instant::now())
    }

    pub fn try_admit_at(&self, text: &str, now: Instant) -> bool {
        if self.is_recent_at(text, now) {
            return false;
        }

        let mut seen = self.seen.write();
        // Another request may have recorded the same text between the locks.
        if let Some(last) = seen.get(text) {
            if self.within_window(*last, now) {
                return false;
            }
        }
        if seen.len() >= self.max_entries && !seen.contains_key(text) {
            Self::evict(&mut seen, self.window, self.max_entries, now);
        }
        seen.insert(text.to_string(), now);
        true
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut seen = self.seen.write();
        let before = seen.len();
        let window = self.window;
        seen.retain(|_, last| now.saturating_duration_since(*last) < window);
        before - seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.read().is_empty()
    }

    pub fn clear(&self) {
        self.seen.write().clear();
    }

    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let dedup = Arc::clone(self);
        let period = interval.max(Duration::from_millis(100));
        info!(
            "[DEDUP] sweeper started: window={}s, interval={}ms",
            dedup.window.as_secs(),
            period.as_millis()
        );
        tokio::spawn(async move {
            let mut ticker = time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let removed = dedup.sweep();
                if removed > 0 {
                    debug!("[DEDUP] swept {} expired entries, {} left", removed, dedup.len());
                }
            }
        })
    }

    fn within_window(&self, last: Instant, now: Instant) -> bool {
        now.saturating_duration_since(last) < self.window
    }

    // Drops expired entries first, then the oldest ones until there is room.
    fn evict(seen: &mut HashMap<String, Instant>, window: Duration, max: usize, now: Instant) {
        seen.retain(|_, last| now.saturating_duration_since(*last) < window);
        while seen.len() >= max {
            let oldest = seen
                .iter()
                .min_by_key(|(_, last)| **last)
                .map(|(key, _)| key.clone());
            match oldest {
                Some(key) => {
                    seen.remove(&key);
                }
                None => break,
            }
        }
    }
}
