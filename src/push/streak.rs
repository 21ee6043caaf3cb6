//! In-memory consecutive-failure counters per (industry, kind).
//! Not persisted: a restart starts every streak at zero.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::PushKind;

pub const ALERT_THRESHOLD: u32 = 3;

#[derive(Debug, Default)]
pub struct FailureStreaks {
    inner: Mutex<HashMap<(i64, PushKind), u32>>,
}

impl FailureStreaks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one more failure and return the new streak length.
    pub fn record_failure(&self, industry_id: i64, kind: PushKind) -> u32 {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let n = g.entry((industry_id, kind)).or_insert(0);
        *n = n.saturating_add(1);
        *n
    }

    pub fn reset(&self, industry_id: i64, kind: PushKind) {
        let mut g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        g.remove(&(industry_id, kind));
    }

    pub fn get(&self, industry_id: i64, kind: PushKind) -> u32 {
        let g = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        g.get(&(industry_id, kind)).copied().unwrap_or(0)
    }
}

/// True exactly when a streak reaches the threshold, so one run of failures
/// produces one alert.
pub fn crosses_threshold(streak: u32) -> bool {
    streak == ALERT_THRESHOLD
}
