//! Shared fixtures for the scenario tests.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use aptima_runtime::AppSettings;
use parking_lot::Mutex;

/// Ordered record of what the test extensions observed
#[derive(Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.0.lock().iter().filter(|e| *e == entry).count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.0.lock().iter().position(|e| e == entry)
    }
}

/// Settings with timeouts short enough for tests
pub fn fast_settings() -> AppSettings {
    AppSettings {
        start_timeout_ms: 2000,
        stop_timeout_ms: 200,
        deinit_timeout_ms: 200,
        ..AppSettings::default()
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn wait_until(cond: impl Fn() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    cond()
}
