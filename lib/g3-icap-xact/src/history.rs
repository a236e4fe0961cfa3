/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Clone, Debug)]
pub struct HistoryEntry {
    pub service_key: String,
    pub retried: bool,
    started: Instant,
    elapsed: Option<Duration>,
}

impl HistoryEntry {
    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }
}

#[derive(Default)]
struct HistoryInner {
    shared_record: Option<(String, String)>,
    next_services: Option<String>,
    entries: Vec<HistoryEntry>,
}

/// Adaptation state of one HTTP transaction, shared by all its ICAP transactions.
#[derive(Default)]
pub struct AdaptationHistory {
    inner: Mutex<HistoryInner>,
}

impl AdaptationHistory {
    /// The shared key/value record, to be sent as an ICAP request header.
    pub fn shared_record(&self) -> Option<(String, String)> {
        self.inner.lock().unwrap().shared_record.clone()
    }

    pub fn update_shared_record(&self, name: &str, value: &str) {
        self.inner.lock().unwrap().shared_record = Some((name.to_string(), value.to_string()));
    }

    /// Replace the routing plan with the services announced by the last reply.
    pub fn update_next_services(&self, services: &str) {
        self.inner.lock().unwrap().next_services = Some(services.to_string());
    }

    pub fn take_next_services(&self) -> Option<String> {
        self.inner.lock().unwrap().next_services.take()
    }

    pub(crate) fn record_xact_start(&self, service_key: &str, retried: bool) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.push(HistoryEntry {
            service_key: service_key.to_string(),
            retried,
            started: Instant::now(),
            elapsed: None,
        });
        inner.entries.len() - 1
    }

    pub(crate) fn record_xact_finish(&self, id: usize) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.entries.get_mut(id) {
            entry.elapsed = Some(entry.started.elapsed());
        }
    }

    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner.lock().unwrap().entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_record() {
        let h = AdaptationHistory::default();
        assert!(h.shared_record().is_none());
        h.update_shared_record("X-Session", "a1");
        h.update_shared_record("X-Session", "a2");
        assert_eq!(
            h.shared_record(),
            Some(("X-Session".to_string(), "a2".to_string()))
        );
    }

    #[test]
    fn next_services() {
        let h = AdaptationHistory::default();
        h.update_next_services("av, dlp");
        assert_eq!(h.take_next_services().as_deref(), Some("av, dlp"));
        assert!(h.take_next_services().is_none());
    }

    #[tokio::test]
    async fn entries() {
        let h = AdaptationHistory::default();
        let first = h.record_xact_start("respmod_av", false);
        let second = h.record_xact_start("respmod_av", true);
        h.record_xact_finish(first);
        let entries = h.entries();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].elapsed().is_some());
        assert!(entries[1].retried);
        assert!(entries[second].elapsed().is_none());
    }
}
