//! In-flight download bookkeeping.
//!
//! The table doubles as the mutual-exclusion token: a digest present in it is
//! being fetched, and [`DownloadGuard`] removes the entry when it goes out of
//! scope no matter how the transfer ended.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::AgentError;

/// Live progress of one transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub hash: String,
    pub name: String,
    pub bytes: u64,
    /// Expected size, when the sender announced one.
    pub total: Option<u64>,
    /// `None` while the total is unknown.
    pub percent: Option<u8>,
}

impl DownloadProgress {
    fn new(hash: &str, name: &str) -> Self {
        Self {
            hash: hash.to_string(),
            name: name.to_string(),
            bytes: 0,
            total: None,
            percent: None,
        }
    }

    /// Capped at 99 so that 100 is only ever seen after finalization.
    fn recompute(&mut self) {
        self.percent = self.total.map(|total| {
            if total == 0 {
                99
            } else {
                (self.bytes.saturating_mul(100) / total).min(99) as u8
            }
        });
    }
}

/// Shared table of active downloads keyed by digest.
#[derive(Debug, Clone, Default)]
pub struct DownloadTracker {
    active: Arc<Mutex<HashMap<String, DownloadProgress>>>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `hash`. Fails with [`AgentError::DuplicateTransfer`] if another
    /// transfer of the same digest is running, and with
    /// [`AgentError::NameInFlight`] if a different digest is being written
    /// under the same name.
    pub fn begin(&self, hash: &str, name: &str) -> Result<DownloadGuard, AgentError> {
        let mut active = self.active.lock();
        if active.contains_key(hash) {
            return Err(AgentError::DuplicateTransfer(hash.to_string()));
        }
        if active.values().any(|progress| progress.name == name) {
            return Err(AgentError::NameInFlight(name.to_string()));
        }
        active.insert(hash.to_string(), DownloadProgress::new(hash, name));
        Ok(DownloadGuard {
            active: self.active.clone(),
            hash: hash.to_string(),
        })
    }

    pub fn is_active(&self, hash: &str) -> bool {
        self.active.lock().contains_key(hash)
    }

    pub fn progress(&self, hash: &str) -> Option<DownloadProgress> {
        self.active.lock().get(hash).cloned()
    }

    pub fn len(&self) -> usize {
        self.active.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn snapshot(&self) -> BTreeMap<String, DownloadProgress> {
        self.active
            .lock()
            .iter()
            .map(|(hash, progress)| (hash.clone(), progress.clone()))
            .collect()
    }
}

/// Owns one entry of the tracker for the duration of a transfer.
#[derive(Debug)]
pub struct DownloadGuard {
    active: Arc<Mutex<HashMap<String, DownloadProgress>>>,
    hash: String,
}

impl DownloadGuard {
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn set_total(&self, total: Option<u64>) {
        self.update(|progress| progress.total = total);
    }

    pub fn advance(&self, bytes: usize) {
        self.update(|progress| progress.bytes = progress.bytes.saturating_add(bytes as u64));
    }

    pub fn bytes(&self) -> u64 {
        self.active
            .lock()
            .get(&self.hash)
            .map(|progress| progress.bytes)
            .unwrap_or_default()
    }

    /// Mark the transfer complete. The entry disappears when the guard drops.
    pub fn finish(self) {
        if let Some(progress) = self.active.lock().get_mut(&self.hash) {
            progress.percent = Some(100);
        }
    }

    fn update(&self, apply: impl FnOnce(&mut DownloadProgress)) {
        if let Some(progress) = self.active.lock().get_mut(&self.hash) {
            apply(progress);
            progress.recompute();
        }
    }
}

impl Drop for DownloadGuard {
    fn drop(&mut self) {
        self.active.lock().remove(&self.hash);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_for_same_digest_is_rejected() {
        let tracker = DownloadTracker::new();
        let guard = tracker.begin("d1", "doc.txt").unwrap();
        assert!(matches!(
            tracker.begin("d1", "copy.txt"),
            Err(AgentError::DuplicateTransfer(hash)) if hash == "d1"
        ));
        assert!(tracker.begin("d2", "other.txt").is_ok());

        drop(guard);
        assert!(!tracker.is_active("d1"));
        assert!(tracker.begin("d1", "doc.txt").is_ok());
    }

    #[test]
    fn same_name_with_other_digest_is_rejected_while_in_flight() {
        let tracker = DownloadTracker::new();
        let guard = tracker.begin("d1", "report.pdf").unwrap();
        assert!(matches!(
            tracker.begin("d2", "report.pdf"),
            Err(AgentError::NameInFlight(name)) if name == "report.pdf"
        ));
        assert!(!tracker.is_active("d2"));

        drop(guard);
        assert!(tracker.begin("d2", "report.pdf").is_ok());
    }

    #[test]
    fn concurrent_claims_admit_exactly_one() {
        let tracker = DownloadTracker::new();
        let barrier = Arc::new(std::sync::Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let tracker = tracker.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    // Keep the guard alive until every thread has tried.
                    let result = tracker.begin("same", "f");
                    std::thread::sleep(std::time::Duration::from_millis(50));
                    result.is_ok()
                })
            })
            .collect();

        let admitted = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(admitted, 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn progress_is_capped_until_finished() {
        let tracker = DownloadTracker::new();
        let guard = tracker.begin("d", "f").unwrap();
        assert_eq!(tracker.progress("d").unwrap().percent, None);

        guard.set_total(Some(10));
        assert_eq!(tracker.progress("d").unwrap().percent, Some(0));
        guard.advance(5);
        assert_eq!(tracker.progress("d").unwrap().percent, Some(50));
        guard.advance(5);
        assert_eq!(tracker.progress("d").unwrap().percent, Some(99));
        assert_eq!(guard.bytes(), 10);

        guard.finish();
        assert!(tracker.progress("d").is_none());
    }

    #[test]
    fn unknown_total_stays_indeterminate() {
        let tracker = DownloadTracker::new();
        let guard = tracker.begin("d", "f").unwrap();
        guard.advance(1024);
        let progress = tracker.progress("d").unwrap();
        assert_eq!(progress.bytes, 1024);
        assert_eq!(progress.percent, None);
        drop(guard);
        assert!(tracker.snapshot().is_empty());
    }
}
