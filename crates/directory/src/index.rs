//! The directory's system of record: registered peers plus inverted indices
//! by file name and by content digest.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use p2pshare_types::{FileRecord, IndexStats, Peer, PeerId, PeerStatus, SearchResponse};
use parking_lot::RwLock;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct IndexState {
    peers: HashMap<PeerId, Peer>,
    by_name: BTreeMap<String, BTreeSet<PeerId>>,
    by_hash: BTreeMap<String, BTreeSet<PeerId>>,
}

impl IndexState {
    fn insert_footprint(&mut self, peer: &Peer) {
        for file in &peer.files {
            self.by_name
                .entry(file.name.clone())
                .or_default()
                .insert(peer.id.clone());
            self.by_hash
                .entry(file.hash.clone())
                .or_default()
                .insert(peer.id.clone());
        }
    }

    fn retire_footprint(&mut self, peer: &Peer) {
        for file in &peer.files {
            detach(&mut self.by_name, &file.name, &peer.id);
            detach(&mut self.by_hash, &file.hash, &peer.id);
        }
    }

    fn remove_peer(&mut self, peer_id: &str) -> bool {
        match self.peers.remove(peer_id) {
            Some(previous) => {
                self.retire_footprint(&previous);
                true
            }
            None => false,
        }
    }
}

/// Drop `peer_id` from one bucket, deleting the bucket once it is empty.
fn detach(index: &mut BTreeMap<String, BTreeSet<PeerId>>, key: &str, peer_id: &str) {
    if let Some(holders) = index.get_mut(key) {
        holders.remove(peer_id);
        if holders.is_empty() {
            index.remove(key);
        }
    }
}

fn age(now: DateTime<Utc>, last_seen: DateTime<Utc>) -> Duration {
    now.signed_duration_since(last_seen)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Internally synchronized peer/file index.
///
/// Every operation takes the lock once, so a registration is never visible
/// half-applied to a concurrent search.
#[derive(Debug, Default)]
pub struct DirectoryIndex {
    state: RwLock<IndexState>,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Upsert `peer`, replacing whatever catalog it registered before.
    pub fn register_peer(&self, peer: Peer) {
        self.register_peer_at(peer, Utc::now());
    }

    pub fn register_peer_at(&self, mut peer: Peer, now: DateTime<Utc>) {
        peer.last_seen = now;
        for file in &mut peer.files {
            file.peer_ids = vec![peer.id.clone()];
        }

        let mut state = self.state.write();
        if let Some(previous) = state.peers.remove(&peer.id) {
            state.retire_footprint(&previous);
        }
        state.insert_footprint(&peer);
        debug!(
            "Registered peer {} at {}:{} with {} files",
            peer.id,
            peer.address,
            peer.port,
            peer.files.len()
        );
        state.peers.insert(peer.id.clone(), peer);
    }

    /// Remove a peer and its footprint. Returns `false` for an unknown ID.
    pub fn unregister_peer(&self, peer_id: &str) -> bool {
        let removed = self.state.write().remove_peer(peer_id);
        if removed {
            debug!("Unregistered peer {}", peer_id);
        }
        removed
    }

    /// Refresh a peer's liveness timestamp. Returns `false` for an unknown ID.
    pub fn touch(&self, peer_id: &str) -> bool {
        self.touch_at(peer_id, Utc::now())
    }

    pub fn touch_at(&self, peer_id: &str, now: DateTime<Utc>) -> bool {
        match self.state.write().peers.get_mut(peer_id) {
            Some(peer) => {
                peer.last_seen = now;
                true
            }
            None => false,
        }
    }

    pub fn contains_peer(&self, peer_id: &str) -> bool {
        self.state.read().peers.contains_key(peer_id)
    }

    pub fn peer(&self, peer_id: &str) -> Option<Peer> {
        self.state.read().peers.get(peer_id).cloned()
    }

    /// Case-insensitive substring match against file names.
    ///
    /// `limit <= 0` returns every match. Digest and size of each hit come
    /// from the first holder, in peer-ID order, that still lists the name;
    /// `peer_ids` lists every holder of the name.
    pub fn search_by_name(&self, query: &str, limit: i64) -> SearchResponse {
        let needle = query.to_lowercase();
        let cap = usize::try_from(limit).ok().filter(|cap| *cap > 0);

        let state = self.state.read();
        let mut response = SearchResponse::default();

        for (name, holders) in &state.by_name {
            if cap.is_some_and(|cap| response.files.len() >= cap) {
                break;
            }
            if !name.to_lowercase().contains(&needle) {
                continue;
            }

            let Some(representative) = holders
                .iter()
                .filter_map(|id| state.peers.get(id))
                .find_map(|peer| peer.file_named(name))
            else {
                continue;
            };

            let mut record = FileRecord::new(
                name.clone(),
                representative.hash.clone(),
                representative.size,
            );
            record.peer_ids = holders.iter().cloned().collect();

            for id in holders {
                if let Some(peer) = state.peers.get(id) {
                    response
                        .peers
                        .entry(id.clone())
                        .or_insert_with(|| peer.clone());
                }
            }
            response.files.push(record);
        }

        response
    }

    /// Remove every peer silent for longer than `timeout`.
    pub fn reclaim_stale(&self, timeout: Duration) -> Vec<PeerId> {
        self.reclaim_stale_at(timeout, Utc::now())
    }

    pub fn reclaim_stale_at(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<PeerId> {
        let mut state = self.state.write();
        let mut stale: Vec<PeerId> = state
            .peers
            .values()
            .filter(|peer| age(now, peer.last_seen) > timeout)
            .map(|peer| peer.id.clone())
            .collect();
        stale.sort();

        for peer_id in &stale {
            state.remove_peer(peer_id);
            info!("Reclaimed stale peer {}", peer_id);
        }
        stale
    }

    pub fn stats(&self) -> IndexStats {
        let state = self.state.read();
        IndexStats {
            peer_count: state.peers.len(),
            unique_files: state.by_hash.len(),
            total_file_refs: state.by_name.len(),
        }
    }

    /// Every registered peer with its online flag and digest-sharing neighbours.
    pub fn peers_with_status(&self, online_window: Duration) -> Vec<PeerStatus> {
        self.peers_with_status_at(online_window, Utc::now())
    }

    pub fn peers_with_status_at(
        &self,
        online_window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<PeerStatus> {
        let state = self.state.read();
        let mut listed: Vec<PeerStatus> = state
            .peers
            .values()
            .map(|peer| {
                let connections: BTreeSet<&PeerId> = peer
                    .files
                    .iter()
                    .filter_map(|file| state.by_hash.get(&file.hash))
                    .flatten()
                    .filter(|id| **id != peer.id)
                    .collect();
                PeerStatus {
                    peer: peer.clone(),
                    is_online: age(now, peer.last_seen) < online_window,
                    connections: connections.into_iter().cloned().collect(),
                }
            })
            .collect();
        listed.sort_by(|a, b| a.peer.id.cmp(&b.peer.id));
        listed
    }

    /// Check that every bucket member is a registered peer listing a
    /// matching entry, that no bucket is empty, and that every catalog entry
    /// is indexed.
    #[cfg(test)]
    fn assert_consistent(&self) {
        let state = self.state.read();
        for (name, holders) in &state.by_name {
            assert!(!holders.is_empty(), "empty name bucket {name}");
            for id in holders {
                let peer = state.peers.get(id).expect("name bucket references unknown peer");
                assert!(peer.files.iter().any(|f| &f.name == name));
            }
        }
        for (hash, holders) in &state.by_hash {
            assert!(!holders.is_empty(), "empty digest bucket {hash}");
            for id in holders {
                let peer = state.peers.get(id).expect("digest bucket references unknown peer");
                assert!(peer.files.iter().any(|f| &f.hash == hash));
            }
        }
        for peer in state.peers.values() {
            for file in &peer.files {
                assert!(state.by_name[&file.name].contains(&peer.id));
                assert!(state.by_hash[&file.hash].contains(&peer.id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn file(name: &str, hash: &str, size: u64) -> FileRecord {
        FileRecord::new(name, hash, size)
    }

    fn peer(id: &str, files: Vec<FileRecord>) -> Peer {
        Peer::new(id, 8081, files).with_address("127.0.0.1")
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn reregistration_replaces_footprint() {
        let index = DirectoryIndex::new();
        index.register_peer(peer("p", vec![file("a.txt", "ha", 1), file("b.txt", "hb", 2)]));
        assert_eq!(index.stats().total_file_refs, 2);

        index.register_peer(peer("p", vec![file("a.txt", "ha", 1)]));
        index.assert_consistent();

        assert!(index.search_by_name("b.txt", 0).files.is_empty());
        let hits = index.search_by_name("a.txt", 0);
        assert_eq!(hits.files.len(), 1);
        assert_eq!(hits.files[0].peer_ids, vec!["p".to_string()]);
        assert_eq!(
            index.stats(),
            IndexStats {
                peer_count: 1,
                unique_files: 1,
                total_file_refs: 1
            }
        );
    }

    #[test]
    fn unregister_and_touch_unknown_are_noops() {
        let index = DirectoryIndex::new();
        assert!(!index.unregister_peer("ghost"));
        assert!(!index.touch("ghost"));

        index.register_peer(peer("p", vec![file("a", "h", 1)]));
        assert!(index.touch("p"));
        assert!(index.unregister_peer("p"));
        assert!(!index.unregister_peer("p"));
        assert_eq!(index.stats(), IndexStats::default());
        index.assert_consistent();
    }

    #[test]
    fn search_matches_true_substrings_case_insensitively() {
        let index = DirectoryIndex::new();
        index.register_peer(peer(
            "p",
            vec![
                file("reports/Annual-Report.pdf", "h1", 10),
                file("notes.txt", "h2", 3),
            ],
        ));

        let hits = index.search_by_name("report.PDF", 0);
        assert_eq!(hits.files.len(), 1);
        assert_eq!(hits.files[0].name, "reports/Annual-Report.pdf");
        assert!(hits.peers.contains_key("p"));

        // Mid-name, not a prefix.
        assert_eq!(index.search_by_name("otes", 0).files.len(), 1);
        assert!(index.search_by_name("missing", 0).files.is_empty());
    }

    #[test]
    fn search_limit_caps_results() {
        let index = DirectoryIndex::new();
        let files = (0..5)
            .map(|i| file(&format!("doc-{i}.txt"), &format!("h{i}"), i))
            .collect();
        index.register_peer(peer("p", files));

        assert_eq!(index.search_by_name("doc", 0).files.len(), 5);
        assert_eq!(index.search_by_name("doc", -3).files.len(), 5);
        let capped = index.search_by_name("doc", 2);
        assert_eq!(capped.files.len(), 2);
        assert_eq!(capped.files[0].name, "doc-0.txt");
    }

    #[test]
    fn search_reports_every_holder_of_a_name() {
        let index = DirectoryIndex::new();
        index.register_peer(peer("a", vec![file("doc.txt", "d1", 17)]));
        index.register_peer(peer("b", vec![file("doc.txt", "d1", 17)]));
        index.register_peer(peer("c", vec![file("other.bin", "d9", 4)]));

        let hits = index.search_by_name("doc", 0);
        assert_eq!(hits.files.len(), 1);
        assert_eq!(hits.files[0].hash, "d1");
        assert_eq!(hits.files[0].size, 17);
        assert_eq!(hits.files[0].peer_ids, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(hits.peers.len(), 2);
        assert!(!hits.peers.contains_key("c"));
    }

    #[test]
    fn conflicting_digests_report_first_holder() {
        let index = DirectoryIndex::new();
        index.register_peer(peer("b", vec![file("x.bin", "hb", 2)]));
        index.register_peer(peer("a", vec![file("x.bin", "ha", 1)]));

        let hits = index.search_by_name("x.bin", 0);
        assert_eq!(hits.files[0].hash, "ha");
        assert_eq!(index.stats().unique_files, 2);
        assert_eq!(index.stats().total_file_refs, 1);
    }

    #[test]
    fn stale_peers_are_reclaimed_and_heartbeats_protect() {
        let index = DirectoryIndex::new();
        let timeout = Duration::from_secs(300);
        index.register_peer_at(peer("quiet", vec![file("q", "hq", 1)]), at(0));
        index.register_peer_at(peer("chatty", vec![file("c", "hc", 1)]), at(0));

        assert!(index.touch_at("chatty", at(250)));
        assert!(index.reclaim_stale_at(timeout, at(300)).is_empty());

        let reclaimed = index.reclaim_stale_at(timeout, at(301));
        assert_eq!(reclaimed, vec!["quiet".to_string()]);
        assert!(index.search_by_name("q", 0).files.is_empty());
        assert_eq!(index.stats().peer_count, 1);
        index.assert_consistent();

        assert!(index.reclaim_stale_at(timeout, at(549)).is_empty());
        assert_eq!(index.reclaim_stale_at(timeout, at(551)), vec!["chatty".to_string()]);
    }

    #[test]
    fn peer_listing_reports_online_and_connections() {
        let index = DirectoryIndex::new();
        index.register_peer_at(peer("a", vec![file("doc.txt", "d1", 17)]), at(0));
        index.register_peer_at(peer("b", vec![file("copy.txt", "d1", 17)]), at(200));
        index.register_peer_at(peer("c", vec![file("solo", "d2", 1)]), at(200));

        let listed = index.peers_with_status_at(Duration::from_secs(300), at(400));
        let ids: Vec<&str> = listed.iter().map(|s| s.peer.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert!(!listed[0].is_online);
        assert!(listed[1].is_online);
        assert_eq!(listed[0].connections, vec!["b".to_string()]);
        assert_eq!(listed[1].connections, vec!["a".to_string()]);
        assert!(listed[2].connections.is_empty());
    }

    #[derive(Debug, Clone)]
    enum Op {
        Register(usize, Vec<usize>),
        Unregister(usize),
        Touch(usize),
        Reclaim,
    }

    const PEERS: [&str; 4] = ["p0", "p1", "p2", "p3"];
    const FILES: [(&str, &str); 5] = [
        ("alpha.txt", "h-a"),
        ("beta.txt", "h-b"),
        ("alpha.txt", "h-a2"),
        ("gamma.bin", "h-b"),
        ("delta", "h-d"),
    ];

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..PEERS.len(), prop::collection::vec(0..FILES.len(), 0..4))
                .prop_map(|(p, files)| Op::Register(p, files)),
            (0..PEERS.len()).prop_map(Op::Unregister),
            (0..PEERS.len()).prop_map(Op::Touch),
            Just(Op::Reclaim),
        ]
    }

    proptest! {
        #[test]
        fn prop_footprint_stays_consistent(ops in prop::collection::vec(op_strategy(), 1..40)) {
            let index = DirectoryIndex::new();
            let timeout = Duration::from_secs(30);

            for (step, op) in ops.into_iter().enumerate() {
                let now = at(step as i64 * 10);
                match op {
                    Op::Register(p, files) => {
                        let files = files
                            .into_iter()
                            .map(|f| file(FILES[f].0, FILES[f].1, f as u64))
                            .collect();
                        index.register_peer_at(peer(PEERS[p], files), now);
                    }
                    Op::Unregister(p) => {
                        index.unregister_peer(PEERS[p]);
                    }
                    Op::Touch(p) => {
                        index.touch_at(PEERS[p], now);
                    }
                    Op::Reclaim => {
                        for id in index.reclaim_stale_at(timeout, now) {
                            prop_assert!(!index.contains_peer(&id));
                        }
                    }
                }
                index.assert_consistent();

                for hit in index.search_by_name("", 0).files {
                    for id in &hit.peer_ids {
                        prop_assert!(index.contains_peer(id));
                    }
                }
            }
        }
    }
}
