//! Immutable, swappable materialization of one cache partition.

use crate::db::LoadedPartition;
use crate::domain::{LeaderboardScope, PartitionKey, ScopeBoard};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Every scope of one partition as of a committed run.
///
/// Readers hold an `Arc` to a snapshot; a new run swaps in a new one, so a
/// reader never observes a half-written partition.
#[derive(Debug, Clone)]
pub struct PartitionSnapshot {
    pub key: PartitionKey,
    /// In-process run version that produced it (0 when loaded from storage).
    pub version: u64,
    pub run_id: String,
    pub digest: String,
    pub scopes: BTreeMap<LeaderboardScope, ScopeBoard>,
}

impl PartitionSnapshot {
    pub fn new(
        key: PartitionKey,
        version: u64,
        run_id: String,
        scopes: BTreeMap<LeaderboardScope, ScopeBoard>,
    ) -> Self {
        let digest = partition_digest(&key, &scopes);
        Self {
            key,
            version,
            run_id,
            digest,
            scopes,
        }
    }

    /// Rebuild a snapshot from persisted rows.
    pub fn from_loaded(key: PartitionKey, loaded: LoadedPartition) -> Self {
        Self {
            key,
            version: 0,
            run_id: loaded.run.run_id,
            digest: loaded.run.digest,
            scopes: loaded.scopes,
        }
    }

    pub fn board(&self, scope: &LeaderboardScope) -> Option<&ScopeBoard> {
        self.scopes.get(scope)
    }

    pub fn entry_count(&self) -> usize {
        self.scopes.values().map(|b| b.entries.len()).sum()
    }
}

fn hash_var(hasher: &mut Sha256, data: &str) {
    hasher.update((data.len() as u32).to_le_bytes());
    hasher.update(data.as_bytes());
}

/// SHA-256 over the canonical rows of a partition, hex-encoded.
///
/// Scopes are visited in key order and rows in rank order, with points and
/// stats in canonical decimal form, so equal inputs give equal digests.
pub fn partition_digest(key: &PartitionKey, scopes: &BTreeMap<LeaderboardScope, ScopeBoard>) -> String {
    let mut hasher = Sha256::new();
    hash_var(&mut hasher, &key.to_string());

    for (scope, board) in scopes {
        hash_var(&mut hasher, &scope.to_string());
        hasher.update((board.entries.len() as u64).to_le_bytes());
        for entry in &board.entries {
            hasher.update(entry.rank.to_le_bytes());
            hash_var(&mut hasher, entry.account_id.as_str());
            hash_var(&mut hasher, &entry.points.to_canonical_string());
        }
        hasher.update(board.stats.total_accounts.to_le_bytes());
        hash_var(&mut hasher, &board.stats.median.to_canonical_string());
        hash_var(&mut hasher, &board.stats.average.to_canonical_string());
    }

    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, Decimal, SeasonId, WeekId};
    use crate::engine::{rank_scope, scope_stats};

    fn scopes(points: i64) -> BTreeMap<LeaderboardScope, ScopeBoard> {
        let scope = LeaderboardScope::week(SeasonId::new("s1"), WeekId::new("w1"));
        let entries = rank_scope(
            &scope,
            vec![
                (AccountId::new("a"), Decimal::from(points)),
                (AccountId::new("b"), Decimal::from(7)),
            ],
        );
        let stats = scope_stats(&entries);
        let mut map = BTreeMap::new();
        map.insert(scope, ScopeBoard { entries, stats });
        map
    }

    fn key() -> PartitionKey {
        PartitionKey::week(SeasonId::new("s1"), WeekId::new("w1"))
    }

    #[test]
    fn test_digest_is_deterministic() {
        assert_eq!(
            partition_digest(&key(), &scopes(10)),
            partition_digest(&key(), &scopes(10))
        );
        assert_eq!(partition_digest(&key(), &scopes(10)).len(), 64);
    }

    #[test]
    fn test_digest_changes_with_points() {
        assert_ne!(
            partition_digest(&key(), &scopes(10)),
            partition_digest(&key(), &scopes(11))
        );
    }

    #[test]
    fn test_digest_ignores_decimal_scale() {
        let mut scaled = scopes(10);
        for board in scaled.values_mut() {
            for entry in &mut board.entries {
                if entry.account_id.as_str() == "a" {
                    entry.points = Decimal::from_str_canonical("10.000").unwrap();
                }
            }
        }
        assert_eq!(
            partition_digest(&key(), &scopes(10)),
            partition_digest(&key(), &scaled)
        );
    }

    #[test]
    fn test_entry_count() {
        let snapshot = PartitionSnapshot::new(key(), 3, "run".to_string(), scopes(10));
        assert_eq!(snapshot.entry_count(), 2);
        assert_eq!(snapshot.version, 3);
        assert!(snapshot.board(&key().root_scope()).is_some());
    }
}
