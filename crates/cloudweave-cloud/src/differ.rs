//! Sort-merge rule differ
//!
//! Security group rules, NAT entries and ACL entries are reconciled the same
//! way: sort both sides by canonical key, walk them with two pointers, then
//! apply removals before additions.

use crate::error::{CloudError, Result};
use crate::normalize::{is_representable, normalize_desired};
use crate::secrules::SecurityRule;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::future::Future;
use std::time::Instant;

/// An entry that can be compared by a canonical key.
///
/// The key must exclude provider-assigned identity (external ids,
/// priorities) so that an entry read back from a provider compares equal to
/// the desired entry it was created from.
pub trait CanonicalRule: Clone + Send + Sync {
    fn canonical_key(&self) -> String;
}

impl CanonicalRule for SecurityRule {
    fn canonical_key(&self) -> String {
        SecurityRule::canonical_key(self)
    }
}

/// Changes needed to turn the remote set into the desired set
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDiff<T> {
    pub to_add: Vec<T>,
    pub to_remove: Vec<T>,
}

impl<T> RuleDiff<T> {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    pub fn change_count(&self) -> usize {
        self.to_add.len() + self.to_remove.len()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} to add, {} to remove",
            self.to_add.len(),
            self.to_remove.len()
        )
    }
}

impl<T> Default for RuleDiff<T> {
    fn default() -> Self {
        Self {
            to_add: Vec::new(),
            to_remove: Vec::new(),
        }
    }
}

/// Two-pointer diff over canonical keys.
///
/// Duplicate remote entries beyond the first are scheduled for removal;
/// duplicate desired entries are collapsed.
pub fn diff_rules<T: CanonicalRule>(remote: Vec<T>, desired: Vec<T>) -> RuleDiff<T> {
    let mut remote: Vec<(String, T)> = remote.into_iter().map(|r| (r.canonical_key(), r)).collect();
    let mut desired: Vec<(String, T)> = desired.into_iter().map(|r| (r.canonical_key(), r)).collect();
    remote.sort_by(|a, b| a.0.cmp(&b.0));
    desired.sort_by(|a, b| a.0.cmp(&b.0));
    desired.dedup_by(|a, b| a.0 == b.0);

    let mut diff = RuleDiff::default();
    let mut remote = remote.into_iter().peekable();
    let mut desired = desired.into_iter().peekable();
    loop {
        let order = match (remote.peek(), desired.peek()) {
            (Some((r, _)), Some((d, _))) => r.cmp(d),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Equal => {
                remote.next();
                desired.next();
            }
            Ordering::Less => diff.to_remove.extend(remote.next().map(|(_, r)| r)),
            Ordering::Greater => diff.to_add.extend(desired.next().map(|(_, d)| d)),
        }
    }
    diff
}

/// Diff a security group's remote rules against a desired policy.
///
/// The desired policy is normalized into an allow list first. Remote rules
/// the model cannot represent are left out of the diff entirely, so they
/// are never removed.
pub async fn sync_rule_set<F>(remote_fetch: F, desired: &[SecurityRule]) -> Result<RuleDiff<SecurityRule>>
where
    F: Future<Output = Result<Vec<SecurityRule>>>,
{
    let normalized = normalize_desired(desired)?;
    let remote = remote_fetch.await.map_err(|e| e.context("ListRules"))?;

    let (remote, skipped): (Vec<_>, Vec<_>) = remote.into_iter().partition(is_representable);
    if !skipped.is_empty() {
        tracing::debug!("Leaving {} unrepresentable remote rules untouched", skipped.len());
    }

    let diff = diff_rules(remote, normalized);
    tracing::debug!("Rule diff: {}", diff.summary());
    Ok(diff)
}

/// Split two id sets into `(add, remove, keep)`
pub fn compare_set<T>(current: &[T], desired: &[T]) -> (Vec<T>, Vec<T>, Vec<T>)
where
    T: Ord + Clone,
{
    let mut current = current.to_vec();
    let mut desired = desired.to_vec();
    current.sort();
    current.dedup();
    desired.sort();
    desired.dedup();

    let (mut add, mut remove, mut keep) = (Vec::new(), Vec::new(), Vec::new());
    let (mut i, mut j) = (0, 0);
    while i < current.len() || j < desired.len() {
        if j >= desired.len() || (i < current.len() && current[i] < desired[j]) {
            remove.push(current[i].clone());
            i += 1;
        } else if i >= current.len() || desired[j] < current[i] {
            add.push(desired[j].clone());
            j += 1;
        } else {
            keep.push(current[i].clone());
            i += 1;
            j += 1;
        }
    }
    (add, remove, keep)
}

/// Remote store of entries that can be listed, added and removed one by one
#[async_trait]
pub trait RuleStore<T: CanonicalRule>: Send + Sync {
    async fn list(&self) -> Result<Vec<T>>;

    async fn add(&self, entry: &T) -> Result<()>;

    /// `entry` is the remote entry as listed, external id included
    async fn remove(&self, entry: &T) -> Result<()>;
}

/// Outcome of applying a diff
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplyReport {
    pub removed: usize,
    pub added: usize,
    pub duration_ms: u64,
}

impl ApplyReport {
    pub fn is_noop(&self) -> bool {
        self.removed == 0 && self.added == 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} added, {} removed in {}ms",
            self.added, self.removed, self.duration_ms
        )
    }
}

/// Apply `diff` to `store`: every removal first, then every addition.
///
/// The first failure aborts the sync. Changes made before it stay in place.
pub async fn apply_rule_diff<T, S>(store: &S, diff: &RuleDiff<T>) -> Result<ApplyReport>
where
    T: CanonicalRule,
    S: RuleStore<T> + ?Sized,
{
    let started = Instant::now();
    let mut report = ApplyReport::default();

    for entry in &diff.to_remove {
        let key = entry.canonical_key();
        store
            .remove(entry)
            .await
            .map_err(|e| e.context(format!("RemoveRule({})", key)))?;
        tracing::info!("Removed rule {}", key);
        report.removed += 1;
    }
    for entry in &diff.to_add {
        let key = entry.canonical_key();
        store
            .add(entry)
            .await
            .map_err(|e| e.context(format!("AddRule({})", key)))?;
        tracing::info!("Added rule {}", key);
        report.added += 1;
    }

    report.duration_ms = started.elapsed().as_millis() as u64;
    Ok(report)
}

/// List, diff and apply in one go, for entry kinds without normalization
pub async fn reconcile<T, S>(store: &S, desired: Vec<T>) -> Result<ApplyReport>
where
    T: CanonicalRule,
    S: RuleStore<T> + ?Sized,
{
    let remote = store.list().await.map_err(|e| e.context("ListEntries"))?;
    let diff = diff_rules(remote, desired);
    if diff.is_empty() {
        tracing::debug!("Entries already in sync");
        return Ok(ApplyReport::default());
    }
    tracing::info!("Entry sync: {}", diff.summary());
    apply_rule_diff(store, &diff).await
}

/// Reject desired entries whose keys collide after canonicalization
pub fn ensure_unique_keys<T: CanonicalRule>(entries: &[T]) -> Result<()> {
    let mut keys: Vec<String> = entries.iter().map(CanonicalRule::canonical_key).collect();
    keys.sort();
    match keys.windows(2).find(|pair| pair[0] == pair[1]) {
        Some(pair) => Err(CloudError::DuplicateId(pair[0].clone())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::secrules::Direction;
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    fn rules(lines: &[&str]) -> Vec<SecurityRule> {
        lines.iter().map(|line| line.parse().unwrap()).collect()
    }

    fn key_set(rules: &[SecurityRule]) -> BTreeSet<String> {
        rules.iter().map(SecurityRule::canonical_key).collect()
    }

    /// In-memory store that records the order of calls
    #[derive(Default)]
    struct MemoryStore {
        rules: Mutex<Vec<SecurityRule>>,
        calls: Mutex<Vec<String>>,
        fail_on_remove: Option<String>,
    }

    impl MemoryStore {
        fn with_rules(rules: Vec<SecurityRule>) -> Self {
            Self {
                rules: Mutex::new(rules),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl RuleStore<SecurityRule> for MemoryStore {
        async fn list(&self) -> Result<Vec<SecurityRule>> {
            Ok(self.rules.lock().unwrap().clone())
        }

        async fn add(&self, entry: &SecurityRule) -> Result<()> {
            self.calls.lock().unwrap().push(format!("add {}", entry));
            self.rules.lock().unwrap().push(entry.clone());
            Ok(())
        }

        async fn remove(&self, entry: &SecurityRule) -> Result<()> {
            if self.fail_on_remove.as_deref() == Some(entry.to_string().as_str()) {
                return Err(CloudError::ApiError("rule is locked".to_string()));
            }
            self.calls.lock().unwrap().push(format!("remove {}", entry));
            let mut rules = self.rules.lock().unwrap();
            if let Some(pos) = rules.iter().position(|r| r == entry) {
                rules.remove(pos);
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_sync_of_identical_sets_is_empty() {
        let desired = rules(&["in:allow tcp 22 0.0.0.0/0", "in:allow tcp 443 0.0.0.0/0"]);
        let remote = normalize_desired(&desired).unwrap();

        let diff = sync_rule_set(async { Ok(remote) }, &desired).await.unwrap();
        assert!(diff.is_empty());
    }

    #[tokio::test]
    async fn test_adding_one_port() {
        let remote = rules(&["in:allow tcp 22 0.0.0.0/0", "out:allow any any 0.0.0.0/0"]);
        let desired = rules(&["in:allow tcp 22 0.0.0.0/0", "in:allow tcp 443 0.0.0.0/0"]);

        let diff = sync_rule_set(async { Ok(remote) }, &desired).await.unwrap();
        assert_eq!(diff.to_remove, Vec::<SecurityRule>::new());
        assert_eq!(diff.to_add, rules(&["in:allow tcp 443 0.0.0.0/0"]));
        assert_eq!(diff.summary(), "1 to add, 0 to remove");
    }

    #[tokio::test]
    async fn test_applying_diff_converges() {
        let remote = rules(&[
            "in:allow tcp 22 0.0.0.0/0",
            "in:allow tcp 8080 10.0.0.0/8",
            "in:allow tcp 8080 10.0.0.0/8",
            "in:deny udp 53 0.0.0.0/0",
        ]);
        let desired = rules(&[
            "in:allow tcp 22 0.0.0.0/0",
            "in:allow udp 53 192.168.0.0/16",
            "out:allow tcp 443 0.0.0.0/0",
        ]);
        let store = MemoryStore::with_rules(remote.clone());

        let diff = sync_rule_set(async { Ok(remote) }, &desired).await.unwrap();
        apply_rule_diff(&store, &diff).await.unwrap();

        let result = store.list().await.unwrap();
        assert_eq!(key_set(&result), key_set(&normalize_desired(&desired).unwrap()));
        assert_eq!(result.len(), 3);
    }

    #[tokio::test]
    async fn test_removals_run_before_additions() {
        let remote = rules(&["in:allow tcp 80 0.0.0.0/0", "out:allow any any 0.0.0.0/0"]);
        let desired = rules(&["in:allow tcp 443 0.0.0.0/0"]);
        let store = MemoryStore::with_rules(remote.clone());

        let diff = sync_rule_set(async { Ok(remote) }, &desired).await.unwrap();
        let report = apply_rule_diff(&store, &diff).await.unwrap();

        let calls = store.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec!["remove in:allow tcp 80 0.0.0.0/0", "add in:allow tcp 443 0.0.0.0/0"]
        );
        assert_eq!(report.added, 1);
        assert_eq!(report.removed, 1);
    }

    #[tokio::test]
    async fn test_failed_removal_aborts_before_additions() {
        let remote = rules(&["in:allow tcp 80 0.0.0.0/0", "out:allow any any 0.0.0.0/0"]);
        let desired = rules(&["in:allow tcp 443 0.0.0.0/0"]);
        let store = MemoryStore {
            rules: Mutex::new(remote.clone()),
            calls: Mutex::new(Vec::new()),
            fail_on_remove: Some("in:allow tcp 80 0.0.0.0/0".to_string()),
        };

        let diff = sync_rule_set(async { Ok(remote) }, &desired).await.unwrap();
        let err = apply_rule_diff(&store, &diff).await.unwrap_err();

        assert!(err.to_string().starts_with("RemoveRule(in tcp 80 0.0.0.0/0 allow)"));
        assert!(store.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrepresentable_remote_rules_are_kept() {
        let remote = rules(&[
            "in:allow tcp 22 0.0.0.0/0",
            "in:allow any any sg:sg-peer",
            "in:allow tcp 22 ::/0",
            "out:allow any any 0.0.0.0/0",
        ]);
        let desired = rules(&["in:allow tcp 22 0.0.0.0/0"]);

        let diff = sync_rule_set(async { Ok(remote) }, &desired).await.unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_rules_is_canonical() {
        let remote = vec![
            "in:allow tcp 22 10.1.1.1/8"
                .parse::<SecurityRule>()
                .unwrap()
                .with_external_id("r-1"),
        ];
        let desired = rules(&["in:allow tcp 22 10.0.0.0/8"]);
        assert!(diff_rules(remote, desired).is_empty());
    }

    #[test]
    fn test_compare_set() {
        let current = vec!["sg-a".to_string(), "sg-b".to_string()];
        let desired = vec!["sg-b".to_string(), "sg-c".to_string()];

        let (add, remove, keep) = compare_set(&current, &desired);
        assert_eq!(add, vec!["sg-c".to_string()]);
        assert_eq!(remove, vec!["sg-a".to_string()]);
        assert_eq!(keep, vec!["sg-b".to_string()]);
    }

    #[test]
    fn test_ensure_unique_keys() {
        let ok = rules(&["in:allow tcp 22 0.0.0.0/0", "out:allow tcp 22 0.0.0.0/0"]);
        assert!(ensure_unique_keys(&ok).is_ok());
        assert!(ok.iter().any(|r| r.direction == Direction::Egress));

        let dup = rules(&["in:allow tcp 22 0.0.0.0/0", "in:allow tcp 22 0.0.0.0/32"]);
        assert!(ensure_unique_keys(&dup).is_ok());
        let dup = rules(&["in:allow tcp 22 10.0.0.1/8", "in:allow tcp 22 10.0.0.0/8"]);
        assert!(matches!(
            ensure_unique_keys(&dup),
            Err(CloudError::DuplicateId(_))
        ));
    }
}
