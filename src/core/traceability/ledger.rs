//! The traceability ledger: artifact-to-code links and their reverse index.
//!
//! All mutations take the write lock, so `register`, `invalidate`, `revoke` and
//! `check_drift` are serialized; lookups share the read lock. Links are only
//! ever flagged, never removed, so an artifact's history stays auditable.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{EvidenceFailure, Result, TrailError};
use super::super::parser::calculate_hash;
use super::super::source::SourceProvider;
use super::evidence::{ArtifactKind, ArtifactTrace, CodeEvidence, TraceStatus, TraceabilityLink};
use super::store::SessionStore;

pub const EVIDENCE_KEY: &str = "traceability.evidence";
pub const CODE_INDEX_KEY: &str = "traceability.code_index";
pub const STATUS_KEY: &str = "traceability.status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactStatusRecord {
    pub kind: ArtifactKind,
    /// Aggregate status was `valid` when last checked
    pub valid: bool,
    pub last_validated: DateTime<Utc>,
    #[serde(default)]
    pub revoked: bool,
}

/// Serializable ledger state: the three persisted mappings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// artifact id -> links
    pub evidence: BTreeMap<String, Vec<TraceabilityLink>>,
    /// "file:line" -> artifact ids
    pub code_index: BTreeMap<String, Vec<String>>,
    /// artifact id -> status record
    pub status: BTreeMap<String, ArtifactStatusRecord>,
}

#[derive(Debug, Clone)]
struct ArtifactRecord {
    kind: ArtifactKind,
    revoked: bool,
    last_validated: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LedgerState {
    links: BTreeMap<String, Vec<TraceabilityLink>>,
    code_index: BTreeMap<(String, usize), BTreeSet<String>>,
    artifacts: BTreeMap<String, ArtifactRecord>,
    next_link: u64,
}

impl LedgerState {
    fn status_of(&self, artifact_id: &str) -> TraceStatus {
        let Some(record) = self.artifacts.get(artifact_id) else {
            return TraceStatus::Invalid;
        };
        let links: Vec<&TraceabilityLink> = self
            .links
            .get(artifact_id)
            .map(|links| links.iter().filter(|link| !link.superseded).collect())
            .unwrap_or_default();

        if record.revoked || links.is_empty() {
            TraceStatus::Invalid
        } else if links.iter().any(|link| !link.valid) {
            TraceStatus::Outdated
        } else {
            TraceStatus::Valid
        }
    }

    fn index_link(&mut self, link: &TraceabilityLink) {
        for line in link.evidence.lines() {
            self.code_index
                .entry((link.evidence.file_path.clone(), line))
                .or_default()
                .insert(link.artifact_id.clone());
        }
    }

    /// Point the reverse index at the artifact's current links only
    fn reindex_artifact(&mut self, artifact_id: &str) {
        self.code_index.retain(|_, ids| {
            ids.remove(artifact_id);
            !ids.is_empty()
        });
        let current: Vec<TraceabilityLink> = self
            .links
            .get(artifact_id)
            .map(|links| links.iter().filter(|link| !link.superseded).cloned().collect())
            .unwrap_or_default();
        for link in &current {
            self.index_link(link);
        }
    }

    /// Flag links matching `stale`; returns the artifacts that lost a valid link
    fn flag_links<F>(&mut self, mut stale: F) -> Vec<String>
    where
        F: FnMut(&TraceabilityLink) -> Option<String>,
    {
        let now = Utc::now();
        let mut affected = BTreeSet::new();

        for (artifact_id, links) in self.links.iter_mut() {
            for link in links.iter_mut().filter(|link| link.valid && !link.superseded) {
                if let Some(reason) = stale(link) {
                    link.valid = false;
                    link.stale_reason = Some(reason);
                    affected.insert(artifact_id.clone());
                }
            }
        }
        for artifact_id in &affected {
            if let Some(record) = self.artifacts.get_mut(artifact_id) {
                record.last_validated = now;
            }
        }

        affected.into_iter().collect()
    }
}

pub struct TraceabilityLedger {
    source: Arc<dyn SourceProvider>,
    state: RwLock<LedgerState>,
}

impl TraceabilityLedger {
    pub fn new(source: Arc<dyn SourceProvider>) -> Self {
        Self {
            source,
            state: RwLock::new(LedgerState {
                next_link: 1,
                ..LedgerState::default()
            }),
        }
    }

    /// Verify every piece of evidence, then link all of it to the artifact
    pub fn register(
        &self,
        artifact_id: &str,
        artifact_kind: ArtifactKind,
        evidence: Vec<CodeEvidence>,
    ) -> Result<ArtifactTrace> {
        let reject = |failure: EvidenceFailure| TrailError::Evidence {
            artifact_id: artifact_id.to_string(),
            failure,
        };

        if evidence.is_empty() {
            return Err(reject(EvidenceFailure::EmptyEvidence));
        }

        // Verification reads sources, so it runs before the lock is taken
        let mut verified = Vec::with_capacity(evidence.len());
        for mut item in evidence {
            item.check_range().map_err(&reject)?;
            let content = self.source.read_source(&item.file_path).map_err(|_| {
                reject(EvidenceFailure::FileMissing {
                    file_path: item.file_path.clone(),
                })
            })?;
            let backing = item.backing_text(&content).map_err(&reject)?;
            if item.snippet.is_empty() {
                item.snippet = backing.clone();
            }
            verified.push((item, calculate_hash(&backing)));
        }

        let now = Utc::now();
        let mut state = self.state.write();
        let previous: Vec<TraceabilityLink> = state
            .links
            .get(artifact_id)
            .map(|links| links.iter().filter(|link| !link.superseded).cloned().collect())
            .unwrap_or_default();

        // Unchanged evidence keeps its link; everything else gets a fresh one
        let mut current_ids = BTreeSet::new();
        let mut fresh: Vec<TraceabilityLink> = Vec::new();
        for (item, content_hash) in verified {
            if let Some(kept) = previous
                .iter()
                .find(|link| link.valid && link.content_hash == content_hash && same_lines(&link.evidence, &item))
            {
                current_ids.insert(kept.id.clone());
                continue;
            }
            if fresh.iter().any(|link| same_lines(&link.evidence, &item)) {
                continue;
            }

            let link = TraceabilityLink {
                id: format!("link-{:06}", state.next_link),
                artifact_id: artifact_id.to_string(),
                artifact_kind,
                evidence: item,
                created_at: now,
                valid: true,
                content_hash,
                stale_reason: None,
                superseded: false,
            };
            state.next_link += 1;
            current_ids.insert(link.id.clone());
            fresh.push(link);
        }

        let links = state.links.entry(artifact_id.to_string()).or_default();
        let mut superseded = 0;
        for link in links.iter_mut().filter(|link| !link.superseded && !current_ids.contains(&link.id)) {
            link.superseded = true;
            superseded += 1;
        }
        links.extend(fresh);
        state.reindex_artifact(artifact_id);
        if superseded > 0 {
            debug!("Superseded {} earlier links of {}", superseded, artifact_id);
        }

        state.artifacts.insert(
            artifact_id.to_string(),
            ArtifactRecord {
                kind: artifact_kind,
                revoked: false,
                last_validated: now,
            },
        );
        debug!("Registered {} ({})", artifact_id, artifact_kind);

        Ok(Self::trace_from(&state, artifact_id))
    }

    pub fn get_trace(&self, artifact_id: &str) -> ArtifactTrace {
        Self::trace_from(&self.state.read(), artifact_id)
    }

    fn trace_from(state: &LedgerState, artifact_id: &str) -> ArtifactTrace {
        ArtifactTrace {
            artifact_id: artifact_id.to_string(),
            artifact_kind: state.artifacts.get(artifact_id).map(|r| r.kind),
            links: state.links.get(artifact_id).cloned().unwrap_or_default(),
            status: state.status_of(artifact_id),
        }
    }

    /// Flag every valid link into `file_path`; returns the affected artifacts
    pub fn invalidate(&self, file_path: &str) -> Vec<String> {
        let affected = self.state.write().flag_links(|link| {
            (link.evidence.file_path == file_path).then(|| format!("{} was invalidated", file_path))
        });
        if !affected.is_empty() {
            info!("Invalidated {} artifacts referencing {}", affected.len(), file_path);
        }
        affected
    }

    /// Artifacts referencing `file_path`, at `line` or anywhere in the file
    pub fn lookup_by_code(&self, file_path: &str, line: Option<usize>) -> Vec<String> {
        let state = self.state.read();
        let mut found = BTreeSet::new();

        match line {
            Some(line) => {
                if let Some(ids) = state.code_index.get(&(file_path.to_string(), line)) {
                    found.extend(ids.iter().cloned());
                }
            }
            None => {
                let range = (file_path.to_string(), 0)..=(file_path.to_string(), usize::MAX);
                for ids in state.code_index.range(range).map(|(_, ids)| ids) {
                    found.extend(ids.iter().cloned());
                }
            }
        }

        found.into_iter().collect()
    }

    /// Re-verify every valid link against current source
    pub fn check_drift(&self) -> Vec<String> {
        let source = Arc::clone(&self.source);
        let mut contents: BTreeMap<String, Option<String>> = BTreeMap::new();

        let affected = self.state.write().flag_links(|link| {
            let file_path = &link.evidence.file_path;
            let content = contents
                .entry(file_path.clone())
                .or_insert_with(|| source.read_source(file_path).ok());

            let Some(content) = content.as_deref() else {
                return Some(format!("{} is no longer present", file_path));
            };
            match link.evidence.backing_text(content) {
                Err(failure) => Some(failure.to_string()),
                Ok(text) if calculate_hash(&text) != link.content_hash => {
                    Some(format!("lines {}-{} of {} changed", link.evidence.line_start, link.evidence.line_end, file_path))
                }
                Ok(_) => None,
            }
        });

        let now = Utc::now();
        let mut state = self.state.write();
        for record in state.artifacts.values_mut() {
            record.last_validated = now;
        }
        drop(state);

        affected
    }

    /// Mark an artifact invalid without touching its links
    pub fn revoke(&self, artifact_id: &str) -> bool {
        let mut state = self.state.write();
        match state.artifacts.get_mut(artifact_id) {
            Some(record) => {
                record.revoked = true;
                true
            }
            None => false,
        }
    }

    pub fn artifact_ids(&self) -> Vec<String> {
        self.state.read().artifacts.keys().cloned().collect()
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        let state = self.state.read();

        let code_index = state
            .code_index
            .iter()
            .map(|((file, line), ids)| (format!("{}:{}", file, line), ids.iter().cloned().collect()))
            .collect();

        let status = state
            .artifacts
            .iter()
            .map(|(id, record)| {
                (
                    id.clone(),
                    ArtifactStatusRecord {
                        kind: record.kind,
                        valid: state.status_of(id) == TraceStatus::Valid,
                        last_validated: record.last_validated,
                        revoked: record.revoked,
                    },
                )
            })
            .collect();

        LedgerSnapshot {
            evidence: state.links.clone(),
            code_index,
            status,
        }
    }

    /// Replace the ledger contents with a snapshot
    pub fn restore(&self, snapshot: LedgerSnapshot) -> Result<()> {
        let mut restored = LedgerState {
            next_link: 1,
            ..LedgerState::default()
        };

        for (key, ids) in snapshot.code_index {
            let (file, line) = key
                .rsplit_once(':')
                .and_then(|(file, line)| line.parse::<usize>().ok().map(|line| (file.to_string(), line)))
                .ok_or_else(|| TrailError::Store(format!("Malformed code index key: {}", key)))?;
            restored.code_index.entry((file, line)).or_default().extend(ids);
        }

        for (id, record) in snapshot.status {
            restored.artifacts.insert(
                id,
                ArtifactRecord {
                    kind: record.kind,
                    revoked: record.revoked,
                    last_validated: record.last_validated,
                },
            );
        }

        let highest = snapshot
            .evidence
            .values()
            .flatten()
            .filter_map(|link| link.id.strip_prefix("link-").and_then(|n| n.parse::<u64>().ok()))
            .max()
            .unwrap_or(0);
        restored.next_link = highest + 1;
        restored.links = snapshot.evidence;

        *self.state.write() = restored;
        Ok(())
    }

    pub fn save(&self, store: &dyn SessionStore) -> Result<()> {
        let snapshot = self.snapshot();
        store.put(EVIDENCE_KEY, serde_json::to_value(&snapshot.evidence)?)?;
        store.put(CODE_INDEX_KEY, serde_json::to_value(&snapshot.code_index)?)?;
        store.put(STATUS_KEY, serde_json::to_value(&snapshot.status)?)?;
        Ok(())
    }

    /// Restore from a store; missing keys mean an empty ledger
    pub fn load(&self, store: &dyn SessionStore) -> Result<()> {
        let mut snapshot = LedgerSnapshot::default();
        if let Some(value) = store.get(EVIDENCE_KEY)? {
            snapshot.evidence = serde_json::from_value(value)?;
        }
        if let Some(value) = store.get(CODE_INDEX_KEY)? {
            snapshot.code_index = serde_json::from_value(value)?;
        }
        if let Some(value) = store.get(STATUS_KEY)? {
            snapshot.status = serde_json::from_value(value)?;
        }
        self.restore(snapshot)
    }
}

fn same_lines(a: &CodeEvidence, b: &CodeEvidence) -> bool {
    a.file_path == b.file_path && a.line_start == b.line_start && a.line_end == b.line_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::source::MemorySource;
    use crate::core::traceability::store::MemoryStore;

    fn source() -> Arc<MemorySource> {
        Arc::new(
            MemorySource::new()
                .with_file("a.py", "import b\ndef main(payload):\n    return b.process(payload)\n")
                .with_file("b.py", "def process(items):\n    return sorted(items)\n"),
        )
    }

    fn evidence(file: &str, start: usize, end: usize) -> CodeEvidence {
        CodeEvidence::new(file, start, end, "", "test evidence")
    }

    #[test]
    fn test_register_requires_evidence() {
        let ledger = TraceabilityLedger::new(source());

        let err = ledger.register("explain-1", ArtifactKind::Explanation, vec![]).unwrap_err();
        assert_eq!(err.reason_code(), "evidence_empty");
        assert_eq!(ledger.get_trace("explain-1").status, TraceStatus::Invalid);
        assert!(ledger.artifact_ids().is_empty());
    }

    #[test]
    fn test_register_rejects_unverifiable_evidence_atomically() {
        let ledger = TraceabilityLedger::new(source());

        let err = ledger
            .register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3), evidence("b.py", 2, 9)])
            .unwrap_err();
        match err {
            TrailError::Evidence { artifact_id, failure } => {
                assert_eq!(artifact_id, "flow-1");
                assert_eq!(failure.reason_code(), "evidence_out_of_bounds");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ledger.lookup_by_code("a.py", Some(3)).is_empty());

        let missing = ledger
            .register("flow-1", ArtifactKind::DataFlow, vec![evidence("gone.py", 1, 1)])
            .unwrap_err();
        assert_eq!(missing.reason_code(), "evidence_file_missing");
    }

    #[test]
    fn test_register_and_trace() {
        let ledger = TraceabilityLedger::new(source());

        let trace = ledger
            .register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3), evidence("b.py", 1, 2)])
            .unwrap();

        assert_eq!(trace.status, TraceStatus::Valid);
        assert_eq!(trace.links.len(), 2);
        assert_eq!(trace.links[0].id, "link-000001");
        assert_eq!(trace.links[0].evidence.snippet, "    return b.process(payload)");
        assert_eq!(ledger.get_trace("flow-1"), trace);

        assert_eq!(ledger.lookup_by_code("b.py", Some(2)), vec!["flow-1".to_string()]);
        assert_eq!(ledger.lookup_by_code("a.py", None), vec!["flow-1".to_string()]);
        assert!(ledger.lookup_by_code("a.py", Some(1)).is_empty());
    }

    #[test]
    fn test_invalidate_marks_only_affected_artifacts() {
        let ledger = TraceabilityLedger::new(source());
        ledger.register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3), evidence("b.py", 1, 1)]).unwrap();
        ledger.register("pattern-1", ArtifactKind::Pattern, vec![evidence("a.py", 1, 1)]).unwrap();

        assert_eq!(ledger.invalidate("b.py"), vec!["flow-1".to_string()]);
        assert_eq!(ledger.get_trace("flow-1").status, TraceStatus::Outdated);
        assert_eq!(ledger.get_trace("pattern-1").status, TraceStatus::Valid);

        // Already flagged links are not reported twice; links are kept
        assert!(ledger.invalidate("b.py").is_empty());
        assert!(ledger.invalidate("unknown.py").is_empty());
        assert_eq!(ledger.get_trace("flow-1").links.len(), 2);

        ledger.invalidate("a.py");
        assert_eq!(ledger.get_trace("pattern-1").status, TraceStatus::Outdated);
    }

    #[test]
    fn test_reregistering_supersedes_stale_links() {
        let ledger = TraceabilityLedger::new(source());
        let first = ledger
            .register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3), evidence("b.py", 1, 1)])
            .unwrap();
        ledger.invalidate("a.py");
        assert_eq!(ledger.get_trace("flow-1").status, TraceStatus::Outdated);

        let second = ledger
            .register(
                "flow-1",
                ArtifactKind::DataFlow,
                vec![evidence("a.py", 3, 3), evidence("b.py", 1, 1), evidence("b.py", 1, 1)],
            )
            .unwrap();
        assert_eq!(second.status, TraceStatus::Valid);
        assert_eq!(second.links.len(), 3);
        let current: Vec<&str> = second
            .links
            .iter()
            .filter(|link| !link.superseded)
            .map(|link| link.id.as_str())
            .collect();
        assert_eq!(current, vec![first.links[1].id.as_str(), "link-000003"]);
        assert!(second.links[0].superseded);

        // Same evidence again: nothing new is recorded
        let third = ledger
            .register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3), evidence("b.py", 1, 1)])
            .unwrap();
        assert_eq!(third.links.len(), 3);
        assert_eq!(third.status, TraceStatus::Valid);

        // Dropped evidence leaves the reverse index; superseded links ignore invalidation
        ledger.register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3)]).unwrap();
        assert!(ledger.lookup_by_code("b.py", None).is_empty());
        assert_eq!(ledger.lookup_by_code("a.py", Some(3)), vec!["flow-1".to_string()]);
        assert!(ledger.invalidate("b.py").is_empty());
        assert_eq!(ledger.get_trace("flow-1").status, TraceStatus::Valid);
    }

    #[test]
    fn test_check_drift_detects_edits_and_deletions() {
        let source = source();
        let ledger = TraceabilityLedger::new(source.clone());
        ledger.register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 3, 3)]).unwrap();
        ledger.register("path-1", ArtifactKind::ExecutionPath, vec![evidence("b.py", 1, 1)]).unwrap();

        assert!(ledger.check_drift().is_empty());

        source.write("a.py", "import b\ndef main(payload):\n    return b.process(payload, strict=True)\n");
        source.remove("b.py");

        assert_eq!(ledger.check_drift(), vec!["flow-1".to_string(), "path-1".to_string()]);
        let trace = ledger.get_trace("path-1");
        assert_eq!(trace.status, TraceStatus::Outdated);
        assert_eq!(trace.links[0].stale_reason.as_deref(), Some("b.py is no longer present"));
    }

    #[test]
    fn test_revoke() {
        let ledger = TraceabilityLedger::new(source());
        ledger.register("explain-1", ArtifactKind::Explanation, vec![evidence("a.py", 1, 2)]).unwrap();

        assert!(ledger.revoke("explain-1"));
        assert!(!ledger.revoke("never-registered"));
        assert_eq!(ledger.get_trace("explain-1").status, TraceStatus::Invalid);
        assert_eq!(ledger.get_trace("explain-1").links.len(), 1);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let store = MemoryStore::new();
        let ledger = TraceabilityLedger::new(source());
        ledger.register("flow-1", ArtifactKind::DataFlow, vec![evidence("a.py", 2, 3)]).unwrap();
        ledger.register("pattern-1", ArtifactKind::Pattern, vec![evidence("b.py", 1, 1)]).unwrap();
        ledger.invalidate("b.py");
        ledger.save(&store).unwrap();

        assert_eq!(
            store.keys(),
            vec![CODE_INDEX_KEY.to_string(), EVIDENCE_KEY.to_string(), STATUS_KEY.to_string()]
        );

        let reloaded = TraceabilityLedger::new(source());
        reloaded.load(&store).unwrap();

        assert_eq!(reloaded.snapshot(), ledger.snapshot());
        assert_eq!(reloaded.get_trace("pattern-1").status, TraceStatus::Outdated);
        assert_eq!(reloaded.lookup_by_code("a.py", Some(2)), vec!["flow-1".to_string()]);

        let next = reloaded
            .register("explain-1", ArtifactKind::Explanation, vec![evidence("a.py", 1, 1)])
            .unwrap();
        assert_eq!(next.links[0].id, "link-000003");
    }
}
