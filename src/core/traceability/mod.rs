// Evidence trail from learning artifacts back to code
pub mod evidence;
pub mod ledger;
pub mod store;

pub use evidence::{ArtifactKind, ArtifactTrace, CodeEvidence, TraceStatus, TraceabilityLink};
pub use ledger::{ArtifactStatusRecord, LedgerSnapshot, TraceabilityLedger, CODE_INDEX_KEY, EVIDENCE_KEY, STATUS_KEY};
pub use store::{JsonFileStore, MemoryStore, SessionStore};
