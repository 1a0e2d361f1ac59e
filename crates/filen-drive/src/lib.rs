//! filen-drive: the encrypted, resumable transfer core
//!
//! Layered as:
//!   - `cache` + `resolver`: human paths to backend identifiers, with a
//!     TTL/LRU-bounded directory cache
//!   - `transfer`: one file's chunked upload/download with streaming hash,
//!     resume, progress, and cooperative cancellation
//!   - `journal` + `batch`: crash-safe batch state and the orchestrator
//!     that enumerates work, applies filters and conflict policy, and
//!     drives the engine task by task
//!
//! Everything runs against the `filen_api::Backend` trait, so the whole
//! pipeline is exercised in tests over the in-memory backend.

pub mod batch;
pub mod cache;
pub mod filter;
pub mod journal;
pub mod resolver;
pub mod transfer;

pub use batch::{BatchOptions, BatchSummary, ConflictPolicy, Orchestrator};
pub use filter::PathFilter;
pub use journal::{batch_id, BatchJournal, JournalStore, Operation, Task, TaskStatus};
pub use resolver::{Resolved, Resolver};
pub use transfer::{CancelFlag, ProgressFn, TransferEngine, TransferOutcome, TransferState};
