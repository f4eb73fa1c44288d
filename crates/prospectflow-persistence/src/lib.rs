//! ProspectFlow Persistence Layer
//!
//! Keyed repositories for the workflow orchestration aggregates (sessions,
//! progress records, persisted workflow states and error ledgers). Every
//! aggregate is stored under its session id, so callers can serialize
//! access per key and run different sessions in parallel.
//!
//! ## Backends
//!
//! - **In-Memory**: thread-safe maps for tests and single-process runs
//! - **JSON files**: one document per key on disk, survives restarts
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────┐
//! │                   prospectflow-workflows                   │
//! │  SessionStore  ProgressTracker  StateManager  ErrorLedger  │
//! └───────────────────────────────────────────────────────────┘
//!                             │ Arc<dyn Repository<T>>
//!                             ▼
//! ┌───────────────────────────────────────────────────────────┐
//! │  memory/ InMemoryRepository   │  file/ JsonFileRepository   │
//! └───────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use prospectflow_persistence::{InMemoryRepository, Repository};
//!
//! # tokio_test::block_on(async {
//! let repo: InMemoryRepository<String> = InMemoryRepository::new();
//! repo.save("session-1", &"hello".to_string()).await.unwrap();
//! assert_eq!(repo.find("session-1").await.unwrap(), Some("hello".to_string()));
//! # });
//! ```

pub mod error;
pub mod file;
pub mod memory;
pub mod repository;

pub use error::{PersistenceError, PersistenceResult};
pub use file::JsonFileRepository;
pub use memory::InMemoryRepository;
pub use repository::{validate_key, Repository};
