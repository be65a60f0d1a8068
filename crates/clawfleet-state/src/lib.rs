//! clawfleet-state — durable instance records.
//!
//! Each instance is one `<name>.env` file of `KEY=VALUE` lines under the
//! store directory. The file is both the persisted record and the
//! interchange format handed to the runtime (the same keys become the
//! container environment).
//!
//! # Layout
//!
//! ```text
//! <home>/instances/
//!   ├── .create.lock      exclusive lock held while allocating + persisting
//!   ├── admin.env
//!   └── user-001.env
//! ```
//!
//! Records are written to a temp file, synced, then hard-linked into
//! place. A reader never sees a partial record and an existing record is
//! never overwritten.

pub mod envfile;
pub mod error;
pub mod store;

pub use error::{StateError, StateResult};
pub use store::RecordStore;
