//! Deferred, composable MongoDB operations
//!
//! Database calls are described up front as [`Operation`] values, bound to a
//! database with [`with_connection`], and executed as lazy [`Deferred`]
//! computations that compose with `map`, `chain`, `chain_rej` and `fold`.
//!
//! # Features
//! - Nothing touches the server until a deferred computation is run
//! - One result shape per operation kind, whatever the backend reports
//! - Failures carry the collection, query, projection and payload involved
//! - Bare update documents are wrapped in `$set` instead of replacing documents
//! - An in-memory store for tests and local tooling
//!
//! ```no_run
//! use bson::doc;
//! use mongo_executer::{build_find, build_insert, connect, with_connection};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = connect("localhost:27017").await?;
//! let executer = with_connection(&client, Some("app"))?;
//!
//! let insert = build_insert("conversations", doc! { "_id": "a1", "name": "X" });
//! let find = build_find("conversations", doc! { "_id": "a1" }, None, None, None);
//!
//! let outcome = executer
//!     .execute(&insert)
//!     .and(executer.execute(&find))
//!     .fold(Err, Ok)
//!     .value()
//!     .await;
//! match outcome {
//!     Ok(found) => println!("found {}", found),
//!     Err(descriptor) => eprintln!("failed: {}", descriptor.to_json()),
//! }
//! # Ok(())
//! # }
//! ```

pub mod change;
pub mod connection;
pub mod deferred;
pub mod descriptor;
pub mod diagnostics;
pub mod executer;
pub mod memory;
pub mod operation;
pub mod outcome;
pub mod query;
pub mod session;
pub mod validation;

pub use change::{normalize_change, NormalizedChange, RECOGNIZED_MODIFIERS};
pub use connection::{connect, connect_with_uri, disconnect, ConnectOptions, Connection};
pub use deferred::{Callback, Deferred};
pub use descriptor::{ErrorDescriptor, OperationContext};
pub use diagnostics::{Diagnostic, DiagnosticsSink, RecordingDiagnostics, TracingDiagnostics};
pub use executer::{with_connection, Executer, Outcome};
pub use memory::{MemoryClient, MemoryDatabase};
pub use mongo_executer_common::{ExecuterError, Result};
pub use operation::{
    build_aggregate, build_delete_one, build_find, build_insert, build_push, build_update,
    build_update_many, build_update_one, build_upsert, AggregateStages, InsertPayload, Operation,
    UpdateScope,
};
pub use outcome::{into_documents, RawOutcome};
pub use query::FindBuilder;
pub use session::{FindParams, Session};
pub use validation::ValidatedCollectionName;
