//! Session binding and execution

use crate::connection::Connection;
use crate::deferred::Deferred;
use crate::descriptor::ErrorDescriptor;
use crate::diagnostics::{DiagnosticsSink, TracingDiagnostics};
use crate::operation::Operation;
use crate::session::Session;
use bson::Bson;
use mongo_executer_common::{ExecuterError, Result};
use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

/// Explicit result of one execution: `Err` is the left branch, `Ok` the right.
pub type Outcome = std::result::Result<Bson, ErrorDescriptor>;

/// Runs operations against one database.
#[derive(Clone)]
pub struct Executer {
    session: Arc<dyn Session>,
    diagnostics: Arc<dyn DiagnosticsSink>,
}

impl fmt::Debug for Executer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executer")
            .field("database", &self.session.database_name())
            .field("diagnostics", &self.diagnostics)
            .finish()
    }
}

impl Executer {
    /// Reports diagnostics through `tracing`.
    pub fn new(session: Arc<dyn Session>) -> Self {
        Self {
            session,
            diagnostics: Arc::new(TracingDiagnostics),
        }
    }

    pub fn with_diagnostics(mut self, diagnostics: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn database_name(&self) -> &str {
        self.session.database_name()
    }

    /// Deferred execution of `operation`, failing with an [`ErrorDescriptor`].
    ///
    /// Every call builds a fresh computation; running it issues the driver call
    /// again.
    pub fn execute(&self, operation: &Operation) -> Deferred<Bson, ErrorDescriptor> {
        let operation = operation.clone();
        let session = Arc::clone(&self.session);
        let diagnostics = Arc::clone(&self.diagnostics);
        Deferred::attempt(move || async move {
            operation
                .dispatch(session.as_ref(), diagnostics.as_ref())
                .await
        })
    }

    /// Deferred execution of `operation` that cannot fail: the failure or the
    /// normalized result is carried in the [`Outcome`].
    pub fn execute_single(&self, operation: &Operation) -> Deferred<Outcome, Infallible> {
        self.execute(operation).fold(Err, Ok)
    }
}

/// Binds operations to a database.
///
/// With a non-empty `database` and a connection that selects databases, that
/// database is used. Otherwise the connection has to be database-scoped itself.
pub fn with_connection<C>(connection: &C, database: Option<&str>) -> Result<Executer>
where
    C: Connection + ?Sized,
{
    let selected = database
        .filter(|name| !name.is_empty())
        .and_then(|name| connection.select_database(name));

    selected
        .or_else(|| connection.as_session())
        .map(Executer::new)
        .ok_or_else(|| {
            ExecuterError::Configuration(
                "A client connection needs a database name; pass one to with_connection"
                    .to_string(),
            )
        })
}
