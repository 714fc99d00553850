//! Diagnostic events raised while executing operations
//!
//! The executer never writes to the console itself. Events go to a
//! [`DiagnosticsSink`]: [`TracingDiagnostics`] forwards them to `tracing`, and
//! [`RecordingDiagnostics`] keeps them in memory so callers can inspect them.

use crate::descriptor::ErrorDescriptor;
use bson::Document;
use parking_lot::Mutex;
use std::fmt;
use tracing::{error, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// An update without `$set`/`$unset`/`$rename` was wrapped in `$set`.
    ModifierWrapped {
        collection: String,
        original: Document,
    },
    /// An operation failed; emitted before the failure reaches the caller.
    OperationFailed(ErrorDescriptor),
}

pub trait DiagnosticsSink: Send + Sync + fmt::Debug {
    fn emit(&self, diagnostic: &Diagnostic);
}

/// Default sink, logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn emit(&self, diagnostic: &Diagnostic) {
        match diagnostic {
            Diagnostic::ModifierWrapped { collection, original } => {
                warn!(
                    collection = %collection,
                    fields = original.len(),
                    "Adding `$set` so the update applies atomically; pass `$unset` or `$rename` explicitly if needed"
                );
            }
            Diagnostic::OperationFailed(descriptor) => {
                error!(
                    collection = %descriptor.collection(),
                    code = ?descriptor.code(),
                    error = %descriptor.to_json(),
                    "Mongo error"
                );
            }
        }
    }
}

/// Sink that stores every event.
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    events: Mutex<Vec<Diagnostic>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far
    pub fn events(&self) -> Vec<Diagnostic> {
        self.events.lock().clone()
    }

    pub fn wrapped_modifiers(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| matches!(event, Diagnostic::ModifierWrapped { .. }))
            .count()
    }

    pub fn failures(&self) -> Vec<ErrorDescriptor> {
        self.events
            .lock()
            .iter()
            .filter_map(|event| match event {
                Diagnostic::OperationFailed(descriptor) => Some(descriptor.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl DiagnosticsSink for RecordingDiagnostics {
    fn emit(&self, diagnostic: &Diagnostic) {
        self.events.lock().push(diagnostic.clone());
    }
}
