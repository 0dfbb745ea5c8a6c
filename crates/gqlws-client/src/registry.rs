//! Operation Registry: correlation ID to pending result sink.
//!
//! One concurrent map holds every in-flight operation. The sink variant is
//! the partition: [`OperationSink::Single`] entries resolve once,
//! [`OperationSink::Streaming`] entries emit many times and complete
//! explicitly. Removal is an atomic take, so when the router, a cancelling
//! caller and connection teardown race for the same ID exactly one of them
//! gets the sink.

use std::fmt;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use gqlws_core::{ClientError, OperationId};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

/// Result delivered to a caller.
pub(crate) type OperationResult = Result<Value, ClientError>;

/// Shape of an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    /// Exactly one terminal result.
    Single,
    /// Zero or more results followed by completion.
    Streaming,
}

impl OperationKind {
    /// Label used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Single => "single",
            Self::Streaming => "streaming",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an operation's results go.
#[derive(Debug)]
pub(crate) enum OperationSink {
    Single(oneshot::Sender<OperationResult>),
    Streaming(mpsc::UnboundedSender<OperationResult>),
}

impl OperationSink {
    pub(crate) fn kind(&self) -> OperationKind {
        match self {
            Self::Single(_) => OperationKind::Single,
            Self::Streaming(_) => OperationKind::Streaming,
        }
    }

    /// Terminate with an error.
    pub(crate) fn fail(self, error: ClientError) {
        // The receiving side may already be gone.
        match self {
            Self::Single(tx) => {
                let _ = tx.send(Err(error));
            }
            Self::Streaming(tx) => {
                let _ = tx.send(Err(error));
            }
        }
    }

    /// Terminate successfully. A stream ends once its sender is dropped.
    pub(crate) fn complete(self) {
        drop(self);
    }
}

/// Outcome of [`OperationRegistry::emit`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum EmitOutcome {
    /// Handed to the stream consumer.
    Delivered,
    /// The stream exists but its consumer has already gone away.
    Cancelled,
    /// No streaming operation with that ID.
    Unknown,
}

/// Concurrent map of in-flight operations.
#[derive(Debug, Default)]
pub(crate) struct OperationRegistry {
    entries: DashMap<OperationId, OperationSink>,
}

impl OperationRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Insert a new operation. Fails if the ID is already present in either
    /// partition.
    pub(crate) fn register(&self, id: OperationId, sink: OperationSink) -> Result<(), ClientError> {
        match self.entries.entry(id) {
            Entry::Occupied(entry) => Err(ClientError::DuplicateOperation {
                id: entry.key().clone(),
            }),
            Entry::Vacant(entry) => {
                let _ = entry.insert(sink);
                Ok(())
            }
        }
    }

    /// Take the sink for `id` from whichever partition holds it.
    pub(crate) fn remove(&self, id: &OperationId) -> Option<OperationSink> {
        self.entries.remove(id).map(|(_, sink)| sink)
    }

    /// Take the sink for `id` only if it belongs to `kind`.
    pub(crate) fn remove_kind(&self, id: &OperationId, kind: OperationKind) -> Option<OperationSink> {
        self.entries
            .remove_if(id, |_, sink| sink.kind() == kind)
            .map(|(_, sink)| sink)
    }

    /// Push a payload into a streaming operation without removing it.
    pub(crate) fn emit(&self, id: &OperationId, payload: Value) -> EmitOutcome {
        let Some(entry) = self.entries.get(id) else {
            return EmitOutcome::Unknown;
        };
        match entry.value() {
            OperationSink::Streaming(tx) => {
                if tx.send(Ok(payload)).is_ok() {
                    EmitOutcome::Delivered
                } else {
                    EmitOutcome::Cancelled
                }
            }
            OperationSink::Single(_) => EmitOutcome::Unknown,
        }
    }

    /// Remove and return every entry of one partition.
    pub(crate) fn drain(&self, kind: OperationKind) -> Vec<(OperationId, OperationSink)> {
        // Collect first: removing while iterating would deadlock the shard.
        let ids: Vec<OperationId> = self
            .entries
            .iter()
            .filter(|entry| entry.value().kind() == kind)
            .map(|entry| entry.key().clone())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.remove_kind(&id, kind).map(|sink| (id, sink)))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
