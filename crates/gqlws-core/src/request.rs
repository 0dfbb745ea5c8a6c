//! The request boundary consumed from callers.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A serialized GraphQL request: query text plus optional operation name and
/// variables. This is exactly the `payload` of a `subscribe` frame.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphqlRequest {
    /// Query document text. Never parsed or validated here.
    pub query: String,
    /// Operation to run when the document holds more than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variable values keyed by name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
}

impl GraphqlRequest {
    /// Create a request with only query text.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Replace all variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = Some(variables);
        self
    }

    /// Add a single variable.
    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let _ = self
            .variables
            .get_or_insert_with(Map::new)
            .insert(name.into(), value.into());
        self
    }
}
