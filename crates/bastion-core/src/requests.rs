//! Inbound request shapes.
//!
//! These mirror what the protocol layer decodes from the wire. Arguments
//! stay as raw JSON so the pipeline can reject a malformed shape instead
//! of failing to deserialize it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Transport-supplied identity of the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallerContext {
    pub session_id: String,
    /// Network origin the request claims, e.g. an address.
    pub origin: String,
}

impl CallerContext {
    pub fn new(session_id: impl Into<String>, origin: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            origin: origin.into(),
        }
    }
}

/// Capability invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    /// Expected to be an object; `null` counts as empty.
    #[serde(default)]
    pub arguments: Value,
}

impl ToolCall {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}

/// Resource-locator read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRead {
    pub uri: String,
}

impl ResourceRead {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }
}

/// Templated-content request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRequest {
    pub name: String,
    /// Expected to be an object of strings; `null` counts as empty.
    #[serde(default)]
    pub arguments: Value,
}

impl PromptRequest {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            name: name.into(),
            arguments,
        }
    }
}
