//! Protocol message definitions for fsgate.
//!
//! This module defines the request and response types exchanged between a
//! caller and the daemon, along with the directory tree and error payloads
//! carried inside them. All messages are serialized as JSON.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requests that can be sent to the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Request {
    /// Liveness check.
    Ping,
    /// Ask for the catalog of available tools.
    ListTools {
        /// Caller-chosen request identifier.
        id: u64,
    },
    /// Invoke a tool by name.
    CallTool {
        /// Caller-chosen request identifier, echoed in the response.
        id: u64,
        /// Tool name, e.g. `read_file`.
        name: String,
        /// Free-form JSON object holding the tool arguments.
        #[serde(default)]
        arguments: Value,
    },
    /// Abort an in-flight `CallTool` with the given identifier.
    Cancel {
        /// Identifier of the call to cancel.
        id: u64,
    },
}

impl Request {
    /// Build a `CallTool` request.
    pub fn call(id: u64, name: impl Into<String>, arguments: Value) -> Self {
        Self::CallTool {
            id,
            name: name.into(),
            arguments,
        }
    }
}

/// Responses sent by the daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Response {
    /// Reply to `Ping`.
    Pong,
    /// Reply to `ListTools`.
    Tools {
        /// Identifier of the originating request.
        id: u64,
        /// Available tools.
        tools: Vec<ToolDescriptor>,
    },
    /// Successful tool output.
    ToolResult {
        /// Identifier of the originating request.
        id: u64,
        /// Text produced by the tool.
        text: String,
    },
    /// A request failed.
    Error {
        /// Identifier of the originating request, if it could be parsed.
        id: Option<u64>,
        /// What went wrong.
        error: ErrorMessage,
    },
}

/// Description of a tool exposed by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Tool name used in `CallTool`.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Accepted arguments.
    pub parameters: Vec<ParameterDescriptor>,
}

/// Description of a single tool argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterDescriptor {
    /// Argument name.
    pub name: String,
    /// JSON type of the argument.
    pub kind: ParameterKind,
    /// Whether the argument must be present.
    pub required: bool,
    /// Human-readable description.
    pub description: String,
}

/// JSON type of a tool argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Boolean,
    Array,
}

/// Kind of a node in a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// One node of a recursively built directory tree.
///
/// Files never carry a `children` collection; directories always do, even
/// when empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Entry name (not full path).
    pub name: String,
    /// Entry kind.
    #[serde(rename = "type")]
    pub kind: EntryKind,
    /// Child entries, present only for directories.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<Vec<TreeEntry>>,
}

impl TreeEntry {
    /// Create a file node.
    pub fn file(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::File,
            children: None,
        }
    }

    /// Create a directory node with the given children.
    pub fn directory(name: impl Into<String>, children: Vec<TreeEntry>) -> Self {
        Self {
            name: name.into(),
            kind: EntryKind::Directory,
            children: Some(children),
        }
    }
}

/// Error message payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMessage {
    /// Error code for programmatic handling.
    pub code: ErrorCode,
    /// Human-readable error message.
    pub message: String,
    /// Offending path, when the error is attributable to one.
    pub path: Option<String>,
}

impl ErrorMessage {
    /// Create an error message without a path.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
        }
    }

    /// Attach the offending path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }
}

/// Error codes for the failure conditions a caller can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// A required argument is missing or malformed.
    InvalidArgument,
    /// The path lies outside every allowed directory.
    OutsideAllowedDirectories,
    /// The path does not exist.
    NotFound,
    /// The path exists but is not a directory.
    NotADirectory,
    /// Read, write or enumeration failed.
    Io,
    /// Enumeration failed somewhere below the requested directory.
    Traversal,
    /// The call was cancelled or hit its deadline.
    Cancelled,
    /// No tool with the requested name.
    UnknownTool,
    /// The request line could not be parsed.
    MalformedRequest,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_ping_serialization() {
        let json = serde_json::to_string(&Request::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_call_tool_wire_shape() {
        let request = Request::call(7, "read_file", json!({ "path": "/srv/a.txt", "from": 2 }));
        let value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["type"], "CallTool");
        assert_eq!(value["data"]["id"], 7);
        assert_eq!(value["data"]["name"], "read_file");
        assert_eq!(value["data"]["arguments"]["from"], 2);
    }

    #[test]
    fn test_call_tool_without_arguments() {
        let request: Request =
            serde_json::from_str(r#"{"type":"CallTool","data":{"id":1,"name":"list_directory"}}"#)
                .unwrap();

        match request {
            Request::CallTool { arguments, .. } => assert!(arguments.is_null()),
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn test_file_entry_has_no_children_key() {
        let json = serde_json::to_string(&TreeEntry::file("a.txt")).unwrap();
        assert_eq!(json, r#"{"name":"a.txt","type":"file"}"#);
    }

    #[test]
    fn test_empty_directory_keeps_children_key() {
        let json = serde_json::to_string(&TreeEntry::directory("empty", vec![])).unwrap();
        assert_eq!(json, r#"{"name":"empty","type":"directory","children":[]}"#);
    }

    #[test]
    fn test_nested_tree_deserializes() {
        let json = r#"[
            {"name":"a.txt","type":"file"},
            {"name":"b","type":"directory","children":[{"name":"c.txt","type":"file"}]}
        ]"#;
        let tree: Vec<TreeEntry> = serde_json::from_str(json).unwrap();

        assert_eq!(tree.len(), 2);
        assert_eq!(tree[0].kind, EntryKind::File);
        assert!(tree[0].children.is_none());
        assert_eq!(tree[1].kind, EntryKind::Directory);
        assert_eq!(tree[1].children.as_ref().unwrap()[0].name, "c.txt");
    }

    #[test]
    fn test_error_message_with_path() {
        let error = ErrorMessage::new(ErrorCode::OutsideAllowedDirectories, "denied")
            .with_path("/etc/passwd");
        let json = serde_json::to_string(&error).unwrap();

        assert!(json.contains("OutsideAllowedDirectories"));
        assert!(json.contains("/etc/passwd"));
    }

    #[test]
    fn test_parameter_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ParameterKind::Integer).unwrap(),
            "\"integer\""
        );
    }
}
