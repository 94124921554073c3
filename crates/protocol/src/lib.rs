//! # fsgate Protocol Library
//!
//! Wire types shared by the fsgate daemon and its clients.
//!
//! ## Overview
//!
//! - **Message Definitions**: requests, responses, tool descriptors and the
//!   directory tree payload
//! - **Line Codec**: newline-delimited JSON encoding with a size cap
//!
//! ## Example Usage
//!
//! ```rust
//! use protocol::{decode_line, encode_line, Request};
//!
//! let request = Request::call(1, "list_directory", serde_json::json!({ "path": "/srv" }));
//! let line = encode_line(&request).unwrap();
//! let parsed: Request = decode_line(&line).unwrap();
//! assert_eq!(parsed, request);
//! ```
//!
//! ## Modules
//!
//! - [`messages`]: Protocol message definitions
//! - [`codec`]: Line codec
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{decode_line, encode_line, MAX_LINE_BYTES};
pub use error::{ProtocolError, Result};
pub use messages::{
    EntryKind, ErrorCode, ErrorMessage, ParameterDescriptor, ParameterKind, Request, Response,
    ToolDescriptor, TreeEntry,
};
