//! Tool routing for the daemon.
//!
//! The router owns the tool catalog, validates the free-form JSON arguments
//! of a call into typed argument structs, gates every path through the
//! [`AllowList`] and only then dispatches to the file operations. A call is
//! raced against its cancellation token, so an aborted request stops at the
//! next await point.

use std::path::PathBuf;
use std::sync::Arc;

use protocol::{ErrorCode, ErrorMessage, ParameterDescriptor, ParameterKind, ToolDescriptor};
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::files::{
    create_directory, list_directory, read_lines, read_many, render_batch, render_listing,
    FileError, LineWindow, TreeBuilder,
};
use crate::sandbox::AllowList;

/// Errors that can occur while routing a tool call.
#[derive(Debug, Error)]
pub enum RouterError {
    /// No tool with this name is registered.
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    /// The tool ran and failed.
    #[error(transparent)]
    File(#[from] FileError),

    /// The tool output could not be encoded.
    #[error("failed to encode tool output: {0}")]
    Encode(#[from] serde_json::Error),
}

impl RouterError {
    /// Convert to a protocol error payload.
    pub fn to_error_message(&self) -> ErrorMessage {
        match self {
            RouterError::UnknownTool(_) => {
                ErrorMessage::new(ErrorCode::UnknownTool, self.to_string())
            }
            RouterError::File(e) => e.to_error_message(),
            RouterError::Encode(_) => ErrorMessage::new(ErrorCode::Io, self.to_string()),
        }
    }
}

/// The tools served by the daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    ReadFile,
    ReadMultipleFiles,
    CreateDirectory,
    ListDirectory,
    DirectoryTree,
}

impl Tool {
    /// Every tool, in catalog order.
    pub const ALL: [Tool; 5] = [
        Tool::ReadFile,
        Tool::ReadMultipleFiles,
        Tool::CreateDirectory,
        Tool::ListDirectory,
        Tool::DirectoryTree,
    ];

    /// Wire name of the tool.
    pub fn name(self) -> &'static str {
        match self {
            Tool::ReadFile => "read_file",
            Tool::ReadMultipleFiles => "read_multiple_files",
            Tool::CreateDirectory => "create_directory",
            Tool::ListDirectory => "list_directory",
            Tool::DirectoryTree => "directory_tree",
        }
    }

    /// Look a tool up by wire name.
    pub fn from_name(name: &str) -> Option<Tool> {
        Tool::ALL.into_iter().find(|tool| tool.name() == name)
    }

    fn description(self) -> &'static str {
        match self {
            Tool::ReadFile => {
                "Read the contents of a file from the file system. Optional from and to \
                 parameters select an inclusive, 0-indexed range of lines; without them the \
                 complete file contents are returned. Use this tool to examine a single file. \
                 Only works within allowed directories."
            }
            Tool::ReadMultipleFiles => {
                "Read the contents of multiple files simultaneously. Each file's content is \
                 returned with its path as a reference. A failed read for one file does not \
                 stop the others. Only works within allowed directories."
            }
            Tool::CreateDirectory => {
                "Create a new directory or ensure a directory exists. Can create nested \
                 directories in one operation. If the directory already exists, the operation \
                 succeeds silently. Only works within allowed directories."
            }
            Tool::ListDirectory => {
                "List the direct children of a directory, one per line, prefixed with [DIR] \
                 or [FILE]. Only works within allowed directories."
            }
            Tool::DirectoryTree => {
                "Get a recursive tree view of a directory as JSON. Each entry has a name and \
                 a type; directories also carry their children. Only works within allowed \
                 directories."
            }
        }
    }

    fn parameters(self) -> Vec<ParameterDescriptor> {
        match self {
            Tool::ReadFile => vec![
                param(
                    "path",
                    ParameterKind::String,
                    true,
                    "The file path to read from. Must be an absolute path to an existing file.",
                ),
                param(
                    "from",
                    ParameterKind::Integer,
                    false,
                    "First line to read (0-indexed). Defaults to the beginning of the file.",
                ),
                param(
                    "to",
                    ParameterKind::Integer,
                    false,
                    "Last line to read (0-indexed, inclusive). Defaults to the end of the file.",
                ),
            ],
            Tool::ReadMultipleFiles => vec![param(
                "paths",
                ParameterKind::Array,
                true,
                "Absolute paths of the files to read.",
            )],
            Tool::CreateDirectory => vec![
                param(
                    "path",
                    ParameterKind::String,
                    true,
                    "The directory path to create. Must be an absolute path.",
                ),
                param(
                    "recursive",
                    ParameterKind::Boolean,
                    false,
                    "Create parent directories if they don't exist. Defaults to true.",
                ),
            ],
            Tool::ListDirectory => vec![param(
                "path",
                ParameterKind::String,
                true,
                "The directory to list. Must be an absolute path.",
            )],
            Tool::DirectoryTree => vec![param(
                "path",
                ParameterKind::String,
                true,
                "The root directory of the tree. Must be an absolute path.",
            )],
        }
    }

    /// Catalog entry for this tool.
    pub fn descriptor(self) -> ToolDescriptor {
        ToolDescriptor {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
        }
    }
}

fn param(
    name: &str,
    kind: ParameterKind,
    required: bool,
    description: &str,
) -> ParameterDescriptor {
    ParameterDescriptor {
        name: name.to_string(),
        kind,
        required,
        description: description.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct PathArgs {
    path: String,
}

#[derive(Debug, Deserialize)]
struct ReadFileArgs {
    path: String,
    #[serde(default, deserialize_with = "line_number")]
    from: Option<i64>,
    #[serde(default, deserialize_with = "line_number")]
    to: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReadMultipleFilesArgs {
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct CreateDirectoryArgs {
    path: String,
    #[serde(default = "default_recursive")]
    recursive: bool,
}

fn default_recursive() -> bool {
    true
}

/// Accepts integers and integral floats (`2.0`), rejects everything else.
fn line_number<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(number) = Option::<serde_json::Number>::deserialize(deserializer)? else {
        return Ok(None);
    };

    if let Some(n) = number.as_i64() {
        return Ok(Some(n));
    }
    match number.as_f64() {
        Some(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 => {
            Ok(Some(f as i64))
        }
        _ => Err(D::Error::custom(format!(
            "line number must be an integer, got {}",
            number
        ))),
    }
}

fn parse_args<T: DeserializeOwned>(tool: Tool, arguments: Value) -> Result<T, FileError> {
    // Missing arguments behave like an empty object so that the error names
    // the missing field.
    let arguments = match arguments {
        Value::Null => Value::Object(Default::default()),
        other => other,
    };
    serde_json::from_value(arguments)
        .map_err(|e| FileError::InvalidArgument(format!("{}: {}", tool.name(), e)))
}

/// Dispatches tool calls against a fixed allow-list.
#[derive(Debug, Clone)]
pub struct ToolRouter {
    allow_list: Arc<AllowList>,
}

impl ToolRouter {
    /// Create a router gated by `allow_list`.
    pub fn new(allow_list: Arc<AllowList>) -> Self {
        Self { allow_list }
    }

    /// The allow-list this router enforces.
    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    /// The tool catalog.
    pub fn tools(&self) -> Vec<ToolDescriptor> {
        Tool::ALL.into_iter().map(Tool::descriptor).collect()
    }

    /// Run the tool `name` with `arguments`.
    ///
    /// Returns the tool's result text. The call stops with
    /// [`FileError::Cancelled`] as soon as `cancel` fires.
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<String, RouterError> {
        let tool =
            Tool::from_name(name).ok_or_else(|| RouterError::UnknownTool(name.to_string()))?;
        debug!(tool = name, "Dispatching tool call");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FileError::Cancelled.into()),
            result = self.dispatch(tool, arguments, cancel.clone()) => result,
        }
    }

    async fn dispatch(
        &self,
        tool: Tool,
        arguments: Value,
        cancel: CancellationToken,
    ) -> Result<String, RouterError> {
        match tool {
            Tool::ReadFile => {
                let args: ReadFileArgs = parse_args(tool, arguments)?;
                let path = self.gate(&args.path)?;
                let window = LineWindow::new(args.from, args.to);
                info!(path = %path.display(), ?window, "Reading file");
                Ok(read_lines(&path, window).await?)
            }
            Tool::ReadMultipleFiles => {
                let args: ReadMultipleFilesArgs = parse_args(tool, arguments)?;
                info!(count = args.paths.len(), "Reading multiple files");
                let items = read_many(&self.allow_list, &args.paths).await;
                Ok(render_batch(&items))
            }
            Tool::CreateDirectory => {
                let args: CreateDirectoryArgs = parse_args(tool, arguments)?;
                let path = self.gate(&args.path)?;
                create_directory(&path, args.recursive).await?;
                Ok(format!("Directory created: {}", path.display()))
            }
            Tool::ListDirectory => {
                let args: PathArgs = parse_args(tool, arguments)?;
                let path = self.gate(&args.path)?;
                let entries = list_directory(&path).await?;
                Ok(render_listing(&entries))
            }
            Tool::DirectoryTree => {
                let args: PathArgs = parse_args(tool, arguments)?;
                let path = self.gate(&args.path)?;
                info!(path = %path.display(), "Building directory tree");
                let tree = TreeBuilder::new(cancel).build(&path).await?;
                Ok(serde_json::to_string_pretty(&tree)?)
            }
        }
    }

    fn gate(&self, raw: &str) -> Result<PathBuf, FileError> {
        Ok(self.allow_list.resolve(raw)?)
    }
}
