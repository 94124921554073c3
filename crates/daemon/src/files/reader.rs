//! File reading: whole files, line windows, and batches.
//!
//! A [`LineWindow`] selects an inclusive, 0-indexed range of lines. The fully
//! unbounded window takes a whole-file fast path; any other window streams the
//! file line by line and stops as soon as the upper bound has been read.

use std::path::Path;

use futures_util::future::join_all;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, BufReader};

use super::error::FileError;
use crate::sandbox::AllowList;

/// Separator placed between entries of a batch read.
pub const BATCH_SEPARATOR: &str = "\n---\n";

/// Optionally bounded, inclusive range of 0-indexed lines.
///
/// An absent `from` means the first line, an absent `to` the last one.
/// Negative or inverted bounds select nothing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LineWindow {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl LineWindow {
    /// Create a window from optional bounds.
    pub fn new(from: Option<i64>, to: Option<i64>) -> Self {
        Self { from, to }
    }

    /// The window covering the whole file.
    pub fn full() -> Self {
        Self::default()
    }

    /// Whether the window covers the whole file.
    pub fn is_unbounded(&self) -> bool {
        matches!(self.from, None | Some(0)) && self.to.is_none()
    }

    /// Effective inclusive bounds, or `None` if no line is selected.
    pub fn bounds(&self) -> Option<(u64, u64)> {
        let from = self.from.unwrap_or(0);
        let to = self.to.unwrap_or(i64::MAX);
        if from < 0 || to < 0 || to < from {
            return None;
        }
        Some((from as u64, to as u64))
    }
}

/// Read the lines of `path` selected by `window`, joined with `\n`.
///
/// The unbounded window returns the file content byte for byte.
pub async fn read_lines(path: &Path, window: LineWindow) -> Result<String, FileError> {
    if window.is_unbounded() {
        return fs::read_to_string(path)
            .await
            .map_err(|e| FileError::io(path, e));
    }

    let file = File::open(path).await.map_err(|e| FileError::io(path, e))?;

    let Some((from, to)) = window.bounds() else {
        tracing::debug!(path = %path.display(), ?window, "Empty line window");
        return Ok(String::new());
    };

    let mut lines = BufReader::new(file).lines();
    let mut kept = Vec::new();
    let mut index: u64 = 0;

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| FileError::io(path, e))?
    {
        if index >= from {
            kept.push(line);
        }
        if index >= to {
            break;
        }
        index += 1;
    }

    Ok(kept.join("\n"))
}

/// Outcome of reading one path in a batch.
#[derive(Debug)]
pub struct BatchItem {
    /// The path as the caller supplied it.
    pub path: String,
    /// File content, or why it could not be read.
    pub outcome: Result<String, FileError>,
}

/// Read several files concurrently.
///
/// Each path is gated individually; a rejected or unreadable path yields an
/// error item without affecting the others. Items keep the request order.
pub async fn read_many(allow: &AllowList, paths: &[String]) -> Vec<BatchItem> {
    let reads = paths.iter().map(|raw| async move {
        let outcome = match allow.resolve(raw) {
            Ok(path) => fs::read_to_string(&path)
                .await
                .map_err(|e| FileError::io(&path, e)),
            Err(e) => Err(e.into()),
        };
        if let Err(e) = &outcome {
            tracing::debug!(path = %raw, error = %e, "Batch item failed");
        }
        BatchItem {
            path: raw.clone(),
            outcome,
        }
    });

    join_all(reads).await
}

/// Render batch items into a single text.
pub fn render_batch(items: &[BatchItem]) -> String {
    items
        .iter()
        .map(|item| match &item.outcome {
            Ok(content) => format!("{}:\n{}\n", item.path, content),
            Err(e) => format!("{}: Error - {}\n", item.path, e),
        })
        .collect::<Vec<_>>()
        .join(BATCH_SEPARATOR)
}
