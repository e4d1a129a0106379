//! Persisted failure descriptions with local filesystem paths scrubbed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::error::Error as StdError;
use std::sync::LazyLock;

const REDACTED: &str = "<redacted>";

/// Absolute Unix paths with at least two segments, and Windows drive paths.
/// A path must start a token, so relative paths and URLs are left alone.
static ABSOLUTE_PATH: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(
        r#"(^|[\s("'=\[,])(?:[A-Za-z]:\\(?:[^\\\s:"']+\\)*|(?:/[^/\s:"'()]+)+/)([^/\\\s:"'()]+)"#,
    )
    .ok()
});

/// Replaces absolute filesystem paths in `text`, keeping only the final
/// path component.
#[must_use]
pub fn redact_paths(text: &str) -> String {
    match ABSOLUTE_PATH.as_ref() {
        Some(pattern) => pattern
            .replace_all(text, |caps: &regex::Captures<'_>| {
                let boundary = caps.get(1).map_or("", |m| m.as_str());
                let file = caps.get(2).map_or("", |m| m.as_str());
                format!("{boundary}{REDACTED}/{file}")
            })
            .into_owned(),
        None => text.to_owned(),
    }
}

/// Failure description stored in a task's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    /// Top-level failure message.
    pub message: String,
    /// Messages of the underlying error chain, outermost first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub trace: Vec<String>,
}

impl ErrorReport {
    /// Builds a report from a plain message.
    #[must_use]
    pub fn from_message(message: impl AsRef<str>) -> Self {
        Self {
            message: redact_paths(message.as_ref()),
            trace: Vec::new(),
        }
    }

    /// Builds a report from an error and its `source()` chain.
    #[must_use]
    pub fn from_error(err: &(dyn StdError + 'static)) -> Self {
        let mut trace = Vec::new();
        let mut current = err.source();
        while let Some(source) = current {
            trace.push(redact_paths(&source.to_string()));
            current = source.source();
        }
        Self {
            message: redact_paths(&err.to_string()),
            trace,
        }
    }

    /// Converts the report into the JSON value persisted on the task.
    #[must_use]
    pub fn into_value(self) -> Value {
        serde_json::to_value(&self).unwrap_or_else(|_| Value::String(self.message))
    }
}
