//! Error taxonomy for the analysis engine.
//!
//! Per-response failures (`Type`, `StatisticalFit`) are captured by the fitter
//! and reported alongside successful responses. Everything else aborts the run
//! and is returned to the caller, who maps [`ErrorKind`] to its own status
//! codes (the `doe` binary uses [`DoeError::exit_code`]).

use std::path::Path;

/// Coarse classification of a [`DoeError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Schema,
    Type,
    StatisticalFit,
    Io,
    Config,
    Input,
}

#[derive(Debug, thiserror::Error)]
pub enum DoeError {
    /// Missing/misnamed column, or not enough data to analyse at all.
    #[error("schema error: {0}")]
    Schema(String),

    /// A response cell that is present but not numeric.
    #[error("type error: column `{column}` row {row}: value '{value}' is not numeric")]
    Type {
        row: usize,
        column: String,
        value: String,
    },

    #[error("statistical fit error for `{response}`: {reason}")]
    StatisticalFit { response: String, reason: String },

    #[error("io error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Inline payload that could not be turned into CSV bytes.
    #[error("invalid input: {0}")]
    Input(String),
}

pub type Result<T> = std::result::Result<T, DoeError>;

impl DoeError {
    pub fn schema(message: impl Into<String>) -> Self {
        DoeError::Schema(message.into())
    }

    pub fn fit(response: impl Into<String>, reason: impl Into<String>) -> Self {
        DoeError::StatisticalFit {
            response: response.into(),
            reason: reason.into(),
        }
    }

    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        DoeError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn io_at(action: &str, path: &Path, source: std::io::Error) -> Self {
        DoeError::io(format!("{action} '{}'", path.display()), source)
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DoeError::Schema(_) => ErrorKind::Schema,
            DoeError::Type { .. } => ErrorKind::Type,
            DoeError::StatisticalFit { .. } => ErrorKind::StatisticalFit,
            DoeError::Io { .. } => ErrorKind::Io,
            DoeError::Config(_) => ErrorKind::Config,
            DoeError::Input(_) => ErrorKind::Input,
        }
    }

    /// Process exit code used by the `doe` binary.
    pub fn exit_code(&self) -> u8 {
        match self.kind() {
            ErrorKind::Config => 2,
            ErrorKind::Schema | ErrorKind::Type | ErrorKind::Input => 3,
            ErrorKind::StatisticalFit => 4,
            ErrorKind::Io => 5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_kind() {
        assert_eq!(DoeError::Config("x".into()).exit_code(), 2);
        assert_eq!(DoeError::schema("missing").exit_code(), 3);
        assert_eq!(DoeError::fit("Lvalue", "singular").exit_code(), 4);
        let io = DoeError::io("write", std::io::Error::other("denied"));
        assert_eq!(io.kind(), ErrorKind::Io);
        assert_eq!(io.exit_code(), 5);
    }

    #[test]
    fn type_error_names_row_and_column() {
        let err = DoeError::Type {
            row: 4,
            column: "Lvalue".to_string(),
            value: "N/A".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("Lvalue"));
        assert!(msg.contains("row 4"));
        assert!(msg.contains("N/A"));
    }
}
