use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Error as SerdeJsonError;
use sqlx::error::ErrorKind as DbErrorKind;
use sqlx::Error as SqlxError;

pub const DB_NOT_FOUND: &str = "DB/NOT_FOUND";
pub const DB_CONSTRAINT: &str = "DB/CONSTRAINT";
pub const DB_BUSY: &str = "DB/BUSY";
pub const DB_UNAVAILABLE: &str = "DB/UNAVAILABLE";
pub const DB_DECODE: &str = "DB/DECODE";
pub const DB_ERROR: &str = "DB/ERROR";
pub const JSON_ENCODE: &str = "JSON/ENCODE";
pub const JSON_DECODE: &str = "JSON/DECODE";

// SQLite primary result codes; extended codes keep them in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

/// Error carried across the library: a stable `code`, an operator-facing
/// message, key/value context and an optional nested cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppError {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn with_contexts<I, K, V>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in entries {
            self.context.insert(key.into(), value.into());
        }
        self
    }

    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }

    /// Bad input or bad settings. Retrying will not help, and logs treat
    /// these as warnings rather than faults.
    pub fn is_caller_error(&self) -> bool {
        self.code.starts_with("VALIDATION/") || self.code.starts_with("CONFIG/")
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if !self.context.is_empty() {
            let mut entries: Vec<_> = self.context.iter().collect();
            entries.sort();
            let joined = entries
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " ({joined})")?;
        }
        Ok(())
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn std::error::Error + 'static))
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() || error.is_syntax() || error.is_eof() {
            JSON_DECODE
        } else {
            JSON_ENCODE
        };
        let mut app_error = AppError::new(code, error.to_string());
        if error.line() > 0 {
            app_error = app_error
                .with_context("line", error.line().to_string())
                .with_context("column", error.column().to_string());
        }
        app_error
    }
}

fn sqlite_primary_code(code: &str) -> Option<i32> {
    code.parse::<i32>().ok().map(|extended| extended & 0xff)
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new(DB_NOT_FOUND, "Record not found."),
            SqlxError::PoolTimedOut | SqlxError::PoolClosed => {
                AppError::new(DB_UNAVAILABLE, "The database is not available.")
                    .with_context("reason", error.to_string())
            }
            SqlxError::Io(io) => AppError::new(DB_UNAVAILABLE, "The database is not available.")
                .with_context("reason", io.to_string())
                .with_context("io_kind", format!("{:?}", io.kind())),
            SqlxError::Database(db) => {
                let raw_code = db.code().map(|c| c.into_owned());
                let code = match db.kind() {
                    DbErrorKind::UniqueViolation
                    | DbErrorKind::ForeignKeyViolation
                    | DbErrorKind::NotNullViolation
                    | DbErrorKind::CheckViolation => DB_CONSTRAINT,
                    _ => match raw_code.as_deref().and_then(sqlite_primary_code) {
                        Some(SQLITE_BUSY) | Some(SQLITE_LOCKED) => DB_BUSY,
                        _ => DB_ERROR,
                    },
                };
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(raw) = raw_code {
                    app_error = app_error.with_context("sqlite_code", raw);
                }
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnNotFound(name) => {
                AppError::new(DB_DECODE, "Stored row is missing a column.")
                    .with_context("column", name)
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new(DB_DECODE, source.to_string())
                    .with_context("column", index.to_string())
            }
            SqlxError::Decode(source) => AppError::new(DB_DECODE, source.to_string()),
            other => AppError::new(DB_ERROR, other.to_string()),
        }
    }
}
