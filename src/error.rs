//! Error types for PDF Form MCP Server

use thiserror::Error;

/// Result type alias for PDF Form MCP Server
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for PDF Form MCP Server
#[derive(Error, Debug)]
pub enum Error {
    /// PDF file not found
    #[error("PDF not found: {path}")]
    PdfNotFound { path: String },

    /// Document could not be opened as a PDF
    #[error("Invalid PDF file: {reason}")]
    InvalidPdf { reason: String },

    /// PDF is password protected
    #[error("PDF is password protected")]
    PasswordRequired,

    /// Field id is not part of the session's current detection
    #[error("Field not found: {field_id}")]
    FieldNotFound { field_id: String },

    /// No live widget matches the page and native name
    #[error("Widget not found on page {page}: {name}")]
    WidgetNotFound { page: u32, name: String },

    /// Widget exists but refused the value
    #[error("Failed to set {name}: {reason}")]
    WidgetWrite { name: String, reason: String },

    /// A field tool was called before load_pdf
    #[error("No PDF loaded")]
    NoDocumentLoaded,

    /// Session id is not registered
    #[error("Session not found: {session_id}")]
    SessionNotFound { session_id: String },

    /// Session id cannot be used as a storage key
    #[error("Invalid session id: {session_id}")]
    InvalidSessionId { session_id: String },

    /// Page out of bounds
    #[error("Page {page} out of bounds (total: {total})")]
    PageOutOfBounds { page: u32, total: u32 },

    /// Base64 decode error
    #[error("Invalid base64 data: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// PDFium error
    #[error("PDFium error: {reason}")]
    Pdfium { reason: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// SQLite error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Tool arguments did not match the tool's schema
    #[error("Invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// Tool name outside the catalog
    #[error("Unknown tool: {name}")]
    UnknownTool { name: String },

    /// The decision-maker failed or was unavailable for a turn
    #[error("Agent error: {reason}")]
    DecisionMaker { reason: String },

    /// Durable store schema could not be brought up to date
    #[error("Migration failed: {reason}")]
    Migration { reason: String },

    /// Blocking task failed to complete
    #[error("Task join error: {reason}")]
    TaskJoin { reason: String },

    /// Path access denied (outside allowed resource directories)
    #[error("Path access denied: {path}")]
    PathAccessDenied { path: String },
}

impl Error {
    /// Return a sanitized error message safe to send to clients.
    /// Internal details (paths, library errors) are omitted.
    /// Full details should be logged via tracing before calling this.
    pub fn client_message(&self) -> String {
        match self {
            Error::PdfNotFound { .. } => "PDF not found".to_string(),
            Error::InvalidPdf { .. } => "Invalid PDF file".to_string(),
            Error::PasswordRequired => "PDF is password protected".to_string(),
            Error::FieldNotFound { field_id } => format!("Field not found: {}", field_id),
            Error::WidgetNotFound { name, .. } => format!("Widget not found: {}", name),
            Error::WidgetWrite { name, reason } => format!("Failed to set {}: {}", name, reason),
            Error::NoDocumentLoaded => "No PDF loaded. Call load_pdf first.".to_string(),
            Error::SessionNotFound { session_id } => {
                format!("Session not found: {}", session_id)
            }
            Error::InvalidSessionId { .. } => "Invalid session id".to_string(),
            Error::PageOutOfBounds { page, total } => {
                format!("Page {} out of bounds (total: {})", page, total)
            }
            Error::Base64Decode(_) => "Invalid base64 data".to_string(),
            Error::Io(_) => "I/O error".to_string(),
            Error::Pdfium { .. } => "PDF processing error".to_string(),
            Error::Serialization(_) => "Serialization error".to_string(),
            Error::Database(_) => "Session storage error".to_string(),
            Error::InvalidArguments { tool, reason } => {
                format!("Invalid arguments for {}: {}", tool, reason)
            }
            Error::UnknownTool { name } => format!("Unknown tool: {}", name),
            Error::DecisionMaker { reason } => format!("Agent error: {}", reason),
            Error::Migration { .. } => "Session storage error".to_string(),
            Error::TaskJoin { .. } => "Internal task failure".to_string(),
            Error::PathAccessDenied { .. } => "Access denied".to_string(),
        }
    }

    /// Input errors are reported to the caller and never retried.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Error::PdfNotFound { .. }
                | Error::InvalidPdf { .. }
                | Error::PasswordRequired
                | Error::FieldNotFound { .. }
                | Error::InvalidSessionId { .. }
                | Error::InvalidArguments { .. }
                | Error::UnknownTool { .. }
                | Error::Base64Decode(_)
        )
    }

    pub(crate) fn join(err: tokio::task::JoinError) -> Self {
        Error::TaskJoin {
            reason: err.to_string(),
        }
    }
}
