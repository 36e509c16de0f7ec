//! Session state

use crate::error::{Error, Result};
use crate::pdf::{EditValue, Field};
use crate::session::ledger::EditLedger;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::Serialize;
use std::collections::BTreeMap;

/// Longest accepted session id
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Session ids name files on disk, so only `[A-Za-z0-9_-]` is accepted.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');

    if valid {
        Ok(())
    } else {
        Err(Error::InvalidSessionId {
            session_id: session_id.to_string(),
        })
    }
}

/// One user's form-filling state
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    /// Path the current document was loaded from
    pub pdf_path: Option<String>,
    /// Where commits are written when no explicit path is given
    pub output_path: Option<String>,
    /// Current detection result
    pub fields: Vec<Field>,
    pub ledger: EditLedger,
    /// First document this session saw
    pub original_pdf: Option<Vec<u8>>,
    /// Latest committed rendering
    pub current_pdf: Option<Vec<u8>>,
    pub is_continuation: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Document the field tools operate on; advanced by each commit
    document: Option<Vec<u8>>,
}

impl Session {
    pub fn new(session_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            pdf_path: None,
            output_path: None,
            fields: Vec::new(),
            ledger: EditLedger::new(),
            original_pdf: None,
            current_pdf: None,
            is_continuation: false,
            created_at: now,
            updated_at: now,
            document: None,
        }
    }

    /// Session with a fresh random id
    pub fn generate() -> Self {
        Self::new(uuid::Uuid::new_v4().to_string())
    }

    /// Forget everything but the id (fresh turn)
    pub fn reset(&mut self) {
        self.pdf_path = None;
        self.output_path = None;
        self.fields.clear();
        self.ledger = EditLedger::new();
        self.original_pdf = None;
        self.current_pdf = None;
        self.is_continuation = false;
        self.document = None;
    }

    /// Drop staged edits only (continuation turn)
    pub fn soft_reset(&mut self) {
        self.ledger.clear_pending();
    }

    /// Prepare for a new turn of the agent
    pub fn begin_turn(
        &mut self,
        is_continuation: bool,
        previous_edits: Option<BTreeMap<String, EditValue>>,
        original_pdf: Option<Vec<u8>>,
    ) {
        if is_continuation {
            self.soft_reset();
            if let Some(edits) = previous_edits.filter(|e| !e.is_empty()) {
                self.ledger.replace_applied(edits);
            }
        } else {
            self.reset();
            if original_pdf.is_some() {
                self.original_pdf = original_pdf;
            }
        }
        self.is_continuation = is_continuation;
    }

    /// Install a freshly loaded document and its detection result
    pub fn load_document(&mut self, path: String, data: Vec<u8>, fields: Vec<Field>) {
        self.fields = fields;
        self.ledger.clear_pending();
        if !self.is_continuation {
            self.ledger.clear_applied();
        }
        if self.original_pdf.is_none() {
            self.original_pdf = Some(data.clone());
        }
        self.pdf_path = Some(path);
        self.document = Some(data);
    }

    /// Advance the working document after a successful serialization
    pub fn commit_document(&mut self, data: Vec<u8>) {
        self.current_pdf = Some(data.clone());
        self.document = Some(data);
    }

    pub fn is_loaded(&self) -> bool {
        self.document.is_some()
    }

    /// Working document, or `NoDocumentLoaded`
    pub fn document(&self) -> Result<&[u8]> {
        self.document.as_deref().ok_or(Error::NoDocumentLoaded)
    }

    pub fn field(&self, field_id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.field_id == field_id)
    }

    /// Applied value if present, else the value seen at detection
    pub fn current_value(&self, field: &Field) -> Option<EditValue> {
        self.ledger
            .applied_value(&field.field_id)
            .cloned()
            .or_else(|| field.current_value.clone().map(EditValue::Text))
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id.clone(),
            pdf_path: self.pdf_path.clone(),
            output_path: self.output_path.clone(),
            has_pdf: self.current_pdf.is_some(),
            has_original_pdf: self.original_pdf.is_some(),
            document_loaded: self.is_loaded(),
            field_count: self.fields.len(),
            pending_count: self.ledger.pending().len(),
            applied_count: self.ledger.applied().len(),
            created_at: self.created_at.to_rfc3339(),
            updated_at: self.updated_at.to_rfc3339(),
        }
    }
}

/// Session metadata exposed to callers
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SessionInfo {
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_path: Option<String>,
    /// A filled rendering is available
    pub has_pdf: bool,
    pub has_original_pdf: bool,
    /// Field tools can run without another load_pdf
    pub document_loaded: bool,
    pub field_count: usize,
    pub pending_count: usize,
    pub applied_count: usize,
    pub created_at: String,
    pub updated_at: String,
}
