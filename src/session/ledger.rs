//! Staged and applied edits for one session

use crate::error::{Error, Result};
use crate::pdf::{open_document, EditValue, Field, FormBackend};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A staged edit joined with its field for display
#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct PendingEdit {
    pub field_id: String,
    pub value: EditValue,
    /// Field context, or "unknown" when the id no longer resolves
    pub label_context: String,
    #[serde(rename = "type")]
    pub field_type: String,
}

/// One edit written into the document by a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AppliedEdit {
    pub field_id: String,
    pub value: EditValue,
}

/// Result of writing staged edits into a document
#[derive(Debug, Default)]
pub struct CommitOutcome {
    pub applied: Vec<AppliedEdit>,
    pub errors: Vec<String>,
    /// Serialized document; `None` when the document could not be opened or saved
    pub document: Option<Vec<u8>>,
}

/// Pending (uncommitted) and applied (cumulative) edits.
///
/// `pending` is consumed by every commit attempt. `applied` only grows or
/// overwrites until an explicit reset.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditLedger {
    pending: BTreeMap<String, EditValue>,
    applied: BTreeMap<String, EditValue>,
}

impl EditLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage `value` for `field_id`, replacing any earlier staged value.
    /// Checkbox values are coerced to a flag here so review shows what will be written.
    pub fn stage(&mut self, fields: &[Field], field_id: &str, value: EditValue) -> Result<EditValue> {
        let field = fields
            .iter()
            .find(|f| f.field_id == field_id)
            .ok_or_else(|| Error::FieldNotFound {
                field_id: field_id.to_string(),
            })?;

        let value = value.coerce_for(field.field_type);
        self.pending.insert(field_id.to_string(), value.clone());
        Ok(value)
    }

    /// Read-only view of the staged edits
    pub fn review(&self, fields: &[Field], context_chars: usize) -> Vec<PendingEdit> {
        self.pending
            .iter()
            .map(|(field_id, value)| {
                let field = fields.iter().find(|f| &f.field_id == field_id);
                PendingEdit {
                    field_id: field_id.clone(),
                    value: value.clone(),
                    label_context: field
                        .map(|f| crate::pdf::truncate_chars(&f.label_context, context_chars).to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                    field_type: field
                        .map(|f| f.field_type.to_string())
                        .unwrap_or_else(|| "unknown".to_string()),
                }
            })
            .collect()
    }

    pub fn pending(&self) -> &BTreeMap<String, EditValue> {
        &self.pending
    }

    pub fn applied(&self) -> &BTreeMap<String, EditValue> {
        &self.applied
    }

    pub fn pending_value(&self, field_id: &str) -> Option<&EditValue> {
        self.pending.get(field_id)
    }

    pub fn applied_value(&self, field_id: &str) -> Option<&EditValue> {
        self.applied.get(field_id)
    }

    /// Remove and return every staged edit
    pub fn take_pending(&mut self) -> BTreeMap<String, EditValue> {
        std::mem::take(&mut self.pending)
    }

    pub fn clear_pending(&mut self) {
        self.pending.clear();
    }

    pub fn clear_applied(&mut self) {
        self.applied.clear();
    }

    /// Replace the applied set (continuation turns restoring earlier edits)
    pub fn replace_applied(&mut self, applied: BTreeMap<String, EditValue>) {
        self.applied = applied;
    }

    /// Fold the successes of a commit into the applied set
    pub fn record(&mut self, outcome: &CommitOutcome) {
        for edit in &outcome.applied {
            self.applied
                .insert(edit.field_id.clone(), edit.value.clone());
        }
    }
}

/// Write `pending` into `data` and serialize the document once.
///
/// A missing field or a widget refusing its value is recorded and the
/// remaining edits still run. When serialization fails nothing counts as
/// applied.
pub fn apply_pending(
    backend: &dyn FormBackend,
    data: &[u8],
    fields: &[Field],
    pending: &BTreeMap<String, EditValue>,
) -> CommitOutcome {
    let result = open_document(backend, data, |document| {
        let mut outcome = CommitOutcome::default();

        for (field_id, value) in pending {
            let Some(field) = fields.iter().find(|f| &f.field_id == field_id) else {
                outcome.errors.push(format!("Field not found: {}", field_id));
                continue;
            };

            let value = value.clone().coerce_for(field.field_type);
            match document.set_value(field.page, &field.native_name, &value) {
                Ok(()) => {
                    tracing::debug!(field_id = %field_id, value = %value, "Applied edit");
                    outcome.applied.push(AppliedEdit {
                        field_id: field_id.clone(),
                        value,
                    });
                }
                Err(e) => {
                    tracing::warn!(field_id = %field_id, error = %e, "Edit rejected by widget");
                    outcome
                        .errors
                        .push(format!("Failed to apply {}: {}", field_id, e));
                }
            }
        }

        match document.save_to_bytes() {
            Ok(bytes) => outcome.document = Some(bytes),
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize filled document");
                outcome.applied.clear();
                outcome.errors.push(format!("Save failed: {}", e));
            }
        }

        Ok(outcome)
    });

    result.unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to open document for commit");
        CommitOutcome {
            applied: Vec::new(),
            errors: vec![format!("Save failed: {}", e)],
            document: None,
        }
    })
}
