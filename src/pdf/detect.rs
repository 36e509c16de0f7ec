//! Fillable field detection
//!
//! Every widget with a resolvable name becomes a [`Field`] whose id is
//! `page{index}_{native name}`. The same bytes always produce the same ids
//! in the same order, which is what lets staged edits survive a reload.

use crate::error::Result;
use crate::pdf::document::{open_document, EditValue, FieldType, FormBackend, FormDocument, Rect};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Distance (points) the widget box is grown by when collecting label text
pub const LABEL_RADIUS: f32 = 100.0;

/// Separator between the text lines of a label context
pub const LABEL_SEPARATOR: &str = " | ";

/// One fillable widget as seen at detection time. Immutable; the next
/// detection replaces the whole list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Field {
    pub field_id: String,
    pub field_type: FieldType,
    /// Page index (0-indexed)
    pub page: u32,
    pub bbox: Rect,
    /// All text near the widget, untruncated
    pub label_context: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<String>>,
    pub native_name: String,
}

/// Stable id for a widget
pub fn field_id_for(page: u32, native_name: &str) -> String {
    format!("page{}_{}", page, native_name)
}

/// Detect every fillable field in `data`.
///
/// Fails with `InvalidPdf` when the document cannot be opened. A document
/// without widgets yields an empty list.
pub fn detect_form_fields(backend: &dyn FormBackend, data: &[u8]) -> Result<Vec<Field>> {
    open_document(backend, data, |document| detect_in_document(document))
}

/// Detection against an already open document
pub fn detect_in_document(document: &dyn FormDocument) -> Result<Vec<Field>> {
    let mut fields = Vec::new();
    let mut seen = HashSet::new();

    for page in 0..document.page_count() {
        let page_bounds = document.page_bounds(page)?;

        for widget in document.widgets(page)? {
            let native_name = match widget.name {
                Some(name) if !name.is_empty() => name,
                _ => continue,
            };

            let field_id = field_id_for(page, &native_name);
            // Radio groups repeat a name across widgets; the first one stands for the group
            if !seen.insert(field_id.clone()) {
                continue;
            }

            let current_value = widget.value.and_then(|value| match value {
                EditValue::Flag(flag) => Some(flag.to_string()),
                EditValue::Text(text) if text.is_empty() => None,
                EditValue::Text(text) => Some(text),
            });

            let options = if widget.kind.has_options() {
                widget.options
            } else {
                None
            };

            fields.push(Field {
                label_context: nearby_text(document, page, &widget.rect, &page_bounds)?,
                field_id,
                field_type: widget.kind,
                page,
                bbox: widget.rect,
                current_value,
                options,
                native_name,
            });
        }
    }

    tracing::debug!(count = fields.len(), "Detected form fields");
    Ok(fields)
}

fn nearby_text(
    document: &dyn FormDocument,
    page: u32,
    rect: &Rect,
    page_bounds: &Rect,
) -> Result<String> {
    let region = rect.expand(LABEL_RADIUS).clip_to(page_bounds);
    let text = document.text_in_rect(page, region)?;
    Ok(normalize_label_text(&text))
}

/// Trim every line, drop blank ones, join with [`LABEL_SEPARATOR`]
pub fn normalize_label_text(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(LABEL_SEPARATOR)
}

/// Human-readable listing of detected fields
pub fn form_summary(fields: &[Field]) -> String {
    if fields.is_empty() {
        return "No fillable form fields detected in this PDF.".to_string();
    }

    let mut lines = vec![format!("Found {} fillable form fields:\n", fields.len())];
    for f in fields {
        lines.push(format!("  - {} ({})", f.field_id, f.field_type));
        lines.push(format!("    Context: {}...", truncate_chars(&f.label_context, 100)));
        if let Some(value) = &f.current_value {
            lines.push(format!("    Current value: {}", value));
        }
        if let Some(options) = &f.options {
            lines.push(format!("    Options: {:?}", options));
        }
        lines.push(String::new());
    }
    lines.join("\n")
}

/// Char-boundary safe prefix of at most `max` characters
pub fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::pdf::memory::{MemoryBackend, MemoryForm, MemoryPage, MemoryWidget};
    use pretty_assertions::assert_eq;

    fn two_page_form() -> Vec<u8> {
        MemoryForm::new()
            .with_page(
                MemoryPage::letter()
                    .with_text(Rect::new(50.0, 730.0, 140.0, 742.0), "  Applicant name  ")
                    .with_text(Rect::new(50.0, 722.0, 140.0, 729.0), "   ")
                    .with_text(Rect::new(400.0, 100.0, 500.0, 110.0), "Far away footer")
                    .with_widget(MemoryWidget::text("Name", Rect::new(50.0, 700.0, 250.0, 720.0)))
                    .with_widget(
                        MemoryWidget::checkbox("Agree", Rect::new(50.0, 650.0, 62.0, 662.0))
                            .with_value(false),
                    )
                    .with_widget(MemoryWidget::unnamed(
                        FieldType::Text,
                        Rect::new(300.0, 300.0, 400.0, 320.0),
                    )),
            )
            .with_page(
                MemoryPage::letter()
                    .with_widget(MemoryWidget::dropdown(
                        "State",
                        Rect::new(50.0, 700.0, 150.0, 720.0),
                        &["CA", "NY"],
                    ))
                    .with_widget(
                        MemoryWidget::text("Name", Rect::new(50.0, 600.0, 250.0, 620.0))
                            .with_value("prefilled"),
                    ),
            )
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_field_ids_compose_page_and_name() {
        let fields = detect_form_fields(&MemoryBackend, &two_page_form()).unwrap();
        let ids: Vec<&str> = fields.iter().map(|f| f.field_id.as_str()).collect();
        assert_eq!(ids, vec!["page0_Name", "page0_Agree", "page1_State", "page1_Name"]);
    }

    #[test]
    fn test_detection_is_deterministic() {
        let data = two_page_form();
        let first = detect_form_fields(&MemoryBackend, &data).unwrap();
        let second = detect_form_fields(&MemoryBackend, &data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_label_context_normalized() {
        let fields = detect_form_fields(&MemoryBackend, &two_page_form()).unwrap();
        assert_eq!(fields[0].label_context, "Applicant name");
        assert!(!fields[0].label_context.contains("footer"));
    }

    #[test]
    fn test_values_and_options() {
        let fields = detect_form_fields(&MemoryBackend, &two_page_form()).unwrap();
        assert_eq!(fields[0].current_value, None);
        assert_eq!(fields[1].current_value.as_deref(), Some("false"));
        assert_eq!(fields[1].options, None);
        assert_eq!(
            fields[2].options,
            Some(vec!["CA".to_string(), "NY".to_string()])
        );
        assert_eq!(fields[3].current_value.as_deref(), Some("prefilled"));
    }

    #[test]
    fn test_selected_option_is_current_value() {
        let data = MemoryForm::new()
            .with_page(MemoryPage::letter().with_widget(
                MemoryWidget::dropdown("State", Rect::new(50.0, 700.0, 150.0, 720.0), &["CA", "NY"])
                    .with_value("NY"),
            ))
            .to_bytes()
            .unwrap();

        let fields = detect_form_fields(&MemoryBackend, &data).unwrap();
        assert_eq!(fields[0].current_value.as_deref(), Some("NY"));
        assert_eq!(
            fields[0].options,
            Some(vec!["CA".to_string(), "NY".to_string()])
        );
    }

    #[test]
    fn test_repeated_name_on_page_collapses() {
        let data = MemoryForm::new()
            .with_page(
                MemoryPage::letter()
                    .with_widget(MemoryWidget::new(
                        "Color",
                        FieldType::Radio,
                        Rect::new(10.0, 10.0, 20.0, 20.0),
                    ))
                    .with_widget(MemoryWidget::new(
                        "Color",
                        FieldType::Radio,
                        Rect::new(30.0, 10.0, 40.0, 20.0),
                    )),
            )
            .to_bytes()
            .unwrap();
        let fields = detect_form_fields(&MemoryBackend, &data).unwrap();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].bbox.left, 10.0);
    }

    #[test]
    fn test_empty_form_is_not_an_error() {
        let data = MemoryForm::new()
            .with_page(MemoryPage::letter())
            .to_bytes()
            .unwrap();
        let fields = detect_form_fields(&MemoryBackend, &data).unwrap();
        assert!(fields.is_empty());
        assert_eq!(
            form_summary(&fields),
            "No fillable form fields detected in this PDF."
        );
    }

    #[test]
    fn test_malformed_document() {
        let result = detect_form_fields(&MemoryBackend, b"definitely not a form");
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
    }

    #[test]
    fn test_truncate_chars_respects_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
