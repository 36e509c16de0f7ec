//! PDF layer
//!
//! Field detection runs against the [`FormBackend`] capability. PDFium is the
//! production backend; [`MemoryBackend`] describes forms as JSON.

mod detect;
mod document;
mod memory;
mod pdfium;

pub use detect::{
    detect_form_fields, detect_in_document, field_id_for, form_summary, normalize_label_text,
    truncate_chars, Field, LABEL_RADIUS, LABEL_SEPARATOR,
};
pub use document::{
    open_document, EditValue, FieldType, FormBackend, FormDocument, Rect, Widget,
    CHECKBOX_TRUTHY,
};
pub use memory::{MemoryBackend, MemoryForm, MemoryPage, MemoryText, MemoryWidget};
pub use pdfium::PdfiumBackend;
