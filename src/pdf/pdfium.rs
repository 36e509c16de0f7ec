//! PDFium-backed form document

use crate::error::{Error, Result};
use crate::pdf::document::{
    check_pdf_header, EditValue, FieldType, FormBackend, FormDocument, Rect, Widget,
};
use pdfium_render::prelude::*;

/// Get PDFium instance (creates new instance each time - PDFium is not thread-safe)
fn create_pdfium() -> Result<Pdfium> {
    // Try to bind to system library or use static linking
    let bindings = Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(
                "/opt/pdfium/lib",
            ))
        })
        .or_else(|_| Pdfium::bind_to_system_library())
        .map_err(|e| Error::Pdfium {
            reason: format!("Failed to initialize PDFium: {}", e),
        })?;

    Ok(Pdfium::new(bindings))
}

/// Map PDFium load errors to our error type
fn map_load_error(err: PdfiumError) -> Error {
    match err {
        PdfiumError::PdfiumLibraryInternalError(PdfiumInternalError::PasswordError) => {
            Error::PasswordRequired
        }
        _ => Error::InvalidPdf {
            reason: format!("{}", err),
        },
    }
}

/// Backend that opens documents with PDFium
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumBackend;

impl PdfiumBackend {
    pub fn new() -> Self {
        Self
    }
}

impl FormBackend for PdfiumBackend {
    fn with_document(
        &self,
        data: &[u8],
        f: &mut dyn FnMut(&mut dyn FormDocument) -> Result<()>,
    ) -> Result<()> {
        check_pdf_header(data)?;

        let pdfium = create_pdfium()?;
        let document = pdfium
            .load_pdf_from_byte_slice(data, None)
            .map_err(map_load_error)?;

        let mut live = PdfiumFormDocument { document };
        f(&mut live)
        // `live` (and the PDFium handle) is dropped here, closing the document
    }
}

struct PdfiumFormDocument<'a> {
    document: PdfDocument<'a>,
}

impl<'a> PdfiumFormDocument<'a> {
    fn page(&self, page: u32) -> Result<PdfPage<'a>> {
        let total = self.page_count();
        if page >= total {
            return Err(Error::PageOutOfBounds { page, total });
        }
        self.document
            .pages()
            .get(page as u16)
            .map_err(|e| Error::Pdfium {
                reason: format!("Failed to get page {}: {}", page + 1, e),
            })
    }
}

fn to_rect(rect: &PdfRect) -> Rect {
    Rect::new(
        rect.left().value,
        rect.bottom().value,
        rect.right().value,
        rect.top().value,
    )
}

fn choice_labels(options: &PdfFormFieldOptions) -> Vec<String> {
    let mut labels = Vec::new();
    for i in 0..options.len() {
        if let Ok(opt) = options.get(i) {
            if let Some(label) = opt.label() {
                labels.push(label.clone());
            }
        }
    }
    labels
}

/// Label of the first selected option, if any
fn selected_label(options: &PdfFormFieldOptions) -> Option<String> {
    (0..options.len())
        .filter_map(|i| options.get(i).ok())
        .find(|opt| opt.is_set())
        .and_then(|opt| opt.label().cloned())
}

impl<'a> FormDocument for PdfiumFormDocument<'a> {
    fn page_count(&self) -> u32 {
        self.document.pages().len() as u32
    }

    fn page_bounds(&self, page: u32) -> Result<Rect> {
        let page = self.page(page)?;
        Ok(Rect::new(0.0, 0.0, page.width().value, page.height().value))
    }

    fn widgets(&self, page: u32) -> Result<Vec<Widget>> {
        let page = self.page(page)?;
        let mut widgets = Vec::new();

        for annotation in page.annotations().iter() {
            let Some(field) = annotation.as_form_field() else {
                continue;
            };

            let rect = annotation
                .bounds()
                .map(|b| to_rect(&b))
                .unwrap_or(Rect::new(0.0, 0.0, 0.0, 0.0));

            let mut widget = Widget {
                name: field.name(),
                kind: FieldType::Text,
                rect,
                value: None,
                options: None,
            };

            if let Some(text_field) = field.as_text_field() {
                widget.value = text_field.value().map(EditValue::Text);
            } else if let Some(checkbox) = field.as_checkbox_field() {
                widget.kind = FieldType::Checkbox;
                widget.value = checkbox.is_checked().ok().map(EditValue::Flag);
            } else if let Some(radio) = field.as_radio_button_field() {
                widget.kind = FieldType::Radio;
                widget.value = radio.is_checked().ok().map(EditValue::Flag);
            } else if let Some(combo) = field.as_combo_box_field() {
                widget.kind = FieldType::Dropdown;
                widget.value = selected_label(combo.options()).map(EditValue::Text);
                widget.options = Some(choice_labels(combo.options()));
            } else if let Some(list) = field.as_list_box_field() {
                widget.kind = FieldType::Dropdown;
                widget.value = selected_label(list.options()).map(EditValue::Text);
                widget.options = Some(choice_labels(list.options()));
            }

            widgets.push(widget);
        }

        Ok(widgets)
    }

    fn text_in_rect(&self, page: u32, rect: Rect) -> Result<String> {
        let page = self.page(page)?;
        let text = match page.text() {
            Ok(t) => t,
            Err(_) => return Ok(String::new()),
        };
        let region = PdfRect::new_from_values(rect.bottom, rect.left, rect.top, rect.right);
        Ok(text.inside_rect(region))
    }

    fn set_value(&mut self, page: u32, name: &str, value: &EditValue) -> Result<()> {
        let page_index = page;
        let page = self.page(page)?;

        for mut annotation in page.annotations().iter() {
            let Some(field) = annotation.as_form_field_mut() else {
                continue;
            };
            if field.name().as_deref() != Some(name) {
                continue;
            }

            let write_error = |e: PdfiumError| Error::WidgetWrite {
                name: name.to_string(),
                reason: e.to_string(),
            };

            if let Some(text_field) = field.as_text_field_mut() {
                text_field.set_value(&value.as_text()).map_err(write_error)?;
            } else if let Some(checkbox) = field.as_checkbox_field_mut() {
                checkbox
                    .set_checked(value.is_truthy())
                    .map_err(write_error)?;
            } else if let Some(radio) = field.as_radio_button_field_mut() {
                if !value.is_truthy() {
                    return Err(Error::WidgetWrite {
                        name: name.to_string(),
                        reason: "Radio button can only be selected with a true value".to_string(),
                    });
                }
                radio.set_checked().map_err(write_error)?;
            } else {
                return Err(Error::WidgetWrite {
                    name: name.to_string(),
                    reason: "Unsupported field type for writing".to_string(),
                });
            }
            return Ok(());
        }

        Err(Error::WidgetNotFound {
            page: page_index,
            name: name.to_string(),
        })
    }

    fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        self.document.save_to_bytes().map_err(|e| Error::Pdfium {
            reason: format!("Failed to save modified PDF: {}", e),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::document::open_document;

    #[test]
    fn test_invalid_pdf_detection() {
        let backend = PdfiumBackend::new();
        let result = open_document(&backend, b"not a pdf", |doc| Ok(doc.page_count()));
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
    }
}
