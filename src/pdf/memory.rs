//! In-memory form backend
//!
//! Documents are JSON descriptions of pages, widgets, and positioned text.
//! Used by the test suites and for dry runs of the agent surface on hosts
//! without the PDFium shared library.

use crate::error::{Error, Result};
use crate::pdf::document::{EditValue, FieldType, FormBackend, FormDocument, Rect, Widget};
use serde::{Deserialize, Serialize};

/// Serialized form document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryForm {
    pub pages: Vec<MemoryPage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryPage {
    pub width: f32,
    pub height: f32,
    #[serde(default)]
    pub widgets: Vec<MemoryWidget>,
    #[serde(default)]
    pub texts: Vec<MemoryText>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryWidget {
    pub name: Option<String>,
    pub kind: FieldType,
    pub rect: Rect,
    #[serde(default)]
    pub value: Option<EditValue>,
    #[serde(default)]
    pub options: Option<Vec<String>>,
    #[serde(default)]
    pub read_only: bool,
}

/// A run of text positioned on the page
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryText {
    pub rect: Rect,
    pub text: String,
}

impl MemoryForm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(mut self, page: MemoryPage) -> Self {
        self.pages.push(page);
        self
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data).map_err(|e| Error::InvalidPdf {
            reason: format!("Not a memory form document: {}", e),
        })
    }

    /// Look up a widget by page and name
    pub fn widget(&self, page: u32, name: &str) -> Option<&MemoryWidget> {
        self.pages
            .get(page as usize)?
            .widgets
            .iter()
            .find(|w| w.name.as_deref() == Some(name))
    }
}

impl MemoryPage {
    /// US Letter page
    pub fn letter() -> Self {
        Self::new(612.0, 792.0)
    }

    pub fn new(width: f32, height: f32) -> Self {
        Self {
            width,
            height,
            widgets: Vec::new(),
            texts: Vec::new(),
        }
    }

    pub fn with_widget(mut self, widget: MemoryWidget) -> Self {
        self.widgets.push(widget);
        self
    }

    pub fn with_text(mut self, rect: Rect, text: &str) -> Self {
        self.texts.push(MemoryText {
            rect,
            text: text.to_string(),
        });
        self
    }
}

impl MemoryWidget {
    pub fn new(name: &str, kind: FieldType, rect: Rect) -> Self {
        Self {
            name: Some(name.to_string()),
            kind,
            rect,
            value: None,
            options: None,
            read_only: false,
        }
    }

    pub fn text(name: &str, rect: Rect) -> Self {
        Self::new(name, FieldType::Text, rect)
    }

    pub fn checkbox(name: &str, rect: Rect) -> Self {
        Self::new(name, FieldType::Checkbox, rect)
    }

    pub fn dropdown(name: &str, rect: Rect, options: &[&str]) -> Self {
        let mut widget = Self::new(name, FieldType::Dropdown, rect);
        widget.options = Some(options.iter().map(|o| o.to_string()).collect());
        widget
    }

    pub fn unnamed(kind: FieldType, rect: Rect) -> Self {
        let mut widget = Self::new("", kind, rect);
        widget.name = None;
        widget
    }

    pub fn with_value(mut self, value: impl Into<EditValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }
}

/// Backend over [`MemoryForm`] documents
#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryBackend;

impl MemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

impl FormBackend for MemoryBackend {
    fn with_document(
        &self,
        data: &[u8],
        f: &mut dyn FnMut(&mut dyn FormDocument) -> Result<()>,
    ) -> Result<()> {
        let mut form = MemoryForm::from_bytes(data)?;
        f(&mut form)
    }
}

impl MemoryForm {
    fn page(&self, page: u32) -> Result<&MemoryPage> {
        self.pages.get(page as usize).ok_or(Error::PageOutOfBounds {
            page,
            total: self.pages.len() as u32,
        })
    }
}

impl FormDocument for MemoryForm {
    fn page_count(&self) -> u32 {
        self.pages.len() as u32
    }

    fn page_bounds(&self, page: u32) -> Result<Rect> {
        let page = self.page(page)?;
        Ok(Rect::new(0.0, 0.0, page.width, page.height))
    }

    fn widgets(&self, page: u32) -> Result<Vec<Widget>> {
        Ok(self
            .page(page)?
            .widgets
            .iter()
            .map(|w| Widget {
                name: w.name.clone(),
                kind: w.kind,
                rect: w.rect,
                value: w.value.clone(),
                options: w.options.clone(),
            })
            .collect())
    }

    fn text_in_rect(&self, page: u32, rect: Rect) -> Result<String> {
        let lines: Vec<&str> = self
            .page(page)?
            .texts
            .iter()
            .filter(|t| rect.contains(&t.rect))
            .map(|t| t.text.as_str())
            .collect();
        Ok(lines.join("\n"))
    }

    fn set_value(&mut self, page: u32, name: &str, value: &EditValue) -> Result<()> {
        let total = self.pages.len() as u32;
        let widget = self
            .pages
            .get_mut(page as usize)
            .ok_or(Error::PageOutOfBounds { page, total })?
            .widgets
            .iter_mut()
            .find(|w| w.name.as_deref() == Some(name))
            .ok_or_else(|| Error::WidgetNotFound {
                page,
                name: name.to_string(),
            })?;

        if widget.read_only {
            return Err(Error::WidgetWrite {
                name: name.to_string(),
                reason: "Field is read-only".to_string(),
            });
        }

        widget.value = Some(match widget.kind {
            FieldType::Checkbox => EditValue::Flag(value.is_truthy()),
            FieldType::Dropdown => {
                let text = value.as_text();
                if let Some(options) = &widget.options {
                    if !options.iter().any(|o| *o == *text) {
                        return Err(Error::WidgetWrite {
                            name: name.to_string(),
                            reason: format!("'{}' is not one of the allowed options", text),
                        });
                    }
                }
                EditValue::Text(text.into_owned())
            }
            FieldType::Radio => {
                if !value.is_truthy() {
                    return Err(Error::WidgetWrite {
                        name: name.to_string(),
                        reason: "Radio button can only be selected with a true value".to_string(),
                    });
                }
                EditValue::Flag(true)
            }
            FieldType::Text => EditValue::Text(value.as_text().into_owned()),
        });
        Ok(())
    }

    fn save_to_bytes(&mut self) -> Result<Vec<u8>> {
        self.to_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::document::open_document;

    fn sample() -> MemoryForm {
        MemoryForm::new().with_page(
            MemoryPage::letter()
                .with_text(Rect::new(50.0, 730.0, 120.0, 742.0), "Full name")
                .with_widget(MemoryWidget::text("Name", Rect::new(50.0, 700.0, 250.0, 720.0)))
                .with_widget(MemoryWidget::dropdown(
                    "State",
                    Rect::new(300.0, 700.0, 400.0, 720.0),
                    &["CA", "NY"],
                )),
        )
    }

    #[test]
    fn test_roundtrip_through_backend() {
        let data = sample().to_bytes().unwrap();
        let saved = open_document(&MemoryBackend, &data, |doc| {
            doc.set_value(0, "Name", &EditValue::from("Jane"))?;
            doc.save_to_bytes()
        })
        .unwrap();

        let form = MemoryForm::from_bytes(&saved).unwrap();
        assert_eq!(
            form.widget(0, "Name").unwrap().value,
            Some(EditValue::Text("Jane".to_string()))
        );
    }

    #[test]
    fn test_dropdown_rejects_unknown_option() {
        let mut form = sample();
        let result = form.set_value(0, "State", &EditValue::from("TX"));
        assert!(matches!(result, Err(Error::WidgetWrite { .. })));
        assert!(form.set_value(0, "State", &EditValue::from("NY")).is_ok());
    }

    #[test]
    fn test_radio_selects_only_on_true() {
        let mut form = MemoryForm::new().with_page(MemoryPage::letter().with_widget(
            MemoryWidget::new("Color", FieldType::Radio, Rect::new(50.0, 500.0, 62.0, 512.0)),
        ));
        let result = form.set_value(0, "Color", &EditValue::from("Blue"));
        assert!(matches!(result, Err(Error::WidgetWrite { .. })));
        assert_eq!(form.widget(0, "Color").unwrap().value, None);

        form.set_value(0, "Color", &EditValue::from("yes")).unwrap();
        assert_eq!(
            form.widget(0, "Color").unwrap().value,
            Some(EditValue::Flag(true))
        );
    }

    #[test]
    fn test_missing_widget() {
        let mut form = sample();
        let result = form.set_value(0, "Nope", &EditValue::from("x"));
        assert!(matches!(result, Err(Error::WidgetNotFound { .. })));
    }

    #[test]
    fn test_garbage_is_malformed() {
        let result = open_document(&MemoryBackend, b"%PDF-garbage", |doc| Ok(doc.page_count()));
        assert!(matches!(result, Err(Error::InvalidPdf { .. })));
    }
}
