//! Document capability consumed by the form-filling core
//!
//! A backend opens raw bytes into a live [`FormDocument`], hands it to a
//! closure, and closes it when the closure returns. Nothing outside that
//! closure may hold the live handle.

use crate::error::{Error, Result};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;

/// Strings that turn a checkbox on (compared case-insensitively)
pub const CHECKBOX_TRUTHY: [&str; 4] = ["true", "yes", "1", "checked"];

/// Kind of fillable widget
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Checkbox,
    Dropdown,
    Radio,
}

impl FieldType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Checkbox => "checkbox",
            FieldType::Dropdown => "dropdown",
            FieldType::Radio => "radio",
        }
    }

    /// Whether detected fields of this kind carry an option list
    pub fn has_options(&self) -> bool {
        matches!(self, FieldType::Dropdown | FieldType::Radio)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Value staged for, or applied to, a field.
///
/// Serialized untagged so tool arguments may be either `"text"` or `true`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum EditValue {
    Flag(bool),
    Text(String),
}

impl EditValue {
    /// Checkbox reading of this value: flags pass through, text is matched
    /// against [`CHECKBOX_TRUTHY`].
    pub fn is_truthy(&self) -> bool {
        match self {
            EditValue::Flag(flag) => *flag,
            EditValue::Text(text) => {
                let lowered = text.to_lowercase();
                CHECKBOX_TRUTHY.contains(&lowered.as_str())
            }
        }
    }

    /// Normalize the value for a field of `kind`. Checkboxes always end up as
    /// a flag; every other kind keeps the value as given.
    pub fn coerce_for(self, kind: FieldType) -> EditValue {
        match kind {
            FieldType::Checkbox => EditValue::Flag(self.is_truthy()),
            _ => self,
        }
    }

    /// Text rendering used when writing into non-checkbox widgets
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            EditValue::Flag(true) => Cow::Borrowed("true"),
            EditValue::Flag(false) => Cow::Borrowed("false"),
            EditValue::Text(text) => Cow::Borrowed(text.as_str()),
        }
    }
}

impl fmt::Display for EditValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_text())
    }
}

impl From<&str> for EditValue {
    fn from(value: &str) -> Self {
        EditValue::Text(value.to_string())
    }
}

impl From<String> for EditValue {
    fn from(value: String) -> Self {
        EditValue::Text(value)
    }
}

impl From<bool> for EditValue {
    fn from(value: bool) -> Self {
        EditValue::Flag(value)
    }
}

/// Rectangle in PDF user space (origin bottom-left, points)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Rect {
    pub left: f32,
    pub bottom: f32,
    pub right: f32,
    pub top: f32,
}

impl Rect {
    pub fn new(left: f32, bottom: f32, right: f32, top: f32) -> Self {
        Self {
            left,
            bottom,
            right,
            top,
        }
    }

    /// Grow by `radius` in all four directions
    pub fn expand(&self, radius: f32) -> Rect {
        Rect::new(
            self.left - radius,
            self.bottom - radius,
            self.right + radius,
            self.top + radius,
        )
    }

    /// Clip to `bounds`. Disjoint rectangles collapse to an empty rect at the
    /// nearest edge of `bounds`.
    pub fn clip_to(&self, bounds: &Rect) -> Rect {
        let left = self.left.clamp(bounds.left, bounds.right);
        let right = self.right.clamp(left, bounds.right);
        let bottom = self.bottom.clamp(bounds.bottom, bounds.top);
        let top = self.top.clamp(bottom, bounds.top);
        Rect::new(left, bottom, right, top)
    }

    pub fn contains(&self, other: &Rect) -> bool {
        other.left >= self.left
            && other.right <= self.right
            && other.bottom >= self.bottom
            && other.top <= self.top
    }
}

/// A native widget as reported by the backend
#[derive(Debug, Clone, PartialEq)]
pub struct Widget {
    /// Fully qualified field name; widgets without one are not fillable
    pub name: Option<String>,
    pub kind: FieldType,
    pub rect: Rect,
    /// Current value; checkboxes and radio buttons report a flag
    pub value: Option<EditValue>,
    /// Choice values (dropdown/list widgets)
    pub options: Option<Vec<String>>,
}

/// Live, open document. Pages are 0-indexed.
pub trait FormDocument {
    fn page_count(&self) -> u32;

    /// Page bounds (media box) in user space
    fn page_bounds(&self, page: u32) -> Result<Rect>;

    /// Widgets on `page` in document order
    fn widgets(&self, page: u32) -> Result<Vec<Widget>>;

    /// All text inside `rect`, line-separated
    fn text_in_rect(&self, page: u32, rect: Rect) -> Result<String>;

    /// Write `value` into the first widget on `page` named `name`
    fn set_value(&mut self, page: u32, name: &str, value: &EditValue) -> Result<()>;

    /// Serialize the whole document
    fn save_to_bytes(&mut self) -> Result<Vec<u8>>;
}

/// Something that can open raw bytes into a [`FormDocument`]
pub trait FormBackend: Send + Sync {
    /// Open `data`, run `f` against the live document, then close it.
    fn with_document(
        &self,
        data: &[u8],
        f: &mut dyn FnMut(&mut dyn FormDocument) -> Result<()>,
    ) -> Result<()>;
}

/// Open → use → close in one call, returning what `f` produces.
pub fn open_document<R>(
    backend: &dyn FormBackend,
    data: &[u8],
    f: impl FnOnce(&mut dyn FormDocument) -> Result<R>,
) -> Result<R> {
    let mut f = Some(f);
    let mut output = None;
    backend.with_document(data, &mut |document| {
        if let Some(f) = f.take() {
            output = Some(f(document)?);
        }
        Ok(())
    })?;
    output.ok_or_else(|| Error::InvalidPdf {
        reason: "Backend did not open the document".to_string(),
    })
}

/// Reject anything that does not start with the PDF magic
pub(crate) fn check_pdf_header(data: &[u8]) -> Result<()> {
    if data.len() < 4 || &data[0..4] != b"%PDF" {
        return Err(Error::InvalidPdf {
            reason: "Not a valid PDF file".to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("true")]
    #[case("TRUE")]
    #[case("yes")]
    #[case("Yes")]
    #[case("1")]
    #[case("checked")]
    #[case("Checked")]
    fn test_checkbox_truthy_vocabulary(#[case] raw: &str) {
        let value = EditValue::from(raw).coerce_for(FieldType::Checkbox);
        assert_eq!(value, EditValue::Flag(true));
    }

    #[rstest]
    #[case("false")]
    #[case("no")]
    #[case("0")]
    #[case("on")]
    #[case("")]
    #[case("x")]
    #[case(" yes ")]
    #[case("true\n")]
    fn test_checkbox_other_strings_are_false(#[case] raw: &str) {
        let value = EditValue::from(raw).coerce_for(FieldType::Checkbox);
        assert_eq!(value, EditValue::Flag(false));
    }

    #[test]
    fn test_non_checkbox_keeps_value() {
        let value = EditValue::from("yes").coerce_for(FieldType::Text);
        assert_eq!(value, EditValue::Text("yes".to_string()));
        assert_eq!(EditValue::Flag(true).as_text(), "true");
    }

    #[test]
    fn test_edit_value_json_shape() {
        let text: EditValue = serde_json::from_str("\"Jane\"").unwrap();
        let flag: EditValue = serde_json::from_str("true").unwrap();
        assert_eq!(text, EditValue::Text("Jane".to_string()));
        assert_eq!(flag, EditValue::Flag(true));
        assert_eq!(serde_json::to_string(&flag).unwrap(), "true");
    }

    #[test]
    fn test_rect_expand_and_clip() {
        let page = Rect::new(0.0, 0.0, 612.0, 792.0);
        let widget = Rect::new(50.0, 700.0, 200.0, 720.0);
        let region = widget.expand(100.0).clip_to(&page);
        assert_eq!(region, Rect::new(0.0, 600.0, 300.0, 792.0));
        assert!(page.contains(&region));
    }

    #[test]
    fn test_header_check() {
        assert!(check_pdf_header(b"%PDF-1.7").is_ok());
        assert!(matches!(
            check_pdf_header(b"nope"),
            Err(Error::InvalidPdf { .. })
        ));
    }
}
