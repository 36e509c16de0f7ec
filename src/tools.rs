//! Form-filling tool surface
//!
//! Seven operations against one session: `load_pdf`, `list_all_fields`,
//! `search_fields`, `get_field_details`, `set_field`, `get_pending_edits`,
//! `commit_edits`. Callers pass the session explicitly and hold its lock for
//! the duration of the call.

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::pdf::{detect_form_fields, form_summary, truncate_chars, EditValue, Field, FormBackend};
use crate::session::{apply_pending, AppliedEdit, PendingEdit, Session, SessionStore};
use crate::source::resolve_path;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;

/// Context truncation per view
const LIST_CONTEXT_CHARS: usize = 100;
const SEARCH_CONTEXT_CHARS: usize = 150;
const PENDING_CONTEXT_CHARS: usize = 80;

/// Shared dependencies of every tool call
#[derive(Clone)]
pub struct ToolContext {
    pub backend: Arc<dyn FormBackend>,
    pub store: Arc<SessionStore>,
    pub config: Arc<ServerConfig>,
}

impl ToolContext {
    pub fn new(
        backend: Arc<dyn FormBackend>,
        store: Arc<SessionStore>,
        config: Arc<ServerConfig>,
    ) -> Self {
        Self {
            backend,
            store,
            config,
        }
    }

    async fn save(&self, session: &mut Session) {
        if let Err(e) = self.store.save(session).await {
            tracing::warn!(
                session_id = %session.session_id,
                error = %e,
                "Failed to persist session; in-memory state is ahead of storage"
            );
        }
    }
}

// ============================================================================
// Arguments
// ============================================================================

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct LoadPdfArgs {
    /// Path to the PDF file
    pub pdf_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SearchFieldsArgs {
    /// Words or phrase to look for in the text around each field
    pub query: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct FieldIdArgs {
    /// Field id as returned by list_all_fields or search_fields
    pub field_id: String,
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
pub struct SetFieldArgs {
    pub field_id: String,
    /// Text, or true/false for checkboxes
    pub value: EditValue,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct CommitEditsArgs {
    /// Where to save the filled PDF. Defaults to the session's output path.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct NoArgs {}

/// A parsed call to one of the seven tools
#[derive(Debug, Clone)]
pub enum ToolCall {
    LoadPdf(LoadPdfArgs),
    ListAllFields,
    SearchFields(SearchFieldsArgs),
    GetFieldDetails(FieldIdArgs),
    SetField(SetFieldArgs),
    GetPendingEdits,
    CommitEdits(CommitEditsArgs),
}

impl ToolCall {
    /// Parse a call by tool name and JSON arguments
    pub fn parse(name: &str, args: Value) -> Result<Self> {
        let args = if args.is_null() {
            Value::Object(Default::default())
        } else {
            args
        };
        let invalid = |e: serde_json::Error| Error::InvalidArguments {
            tool: name.to_string(),
            reason: e.to_string(),
        };

        Ok(match name {
            "load_pdf" => ToolCall::LoadPdf(serde_json::from_value(args).map_err(invalid)?),
            "list_all_fields" => ToolCall::ListAllFields,
            "search_fields" => {
                ToolCall::SearchFields(serde_json::from_value(args).map_err(invalid)?)
            }
            "get_field_details" => {
                ToolCall::GetFieldDetails(serde_json::from_value(args).map_err(invalid)?)
            }
            "set_field" => ToolCall::SetField(serde_json::from_value(args).map_err(invalid)?),
            "get_pending_edits" => ToolCall::GetPendingEdits,
            "commit_edits" => ToolCall::CommitEdits(serde_json::from_value(args).map_err(invalid)?),
            other => {
                return Err(Error::UnknownTool {
                    name: other.to_string(),
                })
            }
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::LoadPdf(_) => "load_pdf",
            ToolCall::ListAllFields => "list_all_fields",
            ToolCall::SearchFields(_) => "search_fields",
            ToolCall::GetFieldDetails(_) => "get_field_details",
            ToolCall::SetField(_) => "set_field",
            ToolCall::GetPendingEdits => "get_pending_edits",
            ToolCall::CommitEdits(_) => "commit_edits",
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct LoadPdfResult {
    pub success: bool,
    pub message: String,
    pub field_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct FieldSummary {
    pub field_id: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub page: u32,
    pub label_context: String,
    pub has_options: bool,
    /// Applied value if the field was filled, else the value found in the document
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<EditValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct FieldMatch {
    pub field_id: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub page: u32,
    pub label_context: String,
    pub options: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_value: Option<EditValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct FieldDetails {
    pub field_id: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub page: u32,
    pub label_context: String,
    pub options: Option<Vec<String>>,
    pub pending_value: Option<EditValue>,
    pub current_value: Option<EditValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct SetFieldResult {
    pub success: bool,
    pub field_id: String,
    pub value: EditValue,
    pub pending_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct PendingEditsResult {
    pub pending_edits: Vec<PendingEdit>,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct CommitResult {
    /// True only when every staged edit was applied and saved
    pub success: bool,
    pub applied: Vec<AppliedEdit>,
    pub applied_count: usize,
    /// Cumulative applied edits across all commits of the session
    pub total_fields_filled: usize,
    pub errors: Vec<String>,
    pub output_path: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, JsonSchema)]
pub struct AnalyzeResult {
    pub success: bool,
    pub message: String,
    pub summary: String,
    pub fields: Vec<Field>,
    pub field_count: usize,
}

/// Error object handed back to the caller in place of a result
pub fn tool_error(err: &Error) -> Value {
    serde_json::json!({ "error": err.client_message() })
}

// ============================================================================
// Operations
// ============================================================================

/// Run a parsed call against `session`
pub async fn execute(ctx: &ToolContext, session: &mut Session, call: ToolCall) -> Result<Value> {
    let value = match call {
        ToolCall::LoadPdf(args) => serde_json::to_value(load_pdf(ctx, session, &args.pdf_path).await?)?,
        ToolCall::ListAllFields => serde_json::to_value(list_all_fields(session)?)?,
        ToolCall::SearchFields(args) => serde_json::to_value(search_fields(
            session,
            &args.query,
            ctx.config.search_limit,
        )?)?,
        ToolCall::GetFieldDetails(args) => {
            serde_json::to_value(get_field_details(session, &args.field_id)?)?
        }
        ToolCall::SetField(args) => {
            serde_json::to_value(set_field(session, &args.field_id, args.value)?)?
        }
        ToolCall::GetPendingEdits => serde_json::to_value(get_pending_edits(session))?,
        ToolCall::CommitEdits(args) => serde_json::to_value(
            commit_edits(ctx, session, args.output_path.as_deref()).await?,
        )?,
    };
    Ok(value)
}

/// Detect fields in the file at `pdf_path` and make it the session's document
pub async fn load_pdf(ctx: &ToolContext, session: &mut Session, pdf_path: &str) -> Result<LoadPdfResult> {
    let path = ctx.config.validate_path_access(pdf_path)?;
    let backend = Arc::clone(&ctx.backend);

    let (resolved, fields) = tokio::task::spawn_blocking(move || {
        let resolved = resolve_path(&path)?;
        let fields = detect_form_fields(backend.as_ref(), &resolved.data)?;
        Ok::<_, Error>((resolved, fields))
    })
    .await
    .map_err(Error::join)??;

    let field_count = fields.len();
    session.load_document(pdf_path.to_string(), resolved.data, fields);
    ctx.save(session).await;

    tracing::info!(
        session_id = %session.session_id,
        source = %resolved.source_name,
        field_count,
        "Loaded PDF"
    );

    let message = if field_count == 0 {
        form_summary(&[])
    } else {
        format!("Loaded PDF with {} form fields", field_count)
    };
    Ok(LoadPdfResult {
        success: true,
        message,
        field_count,
    })
}

pub fn list_all_fields(session: &Session) -> Result<Vec<FieldSummary>> {
    session.document()?;

    Ok(session
        .fields
        .iter()
        .map(|f| FieldSummary {
            field_id: f.field_id.clone(),
            field_type: f.field_type.to_string(),
            page: f.page,
            label_context: truncate_chars(&f.label_context, LIST_CONTEXT_CHARS).to_string(),
            has_options: f.options.is_some(),
            current_value: session.current_value(f),
        })
        .collect())
}

/// Case-insensitive match of the whole query, or any of its words, against
/// each field's context
pub fn search_fields(session: &Session, query: &str, limit: usize) -> Result<Vec<FieldMatch>> {
    session.document()?;

    let query = query.to_lowercase();
    let words: Vec<&str> = query.split_whitespace().collect();

    Ok(session
        .fields
        .iter()
        .filter(|f| {
            let context = f.label_context.to_lowercase();
            context.contains(&query) || words.iter().any(|w| context.contains(w))
        })
        .take(limit)
        .map(|f| FieldMatch {
            field_id: f.field_id.clone(),
            field_type: f.field_type.to_string(),
            page: f.page,
            label_context: truncate_chars(&f.label_context, SEARCH_CONTEXT_CHARS).to_string(),
            options: f.options.clone(),
            current_value: session.ledger.applied_value(&f.field_id).cloned(),
        })
        .collect())
}

pub fn get_field_details(session: &Session, field_id: &str) -> Result<FieldDetails> {
    session.document()?;

    let field = session.field(field_id).ok_or_else(|| Error::FieldNotFound {
        field_id: field_id.to_string(),
    })?;

    Ok(FieldDetails {
        field_id: field.field_id.clone(),
        field_type: field.field_type.to_string(),
        page: field.page,
        label_context: field.label_context.clone(),
        options: field.options.clone(),
        pending_value: session.ledger.pending_value(field_id).cloned(),
        current_value: session.current_value(field),
    })
}

/// Stage a value; nothing is written until commit
pub fn set_field(session: &mut Session, field_id: &str, value: EditValue) -> Result<SetFieldResult> {
    session.document()?;

    let value = session.ledger.stage(&session.fields, field_id, value)?;
    let pending_count = session.ledger.pending().len();
    tracing::debug!(session_id = %session.session_id, field_id, value = %value, pending_count, "Staged edit");

    Ok(SetFieldResult {
        success: true,
        field_id: field_id.to_string(),
        value,
        pending_count,
    })
}

pub fn get_pending_edits(session: &Session) -> PendingEditsResult {
    let pending_edits = session.ledger.review(&session.fields, PENDING_CONTEXT_CHARS);
    let count = pending_edits.len();
    PendingEditsResult {
        pending_edits,
        count,
    }
}

/// Apply every staged edit, write the filled document, and persist the session.
/// Staged edits are consumed whatever the outcome.
pub async fn commit_edits(
    ctx: &ToolContext,
    session: &mut Session,
    output_path: Option<&str>,
) -> Result<CommitResult> {
    let data = session.document()?.to_vec();
    let output_path = resolve_output_path(&ctx.config, session, output_path);
    let target = ctx.config.validate_output_path_access(&output_path)?;

    let pending = session.ledger.take_pending();
    let fields = session.fields.clone();
    let backend = Arc::clone(&ctx.backend);
    tracing::info!(session_id = %session.session_id, pending = pending.len(), output_path = %output_path, "Committing edits");

    let outcome = tokio::task::spawn_blocking(move || {
        apply_pending(backend.as_ref(), &data, &fields, &pending)
    })
    .await
    .map_err(Error::join)?;

    session.ledger.record(&outcome);
    let mut errors = outcome.errors;

    if let Some(document) = outcome.document {
        if let Err(e) = write_output(&target, &document).await {
            tracing::warn!(path = %target.display(), error = %e, "Failed to write filled PDF");
            errors.push(format!("Failed to write output: {}", e.client_message()));
        }
        session.commit_document(document);
    }

    session.output_path = Some(output_path.clone());
    ctx.save(session).await;

    Ok(CommitResult {
        success: errors.is_empty(),
        applied_count: outcome.applied.len(),
        applied: outcome.applied,
        total_fields_filled: session.ledger.applied().len(),
        errors,
        output_path,
    })
}

/// Explicit path, else the session's output path, else `<stem><suffix>.pdf`
/// beside the loaded file
pub fn resolve_output_path(config: &ServerConfig, session: &Session, explicit: Option<&str>) -> String {
    if let Some(path) = explicit.filter(|p| !p.trim().is_empty()) {
        return path.to_string();
    }
    if let Some(path) = &session.output_path {
        return path.clone();
    }

    let derived = match &session.pdf_path {
        Some(loaded) => {
            let loaded = Path::new(loaded);
            let stem = loaded
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| session.session_id.clone());
            loaded.with_file_name(format!("{}{}.pdf", stem, config.output_suffix))
        }
        None => config
            .data_dir
            .join(format!("{}{}.pdf", session.session_id, config.output_suffix)),
    };
    derived.display().to_string()
}

async fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await?;
        }
    }
    tokio::fs::write(path, data).await?;
    Ok(())
}

/// Detect fields in `data` without a session
pub async fn analyze(backend: Arc<dyn FormBackend>, data: Vec<u8>) -> Result<AnalyzeResult> {
    let fields = tokio::task::spawn_blocking(move || detect_form_fields(backend.as_ref(), &data))
        .await
        .map_err(Error::join)??;

    let field_count = fields.len();
    let message = if field_count == 0 {
        form_summary(&fields)
    } else {
        format!("Found {} fillable form fields", field_count)
    };

    Ok(AnalyzeResult {
        success: true,
        message,
        summary: form_summary(&fields),
        fields,
        field_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{MemoryBackend, MemoryForm, MemoryPage, MemoryWidget, Rect};
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        ctx: ToolContext,
        form_path: String,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            data_dir: dir.path().join("data"),
            db_path: dir.path().join("sessions.db"),
            ..ServerConfig::default()
        };
        let store = SessionStore::open(&config.db_path, &config.data_dir)
            .await
            .unwrap();

        let form = MemoryForm::new().with_page(
            MemoryPage::letter()
                .with_text(Rect::new(50.0, 725.0, 200.0, 737.0), "Full legal name")
                .with_widget(MemoryWidget::text("Name", Rect::new(50.0, 700.0, 250.0, 720.0)))
                .with_text(Rect::new(300.0, 500.0, 500.0, 512.0), "Email address")
                .with_widget(MemoryWidget::text("Email", Rect::new(300.0, 470.0, 500.0, 490.0)))
                .with_text(Rect::new(70.0, 300.0, 160.0, 312.0), "I agree to the terms")
                .with_widget(MemoryWidget::checkbox("Agree", Rect::new(50.0, 300.0, 62.0, 312.0)))
                .with_widget(MemoryWidget::dropdown(
                    "State",
                    Rect::new(300.0, 100.0, 400.0, 120.0),
                    &["CA", "NY"],
                )),
        );
        let form_path = dir.path().join("application.pdf");
        std::fs::write(&form_path, form.to_bytes().unwrap()).unwrap();

        Fixture {
            ctx: ToolContext::new(Arc::new(MemoryBackend), Arc::new(store), Arc::new(config)),
            form_path: form_path.display().to_string(),
            _dir: dir,
        }
    }

    #[test]
    fn test_tools_require_loaded_document() {
        let session = Session::new("s");
        assert!(matches!(list_all_fields(&session), Err(Error::NoDocumentLoaded)));
        assert!(matches!(
            search_fields(&session, "name", 10),
            Err(Error::NoDocumentLoaded)
        ));
        assert_eq!(get_pending_edits(&session).count, 0);
    }

    #[tokio::test]
    async fn test_load_and_list() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        let loaded = load_pdf(&fx.ctx, &mut session, &fx.form_path).await.unwrap();
        assert_eq!(loaded.field_count, 4);
        assert_eq!(loaded.message, "Loaded PDF with 4 form fields");

        let fields = list_all_fields(&session).unwrap();
        assert_eq!(fields[0].field_id, "page0_Name");
        assert_eq!(fields[0].label_context, "Full legal name");
        assert!(fields[3].has_options);
        assert!(session.original_pdf.is_some());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        let result = load_pdf(&fx.ctx, &mut session, "/no/such/form.pdf").await;
        assert!(matches!(result, Err(Error::PdfNotFound { .. })));
        assert!(!session.is_loaded());
    }

    #[tokio::test]
    async fn test_search_matches_any_word() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        load_pdf(&fx.ctx, &mut session, &fx.form_path).await.unwrap();

        let hits = search_fields(&session, "EMAIL", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].field_id, "page0_Email");

        let hits = search_fields(&session, "legal terms", 10).unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.field_id.as_str()).collect();
        assert_eq!(ids, vec!["page0_Name", "page0_Agree"]);

        let hits = search_fields(&session, "legal terms", 1).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_field_details_show_pending_and_applied() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        load_pdf(&fx.ctx, &mut session, &fx.form_path).await.unwrap();

        set_field(&mut session, "page0_Name", "Jane".into()).unwrap();
        let details = get_field_details(&session, "page0_Name").unwrap();
        assert_eq!(details.pending_value, Some("Jane".into()));
        assert_eq!(details.current_value, None);

        let missing = get_field_details(&session, "page0_Nope").unwrap_err();
        assert_eq!(missing.client_message(), "Field not found: page0_Nope");
    }

    #[tokio::test]
    async fn test_commit_derives_output_path() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        load_pdf(&fx.ctx, &mut session, &fx.form_path).await.unwrap();
        set_field(&mut session, "page0_Name", "Jane Doe".into()).unwrap();

        let result = commit_edits(&fx.ctx, &mut session, None).await.unwrap();
        assert!(result.success);
        assert!(result.output_path.ends_with("application_filled.pdf"));
        assert!(Path::new(&result.output_path).exists());
        assert_eq!(session.output_path.as_deref(), Some(result.output_path.as_str()));
        assert!(session.current_pdf.is_some());
    }

    #[tokio::test]
    async fn test_commit_reports_widget_rejection() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        load_pdf(&fx.ctx, &mut session, &fx.form_path).await.unwrap();
        set_field(&mut session, "page0_State", "TX".into()).unwrap();
        set_field(&mut session, "page0_Email", "jane@example.com".into()).unwrap();

        let result = commit_edits(&fx.ctx, &mut session, None).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.applied_count, 1);
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].starts_with("Failed to apply page0_State"));
        assert!(session.ledger.pending().is_empty());
    }

    #[tokio::test]
    async fn test_set_field_result_shape() {
        let fx = fixture().await;
        let mut session = Session::new("s");
        load_pdf(&fx.ctx, &mut session, &fx.form_path).await.unwrap();

        let result = set_field(&mut session, "page0_Agree", "YES".into()).unwrap();
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            serde_json::json!({
                "success": true,
                "field_id": "page0_Agree",
                "value": true,
                "pending_count": 1
            })
        );
    }

    #[test]
    fn test_output_path_precedence() {
        let config = ServerConfig::default();
        let mut session = Session::new("s");
        session.pdf_path = Some("/forms/w9.pdf".to_string());

        assert_eq!(
            resolve_output_path(&config, &session, Some("/out/x.pdf")),
            "/out/x.pdf"
        );
        assert_eq!(
            resolve_output_path(&config, &session, None),
            "/forms/w9_filled.pdf"
        );

        session.output_path = Some("/out/session.pdf".to_string());
        assert_eq!(
            resolve_output_path(&config, &session, Some("  ")),
            "/out/session.pdf"
        );
    }

    #[test]
    fn test_parse_tool_calls() {
        let call = ToolCall::parse(
            "set_field",
            serde_json::json!({"field_id": "page0_Agree", "value": true}),
        )
        .unwrap();
        assert_eq!(call.name(), "set_field");
        assert!(matches!(
            call,
            ToolCall::SetField(SetFieldArgs {
                value: EditValue::Flag(true),
                ..
            })
        ));

        assert!(matches!(
            ToolCall::parse("list_all_fields", Value::Null),
            Ok(ToolCall::ListAllFields)
        ));
        assert!(matches!(
            ToolCall::parse("commit_edits", Value::Null),
            Ok(ToolCall::CommitEdits(CommitEditsArgs { output_path: None }))
        ));
        assert!(matches!(
            ToolCall::parse("search_fields", serde_json::json!({})),
            Err(Error::InvalidArguments { .. })
        ));
        assert!(matches!(
            ToolCall::parse("rm_rf", Value::Null),
            Err(Error::UnknownTool { .. })
        ));
    }

    #[tokio::test]
    async fn test_analyze_empty_form() {
        let data = MemoryForm::new()
            .with_page(MemoryPage::letter())
            .to_bytes()
            .unwrap();
        let result = analyze(Arc::new(MemoryBackend), data).await.unwrap();
        assert_eq!(result.field_count, 0);
        assert_eq!(result.message, "No fillable form fields detected in this PDF.");
    }
}
