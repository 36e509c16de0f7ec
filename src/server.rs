//! MCP Server implementation using rmcp
//!
//! Exposes the form-filling tools over stdio. Every session tool names its
//! session explicitly; the server holds no per-connection state.

use crate::config::ServerConfig;
use crate::error::Error;
use crate::pdf::{EditValue, FormBackend, PdfiumBackend};
use crate::session::{spawn_cleanup_task, SessionStore};
use crate::source::{resolve_base64, resolve_path};
use crate::tools::{
    self, CommitEditsArgs, FieldIdArgs, LoadPdfArgs, SearchFieldsArgs, SetFieldArgs, ToolCall,
    ToolContext,
};
use anyhow::Result;
use rmcp::{
    handler::server::tool::ToolRouter, handler::server::wrapper::Parameters, model::*,
    schemars::JsonSchema, tool, tool_handler, tool_router, ServerHandler, ServiceExt,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

// ============================================================================
// Request types
// ============================================================================

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct CreateSessionParams {
    /// Optional id for the new session (letters, digits, '-' and '_'). Generated when omitted.
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SessionParams {
    /// Session id returned by create_session or load_pdf
    pub session_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct LoadPdfParams {
    /// Session to load into. A new session is created when omitted or unknown.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Path to the PDF file
    pub pdf_path: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchFieldsParams {
    pub session_id: String,
    /// Words or phrase to look for in the text around each field
    pub query: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FieldParams {
    pub session_id: String,
    /// Field id as returned by list_all_fields or search_fields
    pub field_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetFieldParams {
    pub session_id: String,
    pub field_id: String,
    /// Text, or true/false for checkboxes
    pub value: EditValue,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct CommitEditsParams {
    pub session_id: String,
    /// Where to save the filled PDF. Defaults to the session's output path.
    #[serde(default)]
    pub output_path: Option<String>,
}

#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct AnalyzePdfParams {
    /// Path to the PDF file
    #[serde(default)]
    pub path: Option<String>,
    /// Base64 encoded PDF content
    #[serde(default)]
    pub base64: Option<String>,
}

#[derive(Debug, Serialize)]
struct DeleteSessionResult {
    session_id: String,
    deleted: bool,
}

/// Form-filling MCP server
#[derive(Clone)]
pub struct FormServer {
    ctx: ToolContext,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl FormServer {
    pub fn new(ctx: ToolContext) -> Self {
        Self {
            ctx,
            tool_router: Self::tool_router(),
        }
    }

    /// Create a new form-filling session
    #[tool(
        description = "Create a new form-filling session. Returns the session info including its session_id, which every other session tool requires."
    )]
    async fn create_session(&self, Parameters(params): Parameters<CreateSessionParams>) -> String {
        let result = async {
            let handle = self.ctx.store.create(params.session_id).await?;
            let info = handle.lock().await.info();
            Ok::<_, Error>(info)
        }
        .await;
        respond("create_session", result)
    }

    /// Load a PDF into a session and detect its fields
    #[tool(
        description = "Load a PDF file into a session and detect its fillable fields. Creates the session when session_id is omitted or unknown. The result includes the session_id to use for later calls."
    )]
    async fn load_pdf(&self, Parameters(params): Parameters<LoadPdfParams>) -> String {
        let result = async {
            let handle = self
                .ctx
                .store
                .get_or_create(params.session_id.as_deref())
                .await?;
            let mut session = handle.lock().await;
            let call = ToolCall::LoadPdf(LoadPdfArgs {
                pdf_path: params.pdf_path,
            });
            let mut value = tools::execute(&self.ctx, &mut session, call).await?;
            if let Value::Object(map) = &mut value {
                map.insert(
                    "session_id".to_string(),
                    Value::String(session.session_id.clone()),
                );
            }
            Ok::<_, Error>(value)
        }
        .await;
        respond("load_pdf", result)
    }

    /// List every detected field with its current value
    #[tool(
        description = "List all form fields in the session's PDF with type, page, nearby label text, and current value."
    )]
    async fn list_all_fields(&self, Parameters(params): Parameters<SessionParams>) -> String {
        self.run_tool(&params.session_id, ToolCall::ListAllFields)
            .await
    }

    /// Search fields by nearby text
    #[tool(
        description = "Search form fields whose nearby label text contains the query or any of its words (case-insensitive)."
    )]
    async fn search_fields(&self, Parameters(params): Parameters<SearchFieldsParams>) -> String {
        let call = ToolCall::SearchFields(SearchFieldsArgs {
            query: params.query,
        });
        self.run_tool(&params.session_id, call).await
    }

    /// Full details of one field
    #[tool(
        description = "Get full details of one field: options, staged value, and current value."
    )]
    async fn get_field_details(&self, Parameters(params): Parameters<FieldParams>) -> String {
        let call = ToolCall::GetFieldDetails(FieldIdArgs {
            field_id: params.field_id,
        });
        self.run_tool(&params.session_id, call).await
    }

    /// Stage a value for a field
    #[tool(
        description = "Stage a value for a field. Nothing is written until commit_edits. Checkbox values are coerced to true/false."
    )]
    async fn set_field(&self, Parameters(params): Parameters<SetFieldParams>) -> String {
        let call = ToolCall::SetField(SetFieldArgs {
            field_id: params.field_id,
            value: params.value,
        });
        self.run_tool(&params.session_id, call).await
    }

    /// Review staged edits
    #[tool(description = "Review all staged edits before committing.")]
    async fn get_pending_edits(&self, Parameters(params): Parameters<SessionParams>) -> String {
        self.run_tool(&params.session_id, ToolCall::GetPendingEdits)
            .await
    }

    /// Apply staged edits and write the filled PDF
    #[tool(
        description = "Apply all staged edits and save the filled PDF. Output path is optional; per-field failures are reported in errors."
    )]
    async fn commit_edits(&self, Parameters(params): Parameters<CommitEditsParams>) -> String {
        let call = ToolCall::CommitEdits(CommitEditsArgs {
            output_path: params.output_path,
        });
        self.run_tool(&params.session_id, call).await
    }

    /// Detect fields without creating a session
    #[tool(
        description = "Detect the fillable fields of a PDF without creating a session. Provide exactly one of path or base64."
    )]
    async fn analyze_pdf(&self, Parameters(params): Parameters<AnalyzePdfParams>) -> String {
        let result = self.process_analyze(params).await;
        respond("analyze_pdf", result)
    }

    /// Describe a session
    #[tool(description = "Get the state of a session: loaded PDF, output path, and edit counts.")]
    async fn get_session_info(&self, Parameters(params): Parameters<SessionParams>) -> String {
        let result = self
            .ctx
            .store
            .session_info(&params.session_id)
            .await
            .ok_or_else(|| Error::SessionNotFound {
                session_id: params.session_id.clone(),
            });
        respond("get_session_info", result)
    }

    /// Delete a session and its stored documents
    #[tool(description = "Delete a session and its stored documents.")]
    async fn delete_session(&self, Parameters(params): Parameters<SessionParams>) -> String {
        let result = self
            .ctx
            .store
            .delete(&params.session_id)
            .await
            .map(|deleted| DeleteSessionResult {
                session_id: params.session_id.clone(),
                deleted,
            });
        respond("delete_session", result)
    }
}

impl FormServer {
    /// Run one tool against an existing session, holding its lock for the call
    async fn run_tool(&self, session_id: &str, call: ToolCall) -> String {
        let name = call.name();
        let result = async {
            let handle = self
                .ctx
                .store
                .get(session_id)
                .ok_or_else(|| Error::SessionNotFound {
                    session_id: session_id.to_string(),
                })?;
            let mut session = handle.lock().await;
            tools::execute(&self.ctx, &mut session, call).await
        }
        .await;
        respond(name, result)
    }

    async fn process_analyze(&self, params: AnalyzePdfParams) -> crate::Result<tools::AnalyzeResult> {
        let resolved = match (params.path, params.base64) {
            (Some(path), None) => {
                let path = self.ctx.config.validate_path_access(&path)?;
                tokio::task::spawn_blocking(move || resolve_path(&path))
                    .await
                    .map_err(Error::join)??
            }
            (None, Some(encoded)) => resolve_base64(&encoded)?,
            _ => {
                return Err(Error::InvalidArguments {
                    tool: "analyze_pdf".to_string(),
                    reason: "provide exactly one of path or base64".to_string(),
                })
            }
        };
        tracing::debug!(source = %resolved.source_name, "Analyzing PDF");
        tools::analyze(Arc::clone(&self.ctx.backend), resolved.data).await
    }
}

/// Serialize a tool result, or the sanitized error object
fn respond<T: Serialize>(tool: &str, result: crate::Result<T>) -> String {
    match result {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_default(),
        Err(e) => {
            if e.is_input_error() {
                tracing::debug!(tool, error = %e, "Tool rejected input");
            } else {
                tracing::warn!(tool, error = %e, "Tool failed");
            }
            serde_json::to_string_pretty(&tools::tool_error(&e)).unwrap_or_default()
        }
    }
}

#[tool_handler]
impl ServerHandler for FormServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "PDF form-filling server. Call load_pdf (or create_session) to get a session_id, \
                 inspect fields with list_all_fields or search_fields, stage values with set_field, \
                 review with get_pending_edits, and write the filled PDF with commit_edits."
                    .into(),
            ),
        }
    }
}

/// Run the MCP server with default configuration
pub async fn run_server() -> Result<()> {
    run_server_with_config(ServerConfig::default()).await
}

/// Run the MCP server with full configuration
pub async fn run_server_with_config(config: ServerConfig) -> Result<()> {
    let config = Arc::new(config);
    let store = Arc::new(SessionStore::open(&config.db_path, &config.data_dir).await?);
    tracing::info!(
        sessions = store.len(),
        db_path = %config.db_path.display(),
        "Session store opened"
    );

    let _cleanup = spawn_cleanup_task(
        Arc::clone(&store),
        config.cleanup_interval,
        config.session_max_age,
    );

    let backend: Arc<dyn FormBackend> = Arc::new(PdfiumBackend::new());
    let server = FormServer::new(ToolContext::new(backend, store, config));

    tracing::info!("PDF form server ready, waiting for connections...");

    let service = server.serve(rmcp::transport::io::stdio()).await?;
    service.waiting().await?;

    Ok(())
}
