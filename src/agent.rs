//! Agent turn runner
//!
//! A turn hands the fixed tool catalog to an external [`DecisionMaker`] and
//! streams what happens as [`TurnEvent`]s. The decision-maker only reaches
//! the session through [`ToolInvoker`], which locks the session per call.

use crate::error::{Error, Result};
use crate::pdf::EditValue;
use crate::session::SessionHandle;
use crate::tools::{
    execute, tool_error, CommitEditsArgs, FieldIdArgs, LoadPdfArgs, NoArgs, SearchFieldsArgs,
    SetFieldArgs, ToolCall, ToolContext,
};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Buffered events per turn before the producer waits on the consumer
const EVENT_BUFFER: usize = 64;

pub const SYSTEM_PROMPT: &str = r#"You are a form-filling agent. Your job is to fill out PDF forms based on user instructions.

## Available Tools:
- load_pdf: Load a PDF file
- list_all_fields: See all form fields (includes current values if already filled)
- search_fields: Find fields matching a query
- get_field_details: Get details about a specific field
- set_field: Stage a value for a field
- get_pending_edits: Review staged edits
- commit_edits: Apply all edits and save

## Workflow:
1. Call load_pdf with the PDF path
2. Call list_all_fields to see all fields
3. For each value to fill, search for the matching field if needed, then call set_field
4. Call get_pending_edits to review
5. Call commit_edits to save

## Parallel tool use:
When setting several fields, issue all set_field calls at once. Wait for every
set_field result before calling commit_edits.

## Rules:
- For dropdowns, use exact option values
- For checkboxes, use "true" or "false"
- Always review with get_pending_edits before committing
"#;

pub const CONTINUATION_SYSTEM_PROMPT: &str = r#"You are a form-filling agent continuing a multi-turn conversation.

## Context:
- The user already filled this form in a previous turn
- The PDF you load contains the previously filled values
- Only modify the fields the user asks about; leave all others unchanged

## Available Tools:
- load_pdf: Load the already-filled PDF
- list_all_fields: See all fields with their current values
- search_fields: Find fields matching a query
- get_field_details: Get details about a specific field
- set_field: Stage a new value for a field
- get_pending_edits: Review staged edits
- commit_edits: Apply changes and save

## Workflow:
1. Load the PDF
2. List fields to see what is currently filled
3. Call set_field only for the fields the user wants to change
4. Review and commit
"#;

/// One entry of the tool catalog offered to the decision-maker
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
}

pub const TOOL_CATALOG: [ToolSpec; 7] = [
    ToolSpec {
        name: "load_pdf",
        description: "Load a PDF file for form filling",
    },
    ToolSpec {
        name: "list_all_fields",
        description: "List all form fields in the loaded PDF",
    },
    ToolSpec {
        name: "search_fields",
        description: "Search for fields matching a query",
    },
    ToolSpec {
        name: "get_field_details",
        description: "Get detailed info about a specific field",
    },
    ToolSpec {
        name: "set_field",
        description: "Stage a value for a field (call commit_edits to apply)",
    },
    ToolSpec {
        name: "get_pending_edits",
        description: "Review all staged edits before committing",
    },
    ToolSpec {
        name: "commit_edits",
        description: "Apply all staged edits and save the PDF. Output path is optional.",
    },
];

/// Catalog with JSON input schemas, in the shape LLM tool APIs expect
pub fn tool_definitions() -> Vec<Value> {
    TOOL_CATALOG
        .iter()
        .map(|spec| {
            let schema = match spec.name {
                "load_pdf" => serde_json::to_value(schemars::schema_for!(LoadPdfArgs)),
                "search_fields" => serde_json::to_value(schemars::schema_for!(SearchFieldsArgs)),
                "get_field_details" => serde_json::to_value(schemars::schema_for!(FieldIdArgs)),
                "set_field" => serde_json::to_value(schemars::schema_for!(SetFieldArgs)),
                "commit_edits" => serde_json::to_value(schemars::schema_for!(CommitEditsArgs)),
                _ => serde_json::to_value(schemars::schema_for!(NoArgs)),
            }
            .unwrap_or(Value::Null);

            serde_json::json!({
                "name": spec.name,
                "description": spec.description,
                "input_schema": schema,
            })
        })
        .collect()
}

/// Event streamed to the caller during a turn. `complete` and `error` are terminal.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    Status {
        message: String,
    },
    Text {
        text: String,
    },
    ToolStart {
        tool: String,
        friendly: String,
        input: Value,
    },
    ToolEnd {
        tool: String,
        is_error: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        friendly: Option<String>,
    },
    Complete {
        success: bool,
        result: String,
        message_count: usize,
        applied_count: usize,
        applied_edits: BTreeMap<String, EditValue>,
        /// Token for resuming the decision-maker's conversation next turn
        session_id: Option<String>,
        user_session_id: String,
    },
    Error {
        error: String,
    },
}

/// Sending half of a turn's event stream. A dropped receiver is not an error.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<TurnEvent>,
}

impl EventSink {
    pub fn new(tx: mpsc::Sender<TurnEvent>) -> Self {
        Self { tx }
    }

    pub async fn emit(&self, event: TurnEvent) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("Turn event receiver dropped");
        }
    }
}

/// What the decision-maker is given for one turn
#[derive(Debug, Clone)]
pub struct TurnContext {
    pub system_prompt: &'static str,
    pub prompt: String,
    pub resume_token: Option<String>,
    pub tools: &'static [ToolSpec],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Final text of the decision-maker
    pub result_text: String,
    pub resume_token: Option<String>,
    pub message_count: usize,
}

/// External runtime deciding which tools to call
#[async_trait]
pub trait DecisionMaker: Send + Sync {
    async fn run(
        &self,
        context: TurnContext,
        tools: ToolInvoker,
        events: EventSink,
    ) -> Result<TurnOutcome>;
}

/// Tool entry point handed to the decision-maker. Cheap to clone; clones
/// may call concurrently.
#[derive(Clone)]
pub struct ToolInvoker {
    session: SessionHandle,
    ctx: ToolContext,
    events: EventSink,
}

impl ToolInvoker {
    pub fn new(session: SessionHandle, ctx: ToolContext, events: EventSink) -> Self {
        Self {
            session,
            ctx,
            events,
        }
    }

    /// Invoke `name` with JSON `args`. Failures come back as `{"error": ...}`.
    pub async fn call(&self, name: &str, args: Value) -> Value {
        self.events
            .emit(TurnEvent::ToolStart {
                tool: name.to_string(),
                friendly: friendly_description(name, &args),
                input: args.clone(),
            })
            .await;

        let result = match ToolCall::parse(name, args) {
            Ok(call) => {
                let mut session = self.session.lock().await;
                execute(&self.ctx, &mut session, call).await
            }
            Err(e) => Err(e),
        };

        let (value, is_error) = match result {
            Ok(value) => (value, false),
            Err(e) => {
                if e.is_input_error() {
                    tracing::debug!(tool = name, error = %e, "Tool call rejected input");
                } else {
                    tracing::warn!(tool = name, error = %e, "Tool call failed");
                }
                (tool_error(&e), true)
            }
        };

        self.events
            .emit(TurnEvent::ToolEnd {
                tool: name.to_string(),
                is_error,
                friendly: friendly_result(&value),
            })
            .await;
        value
    }
}

fn friendly_description(name: &str, args: &Value) -> String {
    let arg = |key: &str| match args.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    };

    match name {
        "load_pdf" => "Loading PDF document...".to_string(),
        "list_all_fields" => "Scanning form fields...".to_string(),
        "search_fields" => format!("Searching for '{}' fields...", arg("query")),
        "get_field_details" => "Checking field details...".to_string(),
        "set_field" => {
            let value = arg("value");
            let preview = if value.chars().count() > 25 {
                format!("{}...", crate::pdf::truncate_chars(&value, 25))
            } else {
                value
            };
            format!("Setting {} to '{}'", arg("field_id"), preview)
        }
        "get_pending_edits" => "Reviewing changes...".to_string(),
        "commit_edits" => "Saving filled form...".to_string(),
        other => format!("Calling {}...", other),
    }
}

fn friendly_result(value: &Value) -> Option<String> {
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        return Some(format!("Error: {}", error));
    }
    if let Some(count) = value.get("applied_count").and_then(Value::as_u64) {
        return Some(format!("Applied {} changes", count));
    }
    if let Some(message) = value.get("message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    if let Some(fields) = value.as_array() {
        return Some(format!("Found {} fields", fields.len()));
    }
    None
}

/// One user turn
#[derive(Debug, Clone, Default)]
pub struct TurnRequest {
    /// Resident session to continue; a new one is created when absent
    pub session_id: Option<String>,
    pub instructions: String,
    /// Uploaded document (the filled document on continuation turns)
    pub document: Vec<u8>,
    pub output_path: Option<String>,
    pub is_continuation: bool,
    /// Applied edits from earlier turns, as last seen by the caller
    pub previous_edits: Option<BTreeMap<String, EditValue>>,
    pub resume_token: Option<String>,
    /// Unfilled document for first turns
    pub original_document: Option<Vec<u8>>,
}

/// Runs turns against a decision-maker
#[derive(Clone)]
pub struct TurnRunner {
    ctx: ToolContext,
    decision_maker: Arc<dyn DecisionMaker>,
}

impl TurnRunner {
    pub fn new(ctx: ToolContext, decision_maker: Arc<dyn DecisionMaker>) -> Self {
        Self {
            ctx,
            decision_maker,
        }
    }

    /// Start a turn; events arrive in order and end with `complete` or `error`
    pub fn stream_turn(&self, request: TurnRequest) -> mpsc::Receiver<TurnEvent> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let runner = self.clone();
        tokio::spawn(async move {
            runner.run_turn(request, EventSink::new(tx)).await;
        });
        rx
    }

    async fn run_turn(&self, request: TurnRequest, events: EventSink) {
        if let Err(e) = self.drive(request, &events).await {
            tracing::warn!(error = %e, "Turn failed");
            events
                .emit(TurnEvent::Error {
                    error: e.client_message(),
                })
                .await;
        }
    }

    async fn drive(&self, request: TurnRequest, events: &EventSink) -> Result<()> {
        let handle = self
            .ctx
            .store
            .get_or_create(request.session_id.as_deref())
            .await?;

        let (session_id, pdf_path, output_path) = {
            let mut session = handle.lock().await;
            let pdf_path = self.write_upload(&session.session_id, &request.document).await?;

            session.begin_turn(
                request.is_continuation,
                request.previous_edits.clone(),
                request.original_document.clone(),
            );
            if request.output_path.is_some() {
                session.output_path = request.output_path.clone();
            }
            session.pdf_path = Some(pdf_path.clone());
            let output_path = crate::tools::resolve_output_path(&self.ctx.config, &session, None);
            (session.session_id.clone(), pdf_path, output_path)
        };

        tracing::info!(
            session_id = %session_id,
            is_continuation = request.is_continuation,
            "Starting turn"
        );

        let context = TurnContext {
            system_prompt: if request.is_continuation {
                CONTINUATION_SYSTEM_PROMPT
            } else {
                SYSTEM_PROMPT
            },
            prompt: build_prompt(&request, &pdf_path, &output_path),
            resume_token: request.resume_token.clone(),
            tools: &TOOL_CATALOG,
        };

        events
            .emit(TurnEvent::Status {
                message: "Agent connected, processing...".to_string(),
            })
            .await;

        let invoker = ToolInvoker::new(Arc::clone(&handle), self.ctx.clone(), events.clone());
        let outcome = self
            .decision_maker
            .run(context, invoker, events.clone())
            .await;

        let mut session = handle.lock().await;
        if let Err(e) = self.ctx.store.save(&mut session).await {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to persist session after turn");
        }

        let outcome = outcome?;
        let applied_edits = session.ledger.applied().clone();
        drop(session);

        events
            .emit(TurnEvent::Complete {
                success: true,
                result: outcome.result_text,
                message_count: outcome.message_count,
                applied_count: applied_edits.len(),
                applied_edits,
                session_id: outcome.resume_token,
                user_session_id: session_id,
            })
            .await;
        Ok(())
    }

    /// Write the uploaded bytes where `load_pdf` can read them
    async fn write_upload(&self, session_id: &str, data: &[u8]) -> Result<String> {
        let dir: PathBuf = self.ctx.config.work_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.pdf", session_id));
        tokio::fs::write(&path, data).await?;
        Ok(path.display().to_string())
    }
}

fn build_prompt(request: &TurnRequest, pdf_path: &str, output_path: &str) -> String {
    if request.is_continuation {
        let edits_summary = match &request.previous_edits {
            Some(edits) if !edits.is_empty() => {
                let mut lines: Vec<String> = edits
                    .iter()
                    .take(10)
                    .map(|(k, v)| format!("  - {}: {}", k, v))
                    .collect();
                if edits.len() > 10 {
                    lines.push(format!("  ... and {} more fields", edits.len() - 10));
                }
                lines.join("\n")
            }
            _ => "(see current values in list_all_fields)".to_string(),
        };

        format!(
            "This is a CONTINUATION of a form-filling session.\n\n\
             PDF Path (already filled): {}\n\
             Output Path: {}\n\n\
             Previous fields that were filled:\n{}\n\n\
             User's NEW request: {}\n\n\
             The PDF already contains values from the previous turn. Load it, check what is \
             already filled, then ONLY change the fields the user is asking about.",
            pdf_path, output_path, edits_summary, request.instructions
        )
    } else {
        format!(
            "Please fill out this PDF form:\n\n\
             PDF Path: {}\n\
             Output Path: {}\n\n\
             Instructions: {}\n\n\
             Start by loading the PDF, then list the fields, fill them according to the \
             instructions, and commit the edits.",
            pdf_path, output_path, request.instructions
        )
    }
}

/// Step of a [`ScriptedDecisionMaker`]
#[derive(Debug, Clone)]
pub enum ScriptStep {
    Say(String),
    Call { tool: String, args: Value },
    /// Calls issued together; the step finishes when all have returned
    Parallel(Vec<(String, Value)>),
}

impl ScriptStep {
    pub fn call(tool: &str, args: Value) -> Self {
        ScriptStep::Call {
            tool: tool.to_string(),
            args,
        }
    }
}

/// Decision-maker replaying a fixed script of tool calls
#[derive(Debug, Clone, Default)]
pub struct ScriptedDecisionMaker {
    steps: Vec<ScriptStep>,
    failure: Option<String>,
}

impl ScriptedDecisionMaker {
    pub fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            failure: None,
        }
    }

    /// Fail with `reason` after running the script
    pub fn failing(mut self, reason: &str) -> Self {
        self.failure = Some(reason.to_string());
        self
    }
}

#[async_trait]
impl DecisionMaker for ScriptedDecisionMaker {
    async fn run(
        &self,
        context: TurnContext,
        tools: ToolInvoker,
        events: EventSink,
    ) -> Result<TurnOutcome> {
        let mut outcome = TurnOutcome {
            resume_token: Some(
                context
                    .resume_token
                    .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            ),
            ..TurnOutcome::default()
        };

        for step in &self.steps {
            outcome.message_count += 1;
            match step {
                ScriptStep::Say(text) => {
                    outcome.result_text = text.clone();
                    events.emit(TurnEvent::Text { text: text.clone() }).await;
                }
                ScriptStep::Call { tool, args } => {
                    tools.call(tool, args.clone()).await;
                }
                ScriptStep::Parallel(calls) => {
                    let pending = calls.iter().map(|(tool, args)| {
                        let tools = tools.clone();
                        async move { tools.call(tool, args.clone()).await }
                    });
                    futures_util::future::join_all(pending).await;
                }
            }
        }

        match &self.failure {
            Some(reason) => Err(Error::DecisionMaker {
                reason: reason.clone(),
            }),
            None => Ok(outcome),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_wire_format() {
        let event = TurnEvent::Error {
            error: "Agent error: offline".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "error", "error": "Agent error: offline"})
        );

        let event = TurnEvent::ToolEnd {
            tool: "set_field".to_string(),
            is_error: false,
            friendly: None,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "tool_end", "tool": "set_field", "is_error": false})
        );
    }

    #[test]
    fn test_catalog_has_seven_tools_with_schemas() {
        let definitions = tool_definitions();
        assert_eq!(definitions.len(), 7);
        let set_field = definitions
            .iter()
            .find(|d| d["name"] == "set_field")
            .unwrap();
        assert!(set_field["input_schema"]["properties"]["field_id"].is_object());
    }

    #[test]
    fn test_friendly_descriptions() {
        assert_eq!(
            friendly_description("search_fields", &serde_json::json!({"query": "email"})),
            "Searching for 'email' fields..."
        );
        assert_eq!(
            friendly_description(
                "set_field",
                &serde_json::json!({"field_id": "page0_Agree", "value": true})
            ),
            "Setting page0_Agree to 'true'"
        );
        let long = "x".repeat(40);
        assert!(friendly_description(
            "set_field",
            &serde_json::json!({"field_id": "f", "value": long})
        )
        .ends_with("...'"));
    }

    #[test]
    fn test_continuation_prompt_lists_previous_edits() {
        let mut edits = BTreeMap::new();
        edits.insert("page0_Name".to_string(), EditValue::from("Jane"));
        let request = TurnRequest {
            instructions: "change the email".to_string(),
            is_continuation: true,
            previous_edits: Some(edits),
            ..TurnRequest::default()
        };
        let prompt = build_prompt(&request, "/work/s.pdf", "/out/s.pdf");
        assert!(prompt.contains("CONTINUATION"));
        assert!(prompt.contains("  - page0_Name: Jane"));
        assert!(prompt.contains("change the email"));

        let fresh = TurnRequest {
            instructions: "fill it".to_string(),
            ..TurnRequest::default()
        };
        assert!(build_prompt(&fresh, "/work/s.pdf", "/out/s.pdf").starts_with("Please fill out"));
    }
}
