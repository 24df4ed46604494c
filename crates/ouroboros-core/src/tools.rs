//! Inline tool requests embedded in model responses
//!
//! Blocks look like `:::TOOL_REQUEST {"tool": "createFile", "args": {...}} :::`
//! and can appear anywhere in free text. Parsing and execution are separate:
//! [`parse_tool_requests`] yields typed [`ToolEffect`]s in text order and
//! [`ToolRunner`] applies them one at a time against storage.

use crate::error::OuroborosError;
use crate::storage::{MatchMode, SessionHandle, StorageGateway};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::ops::Range;
use tracing::{info, warn};

/// Opening delimiter of a tool block
pub const TOOL_OPEN: &str = ":::TOOL_REQUEST";

/// Closing delimiter of a tool block
pub const TOOL_CLOSE: &str = ":::";

/// Content type of documents created by tools
pub const DOCUMENT_CONTENT_TYPE: &str = "text/markdown";

/// Tool name reported when a block is too broken to name its tool
pub const UNNAMED_TOOL: &str = "TOOL_REQUEST";

/// A storage side effect requested by the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tool", content = "args")]
pub enum ToolEffect {
    /// Create a document in the working container
    #[serde(rename = "createFile")]
    CreateDocument {
        /// Object name
        name: String,
        /// Text content
        content: String,
    },

    /// Find a document by partial name
    #[serde(rename = "findFile")]
    FindDocument {
        /// Substring of the name
        #[serde(alias = "name")]
        query: String,
    },
}

impl ToolEffect {
    /// Wire name of the tool
    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::CreateDocument { .. } => "createFile",
            Self::FindDocument { .. } => "findFile",
        }
    }
}

/// One block found in a response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedToolBlock {
    /// Byte range of the block in the response
    pub span: Range<usize>,

    /// The effect, or a [`OuroborosError::ToolEffect`] saying why the block
    /// could not be understood
    pub effect: Result<ToolEffect, OuroborosError>,
}

/// Extract every tool block from `text`, left to right
///
/// A block whose JSON is broken yields an `Err` entry; scanning resumes after
/// it so later blocks are still found.
pub fn parse_tool_requests(text: &str) -> Vec<ParsedToolBlock> {
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(found) = text[cursor..].find(TOOL_OPEN) {
        let start = cursor + found;
        let body_start = start + TOOL_OPEN.len();
        let body = &text[body_start..];

        let mut stream = serde_json::Deserializer::from_str(body).into_iter::<Value>();
        let (end, effect) = match stream.next() {
            Some(Ok(value)) => {
                let json_end = body_start + stream.byte_offset();
                let rest = &text[json_end..];
                let trimmed = rest.trim_start();
                let tool = value
                    .get("tool")
                    .and_then(Value::as_str)
                    .unwrap_or(UNNAMED_TOOL)
                    .to_string();
                let effect = serde_json::from_value::<ToolEffect>(value)
                    .map_err(|e| OuroborosError::tool(&tool, e));

                if trimmed.starts_with(TOOL_CLOSE) && !trimmed.starts_with(TOOL_OPEN) {
                    let close_at = json_end + (rest.len() - trimmed.len());
                    (close_at + TOOL_CLOSE.len(), effect)
                } else {
                    let unclosed = OuroborosError::tool(&tool, "missing closing ':::'");
                    (json_end, effect.and(Err(unclosed)))
                }
            }
            Some(Err(e)) => (
                skip_broken_block(text, body_start),
                Err(OuroborosError::tool(UNNAMED_TOOL, e)),
            ),
            None => (
                text.len(),
                Err(OuroborosError::tool(UNNAMED_TOOL, "empty tool request")),
            ),
        };

        blocks.push(ParsedToolBlock {
            span: start..end,
            effect,
        });
        cursor = end.max(body_start);
    }

    blocks
}

/// End of a block whose JSON did not parse: just past the next `:::`, or at
/// the start of the next block
fn skip_broken_block(text: &str, body_start: usize) -> usize {
    match text[body_start..].find(TOOL_CLOSE) {
        Some(offset) => {
            let at = body_start + offset;
            if text[at..].starts_with(TOOL_OPEN) {
                at
            } else {
                at + TOOL_CLOSE.len()
            }
        }
        None => text.len(),
    }
}

/// What executing a response's tool blocks produced
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolReport {
    /// Inline markers to append to the response, in execution order
    pub markers: Vec<String>,

    /// Reasoning-trace entries, in execution order
    pub trace: Vec<String>,

    /// Ids of documents created
    pub created: Vec<String>,

    /// One [`OuroborosError::ToolEffect`] per block that failed
    pub errors: Vec<OuroborosError>,
}

impl ToolReport {
    /// Whether no block was executed
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    /// `response` with the markers appended
    pub fn annotate(&self, response: &str) -> String {
        if self.markers.is_empty() {
            return response.to_string();
        }
        format!("{}\n\n{}", response, self.markers.join("\n"))
    }

    /// Number of blocks that failed
    pub fn failures(&self) -> usize {
        self.errors.len()
    }

    fn failure(&mut self, error: OuroborosError) {
        self.markers.push(format!("[SYSTEM ERROR: {}]", error.user_message()));
        self.trace.push(error.to_string());
        self.errors.push(error);
    }
}

/// Executes tool effects against the working container
pub struct ToolRunner<'a> {
    gateway: &'a StorageGateway,
    session: &'a SessionHandle,
}

impl<'a> ToolRunner<'a> {
    /// Create a runner for a session's container
    pub fn new(gateway: &'a StorageGateway, session: &'a SessionHandle) -> Self {
        Self { gateway, session }
    }

    /// Run every block sequentially; failures are annotated, never raised
    pub async fn execute(&self, blocks: &[ParsedToolBlock]) -> ToolReport {
        let mut report = ToolReport::default();

        for block in blocks {
            match &block.effect {
                Ok(effect) => self.apply(effect, &mut report).await,
                Err(error) => {
                    warn!(error = %error, "unreadable tool request");
                    report.failure(error.clone());
                }
            }
        }

        report
    }

    async fn apply(&self, effect: &ToolEffect, report: &mut ToolReport) {
        let container = self.session.container_id();

        match effect {
            ToolEffect::CreateDocument { name, content } => {
                match self
                    .gateway
                    .create_object(self.session, name, content, container, DOCUMENT_CONTENT_TYPE)
                    .await
                {
                    Ok(id) => {
                        info!(tool = effect.tool_name(), name = %name, id = %id, "document created");
                        report.markers.push(format!(
                            "[SYSTEM: File '{}' created successfully. ID: {}]",
                            name, id
                        ));
                        report.trace.push(format!("Tool createFile: created '{}' ({})", name, id));
                        report.created.push(id);
                    }
                    Err(e) => {
                        warn!(tool = effect.tool_name(), name = %name, error = %e, "document creation failed");
                        report.failure(OuroborosError::tool(
                            effect.tool_name(),
                            format!("could not create '{}': {}", name, e),
                        ));
                    }
                }
            }
            ToolEffect::FindDocument { query } => {
                match self
                    .gateway
                    .find_object(self.session, query, container, MatchMode::Partial)
                    .await
                {
                    Ok(Some(id)) => {
                        info!(tool = effect.tool_name(), query = %query, id = %id, "document found");
                        report.markers.push(format!(
                            "[SYSTEM: File found matching '{}'. ID: {}]",
                            query, id
                        ));
                        report.trace.push(format!("Tool findFile: '{}' resolved to {}", query, id));
                    }
                    Ok(None) => {
                        report
                            .markers
                            .push(format!("[SYSTEM: No file found matching '{}']", query));
                        report.trace.push(format!("Tool findFile: nothing matches '{}'", query));
                    }
                    Err(e) => {
                        warn!(tool = effect.tool_name(), query = %query, error = %e, "document search failed");
                        report.failure(OuroborosError::tool(
                            effect.tool_name(),
                            format!("search for '{}' failed: {}", query, e),
                        ));
                    }
                }
            }
        }
    }
}
