//! Context assembly and budgeting for reasoning calls
//!
//! Projects whose name appears in the instruction get their linked document
//! ("context capsule") loaded into an auxiliary block. The whole system
//! context is then held under a character budget so the instruction itself
//! is never cut.

use crate::config::ContextBudget;
use crate::state::MemoryState;
use crate::storage::{SessionHandle, StorageGateway};
use tracing::{debug, warn};

/// Appended to context that was cut to fit the budget
pub const TRUNCATION_MARKER: &str = "\n\n[SYSTEM WARNING: context truncated to fit the budget]";

/// Load linked documents of projects named in `instruction`
///
/// Name matching is a case-insensitive substring test. A failed load becomes
/// an inline warning in the block; it never fails the turn.
pub async fn assemble_context(
    gateway: &StorageGateway,
    session: &SessionHandle,
    memory: &MemoryState,
    instruction: &str,
) -> String {
    let lowered = instruction.to_lowercase();
    let mut block = String::new();

    for project in &memory.projects {
        let Some(document_id) = project.external_document_ref.as_deref() else {
            continue;
        };
        if project.name.is_empty() || !lowered.contains(&project.name.to_lowercase()) {
            continue;
        }

        match gateway.read_object(session, document_id).await {
            Ok(content) => {
                debug!(project = %project.id, document_id, chars = content.len(), "context capsule loaded");
                block.push_str(&format!(
                    "\n--- CONTEXT CAPSULE: {} ({}) ---\n{}\n",
                    project.name, document_id, content
                ));
            }
            Err(e) => {
                warn!(project = %project.id, document_id, error = %e, "context capsule unavailable");
                block.push_str(&format!(
                    "\n[SYSTEM WARNING: could not load context capsule for '{}' ({}): {}]\n",
                    project.name, document_id, e
                ));
            }
        }
    }

    block
}

/// Cap `text` at `max_chars` characters
///
/// Oversized input keeps `keep_ratio` of the cap (less if the marker would not
/// fit), cut at the last `}` in the final fifth of the kept region, else the
/// last sentence terminator, else the last newline, and gets
/// [`TRUNCATION_MARKER`] appended. The result never exceeds the cap, so a
/// second application is a no-op.
pub fn enforce_budget(text: &str, budget: &ContextBudget) -> String {
    enforce_char_budget(text, budget.max_chars, budget.keep_ratio)
}

/// [`enforce_budget`] with explicit limits
pub fn enforce_char_budget(text: &str, max_chars: usize, keep_ratio: f64) -> String {
    let length = text.chars().count();
    if length <= max_chars {
        return text.to_string();
    }

    let marker_chars = TRUNCATION_MARKER.chars().count();
    if max_chars <= marker_chars {
        return TRUNCATION_MARKER.chars().take(max_chars).collect();
    }

    let mut keep = (max_chars as f64 * keep_ratio).floor() as usize;
    if keep + marker_chars > max_chars {
        keep = max_chars - marker_chars;
    }

    let keep_byte = byte_offset(text, keep);
    let window_byte = byte_offset(text, keep - keep / 5);
    let cut = safe_boundary(&text[window_byte..keep_byte])
        .map(|offset| window_byte + offset)
        .unwrap_or(keep_byte);

    debug!(original = length, kept_bytes = cut, "context truncated");
    let mut truncated = String::with_capacity(cut + TRUNCATION_MARKER.len());
    truncated.push_str(&text[..cut]);
    truncated.push_str(TRUNCATION_MARKER);
    truncated
}

/// Byte offset just past the preferred cut point in `window`
fn safe_boundary(window: &str) -> Option<usize> {
    let after = |idx: usize| idx + 1;
    window
        .rfind('}')
        .map(after)
        .or_else(|| window.rfind(['.', '!', '?']).map(after))
        .or_else(|| window.rfind('\n').map(after))
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}
