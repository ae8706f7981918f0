//! Prefix-cache marking for caching-capable backends.
//!
//! Operates on wire messages shaped `{"role": ..., "content": [block, ...]}`
//! and adds `"cache_control": {"type": "ephemeral"}` to selected blocks.
//! Messages whose content is a plain string are left alone.
//!
//! Selection runs in three passes over a budget of marked messages:
//!
//! 1. a leading `system` message is marked first and always costs one unit;
//! 2. messages holding any non-text block (attachment, tool use, tool result)
//!    get those blocks marked, in order, until the budget runs out;
//! 3. leftover budget goes to the most recent unmarked messages, walking
//!    backwards from the end.

use serde_json::{Value, json};
use tracing::debug;

/// Default number of messages that may carry cache markers.
pub const MAX_CACHED_MESSAGES: usize = 4;

/// Marks content blocks as cacheable under a fixed message budget.
#[derive(Debug, Clone, Copy)]
pub struct CacheAnnotator {
    budget: usize,
}

impl Default for CacheAnnotator {
    fn default() -> Self {
        Self {
            budget: MAX_CACHED_MESSAGES,
        }
    }
}

impl CacheAnnotator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_budget(budget: usize) -> Self {
        Self { budget }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Mark blocks in place and return how many messages carry markers.
    pub fn annotate(&self, messages: &mut [Value]) -> usize {
        if self.budget == 0 {
            return 0;
        }
        let mut marked = vec![false; messages.len()];
        let mut used = 0;

        let mut start = 0;
        if messages.first().is_some_and(|m| role(m) == Some("system")) {
            marked[0] = mark_blocks(&mut messages[0], |_| true) > 0;
            used += 1;
            start = 1;
        }

        for (index, message) in messages.iter_mut().enumerate().skip(start) {
            if used >= self.budget {
                break;
            }
            if mark_blocks(message, |block| !is_text_block(block)) > 0 {
                marked[index] = true;
                used += 1;
            }
        }

        for (index, message) in messages.iter_mut().enumerate().rev() {
            if used >= self.budget {
                break;
            }
            if marked[index] {
                continue;
            }
            if mark_blocks(message, |_| true) > 0 {
                marked[index] = true;
                used += 1;
            }
        }

        let count = marked.iter().filter(|m| **m).count();
        debug!(marked = count, budget = self.budget, "annotated messages for prefix cache");
        count
    }
}

/// Whether a block carries a cache marker.
pub fn is_marked(block: &Value) -> bool {
    block.get("cache_control").is_some()
}

/// Whether any block of a message carries a cache marker.
pub fn message_is_marked(message: &Value) -> bool {
    message
        .get("content")
        .and_then(Value::as_array)
        .is_some_and(|blocks| blocks.iter().any(is_marked))
}

/// Turn string content into a single text block so it can be marked.
pub fn normalize_content(message: &mut Value) {
    let Some(content) = message.get_mut("content") else {
        return;
    };
    if let Value::String(text) = content {
        let text = std::mem::take(text);
        *content = if text.is_empty() {
            Value::Array(Vec::new())
        } else {
            json!([{ "type": "text", "text": text }])
        };
    }
}

fn role(message: &Value) -> Option<&str> {
    message.get("role").and_then(Value::as_str)
}

fn is_text_block(block: &Value) -> bool {
    block.get("type").and_then(Value::as_str) == Some("text")
}

/// Mark every unmarked block matching `select`; returns how many were marked.
fn mark_blocks(message: &mut Value, select: impl Fn(&Value) -> bool) -> usize {
    let Some(blocks) = message.get_mut("content").and_then(Value::as_array_mut) else {
        return 0;
    };
    let mut count = 0;
    for block in blocks.iter_mut() {
        if is_marked(block) || !select(block) {
            continue;
        }
        if let Some(fields) = block.as_object_mut() {
            fields.insert("cache_control".to_string(), json!({ "type": "ephemeral" }));
            count += 1;
        }
    }
    count
}
