//! Tool schema reconstruction and tool-result correlation.

use serde_json::Value;

use crate::{Message, Role, ToolSpec};

/// Whether history holds tool calls, offered tools, or tool results.
pub fn has_tool_activity(history: &[Message]) -> bool {
    history.iter().any(|message| {
        !message.tool_calls.is_empty()
            || message.tool_call_id.is_some()
            || message.content.as_ref().is_some_and(has_tool_blocks)
    })
}

fn has_tool_blocks(content: &Value) -> bool {
    content.as_array().is_some_and(|blocks| {
        blocks.iter().any(|block| {
            matches!(
                block.get("type").and_then(Value::as_str),
                Some("tool_use" | "tool_result")
            )
        })
    })
}

/// Tools to declare in a request, if any.
///
/// Tools passed for this call win. Otherwise, when history shows tool
/// activity, the schema is rebuilt from it: tools recorded on user turns keep
/// their full schema, and tools only seen in assistant calls get an empty one.
pub fn tool_schema(history: &[Message], offered: Option<&[ToolSpec]>) -> Option<Vec<ToolSpec>> {
    if let Some(tools) = offered.filter(|tools| !tools.is_empty()) {
        return Some(tools.to_vec());
    }
    if !has_tool_activity(history) {
        return None;
    }

    let mut tools: Vec<ToolSpec> = Vec::new();
    for call in history.iter().flat_map(|message| &message.tool_calls) {
        if let Some(tool) = ToolSpec::from_tool_call(call)
            && !tools.iter().any(|known| known.name == tool.name)
        {
            tools.push(tool);
        }
    }
    for message in history.iter().filter(|m| m.role == Role::Assistant) {
        for call in message.invocations() {
            if !tools.iter().any(|known| known.name == call.function.name) {
                tools.push(ToolSpec::named(call.function.name.clone()));
            }
        }
        for (_, name) in content_tool_uses(message) {
            if !tools.iter().any(|known| known.name == name) {
                tools.push(ToolSpec::named(name));
            }
        }
    }

    (!tools.is_empty()).then_some(tools)
}

/// `(id, name)` of `tool_use` blocks in a message's content override.
fn content_tool_uses(message: &Message) -> Vec<(String, String)> {
    let Some(blocks) = message.content.as_ref().and_then(Value::as_array) else {
        return Vec::new();
    };
    blocks
        .iter()
        .filter(|block| block.get("type").and_then(Value::as_str) == Some("tool_use"))
        .filter_map(|block| {
            let id = block.get("id")?.as_str()?;
            let name = block.get("name")?.as_str()?;
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

/// Name of the tool call a tool result answers, if it can be established.
///
/// The result at `index` must follow (possibly after other tool results) an
/// assistant turn that invoked a tool with the same id. Returns `None` for
/// orphaned results, which adapters skip.
pub fn linked_call_name(history: &[Message], index: usize) -> Option<String> {
    let message = history.get(index)?;
    if message.role != Role::Tool {
        return None;
    }
    let id = message.tool_call_id.as_deref()?;

    let assistant = history[..index]
        .iter()
        .rev()
        .find(|previous| previous.role != Role::Tool)?;
    if assistant.role != Role::Assistant {
        return None;
    }

    assistant
        .invocations()
        .find(|call| call.id == id)
        .map(|call| call.function.name.clone())
        .or_else(|| {
            content_tool_uses(assistant)
                .into_iter()
                .find(|(use_id, _)| use_id == id)
                .map(|(_, name)| name)
        })
}
