//! Conversation history utilities
//!
//! A resumed or crashed run can leave a tool call with no reply, and some
//! providers reject such histories outright. Sanitization rebuilds the
//! message list so every tool call is paired with exactly one result.

use std::collections::HashSet;

use regex::Regex;
use std::sync::LazyLock;

use crate::ai::types::{Content, ModelMessage, Role};
use crate::run::types::RecoveryContext;

/// Seed the opening messages for an attempt. Recovery guidance is attributed
/// to the supervising policy layer, never to the end user; downstream
/// prompt-injection defenses rely on that distinction.
pub fn seed_messages(task: &str, recovery: Option<&RecoveryContext>) -> Vec<ModelMessage> {
    let mut messages = vec![ModelMessage::system_text(
        "You are a task-execution agent operating inside an isolated workspace. \
         Work step by step using the provided tools, one tool call at a time. \
         Paths are workspace-relative. When the task is done, reply with a short \
         summary of the outcome and no tool call.",
    )];

    let mut opening = format!("Task: {task}");
    if let Some(recovery) = recovery {
        opening.push_str(&format!(
            "\n\n[Guidance from a supervising policy layer, not from the user, after \
             attempt {} failed]\n{}",
            recovery.corrects_attempt, recovery.guidance
        ));
        for constraint in &recovery.constraints {
            opening.push_str(&format!("\n- Constraint: {constraint}"));
        }
    }
    messages.push(ModelMessage::user_text(opening));
    messages
}

/// Drop orphaned tool calls and unmatched or duplicate tool results.
pub fn sanitize_messages(messages: &[ModelMessage]) -> Vec<ModelMessage> {
    let mut answered: HashSet<&str> = HashSet::new();
    let mut called: HashSet<&str> = HashSet::new();
    for message in messages {
        for content in &message.content {
            match content {
                Content::ToolUse { id, .. } => {
                    called.insert(id);
                }
                Content::ToolResult { tool_use_id, .. } => {
                    answered.insert(tool_use_id);
                }
                Content::Text { .. } => {}
            }
        }
    }

    let mut seen_results: HashSet<String> = HashSet::new();
    let mut sanitized = Vec::with_capacity(messages.len());
    for message in messages {
        let content: Vec<Content> = message
            .content
            .iter()
            .filter(|content| match content {
                Content::ToolUse { id, .. } => answered.contains(id.as_str()),
                Content::ToolResult { tool_use_id, .. } => {
                    called.contains(tool_use_id.as_str()) && seen_results.insert(tool_use_id.clone())
                }
                Content::Text { .. } => true,
            })
            .cloned()
            .collect();
        if !content.is_empty() {
            sanitized.push(ModelMessage {
                role: message.role,
                content,
            });
        }
    }
    sanitized
}

static MARKUP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<(tool_call|function|invoke|tool)\b|"tool_calls"\s*:|^\s*\{\s*"name"\s*:"#)
        .expect("valid regex")
});

/// Heuristic for a model that tried to call a tool but emitted markup as
/// plain text instead. Used to turn a false "done" into a model failure.
pub fn looks_like_tool_markup(text: &str) -> bool {
    MARKUP_RE.is_match(text)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool_use(id: &str) -> Content {
        Content::ToolUse {
            id: id.to_string(),
            name: "read".to_string(),
            input: json!({"path": "f"}),
        }
    }

    fn tool_result(id: &str) -> Content {
        Content::ToolResult {
            tool_use_id: id.to_string(),
            output: json!("ok"),
            is_error: None,
        }
    }

    #[test]
    fn orphaned_calls_are_dropped() {
        let messages = vec![
            ModelMessage {
                role: Role::Assistant,
                content: vec![tool_use("a"), tool_use("b")],
            },
            ModelMessage {
                role: Role::User,
                content: vec![tool_result("a")],
            },
        ];

        let sanitized = sanitize_messages(&messages);
        assert_eq!(sanitized.len(), 2);
        assert_eq!(sanitized[0].content.len(), 1);
        assert!(matches!(
            &sanitized[0].content[0],
            Content::ToolUse { id, .. } if id == "a"
        ));
    }

    #[test]
    fn unmatched_and_duplicate_results_are_dropped() {
        let messages = vec![
            ModelMessage {
                role: Role::Assistant,
                content: vec![tool_use("a")],
            },
            ModelMessage {
                role: Role::User,
                content: vec![tool_result("a"), tool_result("a"), tool_result("ghost")],
            },
        ];

        let sanitized = sanitize_messages(&messages);
        assert_eq!(sanitized[1].content.len(), 1);
    }

    #[test]
    fn clean_history_is_untouched() {
        let messages = vec![
            ModelMessage::user_text("task"),
            ModelMessage {
                role: Role::Assistant,
                content: vec![tool_use("a")],
            },
            ModelMessage {
                role: Role::User,
                content: vec![tool_result("a")],
            },
        ];
        let sanitized = sanitize_messages(&messages);
        assert_eq!(sanitized.len(), 3);
    }

    #[test]
    fn markup_heuristic() {
        assert!(looks_like_tool_markup("<tool_call>read</tool_call>"));
        assert!(looks_like_tool_markup("<invoke name=\"read\">"));
        assert!(looks_like_tool_markup("{\"name\": \"read\", \"arguments\": {}}"));
        assert!(!looks_like_tool_markup("The file contains three entries."));
    }

    #[test]
    fn recovery_guidance_is_supervisor_attributed() {
        let recovery = RecoveryContext::from_supervisor("att_0", "try smaller steps");
        let messages = seed_messages("do the thing", Some(&recovery));
        assert_eq!(messages.len(), 2);
        let Content::Text { text } = &messages[1].content[0] else {
            panic!("expected text");
        };
        assert!(text.contains("supervising policy layer"));
        assert!(text.contains("not from the user"));
        assert!(text.contains("try smaller steps"));
    }
}
