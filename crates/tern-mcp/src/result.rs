//! Adapts raw MCP tool results into the uniform tool-call outcome envelope.

use crate::connection::{McpToolContent, McpToolResult};
use std::time::Instant;
use tern_types::{CallMetadata, ErrorCode, ToolCallError, ToolCallOutcome, ToolContent};

fn metadata(server: &str, tool: &str, started: Instant) -> CallMetadata {
    CallMetadata {
        duration_ms: started.elapsed().as_millis() as u64,
        server_name: server.to_string(),
        tool_name: tool.to_string(),
    }
}

fn convert_content(content: Vec<McpToolContent>) -> Vec<ToolContent> {
    content
        .into_iter()
        .map(|c| match c {
            McpToolContent::Text { text } => ToolContent::Text { text },
            McpToolContent::Image { data, mime_type } => ToolContent::Image { mime_type, data },
            McpToolContent::Resource { resource } => ToolContent::Resource {
                uri: resource.uri,
                text: resource.text,
                mime_type: resource.mime_type,
            },
        })
        .collect()
}

/// Build the outcome for a result the server actually returned.
///
/// A result flagged `isError` becomes a failed outcome but keeps its content,
/// since the server's error text is usually the most useful part.
pub fn provider_outcome(
    result: McpToolResult,
    server: &str,
    tool: &str,
    started: Instant,
) -> ToolCallOutcome {
    let metadata = metadata(server, tool, started);
    let content = convert_content(result.content);

    if result.is_error {
        let message = content
            .iter()
            .find_map(|c| match c {
                ToolContent::Text { text } => Some(text.clone()),
                _ => None,
            })
            .unwrap_or_else(|| "tool reported an error".to_string());
        ToolCallOutcome {
            success: false,
            content: Some(content),
            error: Some(ToolCallError {
                code: ErrorCode::ToolExecutionFailed,
                message,
            }),
            metadata,
        }
    } else {
        ToolCallOutcome::success(content, metadata)
    }
}

/// Build the outcome for a call that never produced a server result.
pub fn error_outcome(
    code: ErrorCode,
    message: impl Into<String>,
    server: &str,
    tool: &str,
    started: Instant,
) -> ToolCallOutcome {
    ToolCallOutcome::failure(code, message, metadata(server, tool, started))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ResourceContents;

    #[test]
    fn successful_result_maps_content() {
        let result = McpToolResult {
            content: vec![
                McpToolContent::Text {
                    text: "hello".to_string(),
                },
                McpToolContent::Image {
                    data: "base64".to_string(),
                    mime_type: "image/png".to_string(),
                },
            ],
            is_error: false,
        };
        let outcome = provider_outcome(result, "github", "list_repos", Instant::now());
        assert!(outcome.success);
        assert!(outcome.error.is_none());
        let content = outcome.content.unwrap();
        assert_eq!(content.len(), 2);
        assert!(matches!(&content[0], ToolContent::Text { text } if text == "hello"));
        assert_eq!(outcome.metadata.server_name, "github");
        assert_eq!(outcome.metadata.tool_name, "list_repos");
    }

    #[test]
    fn error_result_keeps_content_and_text_message() {
        let result = McpToolResult {
            content: vec![McpToolContent::Text {
                text: "file not found".to_string(),
            }],
            is_error: true,
        };
        let outcome = provider_outcome(result, "fs", "read_file", Instant::now());
        assert!(!outcome.success);
        assert_eq!(outcome.content.unwrap().len(), 1);
        let err = outcome.error.unwrap();
        assert_eq!(err.code, ErrorCode::ToolExecutionFailed);
        assert_eq!(err.message, "file not found");
    }

    #[test]
    fn error_result_without_text_gets_fallback_message() {
        let result = McpToolResult {
            content: vec![McpToolContent::Image {
                data: "x".to_string(),
                mime_type: "image/png".to_string(),
            }],
            is_error: true,
        };
        let outcome = provider_outcome(result, "fs", "screenshot", Instant::now());
        assert_eq!(outcome.error.unwrap().message, "tool reported an error");
    }

    #[test]
    fn resource_content_is_preserved() {
        let result = McpToolResult {
            content: vec![McpToolContent::Resource {
                resource: ResourceContents {
                    uri: "file:///tmp/a.txt".to_string(),
                    text: Some("body".to_string()),
                    mime_type: Some("text/plain".to_string()),
                },
            }],
            is_error: false,
        };
        let outcome = provider_outcome(result, "fs", "fetch", Instant::now());
        match &outcome.content.unwrap()[0] {
            ToolContent::Resource { uri, text, .. } => {
                assert_eq!(uri, "file:///tmp/a.txt");
                assert_eq!(text.as_deref(), Some("body"));
            }
            _ => panic!("Expected resource content"),
        }
    }

    #[test]
    fn error_outcome_has_no_content() {
        let outcome = error_outcome(
            ErrorCode::ToolTimeout,
            "timed out after 60000ms",
            "github",
            "list_repos",
            Instant::now(),
        );
        assert!(!outcome.success);
        assert!(outcome.content.is_none());
        assert_eq!(outcome.error.unwrap().code, ErrorCode::ToolTimeout);
    }
}
