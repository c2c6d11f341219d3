//! JSON-RPC 2.0 message model and builders
//!
//! One discriminated message structure covers every outbound protocol unit:
//! requests carry a transaction id, notifications never do. Builder functions
//! produce the concrete message kinds the session emits, with parameter
//! payloads typed through `lsp-types`.

use lsp_types::{
    ClientCapabilities, ClientInfo, CompletionClientCapabilities, CompletionItemCapability,
    CompletionParams, DidChangeTextDocumentParams, DidCloseTextDocumentParams,
    DidOpenTextDocumentParams, GotoDefinitionParams, InitializeParams, InitializedParams,
    MarkupKind, PartialResultParams, Position, Range, SemanticTokensDeltaParams,
    SemanticTokensParams, SignatureHelpParams, TextDocumentClientCapabilities,
    TextDocumentContentChangeEvent, TextDocumentIdentifier, TextDocumentItem,
    TextDocumentPositionParams, Uri, VersionedTextDocumentIdentifier, WorkDoneProgressParams,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicI64, Ordering};

/// Server-push method carrying diagnostics
pub const PUBLISH_DIAGNOSTICS_METHOD: &str = "textDocument/publishDiagnostics";

/// Process-lifetime transaction id counter. Ids are monotonically increasing
/// and never reused, even across sessions.
static NEXT_TRANSACTION_ID: AtomicI64 = AtomicI64::new(1);

/// Allocate a fresh transaction id
pub fn next_transaction_id() -> i64 {
    NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst)
}

/// One outbound protocol unit
///
/// Serializes to the canonical compact JSON-RPC form; `id` is omitted
/// entirely for notifications.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundMessage {
    /// JSON-RPC version (always "2.0")
    pub jsonrpc: &'static str,

    /// Transaction id (requests only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,

    /// Method name
    pub method: String,

    /// Parameter payload
    pub params: Value,
}

impl OutboundMessage {
    /// Build a request carrying a fresh transaction id
    pub fn request(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Some(next_transaction_id()),
            method: method.to_string(),
            params,
        }
    }

    /// Build a notification (no id, no expected reply)
    pub fn notification(method: &str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: None,
            method: method.to_string(),
            params,
        }
    }

    /// Serialize the message body to its compact wire form
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

// ============================================================================
// Message builders
// ============================================================================

/// Handshake request with the project root and our process identity
pub fn initialize(root_uri: Uri) -> Result<OutboundMessage, serde_json::Error> {
    let params = InitializeParams {
        process_id: Some(std::process::id()),
        #[allow(deprecated)]
        root_path: None,
        #[allow(deprecated)]
        root_uri: Some(root_uri),
        initialization_options: None,
        work_done_progress_params: WorkDoneProgressParams::default(),
        capabilities: ClientCapabilities {
            text_document: Some(TextDocumentClientCapabilities {
                completion: Some(CompletionClientCapabilities {
                    completion_item: Some(CompletionItemCapability {
                        documentation_format: Some(vec![MarkupKind::PlainText]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
        trace: None,
        workspace_folders: None,
        client_info: Some(ClientInfo {
            name: "lsp-pipe".to_string(),
            version: Some(env!("CARGO_PKG_VERSION").to_string()),
        }),
        locale: None,
    };

    Ok(OutboundMessage::request(
        "initialize",
        serde_json::to_value(params)?,
    ))
}

/// Handshake acknowledgment, sent once capabilities are captured
pub fn initialized() -> Result<OutboundMessage, serde_json::Error> {
    Ok(OutboundMessage::notification(
        "initialized",
        serde_json::to_value(InitializedParams {})?,
    ))
}

/// Document-open notification with the full initial text
pub fn did_open(
    uri: Uri,
    language_id: &str,
    version: i32,
    text: String,
) -> Result<OutboundMessage, serde_json::Error> {
    let params = DidOpenTextDocumentParams {
        text_document: TextDocumentItem {
            uri,
            language_id: language_id.to_string(),
            version,
            text,
        },
    };

    Ok(OutboundMessage::notification(
        "textDocument/didOpen",
        serde_json::to_value(params)?,
    ))
}

/// Document-close notification
pub fn did_close(uri: Uri) -> Result<OutboundMessage, serde_json::Error> {
    let params = DidCloseTextDocumentParams {
        text_document: TextDocumentIdentifier { uri },
    };

    Ok(OutboundMessage::notification(
        "textDocument/didClose",
        serde_json::to_value(params)?,
    ))
}

/// Full-content change notification
pub fn did_change_full(
    uri: Uri,
    version: i32,
    text: String,
) -> Result<OutboundMessage, serde_json::Error> {
    let params = DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier { uri, version },
        content_changes: vec![TextDocumentContentChangeEvent {
            range: None,
            range_length: None,
            text,
        }],
    };

    Ok(OutboundMessage::notification(
        "textDocument/didChange",
        serde_json::to_value(params)?,
    ))
}

/// Incremental change notification covering a single range
pub fn did_change_range(
    uri: Uri,
    version: i32,
    range: Range,
    text: String,
) -> Result<OutboundMessage, serde_json::Error> {
    let params = DidChangeTextDocumentParams {
        text_document: VersionedTextDocumentIdentifier { uri, version },
        content_changes: vec![TextDocumentContentChangeEvent {
            range: Some(range),
            range_length: None,
            text,
        }],
    };

    Ok(OutboundMessage::notification(
        "textDocument/didChange",
        serde_json::to_value(params)?,
    ))
}

fn position_params(uri: Uri, row: u32, col: u32) -> TextDocumentPositionParams {
    TextDocumentPositionParams {
        text_document: TextDocumentIdentifier { uri },
        position: Position {
            line: row,
            character: col,
        },
    }
}

/// Completion query at a position
pub fn completion(uri: Uri, row: u32, col: u32) -> Result<OutboundMessage, serde_json::Error> {
    let params = CompletionParams {
        text_document_position: position_params(uri, row, col),
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        context: None,
    };

    Ok(OutboundMessage::request(
        "textDocument/completion",
        serde_json::to_value(params)?,
    ))
}

/// Go-to-definition query at a position
pub fn definition(uri: Uri, row: u32, col: u32) -> Result<OutboundMessage, serde_json::Error> {
    let params = GotoDefinitionParams {
        text_document_position_params: position_params(uri, row, col),
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
    };

    Ok(OutboundMessage::request(
        "textDocument/definition",
        serde_json::to_value(params)?,
    ))
}

/// Signature-help query at a position
pub fn signature_help(uri: Uri, row: u32, col: u32) -> Result<OutboundMessage, serde_json::Error> {
    let params = SignatureHelpParams {
        context: None,
        text_document_position_params: position_params(uri, row, col),
        work_done_progress_params: WorkDoneProgressParams::default(),
    };

    Ok(OutboundMessage::request(
        "textDocument/signatureHelp",
        serde_json::to_value(params)?,
    ))
}

/// Semantic-token query for the whole document
pub fn semantic_tokens_full(uri: Uri) -> Result<OutboundMessage, serde_json::Error> {
    let params = SemanticTokensParams {
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        text_document: TextDocumentIdentifier { uri },
    };

    Ok(OutboundMessage::request(
        "textDocument/semanticTokens/full",
        serde_json::to_value(params)?,
    ))
}

/// Semantic-token delta query against a previous result
pub fn semantic_tokens_delta(
    uri: Uri,
    previous_result_id: &str,
) -> Result<OutboundMessage, serde_json::Error> {
    let params = SemanticTokensDeltaParams {
        work_done_progress_params: WorkDoneProgressParams::default(),
        partial_result_params: PartialResultParams::default(),
        text_document: TextDocumentIdentifier { uri },
        previous_result_id: previous_result_id.to_string(),
    };

    Ok(OutboundMessage::request(
        "textDocument/semanticTokens/full/delta",
        serde_json::to_value(params)?,
    ))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn test_uri() -> Uri {
        "file:///tmp/main.cpp".parse().unwrap()
    }

    #[test]
    fn test_transaction_ids_are_unique_and_increasing() {
        let ids: Vec<i64> = (0..100).map(|_| next_transaction_id()).collect();
        for pair in ids.windows(2) {
            assert!(pair[1] > pair[0]);
        }
    }

    #[test]
    fn test_requests_carry_ids_notifications_do_not() {
        let request = completion(test_uri(), 3, 7).unwrap();
        assert!(request.id.is_some());

        let notification = initialized().unwrap();
        assert!(notification.id.is_none());

        let value: Value = serde_json::from_slice(&notification.to_bytes().unwrap()).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["jsonrpc"], "2.0");
        assert_eq!(value["method"], "initialized");
    }

    #[test]
    fn test_initialize_shape() {
        let message = initialize(test_uri()).unwrap();
        assert_eq!(message.method, "initialize");

        let value: Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(value["params"]["rootUri"], "file:///tmp/main.cpp");
        assert!(value["params"]["processId"].is_number());
        assert!(value["params"]["capabilities"]["textDocument"]["completion"].is_object());
    }

    #[test]
    fn test_positional_query_shape() {
        let message = definition(test_uri(), 32, 3).unwrap();
        let value: Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(value["method"], "textDocument/definition");
        assert_eq!(value["params"]["position"]["line"], 32);
        assert_eq!(value["params"]["position"]["character"], 3);
        assert_eq!(
            value["params"]["textDocument"]["uri"],
            "file:///tmp/main.cpp"
        );
    }

    #[test]
    fn test_did_change_range_shape() {
        let range = Range {
            start: Position {
                line: 5,
                character: 0,
            },
            end: Position {
                line: 6,
                character: 0,
            },
        };
        let message = did_change_range(test_uri(), 2, range, "foo();\n".to_string()).unwrap();
        let value: Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();

        assert_eq!(value["params"]["textDocument"]["version"], 2);
        let change = &value["params"]["contentChanges"][0];
        assert_eq!(change["range"]["start"]["line"], 5);
        assert_eq!(change["range"]["end"]["line"], 6);
        assert_eq!(change["text"], "foo();\n");
    }

    #[test]
    fn test_semantic_tokens_delta_carries_previous_result_id() {
        let message = semantic_tokens_delta(test_uri(), "result-7").unwrap();
        assert_eq!(message.method, "textDocument/semanticTokens/full/delta");

        let value: Value = serde_json::from_slice(&message.to_bytes().unwrap()).unwrap();
        assert_eq!(value["params"]["previousResultId"], "result-7");
    }
}
