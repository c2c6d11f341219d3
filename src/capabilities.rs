//! Server capability capture
//!
//! The handshake response advertises what the server can do. The raw
//! capability map is kept verbatim alongside the derived semantic-token
//! legend; both are captured once and immutable for the session's lifetime.

use serde_json::Value;

/// Ordered lists giving meaning to the numeric codes in semantic-token
/// responses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SemanticTokensLegend {
    /// Token type names, in server order
    pub token_types: Vec<String>,

    /// Token modifier names, in server order
    pub token_modifiers: Vec<String>,
}

/// Capabilities advertised by the server at handshake
#[derive(Debug, Clone, Default)]
pub struct Capabilities {
    /// Raw capability map, exactly as received
    raw: Value,

    /// Semantic-token legend, if the server advertises one
    legend: Option<SemanticTokensLegend>,
}

impl Capabilities {
    /// Capture capabilities from the handshake response's `capabilities` map
    pub fn from_raw(raw: Value) -> Self {
        let legend = extract_legend(&raw);
        Self { raw, legend }
    }

    /// The raw capability map
    pub fn raw(&self) -> &Value {
        &self.raw
    }

    /// The semantic-token legend, if advertised
    pub fn semantic_tokens_legend(&self) -> Option<&SemanticTokensLegend> {
        self.legend.as_ref()
    }
}

fn extract_legend(capabilities: &Value) -> Option<SemanticTokensLegend> {
    let legend = capabilities.get("semanticTokensProvider")?.get("legend")?;

    Some(SemanticTokensLegend {
        token_types: string_list(legend.get("tokenTypes")),
        token_modifiers: string_list(legend.get("tokenModifiers")),
    })
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

// ============================================================================
// Tests
// ============================================================================
