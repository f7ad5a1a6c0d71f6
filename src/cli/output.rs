//! CLI output: error mapping from domain errors to stable CLI surface.

use crate::error::GenerateError;

/// Map an error to the text shown to the operator.
///
/// Generation errors are prefixed with their stable kind and always state
/// what happened to the credit.
pub fn map_error(e: &anyhow::Error) -> String {
    if let Some(generate) = e.downcast_ref::<GenerateError>() {
        let kind = serde_json::to_value(generate.kind())
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_else(|| format!("{:?}", generate.kind()));
        let mut message = format!("error[{}]: {}", kind, generate);
        if generate.is_retryable() {
            message.push_str("\nThe request may succeed if submitted again.");
        }
        return message;
    }
    format!("error: {:#}", e)
}
