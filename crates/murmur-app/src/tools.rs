//! Built-in demo tools.
//!
//! Small, side-effect-free tools that exercise the tool-call path end
//! to end. Anything heavier belongs in an external tool provider.

use std::sync::Arc;

use murmur_common::ToolError;
use murmur_live::ToolRegistry;

pub fn register_builtin_tools(registry: &mut ToolRegistry) -> Result<(), ToolError> {
    registry.register(
        "echo",
        "Echo the provided text back.",
        serde_json::json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo back"
                }
            },
            "required": ["text"]
        }),
        Arc::new(|args| Ok(args.clone())),
    )?;

    registry.register(
        "current_time",
        "Get the current local date and time.",
        serde_json::json!({
            "type": "object",
            "properties": {}
        }),
        Arc::new(|_args| {
            Ok(serde_json::json!({
                "time": chrono::Local::now().to_rfc3339()
            }))
        }),
    )?;

    Ok(())
}
