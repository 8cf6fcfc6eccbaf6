//! Wire protocol between consoles and the bridge
//!
//! One JSON text frame per event, discriminated by a kebab-case `type` field.

mod types;

pub use types::{ClientMessage, EndStatus, RunRequest, ServerMessage};
pub(crate) use types::now_rfc3339;

use serde_json::{json, Value};

/// JSON schema of both message directions
pub fn schema() -> Result<Value, serde_json::Error> {
    Ok(json!({
        "client": serde_json::to_value(schemars::schema_for!(ClientMessage))?,
        "server": serde_json::to_value(schemars::schema_for!(ServerMessage))?,
    }))
}
