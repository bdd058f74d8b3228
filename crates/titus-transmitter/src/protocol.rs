//! JSON envelopes exchanged with the relay: `{"event": <name>, "data": <payload>}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use titus_core::{domain::UpdateId, update::Update, Result};

pub const EVENT_UPDATE: &str = "update";
pub const EVENT_UPDATE_PROCESSED: &str = "update-processed";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct UpdatePayload {
    update: Update,
}

#[derive(Debug, PartialEq)]
pub enum Inbound {
    Update(Update),
    /// Any event this client does not act on.
    Ignored(String),
}

pub fn decode(text: &str) -> Result<Inbound> {
    let env: Envelope = serde_json::from_str(text)?;
    if env.event != EVENT_UPDATE {
        return Ok(Inbound::Ignored(env.event));
    }
    let payload: UpdatePayload = serde_json::from_value(env.data)?;
    Ok(Inbound::Update(payload.update))
}

pub fn encode_update_processed(id: UpdateId) -> Result<String> {
    let env = Envelope {
        event: EVENT_UPDATE_PROCESSED.to_string(),
        data: serde_json::to_value(id)?,
    };
    Ok(serde_json::to_string(&env)?)
}
