use serde::{Deserialize, Serialize};

/// Numeric identity of an OS user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIds {
    pub uid: String,
    #[serde(default)]
    pub gid: Option<String>,
}

/// Per-job options: direction of the run and the request payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobOptions {
    #[serde(default)]
    pub undo: bool,
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl JobOptions {
    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            undo: false,
            payload,
        }
    }

    /// Identity mapping for `user` from `payload.users.<user>`.
    pub fn user_ids(&self, user: &str) -> Option<UserIds> {
        let entry = self.payload.get("users")?.get(user)?;
        serde_json::from_value(entry.clone()).ok()
    }

    /// Boolean payload switch; accepts JSON booleans and "true"/"false".
    pub fn payload_flag(&self, key: &str) -> bool {
        match self.payload.get(key) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        }
    }
}
