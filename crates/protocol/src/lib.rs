//! Wire protocol: the JSON envelope exchanged over the control websocket,
//! the device and device-group records the server returns, and helpers
//! for the server's identifier formats.
//!
//! Every frame in either direction is one UTF-8 JSON object. Outbound
//! envelopes always carry `action` and `responseid`; inbound replies
//! usually echo `responseid`, but some server versions omit it and can
//! only be matched by `action`.

pub mod device;
pub mod ids;

use base64::alphabet::Alphabet;
use base64::engine::{general_purpose, GeneralPurpose};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use device::{AgentInfo, DeviceGroup, DeviceRecord, IntelAmt, SecurityCenter};
pub use ids::IdKind;

/// Path of the control endpoint, appended to the server base URL.
pub const CONTROL_PATH: &str = "/control.ashx";

/// Query parameter carrying an encrypted login token.
pub const AUTH_QUERY_PARAM: &str = "auth";

/// Header carrying the base64 username/password pair.
pub const AUTH_HEADER: &str = "x-meshauth";

/// Envelope key holding the correlation id.
pub const CORRELATION_KEY: &str = "responseid";

/// Camel-case spelling used by some older clients and servers.
pub const LEGACY_CORRELATION_KEY: &str = "responseId";

/// Reply payload handed back to callers.
pub type Reply = Map<String, Value>;

const MESH_ALPHABET: Alphabet = match Alphabet::new(
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789@$",
) {
    Ok(alphabet) => alphabet,
    Err(_) => panic!("invalid mesh base64 alphabet"),
};

/// Standard padded base64 with `+` and `/` replaced by `@` and `$`.
///
/// The server uses this alphabet for login tokens and node identifiers so
/// they survive being embedded in URLs and ids unescaped.
pub const MESH_BASE64: GeneralPurpose = GeneralPurpose::new(&MESH_ALPHABET, general_purpose::PAD);

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One outbound request: an action name, an optional correlation id and
/// the action-specific fields, serialized flat into a single object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: String,
    #[serde(
        rename = "responseid",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub correlation_id: Option<String>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Envelope {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            correlation_id: None,
            fields: Map::new(),
        }
    }

    /// Add one action-specific field. The reserved `action` and
    /// correlation keys are ignored here; use the struct fields instead.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let key = key.into();
        if !is_reserved(&key) {
            self.fields.insert(key, value.into());
        }
        self
    }

    /// Merge a map of action-specific fields, skipping reserved keys.
    pub fn with_fields(mut self, fields: Map<String, Value>) -> Self {
        for (key, value) in fields {
            if !is_reserved(&key) {
                self.fields.insert(key, value);
            }
        }
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

fn is_reserved(key: &str) -> bool {
    key == "action" || key == CORRELATION_KEY || key == LEGACY_CORRELATION_KEY
}

/// The `action` of an inbound message, if it has a string one.
pub fn action_of(message: &Map<String, Value>) -> Option<&str> {
    message.get("action").and_then(Value::as_str)
}

/// The correlation id of an inbound message.
///
/// Looks at `responseid` first and falls back to `responseId`. Numeric
/// ids are not produced by this client and are treated as absent.
pub fn correlation_id_of(message: &Map<String, Value>) -> Option<&str> {
    message
        .get(CORRELATION_KEY)
        .or_else(|| message.get(LEGACY_CORRELATION_KEY))
        .and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use serde_json::json;

    #[test]
    fn envelope_serializes_flat() {
        let env = Envelope::new("createmesh")
            .with_field("meshname", "lab")
            .with_field("meshtype", 2)
            .with_correlation_id("abc");
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(
            value,
            json!({"action": "createmesh", "responseid": "abc", "meshname": "lab", "meshtype": 2})
        );
    }

    #[test]
    fn envelope_without_id_omits_key() {
        let json = serde_json::to_string(&Envelope::new("meshes")).unwrap();
        assert_eq!(json, r#"{"action":"meshes"}"#);
    }

    #[test]
    fn reserved_keys_cannot_be_smuggled_in_fields() {
        let mut fields = Map::new();
        fields.insert("action".into(), json!("deletemesh"));
        fields.insert("responseid".into(), json!("forged"));
        fields.insert("meshid".into(), json!("mesh//x"));
        let env = Envelope::new("meshes").with_fields(fields);
        assert_eq!(env.action, "meshes");
        assert!(env.correlation_id.is_none());
        assert_eq!(env.fields.len(), 1);
    }

    #[test]
    fn inbound_accessors() {
        let msg = json!({"action": "meshes", "responseId": "legacy"});
        let map = msg.as_object().unwrap();
        assert_eq!(action_of(map), Some("meshes"));
        assert_eq!(correlation_id_of(map), Some("legacy"));

        let msg = json!({"action": "event", "responseid": 7});
        assert_eq!(correlation_id_of(msg.as_object().unwrap()), None);
    }

    #[test]
    fn mesh_base64_uses_alternate_characters() {
        // 0xfb 0xff encodes to "+/8=" in the standard alphabet.
        assert_eq!(MESH_BASE64.encode([0xfb, 0xff]), "@$8=");
        assert_eq!(MESH_BASE64.decode("@$8=").unwrap(), vec![0xfb, 0xff]);
    }
}
