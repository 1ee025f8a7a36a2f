//! Contact-secret record shapes, as persisted by `contacts::ContactSecretsStore`.

use serde::{Deserialize, Serialize};

use e2ee_crypto::ratchet::DrSnapshot;

/// A contact's role in the pairing that established the shared secret.
/// Legacy producers wrote `initiator`/`responder`; both are normalized
/// to the current `guest`/`owner` pair on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Owner,
    Guest,
}

impl<'de> Deserialize<'de> for Role {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(match raw.as_str() {
            "owner" | "responder" => Role::Owner,
            "guest" | "initiator" => Role::Guest,
            other => {
                return Err(serde::de::Error::custom(format!("unknown contact role: {other}")));
            }
        })
    }
}

/// One entry in a contact's DR replay history: a before/after snapshot
/// pair bracketing a single send or receive, plus the message key used.
/// Lets the store replay a past message range for offline decryption
/// without re-deriving the whole chain from scratch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrHistoryEntry {
    pub ts: i64,
    #[serde(rename = "messageId")]
    pub message_id: String,
    pub snapshot: DrSnapshot,
    #[serde(rename = "snapshotAfter")]
    pub snapshot_after: DrSnapshot,
    #[serde(rename = "messageKey_b64")]
    pub message_key_b64: String,
}

/// Durable per-peer record. Keyed by a normalized peer identifier
/// (uppercase hex, non-hex characters stripped) in the owning store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactSecretRecord {
    #[serde(rename = "inviteId", default, skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    pub role: Role,
    #[serde(rename = "conversationToken", default, skip_serializing_if = "Option::is_none")]
    pub conversation_token: Option<String>,
    #[serde(rename = "conversationId", default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(rename = "conversationDrInit", default, skip_serializing_if = "Option::is_none")]
    pub conversation_dr_init: Option<bool>,
    #[serde(rename = "drState", default, skip_serializing_if = "Option::is_none")]
    pub dr_state: Option<DrSnapshot>,
    #[serde(rename = "drSeed", default, skip_serializing_if = "Option::is_none")]
    pub dr_seed: Option<String>,
    #[serde(rename = "drHistory", default)]
    pub dr_history: Vec<DrHistoryEntry>,
    #[serde(rename = "drHistoryCursorTs", default, skip_serializing_if = "Option::is_none")]
    pub dr_history_cursor_ts: Option<i64>,
    #[serde(rename = "drHistoryCursorId", default, skip_serializing_if = "Option::is_none")]
    pub dr_history_cursor_id: Option<String>,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// A partial update to a `ContactSecretRecord`. Every field is optional;
/// absent fields leave the existing value untouched (merge-with-override).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContactSecretPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invite_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_dr_init: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_state: Option<DrSnapshot>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dr_seed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub append_dr_history: Option<DrHistoryEntry>,
}

/// Uppercase-hex, non-hex-stripped normalization applied to every peer
/// identifier before it is used as a store key.
pub fn normalize_peer_id(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_hexdigit()).collect::<String>().to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_roles_normalize() {
        let owner: Role = serde_json::from_str("\"responder\"").unwrap();
        let guest: Role = serde_json::from_str("\"initiator\"").unwrap();
        assert_eq!(owner, Role::Owner);
        assert_eq!(guest, Role::Guest);
    }

    #[test]
    fn normalize_strips_non_hex_and_upcases() {
        assert_eq!(normalize_peer_id("ab:cd-EF 01"), "ABCDEF01");
    }
}
