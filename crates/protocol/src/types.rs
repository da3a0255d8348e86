//! Session and permission types shared across the relay

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Permission mode selected by the user for the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PermissionMode {
    #[default]
    Default,
    ReadOnly,
    SafeYolo,
    Yolo,
}

impl PermissionMode {
    /// Approval policy forwarded to the backend.
    ///
    /// `has_approval_bridge` is true when the transport can round-trip
    /// approval callbacks (app-server); transports without a callback
    /// bridge fall back to on-failure in default mode.
    pub fn approval_policy(self, has_approval_bridge: bool) -> &'static str {
        match self {
            PermissionMode::Default if has_approval_bridge => "on-request",
            PermissionMode::Default => "on-failure",
            PermissionMode::ReadOnly => "never",
            PermissionMode::SafeYolo => "on-failure",
            PermissionMode::Yolo => "on-failure",
        }
    }

    /// Sandbox policy forwarded to the backend.
    pub fn sandbox_mode(self) -> &'static str {
        match self {
            PermissionMode::Default => "workspace-write",
            PermissionMode::ReadOnly => "read-only",
            PermissionMode::SafeYolo => "workspace-write",
            PermissionMode::Yolo => "danger-full-access",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PermissionMode::Default => "default",
            PermissionMode::ReadOnly => "read-only",
            PermissionMode::SafeYolo => "safe-yolo",
            PermissionMode::Yolo => "yolo",
        }
    }
}

/// Model reasoning effort. Only these four values are ever forwarded to a
/// backend; anything else is dropped at the parsing boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningEffort {
    Low,
    Medium,
    High,
    Xhigh,
}

impl ReasoningEffort {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(ReasoningEffort::Low),
            "medium" => Some(ReasoningEffort::Medium),
            "high" => Some(ReasoningEffort::High),
            "xhigh" => Some(ReasoningEffort::Xhigh),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReasoningEffort::Low => "low",
            ReasoningEffort::Medium => "medium",
            ReasoningEffort::High => "high",
            ReasoningEffort::Xhigh => "xhigh",
        }
    }
}

/// Sandbox/approval overrides taken from the Codex CLI configuration.
/// Honoured only while the permission mode is `default`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodexCliOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sandbox: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<String>,
}

/// The full mode a queued message was submitted under.
///
/// Two modes are interchangeable for session-reuse purposes exactly when
/// their [`EnhancedMode::hash`] values are equal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnhancedMode {
    #[serde(default)]
    pub permission_mode: PermissionMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_effort: Option<ReasoningEffort>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_overrides: Option<CodexCliOverrides>,
}

impl EnhancedMode {
    /// Stable digest of this mode. Equal modes always hash equally; the
    /// serialization order is the struct's declaration order, which serde
    /// keeps deterministic.
    pub fn hash(&self) -> String {
        let serialized = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(serialized.as_bytes());
        hex_encode(&digest[..16])
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// A backend-initiated approval prompt, keyed by `id` until the hub
/// returns a decision or the turn is aborted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool_name: String,
    pub input: ApprovalInput,
}

/// The displayable payload of an approval request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApprovalInput {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<String>,
}

/// The hub's answer to an approval request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub decision: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default)]
    pub approved: bool,
}

impl ApprovalDecision {
    pub fn from_decision(decision: impl Into<String>, reason: Option<String>) -> Self {
        let decision = decision.into();
        let approved = matches!(decision.as_str(), "approved" | "approved_for_session");
        Self {
            decision,
            reason,
            approved,
        }
    }

    /// The wire decision sent back to the backend.
    pub fn wire_decision(&self) -> &'static str {
        if self.approved {
            "approved"
        } else {
            "denied"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_modes_hash_equal() {
        let a = EnhancedMode {
            permission_mode: PermissionMode::SafeYolo,
            model: Some("gpt-5".to_string()),
            reasoning_effort: Some(ReasoningEffort::High),
            codex_overrides: None,
        };
        let b = a.clone();
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn different_modes_hash_differently() {
        let a = EnhancedMode::default();
        let mut b = EnhancedMode::default();
        b.permission_mode = PermissionMode::Yolo;
        assert_ne!(a.hash(), b.hash());

        let mut c = EnhancedMode::default();
        c.model = Some("o3".to_string());
        assert_ne!(a.hash(), c.hash());
    }

    #[test]
    fn approval_policy_mapping() {
        assert_eq!(PermissionMode::Default.approval_policy(true), "on-request");
        assert_eq!(PermissionMode::Default.approval_policy(false), "on-failure");
        assert_eq!(PermissionMode::ReadOnly.approval_policy(true), "never");
        assert_eq!(PermissionMode::SafeYolo.approval_policy(true), "on-failure");
        assert_eq!(PermissionMode::Yolo.approval_policy(true), "on-failure");
    }

    #[test]
    fn sandbox_mapping() {
        assert_eq!(PermissionMode::Default.sandbox_mode(), "workspace-write");
        assert_eq!(PermissionMode::ReadOnly.sandbox_mode(), "read-only");
        assert_eq!(PermissionMode::SafeYolo.sandbox_mode(), "workspace-write");
        assert_eq!(PermissionMode::Yolo.sandbox_mode(), "danger-full-access");
    }

    #[test]
    fn reasoning_effort_parses_known_values_only() {
        assert_eq!(ReasoningEffort::parse("low"), Some(ReasoningEffort::Low));
        assert_eq!(ReasoningEffort::parse("xhigh"), Some(ReasoningEffort::Xhigh));
        assert_eq!(ReasoningEffort::parse("minimal"), None);
        assert_eq!(ReasoningEffort::parse(""), None);
    }

    #[test]
    fn permission_mode_deserializes_kebab_case() {
        let mode: PermissionMode = serde_json::from_str(r#""safe-yolo""#).unwrap();
        assert_eq!(mode, PermissionMode::SafeYolo);
        let mode: PermissionMode = serde_json::from_str(r#""read-only""#).unwrap();
        assert_eq!(mode, PermissionMode::ReadOnly);
    }

    #[test]
    fn decision_approval_mapping() {
        let yes = ApprovalDecision::from_decision("approved", None);
        assert!(yes.approved);
        assert_eq!(yes.wire_decision(), "approved");

        let session = ApprovalDecision::from_decision("approved_for_session", None);
        assert!(session.approved);

        let no = ApprovalDecision::from_decision("denied", Some("not now".to_string()));
        assert!(!no.approved);
        assert_eq!(no.wire_decision(), "denied");

        let abort = ApprovalDecision::from_decision("abort", None);
        assert!(!abort.approved);
    }
}
