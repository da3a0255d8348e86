//! Session state.
//!
//! Singleton per process. Mutated only by the orchestrator and by inbound
//! hub events; destroyed on orderly exit.

use std::collections::BTreeMap;
use std::path::PathBuf;

use relay_protocol::{CodexCliOverrides, EnhancedMode, PermissionMode, ReasoningEffort};
use relay_transports::SessionConfig;
use serde_json::Value;

pub struct Session {
    /// Opaque backend thread identifier once known.
    pub session_id: Option<String>,
    /// Working directory the agent operates in.
    pub path: PathBuf,
    pub thinking: bool,
    pub codex_cli_overrides: Option<CodexCliOverrides>,
    pub permission_mode: PermissionMode,
    pub model: Option<String>,
    pub reasoning_effort: Option<ReasoningEffort>,
}

impl Session {
    pub fn new(path: PathBuf) -> Self {
        Self {
            session_id: None,
            path,
            thinking: false,
            codex_cli_overrides: None,
            permission_mode: PermissionMode::Default,
            model: None,
            reasoning_effort: None,
        }
    }

    /// Take over the settings carried by a queued message's mode.
    pub fn apply_mode(&mut self, mode: &EnhancedMode) {
        self.permission_mode = mode.permission_mode;
        self.model = mode.model.clone();
        self.reasoning_effort = mode.reasoning_effort;
        self.codex_cli_overrides = mode.codex_overrides.clone();
    }

    /// Build the backend configuration for the current mode.
    ///
    /// CLI overrides are honoured only while the permission mode is
    /// `default`; any other mode pins both policies.
    pub fn transport_config(
        &self,
        has_approval_bridge: bool,
        mcp_servers: BTreeMap<String, Value>,
    ) -> SessionConfig {
        let mut approval_policy = self
            .permission_mode
            .approval_policy(has_approval_bridge)
            .to_string();
        let mut sandbox_mode = self.permission_mode.sandbox_mode().to_string();

        if self.permission_mode == PermissionMode::Default {
            if let Some(overrides) = &self.codex_cli_overrides {
                if let Some(approval) = &overrides.approval {
                    approval_policy = approval.clone();
                }
                if let Some(sandbox) = &overrides.sandbox {
                    sandbox_mode = sandbox.clone();
                }
            }
        }

        SessionConfig {
            cwd: self.path.clone(),
            model: self.model.clone(),
            reasoning_effort: self.reasoning_effort.map(|e| e.as_str().to_string()),
            approval_policy,
            sandbox_mode,
            mcp_servers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session_with_mode(mode: EnhancedMode) -> Session {
        let mut session = Session::new(PathBuf::from("/work"));
        session.apply_mode(&mode);
        session
    }

    #[test]
    fn default_mode_config() {
        let session = session_with_mode(EnhancedMode::default());
        let config = session.transport_config(true, BTreeMap::new());
        assert_eq!(config.approval_policy, "on-request");
        assert_eq!(config.sandbox_mode, "workspace-write");
        assert_eq!(config.cwd, PathBuf::from("/work"));
    }

    #[test]
    fn yolo_mode_config() {
        let session = session_with_mode(EnhancedMode {
            permission_mode: PermissionMode::Yolo,
            ..Default::default()
        });
        let config = session.transport_config(true, BTreeMap::new());
        assert_eq!(config.approval_policy, "on-failure");
        assert_eq!(config.sandbox_mode, "danger-full-access");
    }

    #[test]
    fn overrides_apply_only_in_default_mode() {
        let overrides = CodexCliOverrides {
            sandbox: Some("read-only".to_string()),
            approval: Some("never".to_string()),
        };

        let session = session_with_mode(EnhancedMode {
            permission_mode: PermissionMode::Default,
            codex_overrides: Some(overrides.clone()),
            ..Default::default()
        });
        let config = session.transport_config(true, BTreeMap::new());
        assert_eq!(config.approval_policy, "never");
        assert_eq!(config.sandbox_mode, "read-only");

        let session = session_with_mode(EnhancedMode {
            permission_mode: PermissionMode::SafeYolo,
            codex_overrides: Some(overrides),
            ..Default::default()
        });
        let config = session.transport_config(true, BTreeMap::new());
        assert_eq!(config.approval_policy, "on-failure");
        assert_eq!(config.sandbox_mode, "workspace-write");
    }

    #[test]
    fn reasoning_effort_is_forwarded_as_string() {
        let session = session_with_mode(EnhancedMode {
            reasoning_effort: Some(ReasoningEffort::Xhigh),
            ..Default::default()
        });
        let config = session.transport_config(false, BTreeMap::new());
        assert_eq!(config.reasoning_effort.as_deref(), Some("xhigh"));
    }
}
