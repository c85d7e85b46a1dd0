//! Security Guard and Consent Engine
//!
//! Design Decision: A three-decision policy lattice (allow/deny/ask) with an
//! optional consent callback and an append-only audit log
//!
//! Rationale: Tool handlers perform side effects on behalf of a remote peer.
//! A host wants automatic policy for the common cases and a human-in-the-loop
//! for the ambiguous ones, without the core smuggling UI concerns in. The
//! `ask` decision routes through a host-supplied [`ConsentHandler`]; with no
//! handler installed it fails closed with [`GuardError::ConsentRequired`].
//!
//! Trade-offs:
//! - Interior mutability: policy and audit log sit behind locks so one guard
//!   can be shared across sessions; critical sections are a single map lookup
//!   or vector push
//! - Audit completeness: every `require` call appends exactly one entry with
//!   the final decision, including denials

use std::collections::HashSet;
use std::sync::{Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A side-effect category a tool may request permission for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionKind {
    /// Read a file or directory
    FsRead,
    /// Create or modify a file or directory
    FsWrite,
    /// Execute a file
    FsExecute,
    /// Outbound HTTP request
    NetworkHttp,
    /// Outbound WebSocket connection
    NetworkWebsocket,
    /// Spawn a child process
    ProcessSpawn,
    /// Read an environment variable
    EnvRead,
    /// Write an environment variable
    EnvWrite,
    /// Read system information (hostname, OS, hardware)
    SystemInfo,
}

impl PermissionKind {
    /// Stable snake_case name, as used in audit output and error messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionKind::FsRead => "fs_read",
            PermissionKind::FsWrite => "fs_write",
            PermissionKind::FsExecute => "fs_execute",
            PermissionKind::NetworkHttp => "network_http",
            PermissionKind::NetworkWebsocket => "network_websocket",
            PermissionKind::ProcessSpawn => "process_spawn",
            PermissionKind::EnvRead => "env_read",
            PermissionKind::EnvWrite => "env_write",
            PermissionKind::SystemInfo => "system_info",
        }
    }
}

impl std::fmt::Display for PermissionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a policy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Grant without consulting anyone
    Allow,
    /// Refuse without consulting anyone
    Deny,
    /// Defer to the consent handler; fail closed without one
    Ask,
}

/// A mapping from permission kind to default decision, with explicit
/// allow/deny overlays. Overlay precedence: allow > deny > default.
#[derive(Debug, Clone)]
pub struct Policy {
    default: Decision,
    allow: HashSet<PermissionKind>,
    deny: HashSet<PermissionKind>,
}

impl Policy {
    /// A policy with the given default and empty overlays.
    pub fn new(default: Decision) -> Self {
        Self {
            default,
            allow: HashSet::new(),
            deny: HashSet::new(),
        }
    }

    /// Everything allowed.
    pub fn permissive() -> Self {
        Self::new(Decision::Allow)
    }

    /// Everything denied.
    pub fn restrictive() -> Self {
        Self::new(Decision::Deny)
    }

    /// Ask by default; reads of files, env, and system info allowed;
    /// execution and process spawning denied.
    pub fn safe_defaults() -> Self {
        Self::new(Decision::Ask)
            .allow(PermissionKind::FsRead)
            .allow(PermissionKind::EnvRead)
            .allow(PermissionKind::SystemInfo)
            .deny(PermissionKind::FsExecute)
            .deny(PermissionKind::ProcessSpawn)
    }

    /// Deny by default; reads and outbound HTTP allowed.
    pub fn read_only() -> Self {
        Self::new(Decision::Deny)
            .allow(PermissionKind::FsRead)
            .allow(PermissionKind::EnvRead)
            .allow(PermissionKind::SystemInfo)
            .allow(PermissionKind::NetworkHttp)
    }

    /// Add a kind to the allow overlay.
    pub fn allow(mut self, kind: PermissionKind) -> Self {
        self.allow.insert(kind);
        self
    }

    /// Add a kind to the deny overlay.
    pub fn deny(mut self, kind: PermissionKind) -> Self {
        self.deny.insert(kind);
        self
    }

    /// Evaluate a kind against overlays and default.
    pub fn decide(&self, kind: PermissionKind) -> Decision {
        if self.allow.contains(&kind) {
            Decision::Allow
        } else if self.deny.contains(&kind) {
            Decision::Deny
        } else {
            self.default
        }
    }
}

/// One permission request from a tool handler. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionRequest {
    kind: PermissionKind,
    resource: Option<String>,
    justification: Option<String>,
    tool: Option<String>,
}

impl PermissionRequest {
    /// A request for the given kind with no resource attached.
    pub fn new(kind: PermissionKind) -> Self {
        Self {
            kind,
            resource: None,
            justification: None,
            tool: None,
        }
    }

    /// Name the resource (path, URL, command) being touched.
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    /// Explain why the permission is needed (shown to consent handlers).
    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.justification = Some(justification.into());
        self
    }

    /// Name the invoking tool.
    pub fn with_tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    /// The permission kind.
    pub fn kind(&self) -> PermissionKind {
        self.kind
    }

    /// The resource, if named.
    pub fn resource(&self) -> Option<&str> {
        self.resource.as_deref()
    }

    /// The justification, if given.
    pub fn justification(&self) -> Option<&str> {
        self.justification.as_deref()
    }

    /// The invoking tool, if named.
    pub fn tool(&self) -> Option<&str> {
        self.tool.as_deref()
    }
}

/// Host-supplied consent decision point for `ask` outcomes.
///
/// Implementations typically prompt a user or consult an out-of-band policy
/// service. Returning [`Decision::Ask`] from the handler leaves the request
/// unresolved and `require` fails with [`GuardError::ConsentRequired`].
#[cfg_attr(test, mockall::automock)]
pub trait ConsentHandler: Send + Sync {
    /// Decide one permission request.
    fn decide(&self, request: &PermissionRequest) -> Decision;
}

/// One record in the guard's append-only decision log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// When the decision was made
    pub timestamp: DateTime<Utc>,
    /// Permission kind requested
    pub kind: PermissionKind,
    /// Resource named in the request
    pub resource: Option<String>,
    /// Invoking tool named in the request
    pub tool: Option<String>,
    /// Final decision, after any consent callback
    pub decision: Decision,
    /// Whether the operation was permitted
    pub granted: bool,
}

/// Failure raised by [`SecurityGuard::require`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GuardError {
    /// The policy (or consent handler) denied the request.
    #[error("Permission denied: {kind}{}", fmt_resource(.resource))]
    PermissionDenied {
        /// Kind that was denied
        kind: PermissionKind,
        /// Resource named in the denied request
        resource: Option<String>,
    },

    /// The policy said ask, and no consent handler is installed.
    #[error("Consent required: {kind}{}", fmt_resource(.resource))]
    ConsentRequired {
        /// Kind that needs consent
        kind: PermissionKind,
        /// Resource named in the unresolved request
        resource: Option<String>,
    },
}

fn fmt_resource(resource: &Option<String>) -> String {
    match resource {
        Some(r) => format!(" on {}", r),
        None => String::new(),
    }
}

/// Mediates every side-effectful operation performed by tools.
///
/// Owned by the server host; may be shared across concurrent sessions
/// (policy swaps and audit appends are internally synchronized).
pub struct SecurityGuard {
    policy: RwLock<Policy>,
    consent: Option<Box<dyn ConsentHandler>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl SecurityGuard {
    /// A guard with the given policy and no consent handler.
    pub fn new(policy: Policy) -> Self {
        Self {
            policy: RwLock::new(policy),
            consent: None,
            audit: Mutex::new(Vec::new()),
        }
    }

    /// A guard that routes `ask` decisions through `handler`.
    pub fn with_consent(policy: Policy, handler: Box<dyn ConsentHandler>) -> Self {
        Self {
            policy: RwLock::new(policy),
            consent: Some(handler),
            audit: Mutex::new(Vec::new()),
        }
    }

    /// Replace the active policy.
    pub fn set_policy(&self, policy: Policy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    /// Evaluate one permission request.
    ///
    /// Appends exactly one audit entry carrying the final decision, then
    /// returns `Ok(())` if granted, [`GuardError::PermissionDenied`] if
    /// denied, or [`GuardError::ConsentRequired`] if the decision remained
    /// `ask` with no handler installed.
    pub fn require(&self, request: &PermissionRequest) -> Result<(), GuardError> {
        let policy_decision = self
            .policy
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .decide(request.kind());

        let final_decision = match (policy_decision, &self.consent) {
            (Decision::Ask, Some(handler)) => handler.decide(request),
            (decision, _) => decision,
        };

        let granted = final_decision == Decision::Allow;
        self.append_audit(request, final_decision, granted);

        match final_decision {
            Decision::Allow => Ok(()),
            Decision::Deny => Err(GuardError::PermissionDenied {
                kind: request.kind(),
                resource: request.resource().map(str::to_string),
            }),
            Decision::Ask => Err(GuardError::ConsentRequired {
                kind: request.kind(),
                resource: request.resource().map(str::to_string),
            }),
        }
    }

    /// Snapshot of the audit log.
    pub fn audit_log(&self) -> Vec<AuditEntry> {
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Discard all audit entries.
    pub fn clear_audit_log(&self) {
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    fn append_audit(&self, request: &PermissionRequest, decision: Decision, granted: bool) {
        let entry = AuditEntry {
            timestamp: Utc::now(),
            kind: request.kind(),
            resource: request.resource().map(str::to_string),
            tool: request.tool().map(str::to_string),
            decision,
            granted,
        };
        tracing::debug!(
            kind = entry.kind.as_str(),
            resource = entry.resource.as_deref().unwrap_or(""),
            granted,
            "permission decision"
        );
        self.audit.lock().unwrap_or_else(|e| e.into_inner()).push(entry);
    }
}

impl std::fmt::Debug for SecurityGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityGuard")
            .field("consent", &self.consent.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_precedence_allow_beats_deny_beats_default() {
        let policy = Policy::new(Decision::Ask)
            .allow(PermissionKind::FsRead)
            .deny(PermissionKind::FsRead)
            .deny(PermissionKind::FsWrite);

        assert_eq!(policy.decide(PermissionKind::FsRead), Decision::Allow);
        assert_eq!(policy.decide(PermissionKind::FsWrite), Decision::Deny);
        assert_eq!(policy.decide(PermissionKind::EnvRead), Decision::Ask);
    }

    #[test]
    fn test_presets() {
        let p = Policy::permissive();
        assert_eq!(p.decide(PermissionKind::ProcessSpawn), Decision::Allow);

        let p = Policy::restrictive();
        assert_eq!(p.decide(PermissionKind::FsRead), Decision::Deny);

        let p = Policy::safe_defaults();
        assert_eq!(p.decide(PermissionKind::FsRead), Decision::Allow);
        assert_eq!(p.decide(PermissionKind::EnvRead), Decision::Allow);
        assert_eq!(p.decide(PermissionKind::SystemInfo), Decision::Allow);
        assert_eq!(p.decide(PermissionKind::FsExecute), Decision::Deny);
        assert_eq!(p.decide(PermissionKind::ProcessSpawn), Decision::Deny);
        assert_eq!(p.decide(PermissionKind::FsWrite), Decision::Ask);

        let p = Policy::read_only();
        assert_eq!(p.decide(PermissionKind::NetworkHttp), Decision::Allow);
        assert_eq!(p.decide(PermissionKind::FsWrite), Decision::Deny);
    }

    #[test]
    fn test_require_appends_one_audit_entry_per_call() {
        let guard = SecurityGuard::new(Policy::restrictive());

        let request = PermissionRequest::new(PermissionKind::FsRead)
            .with_resource("/etc/hosts")
            .with_tool("cat");
        let outcome = guard.require(&request);
        assert!(matches!(
            outcome,
            Err(GuardError::PermissionDenied {
                kind: PermissionKind::FsRead,
                ..
            })
        ));

        let ok = guard.require(&PermissionRequest::new(PermissionKind::FsWrite));
        assert!(ok.is_err());

        let log = guard.audit_log();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].kind, PermissionKind::FsRead);
        assert_eq!(log[0].resource.as_deref(), Some("/etc/hosts"));
        assert_eq!(log[0].tool.as_deref(), Some("cat"));
        assert_eq!(log[0].decision, Decision::Deny);
        assert!(!log[0].granted);
    }

    #[test]
    fn test_granted_flag_matches_outcome() {
        let guard = SecurityGuard::new(Policy::permissive());
        let request = PermissionRequest::new(PermissionKind::NetworkHttp)
            .with_resource("https://example.com");
        assert!(guard.require(&request).is_ok());

        let log = guard.audit_log();
        assert_eq!(log.len(), 1);
        assert!(log[0].granted);
        assert_eq!(log[0].decision, Decision::Allow);
    }

    #[test]
    fn test_ask_without_handler_fails_with_consent_required() {
        let guard = SecurityGuard::new(Policy::new(Decision::Ask));
        let outcome = guard.require(&PermissionRequest::new(PermissionKind::FsWrite));
        assert!(matches!(outcome, Err(GuardError::ConsentRequired { .. })));

        let log = guard.audit_log();
        assert_eq!(log[0].decision, Decision::Ask);
        assert!(!log[0].granted);
    }

    #[test]
    fn test_consent_handler_resolves_ask() {
        let mut handler = MockConsentHandler::new();
        handler
            .expect_decide()
            .withf(|request| request.kind() == PermissionKind::FsWrite)
            .times(1)
            .return_const(Decision::Allow);
        handler
            .expect_decide()
            .withf(|request| request.kind() == PermissionKind::ProcessSpawn)
            .times(1)
            .return_const(Decision::Deny);

        let guard = SecurityGuard::with_consent(Policy::new(Decision::Ask), Box::new(handler));

        assert!(guard
            .require(&PermissionRequest::new(PermissionKind::FsWrite))
            .is_ok());
        assert!(guard
            .require(&PermissionRequest::new(PermissionKind::ProcessSpawn))
            .is_err());

        let log = guard.audit_log();
        assert_eq!(log.len(), 2);
        assert!(log[0].granted);
        assert!(!log[1].granted);
    }

    #[test]
    fn test_consent_handler_not_consulted_for_overlay_hits() {
        let mut handler = MockConsentHandler::new();
        handler.expect_decide().times(0);

        let policy = Policy::new(Decision::Ask).allow(PermissionKind::FsRead);
        let guard = SecurityGuard::with_consent(policy, Box::new(handler));

        assert!(guard
            .require(&PermissionRequest::new(PermissionKind::FsRead))
            .is_ok());
    }

    #[test]
    fn test_clear_audit_log() {
        let guard = SecurityGuard::new(Policy::permissive());
        let _ = guard.require(&PermissionRequest::new(PermissionKind::EnvRead));
        assert_eq!(guard.audit_log().len(), 1);
        guard.clear_audit_log();
        assert!(guard.audit_log().is_empty());
    }

    #[test]
    fn test_policy_swap_at_runtime() {
        let guard = SecurityGuard::new(Policy::restrictive());
        assert!(guard
            .require(&PermissionRequest::new(PermissionKind::FsRead))
            .is_err());

        guard.set_policy(Policy::permissive());
        assert!(guard
            .require(&PermissionRequest::new(PermissionKind::FsRead))
            .is_ok());
    }

    #[test]
    fn test_error_display_names_the_permission() {
        let err = GuardError::PermissionDenied {
            kind: PermissionKind::FsRead,
            resource: Some("/etc/hosts".to_string()),
        };
        assert_eq!(err.to_string(), "Permission denied: fs_read on /etc/hosts");

        let err = GuardError::ConsentRequired {
            kind: PermissionKind::NetworkHttp,
            resource: None,
        };
        assert_eq!(err.to_string(), "Consent required: network_http");
    }
}
