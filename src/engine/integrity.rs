use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schemas::exam::SecurityPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum ViolationKind {
    TabSwitch,
    CopyAttempt,
    PasteAttempt,
    RightClick,
    DevtoolsSuspected,
    InactivityTimeout,
    FullscreenExit,
    MultiDeviceSignal,
}

impl ViolationKind {
    pub(crate) fn severity(self) -> Severity {
        match self {
            Self::CopyAttempt | Self::RightClick | Self::InactivityTimeout => Severity::Low,
            Self::TabSwitch | Self::PasteAttempt | Self::FullscreenExit => Severity::Medium,
            Self::DevtoolsSuspected => Severity::High,
            Self::MultiDeviceSignal => Severity::Critical,
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::TabSwitch => "tab-switch",
            Self::CopyAttempt => "copy-attempt",
            Self::PasteAttempt => "paste-attempt",
            Self::RightClick => "right-click",
            Self::DevtoolsSuspected => "devtools-suspected",
            Self::InactivityTimeout => "inactivity-timeout",
            Self::FullscreenExit => "fullscreen-exit",
            Self::MultiDeviceSignal => "multi-device-signal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Host capabilities a listener can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Capability {
    Focus,
    Clipboard,
    ContextMenu,
    Fullscreen,
    Devtools,
    MultiDevice,
}

impl Capability {
    pub(crate) const ALL: [Capability; 6] = [
        Self::Focus,
        Self::Clipboard,
        Self::ContextMenu,
        Self::Fullscreen,
        Self::Devtools,
        Self::MultiDevice,
    ];
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Focus => "focus",
            Self::Clipboard => "clipboard",
            Self::ContextMenu => "context-menu",
            Self::Fullscreen => "fullscreen",
            Self::Devtools => "devtools",
            Self::MultiDevice => "multi-device",
        };
        f.write_str(name)
    }
}

/// Raw client events the monitor turns into violations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum Signal {
    FocusLost,
    Copy,
    Paste,
    ContextMenu,
    DevtoolsOpen,
    FullscreenExit,
    SecondDevice,
}

impl Signal {
    pub(crate) fn capability(self) -> Capability {
        match self {
            Self::FocusLost => Capability::Focus,
            Self::Copy | Self::Paste => Capability::Clipboard,
            Self::ContextMenu => Capability::ContextMenu,
            Self::DevtoolsOpen => Capability::Devtools,
            Self::FullscreenExit => Capability::Fullscreen,
            Self::SecondDevice => Capability::MultiDevice,
        }
    }

    pub(crate) fn violation_kind(self) -> ViolationKind {
        match self {
            Self::FocusLost => ViolationKind::TabSwitch,
            Self::Copy => ViolationKind::CopyAttempt,
            Self::Paste => ViolationKind::PasteAttempt,
            Self::ContextMenu => ViolationKind::RightClick,
            Self::DevtoolsOpen => ViolationKind::DevtoolsSuspected,
            Self::FullscreenExit => ViolationKind::FullscreenExit,
            Self::SecondDevice => ViolationKind::MultiDeviceSignal,
        }
    }

    /// Whether the event is itself user input. Leaving the tab is not: it is the violation,
    /// and must not reset the inactivity clock.
    pub(crate) fn counts_as_activity(self) -> bool {
        matches!(self, Self::Copy | Self::Paste | Self::ContextMenu)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HookStatus {
    Attached,
    /// The host cannot observe this capability; the signal degrades to never firing.
    Unsupported,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum HookError {
    #[error("permission denied for {0}")]
    PermissionDenied(Capability),
}

/// Listener registration surface provided by the host environment.
pub(crate) trait EnvironmentHooks: Send {
    fn attach(&mut self, capability: Capability) -> Result<HookStatus, HookError>;
    fn detach(&mut self, capability: Capability);
}

#[derive(Debug, Error)]
pub(crate) enum IntegrityError {
    #[error("cannot attach required {capability} monitoring")]
    Arming {
        capability: Capability,
        #[source]
        source: HookError,
    },
    #[error("integrity monitor is already armed")]
    AlreadyArmed,
    #[error("integrity monitor was never armed")]
    NotArmed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ViolationRecord {
    pub(crate) kind: ViolationKind,
    pub(crate) severity: Severity,
    pub(crate) timestamp_ms: i64,
    pub(crate) detail: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct SeverityBreakdown {
    pub(crate) low: usize,
    pub(crate) medium: usize,
    pub(crate) high: usize,
    pub(crate) critical: usize,
}

impl SeverityBreakdown {
    fn count(&mut self, severity: Severity) {
        match severity {
            Severity::Low => self.low += 1,
            Severity::Medium => self.medium += 1,
            Severity::High => self.high += 1,
            Severity::Critical => self.critical += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct IntegrityReport {
    pub(crate) violations: Vec<ViolationRecord>,
    pub(crate) violation_count: usize,
    pub(crate) severity: SeverityBreakdown,
    pub(crate) last_activity_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum MonitorState {
    Idle,
    Armed,
    Reporting,
}

/// Observer for the integrity signals of one attempt.
///
/// The monitor only detects and records. Deciding that too many violations end the
/// attempt belongs to the session.
pub(crate) struct IntegrityMonitor {
    state: MonitorState,
    hooks: Option<Box<dyn EnvironmentHooks>>,
    attached: BTreeSet<Capability>,
    log: Vec<ViolationRecord>,
    last_activity_ms: i64,
    inactivity_timeout_ms: i64,
}

impl Default for IntegrityMonitor {
    fn default() -> Self {
        Self {
            state: MonitorState::Idle,
            hooks: None,
            attached: BTreeSet::new(),
            log: Vec::new(),
            last_activity_ms: 0,
            inactivity_timeout_ms: 0,
        }
    }
}

impl fmt::Debug for IntegrityMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrityMonitor")
            .field("state", &self.state)
            .field("attached", &self.attached)
            .field("violations", &self.log.len())
            .field("last_activity_ms", &self.last_activity_ms)
            .finish()
    }
}

fn monitored_capabilities(policy: &SecurityPolicy) -> Vec<Capability> {
    let mut capabilities = vec![Capability::Focus, Capability::Devtools, Capability::MultiDevice];
    if policy.prevent_copy_paste {
        capabilities.push(Capability::Clipboard);
        capabilities.push(Capability::ContextMenu);
    }
    if policy.full_screen_mode {
        capabilities.push(Capability::Fullscreen);
    }
    capabilities
}

fn is_required(policy: &SecurityPolicy, capability: Capability) -> bool {
    capability == Capability::Fullscreen && policy.full_screen_mode
}

impl IntegrityMonitor {
    /// Attaches one listener per capability the policy enables.
    ///
    /// Unsupported capabilities are skipped. A refusal for a capability the policy requires
    /// rolls back every listener attached so far and leaves the monitor idle.
    pub(crate) fn arm(
        &mut self,
        policy: &SecurityPolicy,
        mut hooks: Box<dyn EnvironmentHooks>,
        now_ms: i64,
    ) -> Result<(), IntegrityError> {
        if self.state != MonitorState::Idle {
            return Err(IntegrityError::AlreadyArmed);
        }

        let mut attached = BTreeSet::new();
        for capability in monitored_capabilities(policy) {
            match hooks.attach(capability) {
                Ok(HookStatus::Attached) => {
                    attached.insert(capability);
                }
                Ok(HookStatus::Unsupported) => {
                    tracing::warn!(%capability, "Capability unsupported; signal will never fire");
                }
                Err(source) if is_required(policy, capability) => {
                    for capability in &attached {
                        hooks.detach(*capability);
                    }
                    tracing::warn!(%capability, error = %source, "Required monitoring refused");
                    return Err(IntegrityError::Arming { capability, source });
                }
                Err(err) => {
                    tracing::warn!(%capability, error = %err, "Optional monitoring refused");
                }
            }
        }

        self.hooks = Some(hooks);
        self.attached = attached;
        self.state = MonitorState::Armed;
        self.last_activity_ms = now_ms;
        self.inactivity_timeout_ms =
            (policy.inactivity_timeout_seconds as i64).saturating_mul(1000);
        tracing::debug!(attached = ?self.attached, "Integrity monitor armed");
        Ok(())
    }

    /// Detaches every listener. Safe to call repeatedly.
    pub(crate) fn disarm(&mut self) {
        if let Some(hooks) = self.hooks.as_mut() {
            for capability in &self.attached {
                hooks.detach(*capability);
            }
        }
        self.attached.clear();
        self.hooks = None;
        if self.state == MonitorState::Armed {
            self.state = MonitorState::Reporting;
        }
    }

    pub(crate) fn record(
        &mut self,
        signal: Signal,
        detail: impl Into<String>,
        now_ms: i64,
    ) -> Option<&ViolationRecord> {
        if self.state != MonitorState::Armed {
            return None;
        }
        if !self.attached.contains(&signal.capability()) {
            tracing::debug!(?signal, "Ignoring signal from unattached capability");
            return None;
        }

        if signal.counts_as_activity() {
            self.touch(now_ms);
        }
        Some(self.push(signal.violation_kind(), detail.into(), now_ms))
    }

    pub(crate) fn record_activity(&mut self, now_ms: i64) {
        if self.state == MonitorState::Armed {
            self.touch(now_ms);
        }
    }

    /// Appends an inactivity violation once the watermark is older than the threshold,
    /// then resets the watermark so the same idle stretch is not reported twice.
    pub(crate) fn check_inactivity(&mut self, now_ms: i64) -> Option<&ViolationRecord> {
        if self.state != MonitorState::Armed || self.inactivity_timeout_ms <= 0 {
            return None;
        }

        let idle_ms = now_ms - self.last_activity_ms;
        if idle_ms <= self.inactivity_timeout_ms {
            return None;
        }

        self.last_activity_ms = now_ms;
        Some(self.push(
            ViolationKind::InactivityTimeout,
            format!("no activity for {}s", idle_ms / 1000),
            now_ms,
        ))
    }

    pub(crate) fn violation_count(&self) -> usize {
        self.log.len()
    }

    #[cfg(test)]
    pub(crate) fn last_activity_ms(&self) -> i64 {
        self.last_activity_ms
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> MonitorState {
        self.state
    }

    #[cfg(test)]
    pub(crate) fn is_attached(&self, capability: Capability) -> bool {
        self.attached.contains(&capability)
    }

    pub(crate) fn report(&self) -> Result<IntegrityReport, IntegrityError> {
        if self.state == MonitorState::Idle {
            return Err(IntegrityError::NotArmed);
        }

        let mut severity = SeverityBreakdown::default();
        for record in &self.log {
            severity.count(record.severity);
        }

        Ok(IntegrityReport {
            violations: self.log.clone(),
            violation_count: self.log.len(),
            severity,
            last_activity_ms: self.last_activity_ms,
        })
    }

    fn touch(&mut self, now_ms: i64) {
        self.last_activity_ms = self.last_activity_ms.max(now_ms);
    }

    fn push(&mut self, kind: ViolationKind, detail: String, now_ms: i64) -> &ViolationRecord {
        let severity = kind.severity();
        tracing::info!(
            kind = kind.as_str(),
            severity = ?severity,
            count = self.log.len() + 1,
            "Integrity violation recorded"
        );
        self.log.push(ViolationRecord { kind, severity, timestamp_ms: now_ms, detail });
        &self.log[self.log.len() - 1]
    }
}

impl Drop for IntegrityMonitor {
    fn drop(&mut self) {
        self.disarm();
    }
}

/// Hooks for a host that reports its own capability set, such as a browser client over HTTP.
#[derive(Debug, Clone, Default)]
pub(crate) struct ReportedCapabilities {
    supported: BTreeSet<Capability>,
    denied: BTreeSet<Capability>,
    active: BTreeSet<Capability>,
}

impl ReportedCapabilities {
    pub(crate) fn new(
        supported: impl IntoIterator<Item = Capability>,
        denied: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            supported: supported.into_iter().collect(),
            denied: denied.into_iter().collect(),
            active: BTreeSet::new(),
        }
    }
}

impl EnvironmentHooks for ReportedCapabilities {
    fn attach(&mut self, capability: Capability) -> Result<HookStatus, HookError> {
        if self.denied.contains(&capability) {
            return Err(HookError::PermissionDenied(capability));
        }
        if !self.supported.contains(&capability) {
            return Ok(HookStatus::Unsupported);
        }
        self.active.insert(capability);
        Ok(HookStatus::Attached)
    }

    fn detach(&mut self, capability: Capability) {
        self.active.remove(&capability);
    }
}
