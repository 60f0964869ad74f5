// src/core/events.rs

//! Defines the event bus that publishes every significant monitor state change.
//!
//! Events are logged at the level matching their sign/severity and, for WARNING-level
//! events targeting a primary, also queued to the script executor as a notification job.

use crate::core::warden::script::{ScriptExecutor, ScriptJob};
use std::fmt;
use tracing::{info, warn};

/// Whether an event marks something being entered (`+`) or exited (`-`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Enter,
    Exit,
}

impl fmt::Display for Sign {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sign::Enter => write!(f, "+"),
            Sign::Exit => write!(f, "-"),
        }
    }
}

/// Severity determines both the `tracing` level and whether the event triggers the
/// notification script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// One instance of the `<sign><type>` event types named in the event bus contract
/// (`sdown`, `odown`, `tilt`, `new-epoch`, `vote-for-leader`, `elected-leader`,
/// `try-failover`, `failover-state-*`, `promoted-slave`, `slave-reconf-sent`,
/// `slave-reconf-inprog`, `slave-reconf-done`, `failover-end`, `failover-end-for-timeout`,
/// `failover-abort-*`, `switch-master`, `reset-master`, `reboot`, `sentinel`,
/// `dup-sentinel`, `slave`, `fix-slave-config`, `convert-to-slave`, `script-error`,
/// `script-timeout`, `script-child`).
#[derive(Debug, Clone)]
pub struct MonitorEvent {
    pub sign: Sign,
    pub event_type: &'static str,
    pub severity: Severity,
    pub primary_name: String,
    pub detail: String,
}

impl MonitorEvent {
    pub fn new(
        sign: Sign,
        event_type: &'static str,
        severity: Severity,
        primary_name: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            sign,
            event_type,
            severity,
            primary_name: primary_name.into(),
            detail: detail.into(),
        }
    }

    fn wire_line(&self) -> String {
        if self.detail.is_empty() {
            format!("{}{} {}", self.sign, self.event_type, self.primary_name)
        } else {
            format!(
                "{}{} {} {}",
                self.sign, self.event_type, self.primary_name, self.detail
            )
        }
    }
}

/// Publishes `MonitorEvent`s to the log and, for warnings, to the script executor.
#[derive(Debug, Clone)]
pub struct EventBus {
    notification_script: Option<String>,
}

impl EventBus {
    pub fn new(notification_script: Option<String>) -> Self {
        Self {
            notification_script,
        }
    }

    /// Emits an event: logs it at the level matching its severity, and for
    /// WARNING-level events targeting a primary, enqueues the notification script.
    pub fn publish(&self, event: MonitorEvent, executor: &ScriptExecutor) {
        let line = event.wire_line();
        match event.severity {
            Severity::Info => info!(primary = %event.primary_name, "{line}"),
            Severity::Warning => warn!(primary = %event.primary_name, "{line}"),
        }

        if event.severity == Severity::Warning {
            if let Some(script) = &self.notification_script {
                executor.enqueue(ScriptJob::notification(
                    script.clone(),
                    event.event_type,
                    line,
                ));
            }
        }
    }
}
