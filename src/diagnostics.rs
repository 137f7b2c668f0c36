// ABOUTME: Non-fatal findings of a run: recorder failures and leftover deployment records.
// ABOUTME: Each finding is logged when raised and handed back to the caller with the result.

use std::fmt;

/// Warnings gathered while a run proceeds.
#[derive(Debug, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    /// Log `warning` and keep it.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(kind = %warning.kind, "{}", warning.message);
        self.warnings.push(warning);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn has_warnings(&self) -> bool {
        !self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub kind: WarningKind,
    pub message: String,
}

impl Warning {
    /// The state recorder rejected `call`; the record on disk may lag behind.
    pub fn recorder(call: &str, error: impl fmt::Display) -> Self {
        Self {
            kind: WarningKind::Recorder,
            message: format!("state recorder {call} failed: {error}"),
        }
    }

    /// A deployment record from another run was found and set aside.
    pub fn stale_record(message: impl Into<String>) -> Self {
        Self {
            kind: WarningKind::StaleRecord,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    Recorder,
    /// Left behind by a run that never finished, or overridden with `--force`.
    StaleRecord,
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::Recorder => f.write_str("recorder"),
            WarningKind::StaleRecord => f.write_str("stale_record"),
        }
    }
}
