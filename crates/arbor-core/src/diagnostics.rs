//! Captured record of every misuse and anomaly the engine observes.
//!
//! Recording a diagnostic also emits the matching `tracing` event, so the
//! same report reaches both log output and a test harness.

use std::collections::VecDeque;
use std::fmt;

use crate::arena::InstanceId;
use crate::error::TreeError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// Operating on a defunct instance, binding outside a build, and similar.
    Misuse,
    /// Rebuild requested after its depth window closed; deferred to the next flush.
    SchedulingAnomaly,
    /// Sibling descriptors claiming the same key.
    ReconciliationAmbiguity,
    /// Rebuild request that arrived for an instance unmounted in the meantime.
    CancelledRequest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    pub instance: Option<InstanceId>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.instance {
            Some(id) => write!(
                f,
                "[{:?}/{:?}] {}: {}",
                self.severity, self.kind, id, self.message
            ),
            None => write!(f, "[{:?}/{:?}] {}", self.severity, self.kind, self.message),
        }
    }
}

/// Bounded, in-memory diagnostics channel.
#[derive(Debug)]
pub struct Diagnostics {
    entries: VecDeque<Diagnostic>,
    capacity: usize,
    capture: bool,
    dropped: usize,
}

impl Default for Diagnostics {
    fn default() -> Self {
        Self::new(true, 256)
    }
}

impl Diagnostics {
    pub fn new(capture: bool, capacity: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            capacity: capacity.max(1),
            capture,
            dropped: 0,
        }
    }

    pub fn record(&mut self, diagnostic: Diagnostic) {
        match diagnostic.severity {
            Severity::Info => tracing::debug!(
                kind = ?diagnostic.kind,
                instance = ?diagnostic.instance,
                "{}",
                diagnostic.message
            ),
            Severity::Warning => tracing::warn!(
                kind = ?diagnostic.kind,
                instance = ?diagnostic.instance,
                "{}",
                diagnostic.message
            ),
            Severity::Error => tracing::error!(
                kind = ?diagnostic.kind,
                instance = ?diagnostic.instance,
                "{}",
                diagnostic.message
            ),
        }
        if !self.capture {
            return;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(diagnostic);
    }

    pub(crate) fn report(
        &mut self,
        kind: DiagnosticKind,
        severity: Severity,
        instance: Option<InstanceId>,
        message: impl Into<String>,
    ) {
        self.record(Diagnostic {
            kind,
            severity,
            instance,
            message: message.into(),
        });
    }

    /// Records `error` as structural misuse and hands it back for propagation.
    pub(crate) fn misuse(&mut self, error: TreeError) -> TreeError {
        let kind = match error {
            TreeError::DuplicateKey { .. } | TreeError::DuplicateGlobalKey { .. } => {
                DiagnosticKind::ReconciliationAmbiguity
            }
            _ => DiagnosticKind::Misuse,
        };
        self.report(kind, Severity::Error, error.instance(), error.to_string());
        error
    }

    pub fn entries(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    pub fn take(&mut self) -> Vec<Diagnostic> {
        self.entries.drain(..).collect()
    }

    pub fn has_errors(&self) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries evicted because the channel was full.
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capacity_evicts_oldest() {
        let mut diagnostics = Diagnostics::new(true, 2);
        for n in 0..3 {
            diagnostics.report(
                DiagnosticKind::SchedulingAnomaly,
                Severity::Warning,
                None,
                format!("late {n}"),
            );
        }
        let messages: Vec<_> = diagnostics.entries().map(|d| d.message.clone()).collect();
        assert_eq!(messages, vec!["late 1", "late 2"]);
        assert_eq!(diagnostics.dropped(), 1);
        assert!(!diagnostics.has_errors());
    }

    #[test]
    fn misuse_is_classified_and_returned() {
        let mut diagnostics = Diagnostics::default();
        let error = diagnostics.misuse(TreeError::NoRoot);
        assert_eq!(error, TreeError::NoRoot);
        assert_eq!(diagnostics.of_kind(DiagnosticKind::Misuse).count(), 1);
        assert!(diagnostics.has_errors());
    }

    #[test]
    fn disabled_capture_keeps_nothing() {
        let mut diagnostics = Diagnostics::new(false, 8);
        diagnostics.misuse(TreeError::RootAlreadyMounted);
        assert!(diagnostics.is_empty());
    }
}
