#![forbid(unsafe_code)]

use std::fmt;

use ms_core::ExecutionMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceKind {
    /// Elementwise collection operators.
    Algebra,
    /// Scalar-valued results: inner products, norms, distances.
    Reduction,
    Materialize,
    Policy,
}

impl EvidenceKind {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Algebra => "algebra",
            Self::Reduction => "reduction",
            Self::Materialize => "materialize",
            Self::Policy => "policy",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvidenceEntry {
    pub ts_unix_ms: u128,
    pub kind: EvidenceKind,
    pub summary: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidenceLedger {
    entries: Vec<EvidenceEntry>,
}

impl EvidenceLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, kind: EvidenceKind, summary: impl Into<String>) {
        self.entries.push(EvidenceEntry {
            ts_unix_ms: now_unix_ms(),
            kind,
            summary: summary.into(),
        });
    }

    #[must_use]
    pub fn entries(&self) -> &[EvidenceEntry] {
        &self.entries
    }

    pub fn entries_of(&self, kind: EvidenceKind) -> impl Iterator<Item = &EvidenceEntry> {
        self.entries.iter().filter(move |entry| entry.kind == kind)
    }

    #[must_use]
    pub fn last(&self) -> Option<&EvidenceEntry> {
        self.entries.last()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeContext {
    mode: ExecutionMode,
    ledger: EvidenceLedger,
}

impl RuntimeContext {
    #[must_use]
    pub fn new(mode: ExecutionMode) -> Self {
        let mut ledger = EvidenceLedger::new();
        ledger.record(
            EvidenceKind::Policy,
            format!("mode initialized to {mode:?}"),
        );
        Self { mode, ledger }
    }

    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn set_mode(&mut self, mode: ExecutionMode) {
        self.mode = mode;
        self.ledger
            .record(EvidenceKind::Policy, format!("mode switched to {mode:?}"));
    }

    #[must_use]
    pub fn ledger(&self) -> &EvidenceLedger {
        &self.ledger
    }

    pub fn ledger_mut(&mut self) -> &mut EvidenceLedger {
        &mut self.ledger
    }

    /// Records a failed operation together with the error that stopped it.
    pub fn record_rejection<E>(&mut self, kind: EvidenceKind, op: &str, error: &E)
    where
        E: fmt::Display + ?Sized,
    {
        self.ledger.record(
            kind,
            format!(
                "op={op} mode={:?} outcome=rejected reason={error}",
                self.mode
            ),
        );
    }
}

fn now_unix_ms() -> u128 {
    let now = std::time::SystemTime::now();
    now.duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |duration| duration.as_millis())
}

#[cfg(test)]
mod tests {
    use ms_core::ExecutionMode;

    use super::{EvidenceKind, RuntimeContext};

    #[test]
    fn ledger_records_policy_and_custom_events() {
        let mut ctx = RuntimeContext::new(ExecutionMode::Strict);
        ctx.ledger_mut()
            .record(EvidenceKind::Algebra, "op=+ outcome=ok");

        assert_eq!(ctx.ledger().len(), 2);
        assert_eq!(ctx.ledger().entries()[0].kind, EvidenceKind::Policy);
        assert_eq!(ctx.ledger().entries()[1].kind, EvidenceKind::Algebra);
    }

    #[test]
    fn mode_switch_records_event() {
        let mut ctx = RuntimeContext::new(ExecutionMode::Strict);
        ctx.set_mode(ExecutionMode::Hardened);

        assert_eq!(ctx.mode(), ExecutionMode::Hardened);
        assert_eq!(ctx.ledger().len(), 2);
        let last = ctx.ledger().last().expect("mode switch entry");
        assert_eq!(last.summary, "mode switched to Hardened");
    }

    #[test]
    fn rejection_summary_carries_op_and_reason() {
        let mut ctx = RuntimeContext::new(ExecutionMode::Hardened);
        ctx.record_rejection(
            EvidenceKind::Reduction,
            "@",
            "unsupported operand types for @",
        );

        let entry = ctx
            .ledger()
            .entries_of(EvidenceKind::Reduction)
            .next()
            .expect("reduction evidence entry should be present");
        assert_eq!(
            entry.summary,
            "op=@ mode=Hardened outcome=rejected reason=unsupported operand types for @"
        );
    }

    #[test]
    fn entries_of_filters_by_kind() {
        let mut ctx = RuntimeContext::new(ExecutionMode::Strict);
        ctx.ledger_mut().record(EvidenceKind::Algebra, "a");
        ctx.ledger_mut().record(EvidenceKind::Materialize, "m");
        ctx.ledger_mut().record(EvidenceKind::Algebra, "b");

        let algebra: Vec<&str> = ctx
            .ledger()
            .entries_of(EvidenceKind::Algebra)
            .map(|entry| entry.summary.as_str())
            .collect();
        assert_eq!(algebra, vec!["a", "b"]);
        assert_eq!(EvidenceKind::Materialize.label(), "materialize");
    }
}
