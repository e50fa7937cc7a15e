//! Diagnostics for resolution gaps: places where lifting fell back to a placeholder, or where
//! bookkeeping had to overwrite earlier information. These never abort a lift.

use crate::log::*;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticKind {
    /// A value could not be turned into an expression or lvalue.
    UnresolvedValue,
    /// An offset could not be navigated through the types at hand.
    UnsupportedOffset,
    /// More than one SSA variable could stand for a value.
    AmbiguousSsa,
    /// A low-level node was mapped to a second high-level node.
    ProvenanceOverwrite,
    /// A fact record had error-valued results.
    ErrorValuedRecord,
}

impl std::fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DiagnosticKind::UnresolvedValue => "unresolved-value",
            DiagnosticKind::UnsupportedOffset => "unsupported-offset",
            DiagnosticKind::AmbiguousSsa => "ambiguous-ssa",
            DiagnosticKind::ProvenanceOverwrite => "provenance-overwrite",
            DiagnosticKind::ErrorValuedRecord => "error-valued-record",
        };
        write!(f, "{}", s)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Diagnostic {
    /// Address of the instruction being lifted, if any.
    pub site: Option<u64>,
    pub kind: DiagnosticKind,
    pub message: String,
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.site {
            Some(s) => write!(f, "{:#x}: {}: {}", s, self.kind, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

/// Diagnostics collected over one function lift.
#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a diagnostic, and log it.
    pub fn report(&mut self, site: Option<u64>, kind: DiagnosticKind, message: impl Into<String>) {
        let d = Diagnostic {
            site,
            kind,
            message: message.into(),
        };
        warn!("Lifting diagnostic";
              "kind" => %d.kind,
              OptionalKV("site", d.site.map(|s| format!("{:#x}", s))),
              "message" => &d.message);
        self.items.push(d);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.items.iter().filter(move |d| d.kind == kind)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn diagnostics_are_collected_in_order() {
        let mut ds = Diagnostics::new();
        ds.report(Some(0x10), DiagnosticKind::AmbiguousSsa, "two values");
        ds.report(None, DiagnosticKind::UnresolvedValue, "no base");
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.of_kind(DiagnosticKind::AmbiguousSsa).count(), 1);
        let first = ds.iter().next().unwrap();
        assert_eq!(first.to_string(), "0x10: ambiguous-ssa: two values");
    }
}
