//! Dataflow facts computed by the upstream invariant analysis: reaching definitions and def-use
//! chains, keyed by small integer indices.
//!
//! The analysis itself is not performed here; its results are consumed through [`InvariantStore`].

use crate::containers::unordered::UnorderedMap;
use crate::dictionary::FnXprDictionary;
use crate::error::{malformed, Result};
use crate::interned::IndexedTable;
use crate::xvalue::XVariable;

/// A variable, together with a set of program locations (definition sites for reaching
/// definitions, use sites for def-use facts).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VarDefUse {
    pub variable: XVariable,
    pub locations: Vec<String>,
}

impl VarDefUse {
    /// The locations that are plain instruction addresses.
    pub fn addresses(&self) -> Vec<u64> {
        self.locations
            .iter()
            .filter_map(|l| l.strip_prefix("0x"))
            .filter_map(|l| u64::from_str_radix(l, 16).ok())
            .collect()
    }
}

impl std::fmt::Display for VarDefUse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: [{}]", self.variable, self.locations.join(", "))
    }
}

/// A fact about one variable at one location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VarInvariantFact {
    /// The definitions at these locations may reach here.
    ReachingDef(VarDefUse),
    /// The flag definitions at these locations may reach here.
    FlagReachingDef(VarDefUse),
    /// The definition made here is used at these locations.
    DefUse(VarDefUse),
    /// The definition made here is used at these locations, in the high-level code.
    DefUseHigh(VarDefUse),
}

impl VarInvariantFact {
    pub fn vardefuse(&self) -> &VarDefUse {
        match self {
            VarInvariantFact::ReachingDef(d)
            | VarInvariantFact::FlagReachingDef(d)
            | VarInvariantFact::DefUse(d)
            | VarInvariantFact::DefUseHigh(d) => d,
        }
    }

    pub fn variable(&self) -> &XVariable {
        &self.vardefuse().variable
    }

    /// The key letter that requests facts of this kind.
    pub fn letter(&self) -> char {
        match self {
            VarInvariantFact::ReachingDef(_) => 'r',
            VarInvariantFact::FlagReachingDef(_) => 'f',
            VarInvariantFact::DefUse(_) => 'd',
            VarInvariantFact::DefUseHigh(_) => 'h',
        }
    }
}

impl std::fmt::Display for VarInvariantFact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            VarInvariantFact::ReachingDef(_) => "RD",
            VarInvariantFact::FlagReachingDef(_) => "FRD",
            VarInvariantFact::DefUse(_) => "DU",
            VarInvariantFact::DefUseHigh(_) => "DU-H",
        };
        write!(f, "{}: {}", kind, self.vardefuse())
    }
}

/// Lookup of dataflow facts by index.
pub trait InvariantStore {
    fn fact(&self, index: usize) -> Option<&VarInvariantFact>;
}

/// Facts decoded from a `varinv` table, where each record is `kind,loc,...` | `var`.
#[derive(Clone, Debug, Default)]
pub struct VarInvariantTable {
    facts: UnorderedMap<usize, VarInvariantFact>,
}

impl VarInvariantTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index: usize, fact: VarInvariantFact) {
        self.facts.insert(index, fact);
    }

    pub fn decode(table: &IndexedTable, xd: &FnXprDictionary) -> Result<Self> {
        let mut r = Self::new();
        for rec in table.records() {
            let t = table.name();
            rec.expect_shape(t, 1, 1)?;
            let d = VarDefUse {
                variable: xd.variable(rec.arg_index(t, 0)?)?,
                locations: rec.tags[1..].to_vec(),
            };
            let fact = match rec.kind() {
                "r" => VarInvariantFact::ReachingDef(d),
                "f" => VarInvariantFact::FlagReachingDef(d),
                "d" => VarInvariantFact::DefUse(d),
                "h" => VarInvariantFact::DefUseHigh(d),
                k => return Err(malformed!(t, rec.index, "unknown fact kind {:?}", k)),
            };
            r.facts.insert(rec.index, fact);
        }
        Ok(r)
    }

    pub fn len(&self) -> usize {
        self.facts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.is_empty()
    }
}

impl InvariantStore for VarInvariantTable {
    fn fact(&self, index: usize) -> Option<&VarInvariantFact> {
        self.facts.get(&index)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::interned::TaggedArgs;

    #[test]
    fn facts_decode_by_kind() {
        let mut xd = FnXprDictionary::new();
        let r0 = xd.mk_register_variable("R0");
        let mut t = IndexedTable::new("varinv");
        t.add(TaggedArgs::new(["r", "0x10", "0x14"], vec![r0 as i64]));
        t.add(TaggedArgs::new(["d", "0x20"], vec![r0 as i64]));
        let store = VarInvariantTable::decode(&t, &xd).unwrap();
        let rd = store.fact(1).unwrap();
        assert_eq!(rd.letter(), 'r');
        assert_eq!(rd.vardefuse().addresses(), vec![0x10, 0x14]);
        assert_eq!(rd.variable().name, "R0");
        assert_eq!(store.fact(2).map(|f| f.letter()), Some('d'));
        assert!(store.fact(3).is_none());
    }

    #[test]
    fn unknown_fact_kinds_are_rejected() {
        let mut xd = FnXprDictionary::new();
        let r0 = xd.mk_register_variable("R0");
        let mut t = IndexedTable::new("varinv");
        t.add(TaggedArgs::new(["q"], vec![r0 as i64]));
        assert!(VarInvariantTable::decode(&t, &xd).is_err());
    }
}
