//! Per-instruction fact records, and the tagged-argument decoder that expands them.
//!
//! The first tag of a record is its key: `nop`, `subsumes`, or `a:<letters>` / `ar:<letters>`.
//! Each letter consumes one argument, in order:
//!
//! | letter | field                                    | error sentinel allowed |
//! |--------|------------------------------------------|------------------------|
//! | `v`    | `vars` (`vars_result` in the `ar:` form) | in the `ar:` form      |
//! | `w`    | `committed_vars`                         | yes                    |
//! | `x`    | `xprs` (`xprs_result` in the `ar:` form) | in the `ar:` form      |
//! | `c`    | `committed_xprs`                         | yes                    |
//! | `a`    | `xprs`                                   | no                     |
//! | `s`    | `strings`                                | no                     |
//! | `i`    | `intervals`                              | no                     |
//! | `l`    | `ints` (the raw value)                   | n/a                    |
//! | `t`    | `types`                                  | no                     |
//! | `r`    | `reaching_defs`                          | negative is missing    |
//! | `d`    | `def_uses`                               | negative is missing    |
//! | `h`    | `def_uses_high`                          | non-positive is missing|
//! | `f`    | `flag_reaching_defs`                     | negative is missing    |
//!
//! After the lettered arguments come, in this order, two arguments for a base update (tag `bu`),
//! one for a return value (tag `rv`) and one string index for a call target (second tag `call`).

use std::marker::PhantomData;
use std::sync::OnceLock;

use crate::ast::Typ;
use crate::dataflow::{InvariantStore, VarInvariantFact};
use crate::dictionary::{FnXprDictionary, StringTable, TypeTable};
use crate::error::{Error, Result};
use crate::interned::IndexedRecord;
use crate::lift_config::CONFIG;
use crate::log::*;
use crate::xvalue::{XInterval, XVariable, XXpr};

/// A value that upstream analysis may have failed to produce.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum XFact<T> {
    Present(T),
    /// Not provided (not requested, or not available from the store).
    Missing,
    /// Explicitly marked as unavailable by the upstream analysis.
    UpstreamError,
}

impl<T> XFact<T> {
    pub fn present(&self) -> Option<&T> {
        match self {
            XFact::Present(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_present(&self) -> bool {
        matches!(self, XFact::Present(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, XFact::UpstreamError)
    }
}

/// The kinds of field that may be error-valued, each with its own sentinel.
pub trait FieldKind {
    const NAME: &'static str;
    const ERROR_SENTINEL: i64;
}

macro_rules! field_kinds {
    ($($name:ident => $desc:expr),* $(,)?) => {
        $(
            #[derive(Debug, PartialEq, Eq)]
            pub enum $name {}
            impl FieldKind for $name {
                const NAME: &'static str = $desc;
                const ERROR_SENTINEL: i64 = -2;
            }
        )*
    };
}

field_kinds!(
    VarField => "variable",
    XprField => "expression",
    CommittedVarField => "committed variable",
    CommittedXprField => "committed expression",
    BaseUpdateField => "base update",
    ReturnValueField => "return value",
);

/// A raw argument, classified against the sentinel of field kind `K`.
#[derive(Debug, PartialEq, Eq)]
pub enum RawArg<K: FieldKind> {
    Index(usize),
    Error(PhantomData<K>),
    Invalid(i64),
}

impl<K: FieldKind> RawArg<K> {
    pub fn classify(raw: i64) -> Self {
        if raw == K::ERROR_SENTINEL {
            RawArg::Error(PhantomData)
        } else if raw < 0 {
            RawArg::Invalid(raw)
        } else {
            RawArg::Index(raw as usize)
        }
    }
}

/// Everything a record decodes against.
#[derive(Clone, Copy)]
pub struct DecodeContext<'a> {
    pub xd: &'a FnXprDictionary,
    pub strings: &'a dyn StringTable,
    pub types: &'a dyn TypeTable,
    /// The dataflow facts; absent for architectures without them.
    pub invariants: Option<&'a dyn InvariantStore>,
}

/// The decoded fields of a record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DecodedXData {
    pub vars: Vec<XVariable>,
    pub vars_result: Vec<XFact<XVariable>>,
    pub committed_vars: Vec<XFact<XVariable>>,
    pub xprs: Vec<XXpr>,
    pub xprs_result: Vec<XFact<XXpr>>,
    pub committed_xprs: Vec<XFact<XXpr>>,
    pub intervals: Vec<XInterval>,
    pub strings: Vec<String>,
    pub ints: Vec<i64>,
    pub types: Vec<Typ>,
    pub reaching_defs: Vec<XFact<VarInvariantFact>>,
    pub def_uses: Vec<XFact<VarInvariantFact>>,
    pub def_uses_high: Vec<XFact<VarInvariantFact>>,
    pub flag_reaching_defs: Vec<XFact<VarInvariantFact>>,
    pub base_update: Option<(XFact<XVariable>, XFact<XXpr>)>,
    pub return_value: Option<XFact<XXpr>>,
    pub call_target: Option<String>,
}

fn error_indices<T>(v: &[XFact<T>]) -> Vec<usize> {
    v.iter()
        .enumerate()
        .filter(|(_, f)| !f.is_present())
        .map(|(i, _)| i)
        .collect()
}

impl DecodedXData {
    /// True iff every result variable, result expression and committed expression is present.
    pub fn is_ok(&self) -> bool {
        self.vars_result.iter().all(XFact::is_present)
            && self.xprs_result.iter().all(XFact::is_present)
            && self.committed_xprs.iter().all(XFact::is_present)
    }

    /// Positions of the entries that are not present, in `vars_result`, `xprs_result` and
    /// `committed_xprs` respectively.
    pub fn error_positions(&self) -> (Vec<usize>, Vec<usize>, Vec<usize>) {
        (
            error_indices(&self.vars_result),
            error_indices(&self.xprs_result),
            error_indices(&self.committed_xprs),
        )
    }

    /// Result variable `n`, if present.
    pub fn var_result(&self, n: usize) -> Option<&XVariable> {
        self.vars_result.get(n).and_then(XFact::present)
    }

    /// Result expression `n`, if present.
    pub fn xpr_result(&self, n: usize) -> Option<&XXpr> {
        self.xprs_result.get(n).and_then(XFact::present)
    }

    /// The committed expression `n` if it is present and committed expressions are in use, else
    /// the result expression `n`.
    pub fn preferred_xpr(&self, n: usize) -> Option<&XXpr> {
        if CONFIG.use_committed_expressions {
            if let Some(x) = self.committed_xprs.get(n).and_then(XFact::present) {
                return Some(x);
            }
        }
        self.xpr_result(n).or_else(|| self.xprs.get(n))
    }
}

impl std::fmt::Display for DecodedXData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fn fact<T: std::fmt::Display>(x: &XFact<T>) -> String {
            match x {
                XFact::Present(v) => v.to_string(),
                XFact::Missing => "-".into(),
                XFact::UpstreamError => "error-value".into(),
            }
        }
        for (i, v) in self.vars.iter().enumerate() {
            writeln!(f, "vars[{}] = {}", i, v)?;
        }
        for (i, v) in self.vars_result.iter().enumerate() {
            writeln!(f, "vars_r[{}] = {}", i, fact(v))?;
        }
        for (i, x) in self.xprs.iter().enumerate() {
            writeln!(f, "xprs[{}] = {}", i, x)?;
        }
        for (i, x) in self.xprs_result.iter().enumerate() {
            writeln!(f, "xprs_r[{}] = {}", i, fact(x))?;
        }
        for (i, x) in self.committed_xprs.iter().enumerate() {
            writeln!(f, "cxprs[{}] = {}", i, fact(x))?;
        }
        for (i, r) in self.reaching_defs.iter().enumerate() {
            writeln!(f, "rdefs[{}] = {}", i, fact(r))?;
        }
        Ok(())
    }
}

/// One instruction's fact record, with its decode computed at most once.
#[derive(Debug)]
pub struct InstrXData {
    record: IndexedRecord,
    decoded: OnceLock<Result<DecodedXData>>,
}

impl Clone for InstrXData {
    fn clone(&self) -> Self {
        let decoded = OnceLock::new();
        if let Some(d) = self.decoded.get() {
            let _ = decoded.set(d.clone());
        }
        Self {
            record: self.record.clone(),
            decoded,
        }
    }
}

impl InstrXData {
    pub fn new(record: IndexedRecord) -> Self {
        Self {
            record,
            decoded: OnceLock::new(),
        }
    }

    pub fn record(&self) -> &IndexedRecord {
        &self.record
    }

    pub fn index(&self) -> usize {
        self.record.index
    }

    pub fn key(&self) -> &str {
        self.record.kind()
    }

    fn has_tag(&self, tag: &str) -> bool {
        self.record.tags.iter().skip(1).any(|t| t == tag)
    }

    fn second_tag(&self) -> Option<&str> {
        self.record.tags.get(1).map(|t| t.as_str())
    }

    /// Decode the record, or return the cached decode. A failed decode is cached too.
    pub fn decode(&self, cx: &DecodeContext<'_>) -> Result<&DecodedXData> {
        self.decoded
            .get_or_init(|| self.expand(cx))
            .as_ref()
            .map_err(|e| e.clone())
    }

    /// The cached decode; an error if the record was never decoded.
    pub fn decoded(&self) -> Result<&DecodedXData> {
        match self.decoded.get() {
            Some(r) => r.as_ref().map_err(|e| e.clone()),
            None => Err(Error::NotDecoded {
                index: self.record.index,
            }),
        }
    }

    pub fn is_ok(&self) -> Result<bool> {
        self.decoded().map(|d| d.is_ok())
    }

    pub fn error_positions(&self) -> Result<(Vec<usize>, Vec<usize>, Vec<usize>)> {
        self.decoded().map(|d| d.error_positions())
    }

    pub fn is_function_argument(&self) -> bool {
        self.second_tag() == Some("arg")
    }

    /// The call site of a function argument, from the third tag.
    pub fn function_argument_callsite(&self) -> Option<u64> {
        if !self.is_function_argument() {
            return None;
        }
        let s = self.record.tags.get(2)?;
        u64::from_str_radix(s.trim_start_matches("0x"), 16).ok()
    }

    /// Either an explicit `call` tag, or a lone `a:` key with one argument past its letters.
    pub fn has_call_target(&self) -> bool {
        match self.record.tags.as_slice() {
            [key] => key
                .strip_prefix("a:")
                .map_or(false, |l| self.record.args.len() == l.chars().count() + 1),
            [_, tag] => tag.as_str() == "call",
            _ => false,
        }
    }

    pub fn has_branch_conditions(&self) -> bool {
        self.second_tag() == Some("TF")
    }

    pub fn has_condition_setter(&self) -> bool {
        self.has_branch_conditions() && self.record.tags.len() == 4
    }

    /// Address of the instruction that sets the branch condition.
    pub fn condition_setter(&self) -> Option<&str> {
        if self.has_branch_conditions() {
            self.record.tags.get(2).map(|t| t.as_str())
        } else {
            None
        }
    }

    /// The true and false conditions of a branch.
    pub fn branch_conditions(&self) -> Result<Option<&[XXpr]>> {
        if self.has_branch_conditions() {
            Ok(Some(&self.decoded()?.xprs))
        } else {
            Ok(None)
        }
    }

    pub fn has_instruction_condition(&self) -> bool {
        self.has_tag("ic")
    }

    pub fn has_unknown_instruction_condition(&self) -> bool {
        self.has_tag("uc")
    }

    pub fn has_base_update(&self) -> bool {
        self.has_tag("bu")
    }

    /// Subsumed into another instruction (e.g. as part of an if-then-else idiom)
    pub fn is_subsumed(&self) -> bool {
        self.has_tag("subsumed")
    }

    pub fn has_return_value(&self) -> bool {
        self.has_tag("rv")
    }

    fn letters(&self) -> Result<Option<(bool, &str)>> {
        let key = self.key();
        if let Some(l) = key.strip_prefix("ar:") {
            Ok(Some((true, l)))
        } else if let Some(l) = key.strip_prefix("a:") {
            Ok(Some((false, l)))
        } else if key.is_empty() || key == "nop" {
            Ok(None)
        } else if key == "subsumes" {
            info!("Subsuming records are not supported; decoding as empty"; "index" => self.index());
            Ok(None)
        } else {
            Err(Error::UnsupportedKey {
                index: self.index(),
                key: key.to_string(),
            })
        }
    }

    fn fact_of<K: FieldKind, T>(
        &self,
        position: usize,
        letter: char,
        allow_error: bool,
        get: impl FnOnce(usize) -> Result<T>,
    ) -> Result<XFact<T>> {
        match RawArg::<K>::classify(self.record.args[position]) {
            RawArg::Index(ix) => Ok(XFact::Present(get(ix)?)),
            RawArg::Error(_) if allow_error => {
                trace!("Error-valued field"; "index" => self.index(), "position" => position, "kind" => K::NAME);
                Ok(XFact::UpstreamError)
            }
            RawArg::Error(_) => Err(Error::UnexpectedErrorValue {
                index: self.index(),
                position,
                letter,
            }),
            RawArg::Invalid(raw) => Err(Error::InvalidArgument {
                index: self.index(),
                position,
                raw,
            }),
        }
    }

    fn index_arg(&self, position: usize) -> Result<usize> {
        let raw = self.record.args[position];
        usize::try_from(raw).map_err(|_| Error::InvalidArgument {
            index: self.index(),
            position,
            raw,
        })
    }

    fn dataflow_fact(
        &self,
        cx: &DecodeContext<'_>,
        position: usize,
        letter: char,
    ) -> XFact<VarInvariantFact> {
        let raw = self.record.args[position];
        let present = if letter == 'h' { raw > 0 } else { raw >= 0 };
        if !present {
            return XFact::Missing;
        }
        let store = match cx.invariants {
            Some(s) => s,
            None => {
                debug!("No invariant store for dataflow fact";
                       "index" => self.index(), "letter" => %letter);
                return XFact::Missing;
            }
        };
        match store.fact(raw as usize) {
            Some(f) if f.letter() == letter => XFact::Present(f.clone()),
            Some(f) => {
                warn!("Dataflow fact of unexpected kind";
                      "index" => self.index(), "expected" => %letter, "found" => %f.letter());
                XFact::Missing
            }
            None => {
                debug!("Dataflow fact not found"; "index" => self.index(), "fact" => raw);
                XFact::Missing
            }
        }
    }

    fn expand(&self, cx: &DecodeContext<'_>) -> Result<DecodedXData> {
        let mut d = DecodedXData::default();
        let (result_form, letters) = match self.letters()? {
            Some(l) => l,
            None => return Ok(d),
        };
        let trailing = 2 * usize::from(self.has_base_update())
            + usize::from(self.has_return_value())
            + usize::from(self.has_call_target());
        let expected = letters.chars().count() + trailing;
        if self.record.args.len() != expected {
            return Err(Error::ArgumentCountMismatch {
                index: self.index(),
                key: self.key().to_string(),
                letters: expected,
                args: self.record.args.len(),
            });
        }

        let xd = cx.xd;
        for (pos, c) in letters.chars().enumerate() {
            match c {
                'v' if result_form => d
                    .vars_result
                    .push(self.fact_of::<VarField, _>(pos, c, true, |i| xd.variable(i))?),
                'v' => {
                    if let XFact::Present(v) =
                        self.fact_of::<VarField, _>(pos, c, false, |i| xd.variable(i))?
                    {
                        d.vars.push(v)
                    }
                }
                'w' => d.committed_vars.push(
                    self.fact_of::<CommittedVarField, _>(pos, c, true, |i| xd.variable(i))?,
                ),
                'x' if result_form => d
                    .xprs_result
                    .push(self.fact_of::<XprField, _>(pos, c, true, |i| xd.xpr(i))?),
                'x' | 'a' => {
                    if let XFact::Present(x) =
                        self.fact_of::<XprField, _>(pos, c, false, |i| xd.xpr(i))?
                    {
                        d.xprs.push(x)
                    }
                }
                'c' => d.committed_xprs.push(
                    self.fact_of::<CommittedXprField, _>(pos, c, true, |i| xd.xpr(i))?,
                ),
                's' => d
                    .strings
                    .push(cx.strings.string(self.index_arg(pos)?)?.to_string()),
                'i' => d.intervals.push(xd.interval(self.index_arg(pos)?)?),
                'l' => d.ints.push(self.record.args[pos]),
                't' => d.types.push(cx.types.typ(self.index_arg(pos)?)?.clone()),
                'r' => d.reaching_defs.push(self.dataflow_fact(cx, pos, c)),
                'd' => d.def_uses.push(self.dataflow_fact(cx, pos, c)),
                'h' => d.def_uses_high.push(self.dataflow_fact(cx, pos, c)),
                'f' => d.flag_reaching_defs.push(self.dataflow_fact(cx, pos, c)),
                _ => {
                    return Err(Error::UnknownKeyLetter {
                        index: self.index(),
                        key: self.key().to_string(),
                        letter: c,
                    })
                }
            }
        }

        let mut pos = letters.chars().count();
        if self.has_base_update() {
            let v = self.fact_of::<BaseUpdateField, _>(pos, 'v', true, |i| xd.variable(i))?;
            let x = self.fact_of::<BaseUpdateField, _>(pos + 1, 'x', true, |i| xd.xpr(i))?;
            d.base_update = Some((v, x));
            pos += 2;
        }
        if self.has_return_value() {
            d.return_value =
                Some(self.fact_of::<ReturnValueField, _>(pos, 'x', true, |i| xd.xpr(i))?);
            pos += 1;
        }
        if self.has_call_target() {
            d.call_target = Some(cx.strings.string(self.index_arg(pos)?)?.to_string());
        }

        if !d.committed_vars.is_empty() && d.committed_vars.len() != d.vars_result.len() {
            return Err(Error::CommittedCountMismatch {
                index: self.index(),
                family: "variables",
                committed: d.committed_vars.len(),
                results: d.vars_result.len(),
            });
        }
        if !d.committed_xprs.is_empty() && d.committed_xprs.len() != d.xprs_result.len() {
            return Err(Error::CommittedCountMismatch {
                index: self.index(),
                family: "expressions",
                committed: d.committed_xprs.len(),
                results: d.xprs_result.len(),
            });
        }

        if CONFIG.debug_print_decoded_xdata {
            debug!("Decoded xdata"; "record" => %self.record, "fields" => %d);
        }
        Ok(d)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dataflow::{VarDefUse, VarInvariantTable};
    use crate::dictionary::{Strings, Types};
    use crate::interned::TaggedArgs;

    fn record(tags: &[&str], args: Vec<i64>) -> InstrXData {
        InstrXData::new(IndexedRecord::new(
            1,
            TaggedArgs::new(tags.iter().copied(), args),
        ))
    }

    fn decode_with(
        xd: &FnXprDictionary,
        store: Option<&dyn InvariantStore>,
        r: &InstrXData,
    ) -> Result<DecodedXData> {
        let strings = Strings(vec!["memcpy".into()]);
        let types = Types(vec![]);
        let cx = DecodeContext {
            xd,
            strings: &strings,
            types: &types,
            invariants: store,
        };
        r.decode(&cx).map(|d| d.clone())
    }

    #[test]
    fn sentinel_classification_is_per_kind() {
        assert_eq!(RawArg::<VarField>::classify(3), RawArg::Index(3));
        assert_eq!(
            RawArg::<VarField>::classify(-2),
            RawArg::Error(PhantomData)
        );
        assert_eq!(RawArg::<ReturnValueField>::classify(-1), RawArg::Invalid(-1));
    }

    #[test]
    fn unknown_letters_are_fatal() {
        let xd = FnXprDictionary::new();
        let r = record(&["a:q"], vec![1]);
        assert!(matches!(
            decode_with(&xd, None, &r),
            Err(Error::UnknownKeyLetter { letter: 'q', .. })
        ));
        // The failure is cached
        assert!(r.decoded().is_err());
    }

    #[test]
    fn unsupported_keys_and_nops() {
        let xd = FnXprDictionary::new();
        assert!(matches!(
            decode_with(&xd, None, &record(&["bogus"], vec![])),
            Err(Error::UnsupportedKey { .. })
        ));
        assert_eq!(
            decode_with(&xd, None, &record(&["nop"], vec![])).unwrap(),
            DecodedXData::default()
        );
        assert_eq!(
            decode_with(&xd, None, &record(&["subsumes"], vec![1, 2])).unwrap(),
            DecodedXData::default()
        );
    }

    #[test]
    fn access_before_decode_is_an_error() {
        let r = record(&["a:l"], vec![5]);
        assert_eq!(r.decoded(), Err(Error::NotDecoded { index: 1 }));
        assert_eq!(r.is_ok(), Err(Error::NotDecoded { index: 1 }));
    }

    #[test]
    fn error_values_outside_result_form_are_rejected() {
        let xd = FnXprDictionary::new();
        let r = record(&["a:v"], vec![-2]);
        assert!(matches!(
            decode_with(&xd, None, &r),
            Err(Error::UnexpectedErrorValue { letter: 'v', .. })
        ));
        let r = record(&["ar:v"], vec![-3]);
        assert!(matches!(
            decode_with(&xd, None, &r),
            Err(Error::InvalidArgument { raw: -3, .. })
        ));
    }

    #[test]
    fn argument_counts_must_match() {
        let xd = FnXprDictionary::new();
        let r = record(&["a:ll"], vec![1]);
        assert!(matches!(
            decode_with(&xd, None, &r),
            Err(Error::ArgumentCountMismatch {
                letters: 2,
                args: 1,
                ..
            })
        ));
    }

    #[test]
    fn committed_counts_must_match_results() {
        let mut xd = FnXprDictionary::new();
        let c = xd.mk_int_xpr(1);
        let r = record(&["ar:xxc"], vec![c as i64, c as i64, c as i64]);
        assert!(matches!(
            decode_with(&xd, None, &r),
            Err(Error::CommittedCountMismatch {
                committed: 1,
                results: 2,
                ..
            })
        ));
    }

    #[test]
    fn dataflow_facts_are_only_taken_from_a_store() {
        let mut xd = FnXprDictionary::new();
        let r0 = xd.mk_register_variable("R0");
        let r0v = xd.variable(r0).unwrap();
        let mut store = VarInvariantTable::new();
        store.insert(
            1,
            VarInvariantFact::ReachingDef(VarDefUse {
                variable: r0v.clone(),
                locations: vec!["0x10".into()],
            }),
        );
        store.insert(
            2,
            VarInvariantFact::DefUse(VarDefUse {
                variable: r0v,
                locations: vec!["0x20".into()],
            }),
        );
        let rec = || record(&["a:rdhr"], vec![1, 2, 0, 2]);
        let d = decode_with(&xd, Some(&store as &dyn InvariantStore), &rec()).unwrap();
        assert!(d.reaching_defs[0].is_present());
        assert!(d.def_uses[0].is_present());
        assert_eq!(d.def_uses_high, vec![XFact::Missing]);
        // Fact 2 is a def-use, not a reaching definition
        assert_eq!(d.reaching_defs[1], XFact::Missing);

        let d = decode_with(&xd, None, &rec()).unwrap();
        assert_eq!(d.reaching_defs, vec![XFact::Missing, XFact::Missing]);
    }

    #[test]
    fn trailing_arguments() {
        let mut xd = FnXprDictionary::new();
        let r0 = xd.mk_register_variable("R0");
        let x = xd.mk_var_xpr(r0);
        let r = record(&["a:x", "call"], vec![x as i64, 1]);
        let d = decode_with(&xd, None, &r).unwrap();
        assert_eq!(d.call_target.as_deref(), Some("memcpy"));
        assert!(r.has_call_target());

        let r = record(&["a:x"], vec![x as i64, 1]);
        assert!(r.has_call_target());
        let d = decode_with(&xd, None, &r).unwrap();
        assert_eq!(d.call_target.as_deref(), Some("memcpy"));
        assert!(!record(&["a:x"], vec![x as i64]).has_call_target());
        assert!(!record(&["ar:x"], vec![x as i64, 1]).has_call_target());

        let r = record(&["ar:x", "bu", "rv"], vec![x as i64, r0 as i64, -2, x as i64]);
        let d = decode_with(&xd, None, &r).unwrap();
        let (bv, bx) = d.base_update.clone().unwrap();
        assert!(bv.is_present());
        assert!(bx.is_error());
        assert!(d.return_value.unwrap().is_present());
    }

    #[test]
    fn tag_queries() {
        let r = record(&["a:xx", "TF", "0x40", "0123abcd"], vec![1, 2]);
        assert!(r.has_branch_conditions());
        assert!(r.has_condition_setter());
        assert_eq!(r.condition_setter(), Some("0x40"));
        let r = record(&["a:x", "ic", "subsumed"], vec![1]);
        assert!(r.has_instruction_condition());
        assert!(r.is_subsumed());
        assert!(!r.has_unknown_instruction_condition());
        let r = record(&["a:x", "arg", "0x1c"], vec![1]);
        assert_eq!(r.function_argument_callsite(), Some(0x1c));
    }
}
