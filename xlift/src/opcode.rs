//! Opcode records: the per-instruction layer that turns an instruction's decoded facts into calls
//! of the lifting entry points.
//!
//! Each opcode declares how many tags and arguments its record carries, and records are checked
//! against that when they are built. The generic opcodes here read their operands from the fact
//! record as follows:
//!
//! - `assign`: the target is result variable 0 (variable 0 in the `a:` form); the value is
//!   the committed expression 0 if present, else result expression 0. Plain expression 0 is the
//!   operand as written; plain expression 1, if present, is the address being written.
//! - `call`: the optional target variable is as for `assign`; the callee is the call-target
//!   string, else string 0; arguments are the result expressions (plain ones in the `a:` form).
//! - `return`: the returned value, if any, is the `rv` fact, else expression 0 as for `assign`.
//! - `branch`: the condition is the first branch condition (`TF` records), or expression 0.
//! - `nop`: nothing.

use crate::ast::{Instr, Stmt};
use crate::diagnostics::DiagnosticKind;
use crate::error::{malformed, Error, Result};
use crate::instr_xdata::{DecodedXData, InstrXData, XFact};
use crate::lifter::{address_label, InstructionLift};
use crate::log::*;
use crate::xvalue::{XVariable, XXpr};

/// The shape an opcode's record must have.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OpcodeContract {
    pub name: &'static str,
    pub tag_count: usize,
    /// `None` for any number of arguments.
    pub arg_count: Option<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Opcode {
    Assign,
    Call,
    Return,
    Branch,
    Nop,
}

impl Opcode {
    pub fn from_mnemonic(m: &str) -> Option<Opcode> {
        match m {
            "assign" => Some(Opcode::Assign),
            "call" => Some(Opcode::Call),
            "return" => Some(Opcode::Return),
            "branch" => Some(Opcode::Branch),
            "nop" => Some(Opcode::Nop),
            _ => None,
        }
    }

    /// Tags are the mnemonic (and for branches, the condition code); arguments are operand
    /// indices (and for branches, the target address).
    pub fn contract(self) -> OpcodeContract {
        let (name, tag_count, arg_count) = match self {
            Opcode::Assign => ("assign", 1, Some(2)),
            Opcode::Call => ("call", 1, Some(1)),
            Opcode::Return => ("return", 1, Some(0)),
            Opcode::Branch => ("branch", 2, Some(1)),
            Opcode::Nop => ("nop", 1, None),
        };
        OpcodeContract {
            name,
            tag_count,
            arg_count,
        }
    }
}

/// What an opcode lifts to: instructions, or a statement of its own.
#[derive(Clone, Debug)]
pub enum LiftedInstr {
    /// `(low, high)` pairs
    Instrs(Vec<(Instr, Instr)>),
    /// `(low, high)`
    Stmt(Stmt, Stmt),
}

/// An opcode record that satisfies its opcode's contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OpcodeRecord {
    pub index: usize,
    pub opcode: Opcode,
    pub tags: Vec<String>,
    pub args: Vec<i64>,
}

impl OpcodeRecord {
    pub fn new(index: usize, tags: Vec<String>, args: Vec<i64>) -> Result<Self> {
        let mnemonic = tags.first().map(|t| t.as_str()).unwrap_or("");
        let opcode = Opcode::from_mnemonic(mnemonic).ok_or_else(|| Error::UnsupportedKey {
            index,
            key: mnemonic.to_string(),
        })?;
        let c = opcode.contract();
        let args_ok = c.arg_count.map_or(true, |n| n == args.len());
        if tags.len() != c.tag_count || !args_ok {
            return Err(Error::OpcodeContract {
                opcode: c.name.to_string(),
                expected_tags: c.tag_count,
                expected_args: c.arg_count.unwrap_or(args.len()),
                tags: tags.len(),
                args: args.len(),
            });
        }
        Ok(Self {
            index,
            opcode,
            tags,
            args,
        })
    }

    pub fn mnemonic(&self) -> &str {
        &self.tags[0]
    }

    pub fn branch_target(&self) -> Option<u64> {
        match self.opcode {
            Opcode::Branch => u64::try_from(self.args[0]).ok(),
            _ => None,
        }
    }

    /// Lift the instruction. `size` is its length in bytes.
    pub fn lift(
        &self,
        il: &mut InstructionLift<'_>,
        xdata: &InstrXData,
        size: u64,
    ) -> Result<LiftedInstr> {
        let d = xdata.decoded()?;
        if xdata.is_subsumed() {
            return Ok(self.nop(il, "subsumed", size));
        }
        if !d.is_ok() {
            let (v, x, c) = d.error_positions();
            let message = format!(
                "{}: error values at vars {:?}, xprs {:?}, committed {:?}",
                self.mnemonic(),
                v,
                x,
                c
            );
            let site = il.site();
            il.builder()
                .report(Some(site), DiagnosticKind::ErrorValuedRecord, message);
            return Ok(self.nop(il, &format!("{} (unavailable)", self.mnemonic()), size));
        }
        trace!("Lifting instruction";
               "site" => format!("{:#x}", il.site()),
               "opcode" => self.mnemonic(),
               "key" => xdata.key());
        match self.opcode {
            Opcode::Assign => {
                let lhs = target_variable(d).ok_or_else(|| {
                    malformed!("xdata", xdata.index(), "assign without a target variable")
                })?;
                let rhs = d
                    .preferred_xpr(0)
                    .ok_or_else(|| malformed!("xdata", xdata.index(), "assign without a value"))?;
                let low_rhs = d.xprs.first().unwrap_or(rhs);
                let hint = d.xprs.get(1);
                let (l, h) = il.lift_assign(lhs, low_rhs, rhs, hint);
                il.record_span(&l, &h, size);
                Ok(LiftedInstr::Instrs(vec![(l, h)]))
            }
            Opcode::Call => {
                let lhs = target_variable(d);
                let name = d.call_target.as_deref().or(d.strings.first().map(|s| s.as_str()));
                let args: Vec<XXpr> = if d.xprs_result.is_empty() {
                    d.xprs.clone()
                } else {
                    d.xprs_result
                        .iter()
                        .filter_map(XFact::present)
                        .cloned()
                        .collect()
                };
                let (l, h) = il.lift_call(lhs, name, None, &args);
                il.record_span(&l, &h, size);
                Ok(LiftedInstr::Instrs(vec![(l, h)]))
            }
            Opcode::Return => {
                let rv = d.return_value.as_ref().and_then(XFact::present);
                let value = rv.or_else(|| d.preferred_xpr(0)).map(|high| {
                    let low = d.xprs.first().unwrap_or(high);
                    (low, high)
                });
                let (l, h) = il.lift_return(value);
                Ok(LiftedInstr::Stmt(l, h))
            }
            Opcode::Branch => {
                let target = self.branch_target().ok_or_else(|| {
                    malformed!("opcode", self.index, "branch to {}", self.args[0])
                })?;
                let label = address_label(target);
                let cond = match xdata.branch_conditions()? {
                    Some(cs) => cs.first(),
                    None => d.xprs.first(),
                };
                let (l, h) = match cond {
                    Some(c) => {
                        let (lc, hc) = il.lift_condition(c, c);
                        let b = il.builder();
                        let (lt, le) = (b.mk_goto(&label), b.mk_block(vec![], vec![]));
                        let (ht, he) = (b.mk_goto(&label), b.mk_block(vec![], vec![]));
                        (
                            b.mk_branch(lc, lt, le, Some(target), vec![]),
                            b.mk_branch(hc, ht, he, Some(target), vec![]),
                        )
                    }
                    None => {
                        let b = il.builder();
                        (b.mk_goto(&label), b.mk_goto(&label))
                    }
                };
                Ok(LiftedInstr::Stmt(l, h))
            }
            Opcode::Nop => Ok(self.nop(il, self.mnemonic(), size)),
        }
    }

    fn nop(&self, il: &mut InstructionLift<'_>, description: &str, size: u64) -> LiftedInstr {
        let (l, h) = il.lift_nop(description);
        il.record_span(&l, &h, size);
        LiftedInstr::Instrs(vec![(l, h)])
    }
}

/// The variable an instruction defines, if any.
fn target_variable(d: &DecodedXData) -> Option<&XVariable> {
    d.var_result(0).or_else(|| d.vars.first())
}

#[cfg(test)]
mod test {
    use super::*;

    fn tags(ts: &[&str]) -> Vec<String> {
        ts.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn contracts_are_checked_at_construction() {
        assert!(OpcodeRecord::new(1, tags(&["assign"]), vec![1, 2]).is_ok());
        assert_eq!(
            OpcodeRecord::new(2, tags(&["assign"]), vec![1]),
            Err(Error::OpcodeContract {
                opcode: "assign".into(),
                expected_tags: 1,
                expected_args: 2,
                tags: 1,
                args: 1,
            })
        );
        assert!(OpcodeRecord::new(3, tags(&["branch"]), vec![0x40]).is_err());
        assert!(OpcodeRecord::new(4, tags(&["nop"]), vec![1, 2, 3]).is_ok());
        assert!(matches!(
            OpcodeRecord::new(5, tags(&["frobnicate"]), vec![]),
            Err(Error::UnsupportedKey { index: 5, .. })
        ));
    }

    #[test]
    fn branch_targets_come_from_the_argument() {
        let r = OpcodeRecord::new(1, tags(&["branch", "ne"]), vec![0x40]).unwrap();
        assert_eq!(r.branch_target(), Some(0x40));
        let r = OpcodeRecord::new(2, tags(&["return"]), vec![]).unwrap();
        assert_eq!(r.branch_target(), None);
    }
}
