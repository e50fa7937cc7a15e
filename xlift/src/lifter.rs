//! Lifting symbolic values to the AST.
//!
//! Every value is lifted twice: once to the low-level form that mirrors the literal register and
//! memory operations (`lower_*`), and once to the high-level form that reconstructs typed C
//! (`lift_*`). The two are linked in the provenance tables of the [`AstBuilder`].
//!
//! Lifting is total. A value that cannot be resolved becomes a placeholder node, and a diagnostic
//! is reported for the site; the lift carries on.

use std::sync::Arc;

use crate::ast::*;
use crate::builder::{AstBuilder, LiftedFunction};
use crate::constant_folding;
use crate::dataflow::{InvariantStore, VarInvariantFact, VarInvariantTable};
use crate::diagnostics::DiagnosticKind;
use crate::dictionary::{FnXprDictionary, Strings, Types};
use crate::error::{Error, Result};
use crate::instr_xdata::{DecodeContext, DecodedXData, InstrXData, XFact};
use crate::lift_config::CONFIG;
use crate::log::*;
use crate::opcode::{LiftedInstr, OpcodeRecord};
use crate::provenance::ByteSpan;
use crate::symbol_table::{GlobalSymbolTable, LocalSymbolTable, ParameterLocation};
use crate::xvalue::*;

enum AstOp {
    Unary(UnOp),
    Binary(BinOp),
}

/// The AST operator for a symbolic one, when there is a direct counterpart.
fn ast_op(op: XOp) -> Option<AstOp> {
    use AstOp::*;
    Some(match op {
        XOp::Plus => Binary(BinOp::Plus),
        XOp::Minus => Binary(BinOp::Minus),
        XOp::Mult => Binary(BinOp::Mult),
        XOp::Div => Binary(BinOp::Div),
        XOp::Mod => Binary(BinOp::Mod),
        XOp::BAnd => Binary(BinOp::BAnd),
        XOp::BOr => Binary(BinOp::BOr),
        XOp::BXor => Binary(BinOp::BXor),
        XOp::BNot => Unary(UnOp::BNot),
        XOp::LNot => Unary(UnOp::LNot),
        XOp::Neg => Unary(UnOp::Neg),
        XOp::Eq => Binary(BinOp::Eq),
        XOp::Ne => Binary(BinOp::Ne),
        XOp::Lt => Binary(BinOp::Lt),
        XOp::Le => Binary(BinOp::Le),
        XOp::Gt => Binary(BinOp::Gt),
        XOp::Ge => Binary(BinOp::Ge),
        XOp::LAnd => Binary(BinOp::LAnd),
        XOp::LOr => Binary(BinOp::LOr),
        XOp::ShiftLt | XOp::Lsl => Binary(BinOp::ShiftLt),
        XOp::ShiftRt | XOp::Lsr | XOp::Asr => Binary(BinOp::ShiftRt),
        XOp::XByte | XOp::Lsb | XOp::Lsh | XOp::Range => return None,
    })
}

/// Lifting of the values of one instruction at `site`.
///
/// The instruction's dataflow facts are handed out positionally: each call to a `lift_*` entry
/// point that consumes a fact takes the next one of its kind.
pub struct InstructionLift<'a> {
    b: &'a mut AstBuilder,
    xdata: Option<&'a DecodedXData>,
    site: u64,
    location: LocationId,
    next_rdef: usize,
    next_flag_rdef: usize,
    next_defuse: usize,
    next_defuse_high: usize,
}

impl<'a> InstructionLift<'a> {
    pub fn new(b: &'a mut AstBuilder, xdata: &'a DecodedXData, site: u64) -> Self {
        let mut r = Self::detached(b, site);
        r.xdata = Some(xdata);
        r
    }

    /// Lifting at `site` with no fact record to draw dataflow facts from.
    pub fn detached(b: &'a mut AstBuilder, site: u64) -> Self {
        let location = b.mk_location();
        Self {
            b,
            xdata: None,
            site,
            location,
            next_rdef: 0,
            next_flag_rdef: 0,
            next_defuse: 0,
            next_defuse_high: 0,
        }
    }

    pub fn builder(&mut self) -> &mut AstBuilder {
        &mut *self.b
    }

    pub fn site(&self) -> u64 {
        self.site
    }

    pub fn location(&self) -> LocationId {
        self.location
    }

    fn diagnose(&mut self, kind: DiagnosticKind, message: impl Into<String>) {
        let site = Some(self.site);
        self.b.report(site, kind, message);
    }

    fn unresolved_expr(&mut self, kind: DiagnosticKind, reason: &str) -> Expr {
        self.diagnose(kind, reason);
        self.b.mk_unresolved_expr(reason)
    }

    fn unresolved_offset(&mut self, reason: &str) -> Offset {
        self.diagnose(DiagnosticKind::UnsupportedOffset, reason);
        self.b.mk_unresolved_offset(reason)
    }

    fn next_fact(
        facts: Option<&'a [XFact<VarInvariantFact>]>,
        cursor: &mut usize,
    ) -> Option<VarInvariantFact> {
        let f = facts?.get(*cursor)?;
        *cursor += 1;
        f.present().cloned()
    }

    /// The next reaching definition of this instruction.
    pub fn take_reaching_def(&mut self) -> Option<VarInvariantFact> {
        Self::next_fact(
            self.xdata.map(|x| &x.reaching_defs[..]),
            &mut self.next_rdef,
        )
    }

    /// All reaching definitions not yet taken.
    pub fn take_remaining_reaching_defs(&mut self) -> Vec<VarInvariantFact> {
        let mut r = vec![];
        let n = self.xdata.map(|x| x.reaching_defs.len()).unwrap_or(0);
        while self.next_rdef < n {
            if let Some(f) = self.take_reaching_def() {
                r.push(f);
            }
        }
        r
    }

    pub fn take_flag_reaching_defs(&mut self) -> Vec<VarInvariantFact> {
        let mut r = vec![];
        let n = self.xdata.map(|x| x.flag_reaching_defs.len()).unwrap_or(0);
        while self.next_flag_rdef < n {
            if let Some(f) = Self::next_fact(
                self.xdata.map(|x| &x.flag_reaching_defs[..]),
                &mut self.next_flag_rdef,
            ) {
                r.push(f);
            }
        }
        r
    }

    pub fn take_def_use(&mut self) -> Option<VarInvariantFact> {
        Self::next_fact(self.xdata.map(|x| &x.def_uses[..]), &mut self.next_defuse)
    }

    pub fn take_def_use_high(&mut self) -> Option<VarInvariantFact> {
        Self::next_fact(
            self.xdata.map(|x| &x.def_uses_high[..]),
            &mut self.next_defuse_high,
        )
    }

    /// The reaching definition of `register` at this instruction, if there is one.
    fn reaching_def_of(&self, register: &str) -> Option<&'a VarInvariantFact> {
        self.xdata?
            .reaching_defs
            .iter()
            .filter_map(XFact::present)
            .find(|f| f.variable().register() == Some(register))
    }

    // ----------------------------------------------------------------------------------------
    // High-level lifting
    // ----------------------------------------------------------------------------------------

    /// Lift an expression to its high-level form. Never fails; see the module documentation.
    pub fn lift_expr(&mut self, x: &XXpr) -> Expr {
        let x = x.simplify();
        self.lift_simplified(&x)
    }

    fn lift_simplified(&mut self, x: &XXpr) -> Expr {
        match x {
            XXpr::Constant(c) => self.lift_constant(c),
            XXpr::Var(v) => self.lift_var_expr(v),
            XXpr::Compound(op, args) => self.lift_compound(*op, args, x),
        }
    }

    fn lift_constant(&mut self, c: &XConstant) -> Expr {
        match c {
            XConstant::Int { value, width } => {
                let ikind = match width {
                    Width::W32 => IKind::Int,
                    Width::W64 => IKind::LongLong,
                };
                self.b.mk_integer_constant(*value, ikind)
            }
            XConstant::GlobalAddress(a) => self.lift_global_address(*a),
        }
    }

    /// `&g`, `&g.f` or `&g[i]` for an address inside a known global; otherwise the plain number.
    fn lift_global_address(&mut self, a: u64) -> Expr {
        let globals = self.b.globals();
        match globals.global_containing(a) {
            Some((g, 0)) => {
                let lv = self.b.mk_vinfo_lval(g, Offset::None);
                let addr = self.b.mk_address_of(lv);
                self.b.mk_global_address_constant(a as i64, addr)
            }
            Some((g, off)) => {
                let offset = match g.vtype().cloned() {
                    Some(t) => self.typed_offset(&t, off, &MemoryOffset::None),
                    None => self.unresolved_offset("offset into a global without a type"),
                };
                let lv = self.b.mk_vinfo_lval(g, offset);
                let addr = self.b.mk_address_of(lv);
                self.b.mk_global_address_constant(a as i64, addr)
            }
            None => self.b.mk_integer_constant(a as i64, IKind::UInt),
        }
    }

    /// Lift a use of a variable.
    fn lift_var_expr(&mut self, v: &XVariable) -> Expr {
        if v.is_tmp() {
            let t = self.b.tmp_vinfo(&v.name, None);
            return self.b.mk_vinfo_lval_expr(t);
        }
        match &v.denotation {
            Some(VarDenotation::Register(r)) => {
                let vi = self.register_use(r);
                self.b.mk_vinfo_lval_expr(vi)
            }
            Some(VarDenotation::Flag(f)) => {
                let vi = self.b.symbols.flag_vinfo(f);
                self.b.mk_vinfo_lval_expr(vi)
            }
            Some(VarDenotation::Memory { .. }) => {
                let lv = self.lift_lval(v, None);
                self.b.mk_lval_expr(lv)
            }
            Some(VarDenotation::Auxiliary(cvv)) => self.lift_constant_value_variable(v, cvv),
            None => self.unresolved_expr(
                DiagnosticKind::UnresolvedValue,
                &format!("variable {} has no denotation", v.name),
            ),
        }
    }

    /// The variable that a use of `register` reads: the SSA variable of its single reaching
    /// definition, or the register itself.
    fn register_use(&mut self, register: &str) -> Arc<VarInfo> {
        if CONFIG.resolve_register_uses_via_reaching_defs {
            if let Some(rd) = self.reaching_def_of(register) {
                if let [def] = rd.vardefuse().addresses().as_slice() {
                    if let Some(v) = self.b.symbols.ssa_vinfo_at(register, *def) {
                        return v;
                    }
                }
            }
        }
        self.b.symbols.register_vinfo(register)
    }

    fn lift_constant_value_variable(&mut self, v: &XVariable, cvv: &ConstantValueVariable) -> Expr {
        match cvv {
            ConstantValueVariable::InitialRegisterValue { register, .. } => {
                if CONFIG.is_stack_pointer(register) {
                    let sv = self.b.symbols.stack_vinfo(0, None);
                    let lv = self.b.mk_vinfo_lval(sv, Offset::None);
                    return self.b.mk_address_of(lv);
                }
                let loc = ParameterLocation::Register(register.clone());
                match self.b.symbols.formal_at(&loc) {
                    Some(formal) => self.b.mk_vinfo_lval_expr(formal),
                    None => {
                        let name = format!("{}_in", register);
                        let vi = self.b.symbols.add_symbol(
                            VarInfo::new(&name, None)
                                .with_description(&format!("initial value of {}", register)),
                        );
                        self.b.mk_vinfo_lval_expr(vi)
                    }
                }
            }
            ConstantValueVariable::InitialMemoryValue(mv) => {
                if let Some(off) = mv.stack_offset().filter(|o| *o >= 0) {
                    if let Some(formal) = self.b.symbols.formal_at(&ParameterLocation::Stack(off))
                    {
                        return self.b.mk_vinfo_lval_expr(formal);
                    }
                }
                let lv = self.lift_lval(mv, None);
                self.b.mk_lval_expr(lv)
            }
            ConstantValueVariable::FunctionReturnValue { callsite, target } => {
                let candidates = self.b.symbols.ssa_vinfos_at_site(*callsite);
                match &candidates[..] {
                    [one] => self.b.mk_vinfo_lval_expr(one.clone()),
                    [] => {
                        let name = format!("rtn_{:x}", callsite);
                        let desc = match target {
                            Some(t) => format!("return value of {}", t),
                            None => "return value".to_string(),
                        };
                        let vi = self
                            .b
                            .symbols
                            .add_symbol(VarInfo::new(&name, None).with_description(&desc));
                        self.b.mk_vinfo_lval_expr(vi)
                    }
                    many => {
                        let reason = format!(
                            "{}: {} SSA variables at call site {:#x}",
                            v.name,
                            many.len(),
                            callsite
                        );
                        self.unresolved_expr(DiagnosticKind::AmbiguousSsa, &reason)
                    }
                }
            }
            ConstantValueVariable::SymbolicExprValue { xpr, .. } => self.lift_expr(xpr),
        }
    }

    fn lift_compound(&mut self, op: XOp, args: &[XXpr], whole: &XXpr) -> Expr {
        if let Some(off) = whole.stack_address_offset() {
            let sv = self.b.symbols.stack_vinfo(off, None);
            let lv = self.b.mk_vinfo_lval(sv, Offset::None);
            return self.b.mk_address_of(lv);
        }
        if op.is_unary() != (args.len() == 1) || (!op.is_unary() && args.len() != 2) {
            return self.unresolved_expr(
                DiagnosticKind::UnresolvedValue,
                &format!("{} with {} operands", op.name(), args.len()),
            );
        }
        match op {
            XOp::Plus | XOp::Minus => {
                if let Some(e) = self.lift_pointer_arithmetic(op, &args[0], &args[1]) {
                    return e;
                }
            }
            XOp::Lsr | XOp::Asr => {
                let a = self.lift_simplified(&args[0]);
                let b = self.lift_simplified(&args[1]);
                let ikind = a
                    .ctype(&self.b.globals())
                    .and_then(|t| match t {
                        Typ::Int(k) => Some(k),
                        _ => None,
                    })
                    .unwrap_or(IKind::Int);
                let a = self
                    .b
                    .mk_cast(Typ::Int(ikind.with_signedness(op == XOp::Asr)), a);
                return self.b.mk_binary(BinOp::ShiftRt, a, b);
            }
            XOp::XByte => {
                // xbyte(n, e) is (e >> 8n) & 0xff
                let bits = match args[0].int_value() {
                    Some(n) => n.checked_mul(8),
                    None => {
                        return self
                            .unresolved_expr(DiagnosticKind::UnresolvedValue, "xbyte of a variable byte")
                    }
                };
                let bits = match bits {
                    Some(bits) => bits,
                    None => {
                        return self
                            .unresolved_expr(DiagnosticKind::UnresolvedValue, "xbyte index out of range")
                    }
                };
                let e = self.lift_simplified(&args[1]);
                let sh = self.b.mk_int_constant(bits);
                let shifted = self.b.mk_binary(BinOp::ShiftRt, e, sh);
                let mask = self.b.mk_int_constant(0xff);
                return self.b.mk_binary(BinOp::BAnd, shifted, mask);
            }
            XOp::Lsb | XOp::Lsh => {
                let e = self.lift_simplified(&args[0]);
                let mask = self
                    .b
                    .mk_int_constant(if op == XOp::Lsb { 0xff } else { 0xffff });
                return self.b.mk_binary(BinOp::BAnd, e, mask);
            }
            XOp::Range => {
                return self.unresolved_expr(DiagnosticKind::UnresolvedValue, "range expression")
            }
            _ => {}
        }
        self.lift_structural(op, args)
    }

    fn lift_structural(&mut self, op: XOp, args: &[XXpr]) -> Expr {
        let lifted: Vec<Expr> = args.iter().map(|a| self.lift_simplified(a)).collect();
        self.combine(op, lifted)
    }

    fn combine(&mut self, op: XOp, mut args: Vec<Expr>) -> Expr {
        match (ast_op(op), args.len()) {
            (Some(AstOp::Unary(u)), 1) => {
                let a = args.remove(0);
                self.b.mk_unary(u, a)
            }
            (Some(AstOp::Binary(bop)), 2) => {
                let b = args.remove(1);
                let a = args.remove(0);
                self.b.mk_binary(bop, a, b)
            }
            _ => self.unresolved_expr(
                DiagnosticKind::UnresolvedValue,
                &format!("no operator for {} with {} operands", op.name(), args.len()),
            ),
        }
    }

    /// `p + c` where `p` is a pointer: `&p->field` when `c` is the offset of a field of the
    /// composite `p` points to, else pointer arithmetic in units of the pointee. `None` if `p`
    /// is not known to be a pointer.
    fn lift_pointer_arithmetic(&mut self, op: XOp, base: &XXpr, addend: &XXpr) -> Option<Expr> {
        let c = addend.int_value()?;
        let globals = self.b.globals();
        let p = self.lift_simplified(base);
        let pointee = match p.ctype(&globals).map(|t| globals.resolve_typedef(&t)) {
            Some(Typ::Ptr(t)) => globals.resolve_typedef(&t),
            _ => {
                let c = self.b.mk_int_constant(c);
                let bop = if op == XOp::Plus { BinOp::Plus } else { BinOp::Minus };
                return Some(self.b.mk_binary(bop, p, c));
            }
        };
        let bytes = if op == XOp::Minus { c.wrapping_neg() } else { c };
        if CONFIG.recover_struct_fields_from_pointer_arithmetic {
            if let Some(ckey) = pointee.comp_key() {
                let field = globals.compinfo(ckey).and_then(|ci| {
                    ci.field_at_offset(bytes)
                        .filter(|(_, rest)| *rest == 0)
                        .map(|(f, _)| f.name.clone())
                });
                if let Some(name) = field {
                    let off = self.b.mk_field_offset(&name, ckey, Offset::None);
                    let lv = self.b.mk_memref_lval(p, off);
                    return Some(self.b.mk_address_of(lv));
                }
            }
        }
        let bop = if op == XOp::Plus { BinOp::Plus } else { BinOp::Minus };
        let size = globals.byte_size(&pointee).filter(|s| *s > 0);
        let units = match size {
            Some(s) if CONFIG.scale_pointer_arithmetic && c % s as i64 == 0 => c / s as i64,
            Some(1) | None => c,
            Some(_) => {
                // Not a whole number of elements: do the arithmetic on bytes
                let bytep = self.b.mk_cast(Typ::ptr(Typ::Int(IKind::UChar)), p);
                let c = self.b.mk_int_constant(c);
                return Some(self.b.mk_binary(bop, bytep, c));
            }
        };
        let c = self.b.mk_int_constant(units);
        Some(self.b.mk_binary(bop, p, c))
    }

    /// Lift a variable to a high-level lvalue. `hint` is an address expression for the memory the
    /// variable denotes, used when the variable's own base is unknown.
    pub fn lift_lval(&mut self, v: &XVariable, hint: Option<&XXpr>) -> Lval {
        if v.is_tmp() {
            let t = self.b.tmp_vinfo(&v.name, None);
            return self.b.mk_vinfo_lval(t, Offset::None);
        }
        match &v.denotation {
            Some(VarDenotation::Register(r)) => {
                let vi = self.b.symbols.register_vinfo(r);
                self.b.mk_vinfo_lval(vi, Offset::None)
            }
            Some(VarDenotation::Flag(f)) => {
                let vi = self.b.symbols.flag_vinfo(f);
                self.b.mk_vinfo_lval(vi, Offset::None)
            }
            Some(VarDenotation::Memory { base, offset, .. }) => {
                self.lift_memory_lval(v, base, offset, hint)
            }
            Some(VarDenotation::Auxiliary(_)) | None => {
                self.fallback_lval(hint, &format!("{} is not a location", v.name))
            }
        }
    }

    /// Lift the target of a definition of `v` at this site. Registers get their SSA variable for
    /// the site.
    pub fn lift_def_lval(&mut self, v: &XVariable, t: Option<Typ>, hint: Option<&XXpr>) -> Lval {
        match v.register() {
            Some(r) if CONFIG.introduce_ssa_registers && !CONFIG.is_stack_pointer(r) => {
                let (vi, _) = self.b.symbols.ssa_vinfo(r, self.site, t);
                self.b.mk_vinfo_lval(vi, Offset::None)
            }
            _ => self.lift_lval(v, hint),
        }
    }

    /// `*hint` if there is a hint, else a placeholder dereference.
    fn fallback_lval(&mut self, hint: Option<&XXpr>, reason: &str) -> Lval {
        let address = match hint {
            Some(h) => {
                debug!("Lifting through address hint"; "site" => format!("{:#x}", self.site), "reason" => reason);
                self.lift_expr(h)
            }
            None => self.unresolved_expr(DiagnosticKind::UnresolvedValue, reason),
        };
        self.b.mk_memref_lval(address, Offset::None)
    }

    fn lift_memory_lval(
        &mut self,
        v: &XVariable,
        base: &MemoryBase,
        offset: &MemoryOffset,
        hint: Option<&XXpr>,
    ) -> Lval {
        match base {
            MemoryBase::LocalStackFrame => match offset {
                MemoryOffset::None => {
                    let sv = self.b.symbols.stack_vinfo(0, None);
                    self.b.mk_vinfo_lval(sv, Offset::None)
                }
                MemoryOffset::Constant { value, sub } => {
                    let sv = self.b.symbols.stack_vinfo(*value, None);
                    let off = self.lift_offset(sub, sv.vtype());
                    self.b.mk_vinfo_lval(sv, off)
                }
                _ => self.fallback_lval(hint, &format!("stack variable {} with a variable offset", v.name)),
            },
            MemoryBase::AllocatedStackFrame | MemoryBase::RealignedStackFrame => {
                self.fallback_lval(hint, &format!("{}: memory in an allocated or realigned frame", v.name))
            }
            MemoryBase::Global => match offset {
                MemoryOffset::Constant { value, sub } => self.lift_global_lval(*value as u64, sub),
                _ => self.fallback_lval(hint, &format!("global {} without an address", v.name)),
            },
            MemoryBase::BaseVar(bv) => {
                let p = self.lift_var_expr(bv);
                self.lift_deref(p, offset)
            }
            MemoryBase::Unknown(d) => self.fallback_lval(hint, &format!("unknown memory base {}", d)),
        }
    }

    fn lift_global_lval(&mut self, address: u64, sub: &MemoryOffset) -> Lval {
        let globals = self.b.globals();
        let (g, off) = match globals.global_containing(address) {
            Some(found) => found,
            None => {
                let g = globals.add_global(
                    VarInfo::new(&format!("gv_{:x}", address), None).with_global_address(address),
                );
                (g, 0)
            }
        };
        let offset = match (g.vtype().cloned(), off) {
            (Some(t), off) => self.typed_offset(&t, off, sub),
            (None, 0) => self.lift_offset(sub, None),
            (None, _) => self.unresolved_offset("offset into a global without a type"),
        };
        self.b.mk_vinfo_lval(g, offset)
    }

    /// `*(p + offset)` as an lvalue, navigating `offset` through the type that `p` points to.
    fn lift_deref(&mut self, p: Expr, offset: &MemoryOffset) -> Lval {
        let globals = self.b.globals();
        let pointee = p
            .ctype(&globals)
            .map(|t| globals.resolve_typedef(&t))
            .and_then(|t| t.pointee().cloned());
        match offset {
            MemoryOffset::Constant { value, sub } => match &pointee {
                Some(t) if t.comp_key().is_some() && CONFIG.recover_struct_fields_from_pointer_arithmetic => {
                    let off = self.typed_offset(t, *value, sub);
                    self.b.mk_memref_lval(p, off)
                }
                _ if *value == 0 => {
                    let off = self.lift_offset(sub, pointee.as_ref());
                    self.b.mk_memref_lval(p, off)
                }
                _ => {
                    let c = self.b.mk_int_constant(*value);
                    let addr = self.b.mk_binary(BinOp::Plus, p, c);
                    let off = self.lift_offset(sub, None);
                    self.b.mk_memref_lval(addr, off)
                }
            },
            MemoryOffset::ArrayIndex { index, sub } => {
                let i = self.lift_expr(index);
                let addr = self.b.mk_binary(BinOp::Plus, p, i);
                let off = self.lift_offset(sub, pointee.as_ref());
                self.b.mk_memref_lval(addr, off)
            }
            MemoryOffset::IndexVar { var, elsize, sub } => {
                let i = self.lift_var_expr(var);
                let scaled = match pointee.as_ref().and_then(|t| globals.byte_size(t)) {
                    Some(s) if s == *elsize => i,
                    _ => {
                        let e = self.b.mk_int_constant(*elsize as i64);
                        self.b.mk_binary(BinOp::Mult, i, e)
                    }
                };
                let addr = self.b.mk_binary(BinOp::Plus, p, scaled);
                let off = self.lift_offset(sub, pointee.as_ref());
                self.b.mk_memref_lval(addr, off)
            }
            _ => {
                let off = self.lift_offset(offset, pointee.as_ref());
                self.b.mk_memref_lval(p, off)
            }
        }
    }

    /// Lift a memory offset. `host` is the type of the memory the offset applies to, if known.
    /// Never fails: offsets that cannot be navigated become a diagnosed placeholder.
    pub fn lift_offset(&mut self, o: &MemoryOffset, host: Option<&Typ>) -> Offset {
        let globals = self.b.globals();
        let host = host.map(|t| globals.resolve_typedef(t));
        match o {
            MemoryOffset::None => Offset::None,
            MemoryOffset::Constant { value, sub } => match &host {
                Some(t) => self.typed_offset(t, *value, sub),
                None if *value == 0 => self.lift_offset(sub, None),
                None => self.unresolved_offset(&format!("constant offset {} into untyped memory", value)),
            },
            MemoryOffset::Field { name, ckey, sub } => {
                let ftype = globals
                    .compinfo(*ckey)
                    .and_then(|c| c.field(name).map(|f| f.ftype.clone()));
                let sub = self.lift_offset(sub, ftype.as_ref());
                self.b.mk_field_offset(name, *ckey, sub)
            }
            MemoryOffset::ArrayIndex { index, sub } => {
                let i = self.lift_expr(index);
                let elem = host.as_ref().and_then(|t| t.array_element()).cloned();
                let sub = self.lift_offset(sub, elem.as_ref());
                self.b.mk_index_offset(i, sub)
            }
            MemoryOffset::IndexVar { var, elsize, sub } => {
                let elem = host.as_ref().and_then(|t| t.array_element()).cloned();
                if let Some(s) = elem.as_ref().and_then(|t| globals.byte_size(t)) {
                    if s != *elsize {
                        return self.unresolved_offset(&format!(
                            "index scaled by {} into elements of size {}",
                            elsize, s
                        ));
                    }
                }
                let i = self.lift_var_expr(var);
                let sub = self.lift_offset(sub, elem.as_ref());
                self.b.mk_index_offset(i, sub)
            }
            MemoryOffset::Unknown => self.unresolved_offset("unknown offset"),
        }
    }

    /// Navigate `bytes` into a value of type `host`, then `sub` from wherever that lands.
    fn typed_offset(&mut self, host: &Typ, bytes: i64, sub: &MemoryOffset) -> Offset {
        let globals = self.b.globals();
        match globals.resolve_typedef(host) {
            Typ::Comp { name, ckey } => {
                let ci = match globals.compinfo(ckey) {
                    Some(ci) => ci,
                    None => return self.unresolved_offset(&format!("no definition of {}", name)),
                };
                if !ci.has_field_offsets() {
                    return self
                        .unresolved_offset(&format!("{} has no complete field layout", ci.name));
                }
                let (field, rest) = match ci.field_at_offset(bytes) {
                    Some((f, rest)) => (f.clone(), rest),
                    None => {
                        return self
                            .unresolved_offset(&format!("no field of {} at offset {}", ci.name, bytes))
                    }
                };
                let inner = if rest == 0 {
                    self.lift_offset(sub, Some(&field.ftype))
                } else {
                    self.field_rest_offset(&field, rest, sub)
                };
                self.b.mk_field_offset(&field.name, ckey, inner)
            }
            t @ Typ::Array(..) => {
                let elem = t.array_element().cloned().unwrap_or(Typ::Void);
                match globals.byte_size(&elem).filter(|s| *s > 0) {
                    Some(s) => {
                        let (i, rest) = (bytes.div_euclid(s as i64), bytes.rem_euclid(s as i64));
                        let inner = if rest == 0 {
                            self.lift_offset(sub, Some(&elem))
                        } else {
                            self.typed_offset(&elem, rest, sub)
                        };
                        let i = self.b.mk_int_constant(i);
                        self.b.mk_index_offset(i, inner)
                    }
                    None => self.unresolved_offset("array of elements of unknown size"),
                }
            }
            t if bytes == 0 => self.lift_offset(sub, Some(&t)),
            _ => self.unresolved_offset(&format!("offset {} into a scalar", bytes)),
        }
    }

    /// The offset inside `field` for a nonzero `rest`: one more level of composite field, or an
    /// array element. Anything left over after that is not supported.
    fn field_rest_offset(&mut self, field: &FieldInfo, rest: i64, sub: &MemoryOffset) -> Offset {
        let globals = self.b.globals();
        match globals.resolve_typedef(&field.ftype) {
            Typ::Comp { ckey, .. } => {
                let inner = globals
                    .compinfo(ckey)
                    .and_then(|ci| ci.field_at_offset(rest).map(|(f, r)| (f.clone(), r)));
                match inner {
                    Some((f, 0)) => {
                        let s = self.lift_offset(sub, Some(&f.ftype));
                        self.b.mk_field_offset(&f.name, ckey, s)
                    }
                    Some((f, r)) => self.unresolved_offset(&format!(
                        "residual offset {} into {}.{}",
                        r, field.name, f.name
                    )),
                    None => self.unresolved_offset(&format!(
                        "no field at offset {} in {}",
                        rest, field.name
                    )),
                }
            }
            t @ Typ::Array(..) => self.typed_offset(&t, rest, sub),
            _ => self.unresolved_offset(&format!(
                "residual offset {} into scalar field {}",
                rest, field.name
            )),
        }
    }

    // ----------------------------------------------------------------------------------------
    // Low-level lifting
    // ----------------------------------------------------------------------------------------

    /// Lift an expression to its low-level form: registers and memory as they are, no types.
    pub fn lower_expr(&mut self, x: &XXpr) -> Expr {
        match x {
            XXpr::Constant(c) => self.b.mk_integer_constant(c.value(), IKind::Int),
            XXpr::Var(v) => self.lower_var_expr(v),
            XXpr::Compound(op, args) => match op {
                XOp::XByte | XOp::Lsb | XOp::Lsh | XOp::Range => self.lift_compound(*op, args, x),
                _ => {
                    let lowered: Vec<Expr> = args.iter().map(|a| self.lower_expr(a)).collect();
                    self.combine(*op, lowered)
                }
            },
        }
    }

    fn lower_var_expr(&mut self, v: &XVariable) -> Expr {
        match v.auxvar() {
            Some(ConstantValueVariable::InitialRegisterValue { register, .. }) => {
                let name = format!("{}_in", register);
                let vi = self.b.symbols.add_symbol(
                    VarInfo::new(&name, None).with_description(&format!("initial value of {}", register)),
                );
                self.b.mk_vinfo_lval_expr(vi)
            }
            Some(ConstantValueVariable::InitialMemoryValue(mv)) => {
                let lv = self.lower_lval(mv);
                self.b.mk_lval_expr(lv)
            }
            Some(ConstantValueVariable::FunctionReturnValue { callsite, .. }) => {
                let name = format!("rtn_{:x}", callsite);
                let vi = self
                    .b
                    .symbols
                    .add_symbol(VarInfo::new(&name, None).with_description("return value"));
                self.b.mk_vinfo_lval_expr(vi)
            }
            Some(ConstantValueVariable::SymbolicExprValue { xpr, .. }) => self.lower_expr(xpr),
            None => {
                let lv = self.lower_lval(v);
                self.b.mk_lval_expr(lv)
            }
        }
    }

    /// Lift a variable to its low-level lvalue.
    pub fn lower_lval(&mut self, v: &XVariable) -> Lval {
        if v.is_tmp() {
            let t = self.b.tmp_vinfo(&v.name, None);
            return self.b.mk_vinfo_lval(t, Offset::None);
        }
        match &v.denotation {
            Some(VarDenotation::Register(r)) => {
                let vi = self.b.symbols.register_vinfo(r);
                self.b.mk_vinfo_lval(vi, Offset::None)
            }
            Some(VarDenotation::Flag(f)) => {
                let vi = self.b.symbols.flag_vinfo(f);
                self.b.mk_vinfo_lval(vi, Offset::None)
            }
            Some(VarDenotation::Memory {
                base: MemoryBase::BaseVar(bv),
                offset,
                ..
            }) => {
                let p = self.lower_var_expr(bv);
                let addr = match offset.constant_value() {
                    Some(0) => p,
                    Some(c) => {
                        let c = self.b.mk_int_constant(c);
                        self.b.mk_binary(BinOp::Plus, p, c)
                    }
                    None => {
                        let reason = format!("non-constant offset of {}", v.name);
                        let u = self.unresolved_expr(DiagnosticKind::UnsupportedOffset, &reason);
                        self.b.mk_binary(BinOp::Plus, p, u)
                    }
                };
                self.b.mk_memref_lval(addr, Offset::None)
            }
            Some(VarDenotation::Memory { .. }) => {
                if let Some(a) = v.global_address() {
                    let g = self
                        .b
                        .globals()
                        .global_at(a)
                        .unwrap_or_else(|| {
                            self.b.globals().add_global(
                                VarInfo::new(&format!("gv_{:x}", a), None).with_global_address(a),
                            )
                        });
                    self.b.mk_vinfo_lval(g, Offset::None)
                } else if let Some(off) = v.stack_offset() {
                    let sv = self.b.symbols.stack_vinfo(off, None);
                    self.b.mk_vinfo_lval(sv, Offset::None)
                } else {
                    // The high-level lift of the same variable reports it
                    let u = self.b.mk_unresolved_expr(format!("location of {}", v.name));
                    self.b.mk_memref_lval(u, Offset::None)
                }
            }
            Some(VarDenotation::Auxiliary(_)) | None => self.fallback_lval(None, &format!("{} is not a location", v.name)),
        }
    }

    // ----------------------------------------------------------------------------------------
    // Instructions
    // ----------------------------------------------------------------------------------------

    fn record_instr_pair(&mut self, low: &Instr, high: &Instr) {
        let site = self.site;
        self.b.add_instr_mapping(low, high, Some(site));
        self.b.provenance.add_instr_addresses(low, vec![site]);
        self.b.provenance.add_instr_addresses(high, vec![site]);
    }

    /// Record the span of the instruction's bytes for both forms.
    pub fn record_span(&mut self, low: &Instr, high: &Instr, size: u64) {
        let span = ByteSpan {
            address: self.site,
            size,
        };
        self.b.provenance.add_instr_span(low, span);
        self.b.provenance.add_instr_span(high, span);
    }

    /// The low- and high-level right-hand sides of a value, linked and annotated with `rdefs`.
    fn lift_rhs(&mut self, low: &XXpr, high: &XXpr, rdefs: Vec<VarInvariantFact>) -> (Expr, Expr) {
        let ll = self.lower_expr(low);
        let hl = self.lift_expr(high);
        let site = Some(self.site);
        self.b.add_expr_mapping(&ll, &hl, site);
        self.b.provenance.add_expr_reaching_defs(&ll, rdefs.clone());
        self.b.provenance.add_expr_reaching_defs(&hl, rdefs);
        (ll, hl)
    }

    /// The low- and high-level targets of a definition, linked and annotated with the next
    /// def-use facts.
    fn lift_lhs(&mut self, v: &XVariable, t: Option<Typ>, hint: Option<&XXpr>) -> (Lval, Lval) {
        let ll = self.lower_lval(v);
        let hl = self.lift_def_lval(v, t, hint);
        let site = Some(self.site);
        self.b.add_lval_mapping(&ll, &hl, site);
        let du = self.take_def_use();
        let duh = self.take_def_use_high();
        self.b.provenance.add_lval_defuses(&ll, du.clone());
        self.b.provenance.add_lval_defuses(&hl, du);
        self.b.provenance.add_lval_defuses_high(&hl, duh);
        if matches!(hl.lhost, Lhost::Mem(_)) {
            self.b.provenance.add_lval_store(&hl);
        }
        (ll, hl)
    }

    /// Record the folded value of `rhs` as the value of the SSA variable that `lhs` defines here.
    fn record_ssa_constant(&mut self, lhs: &XVariable, rhs: &XXpr) {
        if !CONFIG.record_ssa_constants {
            return;
        }
        let vi = match lhs
            .register()
            .and_then(|r| self.b.symbols.ssa_vinfo_at(r, self.site))
        {
            Some(vi) => vi,
            None => return,
        };
        if let Some(c) = constant_folding::fold(&rhs.simplify()) {
            let value = match vi.vtype() {
                Some(Typ::Int(k)) if k.size() < 8 => {
                    constant_folding::widen(c.value(), 8 * k.size() as u32, k.is_signed())
                }
                _ => c.value(),
            };
            let e = self.b.mk_int_constant(value);
            trace!("Recorded SSA constant"; "var" => &vi.name, "value" => value);
            self.b.symbols.set_ssa_value(&vi.name, e);
        }
    }

    /// `lhs = rhs`. `low_rhs` is the operand as written, `rhs` the value it has.
    pub fn lift_assign(
        &mut self,
        lhs: &XVariable,
        low_rhs: &XXpr,
        rhs: &XXpr,
        hint: Option<&XXpr>,
    ) -> (Instr, Instr) {
        let rdefs = self.take_remaining_reaching_defs();
        let (ll_rhs, hl_rhs) = self.lift_rhs(low_rhs, rhs, rdefs);
        let t = hl_rhs.ctype(&self.b.globals());
        let (ll_lhs, hl_lhs) = self.lift_lhs(lhs, t, hint);
        self.record_ssa_constant(lhs, rhs);
        let ll = self.b.mk_assign(ll_lhs, ll_rhs, self.location);
        let hl = self.b.mk_assign(hl_lhs, hl_rhs, self.location);
        self.record_instr_pair(&ll, &hl);
        (ll, hl)
    }

    /// The function called by name, as a global.
    fn function_expr(&mut self, name: &str) -> Expr {
        let vi = match self.b.symbols.symbol(name) {
            Some(v) => v,
            None => self.b.globals().add_global(VarInfo::new(
                name,
                Some(Typ::Fun {
                    ret: Box::new(Typ::Int(IKind::Int)),
                    args: None,
                    varargs: false,
                }),
            )),
        };
        self.b.mk_vinfo_lval_expr(vi)
    }

    /// `lhs = target(args)`. The target is a function name when known, else the target
    /// expression.
    pub fn lift_call(
        &mut self,
        lhs: Option<&XVariable>,
        target_name: Option<&str>,
        target: Option<&XXpr>,
        args: &[XXpr],
    ) -> (Instr, Instr) {
        let (ll_target, hl_target) = match (target_name, target) {
            (Some(n), _) => (self.function_expr(n), self.function_expr(n)),
            (None, Some(t)) => (self.lower_expr(t), self.lift_expr(t)),
            (None, None) => {
                let u = self.unresolved_expr(DiagnosticKind::UnresolvedValue, "call without target");
                (u, self.b.mk_unresolved_expr("call without target"))
            }
        };
        let mut ll_args = vec![];
        let mut hl_args = vec![];
        // One reaching definition per argument, in order
        for a in args {
            let rdefs = self.take_reaching_def().into_iter().collect();
            let (l, h) = self.lift_rhs(a, a, rdefs);
            ll_args.push(l);
            hl_args.push(h);
        }
        let (ll_lhs, hl_lhs) = match lhs {
            Some(v) => {
                let (l, h) = self.lift_lhs(v, None, None);
                (Some(l), Some(h))
            }
            None => (None, None),
        };
        let ll = self.b.mk_call(ll_lhs, ll_target, ll_args, self.location);
        let hl = self.b.mk_call(hl_lhs, hl_target, hl_args, self.location);
        self.record_instr_pair(&ll, &hl);
        (ll, hl)
    }

    /// A return statement, of the value `v` if the function returns one.
    pub fn lift_return(&mut self, v: Option<(&XXpr, &XXpr)>) -> (Stmt, Stmt) {
        let (ll, hl) = match v {
            Some((low, high)) => {
                let rdefs = self.take_remaining_reaching_defs();
                let (l, h) = self.lift_rhs(low, high, rdefs);
                (Some(l), Some(h))
            }
            None => (None, None),
        };
        (self.b.mk_return(ll, vec![]), self.b.mk_return(hl, vec![]))
    }

    /// A branch condition, with the addresses it originates from and the flag definitions that
    /// reach it.
    pub fn lift_condition(&mut self, low: &XXpr, high: &XXpr) -> (Expr, Expr) {
        let ll = self.lower_expr(low);
        let hl = self.lift_expr(high);
        let site = Some(self.site);
        self.b.add_expr_mapping(&ll, &hl, site);
        let frdefs = self.take_flag_reaching_defs();
        self.b.provenance.add_flag_expr_reaching_defs(&ll, frdefs.clone());
        self.b.provenance.add_flag_expr_reaching_defs(&hl, frdefs);
        self.b.provenance.add_condition_addresses(&ll, vec![self.site]);
        self.b.provenance.add_condition_addresses(&hl, vec![self.site]);
        (ll, hl)
    }

    /// A nop in both forms, saying what was dropped.
    pub fn lift_nop(&mut self, description: &str) -> (Instr, Instr) {
        let ll = self.b.mk_nop(description, self.location);
        let hl = self.b.mk_nop(description, self.location);
        self.record_instr_pair(&ll, &hl);
        (ll, hl)
    }
}

impl AstBuilder {
    /// Lift `x` at `site` to a high-level expression, outside of any instruction's facts.
    pub fn lift_expr(&mut self, x: &XXpr, site: u64) -> Expr {
        InstructionLift::detached(self, site).lift_expr(x)
    }

    /// Lift `v` at `site` to a high-level lvalue, outside of any instruction's facts.
    pub fn lift_lval(&mut self, v: &XVariable, site: u64, hint: Option<&XXpr>) -> Lval {
        InstructionLift::detached(self, site).lift_lval(v, hint)
    }

    /// Lift a memory offset at `site`, into memory of type `host` if known.
    pub fn lift_offset(&mut self, o: &MemoryOffset, host: Option<&Typ>, site: u64) -> Offset {
        InstructionLift::detached(self, site).lift_offset(o, host)
    }
}

/// One instruction of a function: its address and size, its opcode, and its fact record.
#[derive(Clone, Debug)]
pub struct InstructionFacts {
    pub address: u64,
    pub size: u64,
    pub opcode: OpcodeRecord,
    pub xdata: InstrXData,
}

/// A formal parameter, and where it lives on entry.
#[derive(Clone, Debug)]
pub struct FormalFacts {
    pub name: String,
    pub typ: Typ,
    pub location: ParameterLocation,
}

/// Everything known about one function.
#[derive(Clone, Debug)]
pub struct FunctionFacts {
    pub name: String,
    pub address: u64,
    pub formals: Vec<FormalFacts>,
    pub xd: FnXprDictionary,
    pub invariants: Option<VarInvariantTable>,
    pub instructions: Vec<InstructionFacts>,
}

/// The program-wide tables the functions are lifted against.
#[derive(Debug)]
pub struct ProgramFacts {
    pub name: String,
    pub globals: Arc<GlobalSymbolTable>,
    pub strings: Strings,
    pub types: Types,
    pub functions: Vec<FunctionFacts>,
    /// Functions whose facts violate an opcode contract or fail to decode, with the reason
    pub rejected: Vec<(String, Error)>,
}

/// The label of the statement starting at `address`.
pub fn address_label(address: u64) -> String {
    format!("L_{:x}", address)
}

/// Lift one function. Decode errors and contract violations abort this function's lift;
/// anything that merely cannot be resolved is diagnosed and lifted as a placeholder.
pub fn lift_function(program: &ProgramFacts, f: &FunctionFacts) -> Result<LiftedFunction> {
    info!("Lifting function"; "function" => &f.name, "address" => format!("{:#x}", f.address));
    let mut symbols = LocalSymbolTable::new(program.globals.clone(), &f.name);
    for formal in f.formals.iter() {
        symbols.add_formal(&formal.name, formal.typ.clone(), formal.location.clone());
    }
    let mut b = AstBuilder::new(symbols);
    let cx = DecodeContext {
        xd: &f.xd,
        strings: &program.strings,
        types: &program.types,
        invariants: f.invariants.as_ref().map(|i| i as &dyn InvariantStore),
    };

    let targets: Vec<u64> = f
        .instructions
        .iter()
        .filter_map(|i| i.opcode.branch_target())
        .collect();

    let mut high: Vec<Stmt> = vec![];
    let mut low: Vec<Stmt> = vec![];
    let mut high_run: Vec<Instr> = vec![];
    let mut low_run: Vec<Instr> = vec![];
    let mut labels: Vec<StmtLabel> = vec![];

    macro_rules! flush {
        () => {
            if !high_run.is_empty() {
                high.push(b.mk_instr_sequence(std::mem::take(&mut high_run), std::mem::take(&mut labels)));
                low.push(b.mk_instr_sequence(std::mem::take(&mut low_run), vec![]));
            }
        };
    }

    for ins in f.instructions.iter() {
        if targets.contains(&ins.address) {
            flush!();
            labels.push(StmtLabel::Plain(address_label(ins.address)));
        }
        let xd = ins.xdata.decode(&cx)?;
        let mut il = InstructionLift::new(&mut b, xd, ins.address);
        match ins.opcode.lift(&mut il, &ins.xdata, ins.size)? {
            LiftedInstr::Instrs(pairs) => {
                for (l, h) in pairs {
                    low_run.push(l);
                    high_run.push(h);
                }
            }
            LiftedInstr::Stmt(l, mut h) => {
                flush!();
                h.labels.append(&mut labels);
                low.push(l);
                high.push(h);
            }
        }
    }
    flush!();

    let body = b.mk_block(high, vec![]);
    let low_body = b.mk_block(low, vec![]);
    Ok(b.finish(body, low_body))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::tests::*;

    #[test]
    fn stack_addresses_become_address_of_locals() {
        let mut b = empty_builder();
        let sp = initial_register_xvar("sp");
        let x = XXpr::binary(XOp::Minus, XXpr::Var(sp), XXpr::int(8));
        let e = b.lift_expr(&x, 0x10);
        match &e.kind {
            ExprKind::AddressOf(lv) => {
                assert_eq!(lv.vinfo().map(|v| v.name.as_str()), Some("localvar_8"))
            }
            k => panic!("unexpected {:?}", k),
        }
    }

    #[test]
    fn initial_register_values_resolve_to_formals() {
        let mut b = empty_builder();
        b.symbols_mut().add_formal(
            "buf",
            Typ::ptr(Typ::Int(IKind::Char)),
            ParameterLocation::Register("R0".into()),
        );
        let e = b.lift_expr(&XXpr::Var(initial_register_xvar("R0")), 0x10);
        assert_eq!(
            e.as_lval().and_then(|l| l.vinfo()).map(|v| v.name.as_str()),
            Some("buf")
        );
        let e = b.lift_expr(&XXpr::Var(initial_register_xvar("R1")), 0x10);
        assert_eq!(
            e.as_lval().and_then(|l| l.vinfo()).map(|v| v.name.as_str()),
            Some("R1_in")
        );
        assert!(b.diagnostics().is_empty());
    }

    #[test]
    fn pointer_plus_field_offset_is_a_field_address() {
        let mut b = builder_with_hdr_param();
        let p = XXpr::Var(initial_register_xvar("R0"));
        let e = b.lift_expr(&XXpr::binary(XOp::Plus, p.clone(), XXpr::int(4)), 0x10);
        match &e.kind {
            ExprKind::AddressOf(lv) => match &lv.offset {
                Offset::Field { name, sub, .. } => {
                    assert_eq!(name, "len");
                    assert!(sub.is_none());
                }
                o => panic!("unexpected offset {:?}", o),
            },
            k => panic!("unexpected {:?}", k),
        }
        // Not at a field boundary: scaled pointer arithmetic is impossible, so bytes it is
        let e = b.lift_expr(&XXpr::binary(XOp::Plus, p, XXpr::int(3)), 0x10);
        assert!(matches!(e.kind, ExprKind::Binary(BinOp::Plus, _, _)));
    }

    #[test]
    fn ambiguous_return_values_are_diagnosed() {
        let mut b = empty_builder();
        b.symbols_mut().ssa_vinfo("R0", 0x20, None);
        b.symbols_mut().ssa_vinfo("R1", 0x20, None);
        let rv = return_value_xvar(0x20);
        let e = b.lift_expr(&XXpr::Var(rv), 0x30);
        assert!(e.is_unresolved());
        assert_eq!(
            b.diagnostics()
                .of_kind(DiagnosticKind::AmbiguousSsa)
                .count(),
            1
        );
        let e = b.lift_expr(&XXpr::Var(return_value_xvar(0x40)), 0x44);
        assert_eq!(
            e.as_lval().and_then(|l| l.vinfo()).map(|v| v.name.as_str()),
            Some("rtn_40")
        );
    }

    #[test]
    fn shifts_carry_their_signedness() {
        let mut b = empty_builder();
        let r = XXpr::Var(register_xvar("R2"));
        let e = b.lift_expr(&XXpr::binary(XOp::Lsr, r.clone(), XXpr::int(2)), 0x10);
        match &e.kind {
            ExprKind::Binary(BinOp::ShiftRt, a, _) => {
                assert!(matches!(a.kind, ExprKind::Cast(Typ::Int(IKind::UInt), _)))
            }
            k => panic!("unexpected {:?}", k),
        }
        let e = b.lift_expr(&XXpr::binary(XOp::Asr, r, XXpr::int(2)), 0x10);
        match &e.kind {
            ExprKind::Binary(BinOp::ShiftRt, a, _) => {
                assert!(matches!(a.kind, ExprKind::Cast(Typ::Int(IKind::Int), _)))
            }
            k => panic!("unexpected {:?}", k),
        }
    }

    #[test]
    fn byte_extraction_shifts_by_whole_bytes() {
        let mut b = empty_builder();
        let r = XXpr::Var(register_xvar("R2"));
        let x = XXpr::Compound(XOp::XByte, vec![XXpr::int(2), r.clone()]);
        let e = b.lift_expr(&x, 0x10);
        match &e.kind {
            ExprKind::Binary(BinOp::BAnd, s, _) => match &s.kind {
                ExprKind::Binary(BinOp::ShiftRt, _, sh) => {
                    assert_eq!(sh.int_value(), Some(16))
                }
                k => panic!("unexpected {:?}", k),
            },
            k => panic!("unexpected {:?}", k),
        }

        let huge = XXpr::Constant(XConstant::Int {
            value: i64::MAX / 4,
            width: Width::W64,
        });
        let unresolved = |b: &AstBuilder| {
            b.diagnostics()
                .of_kind(DiagnosticKind::UnresolvedValue)
                .count()
        };
        let before = unresolved(&b);
        let e = b.lift_expr(&XXpr::Compound(XOp::XByte, vec![huge, r]), 0x14);
        assert!(e.is_unresolved());
        assert_eq!(unresolved(&b), before + 1);
    }

    #[test]
    fn nested_field_offsets_recurse_one_level() {
        let mut b = builder_with_nested_struct();
        let outer = Typ::Comp {
            name: "outer_t".into(),
            ckey: 2,
        };
        // outer_t { int tag @0; hdr_t h @4 }, hdr_t { hdr @0; len @4 }
        let o = b.lift_offset(&MemoryOffset::constant(8), Some(&outer), 0x10);
        match &o {
            Offset::Field { name, sub, .. } => {
                assert_eq!(name, "h");
                assert!(
                    matches!(&**sub, Offset::Field { name, sub, .. } if name == "len" && sub.is_none())
                );
            }
            o => panic!("unexpected {:?}", o),
        }
        // Two bytes into `len` is left over after two levels
        let o = b.lift_offset(&MemoryOffset::constant(10), Some(&outer), 0x10);
        assert!(!o.is_resolved());
        assert_eq!(
            b.diagnostics()
                .of_kind(DiagnosticKind::UnsupportedOffset)
                .count(),
            1
        );
    }

    #[test]
    fn register_uses_follow_single_reaching_definitions() {
        let mut b = empty_builder();
        let (def, _) = b.symbols_mut().ssa_vinfo("R3", 0x8, None);
        let mut xd = DecodedXData::default();
        xd.reaching_defs.push(XFact::Present(VarInvariantFact::ReachingDef(
            crate::dataflow::VarDefUse {
                variable: register_xvar("R3"),
                locations: vec!["0x8".into()],
            },
        )));
        let mut il = InstructionLift::new(&mut b, &xd, 0x10);
        let e = il.lift_expr(&XXpr::Var(register_xvar("R3")));
        assert!(Arc::ptr_eq(
            e.as_lval().and_then(|l| l.vinfo()).expect("a variable"),
            &def
        ));
    }
}
