//! The symbolic value model: variables, what they denote, and expressions over them.
//!
//! Values are decoded from the function's [`FnXprDictionary`](crate::dictionary::FnXprDictionary)
//! and are immutable afterwards. A variable's identity is its sequence number; two variables with
//! the same sequence number always decode to the same content.

use crate::constant_folding;
use crate::lift_config::CONFIG;

/// Bit width of an integer constant or of the arithmetic over it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Width {
    W32,
    W64,
}

impl Width {
    pub fn bits(self) -> u32 {
        match self {
            Width::W32 => 32,
            Width::W64 => 64,
        }
    }

    /// The wider of two widths
    pub fn join(self, other: Width) -> Width {
        std::cmp::max(self, other)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XConstant {
    /// An integer constant, normalized to its width.
    Int { value: i64, width: Width },
    /// An integer constant that was recognized as the address of a global.
    GlobalAddress(u64),
}

impl XConstant {
    pub fn int(value: i64) -> Self {
        XConstant::Int {
            value: constant_folding::normalize(value, Width::W32),
            width: Width::W32,
        }
    }

    pub fn value(&self) -> i64 {
        match self {
            XConstant::Int { value, .. } => *value,
            XConstant::GlobalAddress(a) => *a as i64,
        }
    }

    pub fn width(&self) -> Width {
        match self {
            XConstant::Int { width, .. } => *width,
            XConstant::GlobalAddress(_) => Width::W32,
        }
    }
}

/// The operators of compound expressions, by their encoded names.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XOp {
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    BAnd,
    BOr,
    BXor,
    BNot,
    LNot,
    Neg,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LAnd,
    LOr,
    ShiftLt,
    ShiftRt,
    Lsl,
    Lsr,
    Asr,
    XByte,
    Lsb,
    Lsh,
    Range,
}

impl XOp {
    const NAMES: [(XOp, &'static str); 28] = [
        (XOp::Plus, "plus"),
        (XOp::Minus, "minus"),
        (XOp::Mult, "mult"),
        (XOp::Div, "div"),
        (XOp::Mod, "mod"),
        (XOp::BAnd, "band"),
        (XOp::BOr, "bor"),
        (XOp::BXor, "bxor"),
        (XOp::BNot, "bnot"),
        (XOp::LNot, "lnot"),
        (XOp::Neg, "neg"),
        (XOp::Eq, "eq"),
        (XOp::Ne, "ne"),
        (XOp::Lt, "lt"),
        (XOp::Le, "le"),
        (XOp::Gt, "gt"),
        (XOp::Ge, "ge"),
        (XOp::LAnd, "land"),
        (XOp::LOr, "lor"),
        (XOp::ShiftLt, "shiftlt"),
        (XOp::ShiftRt, "shiftrt"),
        (XOp::Lsl, "lsl"),
        (XOp::Lsr, "lsr"),
        (XOp::Asr, "asr"),
        (XOp::XByte, "xbyte"),
        (XOp::Lsb, "lsb"),
        (XOp::Lsh, "lsh"),
        (XOp::Range, "range"),
    ];

    pub fn from_name(name: &str) -> Option<XOp> {
        Self::NAMES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(op, _)| *op)
    }

    pub fn name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(op, _)| *op == self)
            .map(|(_, n)| *n)
            .unwrap_or("?")
    }

    pub fn is_unary(self) -> bool {
        matches!(
            self,
            XOp::BNot | XOp::LNot | XOp::Neg | XOp::Lsb | XOp::Lsh
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            XOp::Eq | XOp::Ne | XOp::Lt | XOp::Le | XOp::Gt | XOp::Ge
        )
    }

    /// Infix rendering, as used for debug output of expressions
    pub fn symbol(self) -> &'static str {
        match self {
            XOp::Plus => "+",
            XOp::Minus => "-",
            XOp::Mult => "*",
            XOp::Div => "/",
            XOp::Mod => "%",
            XOp::BAnd => "&",
            XOp::BOr => "|",
            XOp::BXor => "xor",
            XOp::BNot => "~",
            XOp::LNot => "!",
            XOp::Neg => "-",
            XOp::Eq => "==",
            XOp::Ne => "!=",
            XOp::Lt => "<",
            XOp::Le => "<=",
            XOp::Gt => ">",
            XOp::Ge => ">=",
            XOp::LAnd => "&&",
            XOp::LOr => "||",
            XOp::ShiftLt | XOp::Lsl => "<<",
            XOp::ShiftRt | XOp::Lsr => ">>",
            XOp::Asr => "s>>",
            XOp::XByte => "xbyte",
            XOp::Lsb => "lsb",
            XOp::Lsh => "lsh",
            XOp::Range => "range",
        }
    }
}

/// A base for memory variables.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryBase {
    LocalStackFrame,
    AllocatedStackFrame,
    RealignedStackFrame,
    Global,
    /// Memory reached through the value of a variable.
    BaseVar(Box<XVariable>),
    Unknown(String),
}

/// A (possibly nested) offset relative to a memory base.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MemoryOffset {
    None,
    Constant {
        value: i64,
        sub: Box<MemoryOffset>,
    },
    Field {
        name: String,
        ckey: usize,
        sub: Box<MemoryOffset>,
    },
    ArrayIndex {
        index: Box<XXpr>,
        sub: Box<MemoryOffset>,
    },
    IndexVar {
        var: Box<XVariable>,
        elsize: u64,
        sub: Box<MemoryOffset>,
    },
    Unknown,
}

impl MemoryOffset {
    pub fn constant(value: i64) -> Self {
        MemoryOffset::Constant {
            value,
            sub: Box::new(MemoryOffset::None),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, MemoryOffset::None)
    }

    /// The total byte offset if the offset is made of constants only.
    pub fn constant_value(&self) -> Option<i64> {
        match self {
            MemoryOffset::None => Some(0),
            MemoryOffset::Constant { value, sub } => {
                sub.constant_value().map(|s| value.wrapping_add(s))
            }
            _ => None,
        }
    }
}

/// Constant-value (placeholder) variables: values fixed at a program point rather than locations.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstantValueVariable {
    /// The value of a register at function entry.
    InitialRegisterValue { register: String, level: i64 },
    /// The value of a memory location at function entry.
    InitialMemoryValue(Box<XVariable>),
    /// The value returned by the call at `callsite`.
    FunctionReturnValue {
        callsite: u64,
        target: Option<String>,
    },
    /// A named symbolic value.
    SymbolicExprValue { name: String, xpr: Box<XXpr> },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VarDenotation {
    Register(String),
    Flag(String),
    Memory {
        base: MemoryBase,
        size: u64,
        offset: MemoryOffset,
    },
    Auxiliary(ConstantValueVariable),
}

/// A variable. Temporaries have sequence number `-1` and no denotation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XVariable {
    pub name: String,
    pub seqnr: i64,
    pub denotation: Option<VarDenotation>,
}

impl XVariable {
    pub fn is_tmp(&self) -> bool {
        self.seqnr == -1
    }

    pub fn register(&self) -> Option<&str> {
        match &self.denotation {
            Some(VarDenotation::Register(r)) => Some(r),
            _ => None,
        }
    }

    pub fn auxvar(&self) -> Option<&ConstantValueVariable> {
        match &self.denotation {
            Some(VarDenotation::Auxiliary(a)) => Some(a),
            _ => None,
        }
    }

    pub fn memory(&self) -> Option<(&MemoryBase, u64, &MemoryOffset)> {
        match &self.denotation {
            Some(VarDenotation::Memory { base, size, offset }) => Some((base, *size, offset)),
            _ => None,
        }
    }

    /// The register whose entry value this variable is, if any.
    pub fn initial_register(&self) -> Option<&str> {
        match self.auxvar() {
            Some(ConstantValueVariable::InitialRegisterValue { register, .. }) => Some(register),
            _ => None,
        }
    }

    /// Whether this is the entry value of the stack pointer.
    pub fn is_stack_base_address(&self) -> bool {
        self.initial_register()
            .map(|r| CONFIG.is_stack_pointer(r))
            .unwrap_or(false)
    }

    /// Offset from the local frame base, for a local stack variable with a constant offset.
    pub fn stack_offset(&self) -> Option<i64> {
        match self.memory()? {
            (MemoryBase::LocalStackFrame, _, offset) => offset.constant_value(),
            _ => None,
        }
    }

    /// Absolute address, for a global variable with a constant offset.
    pub fn global_address(&self) -> Option<u64> {
        match self.memory()? {
            (MemoryBase::Global, _, offset) => offset.constant_value().map(|v| v as u64),
            _ => None,
        }
    }
}

impl std::fmt::Display for XVariable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A symbolic expression.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum XXpr {
    Constant(XConstant),
    Var(XVariable),
    Compound(XOp, Vec<XXpr>),
}

impl XXpr {
    pub fn int(value: i64) -> Self {
        XXpr::Constant(XConstant::int(value))
    }

    pub fn binary(op: XOp, a: XXpr, b: XXpr) -> Self {
        XXpr::Compound(op, vec![a, b])
    }

    pub fn as_var(&self) -> Option<&XVariable> {
        match self {
            XXpr::Var(v) => Some(v),
            _ => None,
        }
    }

    pub fn int_value(&self) -> Option<i64> {
        match self {
            XXpr::Constant(c) => Some(c.value()),
            _ => None,
        }
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, XXpr::Constant(_))
    }

    /// All variables occurring in the expression, left to right.
    pub fn variables(&self) -> Vec<&XVariable> {
        match self {
            XXpr::Constant(_) => vec![],
            XXpr::Var(v) => vec![v],
            XXpr::Compound(_, args) => args.iter().flat_map(|a| a.variables()).collect(),
        }
    }

    /// The summands of a (nested) addition
    pub fn terms(&self) -> Vec<&XXpr> {
        match self {
            XXpr::Compound(XOp::Plus, args) => args.iter().flat_map(|a| a.terms()).collect(),
            _ => vec![self],
        }
    }

    /// Whether this is `sp_in + c` or `sp_in - c`.
    pub fn is_stack_address(&self) -> bool {
        self.stack_address_offset().is_some()
    }

    /// The frame offset of a stack address expression.
    pub fn stack_address_offset(&self) -> Option<i64> {
        match self {
            XXpr::Var(v) if v.is_stack_base_address() => Some(0),
            XXpr::Compound(op @ (XOp::Plus | XOp::Minus), args) if args.len() == 2 => {
                let base = args[0].as_var()?;
                if !base.is_stack_base_address() {
                    return None;
                }
                let c = args[1].int_value()?;
                Some(if *op == XOp::Minus { c.wrapping_neg() } else { c })
            }
            _ => None,
        }
    }

    /// A pure rewrite that folds constant subexpressions and merges nested literal additions and
    /// subtractions, preserving operand order. `self` is left untouched.
    pub fn simplify(&self) -> XXpr {
        match self {
            XXpr::Constant(_) | XXpr::Var(_) => self.clone(),
            XXpr::Compound(op, args) => {
                let args: Vec<XXpr> = args.iter().map(|a| a.simplify()).collect();
                let x = XXpr::Compound(*op, args);
                if let Some(c) = constant_folding::fold(&x) {
                    return XXpr::Constant(c);
                }
                simplify_linear(x)
            }
        }
    }
}

/// `(e ± c1) ± c2` to `e ± c`, and `e + 0` to `e`. The merged constant takes the widest width
/// of its parts.
fn simplify_linear(x: XXpr) -> XXpr {
    let int = |x: &XXpr| match x {
        XXpr::Constant(XConstant::Int { value, width }) => Some((*value, *width)),
        _ => None,
    };
    let (op, args) = match &x {
        XXpr::Compound(op @ (XOp::Plus | XOp::Minus), args) if args.len() == 2 => (*op, args),
        _ => return x,
    };
    let (c2, w2) = match int(&args[1]) {
        Some(c) => c,
        None => return x,
    };
    let signed = |op: XOp, c: i64| if op == XOp::Minus { c.wrapping_neg() } else { c };
    let inner = match &args[0] {
        XXpr::Compound(inner @ (XOp::Plus | XOp::Minus), inner_args) if inner_args.len() == 2 => {
            int(&inner_args[1]).map(|c1| (*inner, &inner_args[0], c1))
        }
        _ => None,
    };
    let (base, total, width) = match inner {
        Some((inner, e, (c1, w1))) => (
            e.clone(),
            signed(inner, c1).wrapping_add(signed(op, c2)),
            w1.max(w2),
        ),
        None => (args[0].clone(), signed(op, c2), w2),
    };
    let total = constant_folding::normalize(total, width);
    let constant = |value: i64| {
        XXpr::Constant(XConstant::Int {
            value: constant_folding::normalize(value, width),
            width,
        })
    };
    if total == 0 {
        base
    } else if total < 0 {
        XXpr::binary(XOp::Minus, base, constant(total.wrapping_neg()))
    } else {
        XXpr::binary(XOp::Plus, base, constant(total))
    }
}

impl std::fmt::Display for XXpr {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            XXpr::Constant(XConstant::Int { value, .. }) => write!(f, "{}", value),
            XXpr::Constant(XConstant::GlobalAddress(a)) => write!(f, "{:#x}", a),
            XXpr::Var(v) => write!(f, "{}", v),
            XXpr::Compound(op, args) if args.len() == 1 => write!(f, "{}({})", op.symbol(), args[0]),
            XXpr::Compound(op, args) if args.len() == 2 => {
                write!(f, "({} {} {})", args[0], op.symbol(), args[1])
            }
            XXpr::Compound(op, args) => {
                write!(f, "{}({})", op.name(), itertools::join(args, ", "))
            }
        }
    }
}

/// An interval of integers, with open bounds represented by `None`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct XInterval {
    pub lb: Option<i64>,
    pub ub: Option<i64>,
}

impl XInterval {
    pub fn is_singleton(&self) -> bool {
        self.lb.is_some() && self.lb == self.ub
    }

    pub fn is_closed(&self) -> bool {
        self.lb.is_some() && self.ub.is_some()
    }

    pub fn contains(&self, v: i64) -> bool {
        self.lb.map(|lb| lb <= v).unwrap_or(true) && self.ub.map(|ub| v <= ub).unwrap_or(true)
    }
}

impl std::fmt::Display for XInterval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let lb = self.lb.map(|v| v.to_string()).unwrap_or_else(|| "-oo".into());
        let ub = self.ub.map(|v| v.to_string()).unwrap_or_else(|| "oo".into());
        write!(f, "[{};{}]", lb, ub)
    }
}
