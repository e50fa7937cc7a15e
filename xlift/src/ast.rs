//! The AST produced by lifting: a small C-like language of statements, instructions, lvalues,
//! offsets, expressions and types.
//!
//! Every statement, instruction, lvalue and expression carries a process-unique id, which is what
//! provenance tables are keyed on. Ids never take part in equality: two expressions that print the
//! same are equal, whatever their ids.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

use crate::error::{Error, Result};
use crate::symbol_table::GlobalSymbolTable;

macro_rules! node_ids {
    ($($(#[$m:meta])* $name:ident),* $(,)?) => {
        $(
            $(#[$m])*
            #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
            pub struct $name(pub usize);

            impl $name {
                /// A fresh id, never handed out before in this process.
                pub fn fresh() -> Self {
                    static NEXT: AtomicUsize = AtomicUsize::new(1);
                    Self(NEXT.fetch_add(1, Ordering::Relaxed))
                }
            }

            impl std::fmt::Display for $name {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    write!(f, "{}", self.0)
                }
            }
        )*
    };
}

node_ids!(
    /// Id of a statement
    StmtId,
    /// Id of an instruction
    InstrId,
    /// Id of an lvalue
    LvalId,
    /// Id of an expression
    ExprId,
    /// Id of a source location; shared by all nodes that originate from the same place
    LocationId,
);

/// Integer kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IKind {
    Char,
    SChar,
    UChar,
    Bool,
    Int,
    UInt,
    Short,
    UShort,
    Long,
    ULong,
    LongLong,
    ULongLong,
}

impl IKind {
    const NAMES: [(IKind, &'static str, &'static str); 12] = [
        (IKind::Char, "ichar", "char"),
        (IKind::SChar, "ischar", "signed char"),
        (IKind::UChar, "iuchar", "unsigned char"),
        (IKind::Bool, "ibool", "bool"),
        (IKind::Int, "iint", "int"),
        (IKind::UInt, "iuint", "unsigned int"),
        (IKind::Short, "ishort", "short"),
        (IKind::UShort, "iushort", "unsigned short"),
        (IKind::Long, "ilong", "long"),
        (IKind::ULong, "iulong", "unsigned long"),
        (IKind::LongLong, "ilonglong", "long long"),
        (IKind::ULongLong, "iulonglong", "unsigned long long"),
    ];

    pub fn from_name(name: &str) -> Option<IKind> {
        Self::NAMES
            .iter()
            .find(|(_, n, _)| *n == name)
            .map(|(k, _, _)| *k)
    }

    pub fn c_name(self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(k, _, _)| *k == self)
            .map(|(_, _, c)| *c)
            .unwrap_or("int")
    }

    /// Size in bytes, for a 32-bit target.
    pub fn size(self) -> u64 {
        match self {
            IKind::Char | IKind::SChar | IKind::UChar | IKind::Bool => 1,
            IKind::Short | IKind::UShort => 2,
            IKind::Int | IKind::UInt | IKind::Long | IKind::ULong => 4,
            IKind::LongLong | IKind::ULongLong => 8,
        }
    }

    pub fn is_signed(self) -> bool {
        matches!(
            self,
            IKind::Char | IKind::SChar | IKind::Int | IKind::Short | IKind::Long | IKind::LongLong
        )
    }

    /// The kind of the same size with the given signedness
    pub fn with_signedness(self, signed: bool) -> IKind {
        match (self.size(), signed) {
            (1, true) => IKind::SChar,
            (1, false) => IKind::UChar,
            (2, true) => IKind::Short,
            (2, false) => IKind::UShort,
            (8, true) => IKind::LongLong,
            (8, false) => IKind::ULongLong,
            (_, true) => IKind::Int,
            (_, false) => IKind::UInt,
        }
    }
}

/// Floating point kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FKind {
    Float,
    Double,
    LongDouble,
}

impl FKind {
    pub fn from_name(name: &str) -> Option<FKind> {
        match name {
            "float" => Some(FKind::Float),
            "fdouble" => Some(FKind::Double),
            "flongdouble" => Some(FKind::LongDouble),
            _ => None,
        }
    }

    pub fn c_name(self) -> &'static str {
        match self {
            FKind::Float => "float",
            FKind::Double => "double",
            FKind::LongDouble => "long double",
        }
    }

    pub fn size(self) -> u64 {
        match self {
            FKind::Float => 4,
            FKind::Double => 8,
            FKind::LongDouble => 16,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunArg {
    pub name: String,
    pub typ: Typ,
}

/// Types
#[derive(Clone, Debug, PartialEq)]
pub enum Typ {
    Void,
    Int(IKind),
    Float(FKind),
    Ptr(Box<Typ>),
    Array(Box<Typ>, Option<Box<Expr>>),
    Fun {
        ret: Box<Typ>,
        args: Option<Vec<FunArg>>,
        varargs: bool,
    },
    /// A typedef name
    Named(String),
    Comp {
        name: String,
        ckey: usize,
    },
    Enum {
        name: String,
        ikind: IKind,
    },
}

impl Typ {
    pub fn ptr(t: Typ) -> Typ {
        Typ::Ptr(Box::new(t))
    }

    pub fn pointee(&self) -> Option<&Typ> {
        match self {
            Typ::Ptr(t) => Some(t),
            _ => None,
        }
    }

    /// Signedness of an integer type; `None` if not an integer.
    pub fn is_signed(&self) -> Option<bool> {
        match self {
            Typ::Int(k) | Typ::Enum { ikind: k, .. } => Some(k.is_signed()),
            _ => None,
        }
    }

    pub fn comp_key(&self) -> Option<usize> {
        match self {
            Typ::Comp { ckey, .. } => Some(*ckey),
            _ => None,
        }
    }

    pub fn array_element(&self) -> Option<&Typ> {
        match self {
            Typ::Array(t, _) => Some(t),
            _ => None,
        }
    }

    /// Number of array elements, if the size is a literal constant.
    pub fn array_length(&self) -> Option<i64> {
        match self {
            Typ::Array(_, Some(e)) => match &e.kind {
                ExprKind::IntConstant { value, .. } => Some(*value),
                _ => None,
            },
            _ => None,
        }
    }
}

/// A field of a composite.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub name: String,
    pub ftype: Typ,
    pub byte_offset: Option<i64>,
}

/// A struct or union definition. The field layout is validated once, at construction.
#[derive(Clone, Debug, PartialEq)]
pub struct CompInfo {
    pub name: String,
    pub ckey: usize,
    pub is_union: bool,
    fields: Vec<FieldInfo>,
    /// Byte offset to field position; present only if every field has an offset.
    offsets: Option<BTreeMap<i64, usize>>,
}

impl CompInfo {
    pub fn new(name: &str, ckey: usize, fields: Vec<FieldInfo>, is_union: bool) -> Self {
        let offsets = if fields.iter().all(|f| f.byte_offset.is_some()) {
            let mut m = BTreeMap::new();
            for (i, f) in fields.iter().enumerate() {
                // Union members share offset 0; the first one named is the one found by offset
                if let Some(off) = f.byte_offset {
                    m.entry(off).or_insert(i);
                }
            }
            Some(m)
        } else {
            None
        };
        Self {
            name: name.to_string(),
            ckey,
            is_union,
            fields,
            offsets,
        }
    }

    pub fn fields(&self) -> &[FieldInfo] {
        &self.fields
    }

    pub fn has_field_offsets(&self) -> bool {
        self.offsets.is_some()
    }

    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// The field at the largest offset not above `offset`, with the remaining offset into it.
    /// `None` for negative offsets, offsets before the first field, or an incomplete layout.
    pub fn field_at_offset(&self, offset: i64) -> Option<(&FieldInfo, i64)> {
        if offset < 0 {
            return None;
        }
        let (start, ix) = self.offsets.as_ref()?.range(..=offset).next_back()?;
        Some((&self.fields[*ix], offset - start))
    }
}

/// A variable of the lifted program.
///
/// Immutable once minted, except that a variable without a type may be given one, once.
#[derive(Debug)]
pub struct VarInfo {
    pub name: String,
    vtype: OnceLock<Typ>,
    pub parameter: Option<usize>,
    pub global_address: Option<u64>,
    pub description: Option<String>,
}

impl VarInfo {
    pub fn new(name: &str, vtype: Option<Typ>) -> Self {
        let cell = OnceLock::new();
        if let Some(t) = vtype {
            let _ = cell.set(t);
        }
        Self {
            name: name.to_string(),
            vtype: cell,
            parameter: None,
            global_address: None,
            description: None,
        }
    }

    pub fn with_parameter(mut self, index: usize) -> Self {
        self.parameter = Some(index);
        self
    }

    pub fn with_global_address(mut self, address: u64) -> Self {
        self.global_address = Some(address);
        self
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = Some(description.to_string());
        self
    }

    pub fn vtype(&self) -> Option<&Typ> {
        self.vtype.get()
    }

    /// Give the variable a type. Allowed only while it has none.
    pub fn refine_type(&self, t: Typ) -> Result<()> {
        self.vtype.set(t).map_err(|_| Error::TypeAlreadyRefined {
            name: self.name.clone(),
        })
    }
}

impl PartialEq for VarInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
            && self.parameter == other.parameter
            && self.global_address == other.global_address
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Lhost {
    Var(Arc<VarInfo>),
    /// A dereference of an address expression.
    Mem(Box<Expr>),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Offset {
    None,
    Field {
        name: String,
        ckey: usize,
        sub: Box<Offset>,
    },
    Index {
        index: Box<Expr>,
        sub: Box<Offset>,
    },
    /// An offset that could not be resolved; `reason` says why.
    Unresolved { reason: String },
}

impl Offset {
    pub fn is_none(&self) -> bool {
        matches!(self, Offset::None)
    }

    pub fn is_resolved(&self) -> bool {
        match self {
            Offset::None => true,
            Offset::Field { sub, .. } | Offset::Index { sub, .. } => sub.is_resolved(),
            Offset::Unresolved { .. } => false,
        }
    }

    /// Append `tail` at the end of the chain.
    pub fn append(self, tail: Offset) -> Offset {
        match self {
            Offset::None => tail,
            Offset::Field { name, ckey, sub } => Offset::Field {
                name,
                ckey,
                sub: Box::new(sub.append(tail)),
            },
            Offset::Index { index, sub } => Offset::Index {
                index,
                sub: Box::new(sub.append(tail)),
            },
            u @ Offset::Unresolved { .. } => u,
        }
    }
}

#[derive(Clone, Debug)]
pub struct Lval {
    pub id: LvalId,
    pub lhost: Lhost,
    pub offset: Offset,
}

impl PartialEq for Lval {
    fn eq(&self, other: &Self) -> bool {
        self.lhost == other.lhost && self.offset == other.offset
    }
}

impl Lval {
    pub fn vinfo(&self) -> Option<&Arc<VarInfo>> {
        match &self.lhost {
            Lhost::Var(v) => Some(v),
            Lhost::Mem(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.offset.is_resolved()
            && match &self.lhost {
                Lhost::Var(_) => true,
                Lhost::Mem(e) => e.is_resolved(),
            }
    }

    /// The static type of the lvalue, as far as it is known.
    pub fn ctype(&self, globals: &GlobalSymbolTable) -> Option<Typ> {
        let host = match &self.lhost {
            Lhost::Var(v) => v.vtype().cloned()?,
            Lhost::Mem(e) => e.ctype(globals)?.pointee()?.clone(),
        };
        offset_ctype(host, &self.offset, globals)
    }
}

fn offset_ctype(t: Typ, offset: &Offset, globals: &GlobalSymbolTable) -> Option<Typ> {
    match offset {
        Offset::None => Some(t),
        Offset::Field { name, ckey, sub } => {
            let ftype = globals.compinfo(*ckey)?.field(name)?.ftype.clone();
            offset_ctype(ftype, sub, globals)
        }
        Offset::Index { sub, .. } => offset_ctype(t.array_element()?.clone(), sub, globals),
        Offset::Unresolved { .. } => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    BNot,
    LNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Plus,
    Minus,
    Mult,
    Div,
    Mod,
    ShiftLt,
    ShiftRt,
    BAnd,
    BOr,
    BXor,
    LAnd,
    LOr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl BinOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ExprKind {
    IntConstant {
        value: i64,
        ikind: IKind,
    },
    FloatConstant {
        value: f64,
        fkind: FKind,
    },
    /// An integer constant that is the address of a global, with the expression it denotes
    /// (usually `&g`).
    GlobalAddressConstant {
        value: i64,
        address_expr: Box<Expr>,
    },
    StringConstant {
        value: String,
        address: Option<u64>,
    },
    Lval(Lval),
    SizeOf(Typ),
    Cast(Typ, Box<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Question(Box<Expr>, Box<Expr>, Box<Expr>),
    AddressOf(Lval),
    /// A value that could not be resolved; `reason` says why.
    Unresolved { reason: String },
}

#[derive(Clone, Debug)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Expr {
    pub fn int_value(&self) -> Option<i64> {
        match &self.kind {
            ExprKind::IntConstant { value, .. } => Some(*value),
            ExprKind::GlobalAddressConstant { value, .. } => Some(*value),
            _ => None,
        }
    }

    pub fn as_lval(&self) -> Option<&Lval> {
        match &self.kind {
            ExprKind::Lval(lv) => Some(lv),
            _ => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self.kind, ExprKind::Unresolved { .. })
    }

    /// Whether no placeholder occurs anywhere in the expression.
    pub fn is_resolved(&self) -> bool {
        match &self.kind {
            ExprKind::Unresolved { .. } => false,
            ExprKind::IntConstant { .. }
            | ExprKind::FloatConstant { .. }
            | ExprKind::StringConstant { .. }
            | ExprKind::SizeOf(_) => true,
            ExprKind::GlobalAddressConstant { address_expr, .. } => address_expr.is_resolved(),
            ExprKind::Lval(lv) | ExprKind::AddressOf(lv) => lv.is_resolved(),
            ExprKind::Cast(_, e) | ExprKind::Unary(_, e) => e.is_resolved(),
            ExprKind::Binary(_, a, b) => a.is_resolved() && b.is_resolved(),
            ExprKind::Question(c, a, b) => c.is_resolved() && a.is_resolved() && b.is_resolved(),
        }
    }

    /// The static type of the expression, as far as it is known.
    pub fn ctype(&self, globals: &GlobalSymbolTable) -> Option<Typ> {
        match &self.kind {
            ExprKind::IntConstant { ikind, .. } => Some(Typ::Int(*ikind)),
            ExprKind::FloatConstant { fkind, .. } => Some(Typ::Float(*fkind)),
            ExprKind::GlobalAddressConstant { address_expr, .. } => address_expr.ctype(globals),
            ExprKind::StringConstant { .. } => Some(Typ::ptr(Typ::Int(IKind::Char))),
            ExprKind::Lval(lv) => lv.ctype(globals),
            ExprKind::SizeOf(_) => Some(Typ::Int(IKind::UInt)),
            ExprKind::Cast(t, _) => Some(t.clone()),
            ExprKind::Unary(UnOp::LNot, _) => Some(Typ::Int(IKind::Int)),
            ExprKind::Unary(_, e) => e.ctype(globals),
            ExprKind::Binary(op, _, _) if op.is_comparison() => Some(Typ::Int(IKind::Int)),
            ExprKind::Binary(BinOp::LAnd | BinOp::LOr, _, _) => Some(Typ::Int(IKind::Int)),
            ExprKind::Binary(BinOp::Minus, a, b) => {
                let (ta, tb) = (a.ctype(globals), b.ctype(globals));
                match (ta, tb) {
                    (Some(Typ::Ptr(_)), Some(Typ::Ptr(_))) => Some(Typ::Int(IKind::Int)),
                    (ta, _) => ta,
                }
            }
            ExprKind::Binary(_, a, b) => a.ctype(globals).or_else(|| b.ctype(globals)),
            ExprKind::Question(_, a, b) => a.ctype(globals).or_else(|| b.ctype(globals)),
            ExprKind::AddressOf(lv) => lv.ctype(globals).map(Typ::ptr),
            ExprKind::Unresolved { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum InstrKind {
    Assign(Lval, Expr),
    Call {
        lval: Option<Lval>,
        target: Expr,
        args: Vec<Expr>,
    },
    Asm {
        volatile: bool,
        templates: Vec<String>,
    },
    /// No operation; the description says what was dropped.
    Nop(String),
}

#[derive(Clone, Debug)]
pub struct Instr {
    pub id: InstrId,
    pub location: LocationId,
    pub kind: InstrKind,
}

impl PartialEq for Instr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtLabel {
    Plain(String),
    Case(Expr),
    CaseRange(Expr, Expr),
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub enum StmtKind {
    Return(Option<Expr>),
    Break,
    Continue,
    Loop(Box<Stmt>),
    Block(Vec<Stmt>),
    InstrSequence(Vec<Instr>),
    Branch {
        cond: Expr,
        then_branch: Box<Stmt>,
        else_branch: Box<Stmt>,
        target_address: Option<u64>,
    },
    Goto(String),
    ComputedGoto(Expr),
    Switch {
        selector: Expr,
        cases: Box<Stmt>,
    },
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub id: StmtId,
    pub location: LocationId,
    pub labels: Vec<StmtLabel>,
    pub kind: StmtKind,
}

impl PartialEq for Stmt {
    fn eq(&self, other: &Self) -> bool {
        self.labels == other.labels && self.kind == other.kind
    }
}

impl Stmt {
    /// All instructions in the statement tree, in program order.
    pub fn instructions(&self) -> Vec<&Instr> {
        match &self.kind {
            StmtKind::InstrSequence(is) => is.iter().collect(),
            StmtKind::Block(ss) => ss.iter().flat_map(|s| s.instructions()).collect(),
            StmtKind::Loop(s) => s.instructions(),
            StmtKind::Branch {
                then_branch,
                else_branch,
                ..
            } => {
                let mut r = then_branch.instructions();
                r.extend(else_branch.instructions());
                r
            }
            StmtKind::Switch { cases, .. } => cases.instructions(),
            StmtKind::Return(_)
            | StmtKind::Break
            | StmtKind::Continue
            | StmtKind::Goto(_)
            | StmtKind::ComputedGoto(_) => vec![],
        }
    }
}
