//! C-like rendering of the lifted AST.
//!
//! Placeholders for unresolved values render as `?<reason>?`, so a function with unresolved
//! fragments still prints in full.

use std::collections::VecDeque;

use crate::ast::*;
use crate::builder::LiftedFunction;
use crate::containers::unordered::UnorderedSet;
use crate::symbol_table::GlobalSymbolTable;

/// Binding strength of an expression, higher binds tighter.
fn precedence(e: &Expr) -> u8 {
    match &e.kind {
        ExprKind::IntConstant { value, .. } if *value < 0 => 15,
        ExprKind::IntConstant { .. }
        | ExprKind::FloatConstant { .. }
        | ExprKind::StringConstant { .. }
        | ExprKind::Unresolved { .. } => 16,
        ExprKind::GlobalAddressConstant { address_expr, .. } => precedence(address_expr),
        ExprKind::Lval(lv) => match (&lv.lhost, &lv.offset) {
            (Lhost::Mem(_), Offset::None) => 15,
            _ => 16,
        },
        ExprKind::SizeOf(_) | ExprKind::Cast(..) | ExprKind::Unary(..) | ExprKind::AddressOf(_) => {
            15
        }
        ExprKind::Binary(op, ..) => binop_precedence(*op),
        ExprKind::Question(..) => 3,
    }
}

fn binop_precedence(op: BinOp) -> u8 {
    match op {
        BinOp::Mult | BinOp::Div | BinOp::Mod => 13,
        BinOp::Plus | BinOp::Minus => 12,
        BinOp::ShiftLt | BinOp::ShiftRt => 11,
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => 10,
        BinOp::Eq | BinOp::Ne => 9,
        BinOp::BAnd => 8,
        BinOp::BXor => 7,
        BinOp::BOr => 6,
        BinOp::LAnd => 5,
        BinOp::LOr => 4,
    }
}

fn binop_symbol(op: BinOp) -> &'static str {
    match op {
        BinOp::Plus => "+",
        BinOp::Minus => "-",
        BinOp::Mult => "*",
        BinOp::Div => "/",
        BinOp::Mod => "%",
        BinOp::ShiftLt => "<<",
        BinOp::ShiftRt => ">>",
        BinOp::BAnd => "&",
        BinOp::BOr => "|",
        BinOp::BXor => "^",
        BinOp::LAnd => "&&",
        BinOp::LOr => "||",
        BinOp::Eq => "==",
        BinOp::Ne => "!=",
        BinOp::Lt => "<",
        BinOp::Le => "<=",
        BinOp::Gt => ">",
        BinOp::Ge => ">=",
    }
}

fn unop_symbol(op: UnOp) -> &'static str {
    match op {
        UnOp::Neg => "-",
        UnOp::BNot => "~",
        UnOp::LNot => "!",
    }
}

fn placeholder(reason: &str) -> String {
    format!("?{}?", reason)
}

/// `e`, parenthesized if it binds looser than `min`.
fn operand(e: &Expr, min: u8) -> String {
    let s = expr_to_string(e);
    if precedence(e) < min {
        format!("({})", s)
    } else {
        s
    }
}

/// The declaration of `name` with type `t`.
pub fn declaration(t: &Typ, name: &str) -> String {
    match t {
        Typ::Ptr(inner) => match inner.as_ref() {
            Typ::Array(..) | Typ::Fun { .. } => declaration(inner, &format!("(*{})", name)),
            _ => declaration(inner, &format!("*{}", name)),
        },
        Typ::Array(elem, len) => {
            let len = len.as_ref().map(|e| expr_to_string(e)).unwrap_or_default();
            declaration(elem, &format!("{}[{}]", name, len))
        }
        Typ::Fun { ret, args, varargs } => {
            let mut params: Vec<String> = match args {
                Some(args) => args.iter().map(|a| declaration(&a.typ, &a.name)).collect(),
                None => vec![],
            };
            if *varargs {
                params.push("...".into());
            } else if args.as_ref().map_or(false, |a| a.is_empty()) {
                params.push("void".into());
            }
            declaration(ret, &format!("{}({})", name, params.join(", ")))
        }
        _ if name.is_empty() => base_type(t),
        _ => format!("{} {}", base_type(t), name),
    }
}

fn base_type(t: &Typ) -> String {
    match t {
        Typ::Void => "void".into(),
        Typ::Int(k) => k.c_name().into(),
        Typ::Float(k) => k.c_name().into(),
        Typ::Named(n) => n.clone(),
        Typ::Comp { name, .. } => format!("struct {}", name),
        Typ::Enum { name, .. } => format!("enum {}", name),
        Typ::Ptr(_) | Typ::Array(..) | Typ::Fun { .. } => declaration(t, ""),
    }
}

pub fn typ_to_string(t: &Typ) -> String {
    declaration(t, "")
}

fn offset_to_string(o: &Offset) -> String {
    match o {
        Offset::None => String::new(),
        Offset::Field { name, sub, .. } => format!(".{}{}", name, offset_to_string(sub)),
        Offset::Index { index, sub } => {
            format!("[{}]{}", expr_to_string(index), offset_to_string(sub))
        }
        Offset::Unresolved { reason } => format!(".{}", placeholder(reason)),
    }
}

pub fn lval_to_string(lv: &Lval) -> String {
    match (&lv.lhost, &lv.offset) {
        (Lhost::Var(v), o) => format!("{}{}", v.name, offset_to_string(o)),
        (Lhost::Mem(e), Offset::None) => format!("*{}", operand(e, 15)),
        (Lhost::Mem(e), Offset::Field { name, sub, .. }) => {
            format!("{}->{}{}", operand(e, 16), name, offset_to_string(sub))
        }
        (Lhost::Mem(e), o) => format!("(*{}){}", operand(e, 15), offset_to_string(o)),
    }
}

fn int_constant(value: i64, ikind: IKind) -> String {
    let suffix = match ikind {
        IKind::UInt => "U",
        IKind::Long => "L",
        IKind::ULong => "UL",
        IKind::LongLong => "LL",
        IKind::ULongLong => "ULL",
        _ => "",
    };
    if !ikind.is_signed() && !(0..=0xffff).contains(&value) {
        format!("{:#x}{}", value, suffix)
    } else {
        format!("{}{}", value, suffix)
    }
}

pub fn expr_to_string(e: &Expr) -> String {
    match &e.kind {
        ExprKind::IntConstant { value, ikind } => int_constant(*value, *ikind),
        ExprKind::FloatConstant { value, fkind } => match fkind {
            FKind::Float => format!("{:?}f", value),
            FKind::Double => format!("{:?}", value),
            FKind::LongDouble => format!("{:?}L", value),
        },
        ExprKind::GlobalAddressConstant { address_expr, .. } => expr_to_string(address_expr),
        ExprKind::StringConstant { value, .. } => format!("\"{}\"", value.escape_default()),
        ExprKind::Lval(lv) => lval_to_string(lv),
        ExprKind::SizeOf(t) => format!("sizeof({})", typ_to_string(t)),
        ExprKind::Cast(t, e) => format!("({}){}", typ_to_string(t), operand(e, 15)),
        ExprKind::Unary(op, e) => format!("{}{}", unop_symbol(*op), operand(e, 15)),
        ExprKind::Binary(op, a, b) => {
            let p = binop_precedence(*op);
            format!(
                "{} {} {}",
                operand(a, p),
                binop_symbol(*op),
                operand(b, p + 1)
            )
        }
        ExprKind::Question(c, a, b) => format!(
            "{} ? {} : {}",
            operand(c, 4),
            operand(a, 4),
            operand(b, 3)
        ),
        ExprKind::AddressOf(lv) => {
            let s = lval_to_string(lv);
            if matches!((&lv.lhost, &lv.offset), (Lhost::Mem(_), Offset::None)) {
                format!("&({})", s)
            } else {
                format!("&{}", s)
            }
        }
        ExprKind::Unresolved { reason } => placeholder(reason),
    }
}

pub fn instr_to_string(i: &Instr) -> String {
    match &i.kind {
        InstrKind::Assign(lv, e) => format!("{} = {};", lval_to_string(lv), expr_to_string(e)),
        InstrKind::Call { lval, target, args } => {
            let args: Vec<String> = args.iter().map(expr_to_string).collect();
            let call = format!("{}({})", operand(target, 16), args.join(", "));
            match lval {
                Some(lv) => format!("{} = {};", lval_to_string(lv), call),
                None => format!("{};", call),
            }
        }
        InstrKind::Asm {
            volatile,
            templates,
        } => {
            let templates: Vec<String> = templates
                .iter()
                .map(|t| format!("\"{}\"", t.escape_default()))
                .collect();
            format!(
                "__asm__{}({});",
                if *volatile { " volatile" } else { "" },
                templates.join(" ")
            )
        }
        InstrKind::Nop(description) => format!("/* {} */;", description),
    }
}

fn label_to_string(l: &StmtLabel) -> String {
    match l {
        StmtLabel::Plain(name) => format!("{}:", name),
        StmtLabel::Case(e) => format!("case {}:", expr_to_string(e)),
        StmtLabel::CaseRange(lo, hi) => {
            format!("case {} ... {}:", expr_to_string(lo), expr_to_string(hi))
        }
        StmtLabel::Default => "default:".into(),
    }
}

fn is_empty_block(s: &Stmt) -> bool {
    matches!(&s.kind, StmtKind::Block(ss) if ss.is_empty()) && s.labels.is_empty()
}

fn write_stmt(out: &mut Vec<String>, s: &Stmt, depth: usize) {
    let pad = "  ".repeat(depth);
    for l in &s.labels {
        // Labels sit one level out
        out.push(format!("{}{}", "  ".repeat(depth.saturating_sub(1)), label_to_string(l)));
    }
    match &s.kind {
        StmtKind::Return(Some(e)) => out.push(format!("{}return {};", pad, expr_to_string(e))),
        StmtKind::Return(None) => out.push(format!("{}return;", pad)),
        StmtKind::Break => out.push(format!("{}break;", pad)),
        StmtKind::Continue => out.push(format!("{}continue;", pad)),
        StmtKind::Loop(body) => {
            out.push(format!("{}while (1) {{", pad));
            write_stmt(out, body, depth + 1);
            out.push(format!("{}}}", pad));
        }
        StmtKind::Block(ss) => {
            for s in ss {
                write_stmt(out, s, depth);
            }
        }
        StmtKind::InstrSequence(is) => {
            for i in is {
                out.push(format!("{}{}", pad, instr_to_string(i)));
            }
        }
        StmtKind::Branch {
            cond,
            then_branch,
            else_branch,
            ..
        } => {
            out.push(format!("{}if ({}) {{", pad, expr_to_string(cond)));
            write_stmt(out, then_branch, depth + 1);
            if is_empty_block(else_branch) {
                out.push(format!("{}}}", pad));
            } else {
                out.push(format!("{}}} else {{", pad));
                write_stmt(out, else_branch, depth + 1);
                out.push(format!("{}}}", pad));
            }
        }
        StmtKind::Goto(label) => out.push(format!("{}goto {};", pad, label)),
        StmtKind::ComputedGoto(e) => out.push(format!("{}goto *{};", pad, operand(e, 15))),
        StmtKind::Switch { selector, cases } => {
            out.push(format!("{}switch ({}) {{", pad, expr_to_string(selector)));
            write_stmt(out, cases, depth + 1);
            out.push(format!("{}}}", pad));
        }
    }
}

/// The statement, indented at `depth` levels, one line per statement or instruction.
pub fn stmt_to_string(s: &Stmt, depth: usize) -> String {
    let mut out = vec![];
    write_stmt(&mut out, s, depth);
    out.join("\n")
}

/// A lifted function as C: the composites its variables use, then the function itself.
#[derive(Debug)]
pub struct PrintableFunction<'a> {
    function: &'a LiftedFunction,
    /// Print the low-level body instead of the high-level one
    low_level: bool,
}

impl<'a> PrintableFunction<'a> {
    pub fn new(function: &'a LiftedFunction) -> Self {
        Self {
            function,
            low_level: false,
        }
    }

    pub fn low_level(function: &'a LiftedFunction) -> Self {
        Self {
            function,
            low_level: true,
        }
    }

    fn globals(&self) -> &GlobalSymbolTable {
        self.function.symbols.globals()
    }

    /// Keys of the composites mentioned by `t`.
    fn comp_keys(t: &Typ, keys: &mut Vec<usize>) {
        match t {
            Typ::Comp { ckey, .. } => keys.push(*ckey),
            Typ::Ptr(t) | Typ::Array(t, _) => Self::comp_keys(t, keys),
            Typ::Fun { ret, args, .. } => {
                Self::comp_keys(ret, keys);
                for a in args.iter().flatten() {
                    Self::comp_keys(&a.typ, keys);
                }
            }
            _ => {}
        }
    }

    fn return_type(&self) -> Typ {
        match self
            .globals()
            .global(&self.function.name)
            .and_then(|v| v.vtype().cloned())
        {
            Some(Typ::Fun { ret, .. }) => *ret,
            _ => Typ::Int(IKind::Int),
        }
    }
}

impl<'a> std::fmt::Display for PrintableFunction<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let symbols = &self.function.symbols;
        let locals: Vec<_> = symbols
            .local_symbols()
            .filter(|v| v.parameter.is_none())
            .collect();

        let mut queue: VecDeque<usize> = VecDeque::new();
        let mut keys = vec![];
        for v in symbols.formals().iter().chain(locals.iter().copied()) {
            if let Some(t) = v.vtype() {
                Self::comp_keys(t, &mut keys);
            }
        }
        queue.extend(keys);
        let mut printed: UnorderedSet<usize> = Default::default();
        while let Some(ckey) = queue.pop_front() {
            if !printed.insert(ckey) {
                continue;
            }
            let c = match self.globals().compinfo(ckey) {
                Some(c) => c,
                None => {
                    writeln!(f, "// composite {} is not defined", ckey)?;
                    continue;
                }
            };
            writeln!(
                f,
                "{} {} {{",
                if c.is_union { "union" } else { "struct" },
                c.name
            )?;
            for field in c.fields() {
                match field.byte_offset {
                    Some(off) => writeln!(
                        f,
                        "  {}; // offset {}",
                        declaration(&field.ftype, &field.name),
                        off
                    )?,
                    None => writeln!(f, "  {};", declaration(&field.ftype, &field.name))?,
                }
                let mut keys = vec![];
                Self::comp_keys(&field.ftype, &mut keys);
                queue.extend(keys);
            }
            writeln!(f, "}};")?;
            writeln!(f)?;
        }

        let params: Vec<String> = symbols
            .formals()
            .iter()
            .map(|v| match v.vtype() {
                Some(t) => declaration(t, &v.name),
                None => format!("int {}", v.name),
            })
            .collect();
        let params = if params.is_empty() {
            "void".to_string()
        } else {
            params.join(", ")
        };
        writeln!(
            f,
            "{} {{",
            declaration(&self.return_type(), &format!("{}({})", self.function.name, params))
        )?;
        for v in &locals {
            match (v.vtype(), &v.description) {
                (Some(t), _) => writeln!(f, "  {};", declaration(t, &v.name))?,
                (None, Some(d)) => writeln!(f, "  int {}; // {}", v.name, d)?,
                (None, None) => writeln!(f, "  int {};", v.name)?,
            }
        }
        if !locals.is_empty() {
            writeln!(f)?;
        }
        let body = if self.low_level {
            &self.function.low_body
        } else {
            &self.function.body
        };
        let body = stmt_to_string(body, 1);
        if !body.is_empty() {
            writeln!(f, "{}", body)?;
        }
        writeln!(f, "}}")
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::builder::AstBuilder;
    use crate::symbol_table::LocalSymbolTable;
    use std::sync::Arc;

    fn builder() -> AstBuilder {
        AstBuilder::new(LocalSymbolTable::new(
            Arc::new(GlobalSymbolTable::new()),
            "f",
        ))
    }

    #[test]
    fn declarators_nest() {
        let int = Typ::Int(IKind::Int);
        assert_eq!(declaration(&Typ::ptr(Typ::ptr(int.clone())), "p"), "int **p");
        let b = builder();
        let arr = Typ::Array(Box::new(int.clone()), Some(Box::new(b.mk_int_constant(4))));
        assert_eq!(declaration(&arr, "a"), "int a[4]");
        assert_eq!(declaration(&Typ::ptr(arr), "pa"), "int (*pa)[4]");
        let fun = Typ::Fun {
            ret: Box::new(int),
            args: Some(vec![]),
            varargs: false,
        };
        assert_eq!(declaration(&Typ::ptr(fun), "fp"), "int (*fp)(void)");
        assert_eq!(
            typ_to_string(&Typ::ptr(Typ::Comp {
                name: "hdr_t".into(),
                ckey: 1
            })),
            "struct hdr_t *"
        );
    }

    #[test]
    fn expressions_parenthesize_by_precedence() {
        let mut b = builder();
        let x = b.symbols_mut().register_vinfo("R0");
        let y = b.symbols_mut().register_vinfo("R1");
        let sum = b.mk_binary(
            BinOp::Plus,
            b.mk_vinfo_lval_expr(x.clone()),
            b.mk_int_constant(4),
        );
        let prod = b.mk_binary(BinOp::Mult, sum.clone(), b.mk_vinfo_lval_expr(y));
        assert_eq!(expr_to_string(&prod), "(R0 + 4) * R1");
        let deref = b.mk_lval_expr(b.mk_memref_lval(sum, Offset::None));
        assert_eq!(expr_to_string(&deref), "*(R0 + 4)");
        let arrow = b.mk_lval_expr(b.mk_memref_lval(
            b.mk_vinfo_lval_expr(x),
            b.mk_field_offset("len", 1, Offset::None),
        ));
        assert_eq!(expr_to_string(&arrow), "R0->len");
    }

    #[test]
    fn placeholders_render_with_their_reason() {
        let b = builder();
        let u = b.mk_unresolved_expr("unknown base");
        let lv = b.mk_memref_lval(u.clone(), Offset::None);
        let loc = b.mk_location();
        let i = b.mk_assign(lv, b.mk_int_constant(0), loc);
        assert_eq!(instr_to_string(&i), "*?unknown base? = 0;");
        let n = b.mk_nop("subsumed", loc);
        assert_eq!(instr_to_string(&n), "/* subsumed */;");
    }

    #[test]
    fn statements_indent_and_label() {
        let b = builder();
        let then = b.mk_goto("L_40");
        let br = b.mk_branch(
            b.mk_int_constant(1),
            then,
            b.mk_block(vec![], vec![]),
            Some(0x40),
            vec![StmtLabel::Plain("L_10".into())],
        );
        let ret = b.mk_return(None, vec![]);
        let body = b.mk_block(vec![br, ret], vec![]);
        assert_eq!(
            stmt_to_string(&body, 1),
            "L_10:\n  if (1) {\n    goto L_40;\n  }\n  return;"
        );
    }

    #[test]
    fn loops_and_switches_print_structured() {
        let mut b = builder();
        let x = b.symbols_mut().register_vinfo("R0");
        let lp = b.mk_loop(
            b.mk_block(vec![b.mk_continue(), b.mk_break()], vec![]),
            vec![],
        );
        assert_eq!(stmt_to_string(&lp, 0), "while (1) {\n  continue;\n  break;\n}");

        let asm = b.mk_asm(true, vec!["nop".into()], b.mk_location());
        let case = b.mk_instr_sequence(
            vec![asm],
            vec![StmtLabel::Case(b.mk_int_constant(1)), StmtLabel::Default],
        );
        let sw = b.mk_switch(
            b.mk_sizeof(Typ::Int(IKind::Int)),
            b.mk_block(vec![case], vec![]),
            vec![],
        );
        assert_eq!(
            stmt_to_string(&sw, 1),
            "  switch (sizeof(int)) {\n  case 1:\n  default:\n    __asm__ volatile(\"nop\");\n  }"
        );

        let jump = b.mk_computed_goto(b.mk_vinfo_lval_expr(x.clone()), vec![]);
        assert_eq!(stmt_to_string(&jump, 0), "goto *R0;");

        let q = b.mk_question(
            b.mk_vinfo_lval_expr(x),
            b.mk_float_constant(1.5, FKind::Float),
            b.mk_string_constant("hi", Some(0x800)),
        );
        assert_eq!(expr_to_string(&q), "R0 ? 1.5f : \"hi\"");
    }

    #[test]
    fn functions_print_with_their_composites() {
        let f = crate::tests::lifted_field_function();
        let text = PrintableFunction::new(&f).to_string();
        assert!(text.contains("struct hdr_t {"));
        assert!(text.contains("  unsigned int len; // offset 4"));
        assert!(text.contains("(struct hdr_t *p)"));
        assert!(text.trim_end().ends_with('}'));
    }
}
