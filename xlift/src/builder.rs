//! The per-function AST builder: mints node ids, owns the function's symbol table, and collects
//! provenance and diagnostics while a function is lifted.

use std::sync::Arc;

use crate::ast::*;
use crate::containers::unordered::UnorderedMap;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::log::*;
use crate::provenance::Provenance;
use crate::symbol_table::{GlobalSymbolTable, LocalSymbolTable};

/// Builds the AST of one function.
#[derive(Debug)]
pub struct AstBuilder {
    pub(crate) symbols: LocalSymbolTable,
    pub(crate) provenance: Provenance,
    pub(crate) diagnostics: Diagnostics,
    /// Temporaries, by the name they have in the facts
    pub(crate) tmps: UnorderedMap<String, Arc<VarInfo>>,
}

/// The result of lifting a function.
#[derive(Debug)]
pub struct LiftedFunction {
    pub name: String,
    /// The high-level statement tree.
    pub body: Stmt,
    /// The low-level statement tree, mirroring the instructions as executed.
    pub low_body: Stmt,
    pub symbols: LocalSymbolTable,
    pub provenance: Provenance,
    pub diagnostics: Diagnostics,
}

impl AstBuilder {
    pub fn new(symbols: LocalSymbolTable) -> Self {
        Self {
            symbols,
            provenance: Provenance::new(),
            diagnostics: Diagnostics::new(),
            tmps: Default::default(),
        }
    }

    pub fn symbols(&self) -> &LocalSymbolTable {
        &self.symbols
    }

    pub fn symbols_mut(&mut self) -> &mut LocalSymbolTable {
        &mut self.symbols
    }

    pub fn globals(&self) -> Arc<GlobalSymbolTable> {
        self.symbols.globals().clone()
    }

    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn report(&mut self, site: Option<u64>, kind: DiagnosticKind, message: impl Into<String>) {
        self.diagnostics.report(site, kind, message)
    }

    pub fn add_instr_mapping(&mut self, low: &Instr, high: &Instr, site: Option<u64>) {
        self.provenance
            .add_instr_mapping(low, high, site, &mut self.diagnostics);
    }

    pub fn add_expr_mapping(&mut self, low: &Expr, high: &Expr, site: Option<u64>) {
        self.provenance
            .add_expr_mapping(low, high, site, &mut self.diagnostics);
    }

    pub fn add_lval_mapping(&mut self, low: &Lval, high: &Lval, site: Option<u64>) {
        self.provenance
            .add_lval_mapping(low, high, site, &mut self.diagnostics);
    }

    /// The variable for a temporary of the facts; the same temporary always gets the same
    /// variable.
    pub fn tmp_vinfo(&mut self, name: &str, t: Option<Typ>) -> Arc<VarInfo> {
        if let Some(v) = self.tmps.get(name) {
            return v.clone();
        }
        let v = self.symbols.fresh_tmp(t);
        self.tmps.insert(name.to_string(), v.clone());
        v
    }

    pub fn mk_location(&self) -> LocationId {
        LocationId::fresh()
    }

    fn expr(kind: ExprKind) -> Expr {
        Expr {
            id: ExprId::fresh(),
            kind,
        }
    }

    pub fn mk_integer_constant(&self, value: i64, ikind: IKind) -> Expr {
        Self::expr(ExprKind::IntConstant { value, ikind })
    }

    pub fn mk_int_constant(&self, value: i64) -> Expr {
        self.mk_integer_constant(value, IKind::Int)
    }

    pub fn mk_float_constant(&self, value: f64, fkind: FKind) -> Expr {
        Self::expr(ExprKind::FloatConstant { value, fkind })
    }

    pub fn mk_global_address_constant(&self, value: i64, address_expr: Expr) -> Expr {
        Self::expr(ExprKind::GlobalAddressConstant {
            value,
            address_expr: Box::new(address_expr),
        })
    }

    pub fn mk_string_constant(&self, value: &str, address: Option<u64>) -> Expr {
        Self::expr(ExprKind::StringConstant {
            value: value.to_string(),
            address,
        })
    }

    pub fn mk_lval(&self, lhost: Lhost, offset: Offset) -> Lval {
        Lval {
            id: LvalId::fresh(),
            lhost,
            offset,
        }
    }

    pub fn mk_vinfo_lval(&self, v: Arc<VarInfo>, offset: Offset) -> Lval {
        self.mk_lval(Lhost::Var(v), offset)
    }

    pub fn mk_memref_lval(&self, address: Expr, offset: Offset) -> Lval {
        self.mk_lval(Lhost::Mem(Box::new(address)), offset)
    }

    pub fn mk_lval_expr(&self, lval: Lval) -> Expr {
        Self::expr(ExprKind::Lval(lval))
    }

    pub fn mk_vinfo_lval_expr(&self, v: Arc<VarInfo>) -> Expr {
        self.mk_lval_expr(self.mk_vinfo_lval(v, Offset::None))
    }

    pub fn mk_address_of(&self, lval: Lval) -> Expr {
        Self::expr(ExprKind::AddressOf(lval))
    }

    pub fn mk_sizeof(&self, t: Typ) -> Expr {
        Self::expr(ExprKind::SizeOf(t))
    }

    pub fn mk_cast(&self, t: Typ, e: Expr) -> Expr {
        Self::expr(ExprKind::Cast(t, Box::new(e)))
    }

    pub fn mk_unary(&self, op: UnOp, e: Expr) -> Expr {
        Self::expr(ExprKind::Unary(op, Box::new(e)))
    }

    pub fn mk_binary(&self, op: BinOp, a: Expr, b: Expr) -> Expr {
        Self::expr(ExprKind::Binary(op, Box::new(a), Box::new(b)))
    }

    pub fn mk_question(&self, c: Expr, a: Expr, b: Expr) -> Expr {
        Self::expr(ExprKind::Question(Box::new(c), Box::new(a), Box::new(b)))
    }

    /// A placeholder expression. Callers report the matching diagnostic.
    pub fn mk_unresolved_expr(&self, reason: impl Into<String>) -> Expr {
        Self::expr(ExprKind::Unresolved {
            reason: reason.into(),
        })
    }

    pub fn mk_field_offset(&self, name: &str, ckey: usize, sub: Offset) -> Offset {
        Offset::Field {
            name: name.to_string(),
            ckey,
            sub: Box::new(sub),
        }
    }

    pub fn mk_index_offset(&self, index: Expr, sub: Offset) -> Offset {
        Offset::Index {
            index: Box::new(index),
            sub: Box::new(sub),
        }
    }

    pub fn mk_unresolved_offset(&self, reason: impl Into<String>) -> Offset {
        Offset::Unresolved {
            reason: reason.into(),
        }
    }

    fn instr(location: LocationId, kind: InstrKind) -> Instr {
        Instr {
            id: InstrId::fresh(),
            location,
            kind,
        }
    }

    pub fn mk_assign(&self, lval: Lval, e: Expr, location: LocationId) -> Instr {
        Self::instr(location, InstrKind::Assign(lval, e))
    }

    pub fn mk_call(
        &self,
        lval: Option<Lval>,
        target: Expr,
        args: Vec<Expr>,
        location: LocationId,
    ) -> Instr {
        Self::instr(location, InstrKind::Call { lval, target, args })
    }

    pub fn mk_asm(&self, volatile: bool, templates: Vec<String>, location: LocationId) -> Instr {
        Self::instr(
            location,
            InstrKind::Asm {
                volatile,
                templates,
            },
        )
    }

    pub fn mk_nop(&self, description: &str, location: LocationId) -> Instr {
        Self::instr(location, InstrKind::Nop(description.to_string()))
    }

    fn stmt(kind: StmtKind, labels: Vec<StmtLabel>) -> Stmt {
        Stmt {
            id: StmtId::fresh(),
            location: LocationId::fresh(),
            labels,
            kind,
        }
    }

    pub fn mk_instr_sequence(&self, instrs: Vec<Instr>, labels: Vec<StmtLabel>) -> Stmt {
        Self::stmt(StmtKind::InstrSequence(instrs), labels)
    }

    pub fn mk_block(&self, stmts: Vec<Stmt>, labels: Vec<StmtLabel>) -> Stmt {
        Self::stmt(StmtKind::Block(stmts), labels)
    }

    pub fn mk_return(&self, e: Option<Expr>, labels: Vec<StmtLabel>) -> Stmt {
        Self::stmt(StmtKind::Return(e), labels)
    }

    pub fn mk_break(&self) -> Stmt {
        Self::stmt(StmtKind::Break, vec![])
    }

    pub fn mk_continue(&self) -> Stmt {
        Self::stmt(StmtKind::Continue, vec![])
    }

    pub fn mk_loop(&self, body: Stmt, labels: Vec<StmtLabel>) -> Stmt {
        Self::stmt(StmtKind::Loop(Box::new(body)), labels)
    }

    pub fn mk_branch(
        &self,
        cond: Expr,
        then_branch: Stmt,
        else_branch: Stmt,
        target_address: Option<u64>,
        labels: Vec<StmtLabel>,
    ) -> Stmt {
        Self::stmt(
            StmtKind::Branch {
                cond,
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
                target_address,
            },
            labels,
        )
    }

    pub fn mk_goto(&self, label: &str) -> Stmt {
        Self::stmt(StmtKind::Goto(label.to_string()), vec![])
    }

    pub fn mk_computed_goto(&self, target: Expr, labels: Vec<StmtLabel>) -> Stmt {
        Self::stmt(StmtKind::ComputedGoto(target), labels)
    }

    pub fn mk_switch(&self, selector: Expr, cases: Stmt, labels: Vec<StmtLabel>) -> Stmt {
        Self::stmt(
            StmtKind::Switch {
                selector,
                cases: Box::new(cases),
            },
            labels,
        )
    }

    /// Finish the lift: resolve the dataflow annotations against the instructions, and hand
    /// everything back.
    pub fn finish(mut self, body: Stmt, low_body: Stmt) -> LiftedFunction {
        self.provenance.resolve(&mut self.diagnostics);
        let name = self.symbols.function_name().to_string();
        info!("Finished lifting function";
              "function" => &name,
              "instructions" => body.instructions().len(),
              "diagnostics" => self.diagnostics.len());
        LiftedFunction {
            name,
            body,
            low_body,
            symbols: self.symbols,
            provenance: self.provenance,
            diagnostics: self.diagnostics,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn builder() -> AstBuilder {
        AstBuilder::new(LocalSymbolTable::new(
            Arc::new(GlobalSymbolTable::new()),
            "f",
        ))
    }

    #[test]
    fn constructors_mint_fresh_ids() {
        let b = builder();
        let a = b.mk_int_constant(1);
        let c = b.mk_int_constant(1);
        assert_ne!(a.id, c.id);
        assert_eq!(a, c);
    }

    #[test]
    fn temporaries_are_stable_per_name() {
        let mut b = builder();
        let t1 = b.tmp_vinfo("t#1", None);
        let t2 = b.tmp_vinfo("t#1", None);
        let t3 = b.tmp_vinfo("t#2", None);
        assert!(Arc::ptr_eq(&t1, &t2));
        assert_eq!((t1.name.as_str(), t3.name.as_str()), ("tmp1", "tmp2"));
    }

    #[test]
    fn finishing_hands_back_the_trees() {
        let b = builder();
        let loc = b.mk_location();
        let i = b.mk_nop("skipped", loc);
        let body = b.mk_instr_sequence(vec![i], vec![]);
        let low = b.mk_block(vec![], vec![]);
        let f = b.finish(body, low);
        assert_eq!(f.name, "f");
        assert_eq!(f.body.instructions().len(), 1);
        assert!(f.diagnostics.is_empty());
    }
}
