//! Provenance: the bookkeeping that ties the high-level AST back to the low-level AST, and both of
//! them back to originating instruction addresses and upstream dataflow facts.
//!
//! All tables are keyed by node ids, and are scoped to one function lift. Recording never fails;
//! looking up something that was never recorded gives `None` (or an empty slice).

use crate::ast::{Expr, ExprId, Instr, InstrId, InstrKind, Lval, LvalId};
use crate::containers::unordered::{UnorderedMap, UnorderedSet};
use crate::containers::OrderedMultiMap;
use crate::dataflow::VarInvariantFact;
use crate::diagnostics::{DiagnosticKind, Diagnostics};
use crate::lift_config::CONFIG;
use crate::log::*;

/// A mapping from low-level nodes to the high-level node they correspond to.
///
/// Each low-level node has at most one high-level counterpart; a high-level node may stand for
/// several low-level nodes (e.g. a single C assignment for a multi-instruction idiom).
#[derive(Clone, Debug)]
pub struct NodeMapping<K: Copy + Eq + std::hash::Hash + Ord + std::fmt::Display> {
    name: &'static str,
    high_of: UnorderedMap<K, K>,
    lows_of: OrderedMultiMap<K, K>,
}

impl<K: Copy + Eq + std::hash::Hash + Ord + std::fmt::Display> NodeMapping<K> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            high_of: Default::default(),
            lows_of: Default::default(),
        }
    }

    /// Map `low` to `high`. If `low` was already mapped elsewhere, the old mapping is replaced
    /// and a diagnostic is reported.
    pub fn register(&mut self, low: K, high: K, site: Option<u64>, diags: &mut Diagnostics) {
        if let Some(prev) = self.high_of.insert(low, high) {
            if prev == high {
                return;
            }
            self.lows_of.remove_value(&prev, &low);
            diags.report(
                site,
                DiagnosticKind::ProvenanceOverwrite,
                format!(
                    "{} {} was mapped to {}, now mapped to {}",
                    self.name, low, prev, high
                ),
            );
        }
        self.lows_of.add(high, low);
    }

    pub fn high(&self, low: K) -> Option<K> {
        self.high_of.get(&low).copied()
    }

    pub fn lows(&self, high: K) -> &[K] {
        self.lows_of.get(&high)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &K)> {
        self.high_of.iter()
    }

    pub fn len(&self) -> usize {
        self.high_of.len()
    }

    pub fn is_empty(&self) -> bool {
        self.high_of.is_empty()
    }
}

/// A range of bytes in the binary.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ByteSpan {
    pub address: u64,
    pub size: u64,
}

impl std::fmt::Display for ByteSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#x}+{}", self.address, self.size)
    }
}

#[derive(Clone, Debug)]
pub struct Provenance {
    pub instrs: NodeMapping<InstrId>,
    pub exprs: NodeMapping<ExprId>,
    pub lvals: NodeMapping<LvalId>,

    expr_rdefs: UnorderedMap<ExprId, Vec<VarInvariantFact>>,
    flag_expr_rdefs: UnorderedMap<ExprId, Vec<VarInvariantFact>>,
    lval_defuses: UnorderedMap<LvalId, VarInvariantFact>,
    lval_defuses_high: UnorderedMap<LvalId, VarInvariantFact>,
    defuses_high_inactivated: OrderedMultiMap<LvalId, String>,
    lval_stores: UnorderedSet<LvalId>,

    instr_spans: UnorderedMap<InstrId, ByteSpan>,
    instr_addresses: UnorderedMap<InstrId, Vec<u64>>,
    address_instrs: OrderedMultiMap<u64, InstrId>,
    condition_addresses: UnorderedMap<ExprId, Vec<u64>>,

    instructions: UnorderedMap<InstrId, Instr>,
    expressions: UnorderedMap<ExprId, Expr>,
    lvalues: UnorderedMap<LvalId, Lval>,

    // Filled in by `resolve`
    reaching_definitions: OrderedMultiMap<ExprId, InstrId>,
    flag_reaching_definitions: OrderedMultiMap<ExprId, InstrId>,
    definitions_used: OrderedMultiMap<LvalId, InstrId>,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            instrs: NodeMapping::new("instruction"),
            exprs: NodeMapping::new("expression"),
            lvals: NodeMapping::new("lvalue"),
            expr_rdefs: Default::default(),
            flag_expr_rdefs: Default::default(),
            lval_defuses: Default::default(),
            lval_defuses_high: Default::default(),
            defuses_high_inactivated: Default::default(),
            lval_stores: Default::default(),
            instr_spans: Default::default(),
            instr_addresses: Default::default(),
            address_instrs: Default::default(),
            condition_addresses: Default::default(),
            instructions: Default::default(),
            expressions: Default::default(),
            lvalues: Default::default(),
            reaching_definitions: Default::default(),
            flag_reaching_definitions: Default::default(),
            definitions_used: Default::default(),
        }
    }
}

impl Provenance {
    pub fn new() -> Self {
        Self::default()
    }

    fn keep_instr(&mut self, i: &Instr) {
        self.instructions.entry(i.id).or_insert_with(|| i.clone());
    }

    fn keep_expr(&mut self, e: &Expr) {
        self.expressions.entry(e.id).or_insert_with(|| e.clone());
    }

    fn keep_lval(&mut self, l: &Lval) {
        self.lvalues.entry(l.id).or_insert_with(|| l.clone());
    }

    pub fn add_instr_mapping(
        &mut self,
        low: &Instr,
        high: &Instr,
        site: Option<u64>,
        diags: &mut Diagnostics,
    ) {
        self.instrs.register(low.id, high.id, site, diags);
        self.keep_instr(low);
        self.keep_instr(high);
    }

    pub fn add_expr_mapping(
        &mut self,
        low: &Expr,
        high: &Expr,
        site: Option<u64>,
        diags: &mut Diagnostics,
    ) {
        self.exprs.register(low.id, high.id, site, diags);
        self.keep_expr(low);
        self.keep_expr(high);
    }

    pub fn add_lval_mapping(
        &mut self,
        low: &Lval,
        high: &Lval,
        site: Option<u64>,
        diags: &mut Diagnostics,
    ) {
        self.lvals.register(low.id, high.id, site, diags);
        self.keep_lval(low);
        self.keep_lval(high);
    }

    /// Attach reaching definitions to an expression. Empty lists are not recorded.
    pub fn add_expr_reaching_defs(&mut self, e: &Expr, rdefs: Vec<VarInvariantFact>) {
        if !rdefs.is_empty() {
            self.expr_rdefs.insert(e.id, rdefs);
            self.keep_expr(e);
        }
    }

    pub fn add_flag_expr_reaching_defs(&mut self, e: &Expr, rdefs: Vec<VarInvariantFact>) {
        if !rdefs.is_empty() {
            self.flag_expr_rdefs.insert(e.id, rdefs);
            self.keep_expr(e);
        }
    }

    pub fn add_lval_defuses(&mut self, l: &Lval, defuse: Option<VarInvariantFact>) {
        if let Some(d) = defuse {
            self.lval_defuses.insert(l.id, d);
            self.keep_lval(l);
        }
    }

    pub fn add_lval_defuses_high(&mut self, l: &Lval, defuse: Option<VarInvariantFact>) {
        if let Some(d) = defuse {
            self.lval_defuses_high.insert(l.id, d);
            self.keep_lval(l);
        }
    }

    /// Mark the high-level use of `l` at `location` as gone (e.g. after it was inlined by a
    /// consumer).
    pub fn inactivate_lval_defuse_high(&mut self, l: LvalId, location: &str) {
        self.defuses_high_inactivated.add(l, location.to_string());
    }

    /// Record that `l` is the target of a store to memory.
    pub fn add_lval_store(&mut self, l: &Lval) {
        self.lval_stores.insert(l.id);
        self.keep_lval(l);
    }

    pub fn add_instr_span(&mut self, i: &Instr, span: ByteSpan) {
        self.instr_spans.insert(i.id, span);
        self.keep_instr(i);
    }

    /// Record the originating addresses of an instruction.
    pub fn add_instr_addresses(&mut self, i: &Instr, addresses: Vec<u64>) {
        for a in addresses.iter() {
            self.address_instrs.add(*a, i.id);
        }
        self.instr_addresses.insert(i.id, addresses);
        self.keep_instr(i);
    }

    pub fn add_condition_addresses(&mut self, e: &Expr, addresses: Vec<u64>) {
        self.condition_addresses.insert(e.id, addresses);
        self.keep_expr(e);
    }

    pub fn instruction(&self, id: InstrId) -> Option<&Instr> {
        self.instructions.get(&id)
    }

    pub fn expression(&self, id: ExprId) -> Option<&Expr> {
        self.expressions.get(&id)
    }

    pub fn lvalue(&self, id: LvalId) -> Option<&Lval> {
        self.lvalues.get(&id)
    }

    /// The high-level instruction that `low` was lifted to.
    pub fn high_instruction(&self, low: InstrId) -> Option<&Instr> {
        self.instrs.high(low).and_then(|h| self.instruction(h))
    }

    /// The low-level instructions that `high` stands for.
    pub fn low_instructions(&self, high: InstrId) -> Vec<&Instr> {
        self.instrs
            .lows(high)
            .iter()
            .filter_map(|l| self.instruction(*l))
            .collect()
    }

    pub fn high_expression(&self, low: ExprId) -> Option<&Expr> {
        self.exprs.high(low).and_then(|h| self.expression(h))
    }

    pub fn high_lvalue(&self, low: LvalId) -> Option<&Lval> {
        self.lvals.high(low).and_then(|h| self.lvalue(h))
    }

    pub fn instr_span(&self, i: InstrId) -> Option<ByteSpan> {
        self.instr_spans.get(&i).copied()
    }

    pub fn instr_addresses(&self, i: InstrId) -> Option<&[u64]> {
        self.instr_addresses.get(&i).map(|v| &v[..])
    }

    pub fn instrs_at_address(&self, address: u64) -> &[InstrId] {
        self.address_instrs.get(&address)
    }

    pub fn condition_addresses(&self, e: ExprId) -> Option<&[u64]> {
        self.condition_addresses.get(&e).map(|v| &v[..])
    }

    pub fn reaching_defs(&self, e: ExprId) -> Option<&[VarInvariantFact]> {
        self.expr_rdefs.get(&e).map(|v| &v[..])
    }

    pub fn flag_reaching_defs(&self, e: ExprId) -> Option<&[VarInvariantFact]> {
        self.flag_expr_rdefs.get(&e).map(|v| &v[..])
    }

    pub fn lval_defuse(&self, l: LvalId) -> Option<&VarInvariantFact> {
        self.lval_defuses.get(&l)
    }

    pub fn lval_defuse_high(&self, l: LvalId) -> Option<&VarInvariantFact> {
        self.lval_defuses_high.get(&l)
    }

    /// Whether some high-level use of `l` has not been inactivated.
    pub fn has_active_lval_defuse_high(&self, l: LvalId) -> bool {
        let inactive = self.defuses_high_inactivated.get(&l);
        self.lval_defuses_high
            .get(&l)
            .map(|d| {
                d.vardefuse()
                    .locations
                    .iter()
                    .any(|loc| !inactive.contains(loc))
            })
            .unwrap_or(false)
    }

    pub fn is_lval_store(&self, l: LvalId) -> bool {
        self.lval_stores.contains(&l)
    }

    /// Instructions that define the value of `e`; available after [`Self::resolve`].
    pub fn reaching_definitions(&self, e: ExprId) -> &[InstrId] {
        self.reaching_definitions.get(&e)
    }

    pub fn flag_reaching_definitions(&self, e: ExprId) -> &[InstrId] {
        self.flag_reaching_definitions.get(&e)
    }

    /// Instructions that use the definition of `l`; available after [`Self::resolve`].
    pub fn definitions_used(&self, l: LvalId) -> &[InstrId] {
        self.definitions_used.get(&l)
    }

    /// Turn the address-based dataflow annotations into instruction-to-instruction links, using
    /// the recorded instruction addresses. Addresses with no instruction are diagnosed.
    pub fn resolve(&mut self, diags: &mut Diagnostics) {
        let mut rdefs = OrderedMultiMap::new();
        for (xid, facts) in self.expr_rdefs.iter() {
            for fact in facts {
                let v = fact.variable();
                let vname = v.register().unwrap_or(&v.name);
                for addr in fact.vardefuse().addresses() {
                    for iid in self.address_instrs.get(&addr) {
                        if self.defines(*iid, vname) {
                            rdefs.add(*xid, *iid);
                        }
                    }
                }
            }
        }
        self.reaching_definitions = rdefs;

        let mut frdefs = OrderedMultiMap::new();
        for (xid, facts) in self.flag_expr_rdefs.iter() {
            for fact in facts {
                for addr in fact.vardefuse().addresses() {
                    let iids = self.address_instrs.get(&addr);
                    if iids.is_empty() {
                        diags.report(
                            Some(addr),
                            DiagnosticKind::UnresolvedValue,
                            "flag reaching definition: no instruction at address",
                        );
                    }
                    for iid in iids {
                        frdefs.add(*xid, *iid);
                    }
                }
            }
        }
        self.flag_reaching_definitions = frdefs;

        let mut used = OrderedMultiMap::new();
        let defuses = self
            .lval_defuses
            .iter()
            .map(|(l, d)| (l, d, "def-use"))
            .chain(
                self.lval_defuses_high
                    .iter()
                    .map(|(l, d)| (l, d, "def-use-high")),
            );
        for (lid, fact, what) in defuses {
            // Uses at "exit" are not instructions
            for addr in fact.vardefuse().addresses() {
                let iids = self.address_instrs.get(&addr);
                if iids.is_empty() {
                    diags.report(
                        Some(addr),
                        DiagnosticKind::UnresolvedValue,
                        format!("{}: no instruction at address", what),
                    );
                }
                for iid in iids {
                    used.add(*lid, *iid);
                }
            }
        }
        self.definitions_used = used;
        debug!("Resolved provenance";
               "reaching_definitions" => self.reaching_definitions.len(),
               "flag_reaching_definitions" => self.flag_reaching_definitions.len(),
               "definitions_used" => self.definitions_used.len());
    }

    /// Whether instruction `iid` assigns to the variable named `vname`. Calls also define the
    /// return-value registers.
    fn defines(&self, iid: InstrId, vname: &str) -> bool {
        let named = |lv: &Lval| lv.vinfo().map(|v| v.name == vname).unwrap_or(false);
        match self.instruction(iid).map(|i| &i.kind) {
            Some(InstrKind::Assign(lv, _)) => named(lv),
            Some(InstrKind::Call { lval, .. }) => {
                lval.as_ref().map(named).unwrap_or(false) || CONFIG.is_return_value_register(vname)
            }
            _ => false,
        }
    }

    /// Write a `.dot` graph of the instruction mapping: each low-level instruction points to the
    /// high-level instruction it was lifted to.
    pub fn write_dot(&self, w: &mut impl std::io::Write) -> std::io::Result<()> {
        type Node = InstrId;
        type Edge = (Node, Node, String);

        struct Graph<'a> {
            prov: &'a Provenance,
        }

        impl<'a> dot::Labeller<'a, Node, Edge> for Graph<'a> {
            fn graph_id(&'a self) -> dot::Id<'a> {
                dot::Id::new("Provenance").expect("valid graph id")
            }
            fn node_id(&'a self, n: &Node) -> dot::Id<'a> {
                dot::Id::new(format!("i{}", n)).expect("valid node id")
            }
            fn node_label<'b>(&'b self, n: &Node) -> dot::LabelText<'b> {
                let addrs = self
                    .prov
                    .instr_addresses(*n)
                    .map(|a| itertools::join(a.iter().map(|a| format!("{:#x}", a)), ","))
                    .unwrap_or_default();
                let text = self
                    .prov
                    .instruction(*n)
                    .map(|i| crate::c_printer::instr_to_string(i))
                    .unwrap_or_else(|| format!("instr {}", n));
                dot::LabelText::label(format!("{} [{}]\n{}", n, addrs, text))
            }
            fn node_shape(&'a self, n: &Node) -> Option<dot::LabelText<'a>> {
                if self.prov.instrs.lows(*n).is_empty() {
                    None
                } else {
                    Some(dot::LabelText::label("box"))
                }
            }
            fn edge_label<'b>(&'b self, e: &Edge) -> dot::LabelText<'b> {
                dot::LabelText::label(e.2.clone())
            }
        }

        impl<'a> dot::GraphWalk<'a, Node, Edge> for Graph<'a> {
            fn nodes(&self) -> dot::Nodes<'a, Node> {
                let mut ns: Vec<Node> = self
                    .prov
                    .instrs
                    .iter()
                    .flat_map(|(l, h)| [*l, *h])
                    .collect();
                ns.sort();
                ns.dedup();
                ns.into()
            }
            fn edges(&'a self) -> dot::Edges<'a, Edge> {
                self.prov
                    .instrs
                    .iter()
                    .map(|(l, h)| (*l, *h, "lifted".to_string()))
                    .collect::<Vec<_>>()
                    .into()
            }
            fn source(&self, e: &Edge) -> Node {
                e.0
            }
            fn target(&self, e: &Edge) -> Node {
                e.1
            }
        }

        dot::render(&Graph { prov: self }, w)
    }

    /// Generate a `.dot` graph of the instruction mapping
    pub fn generate_dot(&self) -> String {
        let mut s: Vec<u8> = vec![];
        if let Err(e) = self.write_dot(&mut s) {
            error!("Could not render provenance graph"; "error" => %e);
        }
        String::from_utf8_lossy(&s).into_owned()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::{IKind, LocationId, VarInfo};
    use crate::dataflow::VarDefUse;
    use crate::xvalue::{VarDenotation, XVariable};
    use std::sync::Arc;

    fn nop(s: &str) -> Instr {
        Instr {
            id: InstrId::fresh(),
            location: LocationId::fresh(),
            kind: InstrKind::Nop(s.into()),
        }
    }

    fn assign_to(name: &str) -> Instr {
        Instr {
            id: InstrId::fresh(),
            location: LocationId::fresh(),
            kind: InstrKind::Assign(
                Lval {
                    id: LvalId::fresh(),
                    lhost: crate::ast::Lhost::Var(Arc::new(VarInfo::new(name, None))),
                    offset: crate::ast::Offset::None,
                },
                Expr {
                    id: ExprId::fresh(),
                    kind: crate::ast::ExprKind::IntConstant {
                        value: 1,
                        ikind: IKind::Int,
                    },
                },
            ),
        }
    }

    #[test]
    fn mappings_are_found_both_ways() {
        let mut p = Provenance::new();
        let mut ds = Diagnostics::new();
        let (lo1, lo2, hi) = (nop("a"), nop("b"), nop("c"));
        p.add_instr_mapping(&lo1, &hi, None, &mut ds);
        p.add_instr_mapping(&lo2, &hi, None, &mut ds);
        assert_eq!(p.high_instruction(lo1.id).map(|i| i.id), Some(hi.id));
        assert_eq!(p.instrs.lows(hi.id), &[lo1.id, lo2.id]);
        assert!(ds.is_empty());
        assert!(p.high_instruction(hi.id).is_none());
    }

    #[test]
    fn remapping_a_low_node_overwrites_with_one_diagnostic() {
        let mut p = Provenance::new();
        let mut ds = Diagnostics::new();
        let (lo, hi1, hi2) = (nop("a"), nop("b"), nop("c"));
        p.add_instr_mapping(&lo, &hi1, Some(0x40), &mut ds);
        p.add_instr_mapping(&lo, &hi1, Some(0x40), &mut ds);
        assert!(ds.is_empty());
        p.add_instr_mapping(&lo, &hi2, Some(0x40), &mut ds);
        assert_eq!(ds.of_kind(DiagnosticKind::ProvenanceOverwrite).count(), 1);
        assert_eq!(p.instrs.high(lo.id), Some(hi2.id));
        assert!(p.instrs.lows(hi1.id).is_empty());
        assert_eq!(p.instrs.lows(hi2.id), &[lo.id]);
    }

    #[test]
    fn reaching_definitions_resolve_through_addresses() {
        let mut p = Provenance::new();
        let mut ds = Diagnostics::new();
        let def = assign_to("R0");
        let other = assign_to("R1");
        p.add_instr_addresses(&def, vec![0x10]);
        p.add_instr_addresses(&other, vec![0x10]);
        let use_expr = Expr {
            id: ExprId::fresh(),
            kind: crate::ast::ExprKind::Unresolved { reason: "x".into() },
        };
        let r0 = XVariable {
            name: "R0".into(),
            seqnr: 1,
            denotation: Some(VarDenotation::Register("R0".into())),
        };
        p.add_expr_reaching_defs(
            &use_expr,
            vec![VarInvariantFact::ReachingDef(VarDefUse {
                variable: r0,
                locations: vec!["0x10".into()],
            })],
        );
        assert_eq!(p.instrs_at_address(0x10), &[def.id, other.id]);
        assert!(p.instrs_at_address(0x14).is_empty());
        p.resolve(&mut ds);
        assert_eq!(p.reaching_definitions(use_expr.id), &[def.id]);
        assert!(ds.is_empty());
    }

    #[test]
    fn missing_use_addresses_are_diagnosed() {
        let mut p = Provenance::new();
        let mut ds = Diagnostics::new();
        let def = assign_to("R0");
        let lv = def.kind.clone();
        let lv = match lv {
            InstrKind::Assign(lv, _) => lv,
            _ => unreachable!(),
        };
        let r0 = XVariable {
            name: "R0".into(),
            seqnr: 1,
            denotation: Some(VarDenotation::Register("R0".into())),
        };
        p.add_lval_defuses_high(
            &lv,
            Some(VarInvariantFact::DefUseHigh(VarDefUse {
                variable: r0,
                locations: vec!["0x20".into(), "exit".into()],
            })),
        );
        assert!(p.has_active_lval_defuse_high(lv.id));
        assert!(p.lval_defuse_high(lv.id).is_some());
        assert!(p.lval_defuse(lv.id).is_none());
        p.resolve(&mut ds);
        assert_eq!(ds.len(), 1);
        p.inactivate_lval_defuse_high(lv.id, "0x20");
        p.inactivate_lval_defuse_high(lv.id, "exit");
        assert!(!p.has_active_lval_defuse_high(lv.id));
    }

    #[test]
    fn expression_and_lvalue_mappings_keep_their_nodes() {
        let mut p = Provenance::new();
        let mut ds = Diagnostics::new();
        let (lo, hi) = match (assign_to("R0").kind, assign_to("x").kind) {
            (InstrKind::Assign(ll, le), InstrKind::Assign(hl, he)) => ((ll, le), (hl, he)),
            _ => unreachable!(),
        };
        p.add_lval_mapping(&lo.0, &hi.0, Some(0x20), &mut ds);
        p.add_expr_mapping(&lo.1, &hi.1, Some(0x20), &mut ds);
        p.add_lval_store(&hi.0);
        assert_eq!(p.high_lvalue(lo.0.id), Some(&hi.0));
        assert_eq!(p.high_expression(lo.1.id), Some(&hi.1));
        assert!(p.high_expression(hi.1.id).is_none());
        assert!(p.is_lval_store(hi.0.id));
        assert!(!p.is_lval_store(lo.0.id));
        assert!(ds.is_empty());
    }

    #[test]
    fn dot_output_names_mapped_instructions() {
        let mut p = Provenance::new();
        let mut ds = Diagnostics::new();
        let (lo, hi) = (nop("low"), nop("high"));
        p.add_instr_mapping(&lo, &hi, None, &mut ds);
        let dot = p.generate_dot();
        assert!(dot.starts_with("digraph Provenance"));
        assert!(dot.contains(&format!("i{} -> i{}", lo.id, hi.id)));
    }
}
