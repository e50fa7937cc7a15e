use std::sync::Arc;

use crate::ast::*;
use crate::builder::{AstBuilder, LiftedFunction};
use crate::dataflow::{VarDefUse, VarInvariantFact};
use crate::diagnostics::DiagnosticKind;
use crate::dictionary::{FnXprDictionary, Strings, Types};
use crate::fact_loader;
use crate::instr_xdata::{DecodeContext, InstrXData, XFact};
use crate::interned::{IndexedRecord, TaggedArgs};
use crate::lifter::{self, ProgramFacts};
use crate::symbol_table::{GlobalSymbolTable, LocalSymbolTable, ParameterLocation};
use crate::xvalue::*;

pub fn empty_builder() -> AstBuilder {
    AstBuilder::new(LocalSymbolTable::new(
        Arc::new(GlobalSymbolTable::new()),
        "f",
    ))
}

pub fn register_xvar(name: &str) -> XVariable {
    XVariable {
        name: name.to_string(),
        seqnr: 1,
        denotation: Some(VarDenotation::Register(name.to_string())),
    }
}

pub fn initial_register_xvar(register: &str) -> XVariable {
    XVariable {
        name: format!("{}_in", register),
        seqnr: 1,
        denotation: Some(VarDenotation::Auxiliary(
            ConstantValueVariable::InitialRegisterValue {
                register: register.to_string(),
                level: 0,
            },
        )),
    }
}

pub fn return_value_xvar(callsite: u64) -> XVariable {
    XVariable {
        name: format!("rtn_{:x}", callsite),
        seqnr: 1,
        denotation: Some(VarDenotation::Auxiliary(
            ConstantValueVariable::FunctionReturnValue {
                callsite,
                target: None,
            },
        )),
    }
}

pub fn memory_xvar(name: &str, base: MemoryBase, offset: MemoryOffset) -> XVariable {
    XVariable {
        name: name.to_string(),
        seqnr: 1,
        denotation: Some(VarDenotation::Memory {
            base,
            size: 4,
            offset,
        }),
    }
}

fn uint() -> Typ {
    Typ::Int(IKind::UInt)
}

pub fn hdr_t() -> Typ {
    Typ::Comp {
        name: "hdr_t".into(),
        ckey: 1,
    }
}

fn field(name: &str, ftype: Typ, offset: i64) -> FieldInfo {
    FieldInfo {
        name: name.to_string(),
        ftype,
        byte_offset: Some(offset),
    }
}

/// Globals with `struct hdr_t { unsigned int hdr; unsigned int len; }`
pub fn globals_with_hdr() -> Arc<GlobalSymbolTable> {
    let g = GlobalSymbolTable::new();
    g.add_compinfo(CompInfo::new(
        "hdr_t",
        1,
        vec![field("hdr", uint(), 0), field("len", uint(), 4)],
        false,
    ))
    .unwrap();
    Arc::new(g)
}

/// A builder for `f(struct hdr_t *p)`, with `p` passed in `R0`.
pub fn builder_with_hdr_param() -> AstBuilder {
    let mut symbols = LocalSymbolTable::new(globals_with_hdr(), "f");
    symbols.add_formal(
        "p",
        Typ::ptr(hdr_t()),
        ParameterLocation::Register("R0".into()),
    );
    AstBuilder::new(symbols)
}

/// A builder whose globals also have `struct outer_t { int tag; struct hdr_t h; }`
pub fn builder_with_nested_struct() -> AstBuilder {
    let g = globals_with_hdr();
    g.add_compinfo(CompInfo::new(
        "outer_t",
        2,
        vec![field("tag", Typ::Int(IKind::Int), 0), field("h", hdr_t(), 4)],
        false,
    ))
    .unwrap();
    AstBuilder::new(LocalSymbolTable::new(g, "f"))
}

/// Two functions: `set_len`, which clears `p->len` unless `p` is null, and `clear`, which
/// writes through a pointer of unknown origin.
pub const FIELD_FACTS: &str = "\
PROGRAM fields

TYPES
int iuint
comp 1 hdr_t
ptr 2

COMPOSITE 1 hdr_t
hdr 1 0
len 1 4

FUNCTION set_len 0x400
formal p 3 reg R0

TABLE symbol
1: R0 | 1
2: R0_in | 2
3: len_mem | 3

TABLE denotation
1: r,R0 |
2: a | 1
3: m | 1,4,2

TABLE cvv
1: ir,R0 | 0

TABLE membase
1: v | 2

TABLE memoffset
1: n |
2: c,4 | 1

TABLE variable
1: v | 1
2: v | 2
3: v | 3

TABLE xpr
1: c,0 |
2: v | 1
3: x,eq | 4,1
4: v | 2

INSTRUCTIONS
0x400 4 branch,eq | 0x408 ; a:x | 3
0x404 4 assign | 1,2 ; a:vx | 3,1
0x408 2 return | ; a:x | 2

FUNCTION clear 0x500

TABLE symbol
1: heap_mem | 1

TABLE denotation
1: m | 1,4,1

TABLE membase
1: u,heap |

TABLE memoffset
1: n |

TABLE variable
1: v | 1

TABLE xpr
1: c,0 |

INSTRUCTIONS
0x500 4 assign | 1,2 ; a:vx | 1,1
0x504 2 return | ; nop |
";

pub fn field_program() -> ProgramFacts {
    fact_loader::load(FIELD_FACTS).unwrap()
}

pub fn lifted_field_function() -> LiftedFunction {
    let p = field_program();
    lifter::lift_function(&p, &p.functions[0]).unwrap()
}

/// A dictionary where variable 3 is `R0` and expression 7 is `R1 + 4`, with more expressions
/// after it.
fn padded_dictionary() -> FnXprDictionary {
    let mut xd = FnXprDictionary::new();
    xd.mk_register_variable("R5");
    xd.mk_register_variable("R6");
    let r0 = xd.mk_register_variable("R0");
    assert_eq!(r0, 3);
    let r1 = xd.mk_register_variable("R1");
    for v in 100..104 {
        xd.mk_int_xpr(v);
    }
    let x_r1 = xd.mk_var_xpr(r1);
    let four = xd.mk_int_xpr(4);
    let sum = xd.mk_compound_xpr(XOp::Plus, &[x_r1, four]);
    assert_eq!(sum, 7);
    xd.mk_int_xpr(8);
    xd.mk_int_xpr(9);
    xd
}

fn xdata(key: &str, args: Vec<i64>) -> InstrXData {
    InstrXData::new(IndexedRecord::new(1, TaggedArgs::new([key], args)))
}

#[test]
fn plain_records_decode_by_position() {
    let xd = padded_dictionary();
    let (strings, types) = (Strings::default(), Types::default());
    let cx = DecodeContext {
        xd: &xd,
        strings: &strings,
        types: &types,
        invariants: None,
    };
    let x = xdata("a:vx", vec![3, 7]);
    let d = x.decode(&cx).unwrap();
    assert_eq!(d.vars[0].register(), Some("R0"));
    assert_eq!(d.xprs[0].to_string(), "(R1 + 4)");
    assert!(d.is_ok());
}

#[test]
fn error_valued_results_are_positioned() {
    let xd = padded_dictionary();
    let (strings, types) = (Strings::default(), Types::default());
    let cx = DecodeContext {
        xd: &xd,
        strings: &strings,
        types: &types,
        invariants: None,
    };
    let x = xdata("ar:vx", vec![-2, 9]);
    let d = x.decode(&cx).unwrap();
    assert!(!d.is_ok());
    assert_eq!(d.error_positions(), (vec![0], vec![], vec![]));
    assert_eq!(d.vars_result[0], XFact::UpstreamError);
    assert_eq!(d.xpr_result(0).and_then(|x| x.int_value()), Some(9));
}

#[test]
fn decoding_is_cached() {
    let xd = padded_dictionary();
    let (strings, types) = (Strings::default(), Types::default());
    let cx = DecodeContext {
        xd: &xd,
        strings: &strings,
        types: &types,
        invariants: None,
    };
    let x = xdata("a:vx", vec![3, 7]);
    let first = x.decode(&cx).unwrap() as *const _;
    let second = x.decode(&cx).unwrap() as *const _;
    assert_eq!(first, second);
    assert!(std::ptr::eq(first, x.decoded().unwrap()));
}

#[test]
fn unresolvable_memory_is_a_placeholder() {
    let mut b = empty_builder();
    let v = memory_xvar(
        "heap_mem",
        MemoryBase::Unknown("heap".into()),
        MemoryOffset::None,
    );
    let lv = b.lift_lval(&v, 0x10, None);
    assert!(!lv.is_resolved());
    assert_eq!(
        b.diagnostics()
            .of_kind(DiagnosticKind::UnresolvedValue)
            .count(),
        1
    );
    // With an address to go by, the lvalue is a dereference of it
    let hint = XXpr::binary(XOp::Plus, XXpr::Var(register_xvar("R2")), XXpr::int(8));
    let lv = b.lift_lval(&v, 0x14, Some(&hint));
    assert!(lv.is_resolved());
    assert!(matches!(lv.lhost, Lhost::Mem(_)));
}

#[test]
fn offsets_always_lift() {
    let mut b = builder_with_hdr_param();
    let offsets = vec![
        MemoryOffset::None,
        MemoryOffset::constant(4),
        MemoryOffset::Unknown,
        MemoryOffset::Field {
            name: "len".into(),
            ckey: 1,
            sub: Box::new(MemoryOffset::None),
        },
        MemoryOffset::ArrayIndex {
            index: Box::new(XXpr::int(2)),
            sub: Box::new(MemoryOffset::None),
        },
        MemoryOffset::IndexVar {
            var: Box::new(register_xvar("R1")),
            elsize: 4,
            sub: Box::new(MemoryOffset::None),
        },
    ];
    let host = hdr_t();
    for o in offsets.iter() {
        for h in [None, Some(&host)] {
            let before = b.diagnostics().len();
            let lifted = b.lift_offset(o, h, 0x10);
            if !lifted.is_resolved() {
                assert!(b.diagnostics().len() > before, "{:?} on {:?}", o, h);
            }
        }
    }
    let len = b.lift_offset(&MemoryOffset::constant(4), Some(&host), 0x10);
    assert!(matches!(len, Offset::Field { ref name, .. } if name == "len"));
}

#[test]
fn remapping_a_low_instruction_is_diagnosed_once() {
    let mut b = empty_builder();
    let loc = b.mk_location();
    let low = b.mk_nop("low", loc);
    let h1 = b.mk_nop("first", loc);
    let h2 = b.mk_nop("second", loc);
    b.add_instr_mapping(&low, &h1, Some(0x10));
    b.add_instr_mapping(&low, &h1, Some(0x10));
    assert!(b.diagnostics().is_empty());
    b.add_instr_mapping(&low, &h2, Some(0x10));
    assert_eq!(
        b.diagnostics()
            .of_kind(DiagnosticKind::ProvenanceOverwrite)
            .count(),
        1
    );
    assert_eq!(
        b.provenance().high_instruction(low.id).map(|i| i.id),
        Some(h2.id)
    );
    assert!(b.provenance().low_instructions(h1.id).is_empty());
}

#[test]
fn ssa_variables_are_introduced_once_per_site() {
    let mut b = empty_builder();
    let (a, fresh_a) = b.symbols_mut().ssa_vinfo("R0", 0x10, None);
    let (c, fresh_c) = b.symbols_mut().ssa_vinfo("R0", 0x10, None);
    let (d, _) = b.symbols_mut().ssa_vinfo("R0", 0x14, None);
    assert!(fresh_a && !fresh_c);
    assert!(Arc::ptr_eq(&a, &c));
    assert!(!Arc::ptr_eq(&a, &d));
    assert_eq!(b.symbols().ssa_vinfos_at_site(0x10).len(), 1);
}

#[test]
fn assignments_record_folded_ssa_constants() {
    let mut b = empty_builder();
    let mut xd = crate::instr_xdata::DecodedXData::default();
    xd.vars.push(register_xvar("R0"));
    let mut il = lifter::InstructionLift::new(&mut b, &xd, 0x20);
    let rhs = XXpr::binary(XOp::Plus, XXpr::int(2), XXpr::int(3));
    il.lift_assign(&register_xvar("R0"), &rhs, &rhs, None);
    let v = b.symbols().ssa_vinfo_at("R0", 0x20).unwrap();
    assert_eq!(
        b.symbols().ssa_value(&v.name).and_then(|e| e.int_value()),
        Some(5)
    );
}

#[test]
fn functions_lift_end_to_end() {
    let f = lifted_field_function();
    assert_eq!(f.name, "set_len");
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);
    let text = crate::c_printer::stmt_to_string(&f.body, 1);
    assert!(text.contains("goto L_408;"), "{}", text);
    assert!(text.contains("  p->len = 0;"), "{}", text);
    assert!(text.contains("L_408:\n  return R0;"), "{}", text);

    // Each high-level instruction has its low-level counterpart, at the same address
    for i in f.body.instructions() {
        let lows = f.provenance.low_instructions(i.id);
        assert_eq!(lows.len(), 1);
        assert_eq!(
            f.provenance.instr_addresses(lows[0].id),
            f.provenance.instr_addresses(i.id)
        );
    }
    let store = f.body.instructions()[0];
    assert_eq!(
        f.provenance.instr_span(store.id).map(|s| (s.address, s.size)),
        Some((0x404, 4))
    );
}

fn reaching_def(register: &str, location: &str) -> VarInvariantFact {
    VarInvariantFact::ReachingDef(VarDefUse {
        variable: register_xvar(register),
        locations: vec![location.to_string()],
    })
}

/// The reaching definitions recorded on each argument of a call.
fn argument_reaching_defs<'p>(
    provenance: &'p crate::provenance::Provenance,
    call: &Instr,
) -> Vec<Option<&'p [VarInvariantFact]>> {
    match &call.kind {
        InstrKind::Call { args, .. } => args
            .iter()
            .map(|a| provenance.reaching_defs(a.id))
            .collect(),
        k => panic!("unexpected {:?}", k),
    }
}

#[test]
fn call_arguments_take_one_reaching_definition_each() {
    let mut b = empty_builder();
    let mut xd = crate::instr_xdata::DecodedXData::default();
    xd.reaching_defs = vec![
        XFact::Present(reaching_def("R0", "0x5f0")),
        XFact::Present(reaching_def("R1", "0x5f4")),
    ];
    let args = [
        XXpr::Var(register_xvar("R0")),
        XXpr::Var(register_xvar("R1")),
    ];
    let mut il = lifter::InstructionLift::new(&mut b, &xd, 0x600);
    let (l, h) = il.lift_call(None, Some("memcpy"), None, &args);
    for call in [&l, &h] {
        let rdefs = argument_reaching_defs(b.provenance(), call);
        assert_eq!(
            rdefs,
            vec![
                Some(&[reaching_def("R0", "0x5f0")][..]),
                Some(&[reaching_def("R1", "0x5f4")][..]),
            ]
        );
    }
}

/// `copy` calls `memcpy(R0, R1)` with the call target given as a trailing argument.
const CALL_FACTS: &str = "\
PROGRAM calls

STRINGS
memcpy

FUNCTION copy 0x600

TABLE symbol
1: R0 | 1
2: R1 | 2

TABLE denotation
1: r,R0 |
2: r,R1 |

TABLE variable
1: v | 1
2: v | 2

TABLE xpr
1: v | 1
2: v | 2

TABLE varinv
1: r,0x5f0 | 1
2: r,0x5f4 | 2

INSTRUCTIONS
0x600 4 call | 0 ; a:xxrr | 1,2,1,2,1
0x604 2 return | ; nop |
";

#[test]
fn call_instructions_lift_with_per_argument_reaching_definitions() {
    let p = fact_loader::load(CALL_FACTS).unwrap();
    let f = lifter::lift_function(&p, &p.functions[0]).unwrap();
    assert!(f.diagnostics.is_empty(), "{:?}", f.diagnostics);
    let text = crate::c_printer::stmt_to_string(&f.body, 1);
    assert!(text.contains("memcpy(R0, R1);"), "{}", text);

    let call = f.body.instructions()[0];
    let low = f.provenance.low_instructions(call.id)[0];
    for i in [call, low] {
        let rdefs = argument_reaching_defs(&f.provenance, i);
        assert_eq!(rdefs.len(), 2);
        let defined: Vec<(&str, &[String])> = rdefs
            .into_iter()
            .map(|r| {
                let r = r.expect("argument without reaching definitions");
                assert_eq!(r.len(), 1);
                let v = r[0].vardefuse();
                (v.variable.name.as_str(), &v.locations[..])
            })
            .collect();
        assert_eq!(
            defined,
            vec![
                ("R0", &["0x5f0".to_string()][..]),
                ("R1", &["0x5f4".to_string()][..]),
            ]
        );
    }
}

#[test]
fn unresolved_functions_still_lift() {
    let p = field_program();
    let f = lifter::lift_function(&p, &p.functions[1]).unwrap();
    assert_eq!(f.name, "clear");
    let text = crate::c_printer::stmt_to_string(&f.body, 1);
    assert!(text.contains("*?"), "{}", text);
    assert!(text.contains("return;"), "{}", text);
    assert_eq!(
        f.diagnostics
            .of_kind(DiagnosticKind::UnresolvedValue)
            .count(),
        1
    );
}
