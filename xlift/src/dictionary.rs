//! The per-function value dictionary, and the external string and type tables.
//!
//! Each table of [`FnXprDictionary`] holds interned records in the following encodings (`tags` |
//! `args`):
//!
//! | table        | record                              | meaning                               |
//! |--------------|-------------------------------------|---------------------------------------|
//! | `symbol`     | `name` \| `seqnr`                   | a variable name (`seqnr -1`: temp)    |
//! | `variable`   | `v` \| `symbol`                     | a variable; `seqnr` picks denotation  |
//! | `denotation` | `r,reg` / `f,flag`                  | register, cpu flag                    |
//! |              | `m` \| `base,size,offset`           | memory                                |
//! |              | `a` \| `cvv`                        | constant-value variable               |
//! | `membase`    | `l` / `a` / `r` / `g`               | local/allocated/realigned frame, glob |
//! |              | `v` \| `var`, `u,desc`              | base variable, unknown                |
//! | `memoffset`  | `n`, `u`                            | no offset, unknown                    |
//! |              | `c,value` \| `sub`                  | constant                              |
//! |              | `f,name` \| `ckey,sub`              | field                                 |
//! |              | `a` \| `xpr,sub`                    | array index                           |
//! |              | `i` \| `var,elsize,sub`             | index variable                        |
//! | `cvv`        | `ir,reg` \| `level`                 | initial register value                |
//! |              | `iv` \| `var`                       | initial memory value                  |
//! |              | `fr,callsite[,target]`              | function return value                 |
//! |              | `sv,name` \| `xpr`                  | symbolic expression value             |
//! | `xpr`        | `v` \| `var`                        | variable                              |
//! |              | `c,value[,w64]` / `ga,address`      | constant, global address              |
//! |              | `x,op` \| `operands...`             | compound                              |
//! | `interval`   | `i,lb,ub`                           | `-oo`/`oo` for open bounds            |

use crate::ast::Typ;
use crate::error::{malformed, Error, Result};
use crate::interned::{IndexedRecord, IndexedTable, TaggedArgs};
use crate::xvalue::{
    ConstantValueVariable, MemoryBase, MemoryOffset, VarDenotation, Width, XConstant, XInterval,
    XOp, XVariable, XXpr,
};

/// Values nest at most this deep; deeper (or cyclic) encodings are rejected.
const MAX_DEPTH: usize = 256;

/// Strings of the program, referenced by index.
pub trait StringTable {
    fn string(&self, index: usize) -> Result<&str>;
}

/// Types of the program, referenced by index.
pub trait TypeTable {
    fn typ(&self, index: usize) -> Result<&Typ>;
}

/// A plain list of strings, 1-based.
#[derive(Clone, Debug, Default)]
pub struct Strings(pub Vec<String>);

impl StringTable for Strings {
    fn string(&self, index: usize) -> Result<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .map(|s| s.as_str())
            .ok_or_else(|| Error::IndexOutOfRange {
                table: "strings".into(),
                index,
            })
    }
}

/// A plain list of types, 1-based.
#[derive(Clone, Debug, Default)]
pub struct Types(pub Vec<Typ>);

impl TypeTable for Types {
    fn typ(&self, index: usize) -> Result<&Typ> {
        index
            .checked_sub(1)
            .and_then(|i| self.0.get(i))
            .ok_or_else(|| Error::IndexOutOfRange {
                table: "types".into(),
                index,
            })
    }
}

/// Interned variables and expressions of one function.
#[derive(Clone, Debug)]
pub struct FnXprDictionary {
    pub symbols: IndexedTable,
    pub variables: IndexedTable,
    pub denotations: IndexedTable,
    pub memory_bases: IndexedTable,
    pub memory_offsets: IndexedTable,
    pub constant_value_vars: IndexedTable,
    pub xprs: IndexedTable,
    pub intervals: IndexedTable,
}

impl Default for FnXprDictionary {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(table: &str, r: &IndexedRecord, n: usize) -> Result<i64> {
    let s = r.tag(table, n)?;
    let parsed = if let Some(hex) = s.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = s.strip_prefix("-0x") {
        i64::from_str_radix(hex, 16).ok().map(|v| -v)
    } else {
        s.parse().ok()
    };
    parsed.ok_or_else(|| malformed!(table, r.index, "not an integer: {:?}", s))
}

impl FnXprDictionary {
    pub fn new() -> Self {
        Self {
            symbols: IndexedTable::new("symbol"),
            variables: IndexedTable::new("variable"),
            denotations: IndexedTable::new("denotation"),
            memory_bases: IndexedTable::new("membase"),
            memory_offsets: IndexedTable::new("memoffset"),
            constant_value_vars: IndexedTable::new("cvv"),
            xprs: IndexedTable::new("xpr"),
            intervals: IndexedTable::new("interval"),
        }
    }

    /// The table with the given name, for loading.
    pub fn table_mut(&mut self, name: &str) -> Option<&mut IndexedTable> {
        [
            &mut self.symbols,
            &mut self.variables,
            &mut self.denotations,
            &mut self.memory_bases,
            &mut self.memory_offsets,
            &mut self.constant_value_vars,
            &mut self.xprs,
            &mut self.intervals,
        ]
        .into_iter()
        .find(|t| t.name() == name)
    }

    pub fn variable(&self, index: usize) -> Result<XVariable> {
        self.variable_at(index, 0)
    }

    pub fn xpr(&self, index: usize) -> Result<XXpr> {
        self.xpr_at(index, 0)
    }

    pub fn interval(&self, index: usize) -> Result<XInterval> {
        let r = self.intervals.get(index)?;
        let t = self.intervals.name();
        r.expect_shape(t, 3, 0)?;
        let bound = |n: usize, open: &str| -> Result<Option<i64>> {
            if r.tags[n] == open {
                Ok(None)
            } else {
                parse_int(t, &r, n).map(Some)
            }
        };
        Ok(XInterval {
            lb: bound(1, "-oo")?,
            ub: bound(2, "oo")?,
        })
    }

    fn check_depth(&self, table: &IndexedTable, index: usize, depth: usize) -> Result<()> {
        if depth > MAX_DEPTH {
            Err(malformed!(table.name(), index, "values nest too deep"))
        } else {
            Ok(())
        }
    }

    fn variable_at(&self, index: usize, depth: usize) -> Result<XVariable> {
        self.check_depth(&self.variables, index, depth)?;
        let t = self.variables.name();
        let r = self.variables.get(index)?;
        r.expect_shape(t, 1, 1)?;
        let s = self.symbols.get(r.arg_index(t, 0)?)?;
        s.expect_shape(self.symbols.name(), 1, 1)?;
        let seqnr = s.args[0];
        let denotation = if seqnr > 0 {
            Some(self.denotation_at(seqnr as usize, depth + 1)?)
        } else {
            None
        };
        Ok(XVariable {
            name: s.tags[0].clone(),
            seqnr,
            denotation,
        })
    }

    fn denotation_at(&self, index: usize, depth: usize) -> Result<VarDenotation> {
        self.check_depth(&self.denotations, index, depth)?;
        let t = self.denotations.name();
        let r = self.denotations.get(index)?;
        Ok(match r.kind() {
            "r" => VarDenotation::Register(r.tag(t, 1)?.to_string()),
            "f" => VarDenotation::Flag(r.tag(t, 1)?.to_string()),
            "m" => {
                r.expect_shape(t, 1, 3)?;
                VarDenotation::Memory {
                    base: self.memory_base_at(r.arg_index(t, 0)?, depth + 1)?,
                    size: r.arg_index(t, 1)? as u64,
                    offset: self.memory_offset_at(r.arg_index(t, 2)?, depth + 1)?,
                }
            }
            "a" => VarDenotation::Auxiliary(
                self.constant_value_var_at(r.arg_index(t, 0)?, depth + 1)?,
            ),
            k => return Err(malformed!(t, index, "unknown denotation {:?}", k)),
        })
    }

    fn memory_base_at(&self, index: usize, depth: usize) -> Result<MemoryBase> {
        self.check_depth(&self.memory_bases, index, depth)?;
        let t = self.memory_bases.name();
        let r = self.memory_bases.get(index)?;
        Ok(match r.kind() {
            "l" => MemoryBase::LocalStackFrame,
            "a" => MemoryBase::AllocatedStackFrame,
            "r" => MemoryBase::RealignedStackFrame,
            "g" => MemoryBase::Global,
            "v" => MemoryBase::BaseVar(Box::new(
                self.variable_at(r.arg_index(t, 0)?, depth + 1)?,
            )),
            "u" => MemoryBase::Unknown(r.tags.get(1).cloned().unwrap_or_default()),
            k => return Err(malformed!(t, index, "unknown memory base {:?}", k)),
        })
    }

    fn memory_offset_at(&self, index: usize, depth: usize) -> Result<MemoryOffset> {
        self.check_depth(&self.memory_offsets, index, depth)?;
        let t = self.memory_offsets.name();
        let r = self.memory_offsets.get(index)?;
        let sub = |n: usize| -> Result<Box<MemoryOffset>> {
            Ok(Box::new(self.memory_offset_at(r.arg_index(t, n)?, depth + 1)?))
        };
        Ok(match r.kind() {
            "n" => MemoryOffset::None,
            "u" => MemoryOffset::Unknown,
            "c" => MemoryOffset::Constant {
                value: parse_int(t, &r, 1)?,
                sub: sub(0)?,
            },
            "f" => MemoryOffset::Field {
                name: r.tag(t, 1)?.to_string(),
                ckey: r.arg_index(t, 0)?,
                sub: sub(1)?,
            },
            "a" => MemoryOffset::ArrayIndex {
                index: Box::new(self.xpr_at(r.arg_index(t, 0)?, depth + 1)?),
                sub: sub(1)?,
            },
            "i" => MemoryOffset::IndexVar {
                var: Box::new(self.variable_at(r.arg_index(t, 0)?, depth + 1)?),
                elsize: r.arg_index(t, 1)? as u64,
                sub: sub(2)?,
            },
            k => return Err(malformed!(t, index, "unknown memory offset {:?}", k)),
        })
    }

    fn constant_value_var_at(&self, index: usize, depth: usize) -> Result<ConstantValueVariable> {
        self.check_depth(&self.constant_value_vars, index, depth)?;
        let t = self.constant_value_vars.name();
        let r = self.constant_value_vars.get(index)?;
        Ok(match r.kind() {
            "ir" => ConstantValueVariable::InitialRegisterValue {
                register: r.tag(t, 1)?.to_string(),
                level: r.args.first().copied().unwrap_or(0),
            },
            "iv" => ConstantValueVariable::InitialMemoryValue(Box::new(
                self.variable_at(r.arg_index(t, 0)?, depth + 1)?,
            )),
            "fr" => ConstantValueVariable::FunctionReturnValue {
                callsite: parse_int(t, &r, 1)? as u64,
                target: r.tags.get(2).cloned(),
            },
            "sv" => ConstantValueVariable::SymbolicExprValue {
                name: r.tag(t, 1)?.to_string(),
                xpr: Box::new(self.xpr_at(r.arg_index(t, 0)?, depth + 1)?),
            },
            k => return Err(malformed!(t, index, "unknown constant-value variable {:?}", k)),
        })
    }

    fn xpr_at(&self, index: usize, depth: usize) -> Result<XXpr> {
        self.check_depth(&self.xprs, index, depth)?;
        let t = self.xprs.name();
        let r = self.xprs.get(index)?;
        Ok(match r.kind() {
            "v" => XXpr::Var(self.variable_at(r.arg_index(t, 0)?, depth + 1)?),
            "c" => {
                let value = parse_int(t, &r, 1)?;
                let width = match r.tags.get(2).map(|s| s.as_str()) {
                    None => Width::W32,
                    Some("w64") => Width::W64,
                    Some(w) => return Err(malformed!(t, index, "unknown width {:?}", w)),
                };
                XXpr::Constant(XConstant::Int {
                    value: crate::constant_folding::normalize(value, width),
                    width,
                })
            }
            "ga" => XXpr::Constant(XConstant::GlobalAddress(parse_int(t, &r, 1)? as u64)),
            "x" => {
                let name = r.tag(t, 1)?;
                let op = XOp::from_name(name)
                    .ok_or_else(|| malformed!(t, index, "unknown operator {:?}", name))?;
                let operands = (0..r.args.len())
                    .map(|n| self.xpr_at(r.arg_index(t, n)?, depth + 1))
                    .collect::<Result<Vec<_>>>()?;
                XXpr::Compound(op, operands)
            }
            k => return Err(malformed!(t, index, "unknown expression {:?}", k)),
        })
    }

    // Builders, for collaborators (and tests) that mint values rather than load them.

    fn add_variable(&mut self, name: &str, seqnr: i64) -> usize {
        let s = self.symbols.add(TaggedArgs::new([name], vec![seqnr]));
        self.variables.add(TaggedArgs::new(["v"], vec![s as i64]))
    }

    fn add_denoted_variable(&mut self, name: &str, denotation: TaggedArgs) -> usize {
        let d = self.denotations.add(denotation);
        self.add_variable(name, d as i64)
    }

    pub fn mk_register_variable(&mut self, register: &str) -> usize {
        self.add_denoted_variable(register, TaggedArgs::new(["r", register], vec![]))
    }

    pub fn mk_flag_variable(&mut self, flag: &str) -> usize {
        self.add_denoted_variable(flag, TaggedArgs::new(["f", flag], vec![]))
    }

    pub fn mk_tmp_variable(&mut self, name: &str) -> usize {
        self.add_variable(name, -1)
    }

    pub fn mk_memory_variable(&mut self, name: &str, base: usize, size: u64, offset: usize) -> usize {
        self.add_denoted_variable(
            name,
            TaggedArgs::new(["m"], vec![base as i64, size as i64, offset as i64]),
        )
    }

    /// A variable denoting a constant-value variable, from [`Self::mk_initial_register_value`]
    /// and friends.
    pub fn mk_auxiliary_variable(&mut self, name: &str, cvv: usize) -> usize {
        self.add_denoted_variable(name, TaggedArgs::new(["a"], vec![cvv as i64]))
    }

    pub fn mk_stack_frame_base(&mut self) -> usize {
        self.memory_bases.add(TaggedArgs::new(["l"], vec![]))
    }

    pub fn mk_global_base(&mut self) -> usize {
        self.memory_bases.add(TaggedArgs::new(["g"], vec![]))
    }

    pub fn mk_basevar_base(&mut self, var: usize) -> usize {
        self.memory_bases.add(TaggedArgs::new(["v"], vec![var as i64]))
    }

    pub fn mk_unknown_base(&mut self, description: &str) -> usize {
        self.memory_bases.add(TaggedArgs::new(["u", description], vec![]))
    }

    pub fn mk_no_offset(&mut self) -> usize {
        self.memory_offsets.add(TaggedArgs::new(["n"], vec![]))
    }

    pub fn mk_constant_offset(&mut self, value: i64, sub: usize) -> usize {
        self.memory_offsets
            .add(TaggedArgs::new(["c".to_string(), value.to_string()], vec![sub as i64]))
    }

    pub fn mk_field_offset(&mut self, name: &str, ckey: usize, sub: usize) -> usize {
        self.memory_offsets
            .add(TaggedArgs::new(["f", name], vec![ckey as i64, sub as i64]))
    }

    pub fn mk_array_index_offset(&mut self, index_xpr: usize, sub: usize) -> usize {
        self.memory_offsets
            .add(TaggedArgs::new(["a"], vec![index_xpr as i64, sub as i64]))
    }

    pub fn mk_index_var_offset(&mut self, var: usize, elsize: u64, sub: usize) -> usize {
        self.memory_offsets.add(TaggedArgs::new(
            ["i"],
            vec![var as i64, elsize as i64, sub as i64],
        ))
    }

    pub fn mk_initial_register_value(&mut self, register: &str) -> usize {
        self.constant_value_vars
            .add(TaggedArgs::new(["ir", register], vec![0]))
    }

    pub fn mk_initial_memory_value(&mut self, var: usize) -> usize {
        self.constant_value_vars
            .add(TaggedArgs::new(["iv"], vec![var as i64]))
    }

    pub fn mk_function_return_value(&mut self, callsite: u64, target: Option<&str>) -> usize {
        let mut tags = vec!["fr".to_string(), format!("{:#x}", callsite)];
        tags.extend(target.map(|t| t.to_string()));
        self.constant_value_vars.add(TaggedArgs::new(tags, vec![]))
    }

    pub fn mk_symbolic_value(&mut self, name: &str, xpr: usize) -> usize {
        self.constant_value_vars
            .add(TaggedArgs::new(["sv", name], vec![xpr as i64]))
    }

    pub fn mk_var_xpr(&mut self, var: usize) -> usize {
        self.xprs.add(TaggedArgs::new(["v"], vec![var as i64]))
    }

    pub fn mk_int_xpr(&mut self, value: i64) -> usize {
        self.xprs
            .add(TaggedArgs::new(["c".to_string(), value.to_string()], vec![]))
    }

    pub fn mk_global_address_xpr(&mut self, address: u64) -> usize {
        self.xprs.add(TaggedArgs::new(
            ["ga".to_string(), format!("{:#x}", address)],
            vec![],
        ))
    }

    pub fn mk_compound_xpr(&mut self, op: XOp, operands: &[usize]) -> usize {
        self.xprs.add(TaggedArgs::new(
            ["x", op.name()],
            operands.iter().map(|o| *o as i64).collect(),
        ))
    }

    pub fn mk_interval(&mut self, lb: Option<i64>, ub: Option<i64>) -> usize {
        let lb = lb.map(|v| v.to_string()).unwrap_or_else(|| "-oo".into());
        let ub = ub.map(|v| v.to_string()).unwrap_or_else(|| "oo".into());
        self.intervals
            .add(TaggedArgs::new(["i".to_string(), lb, ub], vec![]))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn registers_and_compounds_decode() {
        let mut xd = FnXprDictionary::new();
        let r1 = xd.mk_register_variable("R1");
        let x_r1 = xd.mk_var_xpr(r1);
        let four = xd.mk_int_xpr(4);
        let sum = xd.mk_compound_xpr(XOp::Plus, &[x_r1, four]);
        let x = xd.xpr(sum).unwrap();
        assert_eq!(x.to_string(), "(R1 + 4)");
        let v = xd.variable(r1).unwrap();
        assert_eq!(v.register(), Some("R1"));
        assert!(v.seqnr > 0);
    }

    #[test]
    fn memory_variables_decode_their_offsets() {
        let mut xd = FnXprDictionary::new();
        let frame = xd.mk_stack_frame_base();
        let none = xd.mk_no_offset();
        let off = xd.mk_constant_offset(-8, none);
        let v = xd.mk_memory_variable("var_0008", frame, 4, off);
        let v = xd.variable(v).unwrap();
        assert_eq!(v.stack_offset(), Some(-8));
    }

    #[test]
    fn placeholder_variables_decode() {
        let mut xd = FnXprDictionary::new();
        let r0 = xd.mk_register_variable("R0");
        let g = xd.mk_global_base();
        let none = xd.mk_no_offset();
        let counter = xd.mk_memory_variable("counter", g, 4, none);
        let iv = xd.mk_initial_memory_value(counter);
        let iv = xd.mk_auxiliary_variable("counter_in", iv);
        let fr = xd.mk_function_return_value(0x40, Some("malloc"));
        let fr = xd.mk_auxiliary_variable("rtn_40", fr);
        let x_r0 = xd.mk_var_xpr(r0);
        let sv = xd.mk_symbolic_value("len", x_r0);
        let sv = xd.mk_auxiliary_variable("len", sv);

        let v = xd.variable(iv).unwrap();
        match v.auxvar() {
            Some(ConstantValueVariable::InitialMemoryValue(m)) => assert_eq!(m.name, "counter"),
            a => panic!("{:?}", a),
        }
        assert_eq!(
            xd.variable(fr).unwrap().auxvar(),
            Some(&ConstantValueVariable::FunctionReturnValue {
                callsite: 0x40,
                target: Some("malloc".into())
            })
        );
        match xd.variable(sv).unwrap().auxvar() {
            Some(ConstantValueVariable::SymbolicExprValue { name, xpr }) => {
                assert_eq!(name, "len");
                assert_eq!(xpr.to_string(), "R0");
            }
            a => panic!("{:?}", a),
        }
        let cf = xd.mk_flag_variable("CF");
        assert!(matches!(
            xd.variable(cf).unwrap().denotation,
            Some(VarDenotation::Flag(_))
        ));
        let ga = xd.mk_global_address_xpr(0x8000);
        assert_eq!(
            xd.xpr(ga).unwrap(),
            XXpr::Constant(XConstant::GlobalAddress(0x8000))
        );
    }

    #[test]
    fn indexed_memory_decodes_through_its_base() {
        let mut xd = FnXprDictionary::new();
        let r0 = xd.mk_register_variable("R0");
        let r1 = xd.mk_register_variable("R1");
        let x_r1 = xd.mk_var_xpr(r1);
        let through_r0 = xd.mk_basevar_base(r0);
        let none = xd.mk_no_offset();
        let elem = xd.mk_array_index_offset(x_r1, none);
        let by_var = xd.mk_index_var_offset(r1, 4, none);
        let a = xd.mk_memory_variable("a", through_r0, 4, elem);
        let b = xd.mk_memory_variable("b", through_r0, 4, by_var);
        let heap = xd.mk_unknown_base("heap");
        let c = xd.mk_memory_variable("c", heap, 4, none);

        let a = xd.variable(a).unwrap();
        let (base, _, offset) = a.memory().unwrap();
        assert!(matches!(base, MemoryBase::BaseVar(v) if v.name == "R0"));
        assert!(matches!(offset, MemoryOffset::ArrayIndex { .. }));
        let b = xd.variable(b).unwrap();
        assert!(matches!(
            b.memory(),
            Some((_, 4, MemoryOffset::IndexVar { elsize: 4, .. }))
        ));
        let c = xd.variable(c).unwrap();
        assert_eq!(
            c.memory().map(|(b, _, _)| b.clone()),
            Some(MemoryBase::Unknown("heap".into()))
        );
    }

    #[test]
    fn temporaries_have_no_denotation() {
        let mut xd = FnXprDictionary::new();
        let t = xd.mk_tmp_variable("tmp");
        let v = xd.variable(t).unwrap();
        assert!(v.is_tmp());
        assert!(v.denotation.is_none());
    }

    #[test]
    fn cyclic_encodings_are_rejected() {
        let mut xd = FnXprDictionary::new();
        // xpr 1 = plus(xpr 1, xpr 1)
        xd.xprs.add(TaggedArgs::new(["x", "plus"], vec![1, 1]));
        assert!(matches!(xd.xpr(1), Err(Error::Malformed { .. })));
    }

    #[test]
    fn unknown_operators_are_malformed() {
        let mut xd = FnXprDictionary::new();
        let c = xd.mk_int_xpr(1);
        xd.xprs
            .add(TaggedArgs::new(["x", "frobnicate"], vec![c as i64]));
        assert!(xd.xpr(2).is_err());
    }

    #[test]
    fn intervals_have_open_bounds() {
        let mut xd = FnXprDictionary::new();
        let i = xd.mk_interval(Some(0), None);
        assert_eq!(
            xd.interval(i).unwrap(),
            XInterval {
                lb: Some(0),
                ub: None
            }
        );
    }

    #[test]
    fn external_tables_are_one_based() {
        let s = Strings(vec!["hello".into()]);
        assert_eq!(s.string(1).unwrap(), "hello");
        assert!(s.string(0).is_err());
        let t = Types(vec![]);
        assert!(t.typ(1).is_err());
    }
}
