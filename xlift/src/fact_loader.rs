//! Loading of fact files.
//!
//! A fact file is a sequence of sections separated by blank lines; lines starting with `#` are
//! ignored. Each section starts with a header line:
//!
//! ```text
//! PROGRAM <name>
//!
//! STRINGS
//! <text>                                    (one per line, numbered from 1)
//!
//! TYPES
//! <type>                                    (one per line, numbered from 1)
//!
//! TYPEDEFS
//! <name> <type-ref>
//!
//! COMPOSITE <ckey> <name> [union]
//! <field> <type-ref> <offset|->
//!
//! GLOBALS
//! <name> <type-ref|-> [<address>]
//!
//! FUNCTION <name> <address>
//! formal <name> <type-ref> reg <register>
//! formal <name> <type-ref> stack <offset>
//!
//! TABLE <table>                             (of the function above)
//! <index>: <tags> | <args>
//!
//! INSTRUCTIONS                              (of the function above)
//! <address> <size> <opcode tags> | <opcode args> ; <fact tags> | <fact args>
//! ```
//!
//! Types are written as `void`, `int <ikind>`, `float <fkind>`, `ptr <t>`, `array <t> [<len>]`,
//! `named <name>`, `comp <ckey> <name>`, `enum <name> <ikind>`, or
//! `fun <ret> [<name>:<t>]... [...]`, where `<t>` refers back to an earlier type by number. Tags
//! and arguments are comma-separated.

use std::sync::Arc;

use itertools::Itertools;

use crate::ast::*;
use crate::dataflow::VarInvariantTable;
use crate::dictionary::{FnXprDictionary, Strings, Types};
use crate::error::{Error, Result};
use crate::instr_xdata::InstrXData;
use crate::interned::{IndexedRecord, IndexedTable, TaggedArgs};
use crate::lifter::{FormalFacts, FunctionFacts, InstructionFacts, ProgramFacts};
use crate::log::*;
use crate::opcode::OpcodeRecord;
use crate::symbol_table::{GlobalSymbolTable, ParameterLocation};

type Line<'a> = (usize, &'a str);

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}

fn parse_int(line: usize, s: &str) -> Result<i64> {
    let parsed = if let Some(hex) = s.strip_prefix("0x") {
        i64::from_str_radix(hex, 16).ok()
    } else if let Some(hex) = s.strip_prefix("-0x") {
        i64::from_str_radix(hex, 16).ok().map(|v| -v)
    } else {
        s.parse().ok()
    };
    parsed.ok_or_else(|| parse_error(line, format!("not an integer: {:?}", s)))
}

fn parse_address(line: usize, s: &str) -> Result<u64> {
    let v = parse_int(line, s)?;
    u64::try_from(v).map_err(|_| parse_error(line, format!("not an address: {:?}", s)))
}

fn parse_index(line: usize, s: &str) -> Result<usize> {
    let v = parse_int(line, s)?;
    usize::try_from(v).map_err(|_| parse_error(line, format!("not an index: {:?}", s)))
}

/// `tags | args`
fn parse_tagged_args(line: usize, s: &str) -> Result<TaggedArgs> {
    let (tags, args) = s
        .split_once('|')
        .ok_or_else(|| parse_error(line, format!("expected `tags | args`, got {:?}", s)))?;
    let tags: Vec<&str> = match tags.trim() {
        "" => vec![],
        t => t.split(',').map(str::trim).collect(),
    };
    let args = match args.trim() {
        "" => vec![],
        a => a
            .split(',')
            .map(|x| parse_int(line, x.trim()))
            .collect::<Result<Vec<_>>>()?,
    };
    Ok(TaggedArgs::new(tags, args))
}

/// The non-blank, non-comment lines of `text`, grouped into sections, with 1-based line numbers.
fn sections(text: &str) -> Vec<Vec<Line<'_>>> {
    let lines = text
        .lines()
        .enumerate()
        .map(|(i, l)| (i + 1, l.trim_end()))
        .filter(|(_, l)| !l.trim_start().starts_with('#'));
    let groups = lines.group_by(|(_, l)| l.trim().is_empty());
    let mut r = vec![];
    for (blank, group) in &groups {
        if !blank {
            r.push(group.collect());
        }
    }
    r
}

/// Facts of a function whose sections are still being read.
struct PendingFunction {
    line: usize,
    name: String,
    address: u64,
    formals: Vec<FormalFacts>,
    xd: FnXprDictionary,
    varinv: Option<IndexedTable>,
    /// `(line, address, size, opcode, fact record)`
    instructions: Vec<(usize, u64, u64, TaggedArgs, TaggedArgs)>,
}

impl PendingFunction {
    /// Check opcode contracts and decode the dataflow facts.
    fn finish(self) -> std::result::Result<FunctionFacts, (String, Error)> {
        let PendingFunction {
            line: line_no,
            name,
            address,
            formals,
            xd,
            varinv,
            instructions: pending,
        } = self;
        let invariants = match &varinv {
            Some(t) => Some(VarInvariantTable::decode(t, &xd).map_err(|e| (name.clone(), e))?),
            None => None,
        };
        let mut instructions = vec![];
        for (i, (line, address, size, opcode, xdata)) in pending.into_iter().enumerate() {
            let opcode = OpcodeRecord::new(i + 1, opcode.tags, opcode.args).map_err(|e| {
                debug!("Opcode record rejected"; "line" => line, "error" => %e);
                (name.clone(), e)
            })?;
            instructions.push(InstructionFacts {
                address,
                size,
                opcode,
                xdata: InstrXData::new(IndexedRecord::new(i + 1, xdata)),
            });
        }
        trace!("Loaded function";
               "function" => &name,
               "line" => line_no,
               "instructions" => instructions.len());
        Ok(FunctionFacts {
            name,
            address,
            formals,
            xd,
            invariants,
            instructions,
        })
    }
}

struct Loader {
    name: String,
    globals: Arc<GlobalSymbolTable>,
    strings: Vec<String>,
    types: Vec<Typ>,
    functions: Vec<FunctionFacts>,
    rejected: Vec<(String, Error)>,
    current: Option<PendingFunction>,
}

impl Loader {
    fn new() -> Self {
        Self {
            name: String::new(),
            globals: Arc::new(GlobalSymbolTable::new()),
            strings: vec![],
            types: vec![],
            functions: vec![],
            rejected: vec![],
            current: None,
        }
    }

    fn type_ref(&self, line: usize, tok: &str) -> Result<Typ> {
        let ix = parse_index(line, tok)?;
        ix.checked_sub(1)
            .and_then(|i| self.types.get(i))
            .cloned()
            .ok_or_else(|| parse_error(line, format!("no type {}", ix)))
    }

    fn ikind(line: usize, tok: &str) -> Result<IKind> {
        IKind::from_name(tok).ok_or_else(|| parse_error(line, format!("unknown int kind {:?}", tok)))
    }

    fn parse_type(&self, line: usize, toks: &[&str]) -> Result<Typ> {
        Ok(match toks {
            ["void"] => Typ::Void,
            ["int", k] => Typ::Int(Self::ikind(line, k)?),
            ["float", k] => Typ::Float(
                FKind::from_name(k)
                    .ok_or_else(|| parse_error(line, format!("unknown float kind {:?}", k)))?,
            ),
            ["ptr", t] => Typ::ptr(self.type_ref(line, t)?),
            ["array", t] => Typ::Array(Box::new(self.type_ref(line, t)?), None),
            ["array", t, len] => {
                let len = Expr {
                    id: ExprId::fresh(),
                    kind: ExprKind::IntConstant {
                        value: parse_int(line, len)?,
                        ikind: IKind::Int,
                    },
                };
                Typ::Array(Box::new(self.type_ref(line, t)?), Some(Box::new(len)))
            }
            ["named", n] => Typ::Named(n.to_string()),
            ["comp", ckey, name] => Typ::Comp {
                name: name.to_string(),
                ckey: parse_index(line, ckey)?,
            },
            ["enum", name, k] => Typ::Enum {
                name: name.to_string(),
                ikind: Self::ikind(line, k)?,
            },
            ["fun", ret, rest @ ..] => {
                let (varargs, params) = match rest {
                    [ps @ .., "..."] => (true, ps),
                    ps => (false, ps),
                };
                let args = params
                    .iter()
                    .map(|p| {
                        let (name, t) = p.split_once(':').ok_or_else(|| {
                            parse_error(line, format!("expected `name:type`, got {:?}", p))
                        })?;
                        Ok(FunArg {
                            name: name.to_string(),
                            typ: self.type_ref(line, t)?,
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                Typ::Fun {
                    ret: Box::new(self.type_ref(line, ret)?),
                    args: Some(args),
                    varargs,
                }
            }
            _ => return Err(parse_error(line, format!("unknown type {:?}", toks.join(" ")))),
        })
    }

    fn current(&mut self, line: usize, header: &str) -> Result<&mut PendingFunction> {
        self.current
            .as_mut()
            .ok_or_else(|| parse_error(line, format!("{} outside of a function", header)))
    }

    fn finish_function(&mut self) {
        if let Some(f) = self.current.take() {
            match f.finish() {
                Ok(f) => self.functions.push(f),
                Err((name, e)) => {
                    warn!("Function rejected"; "function" => &name, "error" => %e);
                    self.rejected.push((name, e));
                }
            }
        }
    }

    fn section(&mut self, (line, header): Line<'_>, body: &[Line<'_>]) -> Result<()> {
        let words: Vec<&str> = header.split_whitespace().collect();
        match words.as_slice() {
            ["PROGRAM", name] => self.name = name.to_string(),
            ["STRINGS"] => {
                self.strings
                    .extend(body.iter().map(|(_, l)| l.to_string()));
            }
            ["TYPES"] => {
                for (line, l) in body {
                    let toks: Vec<&str> = l.split_whitespace().collect();
                    let t = self.parse_type(*line, &toks)?;
                    self.types.push(t);
                }
            }
            ["TYPEDEFS"] => {
                for (line, l) in body {
                    match l.split_whitespace().collect::<Vec<_>>().as_slice() {
                        [name, t] => {
                            let t = self.type_ref(*line, t)?;
                            self.globals.add_typedef(name, t);
                        }
                        _ => return Err(parse_error(*line, "expected `<name> <type>`")),
                    }
                }
            }
            ["COMPOSITE", ckey, name, rest @ ..] => {
                let is_union = match rest {
                    [] => false,
                    ["union"] => true,
                    _ => return Err(parse_error(line, "expected `union` or nothing")),
                };
                let ckey = parse_index(line, ckey)?;
                let mut fields = vec![];
                for (line, l) in body {
                    match l.split_whitespace().collect::<Vec<_>>().as_slice() {
                        [fname, t, off] => fields.push(FieldInfo {
                            name: fname.to_string(),
                            ftype: self.type_ref(*line, t)?,
                            byte_offset: match *off {
                                "-" => None,
                                o => Some(parse_int(*line, o)?),
                            },
                        }),
                        _ => return Err(parse_error(*line, "expected `<field> <type> <offset>`")),
                    }
                }
                self.globals
                    .add_compinfo(CompInfo::new(name, ckey, fields, is_union))
                    .map_err(|e| parse_error(line, e.to_string()))?;
            }
            ["GLOBALS"] => {
                for (line, l) in body {
                    let (name, t, address) = match l.split_whitespace().collect::<Vec<_>>().as_slice()
                    {
                        [name, t] => (name.to_string(), t.to_string(), None),
                        [name, t, a] => (name.to_string(), t.to_string(), Some(parse_address(*line, a)?)),
                        _ => return Err(parse_error(*line, "expected `<name> <type> [<address>]`")),
                    };
                    let t = match t.as_str() {
                        "-" => None,
                        t => Some(self.type_ref(*line, t)?),
                    };
                    let mut v = VarInfo::new(&name, t);
                    if let Some(a) = address {
                        v = v.with_global_address(a);
                    }
                    self.globals.add_global(v);
                }
            }
            ["FUNCTION", name, address] => {
                self.finish_function();
                let mut f = PendingFunction {
                    line,
                    name: name.to_string(),
                    address: parse_address(line, address)?,
                    formals: vec![],
                    xd: FnXprDictionary::new(),
                    varinv: None,
                    instructions: vec![],
                };
                for (line, l) in body {
                    let (fname, t, location) =
                        match l.split_whitespace().collect::<Vec<_>>().as_slice() {
                            ["formal", n, t, "reg", r] => {
                                (n.to_string(), t.to_string(), ParameterLocation::Register(r.to_string()))
                            }
                            ["formal", n, t, "stack", o] => (
                                n.to_string(),
                                t.to_string(),
                                ParameterLocation::Stack(parse_int(*line, o)?),
                            ),
                            _ => {
                                return Err(parse_error(
                                    *line,
                                    "expected `formal <name> <type> reg|stack <location>`",
                                ))
                            }
                        };
                    f.formals.push(FormalFacts {
                        name: fname,
                        typ: self.type_ref(*line, &t)?,
                        location,
                    });
                }
                self.current = Some(f);
            }
            ["TABLE", table] => {
                let f = self.current(line, "TABLE")?;
                let mut varinv = IndexedTable::new("varinv");
                let t = if *table == "varinv" {
                    &mut varinv
                } else {
                    f.xd.table_mut(table)
                        .ok_or_else(|| parse_error(line, format!("unknown table {:?}", table)))?
                };
                for (line, l) in body {
                    let (ix, rec) = l
                        .split_once(':')
                        .ok_or_else(|| parse_error(*line, "expected `<index>: <tags> | <args>`"))?;
                    let ix = parse_index(*line, ix.trim())?;
                    t.insert_at(ix, parse_tagged_args(*line, rec)?)
                        .map_err(|e| parse_error(*line, e.to_string()))?;
                }
                if *table == "varinv" {
                    f.varinv = Some(varinv);
                }
            }
            ["INSTRUCTIONS"] => {
                let f = self.current(line, "INSTRUCTIONS")?;
                for (line, l) in body {
                    let mut words = l.trim().splitn(3, char::is_whitespace);
                    let (address, size, rest) = match (words.next(), words.next(), words.next()) {
                        (Some(a), Some(s), Some(r)) => (a, s, r),
                        _ => return Err(parse_error(*line, "expected `<address> <size> ...`")),
                    };
                    let (opcode, xdata) = rest
                        .split_once(';')
                        .ok_or_else(|| parse_error(*line, "expected `<opcode> ; <facts>`"))?;
                    f.instructions.push((
                        *line,
                        parse_address(*line, address)?,
                        parse_address(*line, size)?,
                        parse_tagged_args(*line, opcode)?,
                        parse_tagged_args(*line, xdata)?,
                    ));
                }
            }
            _ => return Err(parse_error(line, format!("unknown section {:?}", header))),
        }
        Ok(())
    }
}

/// Load the facts of a program. Syntax errors fail the whole load; a function whose facts break
/// an opcode contract or do not decode is set aside in [`ProgramFacts::rejected`].
pub fn load(text: &str) -> Result<ProgramFacts> {
    let mut loader = Loader::new();
    for section in sections(text) {
        if let [header, body @ ..] = section.as_slice() {
            loader.section(*header, body)?;
        }
    }
    loader.finish_function();
    info!("Loaded facts";
          "program" => &loader.name,
          "functions" => loader.functions.len(),
          "rejected" => loader.rejected.len());
    Ok(ProgramFacts {
        name: loader.name,
        globals: loader.globals,
        strings: Strings(loader.strings),
        types: Types(loader.types),
        functions: loader.functions,
        rejected: loader.rejected,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::dictionary::{StringTable, TypeTable};

    const FACTS: &str = "\
PROGRAM demo

# types first, so that later sections can refer to them
TYPES
int iuint
comp 1 hdr_t
ptr 2
fun 1 p:3

STRINGS
memcpy

COMPOSITE 1 hdr_t
hdr 1 0
len 1 4

GLOBALS
counter 1 0x1000
parse 4

FUNCTION parse 0x400
formal p 3 reg R0

TABLE symbol
1: R0 | 1

TABLE denotation
1: r,R0 |

TABLE variable
1: v | 1

TABLE varinv
1: r,0x400 | 1

INSTRUCTIONS
0x400 4 nop | ; nop |
0x404 2 return | ; nop |
";

    #[test]
    fn programs_load() {
        let p = load(FACTS).unwrap();
        assert_eq!(p.name, "demo");
        assert_eq!(p.strings.string(1).unwrap(), "memcpy");
        assert_eq!(p.types.typ(1).unwrap(), &Typ::Int(IKind::UInt));
        let c = p.globals.compinfo(1).unwrap();
        assert_eq!(c.field_at_offset(4).map(|(f, r)| (f.name.as_str(), r)), Some(("len", 0)));
        assert_eq!(
            p.globals.global_at(0x1000).map(|v| v.name.clone()),
            Some("counter".to_string())
        );
        assert!(p.rejected.is_empty());
        let f = &p.functions[0];
        assert_eq!((f.name.as_str(), f.address), ("parse", 0x400));
        assert_eq!(f.formals[0].location, ParameterLocation::Register("R0".into()));
        assert_eq!(f.xd.variable(1).unwrap().register(), Some("R0"));
        assert_eq!(f.invariants.as_ref().map(|i| i.len()), Some(1));
        assert_eq!(f.instructions.len(), 2);
        assert_eq!(f.instructions[1].opcode.mnemonic(), "return");
        assert_eq!(f.instructions[1].xdata.key(), "nop");
    }

    #[test]
    fn syntax_errors_carry_the_line() {
        let text = "TYPES\nint iint\nptr 7\n";
        assert_eq!(
            load(text).map(|_| ()),
            Err(Error::Parse {
                line: 3,
                message: "no type 7".into()
            })
        );
        assert!(matches!(
            load("INSTRUCTIONS\n0x10 4 nop | ; nop |\n"),
            Err(Error::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn contract_violations_reject_only_their_function() {
        let text = "\
FUNCTION bad 0x10

INSTRUCTIONS
0x10 4 assign | 1 ; nop |

FUNCTION good 0x20

INSTRUCTIONS
0x20 4 nop | ; nop |
";
        let p = load(text).unwrap();
        assert_eq!(p.functions.len(), 1);
        assert_eq!(p.functions[0].name, "good");
        assert_eq!(p.rejected.len(), 1);
        assert!(matches!(p.rejected[0], (ref n, Error::OpcodeContract { .. }) if n == "bad"));
    }
}
