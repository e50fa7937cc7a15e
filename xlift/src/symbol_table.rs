//! Global and per-function symbol tables.
//!
//! The global table holds composite and typedef definitions plus the program's global
//! variables. It is shared between function lifts behind an `Arc`, is append-only, and is guarded
//! by a reader/writer lock so that it may still be populated lazily while lifts run. The local
//! table is owned by a single function lift.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::ast::{CompInfo, Expr, Typ, VarInfo};
use crate::containers::unordered::UnorderedMap;
use crate::containers::OrderedMultiMap;
use crate::error::{Error, Result};
use crate::lift_config::CONFIG;
use crate::log::*;

#[derive(Default, Debug)]
struct GlobalSymbols {
    compinfos: UnorderedMap<usize, Arc<CompInfo>>,
    typedefs: UnorderedMap<String, Typ>,
    globals: UnorderedMap<String, Arc<VarInfo>>,
    globals_by_address: UnorderedMap<u64, Arc<VarInfo>>,
}

/// The process-wide symbol table.
#[derive(Default, Debug)]
pub struct GlobalSymbolTable {
    inner: RwLock<GlobalSymbols>,
}

impl GlobalSymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, GlobalSymbols> {
        // Nothing is ever left half-written, so a poisoned lock is still consistent
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, GlobalSymbols> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a composite definition. Registering the same definition again is a no-op; a
    /// different definition under the same key is an error.
    pub fn add_compinfo(&self, c: CompInfo) -> Result<Arc<CompInfo>> {
        let mut g = self.write();
        if let Some(prev) = g.compinfos.get(&c.ckey) {
            return if **prev == c {
                Ok(prev.clone())
            } else {
                Err(Error::ConflictingCompInfo {
                    ckey: c.ckey,
                    name: c.name,
                })
            };
        }
        debug!("Registered composite"; "name" => &c.name, "ckey" => c.ckey);
        let c = Arc::new(c);
        g.compinfos.insert(c.ckey, c.clone());
        Ok(c)
    }

    pub fn compinfo(&self, ckey: usize) -> Option<Arc<CompInfo>> {
        self.read().compinfos.get(&ckey).cloned()
    }

    pub fn add_typedef(&self, name: &str, t: Typ) {
        self.write().typedefs.entry(name.to_string()).or_insert(t);
    }

    /// Unfold typedef names, until a type that is not a (known) typedef.
    pub fn resolve_typedef(&self, t: &Typ) -> Typ {
        let g = self.read();
        let mut t = t.clone();
        // Bounded, in case of a cyclic typedef
        for _ in 0..32 {
            match &t {
                Typ::Named(n) => match g.typedefs.get(n) {
                    Some(d) => t = d.clone(),
                    None => break,
                },
                _ => break,
            }
        }
        t
    }

    /// Register a global variable. A global of the same name already present is returned instead.
    pub fn add_global(&self, v: VarInfo) -> Arc<VarInfo> {
        let mut g = self.write();
        if let Some(prev) = g.globals.get(&v.name) {
            return prev.clone();
        }
        let v = Arc::new(v);
        g.globals.insert(v.name.clone(), v.clone());
        if let Some(a) = v.global_address {
            g.globals_by_address.insert(a, v.clone());
        }
        v
    }

    pub fn global(&self, name: &str) -> Option<Arc<VarInfo>> {
        self.read().globals.get(name).cloned()
    }

    pub fn global_at(&self, address: u64) -> Option<Arc<VarInfo>> {
        self.read().globals_by_address.get(&address).cloned()
    }

    /// The global whose storage contains `address`, together with the offset into it.
    pub fn global_containing(&self, address: u64) -> Option<(Arc<VarInfo>, i64)> {
        if let Some(v) = self.global_at(address) {
            return Some((v, 0));
        }
        let candidates: Vec<(u64, Arc<VarInfo>)> = self
            .read()
            .globals_by_address
            .iter()
            .filter(|(a, _)| **a < address)
            .map(|(a, v)| (*a, v.clone()))
            .collect();
        candidates.into_iter().find_map(|(a, v)| {
            let size = v.vtype().and_then(|t| self.byte_size(t))?;
            if address - a < size {
                Some((v, (address - a) as i64))
            } else {
                None
            }
        })
    }

    pub fn compinfos(&self) -> Vec<Arc<CompInfo>> {
        self.read().compinfos.values().cloned().collect()
    }

    /// Size of a type in bytes, if it is known.
    pub fn byte_size(&self, t: &Typ) -> Option<u64> {
        match self.resolve_typedef(t) {
            Typ::Void | Typ::Fun { .. } | Typ::Named(_) => None,
            Typ::Int(k) | Typ::Enum { ikind: k, .. } => Some(k.size()),
            Typ::Float(k) => Some(k.size()),
            Typ::Ptr(_) => Some(CONFIG.default_pointer_size),
            t @ Typ::Array(..) => {
                let n = u64::try_from(t.array_length()?).ok()?;
                n.checked_mul(self.byte_size(t.array_element()?)?)
            }
            Typ::Comp { ckey, .. } => {
                let c = self.compinfo(ckey)?;
                let mut size = 0;
                for f in c.fields() {
                    let fsize = self.byte_size(&f.ftype)?;
                    let end = if c.is_union {
                        fsize
                    } else {
                        u64::try_from(f.byte_offset?).ok()? + fsize
                    };
                    size = size.max(end);
                }
                Some(size)
            }
        }
    }
}

/// Where a formal parameter lives on entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParameterLocation {
    Register(String),
    /// Byte offset from the stack pointer at entry.
    Stack(i64),
}

/// The symbols of one function.
#[derive(Debug)]
pub struct LocalSymbolTable {
    globals: Arc<GlobalSymbolTable>,
    function_name: String,
    symbols: UnorderedMap<String, Arc<VarInfo>>,
    formals: Vec<Arc<VarInfo>>,
    formal_locations: UnorderedMap<ParameterLocation, Arc<VarInfo>>,
    stack_vars: UnorderedMap<i64, Arc<VarInfo>>,
    registers: UnorderedMap<String, Arc<VarInfo>>,
    ssa_vars: UnorderedMap<(String, u64), Arc<VarInfo>>,
    ssa_by_site: OrderedMultiMap<u64, String>,
    ssa_values: UnorderedMap<String, Expr>,
    tmp_counter: usize,
}

impl LocalSymbolTable {
    pub fn new(globals: Arc<GlobalSymbolTable>, function_name: &str) -> Self {
        Self {
            globals,
            function_name: function_name.to_string(),
            symbols: Default::default(),
            formals: Default::default(),
            formal_locations: Default::default(),
            stack_vars: Default::default(),
            registers: Default::default(),
            ssa_vars: Default::default(),
            ssa_by_site: Default::default(),
            ssa_values: Default::default(),
            tmp_counter: 0,
        }
    }

    pub fn globals(&self) -> &Arc<GlobalSymbolTable> {
        &self.globals
    }

    pub fn function_name(&self) -> &str {
        &self.function_name
    }

    fn insert(&mut self, v: VarInfo) -> Arc<VarInfo> {
        let v = Arc::new(v);
        self.symbols.insert(v.name.clone(), v.clone());
        v
    }

    /// Add a local symbol; if one of the same name exists, it is returned instead.
    pub fn add_symbol(&mut self, v: VarInfo) -> Arc<VarInfo> {
        match self.symbols.get(&v.name) {
            Some(prev) => prev.clone(),
            None => self.insert(v),
        }
    }

    /// Look up a symbol, locals first.
    pub fn symbol(&self, name: &str) -> Option<Arc<VarInfo>> {
        self.symbols
            .get(name)
            .cloned()
            .or_else(|| self.globals.global(name))
    }

    pub fn local_symbols(&self) -> impl Iterator<Item = &Arc<VarInfo>> {
        self.symbols.values()
    }

    /// Add the next formal parameter, living at `location` on entry.
    pub fn add_formal(&mut self, name: &str, t: Typ, location: ParameterLocation) -> Arc<VarInfo> {
        let v = self.insert(VarInfo::new(name, Some(t)).with_parameter(self.formals.len()));
        self.formals.push(v.clone());
        self.formal_locations.insert(location, v.clone());
        v
    }

    pub fn formals(&self) -> &[Arc<VarInfo>] {
        &self.formals
    }

    pub fn formal_at(&self, location: &ParameterLocation) -> Option<Arc<VarInfo>> {
        self.formal_locations.get(location).cloned()
    }

    /// The variable for the register itself, outside of any SSA introduction.
    pub fn register_vinfo(&mut self, register: &str) -> Arc<VarInfo> {
        if let Some(v) = self.registers.get(register) {
            return v.clone();
        }
        let v = self.add_symbol(VarInfo::new(register, None).with_description("register"));
        self.registers.insert(register.to_string(), v.clone());
        v
    }

    /// The variable for a processor flag.
    pub fn flag_vinfo(&mut self, flag: &str) -> Arc<VarInfo> {
        self.add_symbol(VarInfo::new(flag, None).with_description("flag"))
    }

    /// The local variable at a frame offset, created on first use.
    pub fn stack_vinfo(&mut self, offset: i64, t: Option<Typ>) -> Arc<VarInfo> {
        if let Some(v) = self.stack_vars.get(&offset) {
            return v.clone();
        }
        let name = if offset < 0 {
            format!("localvar_{}", offset.unsigned_abs())
        } else {
            format!("stack_{}", offset)
        };
        let v = self.add_symbol(VarInfo::new(&name, t).with_description("stack"));
        self.stack_vars.insert(offset, v.clone());
        v
    }

    pub fn stack_var_at(&self, offset: i64) -> Option<Arc<VarInfo>> {
        self.stack_vars.get(&offset).cloned()
    }

    /// The SSA variable introduced for `register` at `site`, minting it on first request. An
    /// untyped variable takes `t` when it is requested again with one. The second component is
    /// true if the variable was newly minted.
    pub fn ssa_vinfo(&mut self, register: &str, site: u64, t: Option<Typ>) -> (Arc<VarInfo>, bool) {
        let key = (register.to_string(), site);
        if let Some(v) = self.ssa_vars.get(&key) {
            if let (None, Some(t)) = (v.vtype(), t) {
                // Cannot fail: the variable has no type yet
                let _ = v.refine_type(t);
            }
            return (v.clone(), false);
        }
        let name = format!("{}_{:x}", register, site);
        let v = self.add_symbol(
            VarInfo::new(&name, t).with_description(&format!("ssa value of {}", register)),
        );
        trace!("Introduced SSA variable"; "name" => &name, "site" => format!("{:#x}", site));
        self.ssa_vars.insert(key, v.clone());
        self.ssa_by_site.add(site, name);
        (v, true)
    }

    pub fn ssa_vinfo_at(&self, register: &str, site: u64) -> Option<Arc<VarInfo>> {
        self.ssa_vars.get(&(register.to_string(), site)).cloned()
    }

    /// All SSA variables introduced at `site`.
    pub fn ssa_vinfos_at_site(&self, site: u64) -> Vec<Arc<VarInfo>> {
        self.ssa_by_site
            .get(&site)
            .iter()
            .filter_map(|n| self.symbols.get(n).cloned())
            .collect()
    }

    /// Record the constant value of an SSA variable.
    pub fn set_ssa_value(&mut self, name: &str, value: Expr) {
        self.ssa_values.insert(name.to_string(), value);
    }

    pub fn ssa_value(&self, name: &str) -> Option<&Expr> {
        self.ssa_values.get(name)
    }

    /// A fresh temporary, `tmpN`.
    pub fn fresh_tmp(&mut self, t: Option<Typ>) -> Arc<VarInfo> {
        loop {
            self.tmp_counter += 1;
            let name = format!("tmp{}", self.tmp_counter);
            if !self.symbols.contains_key(&name) {
                return self.insert(VarInfo::new(&name, t).with_description("temporary"));
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::ast::{FieldInfo, IKind};

    fn hdr() -> CompInfo {
        CompInfo::new(
            "hdr_t",
            1,
            vec![
                FieldInfo {
                    name: "hdr".into(),
                    ftype: Typ::Int(IKind::UInt),
                    byte_offset: Some(0),
                },
                FieldInfo {
                    name: "len".into(),
                    ftype: Typ::Int(IKind::UInt),
                    byte_offset: Some(4),
                },
            ],
            false,
        )
    }

    #[test]
    fn compinfos_are_append_only() {
        let g = GlobalSymbolTable::new();
        g.add_compinfo(hdr()).unwrap();
        assert!(g.add_compinfo(hdr()).is_ok());
        let other = CompInfo::new("other", 1, vec![], false);
        assert_eq!(
            g.add_compinfo(other),
            Err(Error::ConflictingCompInfo {
                ckey: 1,
                name: "other".into()
            })
        );
        assert_eq!(
            g.byte_size(&Typ::Comp {
                name: "hdr_t".into(),
                ckey: 1
            }),
            Some(8)
        );
    }

    #[test]
    fn globals_are_found_by_contained_address() {
        let g = GlobalSymbolTable::new();
        g.add_compinfo(hdr()).unwrap();
        g.add_global(
            VarInfo::new(
                "g_hdr",
                Some(Typ::Comp {
                    name: "hdr_t".into(),
                    ckey: 1,
                }),
            )
            .with_global_address(0x1000),
        );
        let (v, off) = g.global_containing(0x1004).unwrap();
        assert_eq!((v.name.as_str(), off), ("g_hdr", 4));
        assert!(g.global_containing(0x1008).is_none());

        g.add_global(
            VarInfo::new("g_top", Some(Typ::Int(IKind::UInt))).with_global_address(u64::MAX - 1),
        );
        // Storage running past the end of the address space
        let (v, off) = g.global_containing(u64::MAX).unwrap();
        assert_eq!((v.name.as_str(), off), ("g_top", 1));
    }

    #[test]
    fn ssa_variables_are_minted_once_per_site() {
        let mut l = LocalSymbolTable::new(Arc::new(GlobalSymbolTable::new()), "f");
        let (a, fresh_a) = l.ssa_vinfo("R0", 0x10, None);
        let (b, fresh_b) = l.ssa_vinfo("R0", 0x10, None);
        assert!(fresh_a && !fresh_b);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.name, "R0_10");
        l.ssa_vinfo("R1", 0x10, None);
        assert_eq!(l.ssa_vinfos_at_site(0x10).len(), 2);
    }

    #[test]
    fn untyped_ssa_variables_take_a_later_type() {
        let mut l = LocalSymbolTable::new(Arc::new(GlobalSymbolTable::new()), "f");
        let (a, _) = l.ssa_vinfo("R0", 0x10, None);
        assert!(a.vtype().is_none());
        let (b, fresh) = l.ssa_vinfo("R0", 0x10, Some(Typ::Int(IKind::Int)));
        assert!(!fresh);
        assert_eq!(b.vtype(), Some(&Typ::Int(IKind::Int)));
        // The first type sticks
        l.ssa_vinfo("R0", 0x10, Some(Typ::Int(IKind::UInt)));
        assert_eq!(a.vtype(), Some(&Typ::Int(IKind::Int)));
    }

    #[test]
    fn stack_variables_are_created_on_first_use() {
        let mut l = LocalSymbolTable::new(Arc::new(GlobalSymbolTable::new()), "f");
        assert!(l.stack_var_at(-8).is_none());
        let v = l.stack_vinfo(-8, Some(Typ::Int(IKind::Int)));
        assert_eq!(v.name, "localvar_8");
        assert!(Arc::ptr_eq(&l.stack_vinfo(-8, None), &v));
        assert!(l.stack_var_at(-8).is_some());
        assert_eq!(l.stack_vinfo(12, None).name, "stack_12");
    }

    #[test]
    fn formals_are_found_by_location() {
        let mut l = LocalSymbolTable::new(Arc::new(GlobalSymbolTable::new()), "f");
        l.add_formal(
            "arg0",
            Typ::Int(IKind::Int),
            ParameterLocation::Register("R0".into()),
        );
        l.add_formal("arg1", Typ::Int(IKind::Int), ParameterLocation::Stack(4));
        let a = l
            .formal_at(&ParameterLocation::Stack(4))
            .expect("stack formal");
        assert_eq!((a.name.as_str(), a.parameter), ("arg1", Some(1)));
        assert!(l.formal_at(&ParameterLocation::Register("R1".into())).is_none());
    }
}
