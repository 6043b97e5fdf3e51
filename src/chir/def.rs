//! User-defined type definitions and the CHIR builder arena.
//!
//! `CustomTypeDef` models class/interface/struct/enum/extend definitions with
//! their vtables. Defs, functions and relations all live in one long-lived
//! `ChirBuilder`; every cross-reference is an index or a mangled name, never an
//! owning pointer, so mutually recursive types cost nothing special.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::types::{ChirType, wildcard_eq};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DefId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FuncId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DefKind {
    Class,
    Interface,
    Struct,
    Enum,
    Extend,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuncAttrs {
    pub is_virtual: bool,
    pub is_abstract: bool,
    pub is_static: bool,
    /// The receiver is taken mutably.
    pub mut_self: bool,
    pub is_operator: bool,
    /// Compiler-synthesised wrapper (mut thunk, virtual-shape thunk, overflow
    /// split).
    pub is_wrapper: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChirFunc {
    pub id: FuncId,
    /// Mangled name; unique across the builder.
    pub name: String,
    pub src_identifier: String,
    /// Full function type, receiver included for methods.
    pub ty: ChirType,
    pub attrs: FuncAttrs,
    pub parent: Option<DefId>,
}

/// One vtable slot: the source identifier, the concrete target (absent for
/// abstract slots) and the instantiated signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualFuncInfo {
    pub src_identifier: String,
    pub instance: Option<FuncId>,
    pub sig: ChirType,
    /// The type that declared the slot.
    pub parent_ty: ChirType,
}

/// Per-(subtype, super-interface) vector of concrete method targets indexed by
/// a stable slot number.
pub type VTable = BTreeMap<ChirType, Vec<VirtualFuncInfo>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomTypeDef {
    pub id: DefId,
    pub kind: DefKind,
    /// Mangled definition name.
    pub name: String,
    /// The type this def defines, or extends for extend defs.
    pub ty: ChirType,
    pub super_class: Option<ChirType>,
    pub interfaces: Vec<ChirType>,
    pub methods: Vec<FuncId>,
    pub fields: Vec<(String, ChirType)>,
    pub is_abstract: bool,
    pub vtable: VTable,
}

/// Long-lived owner of defs and functions.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChirBuilder {
    defs: Vec<CustomTypeDef>,
    funcs: Vec<ChirFunc>,
}

impl ChirBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_def(
        &mut self,
        kind: DefKind,
        name: impl Into<String>,
        ty: ChirType,
    ) -> DefId {
        let id = DefId(self.defs.len() as u32);
        self.defs.push(CustomTypeDef {
            id,
            kind,
            name: name.into(),
            ty,
            super_class: None,
            interfaces: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            is_abstract: false,
            vtable: VTable::new(),
        });
        id
    }

    pub fn add_func(
        &mut self,
        name: impl Into<String>,
        src_identifier: impl Into<String>,
        ty: ChirType,
        attrs: FuncAttrs,
        parent: Option<DefId>,
    ) -> FuncId {
        let id = FuncId(self.funcs.len() as u32);
        self.funcs.push(ChirFunc {
            id,
            name: name.into(),
            src_identifier: src_identifier.into(),
            ty,
            attrs,
            parent,
        });
        if let Some(parent) = parent {
            self.defs[parent.0 as usize].methods.push(id);
        }
        id
    }

    pub fn def(&self, id: DefId) -> &CustomTypeDef {
        &self.defs[id.0 as usize]
    }

    pub fn def_mut(&mut self, id: DefId) -> &mut CustomTypeDef {
        &mut self.defs[id.0 as usize]
    }

    pub fn func(&self, id: FuncId) -> &ChirFunc {
        &self.funcs[id.0 as usize]
    }

    pub fn func_mut(&mut self, id: FuncId) -> &mut ChirFunc {
        &mut self.funcs[id.0 as usize]
    }

    pub fn defs(&self) -> &[CustomTypeDef] {
        &self.defs
    }

    pub fn funcs(&self) -> &[ChirFunc] {
        &self.funcs
    }

    pub fn def_of_type(&self, ty: &ChirType) -> Option<DefId> {
        let def_name = ty.def_name()?;
        self.defs.iter().find(|d| d.name == def_name).map(|d| d.id)
    }

    pub fn def_by_name(&self, name: &str) -> Option<DefId> {
        self.defs.iter().find(|d| d.name == name).map(|d| d.id)
    }

    pub fn func_by_name(&self, name: &str) -> Option<FuncId> {
        self.funcs.iter().find(|f| f.name == name).map(|f| f.id)
    }

    /// Direct subclasses / implementing types of a definition.
    pub fn sub_defs(&self, parent: DefId) -> Vec<DefId> {
        let parent_name = &self.def(parent).name;
        self.defs
            .iter()
            .filter(|d| {
                d.super_class
                    .as_ref()
                    .and_then(ChirType::def_name)
                    .is_some_and(|n| n == parent_name)
                    || d.interfaces
                        .iter()
                        .filter_map(ChirType::def_name)
                        .any(|n| n == parent_name)
            })
            .map(|d| d.id)
            .collect()
    }

    /// Transitive closure of super class, implemented interfaces, and
    /// interfaces added by extends of the same type, in stable order.
    pub fn super_types_recursively(&self, id: DefId) -> Vec<ChirType> {
        let mut out: Vec<ChirType> = Vec::new();
        let mut worklist: Vec<ChirType> = Vec::new();
        let def = self.def(id);
        if let Some(sup) = &def.super_class {
            worklist.push(sup.clone());
        }
        worklist.extend(def.interfaces.iter().cloned());
        // extends of the same underlying type contribute their interfaces
        for other in &self.defs {
            if other.kind == DefKind::Extend && other.id != id && other.ty == def.ty {
                worklist.extend(other.interfaces.iter().cloned());
            }
        }
        while let Some(ty) = worklist.pop() {
            if out.contains(&ty) {
                continue;
            }
            if let Some(parent_id) = self.def_of_type(&ty) {
                let parent = self.def(parent_id);
                if let Some(sup) = &parent.super_class {
                    worklist.push(sup.clone());
                }
                worklist.extend(parent.interfaces.iter().cloned());
            }
            out.push(ty);
        }
        out.sort();
        out
    }

    /// Find a method of `def` (searching the super-class chain) matching a
    /// slot's identifier and signature, generic variables wild.
    pub fn resolve_override(
        &self,
        def: DefId,
        identifier: &str,
        sig: &ChirType,
    ) -> Option<FuncId> {
        let mut cur = Some(def);
        while let Some(d) = cur {
            for &m in &self.def(d).methods {
                let f = self.func(m);
                if f.src_identifier == identifier && !f.attrs.is_abstract && wildcard_eq(&f.ty, sig)
                {
                    return Some(m);
                }
            }
            // extends of the same type can carry the implementation
            let ty = &self.def(d).ty;
            for other in &self.defs {
                if other.kind == DefKind::Extend && other.ty == *ty {
                    for &m in &other.methods {
                        let f = self.func(m);
                        if f.src_identifier == identifier
                            && !f.attrs.is_abstract
                            && wildcard_eq(&f.ty, sig)
                        {
                            return Some(m);
                        }
                    }
                }
            }
            cur = self
                .def(d)
                .super_class
                .as_ref()
                .and_then(|sup| self.def_of_type(sup));
        }
        None
    }
}
