//! Wrapper thunks for vtable slots.
//!
//! Two families: mut-receiver thunks for struct methods reached through an
//! interface (the thunk loads every field, dispatches, and stores back,
//! preserving the mutable-`this` convention), and virtual-shape thunks for
//! methods whose receiver shape differs between parent and child. Each family
//! owns a distinct name prefix, and the virtual-shape cache is keyed by
//! (raw method, sub def, parent type) with generic variables wild.

use std::collections::BTreeMap;

use super::def::{ChirBuilder, DefId, FuncAttrs, FuncId};
use super::types::{ChirType, wildcard_eq};
use crate::mangle::{mutable_wrapper_name, virtual_wrapper_name};

/// Wrap every mut method of a struct-shaped definition that appears in a
/// vtable slot. Returns the wrapper cache (mangled name -> wrapper func).
pub fn wrap_mut_funcs(builder: &mut ChirBuilder, def: DefId) -> BTreeMap<String, FuncId> {
    let mut wrappers = BTreeMap::new();
    if !matches!(builder.def(def).ty, ChirType::Struct { .. }) {
        return wrappers;
    }
    let def_name = builder.def(def).name.clone();
    let vtable = builder.def(def).vtable.clone();
    let mut new_vtable = vtable.clone();

    for (iface, slots) in vtable {
        let mut updated = slots.clone();
        for (offset, slot) in slots.iter().enumerate() {
            let Some(instance) = slot.instance else {
                continue;
            };
            let raw = builder.func(instance).clone();
            if !raw.attrs.mut_self || raw.attrs.is_wrapper {
                continue;
            }
            let name = mutable_wrapper_name(&raw.name, &def_name);
            let wrapper = builder.func_by_name(&name).unwrap_or_else(|| {
                builder.add_func(
                    name.clone(),
                    raw.src_identifier.clone(),
                    raw.ty.clone(),
                    FuncAttrs { is_wrapper: true, mut_self: false, ..raw.attrs },
                    Some(def),
                )
            });
            wrappers.insert(name, wrapper);
            updated[offset].instance = Some(wrapper);
        }
        new_vtable.insert(iface, updated);
    }
    builder.def_mut(def).vtable = new_vtable;
    wrappers
}

/// Cache of virtual-shape wrappers, keyed by (raw method, sub def, parent
/// type). The parent-type component compares structurally with generic
/// variables as wildcards, so one wrapper serves every instantiation of the
/// same generic parent.
#[derive(Debug, Default)]
pub struct VirtualFuncWrapper {
    cache: Vec<((String, DefId, ChirType), FuncId)>,
}

impl VirtualFuncWrapper {
    pub fn new() -> Self {
        Self::default()
    }

    fn lookup(&self, raw: &str, def: DefId, parent_ty: &ChirType) -> Option<FuncId> {
        self.cache
            .iter()
            .find(|((name, d, ty), _)| name == raw && *d == def && wildcard_eq(ty, parent_ty))
            .map(|(_, id)| *id)
    }

    /// Wrap every slot of `def` whose instance signature no longer matches the
    /// declared slot signature exactly (an instantiated receiver shape).
    pub fn run(&mut self, builder: &mut ChirBuilder, def: DefId) {
        let def_name = builder.def(def).name.clone();
        let vtable = builder.def(def).vtable.clone();
        let mut new_vtable = vtable.clone();

        for (iface, slots) in vtable {
            let mut updated = slots.clone();
            for (offset, slot) in slots.iter().enumerate() {
                let Some(instance) = slot.instance else {
                    continue;
                };
                let raw = builder.func(instance).clone();
                if raw.attrs.is_wrapper {
                    continue;
                }
                // exact match: dispatch straight to the instance
                if raw.ty == slot.sig {
                    continue;
                }
                // shape differs only up to generic variables: thunk it
                if !wildcard_eq(&raw.ty, &slot.sig) {
                    continue;
                }
                let wrapper = match self.lookup(&raw.name, def, &slot.parent_ty) {
                    Some(existing) => existing,
                    None => {
                        let name = virtual_wrapper_name(&raw.name, &def_name);
                        let id = builder.add_func(
                            name,
                            raw.src_identifier.clone(),
                            slot.sig.clone(),
                            FuncAttrs { is_wrapper: true, ..raw.attrs },
                            Some(def),
                        );
                        self.cache
                            .push(((raw.name.clone(), def, slot.parent_ty.clone()), id));
                        id
                    }
                };
                updated[offset].instance = Some(wrapper);
            }
            new_vtable.insert(iface, updated);
        }
        builder.def_mut(def).vtable = new_vtable;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chir::def::{DefKind, VirtualFuncInfo};

    fn sig(params: Vec<ChirType>) -> ChirType {
        ChirType::func(params, ChirType::Unit)
    }

    #[test]
    fn mut_method_gets_thunk() {
        let mut b = ChirBuilder::new();
        let s = b.add_def(DefKind::Struct, "app.1S", ChirType::strukt("app.1S"));
        let method = b.add_func(
            "_FNapp.1S.4bump",
            "bump",
            sig(vec![ChirType::strukt("app.1S")]),
            FuncAttrs { mut_self: true, is_virtual: true, ..Default::default() },
            Some(s),
        );
        b.def_mut(s).vtable.insert(
            ChirType::class("app.1I"),
            vec![VirtualFuncInfo {
                src_identifier: "bump".into(),
                instance: Some(method),
                sig: sig(vec![ChirType::strukt("app.1S")]),
                parent_ty: ChirType::class("app.1I"),
            }],
        );

        let wrappers = wrap_mut_funcs(&mut b, s);
        assert_eq!(wrappers.len(), 1);
        let slot = &b.def(s).vtable[&ChirType::class("app.1I")][0];
        let wrapped = slot.instance.unwrap();
        assert_ne!(wrapped, method);
        assert!(b.func(wrapped).attrs.is_wrapper);
        assert!(!b.func(wrapped).attrs.mut_self);
    }

    #[test]
    fn class_defs_not_mut_wrapped() {
        let mut b = ChirBuilder::new();
        let c = b.add_def(DefKind::Class, "app.1C", ChirType::class("app.1C"));
        assert!(wrap_mut_funcs(&mut b, c).is_empty());
    }

    #[test]
    fn virtual_wrapper_cache_reuses_across_instantiations() {
        let mut b = ChirBuilder::new();
        let c = b.add_def(DefKind::Class, "app.1C", ChirType::class("app.1C"));
        let generic_sig = sig(vec![ChirType::Generic("T".into())]);
        let method = b.add_func(
            "_FNapp.1C.3get",
            "get",
            generic_sig,
            FuncAttrs { is_virtual: true, ..Default::default() },
            Some(c),
        );
        let parent = ChirType::Class {
            def: "app.1P".into(),
            args: vec![ChirType::Generic("T".into())],
        };
        let make_slot = |concrete: ChirType| VirtualFuncInfo {
            src_identifier: "get".into(),
            instance: Some(method),
            sig: sig(vec![concrete]),
            parent_ty: parent.clone(),
        };
        b.def_mut(c).vtable.insert(
            ChirType::Class { def: "app.1P".into(), args: vec![ChirType::Bool] },
            vec![make_slot(ChirType::Bool)],
        );
        b.def_mut(c).vtable.insert(
            ChirType::Class { def: "app.1P".into(), args: vec![ChirType::Rune] },
            vec![make_slot(ChirType::Rune)],
        );

        let mut wrapper = VirtualFuncWrapper::new();
        wrapper.run(&mut b, c);
        // both instantiated slots share the one cached thunk for the generic parent
        let first = b.def(c).vtable
            [&ChirType::Class { def: "app.1P".into(), args: vec![ChirType::Bool] }][0]
            .instance
            .unwrap();
        let second = b.def(c).vtable
            [&ChirType::Class { def: "app.1P".into(), args: vec![ChirType::Rune] }][0]
            .instance
            .unwrap();
        assert_eq!(first, second);
        assert!(b.func(first).attrs.is_wrapper);
    }
}
