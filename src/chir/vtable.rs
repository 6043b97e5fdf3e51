//! Vtable generation and the overflow-operator split.
//!
//! For every implementing type `T` and super-interface `I` of `T`, the vtable
//! `T -> I` carries one entry per virtual method declared on `I`, at a stable
//! offset given by the interface's method declaration order. Overrides are
//! structural: a sub-declaration overrides a super-declaration iff the slot in
//! the sub-type's vtable points at it.

use super::def::{ChirBuilder, DefId, DefKind, FuncAttrs, VirtualFuncInfo};
use super::types::ChirType;
use crate::mangle::overflow_operator_name;

/// Operators subject to integer overflow, split per strategy.
const OVERFLOW_OPS: &[&str] = &["+", "-", "*", "/", "%", "**"];

/// The three overflow strategies a split slot materialises.
pub const OVERFLOW_STRATEGIES: &[&str] = &["wrapping", "throwing", "saturating"];

/// Populate the vtable of one definition from its recursive super-interface
/// set. Panics when a concrete class leaves a non-abstract slot without an
/// instance; that is a front-end invariant violation, not a recoverable
/// condition.
pub fn generate_vtable(builder: &mut ChirBuilder, def: DefId) {
    let supers = builder.super_types_recursively(def);
    let mut vtable = builder.def(def).vtable.clone();
    for super_ty in supers {
        let Some(iface_id) = builder.def_of_type(&super_ty) else {
            continue;
        };
        if builder.def(iface_id).kind != DefKind::Interface {
            continue;
        }
        let mut slots: Vec<VirtualFuncInfo> = Vec::new();
        for &method in &builder.def(iface_id).methods {
            let m = builder.func(method);
            if !m.attrs.is_virtual && !m.attrs.is_abstract {
                continue;
            }
            let instance = builder.resolve_override(def, &m.src_identifier, &m.ty);
            let def_ref = builder.def(def);
            if instance.is_none()
                && def_ref.kind == DefKind::Class
                && !def_ref.is_abstract
                && !m.attrs.is_abstract
            {
                panic!(
                    "vtable entry {} of {} has no instance",
                    m.src_identifier, def_ref.name
                );
            }
            slots.push(VirtualFuncInfo {
                src_identifier: m.src_identifier.clone(),
                instance,
                sig: m.ty.clone(),
                parent_ty: super_ty.clone(),
            });
        }
        if !slots.is_empty() {
            vtable.insert(super_ty, slots);
        }
    }
    builder.def_mut(def).vtable = vtable;
}

/// Split overflow-capable operator slots on integer interfaces into one slot
/// per strategy. For extends of builtin numeric types, synthesise the thin
/// functions that perform the primitive operation under each strategy.
pub fn update_operator_vtable(builder: &mut ChirBuilder, def: DefId) {
    if !builder.def(def).ty.is_integer() {
        return;
    }
    let operand = builder.def(def).ty.render();
    let is_builtin_extend = builder.def(def).kind == DefKind::Extend;
    let vtable = builder.def(def).vtable.clone();
    let mut new_vtable = vtable.clone();

    for (iface, slots) in vtable {
        let mut replaced: Vec<VirtualFuncInfo> = Vec::new();
        for slot in slots {
            if !OVERFLOW_OPS.contains(&slot.src_identifier.as_str()) {
                replaced.push(slot);
                continue;
            }
            for strategy in OVERFLOW_STRATEGIES {
                let name = overflow_operator_name(&slot.src_identifier, strategy, &operand);
                let instance = if is_builtin_extend {
                    let existing = builder.func_by_name(&name);
                    Some(existing.unwrap_or_else(|| {
                        builder.add_func(
                            name.clone(),
                            slot.src_identifier.clone(),
                            slot.sig.clone(),
                            FuncAttrs { is_operator: true, is_wrapper: true, ..Default::default() },
                            Some(def),
                        )
                    }))
                } else {
                    slot.instance
                };
                replaced.push(VirtualFuncInfo {
                    src_identifier: name,
                    instance,
                    sig: slot.sig.clone(),
                    parent_ty: slot.parent_ty.clone(),
                });
            }
        }
        new_vtable.insert(iface, replaced);
    }
    builder.def_mut(def).vtable = new_vtable;
}

/// Slot offset of `method` in the vtable of `def` for interface `iface`.
pub fn slot_offset(builder: &ChirBuilder, def: DefId, iface: &ChirType, method: &str) -> Option<usize> {
    builder
        .def(def)
        .vtable
        .get(iface)
        .and_then(|slots| slots.iter().position(|s| s.src_identifier == method))
}
