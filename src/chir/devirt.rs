//! Devirtualisation.
//!
//! Speculates a single concrete callee for an `invoke` site by walking the
//! subclass relation and the extend/implements relation, looking the slot up
//! in each candidate's vtable, and rewriting the call to a direct `apply`, or
//! to a primitive binary operation when the callee is a recognised comparable
//! or successor operator on a primitive type. Frozen instantiations produced
//! along the way are emitted as new internal functions under an
//! instantiation-mangled name and cached so repeated sites share one copy.

use std::collections::BTreeSet;

use super::def::{ChirBuilder, DefId, FuncAttrs, FuncId};
use super::types::{ChirType, wildcard_eq};
use super::vtable::slot_offset;
use crate::mangle::instantiate_name;

/// Comparable and successor operators that lower to primitive instructions.
const BUILTIN_OPS: &[&str] = &["==", "!=", "<", "<=", ">", ">=", "next"];

/// One virtual call site, as handed over by the translation layer.
#[derive(Debug, Clone)]
pub struct InvokeSite {
    pub receiver: ChirType,
    pub method: String,
    /// Instantiated signature at the call site.
    pub sig: ChirType,
}

/// The rewrite devirtualisation decided on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DevirtRewrite {
    /// Direct call of a known function.
    Apply { callee: String },
    /// Primitive binary operation, no call at all.
    BuiltinOp { op: String },
}

/// Devirtualisation pass state: the frozen-instantiation cache survives across
/// call sites so each instantiation is emitted once.
#[derive(Debug, Default)]
pub struct Devirtualization {
    frozen_insts: Vec<FuncId>,
}

impl Devirtualization {
    pub fn new() -> Self {
        Self::default()
    }

    /// Functions instantiated by devirtualisation this run.
    pub fn frozen_inst_funcs(&self) -> &[FuncId] {
        &self.frozen_insts
    }

    /// Try to rewrite one invoke site. `None` means the site stays virtual.
    pub fn run(&mut self, builder: &mut ChirBuilder, site: &InvokeSite) -> Option<DevirtRewrite> {
        if site.receiver.is_integer() && BUILTIN_OPS.contains(&site.method.as_str()) {
            return Some(DevirtRewrite::BuiltinOp { op: site.method.clone() });
        }

        let root = builder.def_of_type(&site.receiver)?;
        let candidates = self.collect_candidates(builder, root);

        // the slot offset must agree between parent and child; a mismatch is a
        // broken vtable, not a missed optimisation
        let mut expected_offset: Option<usize> = None;
        let mut targets: BTreeSet<FuncId> = BTreeSet::new();
        for candidate in &candidates {
            for (iface, slots) in builder.def(*candidate).vtable.clone() {
                let Some(offset) = slot_offset(builder, *candidate, &iface, &site.method) else {
                    continue;
                };
                match expected_offset {
                    None => expected_offset = Some(offset),
                    Some(expected) => {
                        if expected != offset {
                            panic!(
                                "vtable index mismatch for {} between parent and child",
                                site.method
                            );
                        }
                    }
                }
                let slot = &slots[offset];
                if !wildcard_eq(&slot.sig, &site.sig) {
                    continue;
                }
                if let Some(instance) = slot.instance {
                    targets.insert(instance);
                }
            }
        }

        // speculation only pays off with exactly one concrete callee
        let mut iter = targets.into_iter();
        let only = iter.next()?;
        if iter.next().is_some() {
            return None;
        }
        let callee = self.instantiate_if_generic(builder, only, site);
        Some(DevirtRewrite::Apply { callee })
    }

    /// The receiver's def plus its transitive sub-defs.
    fn collect_candidates(&self, builder: &ChirBuilder, root: DefId) -> Vec<DefId> {
        let mut out = vec![root];
        let mut worklist = vec![root];
        while let Some(cur) = worklist.pop() {
            for sub in builder.sub_defs(cur) {
                if !out.contains(&sub) {
                    out.push(sub);
                    worklist.push(sub);
                }
            }
        }
        out
    }

    /// A generic callee at a concrete site is frozen into an internal function
    /// with an instantiation-mangled name, once per (callee, site signature).
    fn instantiate_if_generic(
        &mut self,
        builder: &mut ChirBuilder,
        callee: FuncId,
        site: &InvokeSite,
    ) -> String {
        let raw = builder.func(callee).clone();
        if !type_has_generic(&raw.ty) {
            return raw.name;
        }
        let args = generic_bindings(&raw.ty, &site.sig);
        let name = instantiate_name(&raw.name, &args);
        if builder.func_by_name(&name).is_none() {
            let id = builder.add_func(
                name.clone(),
                raw.src_identifier.clone(),
                site.sig.clone(),
                FuncAttrs { is_wrapper: false, ..raw.attrs },
                raw.parent,
            );
            self.frozen_insts.push(id);
        }
        name
    }
}

fn type_has_generic(ty: &ChirType) -> bool {
    match ty {
        ChirType::Generic(_) => true,
        ChirType::Class { args, .. } | ChirType::Struct { args, .. } | ChirType::Enum { args, .. } => {
            args.iter().any(type_has_generic)
        }
        ChirType::Func { params, ret } => params.iter().any(type_has_generic) || type_has_generic(ret),
        ChirType::Ref(inner) => type_has_generic(inner),
        ChirType::Tuple(elems) => elems.iter().any(type_has_generic),
        _ => false,
    }
}

/// Renders of the concrete types each generic variable binds to at the site,
/// in first-appearance order of the variables.
fn generic_bindings(generic: &ChirType, concrete: &ChirType) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    collect_bindings(generic, concrete, &mut seen, &mut out);
    out
}

fn collect_bindings(
    generic: &ChirType,
    concrete: &ChirType,
    seen: &mut BTreeSet<String>,
    out: &mut Vec<String>,
) {
    match (generic, concrete) {
        (ChirType::Generic(name), c) => {
            if seen.insert(name.clone()) {
                out.push(c.render());
            }
        }
        (ChirType::Func { params: pg, ret: rg }, ChirType::Func { params: pc, ret: rc }) => {
            for (g, c) in pg.iter().zip(pc) {
                collect_bindings(g, c, seen, out);
            }
            collect_bindings(rg, rc, seen, out);
        }
        (
            ChirType::Class { args: ag, .. } | ChirType::Struct { args: ag, .. }
            | ChirType::Enum { args: ag, .. },
            ChirType::Class { args: ac, .. } | ChirType::Struct { args: ac, .. }
            | ChirType::Enum { args: ac, .. },
        ) => {
            for (g, c) in ag.iter().zip(ac) {
                collect_bindings(g, c, seen, out);
            }
        }
        (ChirType::Ref(ig), ChirType::Ref(ic)) => collect_bindings(ig, ic, seen, out),
        (ChirType::Tuple(eg), ChirType::Tuple(ec)) => {
            for (g, c) in eg.iter().zip(ec) {
                collect_bindings(g, c, seen, out);
            }
        }
        _ => {}
    }
}
