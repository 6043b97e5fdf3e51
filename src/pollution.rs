//! Pollution analysis: expand the raw AST diff into the full recompile and
//! delete sets.
//!
//! A fixed-point walk over the usage graph built from the previous build's
//! semantic usages, the type relation map, the CHIR optimisation-effect map
//! and the box-site map. Each record carries monotone per-axis state (body,
//! api, instantiation, box) so every rule fires at most once per declaration
//! per axis; revisiting is a no-op, which is also how cyclic type graphs
//! terminate.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use crate::IncreKind;
use crate::ast::{Decl, DeclId, DeclKind, Package, RawMangled2DeclMap, RawMangledName, TypeNode};
use crate::cache::SemanticInfo;
use crate::diff::{CommonChange, ModifiedDecls, TypeChange};
use crate::graph::{Axis, PollutionMap, PollutionMapBuilder, TypeMap};
use crate::imports::ImportManager;
use crate::logger::logger;
use crate::mangle::{
    Mangler, default_ctor_name, identifier_of, is_compiler_added_name, truncate_extend,
};

/// Output of the pollution analysis.
#[derive(Debug, Default)]
pub struct PollutionResult {
    pub kind: IncreKind,
    /// Decls to re-check and re-emit, sorted by `(file, gvid)`.
    pub decls_to_recompile: Vec<DeclId>,
    /// Raw mangled names to delete from the cached IR, lexicographic.
    pub deleted: Vec<RawMangledName>,
    /// Types whose box wrappers must be regenerated, lexicographic.
    pub re_boxed_types: Vec<RawMangledName>,
}

pub struct PollutionArgs<'a> {
    pub raw_modified: ModifiedDecls,
    pub pkg: &'a Package,
    pub sema_info: &'a SemanticInfo,
    pub chir_opt_info: &'a BTreeMap<RawMangledName, BTreeSet<RawMangledName>>,
    pub cc_out_funcs: &'a BTreeSet<RawMangledName>,
    pub importer: &'a ImportManager,
    pub mangled2decl: &'a RawMangled2DeclMap,
    /// Direct extends grouped by their shared raw mangled name.
    pub direct_extends: HashMap<RawMangledName, Vec<DeclId>>,
}

#[derive(Default, Clone, Copy)]
struct CommonRecord {
    sig: bool,
    src_use: bool,
    body: bool,
}

#[derive(Default, Clone, Copy)]
struct TypeRecord {
    inst_var: bool,
    virt: bool,
    sig: bool,
    src_use: bool,
    body: bool,
}

#[derive(Default, Clone, Copy)]
struct OtherRecord {
    instantiation: bool,
    chir_opt: bool,
    boxed: bool,
}

struct PollutionAnalyzer<'a> {
    map: PollutionMap,
    tmap: TypeMap,
    pkg: &'a Package,
    mangled2decl: &'a RawMangled2DeclMap,
    mangler: Mangler,
    chir_opt_map: HashMap<RawMangledName, Vec<DeclId>>,
    direct_extends: HashMap<RawMangledName, Vec<DeclId>>,
    /// user decl -> compiler-added mangled names, from the cached tables.
    compiler_added: &'a BTreeMap<RawMangledName, BTreeSet<String>>,

    polluted: HashSet<DeclId>,
    deleted: Vec<RawMangledName>,
    re_boxed: Vec<RawMangledName>,

    changes: HashMap<DeclId, CommonRecord>,
    type_changes: HashMap<DeclId, TypeRecord>,
    other: HashMap<RawMangledName, OtherRecord>,
    visited_body: HashSet<DeclId>,
    visited_api: HashSet<DeclId>,

    // fallback evidence
    type_aliases: Vec<DeclId>,
    unfound_extends: Vec<DeclId>,
    unfound_names: Vec<RawMangledName>,
    removed_not_supported: Vec<RawMangledName>,
}

/// Run the pollution analysis over a raw diff.
pub fn analyze(args: PollutionArgs<'_>) -> PollutionResult {
    let log = logger();
    if !args.raw_modified.changed_aliases.is_empty() {
        if log.is_enabled() {
            for &id in &args.raw_modified.changed_aliases {
                log.log_line(&format!(
                    "changed typealias: {}",
                    args.pkg.decl(id).raw_mangle
                ));
            }
        }
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }

    let builder = PollutionMapBuilder::new(args.pkg, args.mangled2decl);
    let (map, tmap) = builder.build(args.sema_info, args.importer);

    let mut chir_opt_map: HashMap<RawMangledName, Vec<DeclId>> = HashMap::new();
    for (src, affected) in args.chir_opt_info {
        let resolved: Vec<DeclId> = affected
            .iter()
            .filter_map(|m| args.mangled2decl.get(m).copied())
            .collect();
        if !resolved.is_empty() {
            chir_opt_map.insert(src.clone(), resolved);
        }
    }

    let mut analyzer = PollutionAnalyzer {
        map,
        tmap,
        pkg: args.pkg,
        mangled2decl: args.mangled2decl,
        mangler: Mangler::new(args.pkg.name.clone()),
        chir_opt_map,
        direct_extends: args.direct_extends,
        compiler_added: &args.sema_info.compiler_added_usages,
        polluted: HashSet::new(),
        deleted: Vec::new(),
        re_boxed: Vec::new(),
        changes: HashMap::new(),
        type_changes: HashMap::new(),
        other: HashMap::new(),
        visited_body: HashSet::new(),
        visited_api: HashSet::new(),
        type_aliases: Vec::new(),
        unfound_extends: Vec::new(),
        unfound_names: Vec::new(),
        removed_not_supported: Vec::new(),
    };

    let raw = args.raw_modified;
    analyzer.unfound_names.extend(raw.unfound.iter().cloned());
    if analyzer.fallback() {
        analyzer.print_fallback_info();
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }
    for &id in &raw.added {
        analyzer.for_added_decl(id);
    }
    if analyzer.fallback() {
        analyzer.print_fallback_info();
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }
    for mangle in &raw.deletes {
        analyzer.for_deleted_decl(mangle);
    }
    if analyzer.fallback() {
        analyzer.print_fallback_info();
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }
    for alias in &raw.deleted_type_aliases {
        analyzer.removed_not_supported.push(alias.clone());
    }
    if analyzer.fallback() {
        analyzer.print_fallback_info();
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }
    for change in &raw.commons {
        analyzer.for_changed_common(change);
    }
    if analyzer.fallback() {
        analyzer.print_fallback_info();
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }
    for (id, change) in &raw.types {
        analyzer.for_changed_type(*id, change);
    }
    if analyzer.fallback() {
        analyzer.print_fallback_info();
        return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
    }
    for &id in &raw.order_changes {
        analyzer.for_order_change(id);
    }

    // closure-converted output is not incrementally relinkable
    for &id in &analyzer.polluted {
        let mangle = &args.pkg.decl(id).raw_mangle;
        if args.cc_out_funcs.contains(mangle) {
            if log.is_enabled() {
                log.log_line(&format!("closure converted func polluted: {mangle}"));
            }
            return PollutionResult { kind: IncreKind::Rollback, ..Default::default() };
        }
    }

    let mut decls: Vec<DeclId> = analyzer.polluted.iter().copied().collect();
    decls.sort_by(|&a, &b| {
        let da = args.pkg.decl(a);
        let db = args.pkg.decl(b);
        da.gvid.cmp(&db.gvid).then_with(|| da.raw_mangle.cmp(&db.raw_mangle))
    });
    let mut deleted = analyzer.deleted;
    deleted.sort_unstable();
    deleted.dedup();
    let mut re_boxed = analyzer.re_boxed;
    re_boxed.sort_unstable();
    re_boxed.dedup();

    let kind = if decls.is_empty() && deleted.is_empty() {
        IncreKind::NoChange
    } else {
        IncreKind::Incr
    };
    PollutionResult { kind, decls_to_recompile: decls, deleted, re_boxed_types: re_boxed }
}

impl<'a> PollutionAnalyzer<'a> {
    fn decl(&self, id: DeclId) -> &'a Decl {
        self.pkg.decl(id)
    }

    /// The declaration or any enclosing declaration is generic.
    fn in_generic(&self, id: DeclId) -> bool {
        let mut cur = Some(id);
        while let Some(c) = cur {
            let d = self.decl(c);
            if d.is_generic() {
                return true;
            }
            cur = d.outer;
        }
        false
    }

    fn add_to_polluted(&mut self, id: DeclId) {
        self.polluted.insert(id);
        let decl = self.decl(id);
        match &decl.kind {
            DeclKind::Func(f) if decl.is_imported() => {
                // collect default-parameter functions whether or not the
                // desugared body survives, so a change of inlinability of a
                // default-value function is still seen downstream
                for param in &f.sig.params {
                    if let Some(default_fn) = param.default_fn {
                        self.add_to_polluted(default_fn);
                    }
                }
            }
            DeclKind::VarWithPattern(vp) => {
                for &element in &vp.elements.clone() {
                    self.polluted.insert(element);
                }
            }
            _ => {}
        }
    }

    // ---- added decls ----

    fn for_added_decl(&mut self, id: DeclId) {
        let decl = self.decl(id);
        if matches!(decl.kind, DeclKind::TypeAlias(_)) {
            self.type_aliases.push(id);
            return;
        }
        if decl.is_type_decl() {
            self.for_added_type_decl(id);
        } else {
            self.for_added_non_type_decl(id);
        }
    }

    fn for_added_type_decl(&mut self, id: DeclId) {
        let decl = self.decl(id);
        if decl.is_imported() {
            // imported decls were checked upstream; only generics and their
            // members need local recompilation
            if self.in_generic(id) {
                self.add_to_polluted(id);
            }
            for &member in &decl.member_ids().to_vec() {
                self.for_added_non_type_decl(member);
            }
        } else {
            self.add_to_polluted(id);
            for member in self.pkg.all_members(id) {
                self.for_added_non_type_decl(member);
            }
        }

        self.pollute_unqualified_uses(id);
        self.pollute_package_qualified_uses(id);
        self.pollute_qualified_uses(id);

        if matches!(self.decl(id).kind, DeclKind::Extend(_)) {
            self.addition_for_added_extend(id);
        }
    }

    fn for_added_non_type_decl(&mut self, id: DeclId) {
        let decl = self.decl(id);
        if decl.is_imported() {
            let src_imported = match &decl.kind {
                DeclKind::Var(v) => decl.outer.is_none() && v.init.is_some(),
                DeclKind::Func(f) => f.body.is_some(),
                _ => false,
            };
            if src_imported || self.in_generic(id) {
                self.add_to_polluted(id);
            }
        } else {
            self.add_to_polluted(id);
        }
        self.for_added_non_type_decl_impl(id);
    }

    fn for_added_non_type_decl_impl(&mut self, id: DeclId) {
        let decl = self.decl(id);
        match &decl.kind {
            DeclKind::Prop(p) => {
                for &acc in p.getters.iter().chain(p.setters.iter()) {
                    self.add_to_polluted(acc);
                    self.for_added_non_type_decl_impl(acc);
                }
            }
            DeclKind::VarWithPattern(vp) => {
                for &element in &vp.elements {
                    self.add_to_polluted(element);
                    self.for_added_non_type_decl_impl(element);
                }
            }
            _ => {}
        }
        self.pollute_unqualified_uses(id);
        self.pollute_package_qualified_uses(id);
        self.pollute_qualified_uses(id);
    }

    // ---- extend special rules ----

    /// Direct extends merge under one mangled name; a change to one must
    /// recompile all of them.
    fn addition_for_body_changed_extend(&mut self, id: DeclId) {
        let decl = self.decl(id);
        let DeclKind::Extend(e) = &decl.kind else { return };
        if !e.interfaces.is_empty() {
            return;
        }
        if let Some(peers) = self.direct_extends.get(&decl.raw_mangle).cloned() {
            for peer in peers {
                if !self.polluted.contains(&peer) {
                    self.add_to_polluted(peer);
                    self.for_added_type_decl(peer);
                }
            }
        }
    }

    fn addition_api_of_extended_decl(&mut self, id: DeclId) {
        let Some(target_tag) = self.extended_type_mangle(id) else {
            self.unfound_extends.push(id);
            return;
        };
        if let Some(&target) = self.mangled2decl.get(&target_tag) {
            self.pollute_api_of(target);
        } else {
            // primitive or builtin extended type: no decl exists, re-pollute
            // its other extends instead
            for extend in self.tmap.all_extends_of_type(&target_tag).to_vec() {
                if let Some(&eid) = self.mangled2decl.get(&extend) {
                    self.add_to_polluted(eid);
                    self.pollute_instantiation_change(eid);
                }
            }
        }
    }

    fn addition_api_of_extend_decl(&mut self, id: DeclId) {
        self.addition_api_of_extended_decl(id);
        let mangle = self.decl(id).raw_mangle.clone();
        self.addition_api_of_direct_extends(&mangle);
    }

    fn addition_for_added_extend(&mut self, id: DeclId) {
        let decl = self.decl(id);
        let DeclKind::Extend(e) = &decl.kind else { return };
        if e.interfaces.is_empty() && e.members.is_empty() {
            return;
        }
        self.addition_api_of_extended_decl(id);
        self.addition_for_body_changed_extend(id);
    }

    fn addition_api_of_direct_extends(&mut self, mangle: &str) {
        if let Some(peers) = self.direct_extends.get(mangle).cloned() {
            for peer in peers {
                self.pollute_api_of(peer);
            }
        }
    }

    /// Resolve the mangled name of the type an extend extends. Primitives keep
    /// their bare name; named targets resolve through the current tree,
    /// following type aliases.
    fn extended_type_mangle(&self, id: DeclId) -> Option<RawMangledName> {
        let DeclKind::Extend(e) = &self.decl(id).kind else {
            return None;
        };
        self.type_mangle_of(&e.target)
    }

    fn type_mangle_of(&self, ty: &TypeNode) -> Option<RawMangledName> {
        match ty {
            TypeNode::Primitive(name) => Some(name.clone()),
            TypeNode::Named { identifier, .. } => {
                let tag = self.mangler.type_tag(ty);
                if self.mangled2decl.contains_key(&tag) {
                    return Some(tag);
                }
                // builtin extended types have no decl but still key the
                // extend table
                if !self.tmap.all_extends_of_type(&tag).is_empty() {
                    return Some(tag);
                }
                // fall back to an identifier scan, following aliases
                for (mangle, &candidate) in self.mangled2decl {
                    let d = self.decl(candidate);
                    if d.identifier != *identifier {
                        continue;
                    }
                    if d.is_type_decl() && !matches!(d.kind, DeclKind::Extend(_)) {
                        return Some(mangle.clone());
                    }
                    if let DeclKind::TypeAlias(alias) = &d.kind {
                        return self.type_mangle_of(&alias.target);
                    }
                }
                None
            }
            _ => None,
        }
    }

    // ---- deleted decls ----

    fn for_deleted_decl(&mut self, mangle: &str) {
        self.deleted.push(mangle.to_string());
        self.delete_compiler_added_of(mangle);
        self.pollute_precise_usages_by_name(mangle);

        if let Some(target_tag) = self.tmap.extended_type_of(mangle).cloned() {
            // a deleted extend pollutes the type it extended
            if let Some(&target) = self.mangled2decl.get(&target_tag) {
                self.pollute_api_of(target);
            } else {
                for extend in self.tmap.all_extends_of_type(&target_tag).to_vec() {
                    if let Some(&eid) = self.mangled2decl.get(&extend) {
                        self.add_to_polluted(eid);
                        self.pollute_instantiation_change(eid);
                    }
                }
            }
        } else if let Some(target_tag) = truncate_extend(mangle) {
            // a deleted imported extend: match the extended type by identifier
            let identifier = identifier_of(target_tag).to_string();
            let mut candidates: Vec<DeclId> = Vec::new();
            for &candidate in self.mangled2decl.values() {
                let d = self.decl(candidate);
                if d.identifier == identifier
                    && d.is_type_decl()
                    && !matches!(d.kind, DeclKind::Extend(_))
                {
                    candidates.push(candidate);
                }
            }
            for candidate in &candidates {
                self.add_to_polluted(*candidate);
                self.pollute_box_uses_from_decl(*candidate);
                self.pollute_instantiation_change(*candidate);
            }
            if candidates.is_empty() {
                // extended type is a builtin; propagate through its box sites
                self.pollute_to_box_uses(&identifier);
            }
        }

        // a deleted type drags every extend of it into recompilation
        for extend in self.tmap.all_extends_of_type(mangle).to_vec() {
            if let Some(&eid) = self.mangled2decl.get(&extend) {
                self.add_to_polluted(eid);
                self.pollute_instantiation_change(eid);
            }
        }
    }

    /// Synthetic declarations the compiler added for a deleted decl (default
    /// constructors, box wrappers, accessor funcs, generic instantiations)
    /// die with it. Entries outside the synthetic name families are stale
    /// bookkeeping and are skipped, not deleted.
    fn delete_compiler_added_of(&mut self, mangle: &str) {
        let Some(synthetics) = self.compiler_added.get(mangle) else {
            return;
        };
        for name in synthetics {
            if is_compiler_added_name(name) {
                self.deleted.push(name.clone());
            }
        }
    }

    // ---- changed decls ----

    fn for_changed_common(&mut self, change: &CommonChange) {
        self.add_to_polluted(change.decl);
        if change.sig {
            self.for_sig_changed_decl(change.decl);
        } else if change.src_use {
            self.for_src_use_changed_decl(change.decl);
        } else if change.body {
            self.for_body_changed_decl(change.decl);
        }

        // changing anything inside a generic decl re-instantiates the generic
        if let Some(outer) = self.decl(change.decl).outer {
            if self.in_generic(outer) {
                self.pollute_instantiation_change(outer);
            }
        }
    }

    fn for_order_change(&mut self, id: DeclId) {
        // the minimal propagation for an order change is an instantiation
        // change, same as a const decl's body change
        self.add_to_polluted(id);
        if self.decl(id).is_generic() {
            self.pollute_instantiation_change(id);
        }
    }

    fn for_body_changed_decl(&mut self, id: DeclId) {
        let decl = self.decl(id);
        if decl.is_type_decl() {
            if self.type_changes.entry(id).or_default().body {
                return;
            }
            self.type_changes.entry(id).or_default().body = true;

            if let DeclKind::Extend(_) = &decl.kind {
                if let Some(target_tag) = self.extended_type_mangle(id) {
                    if let Some(&target) = self.mangled2decl.get(&target_tag) {
                        if self.decl(target).is_type_decl() {
                            self.for_body_changed_decl(target);
                        }
                    } else {
                        for extend in self.tmap.all_extends_of_type(&target_tag).to_vec() {
                            if let Some(&eid) = self.mangled2decl.get(&extend) {
                                self.add_to_polluted(eid);
                            }
                        }
                    }
                }
                self.addition_for_body_changed_extend(id);
            }

            if matches!(self.decl(id).kind, DeclKind::Class(_)) {
                // interface default implementations copy into the class and
                // its subtypes; `override` is optional, so member changes in an
                // open class can reshape subtype vtables
                self.pollute_downstream_types(id);
            }

            self.pollute_box_uses_from_decl(id);
            self.add_to_polluted(id);
            self.pollute_instantiation_change(id);
        } else {
            if self.changes.entry(id).or_default().body {
                return;
            }
            self.changes.entry(id).or_default().body = true;
            self.add_to_polluted(id);

            if let DeclKind::Prop(_) = &self.decl(id).kind {
                for member in self.pkg.all_members(id) {
                    self.add_to_polluted(member);
                }
            }

            // without an explicit type, a body change may change the inferred
            // type, which is a signature change
            if !self.decl(id).is_typed() {
                self.for_sig_changed_decl(id);
            }

            self.pollute_instantiation_change(id);
            if self.decl(id).modifiers.const_ {
                self.for_src_use_changed_decl(id);
            }
            self.pollute_chir_opt_affected(id);

            // a member variable's initializer runs inside the constructors
            if let Some(outer) = self.decl(id).outer {
                if !self.decl(id).modifiers.static_ && self.decl(outer).is_type_decl() {
                    self.pollute_to_constructors(outer);
                }
            }
        }
    }

    fn for_sig_changed_decl(&mut self, id: DeclId) {
        match &self.decl(id).kind {
            DeclKind::Func(_) => self.for_sig_changed_func(id),
            DeclKind::Var(_) => self.for_sig_changed_var(id),
            DeclKind::VarWithPattern(_) => self.for_sig_changed_var_with_pattern(id),
            DeclKind::Prop(_) => self.for_sig_changed_prop(id),
            DeclKind::TypeAlias(_) => {
                self.type_aliases.push(id);
            }
            _ => self.for_sig_changed_type(id),
        }
    }

    fn for_sig_changed_func(&mut self, id: DeclId) {
        if self.changes.entry(id).or_default().sig {
            return;
        }
        self.changes.entry(id).or_default().sig = true;

        self.pollute_unqualified_uses(id);
        self.pollute_package_qualified_uses(id);
        self.pollute_qualified_uses(id);
        self.pollute_instantiation_change(id);
        if let Some(outer) = self.decl(id).outer {
            if matches!(self.decl(outer).kind, DeclKind::Extend(_)) {
                self.addition_api_of_extend_decl(outer);
            }
        }
    }

    fn for_sig_changed_var(&mut self, id: DeclId) {
        if self.changes.entry(id).or_default().sig {
            return;
        }
        self.changes.entry(id).or_default().sig = true;

        let decl = self.decl(id);
        if decl.outer.is_none() {
            let identifier = decl.identifier.clone();
            let package = decl.package.clone();
            self.pollute_unqualified_uses(id);
            let users = self.map.package_qualified_users(Axis::Body, &identifier, &package);
            for user in users {
                self.pollute_body_of(user);
            }
        } else {
            // a member variable never overloads with same-named globals; only
            // the precise uses care
            self.pollute_precise_usages(id);
        }
    }

    fn for_sig_changed_var_with_pattern(&mut self, id: DeclId) {
        if self.changes.entry(id).or_default().sig {
            return;
        }
        self.changes.entry(id).or_default().sig = true;
        let DeclKind::VarWithPattern(vp) = &self.decl(id).kind else { return };
        for element in vp.elements.clone() {
            self.for_sig_changed_decl(element);
        }
    }

    fn for_sig_changed_prop(&mut self, id: DeclId) {
        if self.changes.entry(id).or_default().sig {
            return;
        }
        self.changes.entry(id).or_default().sig = true;
        let DeclKind::Prop(p) = &self.decl(id).kind else { return };
        for acc in p.getters.iter().chain(p.setters.iter()).copied().collect::<Vec<_>>() {
            self.add_to_polluted(acc);
            self.for_sig_changed_decl(acc);
        }
    }

    fn for_sig_changed_type(&mut self, id: DeclId) {
        if self.type_changes.entry(id).or_default().sig {
            return;
        }
        self.type_changes.entry(id).or_default().sig = true;

        self.pollute_precise_usages(id);

        // the signature covers the inheritance list: constructors implicitly
        // call super, and every function/property interacts with lookup
        for member in self.decl(id).member_ids().to_vec() {
            let m = self.decl(member);
            if m.raw_mangle.is_empty() || m.is_enum_constructor() {
                continue;
            }
            if matches!(m.kind, DeclKind::Func(_) | DeclKind::Prop(_)) {
                self.pollute_api_of(member);
            }
        }
        let mangle = self.decl(id).raw_mangle.clone();
        for extend in self.tmap.all_extends_of_type(&mangle).to_vec() {
            if let Some(&eid) = self.mangled2decl.get(&extend) {
                self.pollute_api_of(eid);
            }
        }
        self.pollute_box_uses_from_decl(id);
    }

    fn for_src_use_changed_decl(&mut self, id: DeclId) {
        if self.decl(id).is_enum_constructor() {
            return;
        }
        if self.decl(id).is_type_decl() {
            if self.type_changes.entry(id).or_default().src_use {
                return;
            }
            self.type_changes.entry(id).or_default().src_use = true;
        } else {
            if self.changes.entry(id).or_default().src_use {
                return;
            }
            self.changes.entry(id).or_default().src_use = true;
            // a property's src-use change reaches its accessors
            for member in self.pkg.all_members(id) {
                self.add_to_polluted(member);
                self.for_src_use_changed_decl(member);
            }
        }
        self.pollute_precise_usages(id);
        self.pollute_box_uses_from_decl(id);
    }

    fn for_changed_type(&mut self, id: DeclId, change: &TypeChange) {
        let decl = self.decl(id);
        // imported non-public types only need their backend metadata refreshed
        if decl.is_imported() && !decl.modifiers.public {
            self.add_to_polluted(id);
            return;
        }

        if change.inst_var {
            self.add_to_polluted(id);
            self.for_layout_changed_decl(id);
        }
        if change.virt_fun {
            self.add_to_polluted(id);
            self.for_vtable_changed_decl(id);
        }
        if change.sig {
            self.add_to_polluted(id);
            self.for_sig_changed_decl(id);
        }
        if change.src_use {
            self.add_to_polluted(id);
            self.for_src_use_changed_decl(id);
        }
        if change.body {
            self.add_to_polluted(id);
            self.for_body_changed_decl(id);
        }

        if !change.added.is_empty() || !change.deleted.is_empty() || !change.changed.is_empty() {
            self.pollute_instantiation_change(id);
        }
        for &member in &change.added {
            self.for_added_decl(member);
        }
        for member in &change.deleted {
            self.for_deleted_decl(member);
        }
        for member in &change.changed {
            self.for_changed_common(member);
        }
    }

    fn for_layout_changed_decl(&mut self, id: DeclId) {
        if self.type_changes.entry(id).or_default().inst_var {
            return;
        }
        self.type_changes.entry(id).or_default().inst_var = true;

        match &self.decl(id).kind {
            DeclKind::Enum(_) => {
                // the constructor index moved; every usage site re-encodes
                for member in self.decl(id).member_ids().to_vec() {
                    if self.decl(member).is_enum_constructor() {
                        self.pollute_api_of(member);
                    }
                }
                self.pollute_api_of(id);
            }
            DeclKind::Struct(_) => {
                self.pollute_api_of(id);
                self.layout_changed_fields_and_ctors(id);
            }
            DeclKind::Class(_) => {
                self.layout_changed_fields_and_ctors(id);
            }
            DeclKind::Extend(_) | DeclKind::Interface(_) => {
                unreachable!("layout change on a decl without instance layout")
            }
            _ => {}
        }
    }

    fn layout_changed_fields_and_ctors(&mut self, id: DeclId) {
        // instance variables only: their in-memory offsets may have shifted
        for member in self.decl(id).member_ids().to_vec() {
            let m = self.decl(member);
            if matches!(m.kind, DeclKind::Var(_)) && !m.modifiers.static_ {
                self.pollute_api_of(member);
            }
        }
        self.pollute_to_constructors(id);
    }

    fn for_vtable_changed_decl(&mut self, id: DeclId) {
        if self.type_changes.entry(id).or_default().virt {
            return;
        }
        self.type_changes.entry(id).or_default().virt = true;

        self.pollute_downstream_types(id);
        self.pollute_box_uses_from_decl(id);
        for member in self.pkg.all_members(id) {
            if self.decl(member).is_virtual() {
                self.pollute_api_of(member);
            }
        }
    }

    // ---- shared propagation primitives ----

    fn pollute_body_of(&mut self, id: DeclId) {
        if !self.visited_body.insert(id) {
            return;
        }
        self.add_to_polluted(id);
        if !self.decl(id).is_typed() {
            self.pollute_api_of(id);
        }
        self.pollute_instantiation_change(id);
        self.pollute_chir_opt_affected(id);
    }

    fn pollute_api_of(&mut self, id: DeclId) {
        if !self.visited_api.insert(id) {
            return;
        }
        self.add_to_polluted(id);
        self.pollute_box_uses_from_decl(id);
        self.pollute_instantiation_change(id);

        if let Some(outer) = self.decl(id).outer {
            if matches!(self.decl(outer).kind, DeclKind::Extend(_)) {
                self.addition_api_of_extend_decl(outer);
            }
        }

        match &self.decl(id).kind {
            DeclKind::Prop(p) => {
                for acc in p.getters.iter().chain(p.setters.iter()).copied().collect::<Vec<_>>() {
                    self.pollute_api_of(acc);
                }
            }
            DeclKind::Extend(_) => {
                self.addition_api_of_extend_decl(id);
            }
            DeclKind::TypeAlias(_) => {}
            _ => {
                if matches!(self.decl(id).kind, DeclKind::Var(_)) && !self.decl(id).modifiers.static_ {
                    // an enum-typed field can reshape the enclosing layout in
                    // codegen without tripping the layout hash; make sure the
                    // parent follows
                    if let Some(outer) = self.decl(id).outer {
                        if self.decl(outer).is_type_decl() {
                            self.add_to_polluted(outer);
                            self.for_layout_changed_decl(outer);
                        }
                    }
                }
                self.pollute_precise_usages(id);
                self.pollute_unqualified_uses(id);
                self.pollute_package_qualified_uses(id);
                self.pollute_qualified_uses(id);
                let mangle = self.decl(id).raw_mangle.clone();
                for extend in self.tmap.all_extends_of_type(&mangle).to_vec() {
                    if let Some(&eid) = self.mangled2decl.get(&extend) {
                        self.add_to_polluted(eid);
                        self.pollute_instantiation_change(eid);
                    }
                }
            }
        }
    }

    fn pollute_instantiation_change(&mut self, id: DeclId) {
        let mangle = self.decl(id).raw_mangle.clone();
        let record = self.other.entry(mangle).or_default();
        if record.instantiation {
            return;
        }
        record.instantiation = true;

        if let Some(outer) = self.decl(id).outer {
            self.pollute_instantiation_change(outer);
        }
        if self.in_generic(id) {
            self.add_to_polluted(id);
            for member in self.pkg.all_members(id) {
                self.add_to_polluted(member);
            }
            self.pollute_precise_usages(id);
        }
    }

    fn pollute_chir_opt_affected(&mut self, id: DeclId) {
        if let DeclKind::VarWithPattern(vp) = &self.decl(id).kind {
            for element in vp.elements.clone() {
                self.pollute_chir_opt_affected(element);
            }
        }
        let mangle = self.decl(id).raw_mangle.clone();
        let Some(users) = self.chir_opt_map.get(&mangle).cloned() else {
            return;
        };
        let record = self.other.entry(mangle).or_default();
        if record.chir_opt {
            return;
        }
        record.chir_opt = true;
        for user in users {
            if matches!(self.decl(user).kind, DeclKind::Extend(_)) {
                // box-generated functions inline through their host extend;
                // trigger the box rules on it
                self.pollute_api_of(user);
                self.pollute_chir_opt_affected(user);
            } else {
                self.pollute_body_of(user);
            }
        }
    }

    fn pollute_box_uses_from_decl(&mut self, id: DeclId) {
        let decl = self.decl(id);
        match &decl.kind {
            DeclKind::Extend(_) => {
                if let Some(target_tag) = self.extended_type_mangle(id) {
                    self.pollute_to_box_uses(&target_tag);
                }
            }
            _ if decl.is_type_decl() => {
                let mangle = decl.raw_mangle.clone();
                self.pollute_to_box_uses(&mangle);
            }
            _ => {}
        }
    }

    /// Propagate to box sites of a type, its downstream types' box sites, and
    /// its interface extends, to re-trigger box wrapper generation.
    fn pollute_to_box_uses(&mut self, mangle: &str) {
        let record = self.other.entry(mangle.to_string()).or_default();
        if record.boxed {
            return;
        }
        record.boxed = true;
        self.re_boxed.push(mangle.to_string());

        if let Some(sites) = self.map.box_uses.get(mangle).cloned() {
            for site in sites {
                self.for_body_changed_decl(site);
            }
        }

        if self.mangled2decl.contains_key(mangle) {
            if let Some(children) = self.tmap.children.get(mangle).cloned() {
                for child in children {
                    self.add_to_polluted(child);
                    let child_mangle = self.decl(child).raw_mangle.clone();
                    self.pollute_to_box_uses(&child_mangle);
                }
            }
        }

        // direct extends never host box wrappers; only interface extends do
        for extend in self.tmap.all_extends_of_type(mangle).to_vec() {
            if let Some(&eid) = self.mangled2decl.get(&extend) {
                let is_interface_extend = match &self.decl(eid).kind {
                    DeclKind::Extend(e) => !e.interfaces.is_empty(),
                    _ => false,
                };
                if is_interface_extend {
                    self.add_to_polluted(eid);
                    self.pollute_chir_opt_affected(eid);
                }
            }
        }
    }

    fn pollute_precise_usages(&mut self, id: DeclId) {
        let mangle = self.decl(id).raw_mangle.clone();
        if mangle.is_empty() {
            return;
        }
        self.pollute_precise_usages_by_name(&mangle);
    }

    fn pollute_precise_usages_by_name(&mut self, mangle: &str) {
        for user in self.map.direct_users(Axis::Body, mangle) {
            self.pollute_body_of(user);
        }
        for user in self.map.direct_users(Axis::Api, mangle) {
            self.pollute_api_of(user);
        }
    }

    fn pollute_downstream_types(&mut self, id: DeclId) {
        let decl = self.decl(id);
        if let DeclKind::Extend(e) = &decl.kind {
            // an extend reshapes its extended type's surface
            let Some(identifier) = e.target.identifier().map(str::to_string) else {
                return;
            };
            let extended: Option<DeclId> = self
                .mangled2decl
                .values()
                .copied()
                .find(|&cid| self.decl(cid).identifier == identifier && self.decl(cid).is_type_decl());
            if let Some(extended) = extended {
                self.pollute_downstream_types(extended);
            }
            return;
        }

        let mangle = decl.raw_mangle.clone();
        if let Some(children) = self.tmap.children.get(&mangle).cloned() {
            for child in children {
                self.pollute_api_of(child);
            }
        }
        if let Some(participants) = self.tmap.interface_extend_types.get(&mangle).cloned() {
            for type_mangle in participants {
                if let Some(&tid) = self.mangled2decl.get(&type_mangle) {
                    self.pollute_api_of(tid);
                } else {
                    // builtin participant: re-pollute its extends
                    for extend in self.tmap.all_extends_of_type(&type_mangle).to_vec() {
                        if let Some(&eid) = self.mangled2decl.get(&extend) {
                            self.add_to_polluted(eid);
                            self.pollute_instantiation_change(eid);
                        }
                    }
                }
            }
        }
    }

    fn pollute_to_constructors(&mut self, id: DeclId) {
        let mut has_ctor = false;
        for member in self.decl(id).member_ids().to_vec() {
            let m = self.decl(member);
            if m.raw_mangle.is_empty() {
                continue;
            }
            if m.is_constructor() {
                has_ctor = true;
                self.pollute_api_of(member);
            }
        }
        if !has_ctor {
            // the implicit constructor has no decl: pollute its call sites
            let name = default_ctor_name(&self.decl(id).raw_mangle);
            self.pollute_precise_usages_by_name(&name);
            // it regenerates with its owner, so the cached one leaves the IR
            let owner = &self.decl(id).raw_mangle;
            if self.compiler_added.get(owner).is_some_and(|s| s.contains(&name)) {
                self.deleted.push(name);
            }
        }
    }

    fn pollute_unqualified_uses(&mut self, id: DeclId) {
        let decl = self.decl(id);
        let imported = decl.is_imported();
        let identifiers = self.map.accessible_decl_names(decl);
        let nominal = decl.is_type_decl();
        for identifier in &identifiers {
            for user in self.map.unqualified_users(imported, Axis::Body, identifier) {
                self.pollute_body_of(user);
            }
        }
        if !nominal {
            return;
        }
        for identifier in &identifiers {
            for user in self.map.unqualified_users(imported, Axis::Api, identifier) {
                self.pollute_api_of(user);
            }
        }
    }

    fn pollute_qualified_uses(&mut self, id: DeclId) {
        let decl = self.decl(id);
        if decl.outer.is_none() {
            return;
        }
        let identifier = decl.identifier.clone();
        for user in self.map.qualified_users(Axis::Body, &identifier) {
            self.pollute_body_of(user);
        }
    }

    fn pollute_package_qualified_uses(&mut self, id: DeclId) {
        let decl = self.decl(id);
        let identifier = decl.identifier.clone();
        let nominal = decl.is_type_decl();
        let packages = self.map.accessible_package_names(&decl.package);
        for package in &packages {
            for user in self.map.package_qualified_users(Axis::Body, &identifier, package) {
                self.pollute_body_of(user);
            }
        }
        if !nominal {
            return;
        }
        for package in &packages {
            for user in self.map.package_qualified_users(Axis::Api, &identifier, package) {
                self.pollute_api_of(user);
            }
        }
    }

    // ---- fallback ----

    fn fallback(&self) -> bool {
        !self.type_aliases.is_empty()
            || !self.unfound_extends.is_empty()
            || !self.unfound_names.is_empty()
            || !self.removed_not_supported.is_empty()
    }

    fn print_fallback_info(&mut self) {
        let log = logger();
        if !log.is_enabled() {
            return;
        }
        log.section("Fallback info:");
        let mut alias_names: Vec<&str> = self
            .type_aliases
            .iter()
            .map(|&id| self.pkg.decl(id).raw_mangle.as_str())
            .collect();
        alias_names.sort_unstable();
        for name in alias_names {
            log.log_line(&format!("changed typealias: {name}"));
        }
        let mut extend_names: Vec<&str> = self
            .unfound_extends
            .iter()
            .map(|&id| self.pkg.decl(id).raw_mangle.as_str())
            .collect();
        extend_names.sort_unstable();
        extend_names.dedup();
        for name in extend_names {
            log.log_line(&format!("unfound extend: {name}"));
        }
        self.unfound_names.sort_unstable();
        self.unfound_names.dedup();
        for name in &self.unfound_names {
            log.log_line(&format!("unfound name: {name}"));
        }
        for name in &self.removed_not_supported {
            log.log_line(&format!("removed type {name}"));
        }
        log.end_section();
    }
}
