//! Semantic-usage collection.
//!
//! After full semantic analysis, one deterministic walk over the elaborated
//! tree records, per declaration, the usage edges the *next* build's pollution
//! analysis will need: api/body usages at every qualification level, boxed
//! types, inheritance/extension relations, and the synthetic declarations the
//! compiler added on behalf of each source declaration. Collection is
//! shardable per top-level declaration; results merge in mangled-name order.

use std::collections::BTreeSet;

use crate::ast::{
    Decl, DeclId, DeclKind, Expr, Package, RawMangledName, TypeNode,
};
use crate::cache::{SemaRelation, SemaUsage, SemanticInfo, UseInfo};
use crate::mangle::{Mangler, default_ctor_name};
use crate::visit::{VisitAction, Visitor, walk_expr};

/// Collect the full semantic info of a package.
pub fn collect_semantic_info(pkg: &Package) -> SemanticInfo {
    let mut info = SemanticInfo::default();
    let mangler = Mangler::new(pkg.name.clone());
    let mangled = pkg.mangled_map();

    let mut tops: Vec<DeclId> = pkg.top_levels().to_vec();
    tops.sort_by(|&a, &b| pkg.decl(a).raw_mangle.cmp(&pkg.decl(b).raw_mangle));
    for id in tops {
        collect_for_decl(pkg, &mangler, &mangled, id, &mut info);
    }
    info
}

/// Fold freshly collected info over the previous build's tables: deleted decls
/// drop out, recompiled decls take their fresh records, everything else keeps
/// the cached edge set.
pub fn merge_semantic_info(
    mut prev: SemanticInfo,
    fresh: SemanticInfo,
    deleted: &[RawMangledName],
) -> SemanticInfo {
    for mangle in deleted {
        prev.usages.remove(mangle);
        prev.relations.remove(mangle);
        prev.compiler_added_usages.remove(mangle);
    }
    prev.usages.extend(fresh.usages);
    prev.relations.extend(fresh.relations);
    for (builtin, rel) in fresh.builtin_type_relations {
        let entry = prev.builtin_type_relations.entry(builtin).or_default();
        entry.extends.extend(rel.extends);
        entry.extended_interfaces.extend(rel.extended_interfaces);
    }
    prev.compiler_added_usages.extend(fresh.compiler_added_usages);
    prev
}

/// Dependencies of every order-sensitive global's initializer, in evaluation
/// order: the table the driver uses to re-check global-init ordering on the
/// next build.
pub fn collect_var_func_deps(pkg: &Package) -> std::collections::BTreeMap<RawMangledName, Vec<RawMangledName>> {
    let mut deps = std::collections::BTreeMap::new();
    let mut ids: Vec<DeclId> = pkg
        .top_levels()
        .iter()
        .copied()
        .filter(|&id| pkg.decl(id).is_order_sensitive() && !pkg.decl(id).is_imported())
        .collect();
    ids.sort_by(|&a, &b| pkg.decl(a).gvid.cmp(&pkg.decl(b).gvid));
    for id in ids {
        let decl = pkg.decl(id);
        let mut collector = InitDepCollector { targets: Vec::new() };
        match &decl.kind {
            DeclKind::Var(v) => {
                if let Some(init) = &v.init {
                    walk_expr(&mut collector, pkg, init);
                }
            }
            DeclKind::VarWithPattern(vp) => {
                walk_expr(&mut collector, pkg, &vp.init);
            }
            _ => {}
        }
        deps.insert(decl.raw_mangle.clone(), collector.targets);
    }
    deps
}

struct InitDepCollector {
    targets: Vec<RawMangledName>,
}

impl Visitor for InitDepCollector {
    fn visit_expr(&mut self, _pkg: &Package, expr: &Expr) -> VisitAction {
        let target = match expr {
            Expr::Name(n) => n.target.as_ref(),
            Expr::Member { target, .. } | Expr::PackageRef { target, .. } => target.as_ref(),
            _ => None,
        };
        if let Some(target) = target {
            if !self.targets.contains(target) {
                self.targets.push(target.clone());
            }
        }
        VisitAction::WalkChildren
    }
}

/// Record a synthetic declaration the compiler generated for `origin`.
pub fn record_compiler_added(
    info: &mut SemanticInfo,
    origin: impl Into<RawMangledName>,
    synthetic: impl Into<String>,
) {
    info.compiler_added_usages
        .entry(origin.into())
        .or_default()
        .insert(synthetic.into());
}

fn collect_for_decl(
    pkg: &Package,
    mangler: &Mangler,
    mangled: &std::collections::HashMap<RawMangledName, DeclId>,
    id: DeclId,
    info: &mut SemanticInfo,
) {
    let decl = pkg.decl(id);
    if decl.raw_mangle.is_empty() {
        return;
    }

    let mut usage = SemaUsage::default();
    collect_api_usage(pkg, mangler, mangled, decl, &mut usage.api_usages);
    collect_body_usage(pkg, mangler, mangled, decl, &mut usage);
    if !usage.api_usages.is_empty() || !usage.body_usages.is_empty() || !usage.boxed_types.is_empty()
    {
        info.usages.insert(decl.raw_mangle.clone(), usage);
    }

    if decl.is_type_decl() {
        collect_relation(mangler, decl, info);
        collect_default_ctor(pkg, decl, info);
    }

    for &member in decl.member_ids() {
        collect_for_decl(pkg, mangler, mangled, member, info);
    }
    if let DeclKind::Prop(p) = &decl.kind {
        for &acc in p.getters.iter().chain(p.setters.iter()) {
            collect_for_decl(pkg, mangler, mangled, acc, info);
        }
    }
}

/// A type spelled in a signature, annotation, constraint or inherited-type
/// position is an api usage.
fn record_type_usage(
    mangler: &Mangler,
    mangled: &std::collections::HashMap<RawMangledName, DeclId>,
    pkg: &Package,
    ty: &TypeNode,
    use_info: &mut UseInfo,
) {
    match ty {
        TypeNode::Named { package, identifier, args } => {
            let tag = mangler.type_tag(ty);
            let name = use_info.used_names.entry(identifier.clone()).or_default();
            match package {
                Some(qualifier) => {
                    name.package_qualifiers.insert(qualifier.clone());
                }
                None => {
                    name.has_unqualified_usage = true;
                }
            }
            if let Some(&target) = mangled.get(&tag) {
                use_info.used_decls.insert(tag);
                if pkg.decl(target).is_imported() && package.is_none() {
                    name.has_unqualified_usage_of_imported = true;
                }
            }
            for a in args {
                record_type_usage(mangler, mangled, pkg, a, use_info);
            }
        }
        TypeNode::Func { params, ret } => {
            for p in params {
                record_type_usage(mangler, mangled, pkg, p, use_info);
            }
            record_type_usage(mangler, mangled, pkg, ret, use_info);
        }
        TypeNode::Tuple(elems) => {
            for e in elems {
                record_type_usage(mangler, mangled, pkg, e, use_info);
            }
        }
        TypeNode::Primitive(_) | TypeNode::This => {}
    }
}

fn collect_api_usage(
    pkg: &Package,
    mangler: &Mangler,
    mangled: &std::collections::HashMap<RawMangledName, DeclId>,
    decl: &Decl,
    out: &mut UseInfo,
) {
    for annotation in &decl.annotations {
        if annotation.debug_only {
            continue;
        }
        out.used_names
            .entry(annotation.name.clone())
            .or_default()
            .has_unqualified_usage = true;
    }
    for g in &decl.generic_params {
        for bound in &g.bounds {
            record_type_usage(mangler, mangled, pkg, bound, out);
        }
    }
    for inherited in decl.inherited_types() {
        record_type_usage(mangler, mangled, pkg, inherited, out);
    }
    match &decl.kind {
        DeclKind::Func(f) => {
            for p in &f.sig.params {
                record_type_usage(mangler, mangled, pkg, &p.ty, out);
            }
            if let Some(ret) = &f.sig.ret {
                record_type_usage(mangler, mangled, pkg, ret, out);
            }
        }
        DeclKind::Var(v) => {
            if let Some(ty) = &v.ty {
                record_type_usage(mangler, mangled, pkg, ty, out);
            }
        }
        DeclKind::Prop(p) => {
            record_type_usage(mangler, mangled, pkg, &p.ty, out);
        }
        DeclKind::Extend(e) => {
            record_type_usage(mangler, mangled, pkg, &e.target, out);
        }
        DeclKind::TypeAlias(a) => {
            record_type_usage(mangler, mangled, pkg, &a.target, out);
        }
        _ => {}
    }
}

struct BodyUsageCollector<'a> {
    mangler: &'a Mangler,
    mangled: &'a std::collections::HashMap<RawMangledName, DeclId>,
    body: UseInfo,
    boxed: BTreeSet<RawMangledName>,
}

impl Visitor for BodyUsageCollector<'_> {
    fn visit_expr(&mut self, pkg: &Package, expr: &Expr) -> VisitAction {
        match expr {
            Expr::Name(n) => {
                let name = self.body.used_names.entry(n.name.clone()).or_default();
                name.has_unqualified_usage = true;
                if n.imported {
                    name.has_unqualified_usage_of_imported = true;
                }
                if let Some(target) = &n.target {
                    self.body.used_decls.insert(target.clone());
                }
            }
            Expr::Member { name, parents, target, .. } => {
                let usage = self.body.used_names.entry(name.clone()).or_default();
                for parent in parents {
                    usage.parent_decls.insert(parent.clone());
                }
                if let Some(target) = target {
                    self.body.used_decls.insert(target.clone());
                }
            }
            Expr::PackageRef { package, name, target } => {
                let usage = self.body.used_names.entry(name.clone()).or_default();
                usage.package_qualifiers.insert(package.clone());
                if let Some(target) = target {
                    self.body.used_decls.insert(target.clone());
                }
            }
            Expr::Boxed { boxed, .. } => {
                self.boxed.insert(self.mangler.type_tag(boxed));
            }
            Expr::Let { ty: Some(ty), .. } => {
                record_type_usage(self.mangler, self.mangled, pkg, ty, &mut self.body);
            }
            _ => {}
        }
        VisitAction::WalkChildren
    }
}

fn collect_body_usage(
    pkg: &Package,
    mangler: &Mangler,
    mangled: &std::collections::HashMap<RawMangledName, DeclId>,
    decl: &Decl,
    out: &mut SemaUsage,
) {
    let mut collector = BodyUsageCollector {
        mangler,
        mangled,
        body: UseInfo::default(),
        boxed: BTreeSet::new(),
    };
    match &decl.kind {
        DeclKind::Func(f) => {
            if let Some(body) = &f.body {
                walk_expr(&mut collector, pkg, body);
            }
        }
        DeclKind::Var(v) => {
            if let Some(init) = &v.init {
                walk_expr(&mut collector, pkg, init);
            }
        }
        DeclKind::VarWithPattern(vp) => {
            walk_expr(&mut collector, pkg, &vp.init);
        }
        _ => {}
    }
    out.body_usages = collector.body;
    out.boxed_types = collector.boxed;
}

fn collect_relation(mangler: &Mangler, decl: &Decl, info: &mut SemanticInfo) {
    match &decl.kind {
        DeclKind::Extend(e) => {
            let target_tag = mangler.type_tag(&e.target);
            let is_builtin = matches!(e.target, TypeNode::Primitive(_));
            let rel = if is_builtin {
                info.builtin_type_relations.entry(target_tag).or_default()
            } else {
                info.relations.entry(target_tag).or_default()
            };
            rel.extends.insert(decl.raw_mangle.clone());
            for iface in &e.interfaces {
                rel.extended_interfaces.insert(mangler.type_tag(iface));
            }
        }
        _ => {
            let rel: &mut SemaRelation =
                info.relations.entry(decl.raw_mangle.clone()).or_default();
            for inherited in decl.inherited_types() {
                rel.inherits.insert(mangler.type_tag(inherited));
            }
        }
    }
}

/// Types without an explicit constructor get an implicit one; record it so a
/// later deletion of the type removes the synthetic as well.
fn collect_default_ctor(pkg: &Package, decl: &Decl, info: &mut SemanticInfo) {
    if matches!(decl.kind, DeclKind::Interface(_) | DeclKind::Extend(_)) {
        return;
    }
    let has_ctor = decl
        .member_ids()
        .iter()
        .any(|&m| pkg.decl(m).is_constructor());
    if !has_ctor {
        record_compiler_added(
            info,
            decl.raw_mangle.clone(),
            default_ctor_name(&decl.raw_mangle),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{ExtendDecl, FuncDecl, NameRef, TypeBody, VarDecl};
    use crate::mangle::assign_mangles;

    fn body_call(name: &str) -> Expr {
        Expr::Call {
            callee: Box::new(Expr::Name(NameRef::resolved(name, format!("app.1{name}()")))),
            args: vec![],
        }
    }

    #[test]
    fn body_usages_recorded_per_decl() {
        let mut pkg = Package::new("app");
        let mut f = FuncDecl::default();
        f.body = Some(body_call("g"));
        pkg.insert_top_level(Decl::new("f", "app", DeclKind::Func(f)));
        assign_mangles(&mut pkg);
        let info = collect_semantic_info(&pkg);
        let usage = &info.usages["app.1f()"];
        assert!(usage.body_usages.used_decls.contains("app.1g()"));
        assert!(usage.body_usages.used_names["g"].has_unqualified_usage);
    }

    #[test]
    fn signature_types_are_api_usages() {
        let mut pkg = Package::new("app");
        pkg.insert_top_level(Decl::new("W", "app", DeclKind::Class(TypeBody::default())));
        let mut f = FuncDecl::default();
        f.sig.params.push(crate::ast::FuncParam::new("w", TypeNode::named("W")));
        pkg.insert_top_level(Decl::new("f", "app", DeclKind::Func(f)));
        assign_mangles(&mut pkg);
        let info = collect_semantic_info(&pkg);
        let usage = &info.usages["app.1f(app.1W)"];
        assert!(usage.api_usages.used_decls.contains("app.1W"));
        assert!(usage.api_usages.used_names["W"].has_unqualified_usage);
        assert!(usage.body_usages.is_empty());
    }

    #[test]
    fn boxed_types_recorded() {
        let mut pkg = Package::new("app");
        pkg.insert_top_level(Decl::new("S", "app", DeclKind::Struct(TypeBody::default())));
        let mut f = FuncDecl::default();
        f.body = Some(Expr::Boxed {
            value: Box::new(Expr::Lit(crate::ast::Literal::Unit)),
            boxed: TypeNode::named("S"),
        });
        pkg.insert_top_level(Decl::new("f", "app", DeclKind::Func(f)));
        assign_mangles(&mut pkg);
        let info = collect_semantic_info(&pkg);
        assert!(info.usages["app.1f()"].boxed_types.contains("app.1S"));
    }

    #[test]
    fn builtin_extend_relation_separated() {
        let mut pkg = Package::new("app");
        pkg.insert_top_level(Decl::new(
            "",
            "app",
            DeclKind::Extend(ExtendDecl {
                target: TypeNode::primitive("Int32"),
                interfaces: vec![TypeNode::named("I")],
                members: vec![],
            }),
        ));
        assign_mangles(&mut pkg);
        let info = collect_semantic_info(&pkg);
        let rel = &info.builtin_type_relations["Int32"];
        assert_eq!(rel.extends.len(), 1);
        assert!(rel.extended_interfaces.contains("app.1I"));
        assert!(info.relations.is_empty() || !info.relations.contains_key("Int32"));
    }

    #[test]
    fn implicit_ctor_recorded_as_compiler_added() {
        let mut pkg = Package::new("app");
        pkg.insert_top_level(Decl::new("P", "app", DeclKind::Class(TypeBody::default())));
        assign_mangles(&mut pkg);
        let info = collect_semantic_info(&pkg);
        assert!(info.compiler_added_usages["app.1P"].contains("app.1P<init>"));
    }

    #[test]
    fn merge_drops_deleted_and_prefers_fresh() {
        let mut prev = SemanticInfo::default();
        prev.usages.insert("app.1a()".into(), SemaUsage::default());
        let mut stale = SemaUsage::default();
        stale.boxed_types.insert("app.1Old".into());
        prev.usages.insert("app.1b()".into(), stale);

        let mut fresh = SemanticInfo::default();
        let mut updated = SemaUsage::default();
        updated.boxed_types.insert("app.1New".into());
        fresh.usages.insert("app.1b()".into(), updated);

        let merged = merge_semantic_info(prev, fresh, &["app.1a()".into()]);
        assert!(!merged.usages.contains_key("app.1a()"));
        assert!(merged.usages["app.1b()"].boxed_types.contains("app.1New"));
        assert!(!merged.usages["app.1b()"].boxed_types.contains("app.1Old"));
    }

    #[test]
    fn var_func_deps_follow_evaluation_order() {
        let mut pkg = Package::new("app");
        let mut a = Decl::new(
            "a",
            "app",
            DeclKind::Var(VarDecl { ty: None, init: Some(body_call("f")) }),
        );
        a.gvid = crate::span::Gvid::new("main.vesta", 0);
        let mut b = Decl::new(
            "b",
            "app",
            DeclKind::Var(VarDecl { ty: None, init: Some(body_call("g")) }),
        );
        b.gvid = crate::span::Gvid::new("main.vesta", 1);
        pkg.insert_top_level(a);
        pkg.insert_top_level(b);
        assign_mangles(&mut pkg);

        let deps = collect_var_func_deps(&pkg);
        assert_eq!(deps["app.1a"], vec!["app.1f()".to_string()]);
        assert_eq!(deps["app.1b"], vec!["app.1g()".to_string()]);
    }

    #[test]
    fn var_initializer_is_body_usage() {
        let mut pkg = Package::new("app");
        pkg.insert_top_level(Decl::new(
            "a",
            "app",
            DeclKind::Var(VarDecl {
                ty: Some(TypeNode::primitive("Int64")),
                init: Some(body_call("f")),
            }),
        ));
        assign_mangles(&mut pkg);
        let info = collect_semantic_info(&pkg);
        assert!(info.usages["app.1a"].body_usages.used_decls.contains("app.1f()"));
    }
}
