//! End-to-end incremental analysis scenarios: simulate a previous build,
//! mutate the package, and check the analyser's verdict and sets.

mod common;
use common::*;

use vesta_incremental::IncreKind;
use vesta_incremental::ast::{Decl, DeclKind, TypeAliasDecl, TypeBody, TypeNode};

// ── No-op rebuild ───────────────────────────────────────────────────────

#[test]
fn unchanged_package_is_no_change() {
    let build = |body| {
        let mut b = PkgBuilder::new();
        b.add(typed_fn("f", body));
        b.add(typed_fn("g", call("f", Some("app.1f()->Int64"))));
        b.finish()
    };
    let options = default_options();
    let prev_pkg = build(lit(1));
    let cache = previous_build(&prev_pkg, &options);
    let cur_pkg = build(lit(1));

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::NoChange);
    assert!(result.decls_to_recompile.is_empty());
    assert!(result.deleted.is_empty());
    assert!(result.deleted_cg_mangles.is_empty());
}

// ── Private body change on a leaf function ──────────────────────────────

#[test]
fn leaf_body_change_recompiles_only_the_leaf() {
    let build = |statement| {
        let mut b = PkgBuilder::new();
        b.add(typed_fn("leaf", statement));
        b.add(typed_fn("user", call("leaf", Some("app.4leaf()->Int64"))));
        b.finish()
    };
    let options = default_options();
    let prev_pkg = build(lit(1));
    let cache = previous_build(&prev_pkg, &options);
    // one statement changed, signature identical
    let cur_pkg = build(lit(2));

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Incr);
    assert_eq!(recompile_names(&cur_pkg, &result), vec!["app.4leaf()->Int64"]);
    assert!(result.deleted.is_empty());
}

// ── Signature change on a public function ───────────────────────────────

#[test]
fn sig_change_recompiles_every_unqualified_user() {
    let build = |ret: &str| {
        let mut b = PkgBuilder::new();
        let mut f = typed_fn("f", lit(1));
        if let DeclKind::Func(func) = &mut f.kind {
            func.sig.ret = Some(TypeNode::primitive(ret));
        }
        f.modifiers.public = true;
        b.add(f);
        // two separate callers referencing `f` unqualified
        b.add(typed_fn("caller_a", call("f", None)));
        b.add(typed_fn("caller_b", call("f", None)));
        b.finish()
    };
    let options = default_options();
    let prev_pkg = build("Int64");
    let cache = previous_build(&prev_pkg, &options);
    let cur_pkg = build("String");

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Incr);
    let names = recompile_names(&cur_pkg, &result);
    assert!(names.contains(&"app.8caller_a()->Int64".to_string()));
    assert!(names.contains(&"app.8caller_b()->Int64".to_string()));
    // the old f is gone (its mangle covers the return type), the new one is added
    assert!(result.deleted.contains(&"app.1f()->Int64".to_string()));
    assert!(names.contains(&"app.1f()->String".to_string()));
}

// ── Type alias modified ─────────────────────────────────────────────────

#[test]
fn modified_type_alias_rolls_back() {
    let build = |target: &str| {
        let mut b = PkgBuilder::new();
        b.add(Decl::new(
            "T",
            "app",
            DeclKind::TypeAlias(TypeAliasDecl { target: TypeNode::primitive(target) }),
        ));
        b.add(typed_fn("f", lit(1)));
        b.finish()
    };
    let options = default_options();
    let prev_pkg = build("Int64");
    let cache = previous_build(&prev_pkg, &options);
    let cur_pkg = build("UInt64");

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Rollback);
    assert!(result.decls_to_recompile.is_empty());
}

// ── Deleted extend of a primitive type ──────────────────────────────────

#[test]
fn deleted_primitive_extend_recompiles_sibling_extends() {
    let options = default_options();
    let prev_pkg = {
        let mut b = PkgBuilder::new();
        b.add(Decl::new("I", "app", DeclKind::Interface(TypeBody::default())));
        b.add(extend_of_primitive("Int32", &["I"]));
        b.add(extend_of_primitive("Int32", &[]));
        b.finish()
    };
    let cache = previous_build(&prev_pkg, &options);
    let cur_pkg = {
        let mut b = PkgBuilder::new();
        b.add(Decl::new("I", "app", DeclKind::Interface(TypeBody::default())));
        // the interface extend is removed; the direct extend survives
        b.add(extend_of_primitive("Int32", &[]));
        b.finish()
    };

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Incr);
    assert!(result.deleted.contains(&"Int32<:app.1I".to_string()));
    let names = recompile_names(&cur_pkg, &result);
    assert!(
        names.contains(&"Int32<:".to_string()),
        "the surviving extend of Int32 must recompile, got {names:?}"
    );
}

// ── Order change between two order-sensitive globals ────────────────────

#[test]
fn swapped_globals_both_recompile() {
    let options = default_options();
    let prev_pkg = {
        let mut b = PkgBuilder::new();
        b.add(typed_let("a", call("f", None)));
        b.add(typed_let("b", call("g", None)));
        b.finish()
    };
    let cache = previous_build(&prev_pkg, &options);
    let cur_pkg = {
        let mut b = PkgBuilder::new();
        b.add(typed_let("b", call("g", None)));
        b.add(typed_let("a", call("f", None)));
        b.finish()
    };

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Incr);
    let names = recompile_names(&cur_pkg, &result);
    assert_eq!(names, vec!["app.1a", "app.1b"]);
    assert!(result.deleted.is_empty());
}

// ── Entry-level fallback checks ─────────────────────────────────────────

#[test]
fn changed_compile_args_roll_back() {
    let options = default_options();
    let mut b = PkgBuilder::new();
    b.add(typed_fn("f", lit(1)));
    let pkg = b.finish();
    let cache = previous_build(&pkg, &options);

    let mut changed = options.clone();
    changed.compile_args.push("-g".into());
    let result = run(&pkg, cache, &changed);
    assert_eq!(result.kind, IncreKind::Rollback);
}

#[test]
fn changed_import_specs_roll_back() {
    let options = default_options();
    let mut b = PkgBuilder::new();
    b.add(typed_fn("f", lit(1)));
    let prev_pkg = b.finish();
    let cache = previous_build(&prev_pkg, &options);

    let mut b = PkgBuilder::new();
    b.add(typed_fn("f", lit(1)));
    let mut cur_pkg = b.finish();
    cur_pkg.imports.push(vesta_incremental::ast::ImportSpec::package("std.net"));

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Rollback);
}

#[test]
fn empty_package_short_circuits() {
    let options = default_options();
    let pkg = PkgBuilder::new().finish();
    let result = run(&pkg, vesta_incremental::cache::CompilationCache::default(), &options);
    assert_eq!(result.kind, IncreKind::EmptyPkg);
}

#[test]
fn incremental_disabled_is_invalid() {
    let mut options = default_options();
    options.enable_incremental = false;
    let mut b = PkgBuilder::new();
    b.add(typed_fn("f", lit(1)));
    let pkg = b.finish();
    let result = run(&pkg, vesta_incremental::cache::CompilationCache::default(), &options);
    assert_eq!(result.kind, IncreKind::Invalid);
}

// ── Deleted type drags its compiler-added synthetics with it ────────────

#[test]
fn deleted_type_deletes_its_implicit_constructor() {
    let options = default_options();
    let prev_pkg = {
        let mut b = PkgBuilder::new();
        // a class without an explicit constructor: the previous build records
        // the compiler-added default constructor against it
        b.add(Decl::new("P", "app", DeclKind::Class(TypeBody::default())));
        b.add(typed_fn("kept", lit(1)));
        b.finish()
    };
    let mut cache = previous_build(&prev_pkg, &options);
    assert!(
        cache.sema_info.compiler_added_usages["app.1P"].contains("app.1P<init>"),
        "collector must have recorded the implicit constructor"
    );
    // a stale entry from an older build must be skipped, not deleted
    cache
        .sema_info
        .compiler_added_usages
        .entry("app.1P".into())
        .or_default()
        .insert("mystery".into());
    let cur_pkg = {
        let mut b = PkgBuilder::new();
        b.add(typed_fn("kept", lit(1)));
        b.finish()
    };

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Incr);
    assert!(result.deleted.contains(&"app.1P".to_string()));
    assert!(result.deleted.contains(&"app.1P<init>".to_string()));
    assert!(!result.deleted.contains(&"mystery".to_string()));
    assert!(result.deleted_cg_mangles.contains(&"app.1P".to_string()));
    assert!(result.deleted_cg_mangles.contains(&"app.1P<init>".to_string()));
    assert!(!result.deleted_cg_mangles.contains(&"mystery".to_string()));
}

// ── Deleted declarations reach the codegen namespace ────────────────────

#[test]
fn deleted_function_lists_cg_mangles() {
    let options = default_options();
    let prev_pkg = {
        let mut b = PkgBuilder::new();
        b.add(typed_fn("gone", lit(1)));
        b.add(typed_fn("kept", lit(2)));
        b.finish()
    };
    let cache = previous_build(&prev_pkg, &options);
    let cur_pkg = {
        let mut b = PkgBuilder::new();
        b.add(typed_fn("kept", lit(2)));
        b.finish()
    };

    let result = run(&cur_pkg, cache, &options);
    assert_eq!(result.kind, IncreKind::Incr);
    assert_eq!(result.deleted, vec!["app.4gone()->Int64".to_string()]);
    assert_eq!(result.deleted_cg_mangles, vec!["_FNapp.4gone()->Int64".to_string()]);
}
