#![allow(dead_code)]

//! Shared builders for the end-to-end analysis scenarios: construct elaborated
//! packages by hand, simulate the previous build's cache, and run the
//! analyser the way the driver would.

use std::collections::HashMap;

use vesta_incremental::ast::{
    Decl, DeclId, DeclKind, Expr, ExtendDecl, FuncDecl, Literal, NameRef, Package, RawMangledName,
    TypeNode, VarDecl,
};
use vesta_incremental::cache::CompilationCache;
use vesta_incremental::collect::{collect_semantic_info, collect_var_func_deps};
use vesta_incremental::diff::{build_file_map, cache_file_map};
use vesta_incremental::hash::{compute_ast_cache, compute_imported_ast_caches, specs_hash};
use vesta_incremental::imports::ImportManager;
use vesta_incremental::mangle::assign_mangles;
use vesta_incremental::options::GlobalOptions;
use vesta_incremental::span::Gvid;
use vesta_incremental::{AnalysisArgs, IncreResult, incremental_scope_analysis};

pub fn lit(n: i64) -> Expr {
    Expr::Lit(Literal::Int(n))
}

pub fn call(name: &str, target: Option<&str>) -> Expr {
    let name_ref = match target {
        Some(t) => NameRef::resolved(name, t),
        None => NameRef::unresolved(name),
    };
    Expr::Call { callee: Box::new(Expr::Name(name_ref)), args: vec![] }
}

/// A function with an explicit return type and the given body.
pub fn typed_fn(name: &str, body: Expr) -> Decl {
    let mut f = FuncDecl::default();
    f.sig.ret = Some(TypeNode::primitive("Int64"));
    f.body = Some(body);
    Decl::new(name, "app", DeclKind::Func(f))
}

/// A typed global `let`.
pub fn typed_let(name: &str, init: Expr) -> Decl {
    Decl::new(
        name,
        "app",
        DeclKind::Var(VarDecl { ty: Some(TypeNode::primitive("Int64")), init: Some(init) }),
    )
}

pub fn extend_of_primitive(target: &str, interfaces: &[&str]) -> Decl {
    Decl::new(
        "",
        "app",
        DeclKind::Extend(ExtendDecl {
            target: TypeNode::primitive(target),
            interfaces: interfaces.iter().map(|i| TypeNode::named(*i)).collect(),
            members: vec![],
        }),
    )
}

/// Package builder that assigns gvids in insertion order.
pub struct PkgBuilder {
    pkg: Package,
    next_index: u32,
}

impl PkgBuilder {
    pub fn new() -> Self {
        Self { pkg: Package::new("app"), next_index: 0 }
    }

    pub fn add(&mut self, mut decl: Decl) -> DeclId {
        decl.gvid = Gvid::new("main.vesta", self.next_index);
        self.next_index += 1;
        self.pkg.insert_top_level(decl)
    }

    pub fn finish(mut self) -> Package {
        assign_mangles(&mut self.pkg);
        self.pkg
    }
}

/// Simulate the previous build over `pkg`: fingerprints, file map, semantic
/// info, specs hash, compile args.
pub fn previous_build(pkg: &Package, options: &GlobalOptions) -> CompilationCache {
    let mut cache = CompilationCache::default();
    cache.specs_hash = specs_hash(pkg);
    cache.compile_args = options.compile_args.clone();
    cache.cur_pkg_ast_cache = compute_ast_cache(pkg);
    cache.imported_ast_cache = compute_imported_ast_caches(pkg);
    cache.file_map = cache_file_map(pkg, &build_file_map(pkg));
    cache.sema_info = collect_semantic_info(pkg);
    cache.var_func_deps = collect_var_func_deps(pkg);
    cache
}

pub fn default_options() -> GlobalOptions {
    GlobalOptions {
        package_name: "app".into(),
        compile_args: vec!["--output-type=exe".into()],
        enable_incremental: true,
        ..Default::default()
    }
}

/// Run the analyser over `cur` against the cache of the previous build.
pub fn run(cur: &Package, prev_cache: CompilationCache, options: &GlobalOptions) -> IncreResult {
    let importer = ImportManager::new();
    run_with_importer(cur, prev_cache, options, &importer)
}

pub fn run_with_importer(
    cur: &Package,
    prev_cache: CompilationCache,
    options: &GlobalOptions,
    importer: &ImportManager,
) -> IncreResult {
    // group direct extends (no interfaces) by their shared mangled name
    let mut direct_extends: HashMap<RawMangledName, Vec<DeclId>> = HashMap::new();
    for &id in cur.top_levels() {
        let decl = cur.decl(id);
        if let DeclKind::Extend(e) = &decl.kind {
            if e.interfaces.is_empty() {
                direct_extends.entry(decl.raw_mangle.clone()).or_default().push(id);
            }
        }
    }
    incremental_scope_analysis(AnalysisArgs {
        pkg: cur,
        mangled2decl: cur.mangled_map(),
        ast_cache: compute_ast_cache(cur),
        cur_imports: compute_imported_ast_caches(cur),
        options,
        importer,
        prev_cache,
        file_map: build_file_map(cur),
        direct_extends,
    })
}

/// Raw mangled names of the recompile set, sorted, for readable assertions.
pub fn recompile_names(pkg: &Package, result: &IncreResult) -> Vec<String> {
    let mut names: Vec<String> = result
        .decls_to_recompile
        .iter()
        .map(|&id| pkg.decl(id).raw_mangle.clone())
        .collect();
    names.sort();
    names
}
