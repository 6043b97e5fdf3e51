//! Incremental rebuild core of the Vesta compiler.
//!
//! Given the previous build's per-package cache and the current elaborated
//! declaration tree, decide which declarations must be re-checked, which IR
//! artefacts must be regenerated, and which cached artefacts may be linked
//! unchanged. The surrounding compiler (lexer, parser, semantic checker, CHIR
//! optimisation pipeline, code generator, driver) is a collaborator; this
//! crate consumes an elaborated tree and emits a recompile set plus the
//! updated cache.
//!
//! Pipeline: fingerprints ([`hash`]) and raw mangled names ([`mangle`]) feed
//! the cache ([`cache`]); cache plus current tree feed the AST diff
//! ([`diff`]); the diff and the usage graph ([`graph`]) feed the pollution
//! analyser ([`pollution`]); the usage collector ([`collect`]) records the
//! next build's edges; and [`merge`] splices the freshly compiled IR module
//! into the cached one.

pub mod ast;
pub mod cache;
pub mod chir;
pub mod collect;
pub mod diff;
pub mod graph;
pub mod hash;
pub mod imports;
pub mod logger;
pub mod mangle;
pub mod merge;
pub mod options;
pub mod pollution;
pub mod span;
pub mod visit;

use std::collections::{BTreeMap, HashMap};

use ast::{DeclId, Package, RawMangled2DeclMap, RawMangledName};
use cache::{AstCache, CompilationCache, DeclFingerprint};
use diff::{AstDiffArgs, FileMap, ast_diff, cache_file_map};
use imports::ImportManager;
use logger::logger;
use options::GlobalOptions;
use pollution::{PollutionArgs, analyze};

/// Outcome class of one incremental analysis.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum IncreKind {
    /// Nothing changed; the cached output can be linked as-is.
    NoChange,
    /// Incremental recompilation of the computed sets.
    Incr,
    /// Incremental output must be discarded; full rebuild this session.
    Rollback,
    /// The package has no declarations.
    EmptyPkg,
    /// Incremental compilation is disabled or not applicable.
    #[default]
    Invalid,
}

impl std::fmt::Display for IncreKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IncreKind::NoChange => "no change",
            IncreKind::Incr => "incremental",
            IncreKind::Rollback => "rollback",
            IncreKind::EmptyPkg => "empty package",
            IncreKind::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

/// Everything the analyser needs from the driver for one package.
pub struct AnalysisArgs<'a> {
    /// The current elaborated tree, imported decls included.
    pub pkg: &'a Package,
    /// Raw mangled name index over the current tree.
    pub mangled2decl: RawMangled2DeclMap,
    /// Freshly computed fingerprints of the current package.
    pub ast_cache: AstCache,
    /// Freshly computed fingerprints of imported decls, per upstream package.
    pub cur_imports: BTreeMap<String, AstCache>,
    pub options: &'a GlobalOptions,
    pub importer: &'a ImportManager,
    /// The previous build's cache, as loaded from disk.
    pub prev_cache: CompilationCache,
    /// Order-sensitive decls of the current tree, grouped by file.
    pub file_map: FileMap,
    /// Direct extends grouped by their shared raw mangled name.
    pub direct_extends: HashMap<RawMangledName, Vec<DeclId>>,
}

/// Result of the incremental scope analysis.
#[derive(Debug, Default)]
pub struct IncreResult {
    pub kind: IncreKind,
    /// Declarations to re-check and re-emit, in `(file, gvid)` order.
    pub decls_to_recompile: Vec<DeclId>,
    /// Raw mangled names to delete, lexicographic.
    pub deleted: Vec<RawMangledName>,
    /// Code-generator mangled names derived from `deleted` through the cached
    /// fingerprint tree.
    pub deleted_cg_mangles: Vec<String>,
    /// Skeleton of the next build's cache; the semantic checker and the CHIR
    /// pipeline fill in their tables before it is stored.
    pub cache_info: CompilationCache,
    pub mangle2decl: RawMangled2DeclMap,
    /// Types whose box wrappers must be regenerated.
    pub re_boxed_types: Vec<RawMangledName>,
}

impl IncreResult {
    fn rollback(mangle2decl: RawMangled2DeclMap) -> Self {
        Self { kind: IncreKind::Rollback, mangle2decl, ..Default::default() }
    }

    /// Summary of the analysis on the diagnostic log.
    pub fn dump(&self, pkg: &Package) {
        let log = logger();
        if !log.is_enabled() {
            return;
        }
        log.section(&format!("incremental analysis result: {}", self.kind));
        log.log_line(&format!("{} decl(s) to recompile", self.decls_to_recompile.len()));
        for &id in &self.decls_to_recompile {
            log.log_line(&format!("  recompile {}", pkg.decl(id).raw_mangle));
        }
        log.log_line(&format!("{} deleted decl(s)", self.deleted.len()));
        for name in &self.deleted {
            log.log_line(&format!("  deleted {name}"));
        }
        for name in &self.deleted_cg_mangles {
            log.log_line(&format!("  deleted cg mangle {name}"));
        }
        for name in &self.re_boxed_types {
            log.log_line(&format!("  reboxed {name}"));
        }
        log.end_section();
    }
}

/// Entry point of incremental scope analysis.
///
/// Decides `NO_CHANGE | INCR | ROLLBACK | EMPTY_PKG | INVALID` and computes
/// the recompile and delete sets. Import-spec or compile-argument changes roll
/// back before any propagation starts; the pollution analyser reports its own
/// fallback conditions the same way.
pub fn incremental_scope_analysis(args: AnalysisArgs<'_>) -> IncreResult {
    let log = logger();

    if args.pkg.is_empty() {
        let cache_info = next_cache_skeleton(
            args.pkg,
            args.options,
            &args.ast_cache,
            &args.cur_imports,
            &args.file_map,
            CompilationCache::default(),
        );
        return IncreResult {
            kind: IncreKind::EmptyPkg,
            cache_info,
            mangle2decl: args.mangled2decl,
            ..Default::default()
        };
    }
    if !args.options.enable_incremental {
        let cache_info = next_cache_skeleton(
            args.pkg,
            args.options,
            &args.ast_cache,
            &args.cur_imports,
            &args.file_map,
            CompilationCache::default(),
        );
        return IncreResult {
            kind: IncreKind::Invalid,
            cache_info,
            mangle2decl: args.mangled2decl,
            ..Default::default()
        };
    }

    let raw_modified = ast_diff(AstDiffArgs {
        prev_cache: &args.prev_cache,
        cur_imports: &args.cur_imports,
        pkg: args.pkg,
        mangled2decl: &args.mangled2decl,
        ast_cache: &args.ast_cache,
        file_map: &args.file_map,
        options: args.options,
    });
    raw_modified.dump(args.pkg);

    if raw_modified.import_changed {
        log.log_line("import specs changed, rollback");
        return IncreResult::rollback(args.mangled2decl);
    }
    if raw_modified.args_changed {
        log.log_line("compile args changed, rollback");
        return IncreResult::rollback(args.mangled2decl);
    }

    let pollution = analyze(PollutionArgs {
        raw_modified,
        pkg: args.pkg,
        sema_info: &args.prev_cache.sema_info,
        chir_opt_info: &args.prev_cache.chir_opt_info,
        cc_out_funcs: &args.prev_cache.cc_out_funcs,
        importer: args.importer,
        mangled2decl: &args.mangled2decl,
        direct_extends: args.direct_extends.clone(),
    });
    if pollution.kind == IncreKind::Rollback {
        return IncreResult::rollback(args.mangled2decl);
    }

    let deleted_cg_mangles = derive_cg_mangles(&args.prev_cache, &pollution.deleted);
    let cache_info = next_cache_skeleton(
        args.pkg,
        args.options,
        &args.ast_cache,
        &args.cur_imports,
        &args.file_map,
        args.prev_cache,
    );

    let result = IncreResult {
        kind: pollution.kind,
        decls_to_recompile: pollution.decls_to_recompile,
        deleted: pollution.deleted,
        deleted_cg_mangles,
        cache_info,
        mangle2decl: args.mangled2decl,
        re_boxed_types: pollution.re_boxed_types,
    };
    result.dump(args.pkg);
    result
}

/// The next cache starts from the previous one: counters continue, the
/// semantic tables survive until the collector and the CHIR pipeline replace
/// their slices, and the fresh fingerprints take over.
fn next_cache_skeleton(
    pkg: &Package,
    options: &GlobalOptions,
    ast_cache: &AstCache,
    cur_imports: &BTreeMap<String, AstCache>,
    file_map: &FileMap,
    prev: CompilationCache,
) -> CompilationCache {
    let mut next = prev;
    next.specs_hash = hash::specs_hash(pkg);
    next.compile_args = options.compile_args.clone();
    next.cur_pkg_ast_cache = ast_cache.clone();
    next.imported_ast_cache = cur_imports.clone();
    next.file_map = cache_file_map(pkg, file_map);
    next
}

/// Expand the raw delete list into the code-generator namespace by walking
/// every `cg_mangle` under each deleted name in the cached fingerprint tree.
/// Compiler-added synthetics in the delete list have no fingerprint record;
/// their names are already codegen-recognisable and pass through as-is.
fn derive_cg_mangles(prev: &CompilationCache, deleted: &[RawMangledName]) -> Vec<String> {
    let mut index: BTreeMap<&str, &DeclFingerprint> = BTreeMap::new();
    let mut stack: Vec<(&str, &DeclFingerprint)> = Vec::new();
    for (mangle, record) in prev
        .cur_pkg_ast_cache
        .iter()
        .chain(prev.imported_ast_cache.values().flatten())
    {
        stack.push((mangle.as_str(), &record.fp));
    }
    while let Some((mangle, fp)) = stack.pop() {
        index.insert(mangle, fp);
        for member in &fp.members {
            stack.push((member.raw_mangle.as_str(), &member.fp));
        }
    }

    let mut out: Vec<String> = Vec::new();
    for name in deleted {
        match index.get(name.as_str()) {
            Some(fp) => collect_cg_mangles(fp, &mut out),
            None => {
                if mangle::is_compiler_added_name(name) {
                    out.push(name.clone());
                }
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

fn collect_cg_mangles(fp: &DeclFingerprint, out: &mut Vec<String>) {
    if !fp.cg_mangle.is_empty() {
        out.push(fp.cg_mangle.clone());
    }
    for member in &fp.members {
        collect_cg_mangles(&member.fp, out);
    }
}
