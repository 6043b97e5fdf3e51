//! AST diff: compare the current elaborated tree against the cached
//! fingerprint table and emit the raw `ModifiedDecls` record.
//!
//! The walk is deterministic: top-level declarations in `(file, gvid)` order,
//! members in declaration order, deleted names in lexicographic order. The
//! diff never propagates anything, it only classifies; expansion to the full
//! recompile set is the pollution analyser's job.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{AstKind, DeclId, Package, RawMangled2DeclMap, RawMangledName};
use crate::cache::{AstCache, CompilationCache, DeclFingerprint, TopLevelFingerprint};
use crate::hash::{compile_args_changed, specs_hash};
use crate::logger::logger;
use crate::options::GlobalOptions;

/// Order-sensitive decls of the current tree, grouped by file, sorted by gvid.
pub type FileMap = BTreeMap<String, Vec<DeclId>>;

/// Change flags of a function, variable or property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonChange {
    pub decl: DeclId,
    pub sig: bool,
    pub src_use: bool,
    pub body: bool,
}

impl CommonChange {
    pub fn any(&self) -> bool {
        self.sig || self.src_use || self.body
    }
}

/// Change record of a type declaration, member lists included.
#[derive(Debug, Clone, Default)]
pub struct TypeChange {
    pub inst_var: bool,
    pub virt_fun: bool,
    pub sig: bool,
    pub src_use: bool,
    pub body: bool,
    pub changed: Vec<CommonChange>,
    /// Added non-virtual functions and properties, extended ones included.
    pub added: Vec<DeclId>,
    pub deleted: Vec<RawMangledName>,
}

impl TypeChange {
    pub fn any(&self) -> bool {
        self.inst_var
            || self.virt_fun
            || self.sig
            || self.src_use
            || self.body
            || !self.changed.is_empty()
            || !self.added.is_empty()
            || !self.deleted.is_empty()
    }
}

/// The raw diff between two builds of one package.
#[derive(Debug, Default)]
pub struct ModifiedDecls {
    /// Added top-level decls.
    pub added: Vec<DeclId>,
    /// All deleted decls (top-level and member), by raw mangled name.
    pub deletes: Vec<RawMangledName>,
    pub deleted_type_aliases: Vec<RawMangledName>,
    /// Change of the import-spec hash.
    pub import_changed: bool,
    /// Change of the compile-argument vector.
    pub args_changed: bool,
    pub types: Vec<(DeclId, TypeChange)>,
    pub commons: Vec<CommonChange>,
    /// Changed type aliases; any entry forces a rollback.
    pub changed_aliases: Vec<DeclId>,
    /// Order-sensitive decls whose relative order moved.
    pub order_changes: Vec<DeclId>,
    /// Mangled names present in a fingerprint table but resolvable against
    /// neither side of the diff; any entry forces a rollback.
    pub unfound: Vec<RawMangledName>,
}

impl ModifiedDecls {
    pub fn any(&self) -> bool {
        !self.added.is_empty()
            || !self.deletes.is_empty()
            || !self.deleted_type_aliases.is_empty()
            || !self.types.is_empty()
            || !self.commons.is_empty()
            || !self.changed_aliases.is_empty()
            || !self.order_changes.is_empty()
    }

    fn render_common(pkg: &Package, c: &CommonChange) -> String {
        let mut line = format!("{}: ", pkg.decl(c.decl).raw_mangle);
        if !c.any() {
            line.push_str("no change");
            return line;
        }
        if c.sig {
            line.push_str("sig ");
        }
        if c.src_use {
            line.push_str("srcuse ");
        }
        if c.body {
            line.push_str("body ");
        }
        line
    }

    /// Dump the raw diff to the diagnostic log, sorted by mangled name.
    pub fn dump(&self, pkg: &Package) {
        let log = logger();
        if !log.is_enabled() {
            return;
        }
        if !self.any() {
            log.log_line("no raw modified decls");
            return;
        }
        log.section("begin dump raw modified decls:");
        let mut added: Vec<&str> = self
            .added
            .iter()
            .map(|&id| pkg.decl(id).raw_mangle.as_str())
            .collect();
        added.sort_unstable();
        for mangle in added {
            log.log_line(&format!("added {mangle}"));
        }
        let mut deleted: Vec<&str> = self
            .deleted_type_aliases
            .iter()
            .chain(self.deletes.iter())
            .map(String::as_str)
            .collect();
        deleted.sort_unstable();
        for mangle in deleted {
            log.log_line(&format!("deleted {mangle}"));
        }
        let mut types: Vec<&(DeclId, TypeChange)> =
            self.types.iter().filter(|(_, c)| c.any()).collect();
        types.sort_by(|a, b| pkg.decl(a.0).raw_mangle.cmp(&pkg.decl(b.0).raw_mangle));
        for (id, change) in types {
            let mut flags = String::new();
            if change.inst_var {
                flags.push_str("memory ");
            }
            if change.virt_fun {
                flags.push_str("virtual ");
            }
            if change.sig {
                flags.push_str("sig ");
            }
            if change.src_use {
                flags.push_str("srcuse ");
            }
            if change.body {
                flags.push_str("body ");
            }
            log.log_line(&format!("{}: {}", pkg.decl(*id).raw_mangle, flags.trim_end()));
            if !change.added.is_empty() {
                let names: Vec<&str> = change
                    .added
                    .iter()
                    .map(|&m| pkg.decl(m).raw_mangle.as_str())
                    .collect();
                log.log_line(&format!("    added members {}: {}", names.len(), names.join(" ")));
            }
            if !change.deleted.is_empty() {
                log.log_line(&format!(
                    "    deleted members {}: {}",
                    change.deleted.len(),
                    change.deleted.join(" ")
                ));
            }
            for c in &change.changed {
                log.log_line(&format!("         {}", Self::render_common(pkg, c)));
            }
        }
        let mut commons: Vec<&CommonChange> = self.commons.iter().filter(|c| c.any()).collect();
        commons.sort_by(|a, b| pkg.decl(a.decl).raw_mangle.cmp(&pkg.decl(b.decl).raw_mangle));
        for c in commons {
            log.log_line(&Self::render_common(pkg, c));
        }
        if !self.order_changes.is_empty() {
            log.log_line(&format!("{} order changed decl(s).", self.order_changes.len()));
            let mut names: Vec<&str> = self
                .order_changes
                .iter()
                .map(|&id| pkg.decl(id).raw_mangle.as_str())
                .collect();
            names.sort_unstable();
            for name in names {
                log.log_line(&format!("order change {name}"));
            }
        }
        log.end_section();
    }
}

pub struct AstDiffArgs<'a> {
    pub prev_cache: &'a CompilationCache,
    /// Freshly computed fingerprints of imported decls, per upstream package.
    pub cur_imports: &'a BTreeMap<String, AstCache>,
    pub pkg: &'a Package,
    pub mangled2decl: &'a RawMangled2DeclMap,
    /// Freshly computed fingerprints of the current package.
    pub ast_cache: &'a AstCache,
    pub file_map: &'a FileMap,
    pub options: &'a GlobalOptions,
}

/// Compare the current tree with the cached fingerprint table.
pub fn ast_diff(args: AstDiffArgs<'_>) -> ModifiedDecls {
    let mut out = ModifiedDecls::default();
    out.import_changed = specs_hash(args.pkg) != args.prev_cache.specs_hash;
    out.args_changed =
        compile_args_changed(&args.prev_cache.compile_args, &args.options.compile_args);

    diff_package(
        &mut out,
        args.pkg,
        args.mangled2decl,
        args.ast_cache,
        &args.prev_cache.cur_pkg_ast_cache,
    );

    // imported packages: the union of previously-seen and currently-visible
    let empty = AstCache::new();
    let mut imported_names: BTreeSet<&String> = args.cur_imports.keys().collect();
    imported_names.extend(args.prev_cache.imported_ast_cache.keys());
    for name in imported_names {
        let cur = args.cur_imports.get(name).unwrap_or(&empty);
        let prev = args.prev_cache.imported_ast_cache.get(name).unwrap_or(&empty);
        diff_package(&mut out, args.pkg, args.mangled2decl, cur, prev);
    }

    detect_order_changes(&mut out, args.pkg, args.file_map, &args.prev_cache.file_map);
    out
}

fn common_flags(prev: &DeclFingerprint, cur: &DeclFingerprint) -> (bool, bool, bool) {
    (
        prev.sig_hash != cur.sig_hash || prev.ast_kind != cur.ast_kind,
        prev.src_use_hash != cur.src_use_hash,
        prev.body_hash != cur.body_hash,
    )
}

fn diff_package(
    out: &mut ModifiedDecls,
    pkg: &Package,
    mangled2decl: &RawMangled2DeclMap,
    cur: &AstCache,
    prev: &AstCache,
) {
    // walk current decls in (file, gvid) order
    let mut ordered: Vec<(&RawMangledName, &TopLevelFingerprint)> = cur.iter().collect();
    ordered.sort_by(|a, b| a.1.fp.gvid.cmp(&b.1.fp.gvid).then_with(|| a.0.cmp(b.0)));

    for (mangle, record) in ordered {
        let Some(&id) = mangled2decl.get(mangle) else {
            out.unfound.push(mangle.clone());
            continue;
        };
        match prev.get(mangle) {
            None => out.added.push(id),
            Some(cached) => {
                if record.fp.ast_kind == AstKind::TypeAlias {
                    let (sig, src_use, body) = common_flags(&cached.fp, &record.fp);
                    if sig || src_use || body {
                        out.changed_aliases.push(id);
                    }
                    continue;
                }
                if record.fp.ast_kind.is_type() || cached.fp.ast_kind.is_type() {
                    let change = diff_type(mangled2decl, cached, record);
                    if change.any() {
                        out.types.push((id, change));
                    }
                } else {
                    let (sig, src_use, body) = common_flags(&cached.fp, &record.fp);
                    let change = CommonChange { decl: id, sig, src_use, body };
                    if change.any() {
                        out.commons.push(change);
                    }
                }
            }
        }
    }

    // cached decls no longer present
    for (mangle, cached) in prev {
        if cur.contains_key(mangle) {
            continue;
        }
        if cached.fp.ast_kind == AstKind::TypeAlias {
            out.deleted_type_aliases.push(mangle.clone());
        } else {
            out.deletes.push(mangle.clone());
        }
    }
}

fn diff_type(
    mangled2decl: &RawMangled2DeclMap,
    cached: &TopLevelFingerprint,
    cur: &TopLevelFingerprint,
) -> TypeChange {
    let mut change = TypeChange::default();
    change.inst_var = cached.inst_var_hash != cur.inst_var_hash;
    change.virt_fun = cached.virt_hash != cur.virt_hash;
    let (sig, src_use, body) = common_flags(&cached.fp, &cur.fp);
    change.sig = sig;
    change.src_use = src_use;
    change.body = body;

    let cached_members: BTreeMap<&RawMangledName, &DeclFingerprint> =
        cached.fp.members.iter().map(|m| (&m.raw_mangle, &m.fp)).collect();
    for member in &cur.fp.members {
        match cached_members.get(&member.raw_mangle) {
            None => {
                if let Some(&id) = mangled2decl.get(&member.raw_mangle) {
                    change.added.push(id);
                }
            }
            Some(prev_fp) => {
                if let Some(&id) = mangled2decl.get(&member.raw_mangle) {
                    let (sig, src_use, body) = common_flags(prev_fp, &member.fp);
                    let c = CommonChange { decl: id, sig, src_use, body };
                    if c.any() {
                        change.changed.push(c);
                    }
                }
            }
        }
    }
    let cur_members: BTreeSet<&RawMangledName> =
        cur.fp.members.iter().map(|m| &m.raw_mangle).collect();
    for member in &cached.fp.members {
        if !cur_members.contains(&member.raw_mangle) {
            change.deleted.push(member.raw_mangle.clone());
        }
    }

    // relative order of order-sensitive members (static variables)
    let prev_seq: Vec<&str> = cached
        .fp
        .members
        .iter()
        .filter(|m| m.fp.is_order_sensitive)
        .map(|m| m.raw_mangle.as_str())
        .collect();
    let cur_seq: Vec<&str> = cur
        .fp
        .members
        .iter()
        .filter(|m| m.fp.is_order_sensitive)
        .map(|m| m.raw_mangle.as_str())
        .collect();
    change.changed.extend(moved_names(&prev_seq, &cur_seq).into_iter().filter_map(|m| {
        mangled2decl
            .get(m)
            .map(|&id| CommonChange { decl: id, sig: false, src_use: false, body: true })
    }));
    change
}

/// Names present in both sequences whose relative position among the common
/// elements moved.
fn moved_names<'a>(prev: &[&'a str], cur: &[&'a str]) -> Vec<&'a str> {
    let prev_set: BTreeSet<&str> = prev.iter().copied().collect();
    let cur_set: BTreeSet<&str> = cur.iter().copied().collect();
    let prev_common: Vec<&str> = prev.iter().copied().filter(|m| cur_set.contains(m)).collect();
    let cur_common: Vec<&str> = cur.iter().copied().filter(|m| prev_set.contains(m)).collect();
    prev_common
        .iter()
        .zip(cur_common.iter())
        .filter(|(a, b)| a != b)
        .map(|(_, b)| *b)
        .collect()
}

fn detect_order_changes(
    out: &mut ModifiedDecls,
    pkg: &Package,
    cur_file_map: &FileMap,
    cached_file_map: &BTreeMap<String, Vec<RawMangledName>>,
) {
    let mangled = pkg.mangled_map();
    for (file, cur_ids) in cur_file_map {
        let Some(cached_seq) = cached_file_map.get(file) else {
            continue;
        };
        let prev_refs: Vec<&str> = cached_seq.iter().map(String::as_str).collect();
        let cur_refs: Vec<&str> = cur_ids
            .iter()
            .map(|&id| pkg.decl(id).raw_mangle.as_str())
            .collect();
        for moved in moved_names(&prev_refs, &cur_refs) {
            if let Some(&id) = mangled.get(moved) {
                out.order_changes.push(id);
            }
        }
    }
}

/// Build the current file map: order-sensitive top-level decls grouped by
/// file, in gvid order.
pub fn build_file_map(pkg: &Package) -> FileMap {
    let mut map = FileMap::new();
    let mut ids: Vec<DeclId> = pkg
        .top_levels()
        .iter()
        .copied()
        .filter(|&id| pkg.decl(id).is_order_sensitive() && !pkg.decl(id).is_imported())
        .collect();
    ids.sort_by(|&a, &b| pkg.decl(a).gvid.cmp(&pkg.decl(b).gvid));
    for id in ids {
        map.entry(pkg.decl(id).gvid.file.clone()).or_default().push(id);
    }
    map
}

/// The cached rendering of a file map, for the next build.
pub fn cache_file_map(pkg: &Package, map: &FileMap) -> BTreeMap<String, Vec<RawMangledName>> {
    map.iter()
        .map(|(file, ids)| {
            (
                file.clone(),
                ids.iter().map(|&id| pkg.decl(id).raw_mangle.clone()).collect(),
            )
        })
        .collect()
}
