//! The per-package compilation cache: fingerprint records, semantic usage
//! tables, and the versioned binary container they persist in.
//!
//! Container layout (20-byte header + three length-prefixed sections):
//!
//! ```text
//! [4B magic "VICC"] [4B schema version u32 LE] [4B build offset u32 LE]
//! [4B fingerprint offset u32 LE] [4B semantics offset u32 LE]
//! [Build section: 4B length u32 LE + bincode bytes]
//! [Fingerprint section: 4B length u32 LE + bincode bytes]
//! [Semantics section: 4B length u32 LE + bincode bytes]
//! ```
//!
//! Every map in the cache is a `BTreeMap`/`BTreeSet`, so serialisation is
//! content-keyed: hash-equal inputs produce byte-equal blobs and downstream
//! build systems can deduplicate on the bytes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::ast::{AstKind, RawMangledName};
use crate::logger::logger;
use crate::span::Gvid;

/// File extensions of the on-disk artefacts.
pub const CACHED_AST_EXT: &str = "cachedast";
pub const CHIR_EXT: &str = "chir";
pub const BCHIR_EXT: &str = "bchir";
pub const FULL_BCHIR_EXT: &str = "full.bchir";
pub const LOG_EXT: &str = "log";

/// Magic bytes identifying a Vesta incremental compilation cache.
const MAGIC: &[u8; 4] = b"VICC";

/// Current schema version.
const SCHEMA_VERSION: u32 = 1;

/// Header size: magic (4) + version (4) + three section offsets (4 each).
const HEADER_SIZE: usize = 20;

/// A 64-bit declaration fingerprint.
pub type Fingerprint = u64;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("illegal bitcode cache: invalid magic number")]
    InvalidMagic,
    #[error("illegal bitcode cache: unsupported schema version {0} (expected {SCHEMA_VERSION})")]
    UnsupportedVersion(u32),
    #[error("illegal bitcode cache: truncated, expected at least {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },
    #[error("bincode encode error: {0}")]
    Encode(String),
    #[error("bincode decode error: {0}")]
    Decode(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-declaration fingerprints at the three orthogonal axes, plus the facts
/// the next diff needs without re-elaborating the declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclFingerprint {
    /// API surface: name, typed parameters, declared return type, attributes
    /// affecting linkage.
    pub sig_hash: Fingerprint,
    /// Source-visible traits that can propagate through inlining.
    pub src_use_hash: Fingerprint,
    /// Everything visible only inside a complete body; zero for imported decls
    /// that cannot be inlined.
    pub body_hash: Fingerprint,
    pub ast_kind: AstKind,
    /// Participates in observable evaluation order (global/static variable).
    pub is_order_sensitive: bool,
    pub gvid: Gvid,
    /// Code-generator mangled name, cached so deletions reach the IR without
    /// re-mangling.
    pub cg_mangle: String,
    pub members: Vec<MemberFingerprint>,
}

impl DeclFingerprint {
    pub fn new(ast_kind: AstKind) -> Self {
        Self {
            sig_hash: 0,
            src_use_hash: 0,
            body_hash: 0,
            ast_kind,
            is_order_sensitive: false,
            gvid: Gvid::default(),
            cg_mangle: String::new(),
            members: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemberFingerprint {
    pub raw_mangle: RawMangledName,
    pub fp: DeclFingerprint,
}

/// Fingerprint record of a top-level declaration. Types additionally carry the
/// instance-variable layout hash and the virtual-member order hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopLevelFingerprint {
    pub fp: DeclFingerprint,
    /// Raw mangled names of the extends attached to this type.
    pub extends: Vec<RawMangledName>,
    pub inst_var_hash: Fingerprint,
    pub virt_hash: Fingerprint,
}

impl TopLevelFingerprint {
    pub fn new(fp: DeclFingerprint) -> Self {
        Self { fp, extends: Vec::new(), inst_var_hash: 0, virt_hash: 0 }
    }
}

/// Fingerprints of every top-level declaration of a package, keyed by raw
/// mangled name.
pub type AstCache = BTreeMap<RawMangledName, TopLevelFingerprint>;

/// Usage of one identifier: the candidate parent types of qualified usages,
/// the package qualifiers of package-qualified usages, and whether it is ever
/// used unqualified. The imported flag keeps a package rename from recompiling
/// users whose unqualified reference resolves locally.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NameUsage {
    pub parent_decls: BTreeSet<RawMangledName>,
    pub package_qualifiers: BTreeSet<String>,
    pub has_unqualified_usage: bool,
    pub has_unqualified_usage_of_imported: bool,
}

/// Direct name-to-decl references, and abstract resolution candidates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UseInfo {
    pub used_decls: BTreeSet<RawMangledName>,
    pub used_names: BTreeMap<String, NameUsage>,
}

impl UseInfo {
    pub fn is_empty(&self) -> bool {
        self.used_decls.is_empty() && self.used_names.is_empty()
    }
}

/// What one declaration uses, split by where the usage appears.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemaUsage {
    pub api_usages: UseInfo,
    pub body_usages: UseInfo,
    /// Types boxed inside this declaration.
    pub boxed_types: BTreeSet<RawMangledName>,
}

/// Inheritance and extension facts of one type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemaRelation {
    pub inherits: BTreeSet<RawMangledName>,
    pub extends: BTreeSet<RawMangledName>,
    pub extended_interfaces: BTreeSet<RawMangledName>,
}

/// Semantic facts recorded after the previous build's full analysis; the seed
/// of the next build's pollution graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticInfo {
    /// toplevel/member decl -> what it uses.
    pub usages: BTreeMap<RawMangledName, SemaUsage>,
    /// type -> (inherits, extends, extended interfaces).
    pub relations: BTreeMap<RawMangledName, SemaRelation>,
    /// builtin type name -> (extends, extended interfaces); primitives have no
    /// decl of their own.
    pub builtin_type_relations: BTreeMap<String, SemaRelation>,
    /// user decl -> compiler-added mangled names (default ctors, accessors,
    /// box wrappers, generic instantiations).
    pub compiler_added_usages: BTreeMap<RawMangledName, BTreeSet<String>>,
}

/// All cached info of one incremental compilation of one package.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompilationCache {
    /// Hash of the package clause and import specs.
    pub specs_hash: Fingerprint,
    /// Counters for synthetic names, carried so the next build continues
    /// numbering where this one stopped.
    pub lambda_counter: u64,
    pub string_literal_counter: u64,
    pub env_class_counter: u64,
    /// Verbatim compile-argument vector of this build.
    pub compile_args: Vec<String>,
    /// Global variable/function initialisation dependencies, in evaluation
    /// order.
    pub var_func_deps: BTreeMap<RawMangledName, Vec<RawMangledName>>,
    /// CHIR optimisation effects: source decl -> decls its optimised output
    /// leaked into.
    pub chir_opt_info: BTreeMap<RawMangledName, BTreeSet<RawMangledName>>,
    /// raw mangle -> its virtual wrapper's mangled name.
    pub virtual_wrapper_deps: BTreeMap<RawMangledName, String>,
    /// raw mangle -> its variable-init function's mangled name.
    pub var_init_deps: BTreeMap<RawMangledName, String>,
    /// Global or member functions that went through closure conversion.
    pub cc_out_funcs: BTreeSet<RawMangledName>,
    pub sema_info: SemanticInfo,
    pub cur_pkg_ast_cache: AstCache,
    /// Fingerprints of imported decls, per upstream package.
    pub imported_ast_cache: BTreeMap<String, AstCache>,
    /// Order-sensitive decls grouped by file, sorted by gvid.
    pub file_map: BTreeMap<String, Vec<RawMangledName>>,
    /// Bitcode files emitted by the previous build.
    pub bitcode_files: Vec<String>,
    /// Codegen-added symbol names per CHIR decl name, consumed and re-emitted
    /// by IR merge.
    pub cg_added: BTreeMap<String, BTreeSet<String>>,
}

/// Names the IR merge must act on, grouped by the action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedMangleMap {
    /// Symbols to remove from the cached IR. Names are codegen-recognisable.
    pub incr_removed_decls: BTreeSet<String>,
    /// Imported inline decls: body dropped, downgraded to external declaration.
    pub imported_inline_decls: BTreeSet<String>,
    /// Decls whose linkage must become external.
    pub new_external_decls: BTreeSet<String>,
}

impl CachedMangleMap {
    pub fn is_empty(&self) -> bool {
        self.incr_removed_decls.is_empty()
            && self.imported_inline_decls.is_empty()
            && self.new_external_decls.is_empty()
    }

    pub fn dump(&self) {
        let log = logger();
        if !log.is_enabled() {
            return;
        }
        if self.is_empty() {
            log.log_line("[CachedMangleMap] empty");
            return;
        }
        log.log_line("[CachedMangleMap] START");
        if !self.incr_removed_decls.is_empty() {
            log.log_line("[incrRemovedDecls]:");
            for name in &self.incr_removed_decls {
                log.log_line(name);
            }
        }
        if !self.imported_inline_decls.is_empty() {
            log.log_line("[importedInlineDecls]:");
            for name in &self.imported_inline_decls {
                log.log_line(name);
            }
        }
        if !self.new_external_decls.is_empty() {
            log.log_line("[newExternalDecls]:");
            for name in &self.new_external_decls {
                log.log_line(name);
            }
        }
        log.log_line("[CachedMangleMap] END");
    }
}

/// The three container sections, split so a reader can pick up fingerprints
/// without decoding the semantic tables.
#[derive(Serialize)]
struct BuildSectionRef<'a> {
    specs_hash: Fingerprint,
    lambda_counter: u64,
    string_literal_counter: u64,
    env_class_counter: u64,
    compile_args: &'a Vec<String>,
    bitcode_files: &'a Vec<String>,
}

#[derive(Deserialize)]
struct BuildSection {
    specs_hash: Fingerprint,
    lambda_counter: u64,
    string_literal_counter: u64,
    env_class_counter: u64,
    compile_args: Vec<String>,
    bitcode_files: Vec<String>,
}

#[derive(Serialize)]
struct FingerprintSectionRef<'a> {
    cur_pkg_ast_cache: &'a AstCache,
    imported_ast_cache: &'a BTreeMap<String, AstCache>,
    file_map: &'a BTreeMap<String, Vec<RawMangledName>>,
}

#[derive(Deserialize)]
struct FingerprintSection {
    cur_pkg_ast_cache: AstCache,
    imported_ast_cache: BTreeMap<String, AstCache>,
    file_map: BTreeMap<String, Vec<RawMangledName>>,
}

#[derive(Serialize)]
struct SemanticsSectionRef<'a> {
    var_func_deps: &'a BTreeMap<RawMangledName, Vec<RawMangledName>>,
    chir_opt_info: &'a BTreeMap<RawMangledName, BTreeSet<RawMangledName>>,
    virtual_wrapper_deps: &'a BTreeMap<RawMangledName, String>,
    var_init_deps: &'a BTreeMap<RawMangledName, String>,
    cc_out_funcs: &'a BTreeSet<RawMangledName>,
    sema_info: &'a SemanticInfo,
    cg_added: &'a BTreeMap<String, BTreeSet<String>>,
}

#[derive(Deserialize)]
struct SemanticsSection {
    var_func_deps: BTreeMap<RawMangledName, Vec<RawMangledName>>,
    chir_opt_info: BTreeMap<RawMangledName, BTreeSet<RawMangledName>>,
    virtual_wrapper_deps: BTreeMap<RawMangledName, String>,
    var_init_deps: BTreeMap<RawMangledName, String>,
    cc_out_funcs: BTreeSet<RawMangledName>,
    sema_info: SemanticInfo,
    cg_added: BTreeMap<String, BTreeSet<String>>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| CacheError::Encode(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(data: &[u8]) -> Result<T, CacheError> {
    let (value, _) = bincode::serde::decode_from_slice(data, bincode::config::standard())
        .map_err(|e| CacheError::Decode(e.to_string()))?;
    Ok(value)
}

/// Serialize a cache into the container format.
pub fn serialize_cache(cache: &CompilationCache) -> Result<Vec<u8>, CacheError> {
    let build_bytes = encode(&BuildSectionRef {
        specs_hash: cache.specs_hash,
        lambda_counter: cache.lambda_counter,
        string_literal_counter: cache.string_literal_counter,
        env_class_counter: cache.env_class_counter,
        compile_args: &cache.compile_args,
        bitcode_files: &cache.bitcode_files,
    })?;
    let fp_bytes = encode(&FingerprintSectionRef {
        cur_pkg_ast_cache: &cache.cur_pkg_ast_cache,
        imported_ast_cache: &cache.imported_ast_cache,
        file_map: &cache.file_map,
    })?;
    let sema_bytes = encode(&SemanticsSectionRef {
        var_func_deps: &cache.var_func_deps,
        chir_opt_info: &cache.chir_opt_info,
        virtual_wrapper_deps: &cache.virtual_wrapper_deps,
        var_init_deps: &cache.var_init_deps,
        cc_out_funcs: &cache.cc_out_funcs,
        sema_info: &cache.sema_info,
        cg_added: &cache.cg_added,
    })?;

    let build_offset = HEADER_SIZE as u32;
    let fp_offset = build_offset + 4 + build_bytes.len() as u32;
    let sema_offset = fp_offset + 4 + fp_bytes.len() as u32;

    let total = sema_offset as usize + 4 + sema_bytes.len();
    let mut buf = Vec::with_capacity(total);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    buf.extend_from_slice(&build_offset.to_le_bytes());
    buf.extend_from_slice(&fp_offset.to_le_bytes());
    buf.extend_from_slice(&sema_offset.to_le_bytes());
    for bytes in [&build_bytes, &fp_bytes, &sema_bytes] {
        buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(bytes);
    }
    Ok(buf)
}

fn read_section(data: &[u8], offset: usize) -> Result<&[u8], CacheError> {
    if data.len() < offset + 4 {
        return Err(CacheError::Truncated { expected: offset + 4, got: data.len() });
    }
    let len = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
    let start = offset + 4;
    if data.len() < start + len {
        return Err(CacheError::Truncated { expected: start + len, got: data.len() });
    }
    Ok(&data[start..start + len])
}

/// Deserialize a container back into a cache, verifying magic and version.
pub fn deserialize_cache(data: &[u8]) -> Result<CompilationCache, CacheError> {
    if data.len() < HEADER_SIZE {
        return Err(CacheError::Truncated { expected: HEADER_SIZE, got: data.len() });
    }
    if &data[0..4] != MAGIC {
        return Err(CacheError::InvalidMagic);
    }
    let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
    if version != SCHEMA_VERSION {
        return Err(CacheError::UnsupportedVersion(version));
    }
    let build_offset = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
    let fp_offset = u32::from_le_bytes(data[12..16].try_into().unwrap()) as usize;
    let sema_offset = u32::from_le_bytes(data[16..20].try_into().unwrap()) as usize;

    let build: BuildSection = decode(read_section(data, build_offset)?)?;
    let fp: FingerprintSection = decode(read_section(data, fp_offset)?)?;
    let sema: SemanticsSection = decode(read_section(data, sema_offset)?)?;

    Ok(CompilationCache {
        specs_hash: build.specs_hash,
        lambda_counter: build.lambda_counter,
        string_literal_counter: build.string_literal_counter,
        env_class_counter: build.env_class_counter,
        compile_args: build.compile_args,
        var_func_deps: sema.var_func_deps,
        chir_opt_info: sema.chir_opt_info,
        virtual_wrapper_deps: sema.virtual_wrapper_deps,
        var_init_deps: sema.var_init_deps,
        cc_out_funcs: sema.cc_out_funcs,
        sema_info: sema.sema_info,
        cur_pkg_ast_cache: fp.cur_pkg_ast_cache,
        imported_ast_cache: fp.imported_ast_cache,
        file_map: fp.file_map,
        bitcode_files: build.bitcode_files,
        cg_added: sema.cg_added,
    })
}

/// Load a cache blob from disk. Magic or version mismatches surface as
/// `CacheError`, which the entry point maps to a rollback.
pub fn load_cache(path: &Path) -> Result<CompilationCache, CacheError> {
    let data = std::fs::read(path)?;
    deserialize_cache(&data)
}

/// Store a cache blob atomically: write a temporary sibling, then rename.
pub fn store_cache(path: &Path, cache: &CompilationCache) -> Result<(), CacheError> {
    let bytes = serialize_cache(cache)?;
    let tmp = path.with_extension(format!("{CACHED_AST_EXT}.tmp"));
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_cache() -> CompilationCache {
        let mut cache = CompilationCache::default();
        cache.specs_hash = 0xdead_beef;
        cache.lambda_counter = 3;
        cache.compile_args = vec!["--output-type=exe".into(), "-O2".into()];
        let mut fp = DeclFingerprint::new(AstKind::Func);
        fp.sig_hash = 1;
        fp.body_hash = 2;
        fp.gvid = Gvid::new("main.vesta", 0);
        fp.cg_mangle = "_FNapp.1f".into();
        cache.cur_pkg_ast_cache.insert("app.1f()".into(), TopLevelFingerprint::new(fp));
        cache
            .chir_opt_info
            .entry("app.1f()".into())
            .or_default()
            .insert("app.1g()".into());
        cache.cc_out_funcs.insert("app.7applyCc()".into());
        cache
            .sema_info
            .usages
            .entry("app.1g()".into())
            .or_default()
            .body_usages
            .used_decls
            .insert("app.1f()".into());
        cache
    }

    #[test]
    fn roundtrip_is_identity() {
        let cache = sample_cache();
        let bytes = serialize_cache(&cache).unwrap();
        let back = deserialize_cache(&bytes).unwrap();
        assert_eq!(cache, back);
    }

    #[test]
    fn serialization_is_content_keyed() {
        let a = serialize_cache(&sample_cache()).unwrap();
        let b = serialize_cache(&sample_cache()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = serialize_cache(&sample_cache()).unwrap();
        bytes[0] = b'X';
        assert!(matches!(deserialize_cache(&bytes), Err(CacheError::InvalidMagic)));
    }

    #[test]
    fn bad_version_rejected() {
        let mut bytes = serialize_cache(&sample_cache()).unwrap();
        bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
        assert!(matches!(
            deserialize_cache(&bytes),
            Err(CacheError::UnsupportedVersion(99))
        ));
    }

    #[test]
    fn truncated_rejected() {
        let bytes = serialize_cache(&sample_cache()).unwrap();
        assert!(matches!(
            deserialize_cache(&bytes[..bytes.len() - 5]),
            Err(CacheError::Truncated { .. })
        ));
    }

    #[test]
    fn store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pkg.cachedast");
        let cache = sample_cache();
        store_cache(&path, &cache).unwrap();
        let back = load_cache(&path).unwrap();
        assert_eq!(cache, back);
        // no temp sibling left behind
        assert!(!path.with_extension("cachedast.tmp").exists());
    }
}
