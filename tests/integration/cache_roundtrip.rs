//! Cache container round-trips: the serialised blob must decode to an equal
//! cache, byte-equal across runs, and reject corrupted containers.

use vesta_incremental::ast::AstKind;
use vesta_incremental::cache::{
    CacheError, CompilationCache, DeclFingerprint, MemberFingerprint, NameUsage, SemaUsage,
    TopLevelFingerprint, deserialize_cache, load_cache, serialize_cache, store_cache,
};
use vesta_incremental::span::Gvid;

fn populated_cache() -> CompilationCache {
    let mut cache = CompilationCache::default();
    cache.specs_hash = 0x1234_5678_9abc_def0;
    cache.lambda_counter = 17;
    cache.string_literal_counter = 4;
    cache.env_class_counter = 2;
    cache.compile_args = vec!["--output-type=staticlib".into(), "-O2".into()];
    cache.bitcode_files = vec!["app.0.bc".into(), "app.1.bc".into()];

    let mut class_fp = DeclFingerprint::new(AstKind::Class);
    class_fp.sig_hash = 11;
    class_fp.src_use_hash = 12;
    class_fp.body_hash = 13;
    class_fp.gvid = Gvid::new("widget.vesta", 0);
    class_fp.cg_mangle = "app.6Widget".into();
    let mut method_fp = DeclFingerprint::new(AstKind::Func);
    method_fp.sig_hash = 21;
    method_fp.cg_mangle = "_FNapp.6Widget.4draw()".into();
    class_fp.members.push(MemberFingerprint {
        raw_mangle: "app.6Widget.4draw()".into(),
        fp: method_fp,
    });
    let mut top = TopLevelFingerprint::new(class_fp);
    top.inst_var_hash = 31;
    top.virt_hash = 32;
    top.extends.push("app.6Widget<:app.1I".into());
    cache.cur_pkg_ast_cache.insert("app.6Widget".into(), top);

    let mut usage = SemaUsage::default();
    usage.api_usages.used_decls.insert("app.6Widget".into());
    usage.body_usages.used_names.insert(
        "draw".into(),
        NameUsage { has_unqualified_usage: true, ..Default::default() },
    );
    usage.boxed_types.insert("app.5Point".into());
    cache.sema_info.usages.insert("app.4main()".into(), usage);
    cache
        .sema_info
        .relations
        .entry("app.6Widget".into())
        .or_default()
        .inherits
        .insert("app.4Base".into());
    cache
        .sema_info
        .compiler_added_usages
        .entry("app.6Widget".into())
        .or_default()
        .insert("app.6Widget<init>".into());
    cache
        .chir_opt_info
        .entry("app.4main()".into())
        .or_default()
        .insert("app.6Widget.4draw()".into());
    cache.virtual_wrapper_deps.insert("app.6Widget.4draw()".into(), "_WVapp.6Widget".into());
    cache.cc_out_funcs.insert("app.7handler()".into());
    cache.file_map.insert("widget.vesta".into(), vec!["app.6Widget".into()]);
    cache
        .cg_added
        .entry("app.6Widget".into())
        .or_default()
        .insert("app.6Widget$ti".into());
    cache
}

#[test]
fn deserialize_inverts_serialize() {
    let cache = populated_cache();
    let bytes = serialize_cache(&cache).unwrap();
    let back = deserialize_cache(&bytes).unwrap();
    assert_eq!(cache, back);
    // serialise(deserialise(cache)) == cache, byte for byte
    assert_eq!(serialize_cache(&back).unwrap(), bytes);
}

#[test]
fn equal_caches_produce_equal_bytes() {
    let a = serialize_cache(&populated_cache()).unwrap();
    let b = serialize_cache(&populated_cache()).unwrap();
    assert_eq!(a, b);
}

#[test]
fn store_then_load_preserves_cache() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.cachedast");
    let cache = populated_cache();
    store_cache(&path, &cache).unwrap();
    assert_eq!(load_cache(&path).unwrap(), cache);
}

#[test]
fn corrupted_container_is_illegal() {
    let mut bytes = serialize_cache(&populated_cache()).unwrap();
    bytes[2] ^= 0xff;
    let err = deserialize_cache(&bytes).unwrap_err();
    assert!(matches!(err, CacheError::InvalidMagic));
    assert!(err.to_string().contains("illegal bitcode cache"));
}

#[test]
fn missing_file_is_an_io_error() {
    let err = load_cache(std::path::Path::new("/nonexistent/app.cachedast")).unwrap_err();
    assert!(matches!(err, CacheError::Io(_)));
}
