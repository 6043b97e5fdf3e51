//! IR merge post-conditions over whole modules: deleted names disappear with
//! their transitive users, reflection tables enumerate only present symbols,
//! and a no-op merge is a fixed point.

use vesta_incremental::cache::CachedMangleMap;
use vesta_incremental::chir::module::{
    BasicBlock, Function, GlobalVar, Instruction, MD_FUNCTIONS, MD_GLOBAL_VARS, Module, Value,
    deserialize_module, serialize_module, store_module,
};
use vesta_incremental::chir::types::ChirType;
use vesta_incremental::merge::{IrMerger, dangling_references};

fn unit_fn_ty() -> ChirType {
    ChirType::func(vec![], ChirType::Unit)
}

fn defined_fn(name: &str) -> Function {
    let mut f = Function::new(name, unit_fn_ty());
    f.blocks.push(BasicBlock { label: "entry".into(), insts: vec![] });
    f
}

fn calling_fn(name: &str, callee: &str) -> Function {
    let mut f = Function::new(name, unit_fn_ty());
    f.blocks.push(BasicBlock {
        label: "entry".into(),
        insts: vec![Instruction::apply(callee, vec![])],
    });
    f
}

/// A cached module with a call chain, a reflected function and a global.
fn cached_module() -> Module {
    let mut m = Module::new("app");
    let mut entry = calling_fn("main", "helper");
    entry.reflected = true;
    m.add_function(entry);
    m.add_function(calling_fn("helper", "leaf"));
    m.add_function(defined_fn("leaf"));
    let mut g = GlobalVar::new("counter", ChirType::Int { width: 64 });
    g.init = Some(Value::ConstInt(0));
    g.reflected = true;
    m.add_global(g);
    m
}

#[test]
fn noop_merge_is_a_fixed_point() {
    let merged_once = IrMerger::new(cached_module())
        .link(Module::new("incr"), &CachedMangleMap::default())
        .unwrap();
    let merged_twice = IrMerger::new(merged_once.clone())
        .link(Module::new("incr"), &CachedMangleMap::default())
        .unwrap();
    // byte-equal after the reflection rebuild
    assert_eq!(
        serialize_module(&merged_once).unwrap(),
        serialize_module(&merged_twice).unwrap()
    );
}

#[test]
fn deleted_name_unreachable_after_merge() {
    let mut mangles = CachedMangleMap::default();
    mangles.incr_removed_decls.insert("leaf".into());
    // helper is recompiled without the call; main is untouched
    let mut incremental = Module::new("incr");
    incremental.add_function(defined_fn("helper"));

    let merged = IrMerger::new(cached_module()).link(incremental, &mangles).unwrap();
    assert!(!merged.has_symbol("leaf"));
    assert!(merged.has_symbol("helper"));
    assert!(merged.has_symbol("main"));
    // no surviving symbol transitively references a deleted one
    assert!(dangling_references(&merged).is_empty());
}

#[test]
fn stale_caller_of_deleted_name_is_swept() {
    let mut mangles = CachedMangleMap::default();
    mangles.incr_removed_decls.insert("leaf".into());
    // nothing recompiled: helper still calls leaf, so helper goes, and so
    // does main which calls helper
    let merged = IrMerger::new(cached_module())
        .link(Module::new("incr"), &mangles)
        .unwrap();
    assert!(!merged.has_symbol("leaf"));
    assert!(!merged.has_symbol("helper"));
    assert!(!merged.has_symbol("main"));
    assert!(merged.has_symbol("counter"));
    assert!(dangling_references(&merged).is_empty());
}

#[test]
fn reflection_tables_track_the_merge() {
    let merged = IrMerger::new(cached_module())
        .link(Module::new("incr"), &CachedMangleMap::default())
        .unwrap();
    assert_eq!(merged.named_metadata[MD_FUNCTIONS], vec!["main".to_string()]);
    assert_eq!(merged.named_metadata[MD_GLOBAL_VARS], vec!["counter".to_string()]);
    for name in &merged.named_metadata[MD_FUNCTIONS] {
        assert!(merged.functions.contains_key(name), "reflection lists absent fn {name}");
    }
    assert!(merged.compile_unit.global_variables.contains("counter"));
}

#[test]
fn fresh_bodies_replace_cached_ones() {
    let mut incremental = Module::new("incr");
    let mut fresh = Function::new("helper", unit_fn_ty());
    fresh.blocks.push(BasicBlock {
        label: "entry".into(),
        insts: vec![Instruction::apply("main", vec![])],
    });
    incremental.add_function(fresh.clone());

    let merged = IrMerger::new(cached_module())
        .link(incremental, &CachedMangleMap::default())
        .unwrap();
    assert_eq!(merged.functions["helper"].blocks, fresh.blocks);
}

#[test]
fn module_store_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.chir");
    let module = cached_module();
    store_module(&path, &module).unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(deserialize_module(&bytes).unwrap(), module);
}
