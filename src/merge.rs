//! IR merge: splice a freshly compiled incremental module into the previously
//! cached module.
//!
//! Obsolete definitions are renamed onto a "useless" suffix and removed
//! together with their transitive stale users; fresh definitions replace
//! cached bodies through the symbol namespace; constant initialisers, debug
//! compile units and the reflection tables are rebuilt at the end. The merge
//! is order-independent up to the dependency direction, because every step
//! works over the module's sorted symbol tables.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use crate::cache::CachedMangleMap;
use crate::chir::module::{
    ATTR_C_FFI, ATTR_TYPE_TEMPLATE, ATTR_USED_BY_CLOSURE, Function, KEEP_TYPES_FUNC, Linkage,
    MD_FUNCTIONS, MD_GLOBAL_VARS, MD_TYPES, MD_TYPE_TEMPLATES, Module, is_file_init_func,
    load_module,
};

/// Suffix obsolete symbols are renamed onto before removal.
pub const USELESS_SUFFIX: &str = ".useless";

#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    /// The cached module is absent or unparseable.
    #[error("cache lost/illegal: {0}")]
    CacheLost(String),
    /// A symbol in the delete set has conflicting types and its carcass name
    /// is already taken.
    #[error("conflicting symbol {0} cannot be renamed")]
    ConflictingSymbol(String),
}

/// Merges one incremental module into one cached module.
#[derive(Debug)]
pub struct IrMerger {
    cached: Module,
    /// Original names of symbols scheduled for removal.
    removed_roots: BTreeSet<String>,
    /// Carcass names created by renames, erased at the end.
    carcasses: BTreeSet<String>,
}

impl IrMerger {
    pub fn new(cached: Module) -> Self {
        Self { cached, removed_roots: BTreeSet::new(), carcasses: BTreeSet::new() }
    }

    /// Load the cached module from disk; absence or a bad container is a
    /// fatal merge error, not a rollback (the analyser decided incremental
    /// output was possible before codegen started).
    pub fn load(path: &Path) -> Result<Self, MergeError> {
        let module = load_module(path).map_err(|e| MergeError::CacheLost(e.to_string()))?;
        Ok(Self::new(module))
    }

    /// Link `incremental` into the cached module and return the merged result.
    pub fn link(
        mut self,
        incremental: Module,
        mangles: &CachedMangleMap,
    ) -> Result<Module, MergeError> {
        mangles.dump();
        self.obsolete_cached_decls(mangles)?;
        self.copy_declarations(&incremental)?;
        self.update_global_initializers(&incremental);
        self.update_function_definitions(&incremental);
        self.sweep_stale_users();
        self.erase_carcasses();
        self.collect_unused_lambdas();
        self.rebuild_reflection_metadata();
        self.merge_cg_added(&incremental, mangles);
        self.cached.compile_unit.global_variables =
            self.cached.globals.keys().cloned().collect();
        Ok(self.cached)
    }

    /// Step 2: rename every deleted symbol (and the synthetics codegen added
    /// for it) onto the useless suffix; externalise and strip what the mangle
    /// map says.
    fn obsolete_cached_decls(&mut self, mangles: &CachedMangleMap) -> Result<(), MergeError> {
        let mut targets: BTreeSet<String> = BTreeSet::new();
        for name in &mangles.incr_removed_decls {
            targets.insert(name.clone());
            if let Some(synthetics) = self.cached.cg_added.get(name) {
                targets.extend(synthetics.iter().cloned());
            }
        }
        for name in targets {
            if self.cached.has_symbol(&name) {
                let carcass = format!("{name}{USELESS_SUFFIX}");
                if self.cached.has_symbol(&carcass) {
                    return Err(MergeError::ConflictingSymbol(name));
                }
                self.cached.rename_symbol(&name, &carcass);
                self.carcasses.insert(carcass);
            }
            self.removed_roots.insert(name);
        }
        for name in &mangles.new_external_decls {
            if let Some(f) = self.cached.functions.get_mut(name) {
                f.linkage = Linkage::External;
            } else if let Some(g) = self.cached.globals.get_mut(name) {
                g.linkage = Linkage::External;
            }
        }
        for name in &mangles.imported_inline_decls {
            if let Some(f) = self.cached.functions.get_mut(name) {
                f.delete_body();
            }
        }
        Ok(())
    }

    /// Step 3: make sure every incremental symbol has at least a declaration
    /// in the cached module. A cached symbol of the same name with a different
    /// type is a signature change the diff missed; rename it away and insert a
    /// fresh declaration.
    fn copy_declarations(&mut self, incremental: &Module) -> Result<(), MergeError> {
        for (name, func) in &incremental.functions {
            let stale_type = self
                .cached
                .functions
                .get(name)
                .is_some_and(|cached| cached.ty != func.ty);
            if stale_type {
                let carcass = format!("{name}{USELESS_SUFFIX}");
                if self.cached.has_symbol(&carcass) {
                    return Err(MergeError::ConflictingSymbol(name.clone()));
                }
                self.cached.rename_symbol(name, &carcass);
                self.carcasses.insert(carcass);
            }
            if !self.cached.functions.contains_key(name) {
                let mut decl = func.clone();
                decl.blocks.clear();
                decl.subprogram = None;
                self.cached.add_function(decl);
            }
        }
        for (name, global) in &incremental.globals {
            let stale_type = self
                .cached
                .globals
                .get(name)
                .is_some_and(|cached| cached.ty != global.ty);
            if stale_type {
                let carcass = format!("{name}{USELESS_SUFFIX}");
                if self.cached.has_symbol(&carcass) {
                    return Err(MergeError::ConflictingSymbol(name.clone()));
                }
                self.cached.rename_symbol(name, &carcass);
                self.carcasses.insert(carcass);
            }
            if !self.cached.globals.contains_key(name) {
                let mut decl = global.clone();
                decl.init = None;
                self.cached.add_global(decl);
            }
        }
        Ok(())
    }

    /// Step 5: clear cached metadata of every incremental global, copy the
    /// fresh metadata, then the initializer if the incremental module defines
    /// one, and restore the linkage.
    fn update_global_initializers(&mut self, incremental: &Module) {
        for (name, global) in &incremental.globals {
            let cached = self
                .cached
                .globals
                .get_mut(name)
                .expect("declaration copied in the previous step");
            cached.metadata.clear();
            cached.metadata.extend(global.metadata.iter().cloned());
            cached.reflection_types = global.reflection_types.clone();
            cached.reflected = global.reflected;
            if global.init.is_some() {
                cached.init = global.init.clone();
                cached.linkage = global.linkage;
            }
        }
    }

    /// Step 6: replace cached bodies with the incremental ones. The keep-types
    /// function is merged block by block instead; subprograms are re-parented
    /// to the cached compile unit.
    fn update_function_definitions(&mut self, incremental: &Module) {
        let cu_name = self.cached.compile_unit.name.clone();
        for (name, func) in &incremental.functions {
            if func.is_declaration() {
                continue;
            }
            let cached = self
                .cached
                .functions
                .get_mut(name)
                .expect("declaration copied in the previous step");
            if name == KEEP_TYPES_FUNC {
                let present: BTreeSet<String> =
                    cached.blocks.iter().map(|b| b.label.clone()).collect();
                for block in &func.blocks {
                    if !present.contains(&block.label) {
                        cached.blocks.push(block.clone());
                    }
                }
                continue;
            }
            cached.blocks = func.blocks.clone();
            cached.linkage = func.linkage;
            cached.attrs = func.attrs.clone();
            cached.reflection_types = func.reflection_types.clone();
            cached.reflected = func.reflected;
            cached.subprogram = func.subprogram.clone().map(|mut sp| {
                sp.compile_unit = cu_name.clone();
                sp
            });
        }
    }

    /// Step 7: a removed name that was not re-introduced leaves dangling
    /// references; their owners are stale and go too. Inside a file-init
    /// function, a direct call to a deleted initializer is erased pointwise
    /// instead of taking the whole function down.
    fn sweep_stale_users(&mut self) {
        let mut worklist: Vec<String> = self
            .removed_roots
            .iter()
            .filter(|name| !self.cached.has_symbol(name))
            .cloned()
            .collect();
        let mut processed: BTreeSet<String> = BTreeSet::new();
        while let Some(name) = worklist.pop() {
            if !processed.insert(name.clone()) {
                continue;
            }
            for user in self.cached.users_of(&name) {
                if self.cached.functions.contains_key(&user) && is_file_init_func(&user) {
                    let f = self.cached.functions.get_mut(&user).expect("user exists");
                    for block in &mut f.blocks {
                        block.insts.retain(|inst| !inst.references(&name));
                    }
                    continue;
                }
                self.cached.erase_symbol(&user);
                worklist.push(user);
            }
        }
    }

    fn erase_carcasses(&mut self) {
        for carcass in std::mem::take(&mut self.carcasses) {
            self.cached.erase_symbol(&carcass);
        }
    }

    /// Step 8: closure-lifted lambdas with no remaining users are erased,
    /// iterating to a fixed point since erasing one can orphan the next.
    fn collect_unused_lambdas(&mut self) {
        loop {
            let victims: Vec<String> = self
                .cached
                .functions
                .values()
                .filter(|f| {
                    f.attrs.contains(ATTR_USED_BY_CLOSURE)
                        && (f.linkage == Linkage::Internal || f.attrs.contains(ATTR_C_FFI))
                        && self.cached.users_of(&f.name).is_empty()
                })
                .map(|f| f.name.clone())
                .collect();
            if victims.is_empty() {
                break;
            }
            for name in victims {
                self.cached.erase_symbol(&name);
            }
        }
    }

    /// Step 9: rebuild the reflection tables from the merged module, so they
    /// enumerate exactly the still-present symbols.
    fn rebuild_reflection_metadata(&mut self) {
        let mut types: BTreeSet<String> = BTreeSet::new();
        let mut templates: BTreeSet<String> = BTreeSet::new();
        let mut functions: Vec<String> = Vec::new();
        let mut global_vars: Vec<String> = Vec::new();

        for f in self.cached.functions.values() {
            if f.reflected {
                functions.push(f.name.clone());
            }
            let target = if f.attrs.contains(ATTR_TYPE_TEMPLATE) { &mut templates } else { &mut types };
            target.extend(f.reflection_types.iter().cloned());
        }
        for g in self.cached.globals.values() {
            if g.reflected {
                global_vars.push(g.name.clone());
            }
            types.extend(g.reflection_types.iter().cloned());
        }
        functions.sort_unstable();
        global_vars.sort_unstable();
        self.cached
            .named_metadata
            .insert(MD_TYPES.into(), types.into_iter().collect());
        self.cached
            .named_metadata
            .insert(MD_TYPE_TEMPLATES.into(), templates.into_iter().collect());
        self.cached.named_metadata.insert(MD_FUNCTIONS.into(), functions);
        self.cached.named_metadata.insert(MD_GLOBAL_VARS.into(), global_vars);
    }

    /// Step 10: the union of cached and incremental codegen-added tables,
    /// minus the removed decls, is the next build's table.
    fn merge_cg_added(&mut self, incremental: &Module, mangles: &CachedMangleMap) {
        let mut merged: BTreeMap<String, BTreeSet<String>> = self.cached.cg_added.clone();
        for name in &mangles.incr_removed_decls {
            merged.remove(name);
        }
        for (name, synthetics) in &incremental.cg_added {
            merged.entry(name.clone()).or_default().extend(synthetics.iter().cloned());
        }
        self.cached.cg_added = merged;
    }
}

/// Merge-time sanity check used by tests and the driver's debug assertions:
/// no surviving symbol may reference a name that neither module defines.
pub fn dangling_references(module: &Module) -> Vec<(String, String)> {
    let mut dangling = Vec::new();
    let known: BTreeSet<&String> =
        module.functions.keys().chain(module.globals.keys()).collect();
    for f in module.functions.values() {
        for block in &f.blocks {
            for inst in &block.insts {
                for value in &inst.operands {
                    if let crate::chir::module::Value::Symbol(s) = value {
                        if !known.contains(s) {
                            dangling.push((f.name.clone(), s.clone()));
                        }
                    }
                }
            }
        }
    }
    dangling
}

/// Helper for drivers: declaration-only clone of a function.
pub fn as_declaration(func: &Function) -> Function {
    let mut decl = func.clone();
    decl.blocks.clear();
    decl.subprogram = None;
    decl
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chir::module::{BasicBlock, GlobalVar, Instruction, Value};
    use crate::chir::types::ChirType;

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

    #[test]
    fn deleted_symbol_and_transitive_users_removed() {
        let mut cached = Module::new("app");
        cached.add_function(defined_fn("dead"));
        cached.add_function(calling_fn("caller", "dead"));
        cached.add_function(calling_fn("grand", "caller"));
        cached.add_function(defined_fn("alive"));

        let mut mangles = CachedMangleMap::default();
        mangles.incr_removed_decls.insert("dead".into());

        let merged = IrMerger::new(cached).link(Module::new("incr"), &mangles).unwrap();
        assert!(!merged.has_symbol("dead"));
        assert!(!merged.has_symbol("caller"));
        assert!(!merged.has_symbol("grand"));
        assert!(merged.has_symbol("alive"));
        assert!(dangling_references(&merged).is_empty());
    }

    #[test]
    fn recompiled_symbol_keeps_its_users() {
        let mut cached = Module::new("app");
        cached.add_function(defined_fn("f"));
        cached.add_function(calling_fn("caller", "f"));

        let mut incremental = Module::new("incr");
        incremental.add_function(defined_fn("f"));

        let mut mangles = CachedMangleMap::default();
        mangles.incr_removed_decls.insert("f".into());

        let merged = IrMerger::new(cached).link(incremental, &mangles).unwrap();
        assert!(merged.has_symbol("f"));
        assert!(merged.has_symbol("caller"));
    }

    #[test]
    fn file_init_call_erased_pointwise() {
        let mut cached = Module::new("app");
        cached.add_function(defined_fn("a$init"));
        let mut fi = Function::new("file$init$main", unit_fn_ty());
        fi.blocks.push(BasicBlock {
            label: "entry".into(),
            insts: vec![
                Instruction::apply("a$init", vec![]),
                Instruction::apply("b$init", vec![]),
            ],
        });
        cached.add_function(fi);
        cached.add_function(defined_fn("b$init"));

        let mut mangles = CachedMangleMap::default();
        mangles.incr_removed_decls.insert("a$init".into());

        let merged = IrMerger::new(cached).link(Module::new("incr"), &mangles).unwrap();
        let fi = &merged.functions["file$init$main"];
        assert_eq!(fi.blocks[0].insts.len(), 1);
        assert!(fi.blocks[0].insts[0].references("b$init"));
    }

    #[test]
    fn synthetic_names_removed_with_origin() {
        let mut cached = Module::new("app");
        cached.add_function(defined_fn("f"));
        cached.add_function(defined_fn("f$wrapper"));
        cached
            .cg_added
            .entry("f".into())
            .or_default()
            .insert("f$wrapper".into());

        let mut mangles = CachedMangleMap::default();
        mangles.incr_removed_decls.insert("f".into());

        let merged = IrMerger::new(cached).link(Module::new("incr"), &mangles).unwrap();
        assert!(!merged.has_symbol("f$wrapper"));
        assert!(!merged.cg_added.contains_key("f"));
    }

    #[test]
    fn changed_signature_replaces_conflicting_symbol() {
        let mut cached = Module::new("app");
        cached.add_function(defined_fn("f"));

        let mut incremental = Module::new("incr");
        let mut f2 = Function::new("f", ChirType::func(vec![ChirType::Bool], ChirType::Unit));
        f2.blocks.push(BasicBlock { label: "entry".into(), insts: vec![] });
        incremental.add_function(f2);

        let merged = IrMerger::new(cached).link(incremental, &CachedMangleMap::default()).unwrap();
        let f = &merged.functions["f"];
        assert_eq!(f.ty, ChirType::func(vec![ChirType::Bool], ChirType::Unit));
    }

    #[test]
    fn lambda_gc_runs_to_fixed_point() {
        let mut cached = Module::new("app");
        // lambda2 is used only by lambda1; both die once nothing else uses lambda1
        let mut l1 = calling_fn("lambda1", "lambda2");
        l1.attrs.insert(ATTR_USED_BY_CLOSURE.into());
        l1.linkage = Linkage::Internal;
        let mut l2 = defined_fn("lambda2");
        l2.attrs.insert(ATTR_USED_BY_CLOSURE.into());
        l2.linkage = Linkage::Internal;
        cached.add_function(l1);
        cached.add_function(l2);
        cached.add_function(defined_fn("keep"));

        let merged = IrMerger::new(cached).link(Module::new("incr"), &CachedMangleMap::default()).unwrap();
        assert!(!merged.has_symbol("lambda1"));
        assert!(!merged.has_symbol("lambda2"));
        assert!(merged.has_symbol("keep"));
    }

    #[test]
    fn reflection_tables_list_present_symbols_only() {
        let mut cached = Module::new("app");
        let mut f = defined_fn("shown");
        f.reflected = true;
        f.reflection_types.push("app.1T".into());
        cached.add_function(f);
        let mut dead = defined_fn("dead");
        dead.reflected = true;
        cached.add_function(dead);
        let mut g = GlobalVar::new("g", ChirType::Bool);
        g.reflected = true;
        cached.add_global(g);

        let mut mangles = CachedMangleMap::default();
        mangles.incr_removed_decls.insert("dead".into());

        let merged = IrMerger::new(cached).link(Module::new("incr"), &mangles).unwrap();
        assert_eq!(merged.named_metadata[MD_FUNCTIONS], vec!["shown".to_string()]);
        assert_eq!(merged.named_metadata[MD_GLOBAL_VARS], vec!["g".to_string()]);
        assert_eq!(merged.named_metadata[MD_TYPES], vec!["app.1T".to_string()]);
        // every function in the table is present
        for name in &merged.named_metadata[MD_FUNCTIONS] {
            assert!(merged.has_symbol(name));
        }
    }

    #[test]
    fn keep_types_function_merges_blocks() {
        let mut cached = Module::new("app");
        let mut kt = Function::new(KEEP_TYPES_FUNC, unit_fn_ty());
        kt.blocks.push(BasicBlock { label: "types.a".into(), insts: vec![] });
        cached.add_function(kt);

        let mut incremental = Module::new("incr");
        let mut kt2 = Function::new(KEEP_TYPES_FUNC, unit_fn_ty());
        kt2.blocks.push(BasicBlock { label: "types.a".into(), insts: vec![] });
        kt2.blocks.push(BasicBlock { label: "types.b".into(), insts: vec![] });
        incremental.add_function(kt2);

        let merged = IrMerger::new(cached).link(incremental, &CachedMangleMap::default()).unwrap();
        let labels: Vec<&str> = merged.functions[KEEP_TYPES_FUNC]
            .blocks
            .iter()
            .map(|b| b.label.as_str())
            .collect();
        assert_eq!(labels, vec!["types.a", "types.b"]);
    }

    #[test]
    fn imported_inline_downgraded_to_declaration() {
        let mut cached = Module::new("app");
        cached.add_function(defined_fn("inline_me"));
        let mut mangles = CachedMangleMap::default();
        mangles.imported_inline_decls.insert("inline_me".into());
        let merged = IrMerger::new(cached).link(Module::new("incr"), &mangles).unwrap();
        let f = &merged.functions["inline_me"];
        assert!(f.is_declaration());
        assert_eq!(f.linkage, Linkage::External);
    }

    #[test]
    fn missing_cache_is_fatal() {
        let err = IrMerger::load(Path::new("/nonexistent/app.chir")).unwrap_err();
        assert!(matches!(err, MergeError::CacheLost(_)));
    }
}
