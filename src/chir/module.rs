//! The linkable IR module: what the code generator emits, what the cache
//! stores between builds, and what IR merge splices together.
//!
//! Symbols reference each other by name, so "who uses X" is answerable by
//! scanning operand lists; that is all the merge needs. The on-disk form is
//! the same magic/version/length-prefixed container the main cache uses, under
//! the `.chir` extension.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::types::ChirType;
use crate::cache::CacheError;

/// Function attribute marking closure-lifted lambdas; merge garbage-collects
/// these when the last user disappears.
pub const ATTR_USED_BY_CLOSURE: &str = "used-by-closure";

/// Function attribute for C-FFI entry points: kept alive by external callers.
pub const ATTR_C_FFI: &str = "c-ffi";

/// Attribute marking a generic type template for the reflection tables.
pub const ATTR_TYPE_TEMPLATE: &str = "type-template";

/// The one function merged basic-block-by-basic-block rather than replaced.
pub const KEEP_TYPES_FUNC: &str = "vesta.keep.types";

/// Prefix of per-file initializer functions.
pub const FILE_INIT_PREFIX: &str = "file$init";

pub fn is_file_init_func(name: &str) -> bool {
    name.starts_with(FILE_INIT_PREFIX)
}

/// Reflection metadata table names.
pub const MD_TYPES: &str = "llvm.types";
pub const MD_TYPE_TEMPLATES: &str = "llvm.typeTemplates";
pub const MD_FUNCTIONS: &str = "llvm.functions";
pub const MD_GLOBAL_VARS: &str = "llvm.globalVars";

const MODULE_MAGIC: &[u8; 4] = b"VCHR";
const MODULE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Linkage {
    External,
    Internal,
    LinkOnce,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Reference to a global symbol by name.
    Symbol(String),
    /// SSA-local reference within a function.
    Local(u32),
    ConstInt(i64),
    ConstStr(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Opcode {
    /// Direct call; operand 0 is the callee symbol.
    Apply,
    /// Virtual dispatch through a vtable slot.
    Invoke { slot: String },
    BinOp(String),
    Load,
    Store,
    Ret,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: Opcode,
    pub operands: Vec<Value>,
}

impl Instruction {
    pub fn apply(callee: impl Into<String>, args: Vec<Value>) -> Self {
        let mut operands = vec![Value::Symbol(callee.into())];
        operands.extend(args);
        Self { op: Opcode::Apply, operands }
    }

    pub fn references(&self, symbol: &str) -> bool {
        self.operands
            .iter()
            .any(|v| matches!(v, Value::Symbol(s) if s == symbol))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicBlock {
    pub label: String,
    pub insts: Vec<Instruction>,
}

/// Debug-info subprogram record; the compile unit is re-parented on merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subprogram {
    pub name: String,
    pub compile_unit: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub ty: ChirType,
    pub linkage: Linkage,
    pub attrs: BTreeSet<String>,
    pub blocks: Vec<BasicBlock>,
    pub subprogram: Option<Subprogram>,
    /// Type-descriptor entries this function contributes to `llvm.types`.
    pub reflection_types: Vec<String>,
    /// Whether the function itself appears in `llvm.functions`.
    pub reflected: bool,
}

impl Function {
    pub fn new(name: impl Into<String>, ty: ChirType) -> Self {
        Self {
            name: name.into(),
            ty,
            linkage: Linkage::Internal,
            attrs: BTreeSet::new(),
            blocks: Vec::new(),
            subprogram: None,
            reflection_types: Vec::new(),
            reflected: false,
        }
    }

    pub fn is_declaration(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Drop the body, leaving an external declaration.
    pub fn delete_body(&mut self) {
        self.blocks.clear();
        self.subprogram = None;
        self.linkage = Linkage::External;
    }

    pub fn references(&self, symbol: &str) -> bool {
        self.blocks
            .iter()
            .any(|b| b.insts.iter().any(|i| i.references(symbol)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalVar {
    pub name: String,
    pub ty: ChirType,
    pub linkage: Linkage,
    pub init: Option<Value>,
    pub metadata: Vec<String>,
    pub reflection_types: Vec<String>,
    pub reflected: bool,
}

impl GlobalVar {
    pub fn new(name: impl Into<String>, ty: ChirType) -> Self {
        Self {
            name: name.into(),
            ty,
            linkage: Linkage::Internal,
            init: None,
            metadata: Vec::new(),
            reflection_types: Vec::new(),
            reflected: false,
        }
    }

    pub fn references(&self, symbol: &str) -> bool {
        matches!(&self.init, Some(Value::Symbol(s)) if s == symbol)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompileUnit {
    pub name: String,
    pub global_variables: BTreeSet<String>,
}

/// A whole IR module.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub compile_unit: CompileUnit,
    pub functions: BTreeMap<String, Function>,
    pub globals: BTreeMap<String, GlobalVar>,
    /// Reflection and other named metadata tables.
    pub named_metadata: BTreeMap<String, Vec<String>>,
    /// Codegen-added symbol names per decl name, carried for the next build.
    pub cg_added: BTreeMap<String, BTreeSet<String>>,
}

impl Module {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            compile_unit: CompileUnit { name: format!("{name}.cu"), ..Default::default() },
            name,
            ..Default::default()
        }
    }

    pub fn add_function(&mut self, func: Function) {
        self.functions.insert(func.name.clone(), func);
    }

    pub fn add_global(&mut self, global: GlobalVar) {
        self.globals.insert(global.name.clone(), global);
    }

    pub fn has_symbol(&self, name: &str) -> bool {
        self.functions.contains_key(name) || self.globals.contains_key(name)
    }

    /// Names of all symbols whose body or initializer references `symbol`.
    pub fn users_of(&self, symbol: &str) -> Vec<String> {
        let mut users: Vec<String> = self
            .functions
            .values()
            .filter(|f| f.references(symbol))
            .map(|f| f.name.clone())
            .collect();
        users.extend(
            self.globals
                .values()
                .filter(|g| g.references(symbol))
                .map(|g| g.name.clone()),
        );
        users
    }

    pub fn rename_symbol(&mut self, from: &str, to: &str) {
        if let Some(mut f) = self.functions.remove(from) {
            f.name = to.to_string();
            self.functions.insert(to.to_string(), f);
        } else if let Some(mut g) = self.globals.remove(from) {
            g.name = to.to_string();
            self.globals.insert(to.to_string(), g);
        }
    }

    pub fn erase_symbol(&mut self, name: &str) {
        self.functions.remove(name);
        self.globals.remove(name);
    }
}

/// Serialize a module into the `.chir` container.
pub fn serialize_module(module: &Module) -> Result<Vec<u8>, CacheError> {
    let body = bincode::serde::encode_to_vec(module, bincode::config::standard())
        .map_err(|e| CacheError::Encode(e.to_string()))?;
    let mut buf = Vec::with_capacity(12 + body.len());
    buf.extend_from_slice(MODULE_MAGIC);
    buf.extend_from_slice(&MODULE_VERSION.to_le_bytes());
    buf.extend_from_slice(&(body.len() as u32).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

/// Deserialize a `.chir` container, verifying magic and version.
pub fn deserialize_module(data: &[u8]) -> Result<Module, CacheError> {
    if data.len() < 12 {
        return Err(CacheError::Truncated { expected: 12, got: data.len() });
    }
    if &data[0..4] != MODULE_MAGIC {
        return Err(CacheError::InvalidMagic);
    }
    let version = u32::from_le_bytes(data[4..8].try_into().unwrap());
    if version != MODULE_VERSION {
        return Err(CacheError::UnsupportedVersion(version));
    }
    let len = u32::from_le_bytes(data[8..12].try_into().unwrap()) as usize;
    if data.len() < 12 + len {
        return Err(CacheError::Truncated { expected: 12 + len, got: data.len() });
    }
    let (module, _) =
        bincode::serde::decode_from_slice(&data[12..12 + len], bincode::config::standard())
            .map_err(|e| CacheError::Decode(e.to_string()))?;
    Ok(module)
}

pub fn load_module(path: &Path) -> Result<Module, CacheError> {
    let data = std::fs::read(path)?;
    deserialize_module(&data)
}

/// Atomic store: temporary sibling, then rename.
pub fn store_module(path: &Path, module: &Module) -> Result<(), CacheError> {
    let bytes = serialize_module(module)?;
    let tmp = path.with_extension("chir.tmp");
    std::fs::write(&tmp, &bytes)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_fn_ty() -> ChirType {
        ChirType::func(vec![], ChirType::Unit)
    }

    #[test]
    fn users_scan_bodies_and_initializers() {
        let mut m = Module::new("app");
        let mut caller = Function::new("caller", unit_fn_ty());
        caller.blocks.push(BasicBlock {
            label: "entry".into(),
            insts: vec![Instruction::apply("callee", vec![])],
        });
        m.add_function(caller);
        m.add_function(Function::new("callee", unit_fn_ty()));
        let mut g = GlobalVar::new("g", ChirType::Bool);
        g.init = Some(Value::Symbol("callee".into()));
        m.add_global(g);

        let mut users = m.users_of("callee");
        users.sort();
        assert_eq!(users, vec!["caller".to_string(), "g".to_string()]);
        assert!(m.users_of("caller").is_empty());
    }

    #[test]
    fn rename_moves_symbol() {
        let mut m = Module::new("app");
        m.add_function(Function::new("f", unit_fn_ty()));
        m.rename_symbol("f", "f.useless");
        assert!(!m.has_symbol("f"));
        assert!(m.has_symbol("f.useless"));
        assert_eq!(m.functions["f.useless"].name, "f.useless");
    }

    #[test]
    fn module_container_roundtrip() {
        let mut m = Module::new("app");
        m.add_function(Function::new("f", unit_fn_ty()));
        m.named_metadata.insert(MD_FUNCTIONS.into(), vec!["f".into()]);
        let bytes = serialize_module(&m).unwrap();
        assert_eq!(deserialize_module(&bytes).unwrap(), m);
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(deserialize_module(&bad), Err(CacheError::InvalidMagic)));
    }

    #[test]
    fn file_init_names_recognised() {
        assert!(is_file_init_func("file$init$main.vesta"));
        assert!(!is_file_init_func("main"));
    }
}
