//! The typed intermediate representation surface the incremental core
//! contracts with: user-defined type definitions with deterministic vtables,
//! wrapper generation, devirtualisation, and the linkable module form that IR
//! merge operates on.

pub mod def;
pub mod devirt;
pub mod module;
pub mod types;
pub mod vtable;
pub mod wrap;

pub use def::{ChirBuilder, ChirFunc, CustomTypeDef, DefId, DefKind, FuncAttrs, FuncId, VTable, VirtualFuncInfo};
pub use devirt::{Devirtualization, DevirtRewrite, InvokeSite};
pub use module::{Function, GlobalVar, Linkage, Module};
pub use types::{ChirType, wildcard_eq};
pub use vtable::{generate_vtable, update_operator_vtable};
pub use wrap::{VirtualFuncWrapper, wrap_mut_funcs};
