//! Raw mangled names.
//!
//! Mangling is a total function of a declaration's identity path: package,
//! parent type chain, identifier, parameter-type list and return type. The
//! result is the primary key shared by the cache, the usage graph and the IR,
//! so it must be stable across builds whenever the declaration's source form is
//! unchanged. Identifier segments are length-prefixed so the bare identifier
//! can be recovered from a mangled name without a grammar.

use crate::ast::{Decl, DeclKind, TypeNode};

/// Separator between an extended type's tag and its interface list.
pub const EXTEND_SEPARATOR: &str = "<:";

/// Prefix families for synthetic declarations. Each family owns a disjoint
/// namespace so closure conversion, instantiation and wrapper generation can
/// never collide.
pub const VIRTUAL_WRAPPER_PREFIX: &str = "_WV";
pub const MUTABLE_WRAPPER_PREFIX: &str = "_WM";
pub const FUNC_PREFIX: &str = "_FN";
pub const INSTANTIATE_PREFIX: &str = "_GI";
pub const LAMBDA_PREFIX: &str = "_LB";
pub const OPERATOR_PREFIX: &str = "_OP";
pub const ANNOTATION_FACTORY_PREFIX: &str = "_AF";
pub const CC_GENERIC_BASE_PREFIX: &str = "$Cg";
pub const CC_INSTANTIATED_BASE_PREFIX: &str = "$Ci";
pub const CC_FUNC_IMPL_PREFIX: &str = "$Cf";
pub const CC_LAMBDA_IMPL_PREFIX: &str = "$Cl";
pub const CC_WRAPPER_PREFIX: &str = "$Cw";
pub const CC_ABSTRACT_INST_PREFIX: &str = "$Cai";
pub const CC_ABSTRACT_GENERIC_PREFIX: &str = "$Cag";
pub const CC_ABSTRACT_INSTANTIATED_PREFIX: &str = "$Cav";
pub const CC_GENERIC_PREFIX: &str = "$g";
pub const CC_WRAPPER_GENERIC_OVERRIDE_PREFIX: &str = "$Cwg";
pub const CC_WRAPPER_INST_OVERRIDE_PREFIX: &str = "$Cwi";

/// Mangler for one package.
#[derive(Debug, Clone)]
pub struct Mangler {
    package: String,
}

impl Mangler {
    pub fn new(package: impl Into<String>) -> Self {
        Self { package: package.into() }
    }

    /// Length-prefixed identifier segment: `draw` → `4draw`.
    fn segment(identifier: &str) -> String {
        format!("{}{}", identifier.len(), identifier)
    }

    /// Canonical tag of a type as it appears inside mangled names. Primitives
    /// keep their bare name (they have no owning package); nominal types get a
    /// package-qualified, length-prefixed segment plus generic arguments.
    pub fn type_tag(&self, ty: &TypeNode) -> String {
        match ty {
            TypeNode::Primitive(name) => name.clone(),
            TypeNode::Named { package, identifier, args } => {
                let pkg = package.as_deref().unwrap_or(&self.package);
                let mut tag = format!("{}.{}", pkg, Self::segment(identifier));
                if !args.is_empty() {
                    tag.push('<');
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            tag.push(',');
                        }
                        tag.push_str(&self.type_tag(a));
                    }
                    tag.push('>');
                }
                tag
            }
            other => other.render(),
        }
    }

    /// Mangle an extend of `target_tag` implementing `interfaces`. Interface
    /// tags are sorted so the spelling order in source is irrelevant. A direct
    /// extend (no interfaces) mangles to the bare target tag followed by the
    /// separator, so every direct extend of one type shares one name.
    pub fn mangle_extend(&self, target_tag: &str, interfaces: &[String]) -> String {
        let mut sorted: Vec<&str> = interfaces.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        format!("{}{}{}", target_tag, EXTEND_SEPARATOR, sorted.join("&"))
    }

    /// Mangle a declaration given its parent chain (type tags, outermost
    /// first). Functions append the parameter-type list and the declared return
    /// type so that return-type overloading stays unambiguous after desugar.
    pub fn mangle_decl(&self, parents: &[String], decl: &Decl) -> String {
        match &decl.kind {
            DeclKind::Class(_) | DeclKind::Struct(_) | DeclKind::Interface(_) | DeclKind::Enum(_) => {
                let mut tag = format!("{}.{}", self.package, Self::segment(&decl.identifier));
                if decl.is_generic() {
                    tag.push('<');
                    for (i, g) in decl.generic_params.iter().enumerate() {
                        if i > 0 {
                            tag.push(',');
                        }
                        tag.push_str(&g.name);
                    }
                    tag.push('>');
                }
                tag
            }
            DeclKind::Extend(e) => {
                let target = self.type_tag(&e.target);
                let interfaces: Vec<String> =
                    e.interfaces.iter().map(|i| self.type_tag(i)).collect();
                self.mangle_extend(&target, &interfaces)
            }
            DeclKind::Func(f) => {
                let owner = parents
                    .last()
                    .cloned()
                    .unwrap_or_else(|| self.package.clone());
                let params: Vec<String> =
                    f.sig.params.iter().map(|p| self.type_tag(&p.ty)).collect();
                let mut name = format!(
                    "{}.{}({})",
                    owner,
                    Self::segment(&decl.identifier),
                    params.join(",")
                );
                if f.sig.variadic {
                    name.push_str("...");
                }
                if let Some(ret) = &f.sig.ret {
                    name.push_str("->");
                    name.push_str(&self.type_tag(ret));
                }
                name
            }
            DeclKind::Var(_) | DeclKind::VarWithPattern(_) | DeclKind::Prop(_)
            | DeclKind::TypeAlias(_) => {
                let owner = parents
                    .last()
                    .cloned()
                    .unwrap_or_else(|| self.package.clone());
                format!("{}.{}", owner, Self::segment(&decl.identifier))
            }
        }
    }
}

/// Assign raw mangled names (and the derived codegen names) to every
/// declaration of a package, outermost first. The driver runs this right after
/// elaboration; tests use it to build packages without a compiler around.
pub fn assign_mangles(pkg: &mut crate::ast::Package) {
    let mangler = Mangler::new(pkg.name.clone());
    let tops: Vec<crate::ast::DeclId> = pkg.top_levels().to_vec();
    for id in tops {
        assign_rec(pkg, &mangler, id, &[]);
    }
}

fn assign_rec(
    pkg: &mut crate::ast::Package,
    mangler: &Mangler,
    id: crate::ast::DeclId,
    parents: &[String],
) {
    let decl = pkg.decl(id);
    let mangle = mangler.mangle_decl(parents, decl);
    let is_func = matches!(decl.kind, DeclKind::Func(_));
    // pattern-bound variables mangle as their own top-level names
    let keep_parent_chain = matches!(decl.kind, DeclKind::VarWithPattern(_));
    let mut children: Vec<crate::ast::DeclId> = decl.member_ids().to_vec();
    match &decl.kind {
        DeclKind::Prop(p) => {
            children.extend(p.getters.iter().chain(p.setters.iter()).copied());
        }
        DeclKind::Func(f) => {
            children.extend(f.sig.params.iter().filter_map(|p| p.default_fn));
        }
        _ => {}
    }
    {
        let d = pkg.decl_mut(id);
        d.raw_mangle = mangle.clone();
        d.cg_mangle = if is_func { format!("{FUNC_PREFIX}{mangle}") } else { mangle.clone() };
    }
    let child_parents: Vec<String> = if keep_parent_chain {
        parents.to_vec()
    } else {
        let mut chain = parents.to_vec();
        chain.push(mangle);
        chain
    };
    for child in children {
        assign_rec(pkg, mangler, child, &child_parents);
    }
}

/// Recover the extended-type tag from an extend's mangled name, if it is one.
pub fn truncate_extend(mangled: &str) -> Option<&str> {
    mangled.find(EXTEND_SEPARATOR).map(|pos| &mangled[..pos])
}

/// Recover the bare identifier from a type tag: drop the generic argument
/// suffix, keep everything after the last `.`, then skip the length prefix.
pub fn identifier_of(tag: &str) -> &str {
    let end = tag.find('<').unwrap_or(tag.len());
    let tag = &tag[..end];
    let tail = match tag.rfind('.') {
        Some(pos) => &tag[pos + 1..],
        None => tag,
    };
    let digits = tail.chars().take_while(|c| c.is_ascii_digit()).count();
    &tail[digits..]
}

/// Name of the implicit default constructor of a type.
pub fn default_ctor_name(type_mangle: &str) -> String {
    format!("{type_mangle}<init>")
}

/// Virtual-dispatch wrapper for a raw method, keyed by the sub-definition it
/// is emitted into.
pub fn virtual_wrapper_name(raw_func: &str, sub_def: &str) -> String {
    format!("{VIRTUAL_WRAPPER_PREFIX}{sub_def}::{raw_func}")
}

/// Mutable-receiver wrapper thunk for a struct method reached via interface.
pub fn mutable_wrapper_name(raw_func: &str, sub_def: &str) -> String {
    format!("{MUTABLE_WRAPPER_PREFIX}{sub_def}::{raw_func}")
}

/// A generic declaration instantiated at concrete type arguments.
pub fn instantiate_name(base: &str, type_args: &[String]) -> String {
    format!("{INSTANTIATE_PREFIX}{base}<{}>", type_args.join(","))
}

/// Lambda lifted out of `base`, numbered by the cached lambda counter.
pub fn lambda_name(base: &str, counter: u64) -> String {
    format!("{LAMBDA_PREFIX}{base}${counter}")
}

/// Overflow-split operator slot: one concrete function per strategy.
pub fn overflow_operator_name(op: &str, strategy: &str, operand_ty: &str) -> String {
    format!("{OPERATOR_PREFIX}{op}${strategy}${operand_ty}")
}

/// Factory function synthesised for an annotation declaration.
pub fn annotation_factory_name(annotation: &str) -> String {
    format!("{ANNOTATION_FACTORY_PREFIX}{annotation}")
}

/// Whether a mangled name belongs to one of the compiler-added synthetic
/// families. Cached compiler-added tables can carry entries written by an
/// older compiler; anything outside the known families is ignored rather
/// than deleted.
pub fn is_compiler_added_name(name: &str) -> bool {
    const SYNTHETIC_PREFIXES: &[&str] = &[
        VIRTUAL_WRAPPER_PREFIX,
        MUTABLE_WRAPPER_PREFIX,
        INSTANTIATE_PREFIX,
        LAMBDA_PREFIX,
        OPERATOR_PREFIX,
        ANNOTATION_FACTORY_PREFIX,
        CC_GENERIC_BASE_PREFIX,
        CC_INSTANTIATED_BASE_PREFIX,
        CC_FUNC_IMPL_PREFIX,
        CC_LAMBDA_IMPL_PREFIX,
        CC_WRAPPER_PREFIX,
        CC_ABSTRACT_INST_PREFIX,
        CC_ABSTRACT_GENERIC_PREFIX,
        CC_ABSTRACT_INSTANTIATED_PREFIX,
        CC_GENERIC_PREFIX,
        CC_WRAPPER_GENERIC_OVERRIDE_PREFIX,
        CC_WRAPPER_INST_OVERRIDE_PREFIX,
    ];
    name.ends_with("<init>") || SYNTHETIC_PREFIXES.iter().any(|p| name.starts_with(p))
}
