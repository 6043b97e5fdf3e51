//! The elaborated declaration tree consumed by the incremental core.
//!
//! The surrounding compiler parses, binds and type-checks a package, then hands
//! this crate a frozen `Package`: declarations in a slotted table addressed by
//! `DeclId`, bodies as a compact expression tree carrying the resolution facts
//! (target mangles, candidate parents, package qualifiers, box sites) that the
//! usage collector and the hasher need. Ids are ephemeral: they are minted
//! fresh every elaboration and never cross builds; the only stable identity is
//! the raw mangled name.

use std::collections::HashMap;

use uuid::Uuid;

use crate::span::{Gvid, Span};

/// Canonical external name of a declaration; primary key of cache, graph and IR.
pub type RawMangledName = String;

/// Map from raw mangled name to the declaration it denotes in the current tree.
pub type RawMangled2DeclMap = HashMap<RawMangledName, DeclId>;

/// Ephemeral per-elaboration identity of a declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeclId(Uuid);

impl DeclId {
    pub fn fresh() -> Self {
        Self(Uuid::new_v4())
    }
}

/// Discriminator stored in fingerprints; changing the kind of a declaration is
/// always a signature-level change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub enum AstKind {
    Func,
    Var,
    VarWithPattern,
    Prop,
    Class,
    Struct,
    Interface,
    Enum,
    Extend,
    TypeAlias,
}

impl AstKind {
    pub fn is_type(self) -> bool {
        matches!(
            self,
            AstKind::Class | AstKind::Struct | AstKind::Interface | AstKind::Enum | AstKind::Extend
        )
    }
}

/// Source-visible modifiers. Which of these land in which fingerprint axis is
/// the hasher's business; the tree just records them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub public: bool,
    pub open: bool,
    pub abstract_: bool,
    pub static_: bool,
    pub const_: bool,
    pub inline: bool,
    pub frozen: bool,
    pub foreign: bool,
    /// Declaration comes from an upstream package.
    pub imported: bool,
}

/// An annotation attached to a declaration. `debug_only` marks annotations that
/// carry nothing but debug locations and therefore stay out of every hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub name: String,
    pub args: Vec<String>,
    pub debug_only: bool,
}

impl Annotation {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), args: Vec::new(), debug_only: false }
    }

    pub fn render(&self) -> String {
        if self.args.is_empty() {
            format!("@{}", self.name)
        } else {
            format!("@{}({})", self.name, self.args.join(","))
        }
    }
}

/// A generic parameter with its (rendered) bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericParam {
    pub name: String,
    pub bounds: Vec<TypeNode>,
}

/// Types as they appear in the elaborated tree. `render` produces the canonical
/// spelling used by both the mangler and the hasher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeNode {
    Primitive(String),
    Named { package: Option<String>, identifier: String, args: Vec<TypeNode> },
    Func { params: Vec<TypeNode>, ret: Box<TypeNode> },
    Tuple(Vec<TypeNode>),
    This,
}

impl TypeNode {
    pub fn named(identifier: impl Into<String>) -> Self {
        TypeNode::Named { package: None, identifier: identifier.into(), args: Vec::new() }
    }

    pub fn primitive(name: impl Into<String>) -> Self {
        TypeNode::Primitive(name.into())
    }

    /// The identifier a usage of this type resolves through, when it has one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            TypeNode::Primitive(name) => Some(name),
            TypeNode::Named { identifier, .. } => Some(identifier),
            _ => None,
        }
    }

    pub fn render(&self) -> String {
        match self {
            TypeNode::Primitive(name) => name.clone(),
            TypeNode::Named { package, identifier, args } => {
                let mut s = String::new();
                if let Some(p) = package {
                    s.push_str(p);
                    s.push('.');
                }
                s.push_str(identifier);
                if !args.is_empty() {
                    s.push('<');
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            s.push(',');
                        }
                        s.push_str(&a.render());
                    }
                    s.push('>');
                }
                s
            }
            TypeNode::Func { params, ret } => {
                let ps: Vec<String> = params.iter().map(TypeNode::render).collect();
                format!("({})->{}", ps.join(","), ret.render())
            }
            TypeNode::Tuple(elems) => {
                let ps: Vec<String> = elems.iter().map(TypeNode::render).collect();
                format!("({})", ps.join(","))
            }
            TypeNode::This => "This".to_string(),
        }
    }
}

/// An unqualified name reference carrying its elaborated resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameRef {
    pub name: String,
    /// Raw mangled name of the unique resolution target when the binder found one.
    pub target: Option<RawMangledName>,
    /// Whether the resolved target lives in an imported package.
    pub imported: bool,
}

impl NameRef {
    pub fn unresolved(name: impl Into<String>) -> Self {
        Self { name: name.into(), target: None, imported: false }
    }

    pub fn resolved(name: impl Into<String>, target: impl Into<RawMangledName>) -> Self {
        Self { name: name.into(), target: Some(target.into()), imported: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Eq,
    Lt,
    Gt,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Unit,
}

/// Compact expression tree for declaration bodies. Rich enough for hashing and
/// usage collection; everything execution-shaped lives in CHIR.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Lit(Literal),
    /// Unqualified reference: `f` in `f()`, `a` in `return a`.
    Name(NameRef),
    /// Member access right of `.` where the left side is a value or type name.
    /// `parents` lists the candidate parent types the checker considered.
    Member {
        base: Box<Expr>,
        name: String,
        parents: Vec<RawMangledName>,
        target: Option<RawMangledName>,
    },
    /// Package-qualified reference: `p1.p2.f`.
    PackageRef {
        package: String,
        name: String,
        target: Option<RawMangledName>,
    },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
    /// A value-type payload wrapped into a reference-shaped container to
    /// satisfy an interface; `boxed` is the payload type.
    Boxed { value: Box<Expr>, boxed: TypeNode },
    Block(Vec<Expr>),
    If { cond: Box<Expr>, then_branch: Box<Expr>, else_branch: Option<Box<Expr>> },
    While { cond: Box<Expr>, body: Box<Expr> },
    Assign { place: Box<Expr>, value: Box<Expr> },
    Return(Option<Box<Expr>>),
    Let { name: String, ty: Option<TypeNode>, init: Box<Expr> },
    Lambda { params: Vec<String>, body: Box<Expr> },
}

/// A function parameter after desugar. A defaulted parameter owns the id of the
/// synthesised default-value function.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncParam {
    pub name: String,
    pub ty: TypeNode,
    pub default_fn: Option<DeclId>,
    /// Primary-constructor parameter that doubles as a member variable.
    pub is_member_param: bool,
}

impl FuncParam {
    pub fn new(name: impl Into<String>, ty: TypeNode) -> Self {
        Self { name: name.into(), ty, default_fn: None, is_member_param: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncSig {
    pub params: Vec<FuncParam>,
    pub variadic: bool,
    /// Explicit return type; `None` means the checker inferred it, so a body
    /// change may change the signature.
    pub ret: Option<TypeNode>,
    /// Mutability of the receiver for methods.
    pub this_mut: bool,
}

impl Default for FuncSig {
    fn default() -> Self {
        Self { params: Vec::new(), variadic: false, ret: None, this_mut: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncDecl {
    pub sig: FuncSig,
    pub body: Option<Expr>,
    pub is_constructor: bool,
    pub is_primary_constructor: bool,
    pub is_enum_constructor: bool,
    /// Operator function desugared from an operator definition.
    pub is_operator: bool,
}

impl Default for FuncDecl {
    fn default() -> Self {
        Self {
            sig: FuncSig::default(),
            body: None,
            is_constructor: false,
            is_primary_constructor: false,
            is_enum_constructor: false,
            is_operator: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub ty: Option<TypeNode>,
    pub init: Option<Expr>,
}

/// `let (a, b) = f()`: the bound variables are separate `Var` decls listed in
/// `elements`; the pattern decl owns the shared initializer.
#[derive(Debug, Clone, PartialEq)]
pub struct VarWithPatternDecl {
    pub elements: Vec<DeclId>,
    pub init: Expr,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropDecl {
    pub ty: TypeNode,
    pub getters: Vec<DeclId>,
    pub setters: Vec<DeclId>,
}

/// Body shared by class, struct, interface and enum declarations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TypeBody {
    pub inherited: Vec<TypeNode>,
    pub members: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtendDecl {
    pub target: TypeNode,
    pub interfaces: Vec<TypeNode>,
    pub members: Vec<DeclId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAliasDecl {
    pub target: TypeNode,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeclKind {
    Func(FuncDecl),
    Var(VarDecl),
    VarWithPattern(VarWithPatternDecl),
    Prop(PropDecl),
    Class(TypeBody),
    Struct(TypeBody),
    Interface(TypeBody),
    Enum(TypeBody),
    Extend(ExtendDecl),
    TypeAlias(TypeAliasDecl),
}

impl DeclKind {
    pub fn ast_kind(&self) -> AstKind {
        match self {
            DeclKind::Func(_) => AstKind::Func,
            DeclKind::Var(_) => AstKind::Var,
            DeclKind::VarWithPattern(_) => AstKind::VarWithPattern,
            DeclKind::Prop(_) => AstKind::Prop,
            DeclKind::Class(_) => AstKind::Class,
            DeclKind::Struct(_) => AstKind::Struct,
            DeclKind::Interface(_) => AstKind::Interface,
            DeclKind::Enum(_) => AstKind::Enum,
            DeclKind::Extend(_) => AstKind::Extend,
            DeclKind::TypeAlias(_) => AstKind::TypeAlias,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decl {
    pub id: DeclId,
    pub identifier: String,
    pub package: String,
    pub raw_mangle: RawMangledName,
    /// Mangled name the code generator uses for this decl, cached so deletions
    /// can reach the IR without re-mangling.
    pub cg_mangle: String,
    pub outer: Option<DeclId>,
    pub gvid: Gvid,
    pub span: Span,
    pub modifiers: Modifiers,
    pub annotations: Vec<Annotation>,
    pub generic_params: Vec<GenericParam>,
    pub kind: DeclKind,
}

impl Decl {
    pub fn new(identifier: impl Into<String>, package: impl Into<String>, kind: DeclKind) -> Self {
        Self {
            id: DeclId::fresh(),
            identifier: identifier.into(),
            package: package.into(),
            raw_mangle: String::new(),
            cg_mangle: String::new(),
            outer: None,
            gvid: Gvid::default(),
            span: Span::dummy(),
            modifiers: Modifiers::default(),
            annotations: Vec::new(),
            generic_params: Vec::new(),
            kind,
        }
    }

    pub fn ast_kind(&self) -> AstKind {
        self.kind.ast_kind()
    }

    pub fn is_type_decl(&self) -> bool {
        self.ast_kind().is_type()
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    pub fn is_imported(&self) -> bool {
        self.modifiers.imported
    }

    /// Direct member ids, in declaration order.
    pub fn member_ids(&self) -> &[DeclId] {
        match &self.kind {
            DeclKind::Class(b) | DeclKind::Struct(b) | DeclKind::Interface(b) | DeclKind::Enum(b) => {
                &b.members
            }
            DeclKind::Extend(e) => &e.members,
            DeclKind::VarWithPattern(v) => &v.elements,
            _ => &[],
        }
    }

    /// Types this decl inherits from or (for extends) implements.
    pub fn inherited_types(&self) -> &[TypeNode] {
        match &self.kind {
            DeclKind::Class(b) | DeclKind::Struct(b) | DeclKind::Interface(b) | DeclKind::Enum(b) => {
                &b.inherited
            }
            DeclKind::Extend(e) => &e.interfaces,
            _ => &[],
        }
    }

    /// Global or static variable (or pattern binding) whose initializer runs in
    /// declaration order, making the relative order observable.
    pub fn is_order_sensitive(&self) -> bool {
        match &self.kind {
            DeclKind::Var(_) | DeclKind::VarWithPattern(_) => {
                self.outer.is_none() || self.modifiers.static_
            }
            _ => false,
        }
    }

    /// A member that participates in dynamic dispatch.
    pub fn is_virtual(&self) -> bool {
        if self.outer.is_none() || self.modifiers.static_ {
            return false;
        }
        match &self.kind {
            DeclKind::Func(f) => {
                !f.is_constructor && (self.modifiers.open || self.modifiers.abstract_)
            }
            DeclKind::Prop(_) => self.modifiers.open || self.modifiers.abstract_,
            _ => false,
        }
    }

    pub fn is_constructor(&self) -> bool {
        matches!(&self.kind, DeclKind::Func(f) if f.is_constructor || f.is_primary_constructor)
    }

    pub fn is_enum_constructor(&self) -> bool {
        matches!(&self.kind, DeclKind::Func(f) if f.is_enum_constructor)
    }

    /// Declaration with an explicit type annotation. Untyped decls promote body
    /// changes to signature changes because the inferred type may shift.
    pub fn is_typed(&self) -> bool {
        match &self.kind {
            DeclKind::Var(v) => v.ty.is_some(),
            DeclKind::VarWithPattern(_) => false,
            DeclKind::Func(f) => f.sig.ret.is_some(),
            _ => true,
        }
    }

    /// Whether an imported declaration can be inlined downstream, which decides
    /// whether its body hash is meaningful (zero otherwise).
    pub fn is_inlinable_imported(&self) -> bool {
        if !self.modifiers.imported {
            return false;
        }
        if self.modifiers.const_ || self.modifiers.inline {
            return true;
        }
        match &self.kind {
            DeclKind::Var(v) => v.init.is_some(),
            DeclKind::Func(f) => f.body.is_some(),
            DeclKind::VarWithPattern(_) => true,
            _ => false,
        }
    }
}

/// One import item of the package clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSpec {
    pub path: String,
    pub item: Option<String>,
    pub alias: Option<String>,
    pub reexport: bool,
}

impl ImportSpec {
    pub fn package(path: impl Into<String>) -> Self {
        Self { path: path.into(), item: None, alias: None, reexport: false }
    }

    pub fn render(&self) -> String {
        let mut s = String::from("import ");
        s.push_str(&self.path);
        if let Some(item) = &self.item {
            s.push('.');
            s.push_str(item);
        }
        if let Some(alias) = &self.alias {
            s.push_str(" as ");
            s.push_str(alias);
        }
        if self.reexport {
            s.push_str(" public");
        }
        s
    }
}

/// A frozen, fully elaborated package.
#[derive(Debug, Default)]
pub struct Package {
    pub name: String,
    pub imports: Vec<ImportSpec>,
    decls: HashMap<DeclId, Decl>,
    /// Top-level declarations in `(file, gvid)` order.
    top_levels: Vec<DeclId>,
}

impl Package {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Default::default() }
    }

    /// Insert a declaration without making it a top-level entry (members,
    /// getters, desugared default functions).
    pub fn insert(&mut self, decl: Decl) -> DeclId {
        let id = decl.id;
        self.decls.insert(id, decl);
        id
    }

    /// Insert a top-level declaration; callers must add decls in source order.
    pub fn insert_top_level(&mut self, decl: Decl) -> DeclId {
        let id = self.insert(decl);
        self.top_levels.push(id);
        id
    }

    pub fn decl(&self, id: DeclId) -> &Decl {
        &self.decls[&id]
    }

    pub fn get(&self, id: DeclId) -> Option<&Decl> {
        self.decls.get(&id)
    }

    pub fn decl_mut(&mut self, id: DeclId) -> &mut Decl {
        self.decls.get_mut(&id).expect("unknown decl id")
    }

    pub fn top_levels(&self) -> &[DeclId] {
        &self.top_levels
    }

    pub fn is_empty(&self) -> bool {
        self.top_levels.is_empty()
    }

    /// All members of a declaration, recursively (property accessors and
    /// pattern-bound variables included), in declaration order.
    pub fn all_members(&self, id: DeclId) -> Vec<DeclId> {
        let mut out = Vec::new();
        self.collect_members(id, &mut out);
        out
    }

    fn collect_members(&self, id: DeclId, out: &mut Vec<DeclId>) {
        let decl = self.decl(id);
        for &m in decl.member_ids() {
            self.collect_members(m, out);
            out.push(m);
        }
        if let DeclKind::Prop(p) = &decl.kind {
            for &g in &p.getters {
                out.push(g);
            }
            for &s in &p.setters {
                out.push(s);
            }
        }
    }

    /// The nearest enclosing top-level declaration, or `id` itself if top-level.
    pub fn top_level_of(&self, id: DeclId) -> DeclId {
        let mut cur = id;
        while let Some(outer) = self.decl(cur).outer {
            cur = outer;
        }
        cur
    }

    /// Build the raw-mangled-name index of every decl that carries one.
    pub fn mangled_map(&self) -> RawMangled2DeclMap {
        let mut map = RawMangled2DeclMap::new();
        for (id, decl) in &self.decls {
            if !decl.raw_mangle.is_empty() {
                map.insert(decl.raw_mangle.clone(), *id);
            }
        }
        map
    }
}
