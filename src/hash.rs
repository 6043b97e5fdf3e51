//! Declaration fingerprints.
//!
//! Three orthogonal 64-bit hashes per declaration (signature, source-use,
//! body) plus layout and virtual-order hashes for types. Each hash is
//! SipHash-2-4 over a canonical byte stream; combination of already-computed
//! fingerprints uses a two-round add-shift mixer. Every traversal feeding a
//! hash is position-free and sorted by raw mangled name or gvid, never by map
//! iteration order, so fingerprints are identical across processes and across
//! line moves.

use crate::ast::{Decl, DeclKind, Expr, Literal, Package, TypeNode};
use crate::cache::{
    AstCache, DeclFingerprint, Fingerprint, MemberFingerprint, TopLevelFingerprint,
};
use crate::mangle::truncate_extend;

// Fixed SipHash keys: fingerprints must agree across processes and builds,
// so the keys are part of the cache format.
const SIP_KEY0: u64 = 0xdead_beef;
const SIP_KEY1: u64 = 0x1234_5678;

/// Combine an accumulated fingerprint with the next child's value.
pub fn mix(acc: Fingerprint, value: Fingerprint) -> Fingerprint {
    acc ^ (value
        .wrapping_add(0x9e37_79b9)
        .wrapping_add(acc << 6)
        .wrapping_add(acc >> 2))
}

fn sip_round(v: &mut [u64; 4]) {
    v[0] = v[0].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(13);
    v[1] ^= v[0];
    v[0] = v[0].rotate_left(32);
    v[2] = v[2].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(16);
    v[3] ^= v[2];
    v[0] = v[0].wrapping_add(v[3]);
    v[3] = v[3].rotate_left(21);
    v[3] ^= v[0];
    v[2] = v[2].wrapping_add(v[1]);
    v[1] = v[1].rotate_left(17);
    v[1] ^= v[2];
    v[2] = v[2].rotate_left(32);
}

/// SipHash-2-4 over a byte stream: two compression rounds per 64-bit
/// little-endian word, four finalisation rounds, a zero-padded tail word.
pub fn siphash_2_4(data: &[u8]) -> u64 {
    let mut v = [
        SIP_KEY0 ^ 0x736f_6d65_7073_6575,
        SIP_KEY1 ^ 0x646f_7261_6e64_6f6d,
        SIP_KEY0 ^ 0x6c79_6765_6e65_7261,
        SIP_KEY1 ^ 0x7465_6462_7974_6573,
    ];
    let mut chunks = data.chunks_exact(8);
    for chunk in chunks.by_ref() {
        let word = u64::from_le_bytes(chunk.try_into().unwrap());
        v[3] ^= word;
        sip_round(&mut v);
        sip_round(&mut v);
        v[0] ^= word;
    }
    let rem = chunks.remainder();
    if !rem.is_empty() {
        let mut tail = [0u8; 8];
        tail[..rem.len()].copy_from_slice(rem);
        let word = u64::from_le_bytes(tail);
        v[3] ^= word;
        sip_round(&mut v);
        sip_round(&mut v);
        v[0] ^= word;
    }
    v[2] ^= 0xff;
    for _ in 0..4 {
        sip_round(&mut v);
    }
    v[0] ^ v[1] ^ v[2] ^ v[3]
}

/// Canonical byte-stream writer feeding one SipHash-2-4 digest.
struct HashWriter {
    buf: Vec<u8>,
}

impl HashWriter {
    fn new() -> Self {
        Self { buf: Vec::new() }
    }

    fn tag(&mut self, tag: u8) {
        self.buf.push(tag);
    }

    fn str(&mut self, s: &str) {
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
    }

    fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn bool(&mut self, v: bool) {
        self.buf.push(v as u8);
    }

    fn finish(self) -> Fingerprint {
        siphash_2_4(&self.buf)
    }
}

// Node tags of the expression stream. Only the shape matters; values are
// arbitrary but frozen, because changing one invalidates every cache.
mod tags {
    pub const LIT_INT: u8 = 1;
    pub const LIT_FLOAT: u8 = 2;
    pub const LIT_BOOL: u8 = 3;
    pub const LIT_STR: u8 = 4;
    pub const LIT_UNIT: u8 = 5;
    pub const NAME: u8 = 6;
    pub const MEMBER: u8 = 7;
    pub const PACKAGE_REF: u8 = 8;
    pub const CALL: u8 = 9;
    pub const BINARY: u8 = 10;
    pub const BOXED: u8 = 11;
    pub const BLOCK: u8 = 12;
    pub const IF: u8 = 13;
    pub const WHILE: u8 = 14;
    pub const ASSIGN: u8 = 15;
    pub const RETURN: u8 = 16;
    pub const LET: u8 = 17;
    pub const LAMBDA: u8 = 18;
    pub const END: u8 = 19;
    pub const NONE: u8 = 20;
}

fn write_expr(w: &mut HashWriter, expr: &Expr) {
    match expr {
        Expr::Lit(Literal::Int(v)) => {
            w.tag(tags::LIT_INT);
            w.u64(*v as u64);
        }
        Expr::Lit(Literal::Float(v)) => {
            w.tag(tags::LIT_FLOAT);
            w.u64(v.to_bits());
        }
        Expr::Lit(Literal::Bool(v)) => {
            w.tag(tags::LIT_BOOL);
            w.bool(*v);
        }
        Expr::Lit(Literal::Str(s)) => {
            w.tag(tags::LIT_STR);
            w.str(s);
        }
        Expr::Lit(Literal::Unit) => w.tag(tags::LIT_UNIT),
        Expr::Name(n) => {
            w.tag(tags::NAME);
            w.str(&n.name);
        }
        Expr::Member { base, name, .. } => {
            w.tag(tags::MEMBER);
            write_expr(w, base);
            w.str(name);
        }
        Expr::PackageRef { package, name, .. } => {
            w.tag(tags::PACKAGE_REF);
            w.str(package);
            w.str(name);
        }
        Expr::Call { callee, args } => {
            w.tag(tags::CALL);
            write_expr(w, callee);
            for a in args {
                write_expr(w, a);
            }
            w.tag(tags::END);
        }
        Expr::Binary { op, lhs, rhs } => {
            w.tag(tags::BINARY);
            w.tag(*op as u8);
            write_expr(w, lhs);
            write_expr(w, rhs);
        }
        Expr::Boxed { value, boxed } => {
            w.tag(tags::BOXED);
            write_expr(w, value);
            w.str(&boxed.render());
        }
        Expr::Block(stmts) => {
            w.tag(tags::BLOCK);
            for s in stmts {
                write_expr(w, s);
            }
            w.tag(tags::END);
        }
        Expr::If { cond, then_branch, else_branch } => {
            w.tag(tags::IF);
            write_expr(w, cond);
            write_expr(w, then_branch);
            match else_branch {
                Some(e) => write_expr(w, e),
                None => w.tag(tags::NONE),
            }
        }
        Expr::While { cond, body } => {
            w.tag(tags::WHILE);
            write_expr(w, cond);
            write_expr(w, body);
        }
        Expr::Assign { place, value } => {
            w.tag(tags::ASSIGN);
            write_expr(w, place);
            write_expr(w, value);
        }
        Expr::Return(value) => {
            w.tag(tags::RETURN);
            match value {
                Some(e) => write_expr(w, e),
                None => w.tag(tags::NONE),
            }
        }
        Expr::Let { name, ty, init } => {
            w.tag(tags::LET);
            w.str(name);
            match ty {
                Some(t) => w.str(&t.render()),
                None => w.tag(tags::NONE),
            }
            write_expr(w, init);
        }
        Expr::Lambda { params, body } => {
            w.tag(tags::LAMBDA);
            for p in params {
                w.str(p);
            }
            w.tag(tags::END);
            write_expr(w, body);
        }
    }
}

fn write_type_opt(w: &mut HashWriter, ty: Option<&TypeNode>) {
    match ty {
        Some(t) => w.str(&t.render()),
        None => w.tag(tags::NONE),
    }
}

/// Sorted non-debug annotation renders, so spelling order is irrelevant.
fn sorted_annotations(decl: &Decl) -> Vec<String> {
    let mut annos: Vec<String> = decl
        .annotations
        .iter()
        .filter(|a| !a.debug_only)
        .map(|a| a.render())
        .collect();
    annos.sort_unstable();
    annos
}

fn write_generics(w: &mut HashWriter, decl: &Decl) {
    for g in &decl.generic_params {
        w.str(&g.name);
        for b in &g.bounds {
            w.str(&b.render());
        }
        w.tag(tags::END);
    }
    w.tag(tags::END);
}

/// Signature hash: the API surface of a declaration. Parameter names are part
/// of the API because arguments can be passed by name.
pub fn sig_hash(decl: &Decl) -> Fingerprint {
    let mut w = HashWriter::new();
    w.tag(decl.ast_kind() as u8);
    w.str(&decl.identifier);
    write_generics(&mut w, decl);
    let m = &decl.modifiers;
    w.bool(m.public);
    w.bool(m.open);
    w.bool(m.abstract_);
    w.bool(m.static_);
    match &decl.kind {
        DeclKind::Func(f) => {
            w.bool(f.sig.this_mut);
            w.bool(f.sig.variadic);
            for p in &f.sig.params {
                w.str(&p.name);
                w.str(&p.ty.render());
                w.bool(p.default_fn.is_some());
            }
            w.tag(tags::END);
            write_type_opt(&mut w, f.sig.ret.as_ref());
        }
        DeclKind::Var(v) => {
            write_type_opt(&mut w, v.ty.as_ref());
        }
        DeclKind::Prop(p) => {
            w.str(&p.ty.render());
        }
        DeclKind::Class(_) | DeclKind::Struct(_) | DeclKind::Interface(_) | DeclKind::Enum(_)
        | DeclKind::Extend(_) => {
            // inheritance list, generic constraints and annotations are all
            // signature-level for a type
            for ty in decl.inherited_types() {
                w.str(&ty.render());
            }
            w.tag(tags::END);
            if let DeclKind::Extend(e) = &decl.kind {
                w.str(&e.target.render());
            }
            for a in sorted_annotations(decl) {
                w.str(&a);
            }
            w.tag(tags::END);
        }
        DeclKind::TypeAlias(a) => {
            w.str(&a.target.render());
        }
        DeclKind::VarWithPattern(_) => {}
    }
    w.finish()
}

/// Source-use hash: traits that can propagate through inlining: const and
/// inline-ness, linkage-affecting attributes, and every non-debug annotation.
pub fn src_use_hash(decl: &Decl) -> Fingerprint {
    let mut w = HashWriter::new();
    let m = &decl.modifiers;
    w.bool(m.const_);
    w.bool(m.inline);
    w.bool(m.frozen);
    w.bool(m.foreign);
    w.bool(m.public);
    for a in sorted_annotations(decl) {
        w.str(&a);
    }
    w.tag(tags::END);
    w.finish()
}

/// Body hash: the full sub-tree of the body, never positions. For an imported
/// declaration that cannot be inlined the body is invisible downstream, so the
/// hash is zero.
pub fn body_hash(decl: &Decl, hash_annotations: bool) -> Fingerprint {
    if decl.is_imported() && !decl.is_inlinable_imported() {
        return 0;
    }
    let mut w = HashWriter::new();
    if hash_annotations {
        for a in sorted_annotations(decl) {
            w.str(&a);
        }
    }
    w.tag(tags::END);
    match &decl.kind {
        DeclKind::Func(f) => match &f.body {
            Some(body) => write_expr(&mut w, body),
            None => w.tag(tags::NONE),
        },
        DeclKind::Var(v) => match &v.init {
            Some(init) => write_expr(&mut w, init),
            None => w.tag(tags::NONE),
        },
        DeclKind::VarWithPattern(vp) => write_expr(&mut w, &vp.init),
        DeclKind::Class(_) | DeclKind::Struct(_) | DeclKind::Interface(_) | DeclKind::Enum(_)
        | DeclKind::Extend(_) => {
            // for a type the body axis records accessibility and constraints
            w.bool(decl.modifiers.public);
            for g in &decl.generic_params {
                for b in &g.bounds {
                    w.str(&b.render());
                }
            }
        }
        DeclKind::Prop(_) | DeclKind::TypeAlias(_) => {}
    }
    w.finish()
}

/// Layout hash of a type: every non-static instance variable's name, declared
/// type and position, in member order.
pub fn inst_var_hash(pkg: &Package, decl: &Decl) -> Fingerprint {
    let mut acc: Fingerprint = 0;
    for &member_id in decl.member_ids() {
        let member = pkg.decl(member_id);
        if member.modifiers.static_ {
            continue;
        }
        if let DeclKind::Var(v) = &member.kind {
            let mut w = HashWriter::new();
            w.str(&member.identifier);
            write_type_opt(&mut w, v.ty.as_ref());
            acc = mix(acc, w.finish());
        }
    }
    acc
}

/// Virtual-member order hash of a type: each virtual member's identifier and
/// signature hash folded in member order, so reordering virtual members or
/// changing one slot's signature shifts the vtable shape.
pub fn virt_hash(pkg: &Package, decl: &Decl) -> Fingerprint {
    let mut acc: Fingerprint = 0;
    for &member_id in decl.member_ids() {
        let member = pkg.decl(member_id);
        if member.is_virtual() {
            let mut w = HashWriter::new();
            w.str(&member.identifier);
            w.u64(sig_hash(member));
            acc = mix(acc, w.finish());
        }
    }
    acc
}

/// Hash of the package clause and import specs.
pub fn specs_hash(pkg: &Package) -> Fingerprint {
    let mut w = HashWriter::new();
    w.str(&pkg.name);
    let mut specs: Vec<String> = pkg.imports.iter().map(|s| s.render()).collect();
    specs.sort_unstable();
    for s in specs {
        w.str(&s);
    }
    w.finish()
}

/// Verbatim, order-sensitive comparison of compile-argument vectors.
pub fn compile_args_changed(prev: &[String], cur: &[String]) -> bool {
    prev != cur
}

fn decl_fingerprint(pkg: &Package, decl: &Decl) -> DeclFingerprint {
    let mut fp = DeclFingerprint::new(decl.ast_kind());
    fp.sig_hash = sig_hash(decl);
    fp.src_use_hash = src_use_hash(decl);
    fp.body_hash = body_hash(decl, true);
    fp.is_order_sensitive = decl.is_order_sensitive();
    fp.gvid = decl.gvid.clone();
    fp.cg_mangle = decl.cg_mangle.clone();
    for &member_id in decl.member_ids() {
        let member = pkg.decl(member_id);
        if member.raw_mangle.is_empty() {
            continue;
        }
        fp.members.push(MemberFingerprint {
            raw_mangle: member.raw_mangle.clone(),
            fp: decl_fingerprint(pkg, member),
        });
    }
    fp
}

/// Compute the fingerprint table of every current-package top-level
/// declaration. Imported decls are fingerprinted separately, per upstream
/// package. Requires raw mangled names to be assigned.
pub fn compute_ast_cache(pkg: &Package) -> AstCache {
    let mut cache = AstCache::new();
    for &id in pkg.top_levels() {
        let decl = pkg.decl(id);
        if decl.raw_mangle.is_empty() || decl.is_imported() {
            continue;
        }
        let mut record = TopLevelFingerprint::new(decl_fingerprint(pkg, decl));
        if decl.is_type_decl() {
            // extends and interfaces have no instance layout of their own
            if !matches!(decl.kind, DeclKind::Extend(_) | DeclKind::Interface(_)) {
                record.inst_var_hash = inst_var_hash(pkg, decl);
            }
            record.virt_hash = virt_hash(pkg, decl);
        }
        cache.insert(decl.raw_mangle.clone(), record);
    }
    // attach each extend to the record of the type it extends
    let extend_links: Vec<(String, String)> = cache
        .keys()
        .filter_map(|mangle| {
            truncate_extend(mangle).map(|target| (target.to_string(), mangle.clone()))
        })
        .collect();
    for (target, extend) in extend_links {
        if let Some(record) = cache.get_mut(&target) {
            record.extends.push(extend);
        }
    }
    cache
}

/// Fingerprint every imported top-level declaration visible in the tree,
/// grouped by upstream package name.
pub fn compute_imported_ast_caches(
    pkg: &Package,
) -> std::collections::BTreeMap<String, AstCache> {
    let mut caches: std::collections::BTreeMap<String, AstCache> =
        std::collections::BTreeMap::new();
    for &id in pkg.top_levels() {
        let decl = pkg.decl(id);
        if decl.raw_mangle.is_empty() || !decl.is_imported() {
            continue;
        }
        let mut record = TopLevelFingerprint::new(decl_fingerprint(pkg, decl));
        if decl.is_type_decl() {
            if !matches!(decl.kind, DeclKind::Extend(_) | DeclKind::Interface(_)) {
                record.inst_var_hash = inst_var_hash(pkg, decl);
            }
            record.virt_hash = virt_hash(pkg, decl);
        }
        caches
            .entry(decl.package.clone())
            .or_default()
            .insert(decl.raw_mangle.clone(), record);
    }
    caches
}
