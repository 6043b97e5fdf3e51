//! Quantified properties of the fingerprint and cache layers.

use proptest::prelude::*;

use vesta_incremental::ast::{Decl, DeclKind, Expr, FuncDecl, Literal, Package, TypeNode, VarDecl};
use vesta_incremental::cache::{CompilationCache, deserialize_cache, serialize_cache};
use vesta_incremental::hash::{body_hash, mix, sig_hash, src_use_hash};
use vesta_incremental::mangle::assign_mangles;
use vesta_incremental::span::{Gvid, Span};

fn ident_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,12}"
}

fn fn_decl(name: &str, value: i64) -> Decl {
    let mut f = FuncDecl::default();
    f.sig.ret = Some(TypeNode::primitive("Int64"));
    f.body = Some(Expr::Lit(Literal::Int(value)));
    Decl::new(name, "app", DeclKind::Func(f))
}

proptest! {
    /// Folding a set of keyed children sorted canonically is independent of
    /// the order the children arrived in.
    #[test]
    fn mix_over_sorted_keys_is_input_order_independent(mut values in prop::collection::vec(any::<u64>(), 0..24)) {
        let mut shuffled = values.clone();
        shuffled.reverse();
        values.sort_unstable();
        shuffled.sort_unstable();
        let fold = |vs: &[u64]| vs.iter().fold(0u64, |acc, &v| mix(acc, v));
        prop_assert_eq!(fold(&values), fold(&shuffled));
    }

    /// Fingerprints are a pure function of the declaration's canonical form.
    #[test]
    fn fingerprints_are_deterministic(name in ident_strategy(), value in any::<i64>()) {
        let a = fn_decl(&name, value);
        let b = fn_decl(&name, value);
        prop_assert_eq!(sig_hash(&a), sig_hash(&b));
        prop_assert_eq!(src_use_hash(&a), src_use_hash(&b));
        prop_assert_eq!(body_hash(&a, true), body_hash(&b, true));
    }

    /// Moving a declaration (span and gvid) never disturbs any axis.
    #[test]
    fn positions_never_enter_fingerprints(
        name in ident_strategy(),
        value in any::<i64>(),
        start in 0usize..10_000,
        index in 0u32..500,
    ) {
        let baseline = fn_decl(&name, value);
        let mut moved = baseline.clone();
        moved.span = Span::new(start, start + 10);
        moved.gvid = Gvid::new("elsewhere.vesta", index);
        prop_assert_eq!(sig_hash(&baseline), sig_hash(&moved));
        prop_assert_eq!(body_hash(&baseline, true), body_hash(&moved, true));
    }

    /// Distinct bodies produce distinct body hashes (no accidental collapse
    /// over the small literal domain).
    #[test]
    fn body_hash_separates_literals(name in ident_strategy(), a in any::<i64>(), b in any::<i64>()) {
        prop_assume!(a != b);
        let da = fn_decl(&name, a);
        let db = fn_decl(&name, b);
        prop_assert_ne!(body_hash(&da, true), body_hash(&db, true));
    }

    /// serialise(deserialise(cache)) == cache, byte for byte, for caches
    /// derived from arbitrary small packages.
    #[test]
    fn cache_roundtrip_is_byte_identity(
        names in prop::collection::btree_set("[a-z]{1,8}", 1..6),
        args in prop::collection::vec("[-a-zA-Z0-9=]{1,12}", 0..4),
    ) {
        let mut pkg = Package::new("app");
        for (i, name) in names.iter().enumerate() {
            let mut d = if i % 2 == 0 {
                fn_decl(name, i as i64)
            } else {
                Decl::new(
                    name.clone(),
                    "app",
                    DeclKind::Var(VarDecl {
                        ty: Some(TypeNode::primitive("Int64")),
                        init: Some(Expr::Lit(Literal::Int(i as i64))),
                    }),
                )
            };
            d.gvid = Gvid::new("main.vesta", i as u32);
            pkg.insert_top_level(d);
        }
        assign_mangles(&mut pkg);

        let mut cache = CompilationCache::default();
        cache.specs_hash = vesta_incremental::hash::specs_hash(&pkg);
        cache.compile_args = args;
        cache.cur_pkg_ast_cache = vesta_incremental::hash::compute_ast_cache(&pkg);
        cache.sema_info = vesta_incremental::collect::collect_semantic_info(&pkg);

        let bytes = serialize_cache(&cache).unwrap();
        let back = deserialize_cache(&bytes).unwrap();
        prop_assert_eq!(&back, &cache);
        prop_assert_eq!(serialize_cache(&back).unwrap(), bytes);
    }
}
