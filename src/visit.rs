//! Declaration-tree walker.
//!
//! A single read-only visitor over a frozen `Package`, used by the hasher and
//! the semantic-usage collector. Each hook returns a `VisitAction` deciding
//! whether the walk descends, skips the node's children, or stops outright;
//! the walk itself is deterministic and re-entrant.

use crate::ast::{Decl, DeclKind, Expr, Package};

/// Outcome of a visitor hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    WalkChildren,
    SkipChildren,
    Stop,
}

pub trait Visitor {
    fn visit_decl(&mut self, _pkg: &Package, _decl: &Decl) -> VisitAction {
        VisitAction::WalkChildren
    }

    fn visit_expr(&mut self, _pkg: &Package, _expr: &Expr) -> VisitAction {
        VisitAction::WalkChildren
    }
}

/// Walk one declaration: the decl hook first, then members, then bodies.
/// Returns `false` when the visitor requested a stop.
pub fn walk_decl<V: Visitor>(v: &mut V, pkg: &Package, decl: &Decl) -> bool {
    match v.visit_decl(pkg, decl) {
        VisitAction::Stop => return false,
        VisitAction::SkipChildren => return true,
        VisitAction::WalkChildren => {}
    }
    for &member in decl.member_ids() {
        if !walk_decl(v, pkg, pkg.decl(member)) {
            return false;
        }
    }
    match &decl.kind {
        DeclKind::Func(f) => {
            if let Some(body) = &f.body {
                if !walk_expr(v, pkg, body) {
                    return false;
                }
            }
        }
        DeclKind::Var(var) => {
            if let Some(init) = &var.init {
                if !walk_expr(v, pkg, init) {
                    return false;
                }
            }
        }
        DeclKind::VarWithPattern(vp) => {
            if !walk_expr(v, pkg, &vp.init) {
                return false;
            }
        }
        DeclKind::Prop(p) => {
            for &acc in p.getters.iter().chain(p.setters.iter()) {
                if !walk_decl(v, pkg, pkg.decl(acc)) {
                    return false;
                }
            }
        }
        _ => {}
    }
    true
}

/// Walk an expression subtree. Returns `false` when the visitor requested a stop.
pub fn walk_expr<V: Visitor>(v: &mut V, pkg: &Package, expr: &Expr) -> bool {
    match v.visit_expr(pkg, expr) {
        VisitAction::Stop => return false,
        VisitAction::SkipChildren => return true,
        VisitAction::WalkChildren => {}
    }
    match expr {
        Expr::Lit(_) | Expr::Name(_) => true,
        Expr::Member { base, .. } => walk_expr(v, pkg, base),
        Expr::PackageRef { .. } => true,
        Expr::Call { callee, args } => {
            walk_expr(v, pkg, callee) && args.iter().all(|a| walk_expr(v, pkg, a))
        }
        Expr::Binary { lhs, rhs, .. } => walk_expr(v, pkg, lhs) && walk_expr(v, pkg, rhs),
        Expr::Boxed { value, .. } => walk_expr(v, pkg, value),
        Expr::Block(stmts) => stmts.iter().all(|s| walk_expr(v, pkg, s)),
        Expr::If { cond, then_branch, else_branch } => {
            walk_expr(v, pkg, cond)
                && walk_expr(v, pkg, then_branch)
                && else_branch.as_deref().is_none_or(|e| walk_expr(v, pkg, e))
        }
        Expr::While { cond, body } => walk_expr(v, pkg, cond) && walk_expr(v, pkg, body),
        Expr::Assign { place, value } => walk_expr(v, pkg, place) && walk_expr(v, pkg, value),
        Expr::Return(value) => value.as_deref().is_none_or(|e| walk_expr(v, pkg, e)),
        Expr::Let { init, .. } => walk_expr(v, pkg, init),
        Expr::Lambda { body, .. } => walk_expr(v, pkg, body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{Decl, FuncDecl, NameRef, Package};

    struct NameCounter {
        names: Vec<String>,
        stop_at: Option<usize>,
    }

    impl Visitor for NameCounter {
        fn visit_expr(&mut self, _pkg: &Package, expr: &Expr) -> VisitAction {
            if let Expr::Name(n) = expr {
                self.names.push(n.name.clone());
                if Some(self.names.len()) == self.stop_at {
                    return VisitAction::Stop;
                }
            }
            VisitAction::WalkChildren
        }
    }

    fn body_with_names() -> Expr {
        Expr::Block(vec![
            Expr::Call {
                callee: Box::new(Expr::Name(NameRef::unresolved("f"))),
                args: vec![Expr::Name(NameRef::unresolved("x"))],
            },
            Expr::Return(Some(Box::new(Expr::Name(NameRef::unresolved("y"))))),
        ])
    }

    #[test]
    fn walk_collects_all_names() {
        let mut pkg = Package::new("app");
        let mut func = FuncDecl::default();
        func.body = Some(body_with_names());
        let id = pkg.insert_top_level(Decl::new("main", "app", DeclKind::Func(func)));
        let mut counter = NameCounter { names: Vec::new(), stop_at: None };
        assert!(walk_decl(&mut counter, &pkg, pkg.decl(id)));
        assert_eq!(counter.names, vec!["f", "x", "y"]);
    }

    #[test]
    fn stop_aborts_walk() {
        let mut pkg = Package::new("app");
        let mut func = FuncDecl::default();
        func.body = Some(body_with_names());
        let id = pkg.insert_top_level(Decl::new("main", "app", DeclKind::Func(func)));
        let mut counter = NameCounter { names: Vec::new(), stop_at: Some(2) };
        assert!(!walk_decl(&mut counter, &pkg, pkg.decl(id)));
        assert_eq!(counter.names.len(), 2);
    }
}
