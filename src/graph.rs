//! The pollution map and the type relation map.
//!
//! Both are materialised once per run from the previous build's recorded
//! semantic usages, the current declaration tree, and the import manager's
//! alias tables, and are read-only for the rest of the analysis. All edges
//! are key-to-key references looked up against single owner maps, which is how
//! cyclic type graphs stay walkable without ownership cycles.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::ast::{Decl, DeclId, DeclKind, Package, RawMangled2DeclMap, RawMangledName};
use crate::cache::{SemaRelation, SemanticInfo, UseInfo};
use crate::imports::ImportManager;
use crate::mangle::Mangler;

/// Which side of a declaration a usage appears on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    Body,
    Api,
}

/// A body/api pair of containers.
#[derive(Debug, Clone, Default)]
pub struct Pack<T> {
    pub body: T,
    pub api: T,
}

impl<T> std::ops::Index<Axis> for Pack<T> {
    type Output = T;
    fn index(&self, axis: Axis) -> &T {
        match axis {
            Axis::Body => &self.body,
            Axis::Api => &self.api,
        }
    }
}

impl<T> std::ops::IndexMut<Axis> for Pack<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::Body => &mut self.body,
            Axis::Api => &mut self.api,
        }
    }
}

/// Scope of an unqualified usage: the smallest enclosing top-level declaration
/// of the user, or `None` for the package itself.
pub type ScopeKey = Option<DeclId>;

type UnqualifiedUses = HashMap<String, BTreeMap<ScopeKey, BTreeSet<DeclId>>>;
type QualifiedUses = HashMap<(RawMangledName, String), BTreeSet<DeclId>>;
type PackageQualifiedUses = HashMap<String, BTreeMap<String, BTreeSet<DeclId>>>;
type DirectUses = HashMap<RawMangledName, BTreeSet<DeclId>>;

/// A map sufficient to populate the impact of any AST change.
#[derive(Debug, Clone, Default)]
pub struct PollutionMap {
    /// Unqualified usages resolving inside the current package.
    pub unq_uses: Pack<UnqualifiedUses>,
    /// Unqualified usages that ever resolved to an imported decl; only these
    /// are dirtied by a change of the same name in an imported package.
    pub unq_uses_of_imported: Pack<UnqualifiedUses>,
    /// Qualified usages keyed by (left-hand type mangle, identifier).
    pub q_uses: Pack<QualifiedUses>,
    /// Package-qualified usages keyed by identifier, then package name.
    pub pq_uses: Pack<PackageQualifiedUses>,
    /// Precise name-to-decl references.
    pub direct_uses: Pack<DirectUses>,
    /// (boxed type, decls hosting a box site of it).
    pub box_uses: HashMap<RawMangledName, Vec<DeclId>>,
    /// fullPackageName -> aliased package names.
    pub package_alias_map: HashMap<String, BTreeSet<String>>,
    /// (fullPackageName, identifier) -> aliased names.
    pub decl_alias_map: HashMap<(String, String), BTreeSet<String>>,
}

impl PollutionMap {
    /// All users of an unqualified `identifier`, across every scope.
    pub fn unqualified_users(
        &self,
        imported_only: bool,
        axis: Axis,
        identifier: &str,
    ) -> Vec<DeclId> {
        let cont = if imported_only { &self.unq_uses_of_imported[axis] } else { &self.unq_uses[axis] };
        let mut out = Vec::new();
        if let Some(scopes) = cont.get(identifier) {
            for users in scopes.values() {
                out.extend(users.iter().copied());
            }
        }
        out
    }

    /// Users of a qualified `identifier`, regardless of the left-hand type.
    pub fn qualified_users(&self, axis: Axis, identifier: &str) -> BTreeSet<DeclId> {
        let mut out = BTreeSet::new();
        for ((_, name), users) in &self.q_uses[axis] {
            if name == identifier {
                out.extend(users.iter().copied());
            }
        }
        out
    }

    pub fn package_qualified_users(
        &self,
        axis: Axis,
        identifier: &str,
        package: &str,
    ) -> Vec<DeclId> {
        self.pq_uses[axis]
            .get(identifier)
            .and_then(|m| m.get(package))
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn direct_users(&self, axis: Axis, mangled: &str) -> Vec<DeclId> {
        self.direct_uses[axis]
            .get(mangled)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The names a declaration is actually visible under, after decl aliasing.
    pub fn accessible_decl_names(&self, decl: &Decl) -> BTreeSet<String> {
        let key = (decl.package.clone(), decl.identifier.clone());
        match self.decl_alias_map.get(&key) {
            Some(aliases) => aliases.clone(),
            None => BTreeSet::from([decl.identifier.clone()]),
        }
    }

    /// The package names a full package name is visible under, after aliasing.
    pub fn accessible_package_names(&self, full_package_name: &str) -> BTreeSet<String> {
        match self.package_alias_map.get(full_package_name) {
            Some(aliases) => aliases.clone(),
            None => BTreeSet::from([full_package_name.to_string()]),
        }
    }
}

/// Additional relation info among types: inheritance children, interface
/// extend participants, and extends per extended type.
#[derive(Debug, Clone, Default)]
pub struct TypeMap {
    /// parent type mangle -> direct child type decls.
    pub children: HashMap<RawMangledName, BTreeSet<DeclId>>,
    /// interface mangle -> types that extend via that interface.
    pub interface_extend_types: HashMap<RawMangledName, BTreeSet<RawMangledName>>,
    /// extended type mangle -> extend decl mangles.
    extends: HashMap<RawMangledName, Vec<RawMangledName>>,
    /// extend decl mangle -> extended type mangle; used when an extend is
    /// deleted and only its mangled name is left.
    extend2decl: HashMap<RawMangledName, RawMangledName>,
}

impl TypeMap {
    pub fn add_parent(&mut self, parent: impl Into<RawMangledName>, child: DeclId) {
        self.children.entry(parent.into()).or_default().insert(child);
    }

    pub fn add_extend(
        &mut self,
        extended_type: impl Into<RawMangledName>,
        extend: impl Into<RawMangledName>,
    ) {
        let extended_type = extended_type.into();
        let extend = extend.into();
        let list = self.extends.entry(extended_type.clone()).or_default();
        if !list.contains(&extend) {
            list.push(extend.clone());
        }
        self.extend2decl.insert(extend, extended_type);
    }

    pub fn all_extends_of_type(&self, mangled: &str) -> &[RawMangledName] {
        self.extends.get(mangled).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn extended_type_of(&self, extend_mangle: &str) -> Option<&RawMangledName> {
        self.extend2decl.get(extend_mangle)
    }

    /// Merge another type map (e.g. the one read from imported packages).
    pub fn merge(&mut self, other: TypeMap) {
        for (parent, children) in other.children {
            self.children.entry(parent).or_default().extend(children);
        }
        for (iface, types) in other.interface_extend_types {
            self.interface_extend_types.entry(iface).or_default().extend(types);
        }
        for (target, extends) in other.extends {
            for e in extends {
                self.add_extend(target.clone(), e);
            }
        }
        for (extend, target) in other.extend2decl {
            self.extend2decl.entry(extend).or_insert(target);
        }
    }
}

/// Builds the pollution map and the type map for one analysis run.
pub struct PollutionMapBuilder<'a> {
    pkg: &'a Package,
    mangled2decl: &'a RawMangled2DeclMap,
    mangler: Mangler,
}

impl<'a> PollutionMapBuilder<'a> {
    pub fn new(pkg: &'a Package, mangled2decl: &'a RawMangled2DeclMap) -> Self {
        let mangler = Mangler::new(pkg.name.clone());
        Self { pkg, mangled2decl, mangler }
    }

    /// Materialise both maps from the cached semantic info, the current tree,
    /// and the import manager's alias tables.
    pub fn build(&self, sema_info: &SemanticInfo, importer: &ImportManager) -> (PollutionMap, TypeMap) {
        let mut map = PollutionMap::default();
        for (user_mangle, usage) in &sema_info.usages {
            let Some(&user) = self.mangled2decl.get(user_mangle) else {
                // the user disappeared; its usages die with it
                continue;
            };
            let scope = self.scope_of(user);
            self.record_use_info(&mut map, Axis::Api, user, scope, &usage.api_usages);
            self.record_use_info(&mut map, Axis::Body, user, scope, &usage.body_usages);
            for boxed in &usage.boxed_types {
                let sites = map.box_uses.entry(boxed.clone()).or_default();
                if !sites.contains(&user) {
                    sites.push(user);
                }
            }
        }
        for (package, aliases) in importer.package_aliases() {
            map.package_alias_map
                .entry(package.clone())
                .or_default()
                .extend(aliases.iter().cloned());
        }
        for ((package, ident), aliases) in importer.decl_aliases() {
            map.decl_alias_map
                .entry((package.clone(), ident.clone()))
                .or_default()
                .extend(aliases.iter().cloned());
        }

        let mut tmap = TypeMap::default();
        self.collect_tree_relations(&mut tmap);
        Self::collect_cached_relations(&mut tmap, &sema_info.relations, self.mangled2decl);
        for (builtin, rel) in &sema_info.builtin_type_relations {
            for e in &rel.extends {
                tmap.add_extend(builtin.clone(), e.clone());
            }
            for iface in &rel.extended_interfaces {
                tmap.interface_extend_types
                    .entry(iface.clone())
                    .or_default()
                    .insert(builtin.clone());
            }
        }
        for imported in importer.packages() {
            let mut imported_map = TypeMap::default();
            Self::collect_cached_relations(&mut imported_map, &imported.relations, self.mangled2decl);
            tmap.merge(imported_map);
        }
        (map, tmap)
    }

    fn scope_of(&self, user: DeclId) -> ScopeKey {
        let top = self.pkg.top_level_of(user);
        if top == user { None } else { Some(top) }
    }

    fn record_use_info(
        &self,
        map: &mut PollutionMap,
        axis: Axis,
        user: DeclId,
        scope: ScopeKey,
        info: &UseInfo,
    ) {
        for used in &info.used_decls {
            map.direct_uses[axis].entry(used.clone()).or_default().insert(user);
        }
        for (name, nu) in &info.used_names {
            if nu.has_unqualified_usage {
                map.unq_uses[axis]
                    .entry(name.clone())
                    .or_default()
                    .entry(scope)
                    .or_default()
                    .insert(user);
            }
            if nu.has_unqualified_usage_of_imported {
                map.unq_uses_of_imported[axis]
                    .entry(name.clone())
                    .or_default()
                    .entry(scope)
                    .or_default()
                    .insert(user);
            }
            for parent in &nu.parent_decls {
                map.q_uses[axis]
                    .entry((parent.clone(), name.clone()))
                    .or_default()
                    .insert(user);
            }
            for qualifier in &nu.package_qualifiers {
                map.pq_uses[axis]
                    .entry(name.clone())
                    .or_default()
                    .entry(qualifier.clone())
                    .or_default()
                    .insert(user);
            }
        }
    }

    /// Inheritance and extend edges visible in the current tree.
    fn collect_tree_relations(&self, tmap: &mut TypeMap) {
        for &id in self.pkg.top_levels() {
            let decl = self.pkg.decl(id);
            if !decl.is_type_decl() {
                continue;
            }
            match &decl.kind {
                DeclKind::Extend(e) => {
                    let target = self.mangler.type_tag(&e.target);
                    tmap.add_extend(target, decl.raw_mangle.clone());
                    for iface in &e.interfaces {
                        tmap.interface_extend_types
                            .entry(self.mangler.type_tag(iface))
                            .or_default()
                            .insert(decl.raw_mangle.clone());
                    }
                }
                _ => {
                    for parent in decl.inherited_types() {
                        tmap.add_parent(self.mangler.type_tag(parent), id);
                    }
                }
            }
        }
    }

    fn collect_cached_relations(
        tmap: &mut TypeMap,
        relations: &BTreeMap<RawMangledName, SemaRelation>,
        mangled2decl: &RawMangled2DeclMap,
    ) {
        for (type_mangle, rel) in relations {
            for parent in &rel.inherits {
                if let Some(&child) = mangled2decl.get(type_mangle) {
                    tmap.add_parent(parent.clone(), child);
                }
            }
            for e in &rel.extends {
                tmap.add_extend(type_mangle.clone(), e.clone());
            }
            for iface in &rel.extended_interfaces {
                tmap.interface_extend_types
                    .entry(iface.clone())
                    .or_default()
                    .insert(type_mangle.clone());
            }
        }
    }
}
