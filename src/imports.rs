//! The imported-package surface the analyser sees.
//!
//! The import manager is a collaborator owned by the driver; this module holds
//! the narrow view the incremental core needs: per-package fingerprints of the
//! imported declarations, alias tables, and the relation facts that merge into
//! the current package's type map.

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::RawMangledName;
use crate::cache::{AstCache, SemaRelation};

/// One upstream package as the analyser sees it.
#[derive(Debug, Clone, Default)]
pub struct ImportedPackage {
    pub name: String,
    /// Fingerprints of the imported decls, freshly computed from the imported
    /// AST this run.
    pub ast_cache: AstCache,
    /// Relations contributed by the imported decls (inherits / extends).
    pub relations: BTreeMap<RawMangledName, SemaRelation>,
}

/// Enumerates and inspects imported packages.
#[derive(Debug, Clone, Default)]
pub struct ImportManager {
    packages: Vec<ImportedPackage>,
    /// fullPackageName -> aliases it is visible under.
    package_aliases: BTreeMap<String, BTreeSet<String>>,
    /// (fullPackageName, decl identifier) -> aliases.
    decl_aliases: BTreeMap<(String, String), BTreeSet<String>>,
}

impl ImportManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_package(&mut self, pkg: ImportedPackage) {
        self.packages.push(pkg);
    }

    pub fn packages(&self) -> &[ImportedPackage] {
        &self.packages
    }

    pub fn add_package_alias(&mut self, package: impl Into<String>, alias: impl Into<String>) {
        self.package_aliases
            .entry(package.into())
            .or_default()
            .insert(alias.into());
    }

    pub fn add_decl_alias(
        &mut self,
        package: impl Into<String>,
        identifier: impl Into<String>,
        alias: impl Into<String>,
    ) {
        self.decl_aliases
            .entry((package.into(), identifier.into()))
            .or_default()
            .insert(alias.into());
    }

    pub fn package_aliases(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.package_aliases
    }

    pub fn decl_aliases(&self) -> &BTreeMap<(String, String), BTreeSet<String>> {
        &self.decl_aliases
    }

    /// Fingerprints of every imported decl, keyed by upstream package name.
    pub fn imported_ast_caches(&self) -> BTreeMap<String, AstCache> {
        self.packages
            .iter()
            .map(|p| (p.name.clone(), p.ast_cache.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aliases_accumulate() {
        let mut man = ImportManager::new();
        man.add_package_alias("std.collection", "col");
        man.add_package_alias("std.collection", "sc");
        man.add_decl_alias("std.core", "Array", "Arr");
        assert_eq!(man.package_aliases()["std.collection"].len(), 2);
        assert!(man.decl_aliases()[&("std.core".into(), "Array".into())].contains("Arr"));
    }
}
