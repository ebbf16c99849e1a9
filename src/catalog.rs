//! Capability Catalog
//!
//! The closed allowlist of names a generated program may reference:
//! - **Primitives**: safe built-in operations (arithmetic helpers, containers,
//!   conversions, `print`)
//! - **Modules**: safe auxiliary libraries (`math`, `random`, `re`, `time`)
//!
//! The same catalog is rendered into the generation prompt and used by the
//! executor to build the sandbox environment. Names outside it are never
//! bound, so they fail at lookup time.

use once_cell::sync::Lazy;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Every primitive the sandbox can bind.
pub const KNOWN_PRIMITIVES: &[&str] = &[
    "abs", "all", "any", "bool", "chr", "dict", "divmod", "enumerate",
    "filter", "float", "int", "len", "list", "map", "max", "min", "pow",
    "print", "range", "round", "set", "sorted", "str", "sum", "zip",
];

/// Every auxiliary module the sandbox can bind.
pub const KNOWN_MODULES: &[&str] = &["math", "random", "re", "time"];

static STANDARD: Lazy<Arc<CapabilityCatalog>> = Lazy::new(|| {
    Arc::new(CapabilityCatalog {
        primitives: KNOWN_PRIMITIVES.iter().copied().collect(),
        modules: KNOWN_MODULES.iter().copied().collect(),
    })
});

/// Catalog construction errors
#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Unknown primitive: {0}")]
    UnknownPrimitive(String),

    #[error("Unknown module: {0}")]
    UnknownModule(String),
}

/// Read-only allowlist of primitives and modules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityCatalog {
    primitives: BTreeSet<&'static str>,
    modules: BTreeSet<&'static str>,
}

impl CapabilityCatalog {
    /// The process-wide catalog, built once on first use.
    pub fn standard() -> Arc<CapabilityCatalog> {
        STANDARD.clone()
    }

    /// Build a narrower catalog. Only names the sandbox can bind are accepted.
    pub fn new<'a>(
        primitives: impl IntoIterator<Item = &'a str>,
        modules: impl IntoIterator<Item = &'a str>,
    ) -> Result<Self, CatalogError> {
        let primitives = primitives
            .into_iter()
            .map(|name| {
                KNOWN_PRIMITIVES
                    .iter()
                    .copied()
                    .find(|known| *known == name)
                    .ok_or_else(|| CatalogError::UnknownPrimitive(name.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        let modules = modules
            .into_iter()
            .map(|name| {
                KNOWN_MODULES
                    .iter()
                    .copied()
                    .find(|known| *known == name)
                    .ok_or_else(|| CatalogError::UnknownModule(name.to_string()))
            })
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self { primitives, modules })
    }

    /// Allowed primitive names, sorted
    pub fn allowed_primitives(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.primitives.iter().copied()
    }

    /// Allowed module names, sorted
    pub fn allowed_modules(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.iter().copied()
    }

    /// Whether `name` is an allowed primitive
    pub fn allows_primitive(&self, name: &str) -> bool {
        self.primitives.contains(name)
    }

    /// Whether `name` is an allowed module
    pub fn allows_module(&self, name: &str) -> bool {
        self.modules.contains(name)
    }

    /// The interned name of an allowed primitive
    pub fn primitive(&self, name: &str) -> Option<&'static str> {
        self.primitives.get(name).copied()
    }

    /// The interned name of an allowed module
    pub fn module(&self, name: &str) -> Option<&'static str> {
        self.modules.get(name).copied()
    }

    /// Comma-separated primitive names, as written into the prompt
    pub fn primitives_list(&self) -> String {
        self.primitives.iter().copied().collect::<Vec<_>>().join(", ")
    }

    /// Comma-separated module names, as written into the prompt
    pub fn modules_list(&self) -> String {
        self.modules.iter().copied().collect::<Vec<_>>().join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_contents() {
        let catalog = CapabilityCatalog::standard();
        assert!(catalog.allows_primitive("print"));
        assert!(catalog.allows_primitive("sorted"));
        assert!(catalog.allows_module("math"));
        assert!(!catalog.allows_primitive("open"));
        assert!(!catalog.allows_primitive("eval"));
        assert!(!catalog.allows_primitive("__import__"));
        assert!(!catalog.allows_module("os"));
        assert_eq!(catalog.allowed_primitives().count(), KNOWN_PRIMITIVES.len());
        assert_eq!(catalog.primitive("len"), Some("len"));
        assert_eq!(catalog.module("os"), None);
    }

    #[test]
    fn test_standard_catalog_is_shared() {
        let a = CapabilityCatalog::standard();
        let b = CapabilityCatalog::standard();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_narrow_catalog() {
        let catalog = CapabilityCatalog::new(["print", "len"], ["math"]).unwrap();
        assert!(catalog.allows_primitive("len"));
        assert!(!catalog.allows_primitive("sum"));
        assert_eq!(catalog.modules_list(), "math");
        assert_eq!(catalog.primitives_list(), "len, print");
    }

    #[test]
    fn test_unknown_names_rejected() {
        assert!(matches!(
            CapabilityCatalog::new(["open"], Vec::<&str>::new()),
            Err(CatalogError::UnknownPrimitive(name)) if name == "open"
        ));
        assert!(matches!(
            CapabilityCatalog::new(Vec::<&str>::new(), ["os"]),
            Err(CatalogError::UnknownModule(name)) if name == "os"
        ));
    }
}
