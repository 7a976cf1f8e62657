#![forbid(unsafe_code)]

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::builtin::builtin_packages;
use crate::metadata::{
    parse_stub_package, CrateRequirement, FunctionMapping, MethodMapping, StubError, StubPackage,
    TypeMapping,
};

/// Registry over discovered stub packages.
///
/// Loaded once per invocation; lookups are lazy and cached (misses too), and
/// every hit records the owning package's build requirements so the manifest
/// only carries crates that are actually referenced.
pub struct StubRegistry {
    packages: Vec<StubPackage>,
    fn_cache: RefCell<HashMap<String, Option<FunctionMapping>>>,
    method_cache: RefCell<HashMap<String, Option<MethodMapping>>>,
    type_cache: RefCell<HashMap<String, Option<TypeMapping>>>,
    used: RefCell<BTreeMap<String, CrateRequirement>>,
}

impl StubRegistry {
    pub fn empty() -> Self {
        Self {
            packages: Vec::new(),
            fn_cache: RefCell::new(HashMap::new()),
            method_cache: RefCell::new(HashMap::new()),
            type_cache: RefCell::new(HashMap::new()),
            used: RefCell::new(BTreeMap::new()),
        }
    }

    /// Registry preloaded with the compiled-in std stub set.
    pub fn with_builtins() -> Result<Self, StubError> {
        let mut registry = Self::empty();
        registry.packages = builtin_packages()?;
        Ok(registry)
    }

    /// Load every `*.toml` stub package in `dir`. Later packages shadow
    /// earlier ones (user stubs override builtins).
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, StubError> {
        let entries = fs::read_dir(dir).map_err(|e| {
            StubError::new(format!("cannot read stub directory {}: {e}", dir.display()))
        })?;

        let mut paths: Vec<_> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut loaded = 0;
        for path in paths {
            let text = fs::read_to_string(&path).map_err(|e| {
                StubError::new(format!("cannot read stub {}: {e}", path.display()))
            })?;
            let pkg = parse_stub_package(&text)
                .map_err(|e| StubError::new(format!("{}: {}", path.display(), e.message)))?;
            debug!(package = %pkg.name, path = %path.display(), "loaded stub package");
            self.packages.push(pkg);
            loaded += 1;
        }
        Ok(loaded)
    }

    pub fn lookup_callable(&self, qualified: &str) -> Option<FunctionMapping> {
        if let Some(cached) = self.fn_cache.borrow().get(qualified) {
            if let Some(m) = cached {
                self.record_use(&m.package);
            }
            return cached.clone();
        }

        let found = self
            .packages
            .iter()
            .rev()
            .find_map(|p| p.functions.get(qualified).cloned());

        debug!(name = qualified, hit = found.is_some(), "stub callable lookup");
        self.fn_cache
            .borrow_mut()
            .insert(qualified.to_string(), found.clone());
        if let Some(m) = &found {
            self.record_use(&m.package);
        }
        found
    }

    pub fn lookup_method(&self, receiver: &str, method: &str) -> Option<MethodMapping> {
        let key = format!("{receiver}.{method}");
        if let Some(cached) = self.method_cache.borrow().get(&key) {
            if let Some(m) = cached {
                self.record_use(&m.package);
            }
            return cached.clone();
        }

        let found = self
            .packages
            .iter()
            .rev()
            .find_map(|p| p.methods.get(&key).cloned());

        debug!(name = %key, hit = found.is_some(), "stub method lookup");
        self.method_cache.borrow_mut().insert(key, found.clone());
        if let Some(m) = &found {
            self.record_use(&m.package);
        }
        found
    }

    pub fn lookup_type(&self, name: &str) -> Option<TypeMapping> {
        if let Some(cached) = self.type_cache.borrow().get(name) {
            if let Some(m) = cached {
                self.record_use(&m.package);
            }
            return cached.clone();
        }

        let found = self
            .packages
            .iter()
            .rev()
            .find_map(|p| p.types.get(name).cloned());

        debug!(name, hit = found.is_some(), "stub type lookup");
        self.type_cache
            .borrow_mut()
            .insert(name.to_string(), found.clone());
        if let Some(m) = &found {
            self.record_use(&m.package);
        }
        found
    }

    /// True when the name belongs to a stubbed module namespace, e.g. the
    /// `fs` in `fs.read_to_string`.
    pub fn is_stub_module(&self, name: &str) -> bool {
        self.packages
            .iter()
            .any(|p| p.src_module.as_deref() == Some(name))
    }

    /// Record a dependency for a crate that the emitter references
    /// directly, outside any stub template (e.g. the async runtime for
    /// guarded state).
    pub fn record_direct_requirement(&self, req: CrateRequirement) {
        let mut used = self.used.borrow_mut();
        used.entry(req.name.clone())
            .and_modify(|existing| existing.merge(&req))
            .or_insert(req);
    }

    /// Build requirements accumulated by lookups during this invocation.
    pub fn collect_requirements(&self) -> BTreeMap<String, CrateRequirement> {
        self.used.borrow().clone()
    }

    fn record_use(&self, package: &str) {
        let Some(pkg) = self.packages.iter().find(|p| p.name == package) else {
            return;
        };
        let mut used = self.used.borrow_mut();
        for req in &pkg.requirements {
            used.entry(req.name.clone())
                .and_modify(|existing| existing.merge(req))
                .or_insert_with(|| req.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtins_load() {
        let registry = StubRegistry::with_builtins().expect("builtins should parse");
        assert!(registry.lookup_callable("mpsc_channel").is_some());
        assert!(registry.lookup_method("Receiver", "recv").is_some());
        assert!(registry.lookup_type("Receiver").is_some());
        assert!(registry.is_stub_module("fs"));
    }

    #[test]
    fn lookups_record_requirements() {
        let registry = StubRegistry::with_builtins().expect("builtins should parse");
        assert!(registry.collect_requirements().is_empty());

        registry.lookup_callable("mpsc_channel");
        let reqs = registry.collect_requirements();
        let tokio = reqs.get("tokio").expect("tokio requirement recorded");
        assert!(tokio.features.contains("full"));
    }

    #[test]
    fn misses_are_cached_and_free() {
        let registry = StubRegistry::with_builtins().expect("builtins should parse");
        assert!(registry.lookup_callable("no_such_symbol").is_none());
        assert!(registry.lookup_callable("no_such_symbol").is_none());
        assert!(registry.collect_requirements().is_empty());
    }

    #[test]
    fn load_dir_discovers_packages() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        let path = dir.path().join("redis.toml");
        let mut f = std::fs::File::create(&path).expect("create stub file");
        write!(
            f,
            r#"
[package]
name = "redis"
rust_crate = "redis"
rust_version = "0.25"
src_module = "redis"

[cargo.dependencies]
redis = "0.25"

[[mappings.functions]]
src = "redis.connect"
params = ["str"]
returns = "Connection"
rust_code = "redis::Client::open({{arg0}})"
needs_result = true

[[mappings.types]]
src = "Connection"
rust = "redis::Connection"
"#
        )
        .expect("write stub file");

        let mut registry = StubRegistry::empty();
        let loaded = registry.load_dir(dir.path()).expect("load stub dir");
        assert_eq!(loaded, 1);
        assert!(registry.lookup_callable("redis.connect").is_some());
        assert!(registry.collect_requirements().contains_key("redis"));
    }

    #[test]
    fn malformed_package_is_an_error() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        std::fs::write(dir.path().join("bad.toml"), "this is not toml at all [")
            .expect("write stub file");
        let mut registry = StubRegistry::empty();
        assert!(registry.load_dir(dir.path()).is_err());
    }

    #[test]
    fn user_packages_shadow_builtins() {
        let dir = tempfile::TempDir::new().expect("create temp dir");
        std::fs::write(
            dir.path().join("override.toml"),
            r#"
[package]
name = "custom-channels"
rust_crate = "flume"
rust_version = "0.11"

[cargo.dependencies]
flume = "0.11"

[[mappings.functions]]
src = "mpsc_channel"
params = ["int"]
returns = "tuple[Sender, Receiver]"
rust_code = "flume::bounded({arg0} as usize)"
"#,
        )
        .expect("write stub file");

        let mut registry = StubRegistry::with_builtins().expect("builtins should parse");
        registry.load_dir(dir.path()).expect("load stub dir");
        let m = registry.lookup_callable("mpsc_channel").expect("mapping");
        assert!(m.rust_code.contains("flume"));
    }
}
