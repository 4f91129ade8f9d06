//! JT-007: Module resolution and merge: the flat job registry.
//!
//! Loads a document, recursively loads its imports (local paths or remote
//! `kind::namespace/name` locators), re-namespaces imported jobs under the
//! importing job, and merges imported root inputs:
//! - owner root, imported root: inputs fold into the global (root) set
//! - owner root, imported `J`: registered as `J`
//! - owner `O`, imported `J`: registered as `O J`
//! - owner `O`, imported root: inputs merge into `O`'s own
//!
//! Merging only compares types; a shared name with different types fails.

use super::error::{Error, Result};
use super::parser::{flatten, parse_document};
use super::types::{Job, JobName, OptionSpec, Parameter, TypeConstraint};
use crate::source::{Fetcher, SourceError, SourceRef};
use indexmap::IndexMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Document loaded from a fetched source directory.
pub const SOURCE_DOCUMENT: &str = "jobs.yaml";

/// Immutable name → job mapping, built once at load time.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    jobs: IndexMap<String, Arc<Job>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from already-named jobs.
    pub fn from_jobs(jobs: impl IntoIterator<Item = Job>) -> Result<Self> {
        let mut registry = Self::new();
        for job in jobs {
            registry.insert_unique(job)?;
        }
        Ok(registry)
    }

    fn insert_unique(&mut self, job: Job) -> Result<()> {
        let key = job.name.to_string();
        if self.jobs.contains_key(&key) {
            return Err(Error::DuplicateJob(key));
        }
        self.jobs.insert(key, Arc::new(job));
        Ok(())
    }

    /// The root job, when present.
    pub fn root(&self) -> Option<&Arc<Job>> {
        self.jobs.get("")
    }

    /// Exact lookup; whitespace in `name` is normalized.
    pub fn get(&self, name: &str) -> Option<&Arc<Job>> {
        self.jobs.get(&JobName::parse(name).to_string())
    }

    /// Resolve `target` as referenced from `caller`: the caller's own
    /// children first, then each ancestor's, then the absolute name.
    pub fn lookup(&self, caller: &JobName, target: &str) -> Result<Arc<Job>> {
        let target = JobName::parse(target);
        std::iter::once(caller.clone())
            .chain(caller.ancestors())
            .find_map(|prefix| self.jobs.get(&prefix.join(&target).to_string()))
            .cloned()
            .ok_or_else(|| Error::JobNotFound(target.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.jobs.keys().map(String::as_str)
    }

    pub fn jobs(&self) -> impl Iterator<Item = &Arc<Job>> {
        self.jobs.values()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    fn into_jobs(self) -> impl Iterator<Item = Job> {
        self.jobs
            .into_values()
            .map(|j| Arc::try_unwrap(j).unwrap_or_else(|shared| (*shared).clone()))
    }
}

// ============================================================================
// Input merging
// ============================================================================

/// A named, typed input declaration.
pub trait InputSpec: Clone {
    const KIND: &'static str;
    fn spec_name(&self) -> &str;
    fn spec_type(&self) -> &TypeConstraint;
}

impl InputSpec for Parameter {
    const KIND: &'static str = "parameter";
    fn spec_name(&self) -> &str {
        &self.name
    }
    fn spec_type(&self) -> &TypeConstraint {
        &self.ty
    }
}

impl InputSpec for OptionSpec {
    const KIND: &'static str = "option";
    fn spec_name(&self) -> &str {
        &self.name
    }
    fn spec_type(&self) -> &TypeConstraint {
        &self.ty
    }
}

/// Merge `secondary` (imported) into `primary` (importing).
///
/// Names only in `secondary` are appended in order; shared names keep the
/// primary entry and must have identical types.
pub fn merge_specs<S: InputSpec>(primary: &[S], secondary: &[S]) -> Result<Vec<S>> {
    let mut merged = primary.to_vec();
    for spec in secondary {
        match primary.iter().find(|p| p.spec_name() == spec.spec_name()) {
            Some(existing) if existing.spec_type() != spec.spec_type() => {
                return Err(Error::IncompatibleSpec {
                    kind: S::KIND,
                    name: spec.spec_name().to_string(),
                    wanted: existing.spec_type().ty.clone(),
                    actual: spec.spec_type().ty.clone(),
                });
            }
            Some(_) => {}
            None => merged.push(spec.clone()),
        }
    }
    Ok(merged)
}

#[derive(Debug, Default)]
struct Globals {
    params: Vec<Parameter>,
    options: Vec<OptionSpec>,
}

impl Globals {
    fn absorb(&mut self, job: &Job) -> Result<()> {
        self.params = merge_specs(&self.params, &job.params)?;
        self.options = merge_specs(&self.options, &job.options)?;
        Ok(())
    }
}

// ============================================================================
// Loading
// ============================================================================

/// Load a document and everything it imports.
pub fn load_registry(path: &Path, fetcher: Option<&dyn Fetcher>) -> Result<Registry> {
    Loader::new(fetcher).load_file(path)
}

/// Load a document from text; relative imports resolve from `base_dir`.
pub fn load_str(yaml: &str, base_dir: &Path) -> Result<Registry> {
    Loader::new(None).load_document(yaml, "<inline>", base_dir)
}

struct Loader<'a> {
    fetcher: Option<&'a dyn Fetcher>,
    /// Documents currently being loaded, outermost first
    stack: Vec<PathBuf>,
}

impl<'a> Loader<'a> {
    fn new(fetcher: Option<&'a dyn Fetcher>) -> Self {
        Self {
            fetcher,
            stack: Vec::new(),
        }
    }

    fn load_file(&mut self, path: &Path) -> Result<Registry> {
        let canonical = path.canonicalize().map_err(|e| Error::io(path, e))?;
        if self.stack.contains(&canonical) {
            return Err(Error::ImportCycle(canonical));
        }
        let text = std::fs::read_to_string(&canonical).map_err(|e| Error::io(&canonical, e))?;
        let base = canonical
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        tracing::debug!(path = %canonical.display(), "loading document");
        self.stack.push(canonical.clone());
        let result = self.load_document(&text, &canonical.display().to_string(), &base);
        self.stack.pop();
        result
    }

    fn load_document(&mut self, text: &str, location: &str, base: &Path) -> Result<Registry> {
        let root = parse_document(text, location)?;
        let mut jobs: IndexMap<String, Job> = IndexMap::new();
        let mut globals = Globals::default();

        for job in flatten(root, base) {
            let owner = job.name.clone();
            let imports = job.import.to_vec();
            let origin = job.origin.clone();
            insert_job(&mut jobs, job)?;
            for locator in imports {
                let imported = self.load_import(&locator, &origin)?;
                for sub in imported.into_jobs() {
                    match (owner.is_root(), sub.name.is_root()) {
                        (true, true) => globals.absorb(&sub)?,
                        (false, true) => {
                            if let Some(target) = jobs.get_mut(&owner.to_string()) {
                                target.params = merge_specs(&target.params, &sub.params)?;
                                target.options = merge_specs(&target.options, &sub.options)?;
                            }
                        }
                        (_, false) => {
                            let mut sub = sub;
                            sub.name = owner.join(&sub.name);
                            insert_job(&mut jobs, sub)?;
                        }
                    }
                }
            }
        }

        if let Some(root) = jobs.get_mut("") {
            root.params = merge_specs(&root.params, &globals.params)?;
            root.options = merge_specs(&root.options, &globals.options)?;
        }
        Registry::from_jobs(jobs.into_values())
    }

    fn load_import(&mut self, locator: &str, base: &Path) -> Result<Registry> {
        if locator.contains("::") {
            let source = SourceRef::parse_locator(locator)?;
            let fetcher = self.fetcher.ok_or_else(|| SourceError::Invalid {
                locator: locator.to_string(),
                message: "no source fetcher configured".to_string(),
            })?;
            let dir = fetcher.fetch(&source)?;
            return self.load_file(&dir.join(SOURCE_DOCUMENT));
        }
        let path = Path::new(locator);
        if path.is_absolute() {
            self.load_file(path)
        } else {
            self.load_file(&base.join(path))
        }
    }
}

fn insert_job(jobs: &mut IndexMap<String, Job>, job: Job) -> Result<()> {
    let key = job.name.to_string();
    if jobs.contains_key(&key) {
        return Err(Error::DuplicateJob(key));
    }
    jobs.insert(key, job);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::value::Type;

    fn param(name: &str, ty: &str) -> Parameter {
        Parameter {
            name: name.into(),
            ty: TypeConstraint::parse(ty).unwrap(),
            default: None,
            env: Vec::new(),
            description: None,
        }
    }

    fn names(specs: &[Parameter]) -> Vec<String> {
        let mut n: Vec<String> = specs.iter().map(|p| p.name.clone()).collect();
        n.sort();
        n
    }

    #[test]
    fn test_jt007_merge_disjoint_commutes() {
        let a = vec![param("x", "string")];
        let b = vec![param("y", "number"), param("z", "bool")];
        let ab = merge_specs(&a, &b).unwrap();
        let ba = merge_specs(&b, &a).unwrap();
        assert_eq!(names(&ab), names(&ba));
        assert_eq!(ab.len(), 3);
    }

    #[test]
    fn test_jt007_merge_same_type_keeps_one() {
        let a = vec![param("x", "list(string)")];
        let b = vec![param("x", "set(string)")];
        let merged = merge_specs(&a, &b).unwrap();
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_jt007_merge_type_conflict() {
        let a = vec![param("x", "string")];
        let b = vec![param("x", "number")];
        match merge_specs(&a, &b).unwrap_err() {
            Error::IncompatibleSpec {
                kind,
                name,
                wanted,
                actual,
            } => {
                assert_eq!(kind, "parameter");
                assert_eq!(name, "x");
                assert_eq!(wanted, Type::String);
                assert_eq!(actual, Type::Number);
            }
            other => panic!("unexpected {other}"),
        }
    }

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_jt007_namespacing_under_owner() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "m.yaml",
            r#"
options:
  - name: profile
jobs:
  build:
    exec: { command: '"make"' }
"#,
        );
        let root = write(
            dir.path(),
            "jobs.yaml",
            r#"
jobs:
  app:
    import: m.yaml
"#,
        );
        let registry = load_registry(&root, None).unwrap();
        assert!(registry.get("app build").is_some());
        assert!(registry.get("build").is_none());
        let app = registry.get("app").unwrap();
        assert_eq!(app.options[0].name, "profile");
    }

    #[test]
    fn test_jt007_root_import_keeps_names_and_globals() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "lib.yaml",
            r#"
params:
  - name: env
    default: '"dev"'
jobs:
  lint: {}
"#,
        );
        let root = write(
            dir.path(),
            "jobs.yaml",
            "import: [lib.yaml]\nparams:\n  - name: region\n",
        );
        let registry = load_registry(&root, None).unwrap();
        assert!(registry.get("lint").is_some());
        let names: Vec<&str> = registry
            .root()
            .unwrap()
            .params
            .iter()
            .map(|p| p.name.as_str())
            .collect();
        assert_eq!(names, vec!["region", "env"]);
    }

    #[test]
    fn test_jt007_global_type_conflict() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.yaml", "params:\n  - name: n\n    type: number\n");
        let root = write(dir.path(), "jobs.yaml", "import: lib.yaml\nparams:\n  - name: n\n");
        let err = load_registry(&root, None).unwrap_err();
        assert!(matches!(err, Error::IncompatibleSpec { .. }), "{err}");
    }

    #[test]
    fn test_jt007_import_cycle() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "jobs:\n  x:\n    import: b.yaml\n");
        write(dir.path(), "b.yaml", "jobs:\n  y:\n    import: a.yaml\n");
        let err = load_registry(&dir.path().join("a.yaml"), None).unwrap_err();
        assert!(matches!(err, Error::ImportCycle(_)), "{err}");
    }

    #[test]
    fn test_jt007_duplicate_after_import() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "lib.yaml", "jobs:\n  build: {}\n");
        let root = write(dir.path(), "jobs.yaml", "import: lib.yaml\njobs:\n  build: {}\n");
        let err = load_registry(&root, None).unwrap_err();
        assert!(matches!(err, Error::DuplicateJob(ref n) if n == "build"), "{err}");
    }

    #[test]
    fn test_jt007_lookup_relative_then_absolute() {
        let registry = load_str(
            r#"
jobs:
  app:
    jobs:
      build: {}
      deploy: {}
  test: {}
"#,
            Path::new("."),
        )
        .unwrap();
        let caller = JobName::parse("app deploy");
        assert_eq!(registry.lookup(&caller, "build").unwrap().name.to_string(), "app build");
        assert_eq!(registry.lookup(&caller, "test").unwrap().name.to_string(), "test");
        assert!(matches!(
            registry.lookup(&caller, "nope"),
            Err(Error::JobNotFound(_))
        ));
        assert!(registry.get("").is_some());
    }

    #[test]
    fn test_jt007_remote_import_without_fetcher() {
        let err = load_str("import: git::acme/ci\n", Path::new(".")).unwrap_err();
        assert!(matches!(err, Error::Source(_)), "{err}");
    }
}
