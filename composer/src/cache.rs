use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codespan_reporting::files::SimpleFiles;
use parking_lot::RwLock;
use tracing::trace;

use crate::output::{OutputId, SharedTree};
use crate::scope::Scope;

/// A built file: its scope and the output it produced.
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub scope: Arc<Scope>,
    pub tree: SharedTree,
    pub root: OutputId,
}

/// Memoized file builds keyed by path and call parameters, plus the source
/// database every diagnostic points into.
///
/// Entries are inserted before a file's body is built, so a file that imports
/// itself (directly or not) sees its own scope in whatever state it is in.
pub struct FileCache {
    entries: RwLock<HashMap<String, CachedFile>>,
    sources: RwLock<SimpleFiles<String, String>>,
}

impl Default for FileCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FileCache {
    pub fn new() -> Self {
        FileCache {
            entries: RwLock::new(HashMap::new()),
            sources: RwLock::new(SimpleFiles::new()),
        }
    }

    /// Cache key of a file built with `params` (a deterministic dump of the
    /// evaluated call parameters).
    pub fn key(path: &Path, params: Option<&str>) -> String {
        match params {
            Some(params) => format!("{}#{}", path.display(), params),
            None => path.display().to_string(),
        }
    }

    pub fn is_cached(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<CachedFile> {
        self.entries.read().get(key).cloned()
    }

    pub fn set(&self, key: String, entry: CachedFile) {
        trace!(%key, "caching file");
        self.entries.write().insert(key, entry);
    }

    /// All cache keys, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Drop every entry built from one of `paths`, whatever its parameters.
    pub fn remove(&self, paths: &[PathBuf]) {
        let paths: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
        self.entries.write().retain(|key, _| {
            let path = key.split_once('#').map_or(key.as_str(), |(p, _)| p);
            !paths.iter().any(|p| p == path)
        });
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }

    /// Register a source text for diagnostics and return its file id.
    pub fn add_source(&self, name: String, source: String) -> usize {
        self.sources.write().add(name, source)
    }

    /// A copy of the source database, for rendering diagnostics.
    pub fn files(&self) -> SimpleFiles<String, String> {
        self.sources.read().clone()
    }
}

/// Importer to imported edges between source files.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<PathBuf, BTreeSet<PathBuf>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` imports `to`. Self edges are ignored.
    pub fn add(&mut self, from: &Path, to: &Path) {
        if from == to {
            return;
        }
        self.edges
            .entry(from.to_path_buf())
            .or_default()
            .insert(to.to_path_buf());
    }

    /// Whether `upstream` is reachable from `path` by following imports.
    pub fn has_upstream(&self, path: &Path, upstream: &Path) -> bool {
        let mut stack = vec![path];
        let mut seen = BTreeSet::new();
        while let Some(current) = stack.pop() {
            if !seen.insert(current) {
                continue;
            }
            if let Some(next) = self.edges.get(current) {
                for dep in next {
                    if dep == upstream {
                        return true;
                    }
                    stack.push(dep.as_path());
                }
            }
        }
        false
    }

    /// Direct imports of `path`.
    pub fn dependencies(&self, path: &Path) -> Vec<PathBuf> {
        self.edges
            .get(path)
            .map(|deps| deps.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::OutputTree;

    fn entry() -> CachedFile {
        CachedFile {
            scope: Scope::file(None),
            tree: OutputTree::new().shared(),
            root: OutputId::ROOT,
        }
    }

    #[test]
    fn remove_ignores_parameters() {
        let cache = FileCache::new();
        let a = PathBuf::from("/site/a.weft");
        cache.set(FileCache::key(&a, None), entry());
        cache.set(FileCache::key(&a, Some("n=1")), entry());
        cache.set(FileCache::key(Path::new("/site/b.weft"), None), entry());
        assert_eq!(cache.list().len(), 3);

        cache.remove(&[a]);
        assert_eq!(cache.list(), ["/site/b.weft"]);
        cache.clear();
        assert!(cache.list().is_empty());
    }

    #[test]
    fn upstream_follows_transitive_edges() {
        let mut deps = DependencyGraph::new();
        let (a, b, c) = (Path::new("a"), Path::new("b"), Path::new("c"));
        deps.add(a, b);
        deps.add(b, c);
        deps.add(c, c);
        assert!(deps.has_upstream(a, c));
        assert!(!deps.has_upstream(c, a));
        assert_eq!(deps.dependencies(a), [PathBuf::from("b")]);
        assert!(deps.dependencies(c).is_empty());
    }
}
