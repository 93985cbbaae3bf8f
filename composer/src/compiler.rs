//! Compilation entry points and the per-document context.

use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codespan_reporting::files::SimpleFiles;
use indexmap::IndexMap;
use tracing::{debug, info, trace};
use weft::parser::Parser;
use weft::tag::{AttrValue, Tag};

use crate::build;
use crate::cache::{CachedFile, DependencyGraph, FileCache};
use crate::directives;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::functions;
use crate::node::{Node, NodeType};
use crate::options::{CompileOptions, MathRenderer};
use crate::output::{OutputId, OutputTree};
use crate::scope::{Scope, Variable};
use crate::value::Value;

/// Extension tried for import paths written without one.
pub const EXTENSION: &str = "weft";

/// Where a file's text comes from.
#[derive(Debug, Clone)]
pub enum FileSource {
    Path(PathBuf),
    /// Text that never touched the disk. Not cached.
    Memory { name: String, source: String },
}

/// State shared by everything that runs while compiling one document.
pub struct CompileContext {
    cache: Arc<FileCache>,
    options: CompileOptions,
    math: Option<Arc<dyn MathRenderer>>,
    dependencies: RefCell<DependencyGraph>,
    unique: Cell<usize>,
    document: Option<PathBuf>,
    base_dir: PathBuf,
}

impl CompileContext {
    pub fn new(
        cache: Arc<FileCache>,
        options: CompileOptions,
        math: Option<Arc<dyn MathRenderer>>,
        document: Option<PathBuf>,
        base_dir: PathBuf,
    ) -> Self {
        CompileContext {
            cache,
            options,
            math,
            dependencies: RefCell::new(DependencyGraph::new()),
            unique: Cell::new(0),
            document,
            base_dir,
        }
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn cache(&self) -> &FileCache {
        &self.cache
    }

    pub fn math_renderer(&self) -> Option<&dyn MathRenderer> {
        self.math.as_deref()
    }

    /// Path of the document being compiled, if it lives on disk.
    pub fn document(&self) -> Option<&Path> {
        self.document.as_deref()
    }

    /// A fresh operation name derived from `base`. The space keeps it apart
    /// from anything a `block` can be called.
    pub fn unique_name(&self, base: &str) -> String {
        let n = self.unique.get() + 1;
        self.unique.set(n);
        format!("{} {}", base, n)
    }

    /// Record that `from` imports `to`. A dynamic import that closes a cycle
    /// is not recorded.
    pub fn add_dependency(&self, from: &Path, to: &Path, dynamic: bool) {
        let mut deps = self.dependencies.borrow_mut();
        if dynamic && deps.has_upstream(to, from) {
            trace!(from = %from.display(), to = %to.display(), "skipping reverse dynamic edge");
            return;
        }
        deps.add(from, to);
    }

    pub fn dependencies(&self) -> DependencyGraph {
        self.dependencies.borrow().clone()
    }

    /// Resolve an import target as written in `scope`'s file.
    ///
    /// `./` and `../` are relative to the importing file, absolute paths are
    /// taken as is, anything else is searched in the template paths first.
    pub fn resolve_path(&self, scope: &Scope, target: &str) -> Result<PathBuf> {
        let base = scope
            .path()
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.base_dir.clone());

        let written = Path::new(target);
        let candidates: Vec<PathBuf> = if target.starts_with("./") || target.starts_with("../") {
            vec![base.join(written)]
        } else if written.is_absolute() {
            vec![written.to_path_buf()]
        } else {
            self.options
                .template_paths
                .iter()
                .map(|dir| dir.join(written))
                .chain(std::iter::once(base.join(written)))
                .collect()
        };

        for candidate in candidates {
            let with_ext = candidate.with_extension(EXTENSION);
            let tries = if candidate.extension().is_none() {
                vec![candidate, with_ext]
            } else {
                vec![candidate]
            };
            for path in tries {
                if path.is_file() {
                    return Ok(fs::canonicalize(&path).unwrap_or(path));
                }
            }
        }
        Err(ErrorKind::FileNotFound(target.to_string()).into())
    }

    /// Build one file: parse it, bind its parameters and expand its top-level
    /// tags. Non-root files that were built before come from the cache.
    pub fn build_file(
        &self,
        source: FileSource,
        is_root: bool,
        params: Option<&IndexMap<String, Value>>,
    ) -> Result<CachedFile> {
        let key = match &source {
            FileSource::Path(path) => Some(FileCache::key(path, params.map(functions::dump).as_deref())),
            FileSource::Memory { .. } => None,
        };
        if !is_root {
            if let Some(entry) = key.as_deref().and_then(|k| self.cache.get(k)) {
                trace!(key = key.as_deref().unwrap_or(""), "cache hit");
                return Ok(entry);
            }
        }

        let (name, path, text) = match source {
            FileSource::Path(path) => {
                let text = fs::read_to_string(&path).map_err(|e| {
                    CompileError::new(ErrorKind::Io {
                        path: path.display().to_string(),
                        message: e.to_string(),
                    })
                })?;
                (path.display().to_string(), Some(path), text)
            }
            FileSource::Memory { name, source } => (name, None, source),
        };
        debug!(file = %name, is_root, "building file");

        let file_id = self.cache.add_source(name.clone(), text.clone());
        let document = Parser::new(text, file_id).parse().map_err(|errors| {
            CompileError::new(ErrorKind::Parse {
                path: name.clone(),
                count: errors.len(),
                errors,
            })
        })?;

        let scope = Scope::file(path);
        scope.set_var("__file__", Variable::auto(Value::string(name.clone())))?;
        let entry = CachedFile {
            scope: scope.clone(),
            tree: OutputTree::new().shared(),
            root: OutputId::ROOT,
        };

        let mut tags: &[Tag] = &document.tags;
        if let Some(first) = tags.first().filter(|t| t.name == "permissive" && !t.is_text()) {
            if !first.attributes.is_empty() || !first.children.is_empty() {
                return Err(CompileError::new(ErrorKind::Structure(
                    "<permissive> takes no attributes or children".into(),
                ))
                .at(&Location::new(file_id, first.head_span())));
            }
            scope.set_permissive(true);
            tags = &tags[1..];
        }
        match tags.first().filter(|t| t.name == "parameters" && !t.is_text()) {
            Some(declared) => {
                bind_parameters(self, &scope, declared, params)?;
                tags = &tags[1..];
            }
            None if params.is_some_and(|p| !p.is_empty()) => {
                return Err(ErrorKind::ParametersNotAccepted(name).into());
            }
            None => {}
        }

        // visible to cyclic importers from here on
        if let Some(key) = key {
            self.cache.set(key, entry.clone());
        }

        let node = Node::root(entry.tree.clone(), entry.root, NodeType::Html);
        for tag in tags {
            if is_root || directives::is_directive(&tag.name) {
                build::build_tag(self, &scope, &node, tag)?;
            }
        }
        Ok(entry)
    }
}

/// Bind call parameters against a leading `<parameters args=(...)/>`.
fn bind_parameters(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    tag: &Tag,
    supplied: Option<&IndexMap<String, Value>>,
) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    let declared = match tag.attributes.as_slice() {
        [attr] if attr.name == "args" || attr.name == "parameters" => match &attr.value {
            AttrValue::Params(params) => params,
            _ => {
                return Err(CompileError::new(ErrorKind::Structure(
                    "`args` of <parameters> must be a parameter list".into(),
                ))
                .at(&Location::new(tag.file_id(), attr.span.clone())));
            }
        },
        _ => {
            return Err(CompileError::new(ErrorKind::Structure(
                "<parameters> takes exactly one `args` attribute".into(),
            ))
            .at(&at));
        }
    };
    let empty = IndexMap::new();
    let supplied = supplied.unwrap_or(&empty);

    for key in supplied.keys() {
        if !declared.iter().any(|p| &p.name == key) {
            let available: Vec<&str> = declared.iter().map(|p| p.name.as_str()).collect();
            return Err(CompileError::new(ErrorKind::UnknownArgument {
                template: "parameters".into(),
                attr: key.clone(),
            })
            .at(&at)
            .with_note(format!("available parameters: {}", available.join(", "))));
        }
    }

    let ev = Evaluator::new(cx, scope, tag.file_id());
    for param in declared {
        let value = match (supplied.get(&param.name), &param.default) {
            (Some(value), _) => value.clone(),
            (None, Some(default)) => ev.eval(default)?,
            (None, None) => {
                return Err(CompileError::new(ErrorKind::MissingArgument {
                    template: "parameters".into(),
                    arg: param.name.clone(),
                })
                .at(&Location::new(tag.file_id(), param.span.clone())));
            }
        };
        let origin = Location::new(tag.file_id(), param.span.clone());
        scope.set_var(&param.name, Variable::new(value, Some(origin)).constant())?;
    }
    Ok(())
}

/// Fold, validate and finalize a built tree. Returns the number of lazy
/// values resolved.
pub(crate) fn finish(tree: &mut OutputTree, root: OutputId) -> Result<usize> {
    tree.fold_synthetic(root);
    tree.validate_ids(root)?;
    tree.validate_nesting(root)?;
    tree.finalize(root)
}

/// A compiled document.
pub struct Compiled {
    pub tree: OutputTree,
    pub root: OutputId,
    /// Every source touched, for rendering diagnostics.
    pub files: SimpleFiles<String, String>,
    pub dependencies: DependencyGraph,
}

impl Compiled {
    pub fn render(&self) -> String {
        self.tree.render(self.root)
    }

    pub fn text_content(&self) -> String {
        self.tree.text_content(self.root)
    }
}

/// Compiles documents, optionally sharing a file cache between them.
pub struct Compiler {
    options: CompileOptions,
    cache: Arc<FileCache>,
    math: Option<Arc<dyn MathRenderer>>,
}

impl Compiler {
    pub fn new(options: CompileOptions) -> Self {
        Compiler {
            options,
            cache: Arc::new(FileCache::new()),
            math: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<FileCache>) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_math_renderer(mut self, renderer: Arc<dyn MathRenderer>) -> Self {
        self.math = Some(renderer);
        self
    }

    pub fn cache(&self) -> &Arc<FileCache> {
        &self.cache
    }

    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    pub fn compile_file(&self, path: impl AsRef<Path>) -> Result<Compiled> {
        let path = path.as_ref();
        let path = fs::canonicalize(path)
            .map_err(|_| CompileError::new(ErrorKind::FileNotFound(path.display().to_string())))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        self.compile(FileSource::Path(path.clone()), Some(path), base_dir)
    }

    pub fn compile_source(&self, name: &str, source: &str) -> Result<Compiled> {
        let base_dir = Path::new(name)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let source = FileSource::Memory {
            name: name.to_string(),
            source: source.to_string(),
        };
        self.compile(source, None, base_dir)
    }

    fn compile(
        &self,
        source: FileSource,
        document: Option<PathBuf>,
        base_dir: PathBuf,
    ) -> Result<Compiled> {
        let cx = CompileContext::new(
            self.cache.clone(),
            self.options.clone(),
            self.math.clone(),
            document,
            base_dir,
        );
        let entry = cx.build_file(source, true, None)?;

        let mut tree = entry.tree.lock().clone();
        let resolved = finish(&mut tree, entry.root)?;
        info!(nodes = tree.len(), resolved, "compiled document");

        Ok(Compiled {
            tree,
            root: entry.root,
            files: self.cache.files(),
            dependencies: cx.dependencies(),
        })
    }
}

/// Compile the file at `path` with a private cache.
pub fn compile_file(path: impl AsRef<Path>, options: &CompileOptions) -> Result<Compiled> {
    Compiler::new(options.clone()).compile_file(path)
}

/// Compile in-memory source. Relative imports resolve against `name`'s directory.
pub fn compile_source(name: &str, source: &str, options: &CompileOptions) -> Result<Compiled> {
    Compiler::new(options.clone()).compile_source(name, source)
}
