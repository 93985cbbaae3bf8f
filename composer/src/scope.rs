//! The scope chain.
//!
//! Scopes are reference counted so that templates and pending operations can
//! close over them. Each level guards its own tables; a compilation only ever
//! touches them from one thread, the locks exist so that cached file scopes can
//! be shared between documents.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::template::Template;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    /// Root of one source file.
    File,
    /// Loop, conditional and template bodies. Exported writes pass through.
    Branch,
    /// Scratch scopes. Exported writes are rejected.
    Sub,
}

#[derive(Debug, Clone)]
pub struct Variable {
    pub value: Value,
    pub constant: bool,
    /// Injected by the engine, never synced between files.
    pub auto: bool,
    pub imported: bool,
    pub exported: bool,
    pub origin: Option<Location>,
}

impl Variable {
    pub fn new(value: Value, origin: Option<Location>) -> Self {
        Variable {
            value,
            constant: false,
            auto: false,
            imported: false,
            exported: false,
            origin,
        }
    }

    pub fn auto(value: Value) -> Self {
        Variable {
            constant: true,
            auto: true,
            ..Variable::new(value, None)
        }
    }

    pub fn constant(mut self) -> Self {
        self.constant = true;
        self
    }

    pub fn exported(mut self, exported: bool) -> Self {
        self.exported = exported;
        self
    }
}

pub struct Scope {
    kind: ScopeKind,
    parent: Option<Arc<Scope>>,
    vars: RwLock<IndexMap<String, Variable>>,
    templates: RwLock<IndexMap<String, Arc<Template>>>,
    permissive: AtomicBool,
    path: Option<PathBuf>,
    /// Set on frozen copies: the live level this one was copied from.
    snapshot_of: Option<Weak<Scope>>,
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("kind", &self.kind)
            .field("vars", &self.vars.read().keys().collect::<Vec<_>>())
            .field("templates", &self.templates.read().keys().collect::<Vec<_>>())
            .field("parent", &self.parent)
            .finish()
    }
}

impl Scope {
    fn with(kind: ScopeKind, parent: Option<Arc<Scope>>, path: Option<PathBuf>) -> Arc<Scope> {
        Arc::new(Scope {
            kind,
            parent,
            vars: RwLock::new(IndexMap::new()),
            templates: RwLock::new(IndexMap::new()),
            permissive: AtomicBool::new(false),
            path,
            snapshot_of: None,
        })
    }

    pub fn file(path: Option<PathBuf>) -> Arc<Scope> {
        Scope::with(ScopeKind::File, None, path)
    }

    pub fn branch(parent: &Arc<Scope>) -> Arc<Scope> {
        Scope::with(ScopeKind::Branch, Some(parent.clone()), None)
    }

    pub fn sub(parent: &Arc<Scope>) -> Arc<Scope> {
        Scope::with(ScopeKind::Sub, Some(parent.clone()), None)
    }

    pub fn kind(&self) -> ScopeKind {
        self.kind
    }

    pub fn parent(&self) -> Option<&Arc<Scope>> {
        self.parent.as_ref()
    }

    fn chain(&self) -> impl Iterator<Item = &Scope> {
        std::iter::successors(Some(self), |s| s.parent.as_deref())
    }

    fn root(&self) -> &Scope {
        self.chain().last().unwrap_or(self)
    }

    pub fn permissive(&self) -> bool {
        self.root().permissive.load(Ordering::Relaxed)
    }

    pub fn set_permissive(&self, permissive: bool) {
        self.root().permissive.store(permissive, Ordering::Relaxed);
    }

    /// Path of the source file this scope belongs to, if it came from disk.
    pub fn path(&self) -> Option<&Path> {
        self.chain().find_map(|s| s.path.as_deref())
    }

    pub fn get_var(&self, name: &str) -> Option<Variable> {
        self.chain().find_map(|s| s.vars.read().get(name).cloned())
    }

    pub fn has_var(&self, name: &str) -> bool {
        self.chain().any(|s| s.vars.read().contains_key(name))
    }

    /// The level an exported entry lands on, starting from `self`.
    fn export_target(self: &Arc<Self>, name: &str) -> Result<Arc<Scope>> {
        match self.kind {
            ScopeKind::File => Ok(self
                .snapshot_of
                .as_ref()
                .and_then(Weak::upgrade)
                .unwrap_or_else(|| self.clone())),
            ScopeKind::Branch => match &self.parent {
                Some(parent) => parent.export_target(name),
                None => Ok(self.clone()),
            },
            ScopeKind::Sub => match &self.parent {
                Some(_) => Err(ErrorKind::ExportFromScope(name.to_string()).into()),
                None => Ok(self.clone()),
            },
        }
    }

    pub fn set_var(self: &Arc<Self>, name: &str, var: Variable) -> Result<()> {
        if name == "_" {
            return Ok(());
        }
        let target = if var.exported {
            self.export_target(name)?
        } else {
            self.clone()
        };
        target.vars.write().insert(name.to_string(), var);
        Ok(())
    }

    pub fn get_template(&self, name: &str) -> Option<Arc<Template>> {
        if let Some(found) = self.chain().find_map(|s| s.templates.read().get(name).cloned()) {
            return Some(found);
        }
        // frozen copies still see templates defined after they were taken
        self.chain()
            .filter_map(|s| s.snapshot_of.as_ref().and_then(Weak::upgrade))
            .find_map(|live| live.get_template(name))
    }

    pub fn has_template(&self, name: &str) -> bool {
        self.get_template(name).is_some()
    }

    pub fn set_template(self: &Arc<Self>, name: &str, template: Arc<Template>) -> Result<()> {
        let target = if template.exported {
            self.export_target(name)?
        } else {
            self.clone()
        };
        let mut templates = target.templates.write();
        match templates.get(name) {
            Some(prev) if prev.origin != template.origin => {
                return Err(CompileError::new(ErrorKind::Redefinition(name.to_string()))
                    .with_note_at("defined here", &prev.origin));
            }
            _ => {}
        }
        templates.insert(name.to_string(), template);
        Ok(())
    }

    /// A variable defined on this very level.
    pub fn local_var(&self, name: &str) -> Option<Variable> {
        self.vars.read().get(name).cloned()
    }

    /// A template defined on this very level.
    pub fn local_template(&self, name: &str) -> Option<Arc<Template>> {
        self.templates.read().get(name).cloned()
    }

    /// Own variables of this level, in definition order.
    pub fn variables(&self) -> Vec<(String, Variable)> {
        self.vars
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Own templates of this level, in definition order.
    pub fn templates(&self) -> Vec<(String, Arc<Template>)> {
        self.templates
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Every variable and template name visible from here, sorted.
    pub fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .chain()
            .flat_map(|s| {
                let mut level: Vec<String> = s.vars.read().keys().cloned().collect();
                level.extend(s.templates.read().keys().cloned());
                level
            })
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// A frozen copy of the whole chain. Later writes to the live scopes are
    /// not seen by the copy, except for template lookups that miss.
    pub fn snapshot(self: &Arc<Self>) -> Arc<Scope> {
        Arc::new(Scope {
            kind: self.kind,
            parent: self.parent.as_ref().map(Scope::snapshot),
            vars: RwLock::new(self.vars.read().clone()),
            templates: RwLock::new(self.templates.read().clone()),
            permissive: AtomicBool::new(self.permissive.load(Ordering::Relaxed)),
            path: self.path.clone(),
            snapshot_of: Some(Arc::downgrade(self)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(n: i64) -> Variable {
        Variable::new(Value::Int(n), None)
    }

    #[test]
    fn lookup_returns_nearest_definition() {
        let file = Scope::file(None);
        file.set_var("x", var(1)).unwrap();
        let inner = Scope::sub(&Scope::branch(&file));
        assert_eq!(inner.get_var("x").unwrap().value, Value::Int(1));

        inner.set_var("x", var(2)).unwrap();
        assert_eq!(inner.get_var("x").unwrap().value, Value::Int(2));
        assert_eq!(file.get_var("x").unwrap().value, Value::Int(1));
    }

    #[test]
    fn exports_pass_through_branches() {
        let file = Scope::file(None);
        let branch = Scope::branch(&Scope::branch(&file));
        branch.set_var("x", var(1).exported(true)).unwrap();
        assert!(file.has_var("x"));

        branch.set_var("y", var(1)).unwrap();
        assert!(!file.has_var("y"));
    }

    #[test]
    fn exports_from_sub_scopes_are_rejected() {
        let file = Scope::file(None);
        let sub = Scope::sub(&file);
        let err = sub.set_var("x", var(1).exported(true)).unwrap_err();
        assert!(matches!(err.kind, ErrorKind::ExportFromScope(_)));

        let nested = Scope::branch(&sub);
        assert!(nested.set_var("x", var(1).exported(true)).is_err());
    }

    #[test]
    fn underscore_is_discarded() {
        let file = Scope::file(None);
        file.set_var("_", var(1)).unwrap();
        assert!(!file.has_var("_"));
    }

    #[test]
    fn snapshots_freeze_variables_and_forward_exports() {
        let file = Scope::file(None);
        file.set_var("x", var(1)).unwrap();
        let snap = file.snapshot();
        file.set_var("x", var(2)).unwrap();
        assert_eq!(snap.get_var("x").unwrap().value, Value::Int(1));

        Scope::branch(&snap)
            .set_var("y", var(3).exported(true))
            .unwrap();
        assert_eq!(file.get_var("y").unwrap().value, Value::Int(3));
    }

    #[test]
    fn permissive_flag_lives_at_the_root() {
        let file = Scope::file(None);
        let sub = Scope::sub(&file);
        sub.set_permissive(true);
        assert!(file.permissive());
        assert!(Scope::branch(&sub).permissive());
    }
}
