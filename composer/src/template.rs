//! Template definitions and their expansion.
//!
//! A call `<card title="Hi">...</card>` runs in three steps. The caller's
//! children are turned into operations on a fresh template proxy node:
//! `append`/`replace` children target a named block, everything else is
//! queued for the `default` block. The template body is then expanded against
//! that proxy, either by calling the template it extends (the body becoming
//! that call's children) or by building the output tag it extends. Finally,
//! every operation pushed onto the proxy must have found its block.

use std::collections::HashMap;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, trace};
use weft::tag::{AttrValue, Attribute, Param, Tag};

use crate::build::{self, TreeSpec};
use crate::compiler::CompileContext;
use crate::directives;
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::html;
use crate::node::{Node, NodeType};
use crate::operation::{Batch, Operation, OperationKind};
use crate::scope::{Scope, Variable};
use crate::value::{Lazy, Value};

/// Suffix of a call attribute that is set on the produced tag even when the
/// template doesn't declare it.
pub const FORCE_MARKER: char = '!';

#[derive(Debug, Clone)]
pub struct Template {
    pub name: String,
    /// A template or output tag name.
    pub extends: String,
    /// Frozen copy of the defining scope.
    pub scope: Arc<Scope>,
    pub params: Vec<Param>,
    /// Attributes passed on to `extends`, evaluated per call.
    pub super_attrs: Vec<Param>,
    pub body: Arc<[Tag]>,
    pub imported: bool,
    pub exported: bool,
    pub is_final: bool,
    pub origin: Location,
}

impl Template {
    fn declares(&self, name: &str) -> bool {
        self.params.iter().any(|p| p.name == name)
    }

    fn param_names(&self) -> String {
        let names: Vec<&str> = self.params.iter().map(|p| p.name.as_str()).collect();
        names.join(", ")
    }
}

fn param_list<'t>(attr: &'t Attribute, file_id: usize) -> Result<&'t [Param]> {
    match &attr.value {
        AttrValue::Params(params) => Ok(params),
        _ => Err(CompileError::new(ErrorKind::Structure(format!(
            "`{}` expects a parameter list like `(a, b = 1)`",
            attr.name
        )))
        .at(&Location::new(file_id, attr.span.clone()))),
    }
}

fn validate_name(cx: &CompileContext, name: &str, at: &Location) -> Result<()> {
    let reason = if name.contains('.') {
        "can't contain namespace separator '.'"
    } else if directives::is_reserved(name) {
        "is already a directive"
    } else if html::is_html_tag(name) && !cx.options().allow_aliasing {
        "is already a tag"
    } else {
        return Ok(());
    };
    Err(CompileError::new(ErrorKind::InvalidTemplateName {
        name: name.to_string(),
        reason: reason.to_string(),
    })
    .at(at))
}

fn assert_defaults_last(params: &[Param], file_id: usize) -> Result<()> {
    let mut defaulted: Option<&Param> = None;
    for param in params {
        match (&param.default, defaulted) {
            (Some(_), _) => defaulted = Some(param),
            (None, Some(prev)) => {
                return Err(CompileError::custom("defaults must come last")
                    .at(&Location::new(file_id, prev.span.clone()))
                    .with_note_at(
                        format!("`{}` has no default", param.name),
                        &Location::new(file_id, param.span.clone()),
                    ));
            }
            (None, None) => {}
        }
    }
    Ok(())
}

/// The `template` directive: register a definition in `scope`.
pub fn define(cx: &CompileContext, scope: &Arc<Scope>, tag: &Tag) -> Result<()> {
    let file_id = tag.file_id();
    let at = Location::new(file_id, tag.head_span());
    let attr_scope = Scope::sub(scope);
    let ev = Evaluator::new(cx, &attr_scope, file_id);

    let mut name = None;
    let mut extends = None;
    let mut params: &[Param] = &[];
    let mut super_attrs: &[Param] = &[];
    let mut exported = false;
    let mut is_final = false;

    for attr in &tag.attributes {
        let here = Location::new(file_id, attr.span.clone());
        match attr.name.as_str() {
            "name" => {
                let text = attr.as_plain_text().ok_or_else(|| {
                    CompileError::custom("template name must be a plain string").at(&here)
                })?;
                name = Some((text.to_string(), here));
            }
            "extends" => match ev.eval_attribute(attr)? {
                Value::String(s) => extends = Some(s),
                other => {
                    return Err(crate::error::type_error("string", other.type_name()).at(&here));
                }
            },
            "args" => params = param_list(attr, file_id)?,
            "super" => super_attrs = param_list(attr, file_id)?,
            "export" => exported = ev.eval_attribute(attr)?.as_condition(false)?,
            ".final" => is_final = ev.eval_attribute(attr)?.as_condition(false)?,
            other => {
                return Err(CompileError::new(ErrorKind::UnexpectedAttribute {
                    tag: "template".into(),
                    attr: other.to_string(),
                })
                .at(&here));
            }
        }
    }

    let Some((name, name_at)) = name else {
        return Err(CompileError::custom("<template> needs a `name`").at(&at));
    };
    let Some(extends) = extends else {
        return Err(CompileError::custom("<template> needs an `extends`").at(&at));
    };
    validate_name(cx, &name, &name_at)?;
    assert_defaults_last(params, file_id)?;
    if extends == name {
        return Err(CompileError::custom(format!("<{}> can't extend itself", name)).at(&at));
    }

    debug!(template = %name, %extends, exported, "defined template");
    let template = Template {
        name: name.clone(),
        extends,
        scope: scope.snapshot(),
        params: params.to_vec(),
        super_attrs: super_attrs.to_vec(),
        body: tag.children.clone(),
        imported: false,
        exported,
        is_final,
        origin: at,
    };
    scope
        .set_template(&name, Arc::new(template))
        .map_err(|e| e.or_at(&name_at))
}

/// Expand a call of a user template written as `tag`.
pub fn build_template(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    node: &Node<'_>,
    tag: &Tag,
) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    let template = scope
        .get_template(&tag.name)
        .ok_or_else(|| CompileError::new(ErrorKind::UndefinedTemplate(tag.name.clone())).at(&at))?;

    let attr_scope = Scope::sub(scope);
    let attrs = Evaluator::new(cx, &attr_scope, tag.file_id()).eval_attributes(tag)?;
    build_template_with(cx, &attr_scope, node, &template, attrs, &tag.children, &at)
}

/// Expand `template` with evaluated call attributes and unexpanded caller
/// children closing over `scope`.
pub fn build_template_with(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    node: &Node<'_>,
    template: &Template,
    attrs: IndexMap<String, Value>,
    children: &Arc<[Tag]>,
    at: &Location,
) -> Result<()> {
    let tnode = prepare_operations(cx, scope, node, children)?;
    instantiate(cx, template, &tnode, attrs, at)?;
    tnode.assert_all_operations_done(at)
}

fn auto_vars(scope: &Arc<Scope>, node: &Node<'_>) -> Result<()> {
    let count = |n: usize| Value::Int(n as i64);
    scope.set_var("__idx__", Variable::auto(count(node.raw_count())))?;
    scope.set_var("__fidx__", Variable::auto(count(node.folded_count())))?;
    scope.set_var(
        "__nchildren__",
        Variable::auto(Value::Lazy(Lazy::new(|tag| Ok(Value::Int(tag.child_count() as i64))))),
    )?;
    scope.set_var(
        "__nsiblings__",
        Variable::auto(Value::Lazy(Lazy::new(|tag| Ok(Value::Int(tag.sibling_count() as i64))))),
    )?;
    scope.set_var(
        "__index__",
        Variable::auto(Value::Lazy(Lazy::new(|tag| Ok(Value::Int(tag.index() as i64))))),
    )?;
    scope.set_var("__pstyle__", Variable::auto(Value::ParentStyle(node.style_handle())))
}

fn arg_var(value: Value, at: &Location) -> Variable {
    Variable {
        auto: true,
        ..Variable::new(value, Some(at.clone())).constant()
    }
}

/// Bind `args` and expand the body of `template` against the proxy `node`.
pub fn instantiate(
    cx: &CompileContext,
    template: &Template,
    node: &Node<'_>,
    args: IndexMap<String, Value>,
    at: &Location,
) -> Result<()> {
    debug!(template = %template.name, extends = %template.extends, "instantiating");
    let scope = Scope::branch(&template.scope);
    auto_vars(&scope, node)?;

    let mut forced = Vec::new();
    for (key, value) in &args {
        let (name, force) = match key.strip_suffix(FORCE_MARKER) {
            Some(name) => (name, true),
            None => (key.as_str(), false),
        };
        if force {
            forced.push((name.to_string(), value.clone()));
        }
        if template.declares(name) {
            scope.set_var(name, arg_var(value.clone(), at))?;
        } else if !force {
            return Err(CompileError::new(ErrorKind::UnknownArgument {
                template: template.name.clone(),
                attr: key.clone(),
            })
            .at(at)
            .with_note(format!(
                "available args for <{}>: {}",
                template.name,
                template.param_names()
            )));
        }
    }

    let supplied = |name: &str| args.contains_key(name) || args.contains_key(&format!("{}{}", name, FORCE_MARKER));
    for param in &template.params {
        if param.default.is_none() && !supplied(&param.name) {
            return Err(CompileError::new(ErrorKind::MissingArgument {
                template: template.name.clone(),
                arg: param.name.clone(),
            })
            .at(at)
            .with_note_at("declared here", &template.origin));
        }
    }

    let ev = Evaluator::new(cx, &scope, template.origin.file_id);
    for param in &template.params {
        if let (Some(default), false) = (&param.default, supplied(&param.name)) {
            let value = ev.eval(default)?;
            scope.set_var(&param.name, arg_var(value, &template.origin))?;
        }
    }
    let super_attrs = ev.eval_params(&template.super_attrs)?;

    match scope.get_template(&template.extends) {
        Some(parent) => {
            if parent.is_final {
                return Err(CompileError::new(ErrorKind::ExtendsFinal(parent.name.clone()))
                    .at(&template.origin)
                    .with_note_at("declared final here", &parent.origin));
            }
            build_template_with(
                cx,
                &scope,
                node,
                &parent,
                super_attrs,
                &template.body,
                &template.origin,
            )?;
        }
        None => {
            let node_type = if template.extends == "svg" {
                NodeType::Svg
            } else {
                node.node_type()
            };
            let tnode = prepare_operations(cx, &scope, node, &template.body)?;
            build::build_tree(
                cx,
                &Scope::branch(&scope),
                &tnode,
                TreeSpec {
                    name: &template.extends,
                    node_type,
                    attributes: super_attrs,
                    children: &[],
                    op: Some("default"),
                    origin: template.origin.clone(),
                },
            )?;
            tnode.assert_all_operations_done(&template.origin)?;
        }
    }

    if let Some(child) = node.last_child() {
        for (key, value) in forced {
            node.set_attribute(child, &key, value);
        }
    }
    Ok(())
}

/// Turn `tags` into operations on a new proxy below `node`. `append` and
/// `replace` target their block, everything else goes to `default`.
fn prepare_operations<'n>(
    cx: &CompileContext,
    scope: &Arc<Scope>,
    node: &'n Node<'n>,
    tags: &Arc<[Tag]>,
) -> Result<Node<'n>> {
    let tnode = node.template();
    prepare_blocks(cx, &tnode, tags, &mut HashMap::new())?;

    let prep = Scope::branch(scope);
    for (i, tag) in tags.iter().enumerate() {
        let origin = Some(Location::new(tag.file_id(), tag.head_span()));
        let kind = match tag.name.as_str() {
            _ if tag.is_text() => None,
            "append" => Some(OperationKind::Append),
            "replace" => Some(OperationKind::Replace),
            _ => None,
        };
        match kind {
            Some(kind) => {
                let target = directives::single_name_attr(tag, "target")?;
                let batch = Batch::whole(tag.children.clone(), Scope::branch(&prep));
                tnode.push_op(Operation::new(target, kind, batch, origin))?;
            }
            None => {
                let batch = Batch::new(tags.clone(), i..i + 1, prep.clone());
                tnode.append_to_default(batch, origin)?;
            }
        }
    }
    Ok(tnode)
}

/// Give every block in `tags` its operation target. A block whose name has a
/// pending operation gets that operation under a fresh name, so that blocks of
/// the same name in other expansions can't take it.
fn prepare_blocks(
    cx: &CompileContext,
    tnode: &Node<'_>,
    tags: &[Tag],
    renamed: &mut HashMap<String, String>,
) -> Result<()> {
    for tag in tags.iter().filter(|t| !t.is_text()) {
        match tag.name.as_str() {
            "var" | "template" => {}
            "block" => {
                if tnode.block_target(tag.id).is_none() {
                    let name = directives::single_name_attr(tag, "name")?;
                    match tnode.pop_op(&name) {
                        Some(mut op) => {
                            let fresh = cx.unique_name(&name);
                            trace!(block = %name, renamed = %fresh, "renamed operation");
                            renamed.insert(name, fresh.clone());
                            op.target = fresh.clone();
                            tnode.push_op(op)?;
                            tnode.set_block_target(tag.id, fresh);
                        }
                        None => {
                            let target = renamed.get(&name).cloned().unwrap_or(name);
                            tnode.set_block_target(tag.id, target);
                        }
                    }
                }
                prepare_blocks(cx, tnode, &tag.children, renamed)?;
            }
            _ => prepare_blocks(cx, tnode, &tag.children, renamed)?,
        }
    }
    Ok(())
}
