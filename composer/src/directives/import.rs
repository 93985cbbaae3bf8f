//! `import` and `export`: copy entries of another file's scope into this one.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;
use weft::expr::Expr;
use weft::tag::{AttrValue, Attribute, Tag};

use super::{attr_location, flag_attr, string_attr, unexpected};
use crate::compiler::{CompileContext, FileSource};
use crate::error::{CompileError, ErrorKind, Location, Result};
use crate::evaluator::Evaluator;
use crate::scope::{Scope, Variable};
use crate::template::Template;
use crate::value::Value;

/// Which entries to copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Names {
    /// Every exported entry, renamed with `prefix` (`""` or `"ns."`).
    All { prefix: String },
    /// `(name, alias)` pairs.
    List(Vec<(String, String)>),
}

fn names_of(tag: &Tag, attr: &Attribute) -> Result<Names> {
    let here = attr_location(tag, attr);
    let bad = || CompileError::custom("expected `names=(a, b = alias)`, `names=\"*\"` or `names=\"ns.*\"`").at(&here);
    match &attr.value {
        AttrValue::Params(params) => params
            .iter()
            .map(|p| {
                let alias = match &p.default {
                    None => p.name.clone(),
                    Some(Expr::Ident(alias, _)) => alias.clone(),
                    Some(_) => {
                        return Err(CompileError::custom("an import alias must be a plain name")
                            .at(&Location::new(tag.file_id(), p.span.clone())));
                    }
                };
                Ok((p.name.clone(), alias))
            })
            .collect::<Result<_>>()
            .map(Names::List),
        AttrValue::Text(text) => match text.as_literal() {
            Some("*") => Ok(Names::All { prefix: String::new() }),
            Some(ns) if ns.ends_with(".*") && ns.len() > 2 => Ok(Names::All {
                prefix: ns[..ns.len() - 1].to_string(),
            }),
            Some(list) if !list.trim().is_empty() => Ok(Names::List(
                list.split(',')
                    .map(str::trim)
                    .filter(|n| !n.is_empty())
                    .map(|n| (n.to_string(), n.to_string()))
                    .collect(),
            )),
            _ => Err(bad()),
        },
        _ => Err(bad()),
    }
}

/// `<import from=".." names=..>` and `<export ...>` with the same attributes.
pub fn build(cx: &CompileContext, scope: &Arc<Scope>, tag: &Tag, export: bool) -> Result<()> {
    let at = Location::new(tag.file_id(), tag.head_span());
    if !tag.children.is_empty() {
        return Err(CompileError::custom(format!("<{}> can't have children", tag.name)).at(&at));
    }

    let attr_scope = Scope::sub(scope);
    let ev = Evaluator::new(cx, &attr_scope, tag.file_id());
    let mut from = None;
    let mut names = None;
    let mut params: Option<IndexMap<String, Value>> = None;
    let mut dynamic = false;
    for attr in &tag.attributes {
        match attr.name.as_str() {
            "from" => from = Some(string_attr(&ev, tag, attr)?),
            "names" => names = Some(names_of(tag, attr)?),
            "parameters" => match &attr.value {
                AttrValue::Params(list) => params = Some(ev.eval_params(list)?),
                _ => {
                    return Err(CompileError::custom("`parameters` expects a parameter list")
                        .at(&attr_location(tag, attr)));
                }
            },
            ".dynamic" => dynamic = flag_attr(&ev, tag, attr)?,
            _ => return Err(unexpected(tag, attr)),
        }
    }
    let Some(from) = from else {
        return Err(CompileError::custom(format!("<{}> needs a `from`", tag.name)).at(&at));
    };
    let Some(names) = names else {
        return Err(CompileError::custom(format!("<{}> needs `names`", tag.name)).at(&at));
    };

    let path = cx.resolve_path(scope, &from).map_err(|e| e.at(&at))?;
    debug!(from = %path.display(), export, dynamic, "importing");
    let entry = cx
        .build_file(FileSource::Path(path.clone()), false, params.as_ref())
        .map_err(|e| e.or_at(&at))?;
    if let Some(this) = scope.path() {
        cx.add_dependency(this, &path, dynamic);
    }

    sync(scope, &entry.scope, &names, export, &from).map_err(|e| e.or_at(&at))
}

/// Copy the exported entries selected by `names` from `src` into `dst`.
/// Imported copies are private to `dst`; exported ones are exported again.
pub fn sync(dst: &Arc<Scope>, src: &Scope, names: &Names, export: bool, module: &str) -> Result<()> {
    match names {
        Names::All { prefix } => {
            for (name, var) in src.variables() {
                if !var.auto && var.exported {
                    copy_var(dst, &format!("{}{}", prefix, name), var, export)?;
                }
            }
            for (name, template) in src.templates() {
                if template.exported {
                    copy_template(dst, &format!("{}{}", prefix, name), &template, export)?;
                }
            }
        }
        Names::List(pairs) => {
            for (name, alias) in pairs {
                let not_exported = || {
                    CompileError::new(ErrorKind::NotExported {
                        name: name.clone(),
                        module: module.to_string(),
                    })
                };
                if let Some(var) = src.local_var(name).filter(|v| !v.auto) {
                    if !var.exported {
                        return Err(not_exported());
                    }
                    copy_var(dst, alias, var, export)?;
                } else if let Some(template) = src.local_template(name) {
                    if !template.exported {
                        return Err(not_exported());
                    }
                    copy_template(dst, alias, &template, export)?;
                } else {
                    return Err(ErrorKind::NotFoundInModule {
                        name: name.clone(),
                        module: module.to_string(),
                    }
                    .into());
                }
            }
        }
    }
    Ok(())
}

fn copy_var(dst: &Arc<Scope>, name: &str, var: Variable, export: bool) -> Result<()> {
    if let Some(prev) = dst.get_var(name) {
        if prev.origin != var.origin {
            let err = CompileError::new(ErrorKind::Redefinition(name.to_string()));
            return Err(match &prev.origin {
                Some(origin) => err.with_note_at("defined here", origin),
                None => err,
            });
        }
    }
    let copy = Variable {
        imported: !export,
        exported: export,
        ..var
    };
    dst.set_var(name, copy)
}

fn copy_template(dst: &Arc<Scope>, name: &str, template: &Template, export: bool) -> Result<()> {
    let copy = Template {
        name: name.to_string(),
        imported: !export,
        exported: export,
        ..template.clone()
    };
    dst.set_template(name, Arc::new(copy))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft::parser::Parser;

    fn names(src: &str) -> Result<Names> {
        let doc = Parser::new(src, 0).parse().unwrap();
        let tag = &doc.tags[0];
        names_of(tag, tag.attribute("names").unwrap())
    }

    #[test]
    fn name_forms() {
        assert_eq!(
            names(r#"<import names="*"/>"#).unwrap(),
            Names::All { prefix: String::new() }
        );
        assert_eq!(
            names(r#"<import names="ui.*"/>"#).unwrap(),
            Names::All { prefix: "ui.".into() }
        );
        assert_eq!(
            names("<import names=(a, b = c)/>").unwrap(),
            Names::List(vec![("a".into(), "a".into()), ("b".into(), "c".into())])
        );
        assert!(names(r#"<import names=""/>"#).is_err());
    }

    #[test]
    fn sync_copies_only_exported_entries() {
        let src = Scope::file(None);
        src.set_var("a", Variable::new(Value::Int(1), None).exported(true)).unwrap();
        src.set_var("hidden", Variable::new(Value::Int(2), None)).unwrap();
        let dst = Scope::file(None);

        sync(&dst, &src, &Names::All { prefix: "m.".into() }, false, "m").unwrap();
        let a = dst.get_var("m.a").unwrap();
        assert!(a.imported && !a.exported);
        assert!(!dst.has_var("m.hidden"));

        let err = sync(&dst, &src, &Names::List(vec![("hidden".into(), "h".into())]), false, "m")
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotExported { .. }));
        let err = sync(&dst, &src, &Names::List(vec![("nope".into(), "n".into())]), false, "m")
            .unwrap_err();
        assert!(matches!(err.kind, ErrorKind::NotFoundInModule { .. }));
    }
}
