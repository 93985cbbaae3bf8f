use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use composer::{CompileError, CompileOptions, Compiled, Compiler, ErrorKind, FileCache};
use pretty_assertions::assert_eq;
use tempfile::TempDir;

const LIB: &str = r#"<var greeting={"hi"} export/>
<var secret={1}/>
<template name="badge" extends="span" export>B</template>
<p>not built when imported</p>"#;

fn project(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (name, source) in files {
        let path = dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, source).unwrap();
    }
    dir
}

fn path_in(dir: &TempDir, name: &str) -> PathBuf {
    fs::canonicalize(dir.path().join(name)).unwrap()
}

fn try_build(dir: &TempDir, name: &str) -> Result<Compiled, CompileError> {
    Compiler::new(CompileOptions::default()).compile_file(dir.path().join(name))
}

fn render(dir: &TempDir, name: &str) -> String {
    match try_build(dir, name) {
        Ok(compiled) => compiled.render(),
        Err(err) => panic!("compile failed: {err} ({:?})", err.notes),
    }
}

fn error(dir: &TempDir, name: &str) -> CompileError {
    match try_build(dir, name) {
        Ok(compiled) => panic!("expected an error, got {}", compiled.render()),
        Err(err) => err,
    }
}

#[test]
fn import_named_entries_with_aliases() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("main.weft", r#"<import from="./lib" names=(greeting, badge = tag)/><p>{greeting}</p><tag/>"#),
    ]);
    assert_eq!(render(&dir, "main.weft"), "<p>hi</p><span>B</span>");
}

#[test]
fn import_everything_into_a_namespace() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("main.weft", r#"<import from="./lib.weft" names="ui.*"/><p>{ui.greeting}</p><ui.badge/>"#),
    ]);
    assert_eq!(render(&dir, "main.weft"), "<p>hi</p><span>B</span>");
}

#[test]
fn private_and_missing_names() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("private.weft", r#"<import from="./lib" names=(secret)/>"#),
        ("missing.weft", r#"<import from="./lib" names=(nothing)/>"#),
        ("nofile.weft", r#"<import from="./nope" names="*"/>"#),
    ]);
    assert!(matches!(
        error(&dir, "private.weft").kind,
        ErrorKind::NotExported { ref name, .. } if name == "secret"
    ));
    assert!(matches!(
        error(&dir, "missing.weft").kind,
        ErrorKind::NotFoundInModule { ref name, .. } if name == "nothing"
    ));
    assert!(matches!(error(&dir, "nofile.weft").kind, ErrorKind::FileNotFound(_)));
}

#[test]
fn export_re_exports_imported_entries() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("mid.weft", r#"<export from="./lib" names=(greeting)/>"#),
        ("main.weft", r#"<import from="./mid" names=(greeting)/><p>{greeting}</p>"#),
    ]);
    assert_eq!(render(&dir, "main.weft"), "<p>hi</p>");
}

#[test]
fn circular_imports_see_the_partial_scope() {
    let dir = project(&[
        (
            "a.weft",
            r#"<import from="./b" names=(greet)/><var name={"a"} export/><p>{greet}</p>"#,
        ),
        ("b.weft", r#"<import from="./a" names="*"/><var greet={"hi"} export/>"#),
    ]);
    let compiled = match try_build(&dir, "a.weft") {
        Ok(compiled) => compiled,
        Err(err) => panic!("compile failed: {err}"),
    };
    assert_eq!(compiled.render(), "<p>hi</p>");
    assert_eq!(
        compiled.dependencies.dependencies(&path_in(&dir, "a.weft")),
        vec![path_in(&dir, "b.weft")]
    );
}

#[test]
fn file_parameters_are_part_of_the_cache_key() {
    let part = r#"<parameters args=(color, size = 2)/><var label={color} export/><var big={size} export/>"#;
    let dir = project(&[
        ("part.weft", part),
        (
            "main.weft",
            r#"<import from="./part" names=(label = a, big) parameters=(color = "red")/>
            <import from="./part" names=(label = b) parameters=(color = "blue", size = 3)/>
            <p>{a} {b} {big}</p>"#,
        ),
        ("unbound.weft", r#"<import from="./part" names=(label)/>"#),
        ("unknown.weft", r#"<import from="./part" names=(label) parameters=(color = "red", shade = 1)/>"#),
    ]);
    assert_eq!(render(&dir, "main.weft"), "<p>red blue 2</p>");
    assert!(matches!(
        error(&dir, "unbound.weft").kind,
        ErrorKind::MissingArgument { ref arg, .. } if arg == "color"
    ));
    assert!(matches!(
        error(&dir, "unknown.weft").kind,
        ErrorKind::UnknownArgument { ref attr, .. } if attr == "shade"
    ));
}

#[test]
fn parameters_need_a_declaration() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("main.weft", r#"<import from="./lib" names="*" parameters=(x = 1)/>"#),
    ]);
    assert!(matches!(error(&dir, "main.weft").kind, ErrorKind::ParametersNotAccepted(_)));
}

#[test]
fn template_paths_resolve_bare_imports() {
    let dir = project(&[
        ("shared/lib.weft", LIB),
        ("site/main.weft", r#"<import from="lib" names=(greeting)/><p>{greeting}</p>"#),
    ]);
    let options = CompileOptions {
        template_paths: vec![dir.path().join("shared")],
        ..CompileOptions::default()
    };
    let compiled = Compiler::new(options).compile_file(dir.path().join("site/main.weft"));
    assert_eq!(compiled.map(|c| c.render()).ok(), Some("<p>hi</p>".to_string()));
}

#[test]
fn dynamic_import_of_single_values() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("main.weft", r#"<p>{import("./lib", "greeting")}</p>"#),
        ("self.weft", r#"<p>{import(".", "x")}</p>"#),
        ("template.weft", r#"<p>{import("./lib", "badge")}</p>"#),
    ]);
    assert_eq!(render(&dir, "main.weft"), "<p>hi</p>");
    assert!(error(&dir, "self.weft").to_string().contains("from self"));
    assert!(error(&dir, "template.weft").to_string().contains("it is a template"));
}

#[test]
fn url_registry() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("main.weft", r#"<a href={url()}>home</a><a href={url("./lib.weft")}>lib</a>"#),
    ]);
    let mut options = CompileOptions::default();
    options.urls.insert(path_in(&dir, "main.weft"), "/index.html".into());
    options.urls.insert(path_in(&dir, "lib.weft"), "/lib.html".into());

    let compiled = Compiler::new(options).compile_file(dir.path().join("main.weft"));
    assert_eq!(
        compiled.map(|c| c.render()).ok(),
        Some(r#"<a href="/index.html">home</a><a href="/lib.html">lib</a>"#.to_string())
    );
}

#[test]
fn shared_cache_builds_each_import_once() {
    let dir = project(&[
        ("lib.weft", LIB),
        ("one.weft", r#"<import from="./lib" names=(greeting)/><p>{greeting}</p>"#),
        ("two.weft", r#"<import from="./lib" names=(greeting)/><p>{greeting}!</p>"#),
    ]);
    let cache = Arc::new(FileCache::new());
    let compiler = Compiler::new(CompileOptions::default()).with_cache(cache.clone());
    let one = compiler.compile_file(dir.path().join("one.weft")).map(|c| c.render());
    let two = compiler.compile_file(dir.path().join("two.weft")).map(|c| c.render());
    assert_eq!(one.ok(), Some("<p>hi</p>".to_string()));
    assert_eq!(two.ok(), Some("<p>hi!</p>".to_string()));

    let lib = path_in(&dir, "lib.weft");
    assert_eq!(cache.list().len(), 3);
    assert!(cache.is_cached(&FileCache::key(&lib, None)));

    cache.remove(&[lib.clone()]);
    assert!(!cache.is_cached(&FileCache::key(&lib, None)));
    cache.clear();
    assert!(cache.list().is_empty());
}

#[test]
fn parse_errors_in_imports_are_wrapped() {
    let dir = project(&[
        ("broken.weft", "<div>"),
        ("main.weft", r#"<import from="./broken" names="*"/>"#),
    ]);
    let err = error(&dir, "main.weft");
    assert!(matches!(err.kind, ErrorKind::Parse { count: 1, .. }));
    assert!(!err.to_diagnostics().is_empty());
}

#[test]
fn non_root_files_only_run_directives() {
    let dir = project(&[("lib.weft", LIB), ("main.weft", r#"<import from="./lib" names="*"/>"#)]);
    assert_eq!(render(&dir, "main.weft"), "");
}
