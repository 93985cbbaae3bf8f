use composer::{CompileError, CompileOptions, Compiled, ErrorKind, compile_source};
use pretty_assertions::assert_eq;

fn try_compile(src: &str) -> Result<Compiled, CompileError> {
    compile_source("test.weft", src, &CompileOptions::default())
}

fn compile(src: &str) -> Compiled {
    match try_compile(src) {
        Ok(compiled) => compiled,
        Err(err) => panic!("compile failed: {err} ({:?})", err.notes),
    }
}

fn text(src: &str) -> String {
    compile(src).text_content()
}

fn render(src: &str) -> String {
    compile(src).render()
}

fn error(src: &str) -> CompileError {
    match try_compile(src) {
        Ok(compiled) => panic!("expected an error, got {}", compiled.render()),
        Err(err) => err,
    }
}

const CARD: &str = r#"<template name="card" extends="div" args=(title)><h2>{title}</h2><block name="body">default text</block></template>"#;

#[test]
fn plain_markup_renders() {
    assert_eq!(
        render(r#"<div class="a"><p>hi &amp; bye</p><br></div>"#),
        r#"<div class="a"><p>hi &amp;amp; bye</p><br></div>"#
    );
}

#[test]
fn block_keeps_default_content() {
    let src = format!(r#"{CARD}<card title="T"/>"#);
    assert_eq!(render(&src), "<div><h2>T</h2>default text</div>");
}

#[test]
fn append_goes_after_block_content() {
    let src = format!(r#"{CARD}<card title="T"><append target="body">extra</append></card>"#);
    assert_eq!(text(&src), "T default text extra");
}

#[test]
fn replace_drops_block_content() {
    let src = format!(r#"{CARD}<card title="T"><replace target="body">only</replace></card>"#);
    assert_eq!(text(&src), "T only");
}

#[test]
fn plain_children_go_to_the_default_operation() {
    let src = format!(r#"{CARD}<card title="T"><p>more</p></card>"#);
    assert_eq!(
        render(&src),
        "<div><h2>T</h2>default text<p>more</p></div>"
    );
}

#[test]
fn later_replace_wins_over_earlier_append() {
    let src = format!(
        r#"{CARD}<card title="T"><append target="body">a</append><replace target="body">r</replace></card>"#
    );
    assert_eq!(text(&src), "T r");
}

#[test]
fn appends_concatenate_in_order() {
    let src = format!(
        r#"{CARD}<card title="T"><append target="body">a</append><append target="body">b</append></card>"#
    );
    assert_eq!(text(&src), "T default text a b");
}

#[test]
fn unapplied_operation_is_an_error() {
    let src = format!(r#"{CARD}<card title="T"><append target="nope">x</append></card>"#);
    let err = error(&src);
    assert!(matches!(err.kind, ErrorKind::UnappliedOperation(ref t) if t == "nope"));
}

#[test]
fn operations_reach_blocks_through_extends_chains() {
    let src = format!(
        r#"{CARD}
        <template name="fancy" extends="card" super=(title = "F")>
            <append target="body">fancy</append>
        </template>
        <fancy><append target="body">caller</append></fancy>"#
    );
    assert_eq!(text(&src), "F default text fancy caller");
}

const LOOP_LIST: &str = r#"<template name="lst" extends="ul"><for in={[1, 2]} iname="i"><li><block name="b">d{i}</block></li></for></template>"#;

#[test]
fn a_block_in_a_loop_takes_its_operation_once() {
    let src = format!(r#"{LOOP_LIST}<lst><append target="b">X</append></lst>"#);
    assert_eq!(render(&src), "<ul><li>d1X</li><li>d2</li></ul>");

    let src = format!(r#"{LOOP_LIST}<lst><replace target="b">R</replace></lst>"#);
    assert_eq!(render(&src), "<ul><li>R</li><li>d2</li></ul>");

    let src = format!("{LOOP_LIST}<lst/>");
    assert_eq!(render(&src), "<ul><li>d1</li><li>d2</li></ul>");
}

#[test]
fn each_expansion_gets_its_own_operations() {
    let src = format!(
        r#"{CARD}<section><card title="1"><replace target="body">a</replace></card><card title="2"/></section>"#
    );
    assert_eq!(text(&src), "1 a 2 default text");
}

#[test]
fn missing_argument_is_reported() {
    let err = error(&format!("{CARD}<card/>"));
    assert!(matches!(
        err.kind,
        ErrorKind::MissingArgument { ref template, ref arg } if template == "card" && arg == "title"
    ));
    assert!(err.notes.iter().any(|n| n.message == "declared here"));
}

#[test]
fn unknown_argument_lists_the_declared_ones() {
    let err = error(&format!(r#"{CARD}<card title="a" size="2"/>"#));
    assert!(matches!(err.kind, ErrorKind::UnknownArgument { ref attr, .. } if attr == "size"));
    assert!(err.notes.iter().any(|n| n.message == "available args for <card>: title"));
}

#[test]
fn defaults_see_earlier_arguments() {
    let src = r#"<template name="pair" extends="p" args=(a, b = a + 1)>{a}-{b}</template><pair a={1}/><pair a={1} b={5}/>"#;
    assert_eq!(text(src), "1-2 1-5");
}

#[test]
fn defaults_must_come_last() {
    let err = error(r#"<template name="bad" extends="p" args=(a = 1, b)/>"#);
    assert!(err.to_string().contains("defaults must come last"));
}

#[test]
fn forced_attributes_override_the_template() {
    let src = r#"<template name="btn" extends="span" super=(class = "btn")/><btn class!="big" data-x!="1"/>"#;
    assert_eq!(render(src), r#"<span class="big" data-x="1"></span>"#);
}

#[test]
fn final_templates_cannot_be_extended() {
    let src = r#"<template name="base-box" extends="div" .final/>
        <template name="child-box" extends="base-box"/>
        <child-box/>"#;
    let err = error(src);
    assert!(matches!(err.kind, ErrorKind::ExtendsFinal(ref n) if n == "base-box"));
}

#[test]
fn template_names_are_validated() {
    let err = error(r#"<template name="div" extends="p"/>"#);
    assert!(matches!(err.kind, ErrorKind::InvalidTemplateName { .. }));
    let err = error(r#"<template name="for" extends="p"/>"#);
    assert!(matches!(err.kind, ErrorKind::InvalidTemplateName { .. }));
    let err = error(r#"<template name="ui.box" extends="p"/>"#);
    assert!(matches!(err.kind, ErrorKind::InvalidTemplateName { .. }));
}

#[test]
fn aliasing_allows_tag_names() {
    let options = CompileOptions {
        allow_aliasing: true,
        ..CompileOptions::default()
    };
    let compiled = compile_source(
        "test.weft",
        r#"<template name="em" extends="strong"/><em>x</em>"#,
        &options,
    );
    assert_eq!(compiled.map(|c| c.render()).ok(), Some("<strong>x</strong>".to_string()));
}

#[test]
fn duplicate_template_is_an_error_but_shadowing_is_not() {
    let err = error(r#"<template name="x-a" extends="p"/><template name="x-a" extends="div"/>"#);
    assert!(matches!(err.kind, ErrorKind::Redefinition(ref n) if n == "x-a"));

    let src = r#"<template name="x-a" extends="p">outer</template>
        <div><template name="x-a" extends="span">inner</template><x-a/></div>
        <x-a/>"#;
    assert_eq!(render(src), "<div><span>inner</span></div><p>outer</p>");
}

#[test]
fn templates_see_later_definitions() {
    let src = r#"<template name="outer-t" extends="div"><inner-t/></template>
        <template name="inner-t" extends="p">in</template>
        <outer-t/>"#;
    assert_eq!(render(src), "<div><p>in</p></div>");
}

#[test]
fn for_binds_index_and_value() {
    let src = r#"<ul><for in={["a", "b"]} iname="i" vname="v"><li>{i}:{v}</li></for></ul>"#;
    assert_eq!(render(src), "<ul><li>0:a</li><li>1:b</li></ul>");
}

#[test]
fn for_with_one_name_binds_the_value_and_walks_dicts_in_order() {
    assert_eq!(text(r#"<for in={[3, 4]} iname="v"><p>{v}</p></for>"#), "3 4");
    assert_eq!(
        text(r#"<for in={{b: 1, a: 2}} iname="k" vname="v"><p>{k}={v}</p></for>"#),
        "b=1 a=2"
    );
}

#[test]
fn loop_bodies_may_redeclare_their_own_vars() {
    let src = r#"<for in={[1, 2]} iname="n"><var sq={n * n}/><p>{sq}</p></for>"#;
    assert_eq!(text(src), "1 4");
}

#[test]
fn exports_leave_branches_but_locals_do_not() {
    let src = r#"<if cond={true}><var y={2} export/><var z={1}/></if><p>{y}</p>"#;
    assert_eq!(text(src), "2");

    let err = error(r#"<if cond={true}><var z={1}/></if><p>{z}</p>"#);
    assert!(matches!(err.kind, ErrorKind::UndefinedVariable(ref n) if n == "z"));
}

#[test]
fn exports_from_loops_reach_the_file() {
    let src = r#"<for in={[1]} iname="n"><var last={n} export/></for><p>{last}</p>"#;
    assert_eq!(text(src), "1");
}

#[test]
fn exports_from_template_bodies_reach_the_file() {
    let src = r#"<template name="t" extends="div"><if cond={true}><var x={1} export/><var y={2}/></if></template><t/><p>{x}</p>"#;
    assert_eq!(render(src), "<div></div><p>1</p>");

    let err = error(r#"<template name="t" extends="div"><if cond={true}><var y={2}/></if></template><t/><p>{y}</p>"#);
    assert!(matches!(err.kind, ErrorKind::UndefinedVariable(ref n) if n == "y"));
}

#[test]
fn redefinition_and_global_redefinition() {
    let err = error(r#"<var x={1}/><var x={2}/>"#);
    assert!(matches!(err.kind, ErrorKind::Redefinition(ref n) if n == "x"));
    assert!(err.notes.iter().any(|n| n.message == "defined here"));

    let err = error(r#"<var len={1}/>"#);
    assert!(matches!(err.kind, ErrorKind::GlobalRedefinition(ref n) if n == "len"));
}

#[test]
fn if_chains_pick_one_branch() {
    let src = r#"<var n={2}/>
        <if cond={n == 1}><p>one</p></if>
        <elseif cond={n == 2}><p>two</p></elseif>
        <else><p>many</p></else>"#;
    assert_eq!(text(src), "two");
}

#[test]
fn conditions_must_be_booleans() {
    let err = error(r#"<if cond={1}><p>x</p></if>"#);
    assert!(matches!(err.kind, ErrorKind::Type { .. }));
}

#[test]
fn switch_falls_through_to_later_matches() {
    let src = r#"<switch value={2}>
            <case value={1}><p>one</p></case>
            <case value={2} fallthrough><p>two</p></case>
            <case value={3}><p>three</p></case>
            <default><p>other</p></default>
        </switch>"#;
    assert_eq!(text(src), "two other");

    let src = r#"<switch value={9}><case value={1}><p>one</p></case><default><p>other</p></default></switch>"#;
    assert_eq!(text(src), "other");

    let src = r#"<switch><case value={false}><p>no</p></case><case value={true}><p>yes</p></case></switch>"#;
    assert_eq!(text(src), "yes");
}

#[test]
fn switch_default_must_be_last() {
    let err = error(r#"<switch value={1}><default><p/></default><case value={1}><p/></case></switch>"#);
    assert!(err.to_string().contains("case after default"));
}

#[test]
fn misplaced_branches_get_hints() {
    let err = error(r#"<div><case value={1}/></div>"#);
    assert!(matches!(err.kind, ErrorKind::Structure(_)));

    let err = error(r#"<div><circle/></div>"#);
    assert!(matches!(err.kind, ErrorKind::UnknownTag { .. }));
    assert!(err.notes.iter().any(|n| n.message.contains("outside <svg>")));
}

#[test]
fn svg_context_is_inherited() {
    let src = r#"<svg viewBox="0 0 1 1"><g><circle r="1"/></g></svg>"#;
    assert_eq!(render(src), r#"<svg viewBox="0 0 1 1"><g><circle r="1"/></g></svg>"#);
}

#[test]
fn folded_index_ignores_block_wrappers() {
    let src = r#"<template name="item" extends="li">{__idx__}/{__fidx__}</template>
        <template name="listing" extends="ul"><item/><block name="more"><item/></block></template>
        <listing><append target="more"><item/></append></listing>"#;
    assert_eq!(text(src), "0/0 0/1 1/2");
    assert!(!render(src).contains("dummy"));
}

#[test]
fn lazy_values_resolve_against_the_final_tree() {
    let src = r#"<template name="cell" extends="li" super=(data-n = __nsiblings__, data-i = __index__)/>
        <ul><cell/><cell/><cell/></ul>"#;
    assert_eq!(
        render(src),
        r#"<ul><li data-n="3" data-i="0"></li><li data-n="3" data-i="1"></li><li data-n="3" data-i="2"></li></ul>"#
    );
}

#[test]
fn parent_style_lookup() {
    let src = r#"<template name="swatch" extends="span" super=(title = __pstyle__.color)/>
        <div style="color: red"><swatch/></div>"#;
    assert_eq!(render(src), r#"<div style="color: red"><span title="red"></span></div>"#);
}

#[test]
fn duplicate_ids_name_both_sites() {
    let err = error(r#"<p id="a"/><div><p id="a"/></div>"#);
    assert!(matches!(err.kind, ErrorKind::DuplicateId(ref id) if id == "a"));
    assert!(err.notes.iter().any(|n| n.message == "first used here"));
}

#[test]
fn nesting_is_validated() {
    let err = error(r#"<p><p>x</p></p>"#);
    assert!(matches!(err.kind, ErrorKind::InvalidNesting { .. }));
}

#[test]
fn permissive_mode_tolerates_missing_values() {
    let src = r#"<permissive/><p>[{missing}]</p><if cond={missing}><p>no</p></if>"#;
    assert_eq!(text(src), "[]");
}

#[test]
fn print_and_intrinsics() {
    let src = r#"<print value={issymbol("len")}/><print value={get("nope", 7)}/><print value={new("k", 3) + k}/>"#;
    assert_eq!(text(src), "true 7 6");

    let err = error(r#"<print value={get("nope")}/>"#);
    assert!(err.notes.iter().any(|n| n.message.starts_with("available names")));
}

#[test]
fn url_without_a_registry_entry() {
    let err = error(r#"<p>{url()}</p>"#);
    assert!(err.to_string().contains("no url registered"));

    let options = CompileOptions {
        ignore_unset_urls: true,
        ..CompileOptions::default()
    };
    let compiled = compile_source("test.weft", r#"<a href={url("./x.weft")}>x</a>"#, &options);
    assert_eq!(compiled.map(|c| c.render()).ok(), Some(r#"<a href="">x</a>"#.to_string()));
}

#[test]
fn svg_uri_inlines_a_template() {
    let src = r#"<template name="dot" extends="svg" super=(width = 2)><circle r="1"/></template>
        <div style={{background: svg-uri("dot")}}/>"#;
    let out = render(src);
    assert!(out.starts_with(r#"<div style="background:url('data:image/svg+xml;utf8,%3Csvg width=%222%22 xmlns=%22http://www.w3.org/2000/svg%22"#), "{out}");
    assert!(out.contains("%3Ccircle r=%221%22/%3E%3C/svg%3E"), "{out}");
}

#[test]
fn math_uri_needs_a_renderer() {
    let err = error(r#"<p>{math-uri("x^2")}</p>"#);
    assert!(err.to_string().contains("no math renderer"));
}
