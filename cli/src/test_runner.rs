use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use composer::{CompileOptions, Compiler, ErrorKind};
use serde::Deserialize;
use weft::parser::Parser;

const TEST_SUFFIX: &str = ".test.weft";

/// Frontmatter of a `.test.weft` file, between `---` fences.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TestConfig {
    pub description: Option<String>,
    /// Rendered markup, compared after trimming.
    pub expect_output: Option<String>,
    /// Substring of the compile error message.
    pub expect_error: Option<String>,
    pub expect_parse_error: bool,
    pub options: CompileOptions,
}

enum TestOutcome {
    Pass,
    Fail(String),
}

struct TestResult {
    path: PathBuf,
    description: Option<String>,
    outcome: TestOutcome,
}

#[derive(Default)]
struct Summary {
    passed: usize,
    failed: usize,
}

impl Summary {
    fn record(&mut self, result: &TestResult) {
        match result.outcome {
            TestOutcome::Pass => self.passed += 1,
            TestOutcome::Fail(_) => self.failed += 1,
        }
    }
}

/// Split `---\n<toml>\n---\n<body>`. Files without frontmatter get the
/// default config.
fn split_frontmatter(content: &str) -> Result<(TestConfig, String), String> {
    let Some(rest) = content.strip_prefix("---") else {
        return Ok((TestConfig::default(), content.to_string()));
    };
    let rest = rest.strip_prefix('\n').unwrap_or(rest);
    let (front, body) = match rest.find("\n---") {
        Some(end) => {
            let body = &rest[end + 4..];
            (&rest[..end], body.strip_prefix('\n').unwrap_or(body))
        }
        None => return Err("unclosed frontmatter".into()),
    };
    let config: TestConfig = toml::from_str(front).map_err(|e| format!("bad frontmatter: {}", e))?;
    Ok((config, body.to_string()))
}

fn run_one(path: &Path) -> TestResult {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => return failed(path, None, format!("cannot read file: {}", e)),
    };
    let (config, source) = match split_frontmatter(&content) {
        Ok(parts) => parts,
        Err(message) => return failed(path, None, message),
    };
    let description = config.description.clone();
    let outcome = check(path, &config, &source);
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome,
    }
}

fn failed(path: &Path, description: Option<String>, message: String) -> TestResult {
    TestResult {
        path: path.to_path_buf(),
        description,
        outcome: TestOutcome::Fail(message),
    }
}

fn check(path: &Path, config: &TestConfig, source: &str) -> TestOutcome {
    if config.expect_parse_error {
        return match Parser::new(source.to_string(), 0).parse() {
            Err(_) => TestOutcome::Pass,
            Ok(_) => TestOutcome::Fail("expected a parse error, but parsing succeeded".into()),
        };
    }

    let name = path.display().to_string();
    let result = Compiler::new(config.options.clone()).compile_source(&name, source);

    match (result, &config.expect_error) {
        (Err(err), Some(expected)) => {
            let message = err.to_string();
            if message.contains(expected.as_str()) {
                TestOutcome::Pass
            } else {
                TestOutcome::Fail(format!(
                    "error mismatch\n  expected to contain: {}\n  got: {}",
                    expected, message
                ))
            }
        }
        (Err(err), None) => match err.kind {
            ErrorKind::Parse { count, .. } => {
                TestOutcome::Fail(format!("unexpected parse error ({} diagnostics)", count))
            }
            _ => TestOutcome::Fail(format!("unexpected error: {}", err)),
        },
        (Ok(compiled), Some(expected)) => TestOutcome::Fail(format!(
            "expected error containing `{}`, but compiled to: {}",
            expected,
            compiled.render()
        )),
        (Ok(compiled), None) => match &config.expect_output {
            Some(expected) => {
                let got = compiled.render();
                if got.trim() == expected.trim() {
                    TestOutcome::Pass
                } else {
                    TestOutcome::Fail(format!(
                        "output mismatch\n  expected: {}\n  got:      {}",
                        expected.trim(),
                        got.trim()
                    ))
                }
            }
            None => TestOutcome::Pass,
        },
    }
}

/// Test files grouped by the subfolder they live in. Files directly under
/// `dir` go to the "" category.
fn discover(dir: &Path) -> BTreeMap<String, Vec<PathBuf>> {
    let mut categories: BTreeMap<String, Vec<PathBuf>> = BTreeMap::new();
    collect(dir, dir, &mut categories);
    for files in categories.values_mut() {
        files.sort();
    }
    categories
}

fn collect(root: &Path, dir: &Path, out: &mut BTreeMap<String, Vec<PathBuf>>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            collect(root, &path, out);
            continue;
        }
        let is_test = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(TEST_SUFFIX));
        if !is_test {
            continue;
        }
        let category = path
            .parent()
            .and_then(|p| p.strip_prefix(root).ok())
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        out.entry(category).or_default().push(path);
    }
}

pub fn list_categories(path: &Path) {
    let categories = discover(path);
    if categories.is_empty() {
        println!("No {} files found in {}", TEST_SUFFIX, path.display());
        return;
    }
    for (category, files) in &categories {
        let label = if category.is_empty() { "(root)" } else { category };
        println!("  {} ({} tests)", label, files.len());
    }
}

fn pass_label(no_color: bool) -> &'static str {
    if no_color { "PASS" } else { "\x1b[32mPASS\x1b[0m" }
}

fn fail_label(no_color: bool) -> &'static str {
    if no_color { "FAIL" } else { "\x1b[31mFAIL\x1b[0m" }
}

fn bold(text: &str, no_color: bool) -> String {
    if no_color {
        text.to_string()
    } else {
        format!("\x1b[1m{}\x1b[0m", text)
    }
}

fn report(result: &TestResult, root: &Path, no_color: bool) {
    let shown = result.path.strip_prefix(root).unwrap_or(&result.path);
    let description = result
        .description
        .as_deref()
        .map(|d| format!(" ({})", d))
        .unwrap_or_default();
    match &result.outcome {
        TestOutcome::Pass => {
            println!("  {} {}{}", pass_label(no_color), shown.display(), description)
        }
        TestOutcome::Fail(message) => {
            println!("  {} {}{}", fail_label(no_color), shown.display(), description);
            for line in message.lines() {
                println!("       {}", line);
            }
        }
    }
}

/// Run a single test file or every test under a directory. Returns the
/// process exit code.
pub fn run_tests(path: &Path, no_color: bool, filter: &[String]) -> i32 {
    let (root, categories) = if path.is_file() {
        let root = path.parent().unwrap_or_else(|| Path::new(".")).to_path_buf();
        let mut single = BTreeMap::new();
        single.insert(String::new(), vec![path.to_path_buf()]);
        (root, single)
    } else if path.is_dir() {
        (path.to_path_buf(), discover(path))
    } else {
        eprintln!("error: '{}' is not a file or directory", path.display());
        return 1;
    };

    let selected: Vec<(&String, &Vec<PathBuf>)> = categories
        .iter()
        .filter(|(category, _)| filter.is_empty() || filter.contains(category))
        .collect();
    if selected.is_empty() {
        eprintln!("No {} files found in {}", TEST_SUFFIX, path.display());
        return 1;
    }

    let mut total = Summary::default();
    for (category, files) in selected {
        if !category.is_empty() {
            println!("\n{}", bold(category, no_color));
        }
        for file in files {
            let result = run_one(file);
            total.record(&result);
            report(&result, &root, no_color);
        }
    }

    println!(
        "\n{} passed, {} failed, {} total",
        total.passed,
        total.failed,
        total.passed + total.failed
    );
    if total.failed > 0 { 1 } else { 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frontmatter_is_optional() {
        let (config, body) = split_frontmatter("<p>x</p>").unwrap();
        assert!(config.expect_output.is_none());
        assert_eq!(body, "<p>x</p>");
    }

    #[test]
    fn frontmatter_is_split_from_the_body() {
        let text = "---\ndescription = \"d\"\nexpect_output = \"<p>x</p>\"\n---\n<p>x</p>\n";
        let (config, body) = split_frontmatter(text).unwrap();
        assert_eq!(config.description.as_deref(), Some("d"));
        assert_eq!(config.expect_output.as_deref(), Some("<p>x</p>"));
        assert_eq!(body, "<p>x</p>\n");
    }

    #[test]
    fn unclosed_frontmatter_fails() {
        assert!(split_frontmatter("---\ndescription = \"d\"\n<p/>").is_err());
    }

    #[test]
    fn outcomes_follow_expectations() {
        let path = Path::new("case.test.weft");
        let expect_output = TestConfig {
            expect_output: Some("<p>x</p>".into()),
            ..TestConfig::default()
        };
        assert!(matches!(check(path, &expect_output, "<p>x</p>"), TestOutcome::Pass));
        assert!(matches!(check(path, &expect_output, "<p>y</p>"), TestOutcome::Fail(_)));

        let expect_parse = TestConfig {
            expect_parse_error: true,
            ..TestConfig::default()
        };
        assert!(matches!(check(path, &expect_parse, "<div>"), TestOutcome::Pass));
    }
}
