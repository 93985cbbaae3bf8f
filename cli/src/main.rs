mod test_runner;

use std::fs;
use std::path::{Path, PathBuf};
use std::process;

use clap::{Parser, Subcommand};
use codespan_reporting::files::SimpleFiles;
use codespan_reporting::term;
use codespan_reporting::term::termcolor::{ColorChoice, StandardStream};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use composer::{CompileError, CompileOptions, Compiler};

const SUBCOMMANDS: &[&str] = &["build", "check", "test", "help"];

/// Name of the config file looked up next to the input.
const CONFIG_FILE: &str = "weft.toml";

#[derive(Parser)]
#[command(name = "weft", version, about = "Template composition compiler")]
struct Cli {
    /// Disable colored error output
    #[arg(long, global = true)]
    no_color: bool,

    /// Log compilation steps (overrides WEFT_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to use instead of a weft.toml next to the input
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a document and print the result
    Build(BuildArgs),

    /// Compile a document without writing output (exit 0 if valid)
    Check(CheckArgs),

    /// Run .test.weft test files
    Test(TestArgs),
}

#[derive(clap::Args)]
struct BuildArgs {
    /// Source file to compile
    file: PathBuf,

    /// Write the output here instead of stdout
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Print the text content instead of markup
    #[arg(long)]
    text: bool,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Source file to compile
    file: PathBuf,
}

#[derive(clap::Args)]
struct TestArgs {
    /// Path to a .test.weft file or directory containing them
    path: String,

    /// Run only tests in these categories (subfolder names). Repeatable.
    #[arg(short, long)]
    category: Vec<String>,

    /// List available categories and exit
    #[arg(long)]
    list_categories: bool,
}

fn main() {
    // `weft page.weft` is short for `weft build page.weft`
    let mut args: Vec<String> = std::env::args().collect();
    let first = args
        .iter()
        .skip(1)
        .position(|a| !a.starts_with('-'))
        .map(|i| i + 1);
    if let Some(pos) = first {
        if !SUBCOMMANDS.contains(&args[pos].as_str()) {
            args.insert(pos, "build".to_string());
        }
    }

    let cli = Cli::parse_from(&args);
    init_logging(cli.verbose);

    match cli.command {
        Command::Build(build_args) => {
            let options = load_options_or_exit(cli.config.as_deref(), &build_args.file);
            do_build(build_args, options, cli.no_color);
        }
        Command::Check(check_args) => {
            let options = load_options_or_exit(cli.config.as_deref(), &check_args.file);
            do_check(check_args, options, cli.no_color);
        }
        Command::Test(test_args) => {
            let path = Path::new(&test_args.path);
            if test_args.list_categories {
                test_runner::list_categories(path);
                return;
            }
            let exit_code = test_runner::run_tests(path, cli.no_color, &test_args.category);
            process::exit(exit_code);
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("WEFT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Read `weft.toml` (or `--config`). Relative paths inside it are taken
/// relative to the config file.
fn load_options(config: Option<&Path>, input: &Path) -> Result<CompileOptions, String> {
    let path = match config {
        Some(path) => path.to_path_buf(),
        None => {
            let beside = input
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(CONFIG_FILE);
            if !beside.is_file() {
                return Ok(CompileOptions::default());
            }
            beside
        }
    };
    debug!(config = %path.display(), "loading options");

    let text = fs::read_to_string(&path)
        .map_err(|e| format!("cannot read '{}': {}", path.display(), e))?;
    let mut options: CompileOptions =
        toml::from_str(&text).map_err(|e| format!("{}: {}", path.display(), e))?;

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    options.template_paths = options
        .template_paths
        .iter()
        .map(|p| dir.join(p))
        .collect();
    options.urls = options
        .urls
        .into_iter()
        .map(|(file, url)| {
            let joined = dir.join(&file);
            (fs::canonicalize(&joined).unwrap_or(joined), url)
        })
        .collect();
    Ok(options)
}

fn load_options_or_exit(config: Option<&Path>, input: &Path) -> CompileOptions {
    load_options(config, input).unwrap_or_else(|e| {
        eprintln!("error: {}", e);
        process::exit(1);
    })
}

fn color_choice(no_color: bool) -> ColorChoice {
    if no_color {
        ColorChoice::Never
    } else {
        ColorChoice::Auto
    }
}

fn do_build(args: BuildArgs, options: CompileOptions, no_color: bool) {
    let compiler = Compiler::new(options);
    let compiled = match compiler.compile_file(&args.file) {
        Ok(compiled) => compiled,
        Err(error) => {
            emit_error(&compiler.cache().files(), &error, no_color);
            process::exit(1);
        }
    };

    let mut out = if args.text {
        compiled.text_content()
    } else {
        compiled.render()
    };
    out.push('\n');

    match &args.output {
        Some(path) => {
            if let Err(e) = fs::write(path, out) {
                eprintln!("error: cannot write '{}': {}", path.display(), e);
                process::exit(1);
            }
        }
        None => print!("{}", out),
    }
}

fn do_check(args: CheckArgs, options: CompileOptions, no_color: bool) {
    let compiler = Compiler::new(options);
    match compiler.compile_file(&args.file) {
        Ok(compiled) => {
            eprintln!(
                "ok: {} compiled ({} nodes)",
                args.file.display(),
                compiled.tree.len()
            );
        }
        Err(error) => {
            emit_error(&compiler.cache().files(), &error, no_color);
            process::exit(1);
        }
    }
}

fn emit_error(files: &SimpleFiles<String, String>, error: &CompileError, no_color: bool) {
    let writer = StandardStream::stderr(color_choice(no_color));
    let config = term::Config::default();
    for diagnostic in error.to_diagnostics() {
        if term::emit_to_write_style(&mut writer.lock(), &config, files, &diagnostic).is_err() {
            // the location points at a source we don't have
            eprintln!("error: {}", error);
        }
    }
}
