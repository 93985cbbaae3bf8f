pub mod build;
pub mod cache;
pub mod compiler;
pub mod directives;
pub mod error;
pub mod evaluator;
pub mod functions;
pub mod html;
pub mod intrinsics;
pub mod node;
pub mod operation;
pub mod options;
pub mod output;
pub mod scope;
pub mod template;
pub mod value;

pub use cache::{DependencyGraph, FileCache};
pub use compiler::{Compiled, Compiler, compile_file, compile_source};
pub use error::{CompileError, ErrorKind, Location};
pub use options::{CompileOptions, MathRenderer};
pub use output::{OutputId, OutputTree};
pub use value::Value;
