use std::ops::Range;

use codespan_reporting::diagnostic::{Diagnostic, Label};
use weft::parser::ParseError;

/// Everything that can go wrong while composing a document.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    // binding
    #[error("undefined variable `{0}`")]
    UndefinedVariable(String),
    #[error("undefined template `{0}`")]
    UndefinedTemplate(String),
    #[error("undefined function `{0}`")]
    UndefinedFunction(String),
    #[error("invalid tag attribute `{attr}` for <{template}>")]
    UnknownArgument { template: String, attr: String },
    #[error("arg `{arg}` of <{template}> not specified")]
    MissingArgument { template: String, arg: String },
    #[error("can't redefine `{0}`")]
    Redefinition(String),
    #[error("can't redefine global `{0}`")]
    GlobalRedefinition(String),
    #[error("`{0}` can't be exported from this scope")]
    ExportFromScope(String),
    #[error("`{name}` is not exported by {module}")]
    NotExported { name: String, module: String },
    #[error("`{name}` not found in {module}")]
    NotFoundInModule { name: String, module: String },
    #[error("`{0}` is not callable")]
    NotCallable(String),

    // structural
    #[error("can't extend `{0}` (is final)")]
    ExtendsFinal(String),
    #[error("invalid tag name `{name}`: {reason}")]
    InvalidTemplateName { name: String, reason: String },
    #[error("'{name}' is not a valid {context} tag")]
    UnknownTag { name: String, context: &'static str },
    #[error("unapplied ops ({0})")]
    UnappliedOperation(String),
    #[error("unexpected attribute `{attr}` on <{tag}>")]
    UnexpectedAttribute { tag: String, attr: String },
    #[error("{0}")]
    Structure(String),

    // arity / shape
    #[error("{name} expects {expected}, got {got}")]
    Arity {
        name: String,
        expected: String,
        got: usize,
    },

    // values
    #[error("expected {expected}, got {got}")]
    Type { expected: String, got: String },
    #[error("division by zero")]
    DivisionByZero,
    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: i64, len: usize },
    #[error("value depends on the final document and can't be used here")]
    LazyNotAllowed,

    // import
    #[error("file not found: {0}")]
    FileNotFound(String),
    #[error("cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("{0} doesn't accept parameters")]
    ParametersNotAccepted(String),
    #[error("{count} parse error(s) in {path}")]
    Parse {
        path: String,
        count: usize,
        errors: Vec<ParseError>,
    },

    // validation
    #[error("duplicate id `{0}`")]
    DuplicateId(String),
    #[error("<{child}> can't be nested inside <{parent}>")]
    InvalidNesting { child: String, parent: String },

    #[error("{0}")]
    Custom(String),
}

/// A byte span inside one registered source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub file_id: usize,
    pub span: Range<usize>,
}

impl Location {
    pub fn new(file_id: usize, span: Range<usize>) -> Self {
        Location { file_id, span }
    }
}

/// An "Info:" annotation attached to an error, optionally pointing somewhere.
#[derive(Debug, Clone)]
pub struct Note {
    pub message: String,
    pub location: Option<Location>,
}

/// An error enriched with source location information and context notes.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct CompileError {
    pub kind: ErrorKind,
    pub location: Option<Location>,
    pub notes: Vec<Note>,
}

pub type Result<T, E = CompileError> = std::result::Result<T, E>;

impl CompileError {
    pub fn new(kind: ErrorKind) -> Self {
        CompileError {
            kind,
            location: None,
            notes: Vec::new(),
        }
    }

    pub fn custom(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Custom(message.into()))
    }

    /// Point the error at `location`, unless a more precise location is
    /// already attached.
    pub fn or_at(mut self, location: &Location) -> Self {
        if self.location.is_none() {
            self.location = Some(location.clone());
        }
        self
    }

    pub fn at(mut self, location: &Location) -> Self {
        self.location = Some(location.clone());
        self
    }

    pub fn with_note(mut self, message: impl Into<String>) -> Self {
        self.notes.push(Note {
            message: message.into(),
            location: None,
        });
        self
    }

    pub fn with_note_at(mut self, message: impl Into<String>, location: &Location) -> Self {
        self.notes.push(Note {
            message: message.into(),
            location: Some(location.clone()),
        });
        self
    }

    /// Convert to codespan-reporting diagnostics. Parse failures expand into
    /// one diagnostic per parse error.
    pub fn to_diagnostics(&self) -> Vec<Diagnostic<usize>> {
        if let ErrorKind::Parse { errors, .. } = &self.kind {
            return errors.iter().map(ParseError::to_diagnostic).collect();
        }

        let mut labels = Vec::new();
        if let Some(loc) = &self.location {
            labels.push(Label::primary(loc.file_id, loc.span.clone()));
        }
        let mut notes = Vec::new();
        for note in &self.notes {
            match &note.location {
                Some(loc) => labels.push(
                    Label::secondary(loc.file_id, loc.span.clone()).with_message(&note.message),
                ),
                None => notes.push(format!("info: {}", note.message)),
            }
        }

        vec![
            Diagnostic::error()
                .with_message(self.kind.to_string())
                .with_labels(labels)
                .with_notes(notes),
        ]
    }
}

impl From<ErrorKind> for CompileError {
    fn from(kind: ErrorKind) -> Self {
        CompileError::new(kind)
    }
}

/// Shorthand for a type mismatch.
pub fn type_error(expected: impl Into<String>, got: impl Into<String>) -> CompileError {
    CompileError::new(ErrorKind::Type {
        expected: expected.into(),
        got: got.into(),
    })
}
