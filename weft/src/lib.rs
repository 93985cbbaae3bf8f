pub mod expr;
pub mod parser;
pub mod tag;

use std::sync::Arc;

use crate::tag::Tag;

/// A parsed weft source file.
#[derive(Debug, Clone)]
pub struct Document {
    /// Top-level tags, in source order.
    pub tags: Arc<[Tag]>,
    /// The source file ID (for error reporting with codespan-reporting).
    pub file_id: usize,
}
