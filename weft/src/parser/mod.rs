pub mod error;
pub mod expression;
mod markup;

pub use error::ParseError;

use crate::Document;

/// Parser entry point.
pub struct Parser {
    source: String,
    file_id: usize,
}

impl Parser {
    pub fn new(source: impl Into<String>, file_id: usize) -> Self {
        Parser {
            source: source.into(),
            file_id,
        }
    }

    /// Parse the markup source into a complete Document.
    pub fn parse(&self) -> Result<Document, Vec<ParseError>> {
        let tags = markup::parse_tags(&self.source, self.file_id)?;
        Ok(Document {
            tags: tags.into(),
            file_id: self.file_id,
        })
    }
}
