use std::{fs, io, path::Path};

use self::lexer::Span;

pub mod ast;
pub mod intern;
pub mod lexer;
pub mod numeric;
pub mod parser;

/// One translation unit: the source text plus the name diagnostics refer to
/// it by (its path on disk, or `<memory>` for tooling and tests).
#[derive(Debug)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

impl SourceFile {
    pub fn from_path(path: &Path) -> io::Result<Self> {
        Ok(Self {
            name: path.display().to_string(),
            contents: fs::read_to_string(path)?,
        })
    }

    #[cfg(test)]
    pub fn in_memory(contents: &str) -> Self {
        Self {
            name: "<memory>".to_owned(),
            contents: contents.to_owned(),
        }
    }

    pub fn value_of_span(&self, span: Span) -> &str {
        &self.contents[span.start..span.end]
    }

    /// 1-based line and column of a byte offset.
    pub fn position_of(&self, offset: usize) -> (usize, usize) {
        let mut line = 1;
        let mut column = 1;

        for (index, c) in self.contents.char_indices() {
            if index >= offset {
                break;
            }

            if c == '\n' {
                line += 1;
                column = 1;
            } else {
                column += 1;
            }
        }

        (line, column)
    }
}
