//! Maze template loading — reads a text grid from disk (or falls back to a
//! built-in default) and validates it before handing rows to `Maze::init`.

use std::fs;
use std::path::Path;

use thiserror::Error;

/// A small default room, large enough to host several avatars and full
/// `VIEW_DEPTH` sightlines, shipped so the server runs with zero external
/// files when `-t` is omitted.
pub const DEFAULT_TEMPLATE: &str = "\
################
#              #
#  ####  ####  #
#  #        #  #
#  #  ####  #  #
#  #  #  #  #  #
#              #
#  #  #  #  #  #
#  #  ####  #  #
#  #        #  #
#  ####  ####  #
#              #
################";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TemplateError {
    #[error("template file has no rows")]
    Empty,
    #[error("template rows have unequal length")]
    RaggedRows,
    #[error("failed to read template file: {0}")]
    Io(String),
}

/// Parse template text into fixed-width rows: split on `\n`, strip a
/// trailing `\r` for CRLF files, and drop a trailing empty line produced by
/// a final newline.
pub fn parse_template(text: &str) -> Result<Vec<String>, TemplateError> {
    let mut rows: Vec<String> = text
        .split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line).to_string())
        .collect();

    if rows.last().map(|r| r.is_empty()).unwrap_or(false) {
        rows.pop();
    }

    if rows.is_empty() {
        return Err(TemplateError::Empty);
    }
    let width = rows[0].len();
    if width == 0 || rows.iter().any(|r| r.len() != width) {
        return Err(TemplateError::RaggedRows);
    }
    Ok(rows)
}

/// Load rows either from `path`, or fall back to [`DEFAULT_TEMPLATE`] when
/// `path` is `None`.
pub fn load_template(path: Option<&Path>) -> Result<Vec<String>, TemplateError> {
    match path {
        None => parse_template(DEFAULT_TEMPLATE),
        Some(p) => {
            let text = fs::read_to_string(p).map_err(|e| TemplateError::Io(e.to_string()))?;
            parse_template(&text)
        }
    }
}
