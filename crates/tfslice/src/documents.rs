//! configuration files of one module directory
//!
//! [SourceFile] keeps
//! - the source path
//! - the raw contents (needed later to cut out block text)
//! - the parsed [Body]
//! - a line index so byte spans can be reported as line ranges
//!
//! Reading and parsing never fails the load of a directory. Unreadable or invalid files are
//! reported as diagnostics and skipped.
use crate::diagnostics::Diagnostics;
use hcl_edit::structure::Body;
use hcl_edit::Span;
use serde::Serialize;
use std::ops::Range;
use std::path::{Path, PathBuf};

/// Position of a declaration: file, byte range and 1-based inclusive line range
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourcePos {
    pub file: PathBuf,
    pub bytes: Range<usize>,
    pub start_line: usize,
    pub end_line: usize,
}

/// Byte offsets of line starts
#[derive(Debug, Clone)]
pub struct LineIndex {
    starts: Vec<usize>,
    len: usize,
}

impl LineIndex {
    pub fn new(contents: &str) -> Self {
        let starts = std::iter::once(0)
            .chain(contents.match_indices('\n').map(|(index, _)| index + 1))
            .collect();
        Self {
            starts,
            len: contents.len(),
        }
    }

    /// 1-based line containing `offset`
    pub fn line_of(&self, offset: usize) -> usize {
        match self.starts.binary_search(&offset) {
            Ok(index) => index + 1,
            Err(index) => index,
        }
    }

    pub fn line_count(&self) -> usize {
        self.starts.len()
    }

    /// Byte range of the 1-based inclusive line range, without the final line break
    pub fn line_span(&self, start_line: usize, end_line: usize) -> Range<usize> {
        let start = self.starts[start_line.saturating_sub(1).min(self.starts.len() - 1)];
        let end = match self.starts.get(end_line) {
            Some(next_start) => next_start - 1,
            None => self.len,
        };
        start..end.max(start)
    }
}

#[derive(Debug)]
pub struct SourceFile {
    pub path: PathBuf,
    pub contents: String,
    pub body: Body,
    lines: LineIndex,
}

impl SourceFile {
    pub fn parse(
        path: impl Into<PathBuf>,
        contents: String,
    ) -> Result<Self, hcl_edit::parser::Error> {
        let body = hcl_edit::parser::parse_body(&contents)?;
        let lines = LineIndex::new(&contents);
        Ok(Self {
            path: path.into(),
            contents,
            body,
            lines,
        })
    }

    pub fn pos(&self, bytes: Range<usize>) -> SourcePos {
        let start_line = self.lines.line_of(bytes.start);
        let end_line = self
            .lines
            .line_of(bytes.end.saturating_sub(1).max(bytes.start));
        SourcePos {
            file: self.path.clone(),
            bytes,
            start_line,
            end_line,
        }
    }

    /// Position of a parsed element. Elements created outside the parser have no span.
    pub fn pos_of(&self, node: &impl Span) -> Option<SourcePos> {
        node.span().map(|span| self.pos(span))
    }

    /// Full lines `start_line..=end_line` without the final line break
    pub fn line_text(&self, start_line: usize, end_line: usize) -> (Range<usize>, &str) {
        let range = self.lines.line_span(start_line, end_line);
        (range.clone(), &self.contents[range])
    }

    pub fn line_count(&self) -> usize {
        self.lines.line_count()
    }

    /// Position covering the whole file, used for file level diagnostics
    pub fn file_pos(&self) -> SourcePos {
        self.pos(0..self.contents.len())
    }
}

fn is_configuration_file(path: &Path) -> bool {
    let Some(name) = path.file_name().map(|name| name.to_string_lossy()) else {
        return false;
    };
    name.ends_with(".tf") && !name.starts_with('.')
}

/// Reads and parses every `*.tf` file in `dir`, sorted by file name
#[tracing::instrument(level = "trace", skip(diagnostics))]
pub fn load_directory(dir: &Path, diagnostics: &mut Diagnostics) -> Vec<SourceFile> {
    let read_dir = match std::fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(err) => {
            diagnostics.error_with_detail(
                format!("Failed to read module directory {}", dir.display()),
                err.to_string(),
                None,
            );
            return vec![];
        }
    };

    let mut paths = vec![];
    for dir_entry in read_dir {
        let dir_entry = match dir_entry {
            Ok(dir_entry) => dir_entry,
            Err(err) => {
                diagnostics.error_with_detail(
                    "Failed to list directory entry",
                    err.to_string(),
                    None,
                );
                continue;
            }
        };

        let path = dir_entry.path();
        if path.is_file() && is_configuration_file(&path) {
            paths.push(path);
        }
    }
    paths.sort();

    let mut files = Vec::with_capacity(paths.len());
    for path in paths {
        tracing::info!(path=%path.display(), "loading file");

        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                diagnostics.error_with_detail(
                    format!("Failed to read file {}", path.display()),
                    err.to_string(),
                    None,
                );
                continue;
            }
        };

        match SourceFile::parse(path.clone(), contents) {
            Ok(file) => files.push(file),
            Err(err) => {
                diagnostics.error_with_detail(
                    format!("Unable to parse {}", path.display()),
                    err.to_string(),
                    None,
                );
            }
        }
    }

    files
}
