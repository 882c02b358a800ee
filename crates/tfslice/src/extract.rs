//! closure extraction
//!
//! Copies the source text of blocks into a destination directory that mirrors the module's
//! file layout. Text is copied line-wise, formatting and comments inside a block survive.
//!
//! A destination file that already exists is parsed when it is first touched. Its blocks
//! are matched against the source file by identity (`resource "type" "name"`, `provider`
//! plus alias, the `locals` block declaring the same names) to learn the lines they were
//! copied from. An extracted block then
//! - replaces the block of the same identity, or
//! - is inserted before the first block that was copied from a later source line.
//!
//! Content the source does not declare stays where it is. Locals are extracted one by one
//! into a copy of their `locals { ... }` block. Relative module call sources are rewritten
//! to point back at the original module directory.
use crate::documents::{SourceFile, SourcePos};
use crate::graph::{BlockId, BlockType, Graph};
use crate::loader::string_attribute;
use crate::module::{Module, ModuleId, ModuleTree, ResourceMode};
use crate::util::{is_local_source, local_module_source, normalize, relative_path};
use hcl_edit::structure::{Block, Structure};
use indexmap::IndexMap;
use std::collections::{btree_map, hash_map, BTreeMap, HashMap};
use std::ops::Range;
use std::path::{Path, PathBuf};

#[derive(thiserror::Error, Debug)]
pub enum ExtractError {
    #[error("Block {0} is not declared in the module")]
    UnknownBlock(BlockId),
    #[error("Unable to parse {path}")]
    Parse {
        path: PathBuf,
        #[source]
        source: hcl_edit::parser::Error,
    },
    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> ExtractError + '_ {
    move |source| ExtractError::Io {
        path: path.to_owned(),
        source,
    }
}

fn parse_error(path: &Path) -> impl FnOnce(hcl_edit::parser::Error) -> ExtractError + '_ {
    move |source| ExtractError::Parse {
        path: path.to_owned(),
        source,
    }
}

/// 1-based inclusive line range
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_new::new)]
struct Lines {
    start: usize,
    end: usize,
}

impl Lines {
    fn of(pos: &SourcePos) -> Self {
        Self::new(pos.start_line, pos.end_line)
    }

    fn single(line: usize) -> Self {
        Self::new(line, line)
    }
}

/// Identity of a top level block
#[derive(Debug, Clone, PartialEq, Eq)]
enum PieceKey {
    Block {
        ident: String,
        labels: Vec<String>,
        /// tells aliased provider configurations apart
        alias: Option<String>,
    },
    /// `locals` block starting at this source line
    Locals(usize),
}

impl PieceKey {
    fn of(block: &Block) -> Self {
        let ident = block.ident.value().as_str().to_string();
        let alias = match ident.as_str() {
            "provider" => string_attribute(&block.body, "alias"),
            _ => None,
        };
        PieceKey::Block {
            labels: block
                .labels
                .iter()
                .map(|label| label.as_str().to_string())
                .collect(),
            ident,
            alias,
        }
    }
}

fn is_locals(block: &Block) -> bool {
    block.ident.value().as_str() == "locals"
}

/// Top level block of a source file
struct SourceBlock {
    key: PieceKey,
    lines: Lines,
    /// attribute name -> lines, `locals` blocks only
    attributes: IndexMap<String, Lines>,
}

impl SourceBlock {
    fn new(file: &SourceFile, block: &Block) -> Option<Self> {
        let lines = Lines::of(&file.pos_of(block)?);
        if !is_locals(block) {
            return Some(Self {
                key: PieceKey::of(block),
                lines,
                attributes: IndexMap::new(),
            });
        }

        let attributes = block
            .body
            .attributes()
            .filter_map(|attribute| {
                let pos = file.pos_of(attribute)?;
                Some((attribute.key.value().as_str().to_string(), Lines::of(&pos)))
            })
            .collect();
        Some(Self {
            key: PieceKey::Locals(lines.start),
            lines,
            attributes,
        })
    }
}

/// Parsed source file with an index of its blocks
struct SourceText {
    file: SourceFile,
    blocks: Vec<SourceBlock>,
}

impl SourceText {
    fn read(path: &Path) -> Result<Self, ExtractError> {
        let contents = std::fs::read_to_string(path).map_err(io_error(path))?;
        let file = SourceFile::parse(path, contents).map_err(parse_error(path))?;
        let blocks = file
            .body
            .blocks()
            .filter_map(|block| SourceBlock::new(&file, block))
            .collect();
        Ok(Self { file, blocks })
    }

    fn text(&self, lines: Lines) -> (Range<usize>, &str) {
        self.file.line_text(lines.start, lines.end)
    }

    fn block_starting_at(&self, line: usize) -> Option<&SourceBlock> {
        self.blocks.iter().find(|block| block.lines.start == line)
    }

    fn block(&self, key: &PieceKey) -> Option<&SourceBlock> {
        self.blocks.iter().find(|block| &block.key == key)
    }

    fn locals_declaring(&self, name: &str) -> Option<&SourceBlock> {
        self.blocks.iter().find(|block| {
            matches!(block.key, PieceKey::Locals(_)) && block.attributes.contains_key(name)
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
struct LocalAttribute {
    name: String,
    /// source line of the attribute
    origin: Option<usize>,
    text: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Content {
    Text(String),
    Locals {
        header: String,
        footer: String,
        attributes: Vec<LocalAttribute>,
    },
}

/// Part of a destination file
#[derive(Debug, Clone, PartialEq)]
struct Piece {
    key: Option<PieceKey>,
    /// source lines the piece was copied from
    origin: Option<Lines>,
    /// comment lines kept right above the piece
    leading: Vec<String>,
    content: Content,
}

impl Piece {
    fn text(key: Option<PieceKey>, origin: Option<Lines>, text: &str) -> Self {
        Self {
            key,
            origin,
            leading: vec![],
            content: Content::Text(text.to_string()),
        }
    }

    fn merge(&mut self, piece: Piece) {
        let Piece {
            origin, content, ..
        } = piece;
        if origin.is_some() {
            self.origin = origin;
        }

        match (&mut self.content, content) {
            (
                Content::Locals { attributes, .. },
                Content::Locals {
                    attributes: added, ..
                },
            ) => {
                for attribute in added {
                    insert_attribute(attributes, attribute);
                }
            }
            (current, content) => *current = content,
        }
    }

    fn render(&self, out: &mut String) {
        for line in &self.leading {
            out.push_str(line);
            out.push('\n');
        }

        match &self.content {
            Content::Text(text) => {
                out.push_str(text);
                out.push('\n');
            }
            Content::Locals {
                header,
                footer,
                attributes,
            } => {
                out.push_str(header);
                out.push('\n');
                for attribute in attributes {
                    out.push_str(&attribute.text);
                    out.push('\n');
                }
                out.push_str(footer);
                out.push('\n');
            }
        }
    }
}

/// Index of the first item copied from a line after `line`
fn insertion_index<T>(items: &[T], line: usize, origin: impl Fn(&T) -> Option<usize>) -> usize {
    items
        .iter()
        .position(|item| origin(item).is_some_and(|start| start > line))
        .unwrap_or(items.len())
}

fn insert_attribute(attributes: &mut Vec<LocalAttribute>, attribute: LocalAttribute) {
    if let Some(index) = attributes.iter().position(|a| a.name == attribute.name) {
        attributes[index] = attribute;
        return;
    }

    let index = match attribute.origin {
        Some(line) => insertion_index(attributes, line, |a| a.origin),
        None => attributes.len(),
    };
    attributes.insert(index, attribute);
}

/// Lines `from..to`, without leading blank lines
fn gap_lines(file: &SourceFile, from: usize, to: usize) -> Vec<String> {
    (from..to)
        .map(|line| file.line_text(line, line).1)
        .skip_while(|line| line.trim().is_empty())
        .map(str::to_string)
        .collect()
}

/// Destination file being assembled
#[derive(Debug, Default)]
struct DestinationFile {
    pieces: Vec<Piece>,
}

impl DestinationFile {
    /// Recovers the pieces of an existing destination file
    fn parse(path: &Path, contents: String, source: &SourceText) -> Result<Self, ExtractError> {
        let file = SourceFile::parse(path, contents).map_err(parse_error(path))?;

        let mut pieces = vec![];
        let mut next_line = 1;
        for structure in file.body.iter() {
            let (pos, block) = match structure {
                Structure::Attribute(attribute) => (file.pos_of(attribute), None),
                Structure::Block(block) => (file.pos_of(block), Some(block)),
            };
            let Some(pos) = pos else {
                continue;
            };
            let lines = Lines::of(&pos);
            let leading = gap_lines(&file, next_line, lines.start);
            next_line = lines.end + 1;

            let (_, text) = file.line_text(lines.start, lines.end);
            let piece = match block {
                Some(block) if is_locals(block) => existing_locals(&file, source, block, lines),
                Some(block) => {
                    let key = PieceKey::of(block);
                    let origin = source.block(&key).map(|declared| declared.lines);
                    Piece::text(Some(key), origin, text)
                }
                None => Piece::text(None, None, text),
            };
            pieces.push(Piece { leading, ..piece });
        }

        let mut trailing = gap_lines(&file, next_line, file.line_count() + 1);
        while trailing.last().is_some_and(|line| line.trim().is_empty()) {
            trailing.pop();
        }
        if !trailing.is_empty() {
            pieces.push(Piece::text(None, None, &trailing.join("\n")));
        }

        tracing::debug!(path=%path.display(), pieces = pieces.len(), "existing destination file");
        Ok(Self { pieces })
    }

    fn insert(&mut self, piece: Piece) {
        let existing = piece.key.as_ref().and_then(|key| {
            self.pieces
                .iter()
                .position(|current| current.key.as_ref() == Some(key))
        });

        match existing {
            Some(index) => self.pieces[index].merge(piece),
            None => {
                let index = match piece.origin {
                    Some(origin) => insertion_index(&self.pieces, origin.start, |current| {
                        current.origin.map(|lines| lines.start)
                    }),
                    None => self.pieces.len(),
                };
                self.pieces.insert(index, piece);
            }
        }
    }

    fn render(&self) -> String {
        let mut out = String::new();
        let mut previous: Option<Lines> = None;

        for (index, piece) in self.pieces.iter().enumerate() {
            let adjacent = matches!(
                (previous, piece.origin),
                (Some(previous), Some(origin)) if previous.end + 1 == origin.start
            );
            if index > 0 && !adjacent {
                out.push('\n');
            }
            piece.render(&mut out);
            previous = piece.origin;
        }

        out
    }
}

/// `locals` block of an existing destination file, taken apart per attribute
fn existing_locals(file: &SourceFile, source: &SourceText, block: &Block, lines: Lines) -> Piece {
    let declared = block
        .body
        .attributes()
        .find_map(|attribute| source.locals_declaring(attribute.key.value().as_str()));
    let key = declared.map(|declared| declared.key.clone());
    let origin = declared.map(|declared| declared.lines);

    let mut attributes = vec![];
    let mut next_line = lines.start + 1;
    for attribute in block.body.attributes() {
        let Some(pos) = file.pos_of(attribute) else {
            continue;
        };
        if pos.start_line <= lines.start || pos.end_line >= lines.end {
            // shares a line with a brace
            let (_, text) = file.line_text(lines.start, lines.end);
            return Piece::text(key, origin, text);
        }

        let name = attribute.key.value().as_str().to_string();
        let mut text = gap_lines(file, next_line, pos.start_line);
        text.push(file.line_text(pos.start_line, pos.end_line).1.to_string());
        next_line = pos.end_line + 1;

        attributes.push(LocalAttribute {
            origin: declared
                .and_then(|declared| declared.attributes.get(&name))
                .map(|lines| lines.start),
            name,
            text: text.join("\n"),
        });
    }

    let (_, header) = file.line_text(lines.start, lines.start);
    let mut footer = gap_lines(file, next_line, lines.end);
    footer.push(file.line_text(lines.end, lines.end).1.to_string());

    Piece {
        key,
        origin,
        leading: vec![],
        content: Content::Locals {
            header: header.to_string(),
            footer: footer.join("\n"),
            attributes,
        },
    }
}

/// Piece for the local `name`, declared at `attribute` inside the `locals` block at `block`
fn local_piece(source: &SourceText, name: &str, block: Lines, attribute: Lines) -> Piece {
    let key = Some(PieceKey::Locals(block.start));
    if block.start == block.end || attribute.start <= block.start || attribute.end >= block.end {
        let (_, text) = source.text(block);
        return Piece::text(key, Some(block), text);
    }

    let line = |line| source.text(Lines::single(line)).1.to_string();
    let (_, text) = source.text(attribute);
    Piece {
        key,
        origin: Some(block),
        leading: vec![],
        content: Content::Locals {
            header: line(block.start),
            footer: line(block.end),
            attributes: vec![LocalAttribute {
                name: name.to_string(),
                origin: Some(attribute.start),
                text: text.to_string(),
            }],
        },
    }
}

pub struct Extractor<'t> {
    tree: &'t ModuleTree,
    module: ModuleId,
    destination: PathBuf,
    sources: HashMap<PathBuf, SourceText>,
    files: BTreeMap<PathBuf, DestinationFile>,
}

impl<'t> Extractor<'t> {
    /// Extractor copying blocks of `module` into `destination`
    ///
    /// A relative `destination` is taken relative to the current directory.
    pub fn new(
        tree: &'t ModuleTree,
        module: ModuleId,
        destination: &Path,
    ) -> Result<Self, ExtractError> {
        let destination = if destination.is_absolute() {
            normalize(destination)
        } else {
            let cwd = std::env::current_dir().map_err(io_error(destination))?;
            normalize(&cwd.join(destination))
        };

        Ok(Self {
            tree,
            module,
            destination,
            sources: Default::default(),
            files: Default::default(),
        })
    }

    pub fn destination(&self) -> &Path {
        &self.destination
    }

    /// Destination files written so far
    pub fn files(&self) -> impl Iterator<Item = &Path> {
        self.files.keys().map(PathBuf::as_path)
    }

    /// Extracts every block in the closure of `targets`, requirements first
    pub fn extract_closure(
        &mut self,
        graph: &Graph,
        targets: &[BlockId],
    ) -> Result<(), ExtractError> {
        graph.walk(targets, |id| self.extract(id))
    }

    /// Copies one block into its destination file and rewrites that file
    #[tracing::instrument(level = "trace", skip(self), fields(block=%id))]
    pub fn extract(&mut self, id: &BlockId) -> Result<(), ExtractError> {
        let tree = self.tree;
        let module = &tree[self.module];

        if id.block_type == BlockType::Undefined {
            tracing::trace!("undefined block skipped");
            return Ok(());
        }
        let Some(pos) = block_pos(module, id) else {
            return Err(ExtractError::UnknownBlock(id.clone()));
        };

        let relative_file = pos
            .file
            .strip_prefix(&module.dir)
            .ok()
            .or_else(|| pos.file.file_name().map(Path::new))
            .unwrap_or(Path::new("main.tf"));
        let path = self.destination.join(relative_file);

        let source = match self.sources.entry(pos.file.clone()) {
            hash_map::Entry::Occupied(entry) => entry.into_mut(),
            hash_map::Entry::Vacant(entry) => entry.insert(SourceText::read(&pos.file)?),
        };

        let lines = Lines::of(&pos);
        let piece = match module.locals.get(&id.name) {
            Some(local) if id.block_type == BlockType::Local => {
                local_piece(source, &id.name, Lines::of(&local.block_pos), lines)
            }
            _ => {
                let (range, text) = source.text(lines);
                let mut text = text.to_string();
                if id.block_type == BlockType::ModuleCall {
                    rewrite_module_source(&self.destination, module, &id.name, range, &mut text);
                }
                let key = source
                    .block_starting_at(lines.start)
                    .map(|block| block.key.clone());
                Piece::text(key, Some(lines), &text)
            }
        };

        splice(&mut self.files, &path, source, piece)?;

        tracing::info!(block=%id, file=%path.display(), "block extracted");
        Ok(())
    }
}

/// Points a relative `source = "..."` from `destination` back to the module directory
fn rewrite_module_source(
    destination: &Path,
    module: &Module,
    call_name: &str,
    lines: Range<usize>,
    text: &mut String,
) {
    let Some(call) = module.module_calls.get(call_name) else {
        return;
    };
    if !is_local_source(&call.source) {
        return;
    }
    let Some(span) = call.source_span.clone() else {
        return;
    };
    if span.start < lines.start || span.end > lines.end {
        return;
    }

    let target = normalize(&module.dir.join(&call.source));
    let source = local_module_source(&relative_path(destination, &target));
    tracing::debug!(call = call_name, from = call.source, to = source, "module source rewritten");

    let span = span.start - lines.start..span.end - lines.start;
    text.replace_range(span, &format!("\"{source}\""));
}

/// Places `piece` into the destination file at `path` and writes the file
fn splice(
    files: &mut BTreeMap<PathBuf, DestinationFile>,
    path: &Path,
    source: &SourceText,
    piece: Piece,
) -> Result<(), ExtractError> {
    let file = match files.entry(path.to_owned()) {
        btree_map::Entry::Occupied(entry) => entry.into_mut(),
        btree_map::Entry::Vacant(entry) => {
            let existing = match std::fs::read_to_string(path) {
                Ok(contents) => DestinationFile::parse(path, contents, source)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    DestinationFile::default()
                }
                Err(err) => return Err(io_error(path)(err)),
            };
            entry.insert(existing)
        }
    };

    file.insert(piece);

    let rendered = file.render();
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(io_error(dir))?;
    }
    std::fs::write(path, rendered).map_err(io_error(path))
}

/// Source position of a declared block
fn block_pos(module: &Module, id: &BlockId) -> Option<SourcePos> {
    let name = id.name.as_str();
    let pos = match id.block_type {
        BlockType::ModuleCall => &module.module_calls.get(name)?.pos,
        BlockType::Resource => &module.resources(ResourceMode::Managed).get(name)?.pos,
        BlockType::Data => &module.resources(ResourceMode::Data).get(name)?.pos,
        BlockType::Local => &module.locals.get(name)?.pos,
        BlockType::Variable => &module.variables.get(name)?.pos,
        BlockType::Output => &module.outputs.get(name)?.pos,
        BlockType::Provider => &module.provider_configs.get(name)?.pos,
        BlockType::Undefined => return None,
    };
    Some(pos.clone())
}
