//! Reference inputs.
//!
//! - [`FileSystemInput`]: recursive directory walk, one item per file
//! - [`JsonLinesInput`]: one item descriptor per JSON line
//! - [`StaticInput`]: a fixed in-memory list

use regex::Regex;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufRead, BufReader, Lines};
use std::path::PathBuf;
use tracing::debug;
use walkdir::WalkDir;

use crate::config::InputConfig;
use crate::model::{AssetDescriptor, ItemDescriptor, Mapping};
use crate::traits::{Input, InputError, ItemStream};

/// Builds the input described by `config`.
pub fn from_config(config: &InputConfig) -> Result<Box<dyn Input>, InputError> {
    Ok(match config {
        InputConfig::FileSystem {
            path,
            filter,
            follow_links,
        } => {
            let mut input = FileSystemInput::new(path).with_follow_links(*follow_links);
            if let Some(filter) = filter {
                input = input.with_filter(filter)?;
            }
            Box::new(input)
        }
        InputConfig::JsonLines { path } => Box::new(JsonLinesInput::new(path)),
    })
}

// ============================================================================
// File System
// ============================================================================

/// Walks `root` depth first, yielding every regular file whose path matches
/// the optional filter. Entries are visited in name order so repeated walks
/// of an unchanged tree agree. Symbolic links are not followed unless
/// enabled with [`with_follow_links`](Self::with_follow_links).
#[derive(Debug, Clone)]
pub struct FileSystemInput {
    root: PathBuf,
    filter: Option<Regex>,
    follow_links: bool,
}

impl FileSystemInput {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            filter: None,
            follow_links: false,
        }
    }

    /// Only paths matching `pattern` (unanchored) are harvested.
    pub fn with_filter(mut self, pattern: &str) -> Result<Self, InputError> {
        self.filter = Some(Regex::new(pattern)?);
        Ok(self)
    }

    /// Descends into linked directories. Link loops are reported as input
    /// errors instead of being walked.
    pub fn with_follow_links(mut self, follow_links: bool) -> Self {
        self.follow_links = follow_links;
        self
    }
}

impl Input for FileSystemInput {
    fn name(&self) -> &str {
        "file_system"
    }

    fn items(&self) -> Result<ItemStream, InputError> {
        if !self.root.exists() {
            return Err(InputError::Io {
                path: self.root.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "root does not exist"),
            });
        }

        let filter = self.filter.clone();
        let walker = WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by_file_name()
            .into_iter()
            .filter_map(move |entry| {
                let entry = match entry {
                    Ok(entry) => entry,
                    Err(e) => return Some(Err(InputError::from(e))),
                };
                if !entry.file_type().is_file() {
                    return None;
                }

                let uri = entry.path().to_string_lossy().into_owned();
                if let Some(filter) = &filter {
                    if !filter.is_match(&uri) {
                        return None;
                    }
                }
                debug!(%uri, "Input processing");
                Some(Ok(ItemDescriptor::new(uri)))
            });
        Ok(Box::new(walker))
    }
}

// ============================================================================
// JSON Lines
// ============================================================================

/// Line shape accepted by [`JsonLinesInput`]; `id` defaults to `uri`.
#[derive(Debug, Deserialize)]
struct ItemLine {
    #[serde(default)]
    id: Option<String>,
    uri: String,
    #[serde(default)]
    assets: Vec<AssetDescriptor>,
    #[serde(default)]
    attributes: Mapping,
}

impl From<ItemLine> for ItemDescriptor {
    fn from(line: ItemLine) -> Self {
        ItemDescriptor {
            id: line.id.unwrap_or_else(|| line.uri.clone()),
            uri: line.uri,
            assets: line.assets,
            attributes: line.attributes,
        }
    }
}

/// Reads item descriptors from a file with one JSON object per line.
///
/// Blank lines and exact duplicate lines are skipped.
#[derive(Debug, Clone)]
pub struct JsonLinesInput {
    path: PathBuf,
}

impl JsonLinesInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Input for JsonLinesInput {
    fn name(&self) -> &str {
        "json_lines"
    }

    fn items(&self) -> Result<ItemStream, InputError> {
        let file = File::open(&self.path).map_err(|source| InputError::Io {
            path: self.path.clone(),
            source,
        })?;
        Ok(Box::new(JsonLines {
            path: self.path.clone(),
            lines: BufReader::new(file).lines(),
            line_no: 0,
            seen: HashSet::new(),
        }))
    }
}

struct JsonLines {
    path: PathBuf,
    lines: Lines<BufReader<File>>,
    line_no: usize,
    seen: HashSet<String>,
}

impl Iterator for JsonLines {
    type Item = Result<ItemDescriptor, InputError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(source) => {
                    return Some(Err(InputError::Io {
                        path: self.path.clone(),
                        source,
                    }))
                }
            };
            self.line_no += 1;

            let trimmed = line.trim();
            if trimmed.is_empty() || self.seen.contains(trimmed) {
                continue;
            }
            self.seen.insert(trimmed.to_string());

            return Some(
                serde_json::from_str::<ItemLine>(trimmed)
                    .map(ItemDescriptor::from)
                    .map_err(|e| InputError::InvalidItem {
                        line: self.line_no,
                        reason: e.to_string(),
                    }),
            );
        }
    }
}

// ============================================================================
// Static
// ============================================================================

/// A fixed list of items, cloned on every enumeration.
#[derive(Debug, Clone, Default)]
pub struct StaticInput {
    items: Vec<ItemDescriptor>,
}

impl StaticInput {
    pub fn new(items: Vec<ItemDescriptor>) -> Self {
        Self { items }
    }
}

impl FromIterator<ItemDescriptor> for StaticInput {
    fn from_iter<T: IntoIterator<Item = ItemDescriptor>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl Input for StaticInput {
    fn name(&self) -> &str {
        "static"
    }

    fn items(&self) -> Result<ItemStream, InputError> {
        Ok(Box::new(self.items.clone().into_iter().map(Ok)))
    }
}
