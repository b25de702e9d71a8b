//! File and directory configuration sources.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use walkdir::WalkDir;

use super::bag::Bag;
use super::driver::{DriverContext, SourceDriver};
use super::parser::{Parser, Parsers};
use super::source::{ConfigSource, SharedSource};
use super::{ConfigError, ConfigResult};

/// A configuration source that loads a single file.
///
/// Files can be marked as required or optional. Required files that don't exist
/// cause an error; optional files that don't exist yield an empty snapshot and
/// are picked up by a later reload once they appear.
#[derive(Debug)]
pub struct FileSource {
    path: PathBuf,
    required: bool,
    parser: Arc<dyn Parser>,
    current: Mutex<Bag>,
}

impl FileSource {
    /// Creates a new file source and performs the initial load.
    pub fn new(
        path: impl AsRef<Path>,
        required: bool,
        parser: Arc<dyn Parser>,
    ) -> ConfigResult<Self> {
        let path = path.as_ref().to_path_buf();
        let current = load_config_file(&path, required, parser.as_ref())?.unwrap_or_default();
        Ok(Self {
            path,
            required,
            parser,
            current: Mutex::new(current),
        })
    }
}

impl ConfigSource for FileSource {
    fn snapshot(&self) -> Bag {
        self.current.lock().clone()
    }

    fn reload(&self) -> ConfigResult<bool> {
        let fresh = load_config_file(&self.path, self.required, self.parser.as_ref())?
            .unwrap_or_default();
        let mut current = self.current.lock();
        if *current == fresh {
            return Ok(false);
        }
        *current = fresh;
        Ok(true)
    }
}

/// A configuration source that merges every parseable file of a directory.
///
/// Files are merged in path order, later files overriding earlier ones.
/// Files no registered parser understands are skipped.
#[derive(Debug)]
pub struct DirSource {
    path: PathBuf,
    recursive: bool,
    parser: Option<Arc<dyn Parser>>,
    parsers: Parsers,
    current: Mutex<Bag>,
}

impl DirSource {
    /// Creates a new directory source and performs the initial load.
    ///
    /// With `parser` set, every file is parsed with it; otherwise the parser
    /// is chosen per file by extension.
    pub fn new(
        path: impl AsRef<Path>,
        recursive: bool,
        parser: Option<Arc<dyn Parser>>,
        parsers: Parsers,
    ) -> ConfigResult<Self> {
        let mut source = Self {
            path: path.as_ref().to_path_buf(),
            recursive,
            parser,
            parsers,
            current: Mutex::new(Bag::new()),
        };
        let initial = source.load()?;
        *source.current.get_mut() = initial;
        Ok(source)
    }

    fn load(&self) -> ConfigResult<Bag> {
        if !self.path.is_dir() {
            return Err(ConfigError::FileNotFound(self.path.clone()));
        }

        let walker = WalkDir::new(&self.path)
            .min_depth(1)
            .max_depth(if self.recursive { usize::MAX } else { 1 })
            .sort_by_file_name();

        let mut merged = Bag::new();
        for entry in walker {
            let entry = entry.map_err(|e| ConfigError::ReadError {
                path: e.path().unwrap_or(&self.path).to_path_buf(),
                source: e.into(),
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let parser = match &self.parser {
                Some(parser) => Some(parser.clone()),
                None => self.parsers.for_path(entry.path()),
            };
            let Some(parser) = parser else {
                continue;
            };
            if let Some(bag) = load_config_file(entry.path(), true, parser.as_ref())? {
                merged.merge(&bag);
            }
        }
        Ok(merged)
    }
}

impl ConfigSource for DirSource {
    fn snapshot(&self) -> Bag {
        self.current.lock().clone()
    }

    fn reload(&self) -> ConfigResult<bool> {
        let fresh = self.load()?;
        let mut current = self.current.lock();
        if *current == fresh {
            return Ok(false);
        }
        *current = fresh;
        Ok(true)
    }
}

/// Loads and parses a config file.
///
/// Returns `Ok(None)` if the file doesn't exist and `required` is false.
fn load_config_file(path: &Path, required: bool, parser: &dyn Parser) -> ConfigResult<Option<Bag>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parser.parse(path, &contents).map(Some),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            if required {
                Err(ConfigError::FileNotFound(path.to_path_buf()))
            } else {
                Ok(None)
            }
        }
        Err(e) => Err(ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        }),
    }
}

/// Creates [`FileSource`]s from
/// `{ driver = "file", path = "...", parser_id = "toml", required = true }`.
///
/// Without `parser_id` the parser is picked from the file extension.
#[derive(Debug, Default)]
pub struct FileDriver;

impl SourceDriver for FileDriver {
    fn name(&self) -> &str {
        "file"
    }

    fn create(&self, ctx: &DriverContext<'_>) -> ConfigResult<SharedSource> {
        let path = PathBuf::from(ctx.required_string("path")?);
        let parser = match ctx.entry.get("parser_id").and_then(|v| v.as_str()) {
            Some(id) => ctx.parsers.by_id(id)?,
            None => ctx.parsers.for_path(&path).ok_or_else(|| {
                ConfigError::invalid_config(
                    ctx.id,
                    format!("no parser for '{}'", path.display()),
                )
            })?,
        };
        let required = ctx.entry.get_bool("required", true);
        Ok(Arc::new(FileSource::new(path, required, parser)?))
    }
}

/// Creates [`DirSource`]s from
/// `{ driver = "dir", path = "...", parser_id = "json", recursive = false }`.
#[derive(Debug, Default)]
pub struct DirDriver;

impl SourceDriver for DirDriver {
    fn name(&self) -> &str {
        "dir"
    }

    fn create(&self, ctx: &DriverContext<'_>) -> ConfigResult<SharedSource> {
        let path = ctx.required_string("path")?;
        let parser = match ctx.entry.get("parser_id").and_then(|v| v.as_str()) {
            Some(id) => Some(ctx.parsers.by_id(id)?),
            None => None,
        };
        let recursive = ctx.entry.get_bool("recursive", false);
        Ok(Arc::new(DirSource::new(
            path,
            recursive,
            parser,
            ctx.parsers.clone(),
        )?))
    }
}
