//! The TOML parts manifest read by the command-line tool.
//!
//! The main manifest holds the strategy, settings and the parts of the
//! `main` context.  Parts of any other context `foo` live in
//! `foo.parts.toml` next to it, loaded on first use.

use crate::assemble::PartReader;
use crate::config::Settings;
use crate::context::BasicStrategy;
use crate::error::{Error, Result};
use crate::part::{LibChoice, LibType, Part, PartDescriptor, PartSpec};
use dashmap::DashMap;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_MANIFEST: &str = "parts.toml";
pub const MAIN_CONTEXT: &str = "main";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ManifestFile {
    root: Option<String>,
    strategy: Option<StrategyDef>,
    settings: Option<Settings>,
    part: Vec<PartDef>,
}

/// `[strategy]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StrategyDef {
    name: String,
    platform: Option<String>,
    lib_type: Option<LibType>,
    exclude: Vec<String>,
    bootstrap_parts: Vec<String>,
    tool_parts: Vec<String>,
    /// Environment variables whose values are part of the cache key.
    env: Vec<String>,
}

/// A `[[part]]` entry.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PartDef {
    name: String,
    #[serde(default)]
    sub_parts: Vec<SubPartDef>,
    #[serde(default)]
    sequential: bool,
    #[serde(default)]
    early: bool,
    #[serde(default)]
    aspects: Vec<String>,
    #[serde(default)]
    requires_aspects: Vec<String>,
    #[serde(default)]
    exclude_platforms: Vec<String>,
    #[serde(default)]
    exclude_lib_types: Vec<LibType>,
    command: Option<String>,
    clean: Option<String>,
}

/// A sub-part: either `"context:name"` or a table.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SubPartDef {
    Short(String),
    Full {
        name: String,
        context: Option<String>,
        repo: Option<String>,
        platform: Option<String>,
        lib_type: Option<LibType>,
    },
}

impl SubPartDef {
    fn descriptor(&self) -> Result<PartDescriptor> {
        match self {
            SubPartDef::Short(s) => PartDescriptor::parse(s),
            SubPartDef::Full {
                name,
                context,
                repo,
                platform,
                lib_type,
            } => {
                let mut desc = PartDescriptor::parse(name)?;
                if context.is_some() {
                    desc.context = context.clone();
                }
                desc.repo = repo.clone();
                desc.platform = platform.clone();
                desc.lib_type = match lib_type {
                    None => LibChoice::Parent,
                    Some(LibType::Static) => LibChoice::Static,
                    Some(LibType::Dynamic) => LibChoice::Dynamic,
                };
                Ok(desc)
            }
        }
    }
}

/// The part definitions of one context.
struct PartFile {
    path: PathBuf,
    parts: Vec<PartDef>,
}

fn manifest_error(path: &Path, message: impl ToString) -> Error {
    Error::Manifest {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

fn parse_file(path: &Path, text: &str) -> Result<ManifestFile> {
    let file: ManifestFile = toml::from_str(text).map_err(|err| manifest_error(path, err))?;
    let mut seen = HashSet::new();
    for part in &file.part {
        if !seen.insert(part.name.to_lowercase()) {
            return Err(manifest_error(
                path,
                format!("part {} defined twice", part.name),
            ));
        }
    }
    Ok(file)
}

pub struct Manifest {
    path: PathBuf,
    pub root: PartDescriptor,
    pub strategy: BasicStrategy,
    pub platform: Option<String>,
    pub lib_type: Option<LibType>,
    pub env: Vec<String>,
    pub settings: Settings,
    /// Loaded contexts, by lower-cased name.
    files: DashMap<String, Arc<PartFile>>,
}

impl Manifest {
    pub fn load(path: &Path) -> Result<Manifest> {
        let text = std::fs::read_to_string(path).map_err(|err| manifest_error(path, err))?;
        Manifest::parse(path, &text)
    }

    /// Build a manifest from `text`, as if read from `path`.  Other
    /// contexts are still looked up on disk next to `path`.
    pub fn parse(path: &Path, text: &str) -> Result<Manifest> {
        let file = parse_file(path, text)?;
        let root = match (&file.root, file.part.first()) {
            (Some(root), _) => PartDescriptor::parse(root)?,
            (None, Some(first)) => PartDescriptor::named(&first.name),
            (None, None) => return Err(manifest_error(path, "no parts defined")),
        };

        let def = file.strategy.unwrap_or_default();
        let descriptors = |list: &[String]| -> Result<Vec<PartDescriptor>> {
            list.iter().map(|s| PartDescriptor::parse(s)).collect()
        };
        let strategy = BasicStrategy {
            name: def.name,
            files: vec![path.to_path_buf()],
            exclude: def.exclude,
            bootstrap: descriptors(&def.bootstrap_parts)?,
            tools: descriptors(&def.tool_parts)?,
        };

        let files = DashMap::new();
        files.insert(
            MAIN_CONTEXT.to_string(),
            Arc::new(PartFile {
                path: path.to_path_buf(),
                parts: file.part,
            }),
        );
        Ok(Manifest {
            path: path.to_path_buf(),
            root,
            strategy,
            platform: def.platform,
            lib_type: def.lib_type,
            env: def.env,
            settings: file.settings.unwrap_or_default(),
            files,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the parts of `context` are defined.
    pub fn context_path(&self, context: &str) -> PathBuf {
        if context.eq_ignore_ascii_case(MAIN_CONTEXT) {
            return self.path.clone();
        }
        let dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        dir.join(format!("{}.parts.toml", context))
    }

    fn context_file(&self, context: &str) -> Result<Arc<PartFile>> {
        let key = context.to_lowercase();
        if let Some(file) = self.files.get(&key) {
            return Ok(file.value().clone());
        }
        let path = self.context_path(context);
        debug!("loading context {} from {:?}", context, path);
        let text = std::fs::read_to_string(&path).map_err(|err| manifest_error(&path, err))?;
        let file = parse_file(&path, &text)?;
        if file.strategy.is_some() || file.settings.is_some() || file.root.is_some() {
            return Err(manifest_error(
                &path,
                "only the main manifest may set root, strategy or settings",
            ));
        }
        let file = Arc::new(PartFile {
            path,
            parts: file.part,
        });
        Ok(self.files.entry(key).or_insert(file).value().clone())
    }
}

impl PartReader for Manifest {
    fn read_part(&self, spec: &PartSpec) -> Result<Part> {
        let file = self.context_file(&spec.context)?;
        let def = file
            .parts
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(&spec.name))
            .ok_or_else(|| {
                manifest_error(
                    &file.path,
                    format!("no part {} in context {}", spec.name, spec.context),
                )
            })?;

        let mut part = Part::new(spec.clone(), &file.path);
        part.sub_parts = def
            .sub_parts
            .iter()
            .map(SubPartDef::descriptor)
            .collect::<Result<_>>()?;
        part.sequential = def.sequential;
        part.early = def.early;
        part.aspects = def.aspects.clone();
        part.requires_aspects = def.requires_aspects.clone();
        part.exclude_platforms = def.exclude_platforms.clone();
        part.exclude_lib_types = def.exclude_lib_types.clone();
        part.command = def.command.clone();
        part.clean = def.clean.clone();
        Ok(part)
    }
}
