//! Locating config, tokenizer and weight files for a model identifier.
//!
//! An identifier naming an existing directory is read as a local snapshot;
//! anything else must be a Hugging Face repo id and is fetched through the
//! hub cache.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use hf_hub::api::sync::{Api, ApiRepo};
use hf_hub::{Repo, RepoType};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Result, ServeError};

const CONFIG_FILE: &str = "config.json";
const TOKENIZER_FILE: &str = "tokenizer.json";
const SAFETENSORS_INDEX: &str = "model.safetensors.index.json";
const SAFETENSORS_FILE: &str = "model.safetensors";
const PICKLE_INDEX: &str = "pytorch_model.bin.index.json";
const PICKLE_FILE: &str = "pytorch_model.bin";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WeightFiles {
    Safetensors(Vec<PathBuf>),
    Pickle(Vec<PathBuf>),
}

#[derive(Debug, Clone)]
pub struct ModelFiles {
    pub config: PathBuf,
    pub tokenizer: PathBuf,
    pub weights: WeightFiles,
}

#[derive(Deserialize)]
struct ShardIndex {
    weight_map: HashMap<String, String>,
}

trait FileSource {
    fn files(&self) -> &[String];
    fn fetch(&self, name: &str) -> std::result::Result<PathBuf, String>;

    fn has(&self, name: &str) -> bool {
        self.files().iter().any(|f| f == name)
    }
}

struct LocalSnapshot {
    root: PathBuf,
    files: Vec<String>,
}

impl LocalSnapshot {
    fn open(root: &Path) -> std::result::Result<Self, String> {
        let entries = std::fs::read_dir(root).map_err(|e| e.to_string())?;
        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| e.to_string())?;
            if entry.path().is_file() {
                files.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        Ok(Self {
            root: root.to_path_buf(),
            files,
        })
    }
}

impl FileSource for LocalSnapshot {
    fn files(&self) -> &[String] {
        &self.files
    }

    fn fetch(&self, name: &str) -> std::result::Result<PathBuf, String> {
        let path = self.root.join(name);
        if path.is_file() {
            Ok(path)
        } else {
            Err(format!("{} not found", path.display()))
        }
    }
}

struct HubRepo {
    repo: ApiRepo,
    files: Vec<String>,
}

impl HubRepo {
    fn open(api: &Api, repo: Repo) -> std::result::Result<Self, String> {
        let repo = api.repo(repo);
        let info = repo.info().map_err(|e| e.to_string())?;
        let files = info.siblings.into_iter().map(|s| s.rfilename).collect();
        Ok(Self { repo, files })
    }
}

impl FileSource for HubRepo {
    fn files(&self) -> &[String] {
        &self.files
    }

    fn fetch(&self, name: &str) -> std::result::Result<PathBuf, String> {
        self.repo.get(name).map_err(|e| format!("{name}: {e}"))
    }
}

/// Repo ids are `name` or `namespace/name` built from `[A-Za-z0-9._-]`.
pub fn is_valid_repo_id(id: &str) -> bool {
    let parts: Vec<&str> = id.split('/').collect();
    if parts.len() > 2 {
        return false;
    }
    let edge = |c: char| c == '-' || c == '.';
    parts.iter().all(|part| {
        !part.is_empty()
            && part.len() <= 96
            && part
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
            && !part.starts_with(edge)
            && !part.ends_with(edge)
            && !part.contains("..")
    })
}

/// Resolves every file needed to construct the model.
pub fn resolve(model_id: &str, revision: Option<&str>) -> Result<ModelFiles> {
    let local = Path::new(model_id);
    if local.is_dir() {
        if let Some(revision) = revision {
            warn!("Ignoring revision `{}` for local snapshot {}", revision, local.display());
        }
        let snapshot = LocalSnapshot::open(local).map_err(|e| ServeError::load(model_id, e))?;
        let tokenizer = snapshot
            .fetch(TOKENIZER_FILE)
            .map_err(|e| ServeError::load(model_id, e))?;
        return collect(model_id, &snapshot, tokenizer);
    }

    if !is_valid_repo_id(model_id) {
        return Err(ServeError::load(
            model_id,
            "neither a local directory nor a valid Hugging Face repo id",
        ));
    }

    let api = Api::new().map_err(|e| ServeError::load(model_id, e))?;
    let repo = match revision {
        Some(revision) => Repo::with_revision(model_id.to_string(), RepoType::Model, revision.to_string()),
        None => Repo::model(model_id.to_string()),
    };
    info!(
        "Resolving {} at revision {}",
        model_id,
        revision.unwrap_or("main")
    );
    let weights_repo = HubRepo::open(&api, repo).map_err(|e| ServeError::load(model_id, e))?;

    let tokenizer = tokenizer_file(&weights_repo, || {
        let default = HubRepo::open(&api, Repo::model(model_id.to_string()))?;
        Ok(Box::new(default))
    })
    .map_err(|e| ServeError::load(model_id, e))?;

    collect(model_id, &weights_repo, tokenizer)
}

/// The requested revision's tokenizer when it ships one, the default
/// revision's otherwise. Reduced-precision revisions often carry weights only.
fn tokenizer_file(
    requested: &dyn FileSource,
    default_revision: impl FnOnce() -> std::result::Result<Box<dyn FileSource>, String>,
) -> std::result::Result<PathBuf, String> {
    if requested.has(TOKENIZER_FILE) {
        return requested.fetch(TOKENIZER_FILE);
    }
    info!("Revision has no {}, taking it from the default revision", TOKENIZER_FILE);
    default_revision()?.fetch(TOKENIZER_FILE)
}

fn collect(model_id: &str, source: &dyn FileSource, tokenizer: PathBuf) -> Result<ModelFiles> {
    let config = source
        .fetch(CONFIG_FILE)
        .map_err(|e| ServeError::load(model_id, e))?;
    let weights = weight_files(source).map_err(|e| ServeError::load(model_id, e))?;
    Ok(ModelFiles {
        config,
        tokenizer,
        weights,
    })
}

fn weight_files(source: &dyn FileSource) -> std::result::Result<WeightFiles, String> {
    if source.has(SAFETENSORS_INDEX) {
        return shards(source, SAFETENSORS_INDEX).map(WeightFiles::Safetensors);
    }
    if source.has(SAFETENSORS_FILE) {
        return Ok(WeightFiles::Safetensors(vec![source.fetch(SAFETENSORS_FILE)?]));
    }
    if source.has(PICKLE_INDEX) {
        return shards(source, PICKLE_INDEX).map(WeightFiles::Pickle);
    }
    if source.has(PICKLE_FILE) {
        return Ok(WeightFiles::Pickle(vec![source.fetch(PICKLE_FILE)?]));
    }
    Err(format!(
        "no weights found, expected one of {SAFETENSORS_INDEX}, {SAFETENSORS_FILE}, {PICKLE_INDEX}, {PICKLE_FILE}"
    ))
}

fn shards(source: &dyn FileSource, index_file: &str) -> std::result::Result<Vec<PathBuf>, String> {
    let index_path = source.fetch(index_file)?;
    let raw = std::fs::read_to_string(&index_path).map_err(|e| e.to_string())?;
    let index: ShardIndex =
        serde_json::from_str(&raw).map_err(|e| format!("{index_file}: {e}"))?;
    let names: BTreeSet<&String> = index.weight_map.values().collect();
    names.into_iter().map(|name| source.fetch(name)).collect()
}
