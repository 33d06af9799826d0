use crate::config::{CHECKPOINT_FILE, CHECKPOINT_VERSION};
use crate::stats::PipelineStats;
use anyhow::{Context, Result};
use bincode::Options;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};

#[derive(Serialize, Deserialize, Clone, Default, Debug, PartialEq, Eq)]
pub struct CheckpointStats {
    pub records_read: u64,
    pub pages: u64,
    pub redirects: u64,
    pub duplicate_titles: u64,
    pub redirects_resolved: u64,
    pub unresolved_redirects: u64,
    pub redirect_loops: u64,
    pub pages_linked: u64,
    pub page_links: u64,
    pub red_links: u64,
    pub categories: u64,
    pub category_links: u64,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Identities,
    Redirects,
    Links,
    Transpose,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Identities,
        Stage::Redirects,
        Stage::Links,
        Stage::Transpose,
    ];

    pub fn previous(self) -> Option<Stage> {
        match self {
            Stage::Identities => None,
            Stage::Redirects => Some(Stage::Identities),
            Stage::Links => Some(Stage::Redirects),
            Stage::Transpose => Some(Stage::Links),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct InputFingerprint {
    pub path: String,
    pub mtime: u64,
    pub size: u64,
}

impl InputFingerprint {
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)
            .with_context(|| format!("Failed to get metadata for: {:?}", path))?;
        let mtime = metadata
            .modified()
            .context("Failed to get modification time")?
            .duration_since(SystemTime::UNIX_EPOCH)
            .context("Invalid modification time")?
            .as_secs();
        Ok(Self {
            path: path.to_string_lossy().into_owned(),
            mtime,
            size: metadata.len(),
        })
    }
}

pub fn fingerprint_all(paths: &[PathBuf]) -> Result<Vec<InputFingerprint>> {
    paths.iter().map(|p| InputFingerprint::of(p)).collect()
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Checkpoint {
    pub version: u32,
    pub inputs: Vec<InputFingerprint>,
    pub store: String,
    pub completed: Stage,
    pub stats: CheckpointStats,
}

pub fn checkpoint_path(output_dir: &Path) -> PathBuf {
    output_dir.join(CHECKPOINT_FILE)
}

/// Loads the checkpoint if it was written for the same inputs and store.
pub fn load_if_valid(
    output_dir: &Path,
    inputs: &[InputFingerprint],
    store: &str,
) -> Result<Option<Checkpoint>> {
    let path = checkpoint_path(output_dir);

    if !path.exists() {
        return Ok(None);
    }

    let file_size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

    let file = File::open(&path).context("Failed to open checkpoint file")?;
    let reader = BufReader::new(file);

    let options = bincode::options().with_limit(file_size.saturating_add(1024));

    let checkpoint: Checkpoint = match options.deserialize_from(reader) {
        Ok(c) => c,
        Err(e) => {
            warn!(error = %e, "Checkpoint file is corrupt or unreadable");
            return Ok(None);
        }
    };

    if checkpoint.version != CHECKPOINT_VERSION {
        info!(
            cached = checkpoint.version,
            current = CHECKPOINT_VERSION,
            "Checkpoint version mismatch"
        );
        return Ok(None);
    }

    if checkpoint.inputs != inputs {
        info!(
            cached_files = checkpoint.inputs.len(),
            current_files = inputs.len(),
            "Corpus files have changed since checkpoint was created"
        );
        return Ok(None);
    }

    if checkpoint.store != store {
        info!(
            cached = checkpoint.store,
            current = store,
            "Checkpoint store mismatch"
        );
        return Ok(None);
    }

    info!(
        completed = ?checkpoint.completed,
        pages = checkpoint.stats.pages,
        "Loaded valid checkpoint"
    );

    Ok(Some(checkpoint))
}

/// Records stage completion for one pipeline run.
pub struct CheckpointManager {
    checkpoint_path: PathBuf,
    output_dir: PathBuf,
    inputs: Vec<InputFingerprint>,
    store: String,
}

impl CheckpointManager {
    pub fn new(output_dir: &Path, inputs: Vec<InputFingerprint>, store: &str) -> Self {
        Self {
            checkpoint_path: checkpoint_path(output_dir),
            output_dir: output_dir.to_path_buf(),
            inputs,
            store: store.to_string(),
        }
    }

    pub fn load(&self) -> Result<Option<Checkpoint>> {
        load_if_valid(&self.output_dir, &self.inputs, &self.store)
    }

    pub fn save(&self, completed: Stage, stats: &PipelineStats) -> Result<()> {
        let checkpoint = Checkpoint {
            version: CHECKPOINT_VERSION,
            inputs: self.inputs.clone(),
            store: self.store.clone(),
            completed,
            stats: stats.to_checkpoint(),
        };

        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("Failed to create directory: {:?}", self.output_dir))?;

        let tmp_path = self.checkpoint_path.with_extension("bin.tmp");
        let file = File::create(&tmp_path)
            .with_context(|| format!("Failed to create temp checkpoint file: {:?}", tmp_path))?;
        let writer = BufWriter::new(file);

        bincode::DefaultOptions::new()
            .serialize_into(writer, &checkpoint)
            .context("Failed to serialize checkpoint")?;

        fs::rename(&tmp_path, &self.checkpoint_path).with_context(|| {
            format!(
                "Failed to rename temp checkpoint: {:?}",
                self.checkpoint_path
            )
        })?;

        debug!(completed = ?completed, "Checkpoint saved");

        Ok(())
    }
}
