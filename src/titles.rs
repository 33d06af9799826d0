//! Append-only `hash || title` log kept for debugging lookups.
//!
//! Entries are the 16-char hash immediately followed by the title and a newline. The
//! log tolerates duplicates and is never consulted by the pipeline itself.

use crate::config::WRITER_BUFFER_SIZE;
use crate::models::TitleHash;
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;

pub struct TitleLog<W: Write> {
    inner: W,
    line: String,
    entries: u64,
}

impl TitleLog<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create title log: {:?}", path))?;
        Ok(Self::new(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file)))
    }
}

impl<W: Write> TitleLog<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            line: String::new(),
            entries: 0,
        }
    }

    pub fn append(&mut self, hash: &TitleHash, title: &str) -> io::Result<()> {
        self.line.clear();
        self.line.push_str(hash.as_str());
        self.line.push_str(title);
        self.line.push('\n');
        self.inner.write_all(self.line.as_bytes())?;
        self.entries += 1;
        Ok(())
    }

    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// All titles logged under `hash`, in log order.
pub fn lookup(path: &Path, hash: &TitleHash) -> Result<Vec<String>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open title log: {:?}", path))?;
    let mut titles = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.with_context(|| format!("Failed to read title log: {:?}", path))?;
        if let Some(title) = line.strip_prefix(hash.as_str()) {
            titles.push(title.to_string());
        }
    }
    Ok(titles)
}
