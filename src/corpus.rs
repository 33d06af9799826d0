//! Corpus file discovery and stream opening.

use anyhow::{bail, Context, Result};
use bzip2::read::MultiBzDecoder;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const READ_BUFFER_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Bzip2,
}

impl Compression {
    pub fn detect(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("bz2") => Compression::Bzip2,
            _ => Compression::None,
        }
    }
}

fn is_corpus_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.ends_with(".xml") || name.ends_with(".xml.bz2")
}

/// Expands files and directories into the ordered list of corpus files.
///
/// Directories contribute their `.xml` / `.xml.bz2` entries sorted by name; explicitly
/// named files are kept as given.
pub fn discover<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for input in inputs {
        let input = input.as_ref();
        if input.is_dir() {
            let mut entries: Vec<PathBuf> = fs::read_dir(input)
                .with_context(|| format!("Failed to read corpus directory: {:?}", input))?
                .filter_map(|entry| entry.ok().map(|e| e.path()))
                .filter(|p| p.is_file() && is_corpus_file(p))
                .collect();
            entries.sort();
            files.extend(entries);
        } else if input.is_file() {
            files.push(input.to_path_buf());
        } else {
            bail!("Corpus input does not exist: {:?}", input);
        }
    }
    if files.is_empty() {
        bail!("No corpus files found");
    }
    Ok(files)
}

/// Opens one corpus file as a buffered byte stream, decompressing by extension.
pub fn open(path: &Path) -> Result<Box<dyn BufRead + Send>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open corpus file: {:?}", path))?;
    let reader: Box<dyn BufRead + Send> = match Compression::detect(path) {
        Compression::Bzip2 => Box::new(BufReader::with_capacity(
            READ_BUFFER_SIZE,
            MultiBzDecoder::new(file),
        )),
        Compression::None => Box::new(BufReader::with_capacity(READ_BUFFER_SIZE, file)),
    };
    Ok(reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn detects_compression() {
        assert_eq!(
            Compression::detect(Path::new("enwiki-pages-articles1.xml.bz2")),
            Compression::Bzip2
        );
        assert_eq!(
            Compression::detect(Path::new("enwiki-pages-articles1.xml")),
            Compression::None
        );
    }

    #[test]
    fn discover_sorts_directory_entries() {
        let dir = TempDir::new().unwrap();
        for name in ["b.xml", "a.xml.bz2", "notes.txt"] {
            File::create(dir.path().join(name)).unwrap();
        }
        let files = discover(&[dir.path()]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.xml.bz2", "b.xml"]);
    }

    #[test]
    fn discover_rejects_missing_input() {
        assert!(discover(&[Path::new("/nonexistent/dump.xml")]).is_err());
    }

    #[test]
    fn discover_rejects_empty_directory() {
        let dir = TempDir::new().unwrap();
        assert!(discover(&[dir.path()]).is_err());
    }
}
