//! Binary adjacency files.
//!
//! A graph file is a sequence of records `[node: u32][count: u32][target: u32; count]`.
//! A pair file is a flat sequence of `(u32, u32)` with no header. All integers are
//! little-endian.

use crate::config::WRITER_BUFFER_SIZE;
use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

const PAIR_SIZE: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRecord {
    pub node: u32,
    pub targets: Vec<u32>,
}

pub struct GraphWriter<W: Write> {
    inner: W,
    buf: Vec<u8>,
    records: u64,
    edges: u64,
}

impl GraphWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create graph file: {:?}", path))?;
        Ok(Self::new(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file)))
    }
}

impl<W: Write> GraphWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: Vec::new(),
            records: 0,
            edges: 0,
        }
    }

    /// Writes one record in a single call so concurrent callers behind a lock never interleave.
    pub fn write_record(&mut self, node: u32, targets: &[u32]) -> io::Result<()> {
        let count = u32::try_from(targets.len()).map_err(|_| {
            io::Error::new(ErrorKind::InvalidInput, "adjacency list exceeds u32 entries")
        })?;
        self.buf.clear();
        self.buf.extend_from_slice(&node.to_le_bytes());
        self.buf.extend_from_slice(&count.to_le_bytes());
        for target in targets {
            self.buf.extend_from_slice(&target.to_le_bytes());
        }
        self.inner.write_all(&self.buf)?;
        self.records += 1;
        self.edges += u64::from(count);
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn edges(&self) -> u64 {
        self.edges
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

pub struct PairWriter<W: Write> {
    inner: W,
    pairs: u64,
}

impl PairWriter<BufWriter<File>> {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("Failed to create pair file: {:?}", path))?;
        Ok(Self::new(BufWriter::with_capacity(WRITER_BUFFER_SIZE, file)))
    }
}

impl<W: Write> PairWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, pairs: 0 }
    }

    pub fn write_pair(&mut self, first: u32, second: u32) -> io::Result<()> {
        let mut pair = [0u8; PAIR_SIZE];
        pair[..4].copy_from_slice(&first.to_le_bytes());
        pair[4..].copy_from_slice(&second.to_le_bytes());
        self.inner.write_all(&pair)?;
        self.pairs += 1;
        Ok(())
    }

    pub fn pairs(&self) -> u64 {
        self.pairs
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Iterator over the records of a graph file.
pub struct GraphReader<R: Read> {
    inner: R,
    done: bool,
}

impl GraphReader<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file =
            File::open(path).with_context(|| format!("Failed to open graph file: {:?}", path))?;
        Ok(Self::new(BufReader::with_capacity(WRITER_BUFFER_SIZE, file)))
    }
}

impl<R: Read> GraphReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner, done: false }
    }

    fn read_record(&mut self) -> io::Result<Option<GraphRecord>> {
        let Some(node) = read_u32(&mut self.inner)? else {
            return Ok(None);
        };
        let count = read_u32(&mut self.inner)?.ok_or_else(truncated)?;
        let mut targets = Vec::with_capacity(count.min(1 << 16) as usize);
        for _ in 0..count {
            targets.push(read_u32(&mut self.inner)?.ok_or_else(truncated)?);
        }
        Ok(Some(GraphRecord { node, targets }))
    }
}

impl<R: Read> Iterator for GraphReader<R> {
    type Item = io::Result<GraphRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn truncated() -> io::Error {
    io::Error::new(ErrorKind::UnexpectedEof, "graph record truncated")
}

/// Reads a little-endian u32, or `None` on a clean end of stream.
fn read_u32<R: Read>(reader: &mut R) -> io::Result<Option<u32>> {
    let mut bytes = [0u8; 4];
    let mut filled = 0;
    while filled < bytes.len() {
        match reader.read(&mut bytes[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(truncated()),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(Some(u32::from_le_bytes(bytes)))
}

pub fn decode_pairs(bytes: &[u8]) -> Result<Vec<(u32, u32)>> {
    if bytes.len() % PAIR_SIZE != 0 {
        bail!(
            "Pair stream length {} is not a multiple of {}",
            bytes.len(),
            PAIR_SIZE
        );
    }
    Ok(bytes
        .chunks_exact(PAIR_SIZE)
        .map(|chunk| {
            let (first, second) = chunk.split_at(4);
            (le_u32(first), le_u32(second))
        })
        .collect())
}

fn le_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(bytes);
    u32::from_le_bytes(raw)
}

pub fn read_pairs(path: &Path) -> Result<Vec<(u32, u32)>> {
    let bytes = fs::read(path).with_context(|| format!("Failed to read pair file: {:?}", path))?;
    decode_pairs(&bytes).with_context(|| format!("Corrupt pair file: {:?}", path))
}

pub fn read_graph(path: &Path) -> Result<Vec<GraphRecord>> {
    GraphReader::open(path)?
        .collect::<io::Result<Vec<_>>>()
        .with_context(|| format!("Corrupt graph file: {:?}", path))
}
