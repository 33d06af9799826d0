//! Wikigraph: page-link and category graphs from Wikipedia XML dumps
//!
//! The dump is read three times in strictly ordered stages because every link target
//! must be resolvable to a numeric id before any adjacency list is written:
//!
//! 1. **Identity Stage** -- Stream every page, record `hash || title` in the title log,
//!    store redirect edges, and give every article a fresh page id
//! 2. **Redirect Stage** -- Collapse redirect chains so each redirect title maps straight
//!    to the page id at the end of its chain; loops and dangling chains stay unresolved
//! 3. **Link Stage** -- Stream the dump again, extract `[[...]]` links and categories,
//!    and write binary adjacency records for pages and categories
//! 4. **Transpose Stage** -- Regroup the category membership stream by category id
//!
//! # Architecture
//!
//! - **Title hashes as join keys** -- Truncated SHA-256 of the title, sharded by prefix
//! - **Store-backed state** -- Ids, redirects and category ids live in a [`KvStore`]
//!   (durable sled database or in-memory dashmap), never in stage-local memory
//! - **Race-safe ids** -- Counters use atomic increment; category ids use set-if-absent
//! - **Parallel files** -- Identity and link stages process corpus files concurrently
//! - **Resumable processing** -- A checkpoint records the last completed stage
//!
//! # Key Modules
//!
//! - [`parser`] -- Streaming XML parser yielding `(title, text)` records
//! - [`corpus`] -- Corpus file discovery and bzip2 selection
//! - [`content`] -- Link extraction, normalization and redirect detection
//! - [`entities`] -- HTML/XML character reference decoding
//! - [`store`] -- Key-value store trait with sled and in-memory backends
//! - [`identity`] -- Sharded title-hash maps, counters and category ids
//! - [`resolve`] -- Iterative redirect chain compression
//! - [`graph`] -- Binary adjacency and pair-stream encoding
//! - [`titles`] -- Append-only title log
//! - [`analyze`] -- BFS distances, components, degrees and PageRank over a graph file
//! - [`pipeline`] -- Stage sequencing
//! - [`checkpoint`] -- Stage completion checkpointing
//! - [`stats`] -- Thread-safe atomic counters for pipeline metrics
//! - [`config`] -- Constants for hashing, sharding and output files
//!
//! # Example Usage
//!
//! ```bash
//! # Run all stages against a durable store
//! wikigraph run -i enwiki-latest-pages-articles.xml.bz2 -o output/
//!
//! # Run a single stage in its own process, resuming from the same store
//! wikigraph stage2 -i enwiki-latest-pages-articles.xml.bz2 -o output/
//!
//! # Inspect results
//! wikigraph print-graph output/pages.graph --limit 10
//! wikigraph lookup "Rust (programming language)" -o output/
//! wikigraph analyze output/pages.graph rank --top 20
//! ```
//!
//! [`KvStore`]: store::KvStore

pub mod analyze;
pub mod checkpoint;
pub mod config;
pub mod content;
pub mod corpus;
pub mod entities;
pub mod graph;
pub mod identity;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod resolve;
pub mod stats;
pub mod store;
pub mod titles;

