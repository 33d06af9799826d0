//! Stage sequencing over the corpus files.
//!
//! Stage 1 assigns page ids and records redirects, Stage 2 collapses redirect chains,
//! Stage 3 writes the link graphs, and the transpose stage regroups the category
//! membership stream by category. Each stage finishes completely before the next one
//! starts; Stages 1 and 3 fan out one rayon task per corpus file.

use crate::checkpoint::{self, CheckpointManager, CheckpointStats, Stage};
use crate::config::{
    CATEGORY_GRAPH_FILE, CATEGORY_MEMBERS_FILE, MEMBERSHIP_FILE, PAGE_GRAPH_FILE,
    PROGRESS_INTERVAL, SUMMARY_FILE, TITLE_LOG_FILE,
};
use crate::content::{classify_page, extract_links, LinkFilter};
use crate::graph::{self, GraphWriter, PairWriter};
use crate::identity::{Claim, Counter, IdentityStore};
use crate::models::{title_to_hash_id, LinkKind, PageType};
use crate::parser::WikiReader;
use crate::resolve::RedirectResolver;
use crate::stats::PipelineStats;
use crate::titles::TitleLog;
use anyhow::{anyhow, bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub struct PipelineConfig {
    /// Corpus files in processing order.
    pub inputs: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub filter: LinkFilter,
    pub resume: bool,
    /// Worker threads for the per-file stages; 0 uses the rayon default.
    pub threads: usize,
    /// Identifies the backing store in checkpoints, e.g. `sled:<path>`.
    pub store_label: String,
}

impl PipelineConfig {
    pub fn new(inputs: Vec<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            inputs,
            output_dir: output_dir.into(),
            filter: LinkFilter::default(),
            resume: false,
            threads: 0,
            store_label: "memory".to_string(),
        }
    }
}

/// Locations of every file the pipeline writes.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub titles: PathBuf,
    pub page_graph: PathBuf,
    pub category_graph: PathBuf,
    pub membership: PathBuf,
    pub category_members: PathBuf,
    pub summary: PathBuf,
}

impl OutputPaths {
    pub fn new(output_dir: &Path) -> Self {
        Self {
            titles: output_dir.join(TITLE_LOG_FILE),
            page_graph: output_dir.join(PAGE_GRAPH_FILE),
            category_graph: output_dir.join(CATEGORY_GRAPH_FILE),
            membership: output_dir.join(MEMBERSHIP_FILE),
            category_members: output_dir.join(CATEGORY_MEMBERS_FILE),
            summary: output_dir.join(SUMMARY_FILE),
        }
    }
}

#[derive(Serialize)]
struct Summary<'a> {
    completed: Stage,
    #[serde(flatten)]
    counts: &'a CheckpointStats,
}

type SharedGraph = Mutex<GraphWriter<BufWriter<File>>>;

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| anyhow!("Output writer lock poisoned"))
}

fn make_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message(label.to_string());
    pb
}

fn report_progress(pb: &ProgressBar, label: &str, count: u64) {
    if count % PROGRESS_INTERVAL == 0 {
        pb.set_message(format!("{label}: {count} pages"));
        pb.tick();
    }
}

pub struct Pipeline<'a> {
    config: &'a PipelineConfig,
    store: &'a IdentityStore,
    paths: OutputPaths,
    stats: PipelineStats,
    checkpoints: CheckpointManager,
    completed: Option<Stage>,
}

impl<'a> Pipeline<'a> {
    pub fn new(config: &'a PipelineConfig, store: &'a IdentityStore) -> Result<Self> {
        if config.inputs.is_empty() {
            bail!("No corpus files to process");
        }
        fs::create_dir_all(&config.output_dir).with_context(|| {
            format!("Failed to create output directory: {:?}", config.output_dir)
        })?;

        let inputs = checkpoint::fingerprint_all(&config.inputs)?;
        let checkpoints = CheckpointManager::new(&config.output_dir, inputs, &config.store_label);
        let (stats, completed) = match checkpoints.load()? {
            Some(cp) => (PipelineStats::from_checkpoint(&cp.stats), Some(cp.completed)),
            None => (PipelineStats::new(), None),
        };

        Ok(Self {
            config,
            store,
            paths: OutputPaths::new(&config.output_dir),
            stats,
            checkpoints,
            completed,
        })
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    pub fn completed(&self) -> Option<Stage> {
        self.completed
    }

    /// Runs every stage in order, skipping completed ones when resuming.
    pub fn run_all(&mut self) -> Result<()> {
        let start = Instant::now();
        for stage in Stage::ALL {
            if self.config.resume && self.completed.is_some_and(|done| done >= stage) {
                info!(stage = ?stage, "Stage already completed, skipping");
                continue;
            }
            self.run_stage(stage)?;
        }
        info!(
            duration_secs = start.elapsed().as_secs_f64(),
            "Pipeline complete"
        );
        Ok(())
    }

    /// Runs one stage, then persists its totals, the checkpoint and the summary.
    pub fn run_stage(&mut self, stage: Stage) -> Result<()> {
        if let Some(previous) = stage.previous() {
            if self.completed.map_or(true, |done| done < previous) {
                warn!(
                    stage = ?stage,
                    missing = ?previous,
                    "Preceding stage has not completed for these inputs"
                );
            }
        }

        info!(stage = ?stage, "Starting stage");
        let start = Instant::now();
        match stage {
            Stage::Identities => self.assign_identities()?,
            Stage::Redirects => self.resolve_redirects()?,
            Stage::Links => self.write_link_graphs()?,
            Stage::Transpose => {
                transpose_membership(&self.paths.membership, &self.paths.category_members)?;
            }
        }
        info!(
            stage = ?stage,
            duration_secs = start.elapsed().as_secs_f64(),
            "Stage complete"
        );

        for (name, value) in self.stats.summary_counts() {
            self.store
                .record_count(name, value)
                .context("Failed to record summary counts")?;
        }
        self.store.flush().context("Failed to flush identity store")?;
        self.checkpoints.save(stage, &self.stats)?;
        self.completed = Some(stage);
        self.write_summary(stage)
    }

    fn pool(&self) -> Result<rayon::ThreadPool> {
        rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.threads)
            .build()
            .context("Failed to build worker pool")
    }

    fn assign_identities(&mut self) -> Result<()> {
        self.store.reset().context("Failed to reset identity store")?;
        self.stats = PipelineStats::new();

        let log = Mutex::new(TitleLog::create(&self.paths.titles)?);
        let pb = make_spinner("Assigning page ids");
        let files = &self.config.inputs;
        self.pool()?.install(|| {
            files
                .par_iter()
                .try_for_each(|path| self.identities_file(path, &log, &pb))
        })?;
        pb.finish_and_clear();

        let mut log = log
            .into_inner()
            .map_err(|_| anyhow!("Title log lock poisoned"))?;
        log.flush().context("Failed to flush title log")?;

        info!(
            titles_logged = log.entries(),
            pages = self.stats.pages(),
            redirects = self.stats.redirects(),
            duplicates = self.stats.duplicate_titles(),
            "Page ids assigned"
        );
        Ok(())
    }

    fn identities_file(
        &self,
        path: &Path,
        log: &Mutex<TitleLog<BufWriter<File>>>,
        pb: &ProgressBar,
    ) -> Result<()> {
        debug!(file = ?path, "Assigning ids");
        for record in WikiReader::open(path)? {
            let record = record.with_context(|| format!("Failed to parse corpus: {:?}", path))?;
            self.stats.inc_records();
            report_progress(pb, "Assigning page ids", self.stats.records());

            let hash = title_to_hash_id(&record.title);
            lock(log)?
                .append(&hash, &record.title)
                .context("Failed to write title log")?;

            match classify_page(&record.text, &self.config.filter).0 {
                PageType::Redirect(target) => {
                    self.store
                        .set_redirect(&hash, &title_to_hash_id(&target))?;
                    self.stats.inc_redirects();
                }
                PageType::Article => {
                    if !self.store.claim(Claim::PageId, &hash)? {
                        debug!(title = %record.title, "Duplicate title, keeping the first page");
                        self.stats.inc_duplicate_titles();
                        continue;
                    }
                    let id = self.store.next_counter(Counter::Page)?;
                    self.store.set_page_id(&hash, id)?;
                    self.stats.inc_pages();
                }
            }
        }
        Ok(())
    }

    fn resolve_redirects(&mut self) -> Result<()> {
        let entries = self
            .store
            .all_redirect_entries()
            .context("Failed to enumerate redirects")?;
        let pb = make_spinner("Resolving redirects");
        let mut resolver = RedirectResolver::new(self.store);
        for (i, (source, target)) in entries.iter().enumerate() {
            resolver.resolve(source, target)?;
            report_progress(&pb, "Resolving redirects", i as u64 + 1);
        }
        pb.finish_and_clear();

        let resolved = resolver.stats();
        let unresolved = self.store.all_redirect_entries()?.len() as u64;
        self.stats.set_resolution(&resolved, unresolved);
        info!(
            entries = resolved.entries,
            resolved = resolved.resolved,
            dangling = resolved.dangling,
            loops = resolved.loops,
            unresolved = unresolved,
            "Redirects resolved"
        );
        Ok(())
    }

    fn write_link_graphs(&mut self) -> Result<()> {
        self.stats.reset_links();
        self.store
            .clear_claims(Claim::Linked)
            .context("Failed to clear link claims")?;
        let pages = Mutex::new(GraphWriter::create(&self.paths.page_graph)?);
        let categories = Mutex::new(GraphWriter::create(&self.paths.category_graph)?);
        let membership = Mutex::new(PairWriter::create(&self.paths.membership)?);
        let pb = make_spinner("Writing link graphs");

        let files = &self.config.inputs;
        let linked_before = self.stats.pages_linked();
        self.pool()?.install(|| {
            files
                .par_iter()
                .try_for_each(|path| self.links_file(path, &pages, &categories, &membership, &pb))
        })?;
        pb.finish_and_clear();

        let mut edges = [0u64; 2];
        for (written, writer) in edges.iter_mut().zip([pages, categories]) {
            let mut writer = writer
                .into_inner()
                .map_err(|_| anyhow!("Graph writer lock poisoned"))?;
            writer.flush().context("Failed to flush graph file")?;
            *written = writer.edges();
        }
        let mut membership = membership
            .into_inner()
            .map_err(|_| anyhow!("Membership writer lock poisoned"))?;
        membership
            .flush()
            .context("Failed to flush membership file")?;

        let allocated = self.store.counter_value(Counter::Category)?;
        let unused = self.store.unused_category_ids()?.len() as u64;
        self.stats.set_categories(allocated.saturating_sub(unused));

        info!(
            pages = self.stats.pages_linked() - linked_before,
            page_links = self.stats.page_links(),
            red_links = self.stats.red_links(),
            categories = self.stats.categories(),
            category_links = self.stats.category_links(),
            page_edges_written = edges[0],
            category_edges_written = edges[1],
            membership_pairs = membership.pairs(),
            "Link graphs written"
        );
        Ok(())
    }

    fn links_file(
        &self,
        path: &Path,
        pages: &SharedGraph,
        categories: &SharedGraph,
        membership: &Mutex<PairWriter<BufWriter<File>>>,
        pb: &ProgressBar,
    ) -> Result<()> {
        debug!(file = ?path, "Extracting links");
        let mut targets = Vec::new();
        let mut category_ids = Vec::new();
        for record in WikiReader::open(path)? {
            let record = record.with_context(|| format!("Failed to parse corpus: {:?}", path))?;
            let (page_type, text) = classify_page(&record.text, &self.config.filter);
            if let PageType::Redirect(_) = page_type {
                continue;
            }

            let hash = title_to_hash_id(&record.title);
            let Some(page_id) = self.store.get_page_id(&hash)? else {
                bail!(
                    "Article {:?} ({}) has no page id; run the identity stage first",
                    record.title,
                    hash
                );
            };
            if !self.store.claim(Claim::Linked, &hash)? {
                debug!(title = %record.title, "Duplicate title, links already written");
                continue;
            }

            targets.clear();
            category_ids.clear();
            let mut red_links = 0u64;
            for link in extract_links(&text, &self.config.filter) {
                let link_hash = title_to_hash_id(&link.title);
                match link.kind {
                    LinkKind::Page => match self.store.get_page_id(&link_hash)? {
                        Some(id) => targets.push(id),
                        None => {
                            debug!(from = %record.title, to = %link.title, "Red link");
                            red_links += 1;
                        }
                    },
                    LinkKind::Category => {
                        category_ids.push(
                            self.store
                                .get_or_create_category_id(&link.title, &link_hash)?,
                        );
                    }
                }
            }

            lock(pages)?
                .write_record(page_id, &targets)
                .context("Failed to write page graph")?;
            lock(categories)?
                .write_record(page_id, &category_ids)
                .context("Failed to write category graph")?;
            {
                let mut membership = lock(membership)?;
                for &category_id in &category_ids {
                    membership
                        .write_pair(category_id, page_id)
                        .context("Failed to write category membership")?;
                }
            }

            self.stats.inc_pages_linked();
            self.stats.add_page_links(targets.len() as u64);
            self.stats.add_red_links(red_links);
            self.stats.add_category_links(category_ids.len() as u64);
            report_progress(pb, "Writing link graphs", self.stats.pages_linked());
        }
        Ok(())
    }

    fn write_summary(&self, completed: Stage) -> Result<()> {
        let counts = self.stats.to_checkpoint();
        let summary = Summary {
            completed,
            counts: &counts,
        };
        let file = File::create(&self.paths.summary)
            .with_context(|| format!("Failed to create summary: {:?}", self.paths.summary))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, &summary).context("Failed to write summary")?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Regroups the `(category, page)` pair stream into a graph keyed by category id.
///
/// Categories come out in ascending id order; members keep their order in the stream.
pub fn transpose_membership(membership: &Path, output: &Path) -> Result<u64> {
    let pairs = graph::read_pairs(membership)?;
    let mut members: BTreeMap<u32, Vec<u32>> = BTreeMap::new();
    for (category, page) in pairs {
        members.entry(category).or_default().push(page);
    }

    let mut writer = GraphWriter::create(output)?;
    for (category, pages) in &members {
        writer
            .write_record(*category, pages)
            .context("Failed to write category members")?;
    }
    writer.flush().context("Failed to flush category members")?;
    info!(
        categories = writer.records(),
        members = writer.edges(),
        "Category members written"
    );
    Ok(writer.records())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{read_graph, GraphRecord};
    use tempfile::TempDir;

    const DUMP: &str = r#"<mediawiki>
<page><title>Alpha</title><revision><text>[[Beta]] [[Missing]] [[Category:Greek]]</text></revision></page>
<page><title>Beta</title><revision><text>[[alpha|back]] [[Gamma]]</text></revision></page>
<page><title>Gamma</title><revision><text>#REDIRECT [[Alpha]]</text></revision></page>
</mediawiki>"#;

    fn setup(dir: &TempDir) -> PipelineConfig {
        let input = dir.path().join("dump.xml");
        fs::write(&input, DUMP).unwrap();
        PipelineConfig::new(vec![input], dir.path().join("out"))
    }

    #[test]
    fn stages_produce_graphs() {
        let dir = TempDir::new().unwrap();
        let config = setup(&dir);
        let store = IdentityStore::in_memory();
        let mut pipeline = Pipeline::new(&config, &store).unwrap();
        pipeline.run_all().unwrap();

        let stats = pipeline.stats();
        assert_eq!(stats.pages(), 2);
        assert_eq!(stats.redirects(), 1);
        assert_eq!(stats.unresolved_redirects(), 0);
        assert_eq!(stats.page_links(), 3);
        assert_eq!(stats.red_links(), 1);
        assert_eq!(stats.categories(), 1);
        assert_eq!(stats.category_links(), 1);

        let alpha = store.get_page_id(&title_to_hash_id("Alpha")).unwrap().unwrap();
        let beta = store.get_page_id(&title_to_hash_id("Beta")).unwrap().unwrap();
        let mut graph = read_graph(&pipeline.paths().page_graph).unwrap();
        graph.sort_by_key(|r| r.node);
        let mut expected = vec![
            GraphRecord { node: alpha, targets: vec![beta] },
            GraphRecord { node: beta, targets: vec![alpha, alpha] },
        ];
        expected.sort_by_key(|r| r.node);
        assert_eq!(graph, expected);

        let members = read_graph(&pipeline.paths().category_members).unwrap();
        assert_eq!(members, vec![GraphRecord { node: 1, targets: vec![alpha] }]);
        assert_eq!(store.count("Pages").unwrap(), Some(2));
    }

    #[test]
    fn links_stage_requires_identities() {
        let dir = TempDir::new().unwrap();
        let config = setup(&dir);
        let store = IdentityStore::in_memory();
        let mut pipeline = Pipeline::new(&config, &store).unwrap();
        let err = pipeline.run_stage(Stage::Links).unwrap_err();
        assert!(format!("{err:#}").contains("has no page id"));
    }

    #[test]
    fn resume_skips_completed_stages() {
        let dir = TempDir::new().unwrap();
        let mut config = setup(&dir);
        let store = IdentityStore::in_memory();
        Pipeline::new(&config, &store).unwrap().run_all().unwrap();

        fs::remove_file(config.output_dir.join(PAGE_GRAPH_FILE)).unwrap();
        config.resume = true;
        let mut pipeline = Pipeline::new(&config, &store).unwrap();
        assert_eq!(pipeline.completed(), Some(Stage::Transpose));
        pipeline.run_all().unwrap();
        assert!(!config.output_dir.join(PAGE_GRAPH_FILE).exists());
        assert_eq!(pipeline.stats().pages(), 2);
    }

    #[test]
    fn duplicate_title_keeps_first_page() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("dump.xml");
        fs::write(
            &input,
            "<mediawiki>\
             <page><title>A</title><text>[[B]]</text></page>\
             <page><title>B</title><text></text></page>\
             <page><title>A</title><text>[[B]] [[B]]</text></page>\
             </mediawiki>",
        )
        .unwrap();
        let config = PipelineConfig::new(vec![input], dir.path().join("out"));
        let store = IdentityStore::in_memory();
        let mut pipeline = Pipeline::new(&config, &store).unwrap();
        pipeline.run_all().unwrap();

        assert_eq!(pipeline.stats().pages(), 2);
        assert_eq!(pipeline.stats().duplicate_titles(), 1);
        assert_eq!(pipeline.stats().page_links(), 1);
        assert_eq!(store.get_page_id(&title_to_hash_id("A")).unwrap(), Some(1));
        assert_eq!(
            read_graph(&pipeline.paths().page_graph).unwrap(),
            vec![
                GraphRecord { node: 1, targets: vec![2] },
                GraphRecord { node: 2, targets: vec![] },
            ]
        );

        // Rerunning the link stage alone writes the same records again.
        pipeline.run_stage(Stage::Links).unwrap();
        assert_eq!(read_graph(&pipeline.paths().page_graph).unwrap().len(), 2);
    }

    #[test]
    fn transpose_groups_by_category() {
        let dir = TempDir::new().unwrap();
        let pairs_path = dir.path().join("pairs.bin");
        let mut writer = PairWriter::create(&pairs_path).unwrap();
        for (c, p) in [(2, 10), (1, 10), (2, 11), (1, 12)] {
            writer.write_pair(c, p).unwrap();
        }
        writer.flush().unwrap();
        drop(writer);

        let out = dir.path().join("members.graph");
        assert_eq!(transpose_membership(&pairs_path, &out).unwrap(), 2);
        assert_eq!(
            read_graph(&out).unwrap(),
            vec![
                GraphRecord { node: 1, targets: vec![10, 12] },
                GraphRecord { node: 2, targets: vec![10, 11] },
            ]
        );
    }
}
