use crate::checkpoint::CheckpointStats;
use crate::resolve::ResolveStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Totals accumulated across all stages; shared by the per-file workers.
#[derive(Default)]
pub struct PipelineStats {
    pub records_read: AtomicU64,
    pub pages: AtomicU64,
    pub redirects: AtomicU64,
    pub duplicate_titles: AtomicU64,
    pub redirects_resolved: AtomicU64,
    pub unresolved_redirects: AtomicU64,
    pub redirect_loops: AtomicU64,
    pub pages_linked: AtomicU64,
    pub page_links: AtomicU64,
    pub red_links: AtomicU64,
    pub categories: AtomicU64,
    pub category_links: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_records(&self) {
        self.records_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pages(&self) {
        self.pages.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_redirects(&self) {
        self.redirects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_duplicate_titles(&self) {
        self.duplicate_titles.fetch_add(1, Ordering::Relaxed);
    }

    /// Overwrites the Stage 2 totals; resolution always re-walks every pending edge.
    ///
    /// Resolved edges are removed from the store, so a rerun only sees the pending ones.
    /// Every redirect recorded by Stage 1 and no longer pending counts as resolved.
    pub fn set_resolution(&self, resolve: &ResolveStats, unresolved: u64) {
        let walked = resolve.resolved + resolve.already_resolved;
        let settled = self.redirects().saturating_sub(unresolved);
        self.redirects_resolved
            .store(walked.max(settled), Ordering::Relaxed);
        self.redirect_loops.store(resolve.loops, Ordering::Relaxed);
        self.unresolved_redirects
            .store(unresolved, Ordering::Relaxed);
    }

    pub fn inc_pages_linked(&self) {
        self.pages_linked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_page_links(&self, count: u64) {
        self.page_links.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_red_links(&self, count: u64) {
        self.red_links.fetch_add(count, Ordering::Relaxed);
    }

    pub fn set_categories(&self, count: u64) {
        self.categories.store(count, Ordering::Relaxed);
    }

    pub fn add_category_links(&self, count: u64) {
        self.category_links.fetch_add(count, Ordering::Relaxed);
    }

    /// Zeroes the counters a re-run of Stage 3 accumulates into.
    pub fn reset_links(&self) {
        for counter in [
            &self.pages_linked,
            &self.page_links,
            &self.red_links,
            &self.categories,
            &self.category_links,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub fn records(&self) -> u64 {
        self.records_read.load(Ordering::Relaxed)
    }

    pub fn pages(&self) -> u64 {
        self.pages.load(Ordering::Relaxed)
    }

    pub fn redirects(&self) -> u64 {
        self.redirects.load(Ordering::Relaxed)
    }

    pub fn duplicate_titles(&self) -> u64 {
        self.duplicate_titles.load(Ordering::Relaxed)
    }

    pub fn redirects_resolved(&self) -> u64 {
        self.redirects_resolved.load(Ordering::Relaxed)
    }

    pub fn unresolved_redirects(&self) -> u64 {
        self.unresolved_redirects.load(Ordering::Relaxed)
    }

    pub fn redirect_loops(&self) -> u64 {
        self.redirect_loops.load(Ordering::Relaxed)
    }

    pub fn pages_linked(&self) -> u64 {
        self.pages_linked.load(Ordering::Relaxed)
    }

    pub fn page_links(&self) -> u64 {
        self.page_links.load(Ordering::Relaxed)
    }

    pub fn red_links(&self) -> u64 {
        self.red_links.load(Ordering::Relaxed)
    }

    pub fn categories(&self) -> u64 {
        self.categories.load(Ordering::Relaxed)
    }

    pub fn category_links(&self) -> u64 {
        self.category_links.load(Ordering::Relaxed)
    }

    /// Store summary keys (`s:count:<name>`) and their current values.
    pub fn summary_counts(&self) -> [(&'static str, u64); 8] {
        [
            ("Pages", self.pages()),
            ("Redirects", self.redirects()),
            ("Unresolved_redirects", self.unresolved_redirects()),
            ("Redirect_loops", self.redirect_loops()),
            ("Page_links", self.page_links()),
            ("Red_links", self.red_links()),
            ("Categories", self.categories()),
            ("Category_links", self.category_links()),
        ]
    }

    /// Create stats initialized from a checkpoint
    pub fn from_checkpoint(cp: &CheckpointStats) -> Self {
        Self {
            records_read: AtomicU64::new(cp.records_read),
            pages: AtomicU64::new(cp.pages),
            redirects: AtomicU64::new(cp.redirects),
            duplicate_titles: AtomicU64::new(cp.duplicate_titles),
            redirects_resolved: AtomicU64::new(cp.redirects_resolved),
            unresolved_redirects: AtomicU64::new(cp.unresolved_redirects),
            redirect_loops: AtomicU64::new(cp.redirect_loops),
            pages_linked: AtomicU64::new(cp.pages_linked),
            page_links: AtomicU64::new(cp.page_links),
            red_links: AtomicU64::new(cp.red_links),
            categories: AtomicU64::new(cp.categories),
            category_links: AtomicU64::new(cp.category_links),
        }
    }

    /// Convert to checkpoint stats for persistence
    pub fn to_checkpoint(&self) -> CheckpointStats {
        CheckpointStats {
            records_read: self.records(),
            pages: self.pages(),
            redirects: self.redirects(),
            duplicate_titles: self.duplicate_titles(),
            redirects_resolved: self.redirects_resolved(),
            unresolved_redirects: self.unresolved_redirects(),
            redirect_loops: self.redirect_loops(),
            pages_linked: self.pages_linked(),
            page_links: self.page_links(),
            red_links: self.red_links(),
            categories: self.categories(),
            category_links: self.category_links(),
        }
    }
}
