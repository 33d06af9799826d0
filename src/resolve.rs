//! Redirect chain compression.
//!
//! Each pending `source -> target` edge is followed iteratively until it reaches a
//! page id, a title that never existed, or a hash already seen on the same walk. A
//! successful walk writes the final page id onto every hash it passed and drops their
//! redirect entries, so later walks stop after one lookup.

use crate::identity::IdentityStore;
use crate::models::TitleHash;
use crate::store::StoreResult;
use rustc_hash::FxHashSet;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The source already had a page id before this walk.
    AlreadyResolved(u32),
    /// The chain reached a page; every member now maps to it.
    Resolved(u32),
    /// The chain ends at a title with neither page id nor redirect.
    Dangling,
    /// The chain revisits one of its own members.
    Loop,
    /// The source was left unresolved by an earlier walk in this run.
    Skipped,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResolveStats {
    pub entries: u64,
    pub resolved: u64,
    pub already_resolved: u64,
    pub compressed: u64,
    pub dangling: u64,
    pub loops: u64,
    pub skipped: u64,
}

pub struct RedirectResolver<'a> {
    store: &'a IdentityStore,
    /// Members of chains already found to be loops or dangling.
    unresolvable: FxHashSet<TitleHash>,
    stats: ResolveStats,
}

impl<'a> RedirectResolver<'a> {
    pub fn new(store: &'a IdentityStore) -> Self {
        Self {
            store,
            unresolvable: FxHashSet::default(),
            stats: ResolveStats::default(),
        }
    }

    pub fn stats(&self) -> ResolveStats {
        self.stats
    }

    pub fn resolve(&mut self, source: &TitleHash, target: &TitleHash) -> StoreResult<Resolution> {
        self.stats.entries += 1;

        if let Some(id) = self.store.get_page_id(source)? {
            // Left over from an interrupted compression.
            if self.store.clear_redirect(source)? {
                debug!(source = %source, "Cleared stale redirect of resolved page");
            }
            self.stats.already_resolved += 1;
            return Ok(Resolution::AlreadyResolved(id));
        }
        if self.unresolvable.contains(source) {
            self.stats.skipped += 1;
            return Ok(Resolution::Skipped);
        }

        let mut chain = vec![source.clone()];
        let mut visited: FxHashSet<TitleHash> = FxHashSet::default();
        visited.insert(source.clone());
        let mut next = target.clone();

        let resolution = loop {
            if let Some(id) = self.store.get_page_id(&next)? {
                break Resolution::Resolved(id);
            }
            if self.unresolvable.contains(&next) {
                debug!(source = %source, via = %next, "Redirect chain joins an unresolved chain");
                break Resolution::Dangling;
            }
            if visited.contains(&next) {
                warn!(
                    source = %source,
                    repeated = %next,
                    chain_len = chain.len(),
                    "Redirect loop detected"
                );
                break Resolution::Loop;
            }
            match self.store.get_redirect(&next)? {
                Some(after) => {
                    visited.insert(next.clone());
                    chain.push(next);
                    next = after;
                }
                None => {
                    debug!(source = %source, target = %next, "Dangling redirect");
                    break Resolution::Dangling;
                }
            }
        };

        match resolution {
            Resolution::Resolved(id) => {
                for hash in &chain {
                    self.store.set_page_id(hash, id)?;
                    self.store.clear_redirect(hash)?;
                }
                self.stats.resolved += 1;
                self.stats.compressed += chain.len() as u64;
            }
            Resolution::Loop => {
                self.stats.loops += 1;
                self.unresolvable.extend(chain);
            }
            Resolution::Dangling => {
                self.stats.dangling += 1;
                self.unresolvable.extend(chain);
            }
            Resolution::AlreadyResolved(_) | Resolution::Skipped => {}
        }
        Ok(resolution)
    }
}

/// Resolves every pending redirect in the store.
pub fn resolve_all(store: &IdentityStore) -> StoreResult<ResolveStats> {
    let mut resolver = RedirectResolver::new(store);
    for (source, target) in store.all_redirect_entries()? {
        resolver.resolve(&source, &target)?;
    }
    Ok(resolver.stats())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Counter;
    use crate::models::title_to_hash_id;
    use crate::store::SledStore;

    fn page(store: &IdentityStore, title: &str) -> u32 {
        let id = store.next_counter(Counter::Page).unwrap();
        store.set_page_id(&title_to_hash_id(title), id).unwrap();
        id
    }

    fn redirect(store: &IdentityStore, from: &str, to: &str) {
        store
            .set_redirect(&title_to_hash_id(from), &title_to_hash_id(to))
            .unwrap();
    }

    fn page_id(store: &IdentityStore, title: &str) -> Option<u32> {
        store.get_page_id(&title_to_hash_id(title)).unwrap()
    }

    fn backends() -> Vec<IdentityStore> {
        let stores = vec![
            IdentityStore::in_memory(),
            IdentityStore::new(SledStore::temporary().unwrap()),
        ];
        for store in &stores {
            store.reset().unwrap();
        }
        stores
    }

    #[test]
    fn chain_collapses_to_page() {
        for store in backends() {
            let target = page(&store, "Target");
            redirect(&store, "A", "B");
            redirect(&store, "B", "C");
            redirect(&store, "C", "Target");

            let stats = resolve_all(&store).unwrap();
            assert_eq!(stats.loops, 0);
            assert_eq!(stats.dangling, 0);
            for title in ["A", "B", "C"] {
                assert_eq!(page_id(&store, title), Some(target));
                assert_eq!(store.get_redirect(&title_to_hash_id(title)).unwrap(), None);
            }
            assert!(store.all_redirect_entries().unwrap().is_empty());
        }
    }

    #[test]
    fn two_cycle_is_one_loop() {
        for store in backends() {
            redirect(&store, "A", "B");
            redirect(&store, "B", "A");

            let stats = resolve_all(&store).unwrap();
            assert_eq!(stats.loops, 1);
            assert_eq!(stats.skipped, 1);
            assert_eq!(page_id(&store, "A"), None);
            assert_eq!(page_id(&store, "B"), None);
            assert_eq!(store.all_redirect_entries().unwrap().len(), 2);
        }
    }

    #[test]
    fn self_redirect_is_a_loop() {
        let store = IdentityStore::in_memory();
        redirect(&store, "Narcissus", "Narcissus");
        let stats = resolve_all(&store).unwrap();
        assert_eq!(stats.loops, 1);
        assert_eq!(page_id(&store, "Narcissus"), None);
    }

    #[test]
    fn dangling_redirect_is_left_alone() {
        for store in backends() {
            redirect(&store, "Old name", "Deleted page");
            let stats = resolve_all(&store).unwrap();
            assert_eq!(stats.dangling, 1);
            assert_eq!(stats.loops, 0);
            assert_eq!(page_id(&store, "Old name"), None);
            assert_eq!(
                store.get_redirect(&title_to_hash_id("Old name")).unwrap(),
                Some(title_to_hash_id("Deleted page"))
            );
        }
    }

    #[test]
    fn chain_into_loop_is_not_a_second_loop() {
        let store = IdentityStore::in_memory();
        redirect(&store, "A", "B");
        redirect(&store, "B", "A");
        redirect(&store, "C", "A");
        let stats = resolve_all(&store).unwrap();
        assert_eq!(stats.loops, 1);
        assert_eq!(stats.entries, 3);
        assert_eq!(page_id(&store, "C"), None);
    }

    #[test]
    fn resolution_is_idempotent() {
        for store in backends() {
            let target = page(&store, "Target");
            redirect(&store, "A", "Target");
            redirect(&store, "Loop1", "Loop2");
            redirect(&store, "Loop2", "Loop1");
            redirect(&store, "Lost", "Nowhere");

            resolve_all(&store).unwrap();
            let first = store.all_redirect_entries().unwrap();
            let second_stats = resolve_all(&store).unwrap();
            let second = store.all_redirect_entries().unwrap();

            assert_eq!(first, second);
            assert_eq!(second_stats.resolved, 0);
            assert_eq!(page_id(&store, "A"), Some(target));
        }
    }

    #[test]
    fn stale_redirect_on_resolved_page_is_cleared() {
        let store = IdentityStore::in_memory();
        let id = page(&store, "Both");
        redirect(&store, "Both", "Elsewhere");
        let mut resolver = RedirectResolver::new(&store);
        let outcome = resolver
            .resolve(&title_to_hash_id("Both"), &title_to_hash_id("Elsewhere"))
            .unwrap();
        assert_eq!(outcome, Resolution::AlreadyResolved(id));
        assert!(store.all_redirect_entries().unwrap().is_empty());
    }

    #[test]
    fn long_chain_terminates() {
        let store = IdentityStore::in_memory();
        let target = page(&store, "End");
        let titles: Vec<String> = (0..5000).map(|i| format!("Hop {i}")).collect();
        for pair in titles.windows(2) {
            redirect(&store, &pair[0], &pair[1]);
        }
        redirect(&store, &titles[titles.len() - 1], "End");

        let mut resolver = RedirectResolver::new(&store);
        let first = title_to_hash_id(&titles[0]);
        let second = title_to_hash_id(&titles[1]);
        assert_eq!(
            resolver.resolve(&first, &second).unwrap(),
            Resolution::Resolved(target)
        );
        assert_eq!(resolver.stats().compressed, 5000);
        assert_eq!(page_id(&store, "Hop 4321"), Some(target));
    }

    #[test]
    fn long_cycle_terminates() {
        let store = IdentityStore::in_memory();
        let titles: Vec<String> = (0..2000).map(|i| format!("Ring {i}")).collect();
        for (i, title) in titles.iter().enumerate() {
            redirect(&store, title, &titles[(i + 1) % titles.len()]);
        }
        let stats = resolve_all(&store).unwrap();
        assert_eq!(stats.loops, 1);
        assert_eq!(stats.skipped, 1999);
    }
}
