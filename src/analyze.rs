//! Whole-graph queries over a decoded adjacency file.
//!
//! [`LinkGraph`] keeps the adjacency lists in compressed sparse row form indexed by
//! node id. Node ids run from 1 to the largest id seen as a node or as a target; slot 0
//! is never a node. Several records for one node are concatenated.

use crate::config::{PAGERANK_DAMPING, PAGERANK_MAX_ITERATIONS, PAGERANK_TOLERANCE};
use crate::graph::{self, GraphRecord};
use anyhow::Result;
use rayon::prelude::*;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

const UNVISITED: u32 = u32::MAX;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("node {node} is out of range 1..={nodes}")]
    NodeOutOfRange { node: u32, nodes: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Degree {
    pub in_degree: u32,
    pub out_degree: u32,
}

/// One question asked of a loaded graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Query {
    /// Nodes reachable from a node, counted per BFS distance.
    Distances(u32),
    /// Strongly connected component sizes as `(size, how many)`.
    Components,
    Degree(u32),
    /// The `n` highest PageRank scores.
    Rank(usize),
}

pub struct LinkGraph {
    offsets: Vec<usize>,
    edges: Vec<u32>,
    in_degree: Vec<u32>,
}

impl LinkGraph {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = GraphRecord>,
    {
        let mut lists: Vec<Vec<u32>> = vec![Vec::new()];
        for GraphRecord { node, targets } in records {
            let highest = targets.iter().copied().fold(node, u32::max) as usize;
            if lists.len() <= highest {
                lists.resize_with(highest + 1, Vec::new);
            }
            lists[node as usize].extend(targets);
        }

        let mut offsets = Vec::with_capacity(lists.len() + 1);
        let mut edges = Vec::with_capacity(lists.iter().map(Vec::len).sum());
        let mut in_degree = vec![0u32; lists.len()];
        offsets.push(0);
        for list in &lists {
            for &target in list {
                in_degree[target as usize] = in_degree[target as usize].saturating_add(1);
            }
            edges.extend_from_slice(list);
            offsets.push(edges.len());
        }
        Self {
            offsets,
            edges,
            in_degree,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let graph = Self::from_records(graph::read_graph(path)?);
        info!(
            file = ?path,
            nodes = graph.num_nodes(),
            edges = graph.num_edges(),
            "Graph loaded"
        );
        Ok(graph)
    }

    fn slots(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn num_nodes(&self) -> u32 {
        (self.slots() - 1) as u32
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn contains(&self, node: u32) -> bool {
        node >= 1 && (node as usize) < self.slots()
    }

    fn targets_at(&self, slot: usize) -> &[u32] {
        &self.edges[self.offsets[slot]..self.offsets[slot + 1]]
    }

    pub fn targets(&self, node: u32) -> Option<&[u32]> {
        self.contains(node).then(|| self.targets_at(node as usize))
    }

    fn check(&self, node: u32) -> Result<(), AnalysisError> {
        if self.contains(node) {
            Ok(())
        } else {
            Err(AnalysisError::NodeOutOfRange {
                node,
                nodes: self.num_nodes(),
            })
        }
    }

    pub fn degree(&self, node: u32) -> Result<Degree, AnalysisError> {
        self.check(node)?;
        Ok(Degree {
            in_degree: self.in_degree[node as usize],
            out_degree: self.targets_at(node as usize).len() as u32,
        })
    }

    /// `counts[d]` is the number of nodes at shortest distance `d` from `start`.
    /// `counts[0]` is always 1 and the list ends at the farthest reachable distance.
    pub fn distance_counts(&self, start: u32) -> Result<Vec<u32>, AnalysisError> {
        self.check(start)?;
        let mut dist = vec![UNVISITED; self.slots()];
        let mut counts = vec![1u32];
        let mut frontier = VecDeque::new();
        dist[start as usize] = 0;
        frontier.push_back(start);

        while let Some(node) = frontier.pop_front() {
            let next = dist[node as usize] + 1;
            for &target in self.targets_at(node as usize) {
                let seen = &mut dist[target as usize];
                if *seen != UNVISITED {
                    continue;
                }
                *seen = next;
                frontier.push_back(target);
                if counts.len() <= next as usize {
                    counts.push(0);
                }
                counts[next as usize] += 1;
            }
        }
        Ok(counts)
    }

    /// Sizes of the strongly connected components, in the order Tarjan's algorithm
    /// closes them. Uses an explicit call stack so long chains cannot overflow.
    pub fn component_sizes(&self) -> Vec<u32> {
        let mut tarjan = Tarjan::new(self.slots());
        let mut sizes = Vec::new();

        for root in 1..self.slots() {
            if tarjan.index[root] != UNVISITED {
                continue;
            }
            tarjan.visit(root, self.offsets[root]);

            while let Some(frame) = tarjan.call.last_mut() {
                let node = frame.0;
                if frame.1 < self.offsets[node + 1] {
                    let target = self.edges[frame.1] as usize;
                    frame.1 += 1;
                    if tarjan.index[target] == UNVISITED {
                        tarjan.visit(target, self.offsets[target]);
                    } else if tarjan.on_stack[target] {
                        tarjan.low[node] = tarjan.low[node].min(tarjan.index[target]);
                    }
                    continue;
                }

                tarjan.call.pop();
                if let Some(&(parent, _)) = tarjan.call.last() {
                    tarjan.low[parent] = tarjan.low[parent].min(tarjan.low[node]);
                }
                if tarjan.low[node] == tarjan.index[node] {
                    sizes.push(tarjan.pop_component(node));
                }
            }
        }
        sizes
    }

    /// `(component size, number of components of that size)`, ascending by size.
    pub fn component_histogram(&self) -> Vec<(u32, u32)> {
        let mut histogram: BTreeMap<u32, u32> = BTreeMap::new();
        for size in self.component_sizes() {
            *histogram.entry(size).or_default() += 1;
        }
        histogram.into_iter().collect()
    }

    /// PageRank with uniform teleport; rank held by nodes without out-links is spread
    /// over every node. Returns the `top` highest `(score, node)` pairs, ties by node id.
    pub fn page_rank(&self, top: usize) -> Vec<(f64, u32)> {
        let n = self.num_nodes() as usize;
        if n == 0 || top == 0 {
            return Vec::new();
        }
        let (in_offsets, sources) = self.incoming();
        let out_degree: Vec<usize> = (0..=n).map(|slot| self.targets_at(slot).len()).collect();
        let teleport = (1.0 - PAGERANK_DAMPING) / n as f64;

        let mut rank = vec![1.0 / n as f64; n + 1];
        rank[0] = 0.0;
        for iteration in 1..=PAGERANK_MAX_ITERATIONS {
            let dangling: f64 = (1..=n)
                .filter(|&node| out_degree[node] == 0)
                .map(|node| rank[node])
                .sum();
            let shared = teleport + PAGERANK_DAMPING * dangling / n as f64;

            let next: Vec<f64> = (0..=n)
                .into_par_iter()
                .map(|node| {
                    if node == 0 {
                        return 0.0;
                    }
                    let inflow: f64 = sources[in_offsets[node]..in_offsets[node + 1]]
                        .iter()
                        .map(|&source| rank[source as usize] / out_degree[source as usize] as f64)
                        .sum();
                    shared + PAGERANK_DAMPING * inflow
                })
                .collect();

            let change: f64 = next.iter().zip(&rank).map(|(a, b)| (a - b).abs()).sum();
            rank = next;
            if change < PAGERANK_TOLERANCE {
                debug!(iterations = iteration, "PageRank converged");
                break;
            }
        }

        let mut ranked: Vec<(f64, u32)> = (1..=n).map(|node| (rank[node], node as u32)).collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        ranked.truncate(top);
        ranked
    }

    /// Reverse adjacency as `(offsets, sources)`.
    fn incoming(&self) -> (Vec<usize>, Vec<u32>) {
        let mut offsets = vec![0usize; self.slots() + 1];
        for (slot, &degree) in self.in_degree.iter().enumerate() {
            offsets[slot + 1] = offsets[slot] + degree as usize;
        }
        let mut fill = offsets.clone();
        let mut sources = vec![0u32; self.edges.len()];
        for slot in 0..self.slots() {
            for &target in self.targets_at(slot) {
                let at = &mut fill[target as usize];
                sources[*at] = slot as u32;
                *at += 1;
            }
        }
        (offsets, sources)
    }

    pub fn answer(&self, query: Query) -> Result<Value, AnalysisError> {
        let answer = match query {
            Query::Distances(node) => json!({ "count_dist": self.distance_counts(node)? }),
            Query::Components => json!({ "components": self.component_histogram() }),
            Query::Degree(node) => {
                let degree = self.degree(node)?;
                json!({ "in_degree": degree.in_degree, "out_degree": degree.out_degree })
            }
            Query::Rank(top) => json!({ "ranks": self.page_rank(top) }),
        };
        Ok(answer)
    }
}

struct Tarjan {
    index: Vec<u32>,
    low: Vec<u32>,
    on_stack: Vec<bool>,
    stack: Vec<usize>,
    /// `(node, next edge position)` frames of the simulated recursion.
    call: Vec<(usize, usize)>,
    next_index: u32,
}

impl Tarjan {
    fn new(slots: usize) -> Self {
        Self {
            index: vec![UNVISITED; slots],
            low: vec![0; slots],
            on_stack: vec![false; slots],
            stack: Vec::new(),
            call: Vec::new(),
            next_index: 0,
        }
    }

    fn visit(&mut self, node: usize, first_edge: usize) {
        self.index[node] = self.next_index;
        self.low[node] = self.next_index;
        self.next_index += 1;
        self.stack.push(node);
        self.on_stack[node] = true;
        self.call.push((node, first_edge));
    }

    fn pop_component(&mut self, root: usize) -> u32 {
        let mut size = 0;
        while let Some(member) = self.stack.pop() {
            self.on_stack[member] = false;
            size += 1;
            if member == root {
                break;
            }
        }
        size
    }
}
