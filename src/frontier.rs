use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchOrder {
    /// Lowest score first.
    #[default]
    BestFirst,
    /// Insertion order, ignoring score.
    BreadthFirst,
}

#[derive(Clone, Copy, Debug)]
struct FrontierKey {
    priority: f32,
    seq: u64,
}

impl PartialEq for FrontierKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for FrontierKey {}

impl PartialOrd for FrontierKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FrontierKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .total_cmp(&other.priority)
            .then(self.seq.cmp(&other.seq))
    }
}

/// Candidates ordered best-first, ties broken by insertion order. With a
/// capacity set, inserting past it evicts the entry that would be popped
/// last: the worst-scoring one best-first, the newest one breadth-first.
#[derive(Clone, Debug)]
pub struct Frontier {
    order: SearchOrder,
    capacity: Option<usize>,
    entries: BTreeMap<FrontierKey, Candidate>,
    next_seq: u64,
    evicted: u64,
}

impl Frontier {
    pub fn new(order: SearchOrder) -> Self {
        Self::bounded(order, None)
    }

    pub fn bounded(order: SearchOrder, capacity: Option<usize>) -> Self {
        Self {
            order,
            capacity: capacity.filter(|limit| *limit > 0),
            entries: BTreeMap::new(),
            next_seq: 0,
            evicted: 0,
        }
    }

    /// Rebuilds a frontier from candidates listed best-first.
    pub fn from_candidates(
        order: SearchOrder,
        capacity: Option<usize>,
        candidates: impl IntoIterator<Item = Candidate>,
    ) -> Self {
        let mut frontier = Self::bounded(order, capacity);
        for candidate in candidates {
            frontier.push(candidate);
        }
        frontier
    }

    pub fn order(&self) -> SearchOrder {
        self.order
    }

    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Inserts `candidate`, returning whatever had to be evicted to stay
    /// within capacity.
    pub fn push(&mut self, candidate: Candidate) -> Option<Candidate> {
        let priority = match self.order {
            SearchOrder::BestFirst => candidate.score(),
            SearchOrder::BreadthFirst => 0.0,
        };
        let key = FrontierKey {
            priority,
            seq: self.next_seq,
        };
        self.next_seq += 1;
        self.entries.insert(key, candidate);

        match self.capacity {
            Some(limit) if self.entries.len() > limit => {
                self.evicted += 1;
                self.entries.pop_last().map(|(_, worst)| worst)
            }
            _ => None,
        }
    }

    pub fn pop(&mut self) -> Option<Candidate> {
        self.entries.pop_first().map(|(_, best)| best)
    }

    pub fn peek(&self) -> Option<&Candidate> {
        self.entries.first_key_value().map(|(_, best)| best)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Best-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.entries.values()
    }

    pub fn to_vec(&self) -> Vec<Candidate> {
        self.iter().cloned().collect()
    }
}
