//! Generic union-find returning stable representative group handles.
use crate::utils::HashMap;
use std::hash::Hash;

/// A handle to a group in a `DisjointSets<T>`.
///
/// Handles identify the *group*, not a snapshot of its members: once `find_set` returns a handle
/// for `a` and `b` that compare equal, they keep comparing equal through any number of further
/// `map_entries` calls, because the handle is the root index of the union-find forest and roots
/// are only ever redirected, never invalidated.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GroupId(u32);

struct Node {
    parent: u32,
    rank: u32,
}

/// A union-find over values of type `T`, keyed by identity (`T: Eq + Hash`, typically a small
/// integer or pointer-like id).
#[derive(Default)]
pub struct DisjointSets<T> {
    index_of: HashMap<T, u32>,
    nodes: Vec<Node>,
}

impl<T> DisjointSets<T>
where
    T: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        DisjointSets {
            index_of: HashMap::default(),
            nodes: Vec::new(),
        }
    }

    /// Ensures `item` has an entry, creating a new singleton group for it if necessary, and
    /// returns its slot index.
    fn entry(&mut self, item: &T) -> u32 {
        if let Some(&idx) = self.index_of.get(item) {
            return idx;
        }
        let idx = self.nodes.len() as u32;
        self.nodes.push(Node {
            parent: idx,
            rank: 0,
        });
        self.index_of.insert(item.clone(), idx);
        idx
    }

    /// Registers `item` as its own singleton group, if not already present. Idempotent.
    pub fn insert(&mut self, item: &T) -> GroupId {
        let idx = self.entry(item);
        GroupId(self.find_root(idx))
    }

    fn find_root(&mut self, idx: u32) -> u32 {
        let mut root = idx;
        while self.nodes[root as usize].parent != root {
            root = self.nodes[root as usize].parent;
        }
        // Path compression.
        let mut cur = idx;
        while self.nodes[cur as usize].parent != root {
            let next = self.nodes[cur as usize].parent;
            self.nodes[cur as usize].parent = root;
            cur = next;
        }
        root
    }

    /// Returns the stable representative group handle for `item`, registering it as a new
    /// singleton group if it has not been seen before.
    pub fn find_set(&mut self, item: &T) -> GroupId {
        let idx = self.entry(item);
        GroupId(self.find_root(idx))
    }

    /// Unions the groups containing `a` and `b`. Returns the resulting group handle.
    pub fn map_entries(&mut self, a: &T, b: &T) -> GroupId {
        let ia = self.entry(a);
        let ib = self.entry(b);
        let ra = self.find_root(ia);
        let rb = self.find_root(ib);
        if ra == rb {
            return GroupId(ra);
        }
        let (winner, loser) = if self.nodes[ra as usize].rank >= self.nodes[rb as usize].rank {
            (ra, rb)
        } else {
            (rb, ra)
        };
        self.nodes[loser as usize].parent = winner;
        if self.nodes[ra as usize].rank == self.nodes[rb as usize].rank {
            self.nodes[winner as usize].rank += 1;
        }
        GroupId(winner)
    }

    /// Whether `a` and `b` are currently mapped to the same group. Unlike `find_set`, this does
    /// not register either item if missing: an item never seen by this structure is never
    /// mapped to anything.
    pub fn strict_are_mapped(&self, a: &T, b: &T) -> bool {
        match (self.index_of.get(a), self.index_of.get(b)) {
            (Some(&ia), Some(&ib)) => self.peek_root(ia) == self.peek_root(ib),
            _ => false,
        }
    }

    fn peek_root(&self, idx: u32) -> u32 {
        let mut root = idx;
        while self.nodes[root as usize].parent != root {
            root = self.nodes[root as usize].parent;
        }
        root
    }

    /// Like `find_set`, but never registers `item`: returns `None` if it has not been seen.
    pub fn try_find_set(&self, item: &T) -> Option<GroupId> {
        self.index_of.get(item).map(|&idx| GroupId(self.peek_root(idx)))
    }

    /// Iterates over every group as `(representative, members)`.
    pub fn disjoint_set_map(&self) -> HashMap<GroupId, Vec<T>> {
        let mut groups: HashMap<GroupId, Vec<T>> = HashMap::default();
        for (item, &idx) in &self.index_of {
            let root = GroupId(self.peek_root(idx));
            groups.entry(root).or_insert_with(Vec::new).push(item.clone());
        }
        groups
    }

    pub fn num_groups(&self) -> usize {
        self.index_of
            .values()
            .map(|&idx| self.peek_root(idx))
            .collect::<std::collections::HashSet<_>>()
            .len()
    }

    pub fn contains(&self, item: &T) -> bool {
        self.index_of.contains_key(item)
    }
}
