//! Groups of dependency graph nodes submitted as one job.
//!
//! Fragments live in a [`FragmentSet`] arena and refer to each other by
//! [`FragmentId`]. Slot 0 always holds the root: a fragment without nodes
//! that depends on every terminal fragment, so that its completion marks
//! the completion of the whole graph.

mod colour;
mod partition;

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use petgraph::graph::NodeIndex;

pub use crate::fragment::partition::Partition;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FragmentId(usize);

impl FragmentId {
    /// The synthetic fragment standing for the whole graph.
    pub const ROOT: FragmentId = FragmentId(0);

    pub fn index(self) -> usize {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for FragmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct GraphFragment {
    id: FragmentId,
    nodes: Vec<NodeIndex>,
    cost: u64,
    inputs: BTreeSet<FragmentId>,
    dependents: BTreeSet<FragmentId>,
    colour: usize,
    tails: Vec<FragmentId>,
}

impl GraphFragment {
    fn new(id: FragmentId, nodes: Vec<NodeIndex>, cost: u64) -> Self {
        Self {
            id,
            nodes,
            cost,
            inputs: BTreeSet::new(),
            dependents: BTreeSet::new(),
            colour: 0,
            tails: Vec::new(),
        }
    }

    pub fn id(&self) -> FragmentId {
        self.id
    }

    /// Nodes in the order they must be executed.
    pub fn nodes(&self) -> &[NodeIndex] {
        &self.nodes
    }

    pub fn job_items(&self) -> usize {
        self.nodes.len()
    }

    pub fn job_cost(&self) -> u64 {
        self.cost
    }

    /// Fragments producing values this one consumes.
    pub fn inputs(&self) -> &BTreeSet<FragmentId> {
        &self.inputs
    }

    /// Fragments consuming values this one produces.
    pub fn dependents(&self) -> &BTreeSet<FragmentId> {
        &self.dependents
    }

    /// Concurrency partition assigned by the colouring pass, 0 if none.
    pub fn colour(&self) -> usize {
        self.colour
    }

    /// Fragments that may run straight after this one on the same worker.
    pub fn tails(&self) -> &[FragmentId] {
        &self.tails
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }
}

impl fmt::Display for GraphFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} items, cost {}, colour {})",
            self.id,
            self.job_items(),
            self.cost,
            self.colour
        )?;
        if !self.tails.is_empty() {
            let tails = self
                .tails
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, " tails [{tails}]")?;
        }
        Ok(())
    }
}

/// Arena owning every fragment of one partitioning run.
#[derive(Debug, Clone)]
pub(crate) struct FragmentSet {
    slots: Vec<Option<GraphFragment>>,
    live: usize,
}

impl FragmentSet {
    pub(crate) fn new() -> Self {
        Self {
            slots: vec![Some(GraphFragment::new(FragmentId::ROOT, Vec::new(), 0))],
            live: 0,
        }
    }

    pub(crate) fn insert(&mut self, nodes: Vec<NodeIndex>, cost: u64) -> FragmentId {
        let id = FragmentId(self.slots.len());
        self.slots.push(Some(GraphFragment::new(id, nodes, cost)));
        self.live += 1;
        id
    }

    pub(crate) fn get(&self, id: FragmentId) -> Option<&GraphFragment> {
        self.slots.get(id.0).and_then(Option::as_ref)
    }

    fn fragment(&self, id: FragmentId) -> &GraphFragment {
        match self.get(id) {
            Some(fragment) => fragment,
            None => panic!("fragment {id} is not part of the set"),
        }
    }

    fn fragment_mut(&mut self, id: FragmentId) -> &mut GraphFragment {
        match self.slots.get_mut(id.0).and_then(Option::as_mut) {
            Some(fragment) => fragment,
            None => panic!("fragment {id} is not part of the set"),
        }
    }

    pub(crate) fn root(&self) -> &GraphFragment {
        self.fragment(FragmentId::ROOT)
    }

    /// Ids of all fragments except the root, ascending.
    pub(crate) fn ids(&self) -> Vec<FragmentId> {
        self.iter().map(GraphFragment::id).collect()
    }

    /// All fragments except the root, in id order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &GraphFragment> {
        self.slots.iter().skip(1).flatten()
    }

    /// Number of fragments, not counting the root.
    pub(crate) fn len(&self) -> usize {
        self.live
    }

    /// Upper bound on fragment ids, for sizing id-indexed tables.
    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn link(&mut self, input: FragmentId, dependent: FragmentId) {
        self.fragment_mut(input).dependents.insert(dependent);
        self.fragment_mut(dependent).inputs.insert(input);
    }

    pub(crate) fn unlink(&mut self, input: FragmentId, dependent: FragmentId) {
        self.fragment_mut(input).dependents.remove(&dependent);
        self.fragment_mut(dependent).inputs.remove(&input);
    }

    fn take(&mut self, id: FragmentId) -> GraphFragment {
        assert!(!id.is_root(), "the root fragment cannot be merged away");
        match self.slots.get_mut(id.0).and_then(Option::take) {
            Some(fragment) => {
                self.live -= 1;
                fragment
            }
            None => panic!("fragment {id} is not part of the set"),
        }
    }

    /// Folds `from` into `into`, which has the same inputs. `from`'s nodes
    /// run after `into`'s, its dependents are moved over and it is dropped.
    pub(crate) fn append(&mut self, into: FragmentId, from: FragmentId) {
        let merged = self.take(from);

        for input in &merged.inputs {
            self.fragment_mut(*input).dependents.remove(&from);
        }

        for dependent in &merged.dependents {
            self.fragment_mut(*dependent).inputs.remove(&from);
            self.link(into, *dependent);
        }

        let target = self.fragment_mut(into);
        target.nodes.extend(merged.nodes);
        target.cost = target.cost.saturating_add(merged.cost);
    }

    /// Folds `from` into its only dependent `into`. `from`'s nodes run first
    /// and its inputs become inputs of `into`.
    pub(crate) fn prepend(&mut self, into: FragmentId, from: FragmentId) {
        let merged = self.take(from);
        self.fragment_mut(into).inputs.remove(&from);

        for input in &merged.inputs {
            self.fragment_mut(*input).dependents.remove(&from);
            self.link(*input, into);
        }

        let target = self.fragment_mut(into);
        let mut nodes = merged.nodes;
        nodes.append(&mut target.nodes);
        target.nodes = nodes;
        target.cost = target.cost.saturating_add(merged.cost);
    }

    pub(crate) fn set_colour(&mut self, id: FragmentId, colour: usize) {
        self.fragment_mut(id).colour = colour;
    }

    pub(crate) fn add_tail(&mut self, id: FragmentId, tail: FragmentId) {
        self.fragment_mut(id).tails.push(tail);
    }
}

/// Prints the fragment tree below `fragment`, inputs indented under the
/// fragments consuming them. Shared inputs are listed once and referred to
/// by id afterwards.
pub(crate) fn write_tree(
    f: &mut fmt::Formatter<'_>,
    set: &FragmentSet,
    fragment: FragmentId,
    depth: usize,
    printed: &mut HashSet<FragmentId>,
) -> fmt::Result {
    const MAX_DEPTH: usize = 8;

    let Some(current) = set.get(fragment) else {
        return Ok(());
    };

    let indent = "  ".repeat(depth);
    if current.is_root() {
        writeln!(f, "{indent}root")?;
    } else if !printed.insert(fragment) {
        return writeln!(f, "{indent}{fragment} (see above)");
    } else {
        writeln!(f, "{indent}{current}")?;
    }

    if depth >= MAX_DEPTH {
        if !current.inputs.is_empty() {
            writeln!(f, "{indent}  ...")?;
        }
        return Ok(());
    }

    for input in &current.inputs {
        write_tree(f, set, *input, depth + 1, printed)?;
    }

    Ok(())
}
