//! Tail colouring.
//!
//! Fragment execution is simulated using estimated costs. A fragment whose
//! inputs all carry one colour becomes a tail of those inputs and takes their
//! colour, provided fewer than `max_concurrency` fragments of that colour are
//! running at its start time. Anything else opens a new colour.

use std::collections::BTreeMap;

use crate::fragment::{FragmentId, FragmentSet, GraphFragment};

#[derive(Default)]
struct Instant {
    starting: Vec<FragmentId>,
    finishing: Vec<FragmentId>,
}

/// Zero cost fragments still take one tick, so a fragment always finishes
/// strictly before its dependents start. Times are kept in `u128` so a chain
/// of maximal costs cannot overflow.
fn duration(fragment: &GraphFragment) -> u128 {
    u128::from(fragment.job_cost().max(1))
}

/// Earliest start of every fragment, indexed by fragment id: the latest
/// finish among its inputs, 0 for leaves.
fn start_times(set: &FragmentSet) -> Vec<u128> {
    let mut starts: Vec<Option<u128>> = vec![None; set.capacity()];

    for id in set.ids() {
        let mut stack = vec![id];

        while let Some(&top) = stack.last() {
            if starts[top.index()].is_some() {
                stack.pop();
                continue;
            }

            let fragment = set.fragment(top);
            let pending = fragment
                .inputs()
                .iter()
                .filter(|input| starts[input.index()].is_none())
                .copied()
                .collect::<Vec<_>>();

            if !pending.is_empty() {
                stack.extend(pending);
                continue;
            }

            let start = fragment
                .inputs()
                .iter()
                .map(|input| {
                    starts[input.index()].unwrap_or_default() + duration(set.fragment(*input))
                })
                .max()
                .unwrap_or(0);

            starts[top.index()] = Some(start);
            stack.pop();
        }
    }

    starts.into_iter().map(Option::unwrap_or_default).collect()
}

/// The colour shared by all of `inputs`, if there are any and they agree.
fn shared_colour(set: &FragmentSet, inputs: &[FragmentId]) -> Option<usize> {
    let (first, rest) = inputs.split_first()?;
    let colour = set.fragment(*first).colour();
    rest.iter()
        .all(|input| set.fragment(*input).colour() == colour)
        .then_some(colour)
}

pub(super) fn assign(set: &mut FragmentSet, max_concurrency: usize) {
    let starts = start_times(set);

    let mut timeline: BTreeMap<u128, Instant> = BTreeMap::new();
    for fragment in set.iter() {
        let start = starts[fragment.id().index()];
        timeline.entry(start).or_default().starting.push(fragment.id());
        timeline
            .entry(start + duration(fragment))
            .or_default()
            .finishing
            .push(fragment.id());
    }

    // Running fragments per colour. Colours start at 1.
    let mut running = vec![0usize];

    for (_, instant) in timeline {
        for id in instant.finishing {
            running[set.fragment(id).colour()] -= 1;
        }

        for id in instant.starting {
            let inputs = set.fragment(id).inputs().iter().copied().collect::<Vec<_>>();

            match shared_colour(set, &inputs) {
                Some(colour) if running[colour] < max_concurrency => {
                    set.set_colour(id, colour);
                    running[colour] += 1;
                    for input in inputs {
                        set.add_tail(input, id);
                    }
                }
                _ => {
                    running.push(1);
                    set.set_colour(id, running.len() - 1);
                }
            }
        }
    }

    tracing::trace!("coloured {} fragments with {} colours", set.len(), running.len() - 1);
}
