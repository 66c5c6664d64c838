//! The Quick menu: a weighted random blend of several sub-lists.

use std::collections::HashMap;

use cinemeld_metadata::MetaRecord;
use rand::Rng;

use crate::filters::identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QuickSource {
    Unfinished,
    Watchlist,
    History,
    Recommendations,
    Arrivals,
    Popular,
    Trending,
    Featured,
}

impl QuickSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unfinished => "unfinished",
            Self::Watchlist => "watchlist",
            Self::History => "history",
            Self::Recommendations => "recommendations",
            Self::Arrivals => "arrivals",
            Self::Popular => "popular",
            Self::Trending => "trending",
            Self::Featured => "featured",
        }
    }

    /// Sources read from the user's Trakt account.
    pub fn needs_account(self) -> bool {
        matches!(
            self,
            Self::Unfinished | Self::Watchlist | Self::History | Self::Recommendations
        )
    }
}

/// Split `total` slots across the sources in proportion to their weights.
/// Rounding leftovers go to the most important sources first.
pub fn split_budget(weights: &[(QuickSource, f64)], total: usize) -> Vec<(QuickSource, usize)> {
    let sum: f64 = weights.iter().map(|(_, w)| w.max(0.0)).sum();
    if sum <= 0.0 || total == 0 {
        return weights.iter().map(|(s, _)| (*s, 0)).collect();
    }
    let mut out: Vec<(QuickSource, usize)> = weights
        .iter()
        .map(|(s, w)| (*s, (w.max(0.0) / sum * total as f64).floor() as usize))
        .collect();
    let mut left = total.saturating_sub(out.iter().map(|(_, n)| n).sum());
    for (slot, (_, weight)) in out.iter_mut().zip(weights) {
        if left == 0 {
            break;
        }
        if *weight > 0.0 {
            slot.1 += 1;
            left -= 1;
        }
    }
    out
}

/// Interleave the sub-lists, drawing the next item from a list with
/// probability proportional to its weight. `lists` is ordered by importance;
/// an item found in several lists stays where its most important list put it.
pub fn blend<R: Rng>(
    lists: Vec<(QuickSource, f64, Vec<MetaRecord>)>,
    rng: &mut R,
) -> Vec<(QuickSource, MetaRecord)> {
    let mut queues: Vec<(QuickSource, f64, std::collections::VecDeque<MetaRecord>)> = lists
        .into_iter()
        .map(|(s, w, items)| (s, w.max(0.0), items.into()))
        .collect();

    let mut drawn: Vec<(usize, QuickSource, MetaRecord)> = Vec::new();
    loop {
        let open: Vec<usize> = (0..queues.len()).filter(|i| !queues[*i].2.is_empty()).collect();
        if open.is_empty() {
            break;
        }
        let total: f64 = open.iter().map(|i| queues[*i].1).sum();
        let pick = if total > 0.0 {
            let mut roll = rng.gen_range(0.0..total);
            let mut chosen = open[open.len() - 1];
            for i in &open {
                if roll < queues[*i].1 {
                    chosen = *i;
                    break;
                }
                roll -= queues[*i].1;
            }
            chosen
        } else {
            open[rng.gen_range(0..open.len())]
        };
        if let Some(record) = queues[pick].2.pop_front() {
            drawn.push((pick, queues[pick].0, record));
        }
    }

    let mut winner: HashMap<String, usize> = HashMap::new();
    for (rank, _, record) in &drawn {
        winner
            .entry(identity(record))
            .and_modify(|best| *best = (*best).min(*rank))
            .or_insert(*rank);
    }
    let mut placed = std::collections::HashSet::new();
    drawn
        .into_iter()
        .filter(|(rank, _, record)| {
            let key = identity(record);
            winner.get(&key) == Some(rank) && placed.insert(key)
        })
        .map(|(_, source, record)| (source, record))
        .collect()
}
