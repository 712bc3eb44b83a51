//! Exponential rule backoff
//!
//! Explosive rules (associativity, commutativity) can dominate a saturation
//! run. Each rule carries a match budget; once a step exhausts it, the rule
//! is banned for a number of iterations, and both the budget and the ban
//! length double on unban. Matches are sampled with a deterministic
//! generator so runs are reproducible from the seed.

use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;

use super::Strategy;
use crate::{
    command::{Command, CommandError, CommandQueue, Reification},
    egraph::EGraph,
    node::Operator,
    par::ParallelMap,
    rule::{Rewrite, RuleMatch},
};

const DEFAULT_MATCH_LIMIT: usize = 1_000;
const DEFAULT_BAN_LENGTH: usize = 5;

#[derive(Debug, Clone, Copy)]
pub struct RuleStats {
    match_limit: usize,
    ban_length: usize,
    banned_until: usize,
    banned: bool,
    remaining: usize,
}

#[derive(Debug, Clone)]
pub struct BackoffData {
    iteration: usize,
    stats: IndexMap<Arc<str>, RuleStats>,
    rng: u64,
}

impl BackoffData {
    #[must_use]
    pub fn iteration(&self) -> usize { self.iteration }

    #[must_use]
    pub fn is_banned(&self, rule: &str) -> bool {
        self.stats.get(rule).is_some_and(|s| s.banned)
    }
}

#[derive(Debug)]
pub struct BackoffRuleApplication<N> {
    rules: Vec<Rewrite<N>>,
    match_limit: usize,
    ban_length: usize,
    seed: u64,
}

impl<N> BackoffRuleApplication<N> {
    #[must_use]
    pub fn new(rules: Vec<Rewrite<N>>) -> Self {
        Self {
            rules,
            match_limit: DEFAULT_MATCH_LIMIT,
            ban_length: DEFAULT_BAN_LENGTH,
            seed: 0,
        }
    }

    #[must_use]
    pub fn with_match_limit(self, match_limit: usize) -> Self { Self { match_limit, ..self } }

    #[must_use]
    pub fn with_ban_length(self, ban_length: usize) -> Self { Self { ban_length, ..self } }

    #[must_use]
    pub fn with_seed(self, seed: u64) -> Self { Self { seed, ..self } }

    fn stats_entry<'d>(&self, data: &'d mut BackoffData, name: &Arc<str>) -> &'d mut RuleStats {
        data.stats
            .entry(Arc::clone(name))
            .or_insert_with(|| RuleStats {
                match_limit: self.match_limit,
                ban_length: self.ban_length,
                banned_until: 0,
                banned: false,
                remaining: self.match_limit,
            })
    }
}

fn splitmix(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Uniformly sample up to `k` elements by partial shuffle
fn sample<T>(mut items: Vec<T>, k: usize, rng: &mut u64) -> Vec<T> {
    if items.len() <= k {
        return items;
    }
    for i in 0..k {
        let j = i + usize::try_from(splitmix(rng) % (items.len() - i) as u64)
            .unwrap_or_else(|_| unreachable!());
        items.swap(i, j);
    }
    items.truncate(k);
    items
}

impl<N: Operator> Strategy<EGraph<N>> for BackoffRuleApplication<N> {
    type Data = BackoffData;

    fn initial(&self) -> BackoffData {
        BackoffData {
            iteration: 0,
            stats: IndexMap::new(),
            rng: self.seed,
        }
    }

    fn apply<P: ParallelMap>(
        &self,
        graph: &mut EGraph<N>,
        data: &mut BackoffData,
        par: &P,
    ) -> Result<bool, CommandError> {
        let iteration = data.iteration;
        data.iteration += 1;

        // unban expired rules, doubling their budgets
        for (name, s) in &mut data.stats {
            if s.banned && s.banned_until <= iteration {
                s.banned = false;
                s.match_limit = s.match_limit.saturating_mul(2);
                s.ban_length = s.ban_length.saturating_mul(2);
                s.remaining = s.match_limit;
                debug!(rule = %name, match_limit = s.match_limit, "unbanned rule");
            }
        }

        let mut searchable = Vec::new();
        for rw in &self.rules {
            let banned = self.stats_entry(data, rw.name()).banned;
            if banned {
                debug!(rule = %rw.name(), "skipping banned rule");
            } else {
                searchable.push(rw);
            }
        }

        let eg: &EGraph<N> = graph;
        let searched = par.map(searchable, |rw| (rw, rw.search(eg)))?;

        let mut staged = Vec::new();
        for (rw, matches) in searched {
            let found = matches.len();
            let stats = self.stats_entry(data, rw.name());
            let budget = stats.remaining.min(found);
            let selected: Vec<RuleMatch> = sample(matches, budget, &mut data.rng);

            let stats = self.stats_entry(data, rw.name());
            stats.remaining -= selected.len();
            if stats.remaining == 0 {
                stats.banned = true;
                stats.banned_until = iteration + stats.ban_length;
                debug!(
                    rule = %rw.name(),
                    until = stats.banned_until,
                    "banning exhausted rule"
                );
            }

            debug!(rule = %rw.name(), found, applied = selected.len(), "sampled matches");
            for m in &selected {
                staged.push(rw.build(graph, m));
            }
        }

        if staged.is_empty() {
            return Ok(false);
        }
        let queue = CommandQueue::from_commands(staged.into_iter().map(Command::Queue).collect())
            .optimize();
        let mut reification = Reification::new();
        let queue = queue.simplify(graph, &mut reification)?;
        queue.apply(graph, &mut reification, par)
    }
}
