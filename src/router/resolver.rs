//! Identity selection for a target URL

use super::TargetUrl;
use crate::Identity;
use std::cmp::Ordering;
use std::sync::Arc;

/// The outcome of routing a URL
#[derive(Debug, Clone)]
pub struct Route {
    /// The winning identity
    pub identity: Arc<Identity>,
    /// Characters of the normalized URL matched by the winning pattern
    pub match_len: usize,
    /// Other identities with the same match length and priority as the
    /// winner. Non-empty means a configuration conflict that was broken by
    /// name order.
    pub conflicts: Vec<String>,
}

/// Selects the single best identity for a URL
///
/// Ranking: longest pattern match, then higher priority, then the name that
/// sorts first. Configuration order never matters.
#[derive(Debug, Default)]
pub struct PatternRouter {
    identities: Vec<Arc<Identity>>,
}

impl PatternRouter {
    /// Create a router over a set of identities
    pub fn new(identities: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            identities: identities.into_iter().map(Arc::new).collect(),
        }
    }

    /// Find the identity for a URL; `None` means abstain
    pub fn route(&self, url: &str) -> Option<Route> {
        let target = TargetUrl::parse(url)?;
        self.route_target(&target)
    }

    /// Like [`route`](Self::route) for an already-normalized URL
    pub fn route_target(&self, target: &TargetUrl) -> Option<Route> {
        let (index, match_len, conflicts) = select(&target.match_key(), &self.identities)?;
        Some(Route {
            identity: Arc::clone(&self.identities[index]),
            match_len,
            conflicts: conflicts
                .into_iter()
                .map(|i| self.identities[i].name.clone())
                .collect(),
        })
    }

    /// All routed identities
    pub fn identities(&self) -> &[Arc<Identity>] {
        &self.identities
    }

    /// Look up an identity by name
    pub fn get(&self, name: &str) -> Option<Arc<Identity>> {
        self.identities.iter().find(|i| i.name == name).cloned()
    }

    /// Remove an identity, returning it if present
    pub fn remove(&mut self, name: &str) -> Option<Arc<Identity>> {
        let index = self.identities.iter().position(|i| i.name == name)?;
        Some(self.identities.remove(index))
    }
}

/// Select the best identity for `url` from a slice
///
/// Returns `None` for malformed URLs and for URLs no pattern matches.
pub fn resolve<'a>(url: &str, identities: &'a [Identity]) -> Option<&'a Identity> {
    let target = TargetUrl::parse(url)?;
    let (index, _, _) = select(&target.match_key(), identities)?;
    Some(&identities[index])
}

/// Longest match of any of the identity's patterns against `key`
fn match_len(identity: &Identity, key: &str) -> Option<usize> {
    identity
        .patterns
        .iter()
        .filter_map(|p| p.match_len(key))
        .max()
}

/// Rank candidates: `Less` means `a` beats `b`
fn rank(a: (usize, &Identity), b: (usize, &Identity)) -> Ordering {
    b.0.cmp(&a.0)
        .then_with(|| b.1.priority.cmp(&a.1.priority))
        .then_with(|| a.1.name.cmp(&b.1.name))
}

/// Returns (winner index, match length, indices tied with the winner)
fn select<T: AsRef<Identity>>(key: &str, identities: &[T]) -> Option<(usize, usize, Vec<usize>)> {
    let candidates: Vec<(usize, usize)> = identities
        .iter()
        .enumerate()
        .filter_map(|(i, identity)| match_len(identity.as_ref(), key).map(|len| (i, len)))
        .collect();

    let &(winner, best_len) = candidates.iter().min_by(|a, b| {
        rank(
            (a.1, identities[a.0].as_ref()),
            (b.1, identities[b.0].as_ref()),
        )
    })?;

    let winner_priority = identities[winner].as_ref().priority;
    let conflicts = candidates
        .iter()
        .filter(|&&(i, len)| {
            i != winner && len == best_len && identities[i].as_ref().priority == winner_priority
        })
        .map(|&(i, _)| i)
        .collect();

    Some((winner, best_len, conflicts))
}
