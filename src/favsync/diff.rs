use std::collections::HashSet;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    /// `current - synced`, unique and sorted so runs are reproducible.
    pub pending: Vec<String>,
    pub current_total: usize,
    pub already_synced: usize,
    /// Synced identifiers no longer in the manifest. Informational only:
    /// remote removals are never propagated locally.
    pub gone_remote: usize,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

pub fn compute_delta(current: &[String], synced: &HashSet<String>) -> Delta {
    let current_set = current.iter().map(String::as_str).collect::<HashSet<_>>();
    let mut pending = current_set
        .iter()
        .filter(|id| !synced.contains(**id))
        .map(|id| id.to_string())
        .collect::<Vec<_>>();
    pending.sort_unstable();

    let gone_remote = synced
        .iter()
        .filter(|id| !current_set.contains(id.as_str()))
        .count();

    Delta {
        current_total: current_set.len(),
        already_synced: current_set.len() - pending.len(),
        gone_remote,
        pending,
    }
}
