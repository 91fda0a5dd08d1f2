use crate::protocol::Fingerprint;
use std::collections::HashSet;

/// Two-window duplicate suppression across adjacent block cycles.
///
/// Every fingerprint seen in a cycle is remembered for exactly one more
/// cycle; anything older is forgotten.
#[derive(Debug, Default)]
pub struct DedupFilter {
    previous: HashSet<Fingerprint>,
    next: HashSet<Fingerprint>,
}

impl DedupFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `fingerprint` for the next cycle and reports whether it is new.
    pub fn admit(&mut self, fingerprint: Fingerprint) -> bool {
        let duplicate = self.previous.contains(&fingerprint);
        self.next.insert(fingerprint);
        !duplicate
    }

    /// Closes the current block cycle.
    pub fn end_cycle(&mut self) {
        std::mem::swap(&mut self.previous, &mut self.next);
        self.next.clear();
    }
}
