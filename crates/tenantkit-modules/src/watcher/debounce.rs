//! Per-path debounce timers.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use tokio::time::Instant;

use super::events::ChangeKind;

#[derive(Debug, Clone, Copy)]
struct Pending {
    deadline: Instant,
    kind: ChangeKind,
}

/// Holds each changed path until writes to it have been quiet for `window`.
#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: HashMap<PathBuf, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: HashMap::new(),
        }
    }

    /// Record an event, (re)scheduling the path for `now + window`.
    pub fn record(&mut self, path: PathBuf, kind: ChangeKind, now: Instant) {
        let deadline = now + self.window;
        self.pending
            .entry(path)
            .and_modify(|pending| {
                pending.deadline = deadline;
                // A file created and then written is still a creation.
                if !(pending.kind == ChangeKind::Created && kind == ChangeKind::Modified) {
                    pending.kind = kind;
                }
            })
            .or_insert(Pending { deadline, kind });
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every path whose deadline has passed, sorted.
    pub fn take_due(&mut self, now: Instant) -> Vec<(PathBuf, ChangeKind)> {
        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(path, _)| path.clone())
            .collect();
        let mut ready: Vec<(PathBuf, ChangeKind)> = due
            .into_iter()
            .filter_map(|path| self.pending.remove(&path).map(|p| (path, p.kind)))
            .collect();
        ready.sort();
        ready
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);

    #[test]
    fn rapid_writes_collapse_into_one() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        let path = PathBuf::from("src/index.rs");

        for i in 0..5 {
            let at = start + Duration::from_millis(50 * i);
            debouncer.record(path.clone(), ChangeKind::Modified, at);
            assert!(debouncer.take_due(at).is_empty());
        }
        assert_eq!(debouncer.len(), 1);

        let last = start + Duration::from_millis(200);
        assert!(debouncer.take_due(last + WINDOW - Duration::from_millis(1)).is_empty());
        let due = debouncer.take_due(last + WINDOW);
        assert_eq!(due, vec![(path, ChangeKind::Modified)]);
        assert!(debouncer.is_empty());
    }

    #[test]
    fn paths_debounce_independently() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.record("a.rs".into(), ChangeKind::Modified, start);
        debouncer.record(
            "b.rs".into(),
            ChangeKind::Created,
            start + Duration::from_millis(200),
        );

        assert_eq!(debouncer.next_deadline(), Some(start + WINDOW));
        let first = debouncer.take_due(start + WINDOW);
        assert_eq!(first, vec![(PathBuf::from("a.rs"), ChangeKind::Modified)]);

        let second = debouncer.take_due(start + Duration::from_millis(500));
        assert_eq!(second, vec![(PathBuf::from("b.rs"), ChangeKind::Created)]);
        assert!(debouncer.next_deadline().is_none());
    }

    #[test]
    fn creation_survives_followup_write() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.record("new.rs".into(), ChangeKind::Created, start);
        debouncer.record("new.rs".into(), ChangeKind::Modified, start);
        debouncer.record("gone.rs".into(), ChangeKind::Modified, start);
        debouncer.record("gone.rs".into(), ChangeKind::Removed, start);

        let due = debouncer.take_due(start + WINDOW);
        assert_eq!(
            due,
            vec![
                (PathBuf::from("gone.rs"), ChangeKind::Removed),
                (PathBuf::from("new.rs"), ChangeKind::Created),
            ]
        );
    }
}
