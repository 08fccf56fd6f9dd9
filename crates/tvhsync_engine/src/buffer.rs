//! Ordered mutation buffers used while a sync pass is running.

use crate::error::EngineResult;
use std::collections::BTreeMap;
use tvhsync_store::{Entity, Repository};

/// One buffered change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mutation<E: Entity> {
    Upsert(E),
    Remove(E::Id),
}

/// Append-only log of changes to one entity type.
///
/// Keeps an index of the latest state per id so updates can merge onto a
/// record that has only been buffered so far.
#[derive(Debug)]
pub(crate) struct Buffer<E: Entity> {
    ops: Vec<Mutation<E>>,
    latest: BTreeMap<E::Id, Option<usize>>,
}

impl<E: Entity> Buffer<E> {
    pub(crate) fn new() -> Self {
        Self {
            ops: Vec::new(),
            latest: BTreeMap::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.ops.len()
    }

    /// `None` if the id was never buffered, `Some(None)` if its latest
    /// buffered change is a removal.
    pub(crate) fn lookup(&self, id: &E::Id) -> Option<Option<&E>> {
        self.latest.get(id).map(|slot| {
            slot.and_then(|index| match &self.ops[index] {
                Mutation::Upsert(record) => Some(record),
                Mutation::Remove(_) => None,
            })
        })
    }

    /// Appends an upsert and returns the new buffer length.
    pub(crate) fn upsert(&mut self, record: E) -> usize {
        self.latest.insert(record.id(), Some(self.ops.len()));
        self.ops.push(Mutation::Upsert(record));
        self.ops.len()
    }

    /// Appends a removal and returns the new buffer length.
    pub(crate) fn remove(&mut self, id: E::Id) -> usize {
        self.latest.insert(id.clone(), None);
        self.ops.push(Mutation::Remove(id));
        self.ops.len()
    }

    /// Puts back changes taken earlier, ahead of anything buffered since.
    pub(crate) fn restore(&mut self, ops: Vec<Mutation<E>>) {
        let newer = self.take();
        for op in ops.into_iter().chain(newer) {
            match op {
                Mutation::Upsert(record) => self.upsert(record),
                Mutation::Remove(id) => self.remove(id),
            };
        }
    }

    /// Empties the buffer, returning its changes in arrival order.
    pub(crate) fn take(&mut self) -> Vec<Mutation<E>> {
        self.latest.clear();
        std::mem::take(&mut self.ops)
    }
}

impl<E: Entity> Default for Buffer<E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Counts of an applied batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Applied {
    pub(crate) upserted: usize,
    pub(crate) removed: usize,
}

/// Writes buffered changes to `repo` in order.
///
/// Consecutive upserts go out as one `upsert_many`. `on_removed` sees each
/// record that a removal actually deleted.
pub(crate) fn apply<E, R, F>(ops: Vec<Mutation<E>>, repo: &R, mut on_removed: F) -> EngineResult<Applied>
where
    E: Entity,
    R: Repository<E> + ?Sized,
    F: FnMut(E) -> EngineResult<()>,
{
    let mut applied = Applied::default();
    let mut batch = Vec::new();
    for op in ops {
        match op {
            Mutation::Upsert(record) => batch.push(record),
            Mutation::Remove(id) => {
                if !batch.is_empty() {
                    applied.upserted += batch.len();
                    repo.upsert_many(std::mem::take(&mut batch))?;
                }
                if let Some(existing) = repo.get_by_id(&id)? {
                    repo.remove_by_id(&id)?;
                    applied.removed += 1;
                    on_removed(existing)?;
                }
            }
        }
    }
    if !batch.is_empty() {
        applied.upserted += batch.len();
        repo.upsert_many(batch)?;
    }
    Ok(applied)
}

/// The last buffered state of every id touched by `ops`.
pub(crate) fn final_states<E: Entity>(ops: &[Mutation<E>]) -> BTreeMap<E::Id, Option<&E>> {
    let mut states = BTreeMap::new();
    for op in ops {
        match op {
            Mutation::Upsert(record) => {
                states.insert(record.id(), Some(record));
            }
            Mutation::Remove(id) => {
                states.insert(id.clone(), None);
            }
        }
    }
    states
}

#[cfg(test)]
mod tests {
    use super::*;
    use tvhsync_store::{Channel, MemoryRepository};

    fn channel(id: u32, name: &str) -> Channel {
        Channel {
            id,
            name: Some(name.into()),
            ..Channel::default()
        }
    }

    #[test]
    fn lookup_tracks_latest_state() {
        let mut buffer = Buffer::new();
        assert_eq!(buffer.lookup(&1), None);

        buffer.upsert(channel(1, "a"));
        buffer.upsert(channel(1, "b"));
        assert_eq!(buffer.lookup(&1).flatten().and_then(|c| c.name.as_deref()), Some("b"));

        assert_eq!(buffer.remove(1), 3);
        assert_eq!(buffer.lookup(&1), Some(None));
    }

    #[test]
    fn apply_preserves_order() {
        let repo = MemoryRepository::<Channel>::new();
        repo.upsert(channel(9, "old")).unwrap();

        let mut buffer = Buffer::new();
        buffer.upsert(channel(1, "a"));
        buffer.remove(9);
        buffer.upsert(channel(2, "b"));
        buffer.remove(2);
        buffer.upsert(channel(3, "c"));

        let mut removed = Vec::new();
        let applied = apply(buffer.take(), &repo, |c| {
            removed.push(c.id);
            Ok(())
        })
        .unwrap();

        assert_eq!(applied, Applied { upserted: 3, removed: 2 });
        assert_eq!(removed, vec![9, 2]);
        let ids: Vec<u32> = repo.get_all().unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(buffer.len(), 0);
    }

    #[test]
    fn restored_changes_go_ahead_of_newer_ones() {
        let mut buffer = Buffer::new();
        buffer.upsert(channel(1, "a"));
        buffer.remove(2);
        let taken = buffer.take();

        buffer.upsert(channel(1, "b"));
        buffer.restore(taken);

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.lookup(&1).flatten().and_then(|c| c.name.as_deref()), Some("b"));
        assert_eq!(buffer.lookup(&2), Some(None));
    }

    #[test]
    fn final_states_keep_last_change() {
        let ops = vec![
            Mutation::Upsert(channel(1, "a")),
            Mutation::Upsert(channel(2, "b")),
            Mutation::Remove(1),
            Mutation::Upsert(channel(2, "c")),
        ];
        let states = final_states(&ops);
        assert_eq!(states[&1], None);
        assert_eq!(states[&2].and_then(|c| c.name.as_deref()), Some("c"));
    }
}
