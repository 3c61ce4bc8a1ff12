//! Per-group aggregation state.
//!
//! The source engine keeps a `Map<ValueArray, Object[]>` from group key to a
//! per-group state vector, with an auxiliary `Expression -> int` map
//! assigning each aggregate its slot. Growing a group's vector mid-scan
//! rebinds the map entry to the new, larger vector so the map stays
//! consistent — but that means the *map value* (the vector) is swapped out
//! from under any other code holding a reference to it.
//!
//! This is the one spot `spec.md` §9 explicitly invites a redesign for:
//! "prefer a stable, index-keyed arena of per-group vectors so growth is a
//! single allocation and map values stay fixed". This module is that arena:
//! the map (`keys`) holds a stable `GroupId` (a plain `usize`), and the
//! per-group vectors live in `slots`, indexed by `GroupId`. Growing a
//! group's vector reallocates `slots[id]` in place; `keys` never changes.
//!
//! The slot a given projection-list expression occupies is simply its
//! position in `Select::expressions` — every expression (aggregate or not)
//! that participates in grouping already has a stable column index, which
//! doubles as `exprToIndexInGroupByData` from the source design without a
//! separate identity map.

use hashbrown::HashMap;

use crate::value::ValueArray;

/// A stable handle to one group's state vector. Never reused or
/// invalidated while the arena lives, unlike a map value reference.
pub type GroupId = usize;

/// One group's per-slot aggregation state. Each slot corresponds to a
/// column index in `Select::expressions`; non-aggregate and group-key
/// columns simply leave their slot `None`.
#[derive(Debug, Default, Clone)]
pub struct GroupSlots(Vec<Option<crate::expression::AggValue>>);

impl GroupSlots {
    fn with_len(len: usize) -> Self {
        GroupSlots(vec![None; len])
    }

    /// Grows the vector to at least `len` slots, preserving existing state.
    pub fn ensure_len(&mut self, len: usize) {
        if self.0.len() < len {
            self.0.resize_with(len, || None);
        }
    }

    pub fn get(&self, slot: usize) -> Option<&crate::expression::AggValue> {
        self.0.get(slot).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: usize) -> &mut Option<crate::expression::AggValue> {
        if slot >= self.0.len() {
            self.ensure_len(slot + 1);
        }
        &mut self.0[slot]
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Arena of per-group state vectors, keyed by group key.
///
/// Allocated on entry to hashed-group execution and released on exit
/// (including early-return/error paths, since it is owned by the executor
/// call and dropped with it) — it never escapes the call, matching
/// `spec.md` §5's group-state lifetime rule.
#[derive(Debug, Default)]
pub struct GroupStateArena {
    keys: HashMap<ValueArray, GroupId>,
    slots: Vec<GroupSlots>,
    /// Insertion order of group ids, so hashed-group emission can iterate
    /// groups in a deterministic (first-seen) order even though the
    /// underlying map has none. `spec.md` §5 only requires downstream
    /// sorting when `ORDER BY` is present; first-seen order keeps
    /// unordered output reproducible for the same input order.
    order: Vec<(ValueArray, GroupId)>,
}

impl GroupStateArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the `GroupId` for `key`, creating a fresh, all-`None` state
    /// vector of `min_len` slots if this is the first row for this key.
    pub fn get_or_create(&mut self, key: &ValueArray, min_len: usize) -> GroupId {
        if let Some(&id) = self.keys.get(key) {
            self.slots[id].ensure_len(min_len);
            return id;
        }
        let id = self.slots.len();
        self.slots.push(GroupSlots::with_len(min_len));
        self.keys.insert(key.clone(), id);
        self.order.push((key.clone(), id));
        id
    }

    pub fn slots_mut(&mut self, id: GroupId) -> &mut GroupSlots {
        &mut self.slots[id]
    }

    pub fn slots(&self, id: GroupId) -> &GroupSlots {
        &self.slots[id]
    }

    /// Iterates groups in first-seen order, as `(key, GroupId)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&ValueArray, GroupId)> {
        self.order.iter().map(|(k, id)| (k, *id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn growth_does_not_move_other_groups() {
        let mut arena = GroupStateArena::new();
        let k1: ValueArray = vec![Value::Int(1)];
        let k2: ValueArray = vec![Value::Int(2)];
        let g1 = arena.get_or_create(&k1, 2);
        let g2 = arena.get_or_create(&k2, 2);
        arena.slots_mut(g1).ensure_len(10);
        assert_eq!(arena.slots(g1).len(), 10);
        assert_eq!(arena.slots(g2).len(), 2);
    }

    #[test]
    fn revisiting_a_key_returns_the_same_id() {
        let mut arena = GroupStateArena::new();
        let k: ValueArray = vec![Value::Int(7)];
        let a = arena.get_or_create(&k, 1);
        let b = arena.get_or_create(&k, 1);
        assert_eq!(a, b);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn iteration_order_matches_first_seen_order() {
        let mut arena = GroupStateArena::new();
        let k2: ValueArray = vec![Value::Int(2)];
        let k1: ValueArray = vec![Value::Int(1)];
        arena.get_or_create(&k2, 1);
        arena.get_or_create(&k1, 1);
        let order: Vec<_> = arena.iter().map(|(k, _)| k.clone()).collect();
        assert_eq!(order, vec![k2, k1]);
    }
}
