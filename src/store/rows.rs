//! Row-oriented stores: selection and per-column filters over a row list.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::{Arc, Mutex};

use super::{lock, DataStore, Subscription};

/// A record with a stable identity, usable as a table row.
pub trait Row: Clone + Send + Sync + 'static {
    type Id: Copy + Ord + fmt::Debug + Send + Sync + 'static;

    fn row_id(&self) -> Self::Id;
}

/// A predicate over one row. Filters are keyed by column name.
pub type RowFilter<R> = Arc<dyn Fn(&R) -> bool + Send + Sync>;

/// The set of selected row ids.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection<Id: Ord> {
    ids: BTreeSet<Id>,
    preserve_on_replace: bool,
}

impl<Id: Ord + Copy> Default for Selection<Id> {
    fn default() -> Self {
        Self {
            ids: BTreeSet::new(),
            preserve_on_replace: false,
        }
    }
}

impl<Id: Ord + Copy> Selection<Id> {
    pub fn contains(&self, id: &Id) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> Vec<Id> {
        self.ids.iter().copied().collect()
    }

    pub fn preserves_on_replace(&self) -> bool {
        self.preserve_on_replace
    }

    /// Apply the replacement policy after the rows were swapped out: clear,
    /// or keep only the ids that still exist.
    fn on_replace(&mut self, present: &BTreeSet<Id>) {
        if self.preserve_on_replace {
            self.ids.retain(|id| present.contains(id));
        } else {
            self.ids.clear();
        }
    }
}

/// What a row store publishes: every row, the rows passing all filters, and
/// the selected rows (in row order).
#[derive(Clone, Debug, PartialEq)]
pub struct RowBundle<R> {
    pub rows: Vec<R>,
    pub visible: Vec<R>,
    pub selected: Vec<R>,
}

impl<R> Default for RowBundle<R> {
    fn default() -> Self {
        Self {
            rows: Vec::new(),
            visible: Vec::new(),
            selected: Vec::new(),
        }
    }
}

struct RowState<R: Row> {
    rows: Vec<R>,
    selection: Selection<R::Id>,
    filters: BTreeMap<String, RowFilter<R>>,
}

impl<R: Row> RowState<R> {
    fn bundle(&self) -> RowBundle<R> {
        let visible = self
            .rows
            .iter()
            .filter(|row| self.filters.values().all(|accept| accept(*row)))
            .cloned()
            .collect();
        let selected = self
            .rows
            .iter()
            .filter(|row| self.selection.contains(&row.row_id()))
            .cloned()
            .collect();
        RowBundle {
            rows: self.rows.clone(),
            visible,
            selected,
        }
    }

    fn has_row(&self, id: &R::Id) -> bool {
        self.rows.iter().any(|row| row.row_id() == *id)
    }
}

/// A store of `RowBundle`s following a source store of rows.
///
/// Every change (source replacement, selection, filters) recomputes the
/// bundle and publishes it wholesale.
pub struct RowDataStore<R: Row> {
    bundle: DataStore<RowBundle<R>>,
    state: Arc<Mutex<RowState<R>>>,
    _source: Subscription,
}

impl<R: Row> RowDataStore<R> {
    /// Follow `source`, starting from its current rows.
    pub fn follow(name: &str, source: &DataStore<Vec<R>>) -> Self {
        let state = Arc::new(Mutex::new(RowState {
            rows: source.get_data(),
            selection: Selection::default(),
            filters: BTreeMap::new(),
        }));
        let initial = lock(&state).bundle();
        let bundle = DataStore::with_data(name, initial);

        let state_clone = Arc::clone(&state);
        let bundle_clone = bundle.clone();
        let subscription = source.subscribe(move |rows: &Vec<R>| {
            let next = {
                let mut state = lock(&state_clone);
                state.rows = rows.clone();
                let present: BTreeSet<R::Id> = rows.iter().map(Row::row_id).collect();
                state.selection.on_replace(&present);
                state.bundle()
            };
            bundle_clone.set_data(next);
        });

        Self {
            bundle,
            state,
            _source: subscription,
        }
    }

    /// The bundle store, for subscriptions and bindings.
    pub fn store(&self) -> &DataStore<RowBundle<R>> {
        &self.bundle
    }

    pub fn get_data(&self) -> RowBundle<R> {
        self.bundle.get_data()
    }

    pub fn selection(&self) -> Selection<R::Id> {
        lock(&self.state).selection.clone()
    }

    pub fn selected_ids(&self) -> Vec<R::Id> {
        lock(&self.state).selection.ids()
    }

    /// Keep (pruned) selections across source replacements instead of
    /// clearing them.
    pub fn set_preserve_selection(&self, preserve: bool) {
        lock(&self.state).selection.preserve_on_replace = preserve;
    }

    /// Select a row. Ids not present in the current rows are ignored.
    pub fn select(&self, id: R::Id) -> bool {
        self.mutate(|state| state.has_row(&id) && state.selection.ids.insert(id))
    }

    pub fn deselect(&self, id: R::Id) -> bool {
        self.mutate(|state| state.selection.ids.remove(&id))
    }

    pub fn toggle(&self, id: R::Id) -> bool {
        self.mutate(|state| {
            if state.selection.ids.remove(&id) {
                true
            } else {
                state.has_row(&id) && state.selection.ids.insert(id)
            }
        })
    }

    /// Select every row that passes the current filters.
    pub fn select_all_visible(&self) -> bool {
        self.mutate(|state| {
            let visible: Vec<R::Id> = state.bundle().visible.iter().map(Row::row_id).collect();
            let before = state.selection.len();
            state.selection.ids.extend(visible);
            state.selection.len() != before
        })
    }

    pub fn clear_selection(&self) -> bool {
        self.mutate(|state| {
            let changed = !state.selection.is_empty();
            state.selection.ids.clear();
            changed
        })
    }

    /// Install (or replace) the filter for a column.
    pub fn set_filter(&self, column: &str, filter: impl Fn(&R) -> bool + Send + Sync + 'static) {
        self.mutate(|state| {
            state.filters.insert(column.to_string(), Arc::new(filter));
            true
        });
    }

    pub fn clear_filter(&self, column: &str) -> bool {
        self.mutate(|state| state.filters.remove(column).is_some())
    }

    pub fn clear_filters(&self) {
        self.mutate(|state| {
            let changed = !state.filters.is_empty();
            state.filters.clear();
            changed
        });
    }

    pub fn filtered_columns(&self) -> Vec<String> {
        lock(&self.state).filters.keys().cloned().collect()
    }

    /// Apply `change`; publish a new bundle if it reports a change.
    fn mutate(&self, change: impl FnOnce(&mut RowState<R>) -> bool) -> bool {
        let next = {
            let mut state = lock(&self.state);
            if !change(&mut state) {
                return false;
            }
            state.bundle()
        };
        self.bundle.set_data(next);
        true
    }
}
