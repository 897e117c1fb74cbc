use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::CancelScope;
use crate::api::ApiBackend;
use crate::error::Result;
use crate::model::{Activist, ActivistId};
use crate::store::DataStore;

/// How a search call ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchResult {
    /// Results were published; carries the match count.
    Current(usize),
    /// A newer search started before this one answered; results dropped.
    Stale,
}

/// Activist autocomplete. Only the most recent query may publish results,
/// so answers arriving out of order never overwrite newer ones.
pub struct ActivistSearch {
    backend: Arc<dyn ApiBackend>,
    scope: CancelScope,
    results: DataStore<Vec<Activist>>,
    query: DataStore<String>,
    latest: AtomicU64,
}

impl ActivistSearch {
    pub fn new(backend: Arc<dyn ApiBackend>, scope: CancelScope) -> Self {
        Self {
            backend,
            scope,
            results: DataStore::new("activist-search"),
            query: DataStore::new("activist-query"),
            latest: AtomicU64::new(0),
        }
    }

    pub fn results(&self) -> &DataStore<Vec<Activist>> {
        &self.results
    }

    pub fn query(&self) -> &DataStore<String> {
        &self.query
    }

    /// Search as the user types. A blank query clears the list without a
    /// request.
    pub async fn search(&self, query: &str) -> Result<SearchResult> {
        let seq = self.latest.fetch_add(1, Ordering::SeqCst) + 1;
        self.query.set_data(query.to_string());

        if query.trim().is_empty() {
            self.results.set_data(Vec::new());
            return Ok(SearchResult::Current(0));
        }

        let outcome = self.scope.run(self.backend.search_activists(query)).await;
        if self.latest.load(Ordering::SeqCst) != seq {
            log::debug!("dropping stale search results for '{}'", query);
            return Ok(SearchResult::Stale);
        }

        let page = outcome?;
        let count = page.results.len();
        self.results.set_data(page.results);
        Ok(SearchResult::Current(count))
    }

    /// Pick a result by id, as when the user chooses an autocomplete entry.
    pub fn choose(&self, id: ActivistId) -> Option<Activist> {
        self.results.with(|results| results.iter().find(|a| a.id == id).cloned())
    }

    pub fn clear_subscribers(&self) {
        self.results.clear_subscribers();
        self.query.clear_subscribers();
    }
}
