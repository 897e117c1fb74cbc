//! The signup report for one action.
//!
//! A `ReportView` owns the store graph for an action page:
//!
//! ```text
//! action (DataStore<Action>)
//!   ├── forms    (DerivedStore → Vec<Form>)
//!   ├── columns  (DerivedStore → Vec<Column>)
//!   └── signups  (DerivedStore → Vec<Signup>)
//!         └── rows (RowDataStore<Signup>: filters + selection)
//! ```
//!
//! and drives it through the page's lifecycle:
//!
//! ```text
//! Loading ──ok──→ Loaded ──begin──→ Mutating(kind) ──settle──→ Loaded
//!    │              ↑
//!    └──err──→ LoadError ──retry──→ Loading
//!
//! any state ──unmount──→ Unmounted
//! ```
//!
//! Every request goes through the view's `CancelScope`, so unmounting
//! cancels whatever is in flight and nothing resolving afterwards reaches
//! the stores.

mod cancel;
pub mod columns;
mod search;

pub use cancel::CancelScope;
pub use columns::{Column, ColumnKey};
pub use search::{ActivistSearch, SearchResult};

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::join_all;

use crate::api::{ApiBackend, Endpoint};
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::model::{
    Action, ActionId, Activist, EmailPreview, EmailRequest, Form, FormId, FormPatch, NewSignup,
    Signup, SignupId, SignupPatch, SignupState,
};
use crate::store::{lock, DataStore, DerivedStore, RowDataStore};

/// Receives the page subtitle whenever a document loads.
pub trait TitleSink: Send + Sync {
    fn set_subtitle(&self, subtitle: &str);
}

/// Discards titles.
pub struct NoTitles;

impl TitleSink for NoTitles {
    fn set_subtitle(&self, _subtitle: &str) {}
}

/// Keeps every subtitle it is given.
#[derive(Default)]
pub struct RecordingTitles(Mutex<Vec<String>>);

impl RecordingTitles {
    pub fn titles(&self) -> Vec<String> {
        lock(&self.0).clone()
    }
}

impl TitleSink for RecordingTitles {
    fn set_subtitle(&self, subtitle: &str) {
        lock(&self.0).push(subtitle.to_string());
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    BulkState,
    AddActivist,
    ToggleForm,
    SendEmail,
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::BulkState => "bulk state change",
            Self::AddActivist => "add activist",
            Self::ToggleForm => "form toggle",
            Self::SendEmail => "send email",
        };
        f.write_str(name)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ViewPhase {
    #[default]
    Loading,
    LoadError {
        message: String,
    },
    Loaded,
    Mutating(MutationKind),
    Unmounted,
}

impl ViewPhase {
    /// A write is in flight.
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Mutating(_))
    }

    pub fn can_mutate(&self) -> bool {
        *self == Self::Loaded
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ViewOptions {
    pub request_timeout: Duration,
    pub preserve_selection: bool,
}

impl Default for ViewOptions {
    fn default() -> Self {
        Self::from(&ConsoleConfig::default())
    }
}

impl From<&ConsoleConfig> for ViewOptions {
    fn from(config: &ConsoleConfig) -> Self {
        Self {
            request_timeout: config.request_timeout(),
            preserve_selection: config.preserve_selection,
        }
    }
}

/// Result of a bulk state change. Rows are listed by the outcome of their
/// own PATCH; the refetched document is the authority on final state.
#[derive(Clone, Debug, PartialEq)]
pub struct BulkOutcome {
    pub state: SignupState,
    pub updated: Vec<SignupId>,
    pub failed: Vec<(SignupId, ConsoleError)>,
}

impl BulkOutcome {
    fn empty(state: SignupState) -> Self {
        Self {
            state,
            updated: Vec::new(),
            failed: Vec::new(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Holds the view in `Mutating` and returns it to `Loaded` when dropped,
/// whether the write succeeded, failed or was cancelled.
struct MutationGuard<'a> {
    view: &'a ReportView,
    kind: MutationKind,
}

impl Drop for MutationGuard<'_> {
    fn drop(&mut self) {
        self.view.transition(|phase| match phase {
            ViewPhase::Mutating(kind) if *kind == self.kind => Some(ViewPhase::Loaded),
            _ => None,
        });
    }
}

pub struct ReportView {
    action_id: ActionId,
    backend: Arc<dyn ApiBackend>,
    titles: Arc<dyn TitleSink>,
    scope: CancelScope,
    phase_lock: Mutex<ViewPhase>,
    phase: DataStore<ViewPhase>,
    last_error: DataStore<Option<ConsoleError>>,
    fetches: AtomicU64,
    applied: Mutex<u64>,
    action: DataStore<Action>,
    forms: DerivedStore<Action, Vec<Form>>,
    columns: DerivedStore<Action, Vec<Column>>,
    signups: DerivedStore<Action, Vec<Signup>>,
    rows: RowDataStore<Signup>,
    search: ActivistSearch,
}

impl ReportView {
    /// Build the store graph for `action_id`. The view starts in `Loading`;
    /// call `load` to fetch the document.
    pub fn mount(
        action_id: ActionId,
        backend: Arc<dyn ApiBackend>,
        titles: Arc<dyn TitleSink>,
        options: ViewOptions,
    ) -> Self {
        let scope = CancelScope::new(options.request_timeout);
        let action: DataStore<Action> = DataStore::new("action");
        let forms = DerivedStore::new("forms", &action, |action: &Action| action.forms.clone());
        let columns = DerivedStore::new("columns", &action, Column::for_action);
        let signups = DerivedStore::new("signups", &action, |action: &Action| action.signups.clone());
        let rows = RowDataStore::follow("signup-rows", signups.store());
        rows.set_preserve_selection(options.preserve_selection);
        let search = ActivistSearch::new(Arc::clone(&backend), scope.clone());

        log::info!("mounted report view for action {}", action_id);
        Self {
            action_id,
            backend,
            titles,
            scope,
            phase_lock: Mutex::new(ViewPhase::Loading),
            phase: DataStore::new("view-phase"),
            last_error: DataStore::new("last-error"),
            fetches: AtomicU64::new(0),
            applied: Mutex::new(0),
            action,
            forms,
            columns,
            signups,
            rows,
            search,
        }
    }

    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    pub fn phase(&self) -> ViewPhase {
        lock(&self.phase_lock).clone()
    }

    /// Published phase, for bindings.
    pub fn phase_store(&self) -> &DataStore<ViewPhase> {
        &self.phase
    }

    pub fn last_error(&self) -> Option<ConsoleError> {
        self.last_error.get_data()
    }

    pub fn last_error_store(&self) -> &DataStore<Option<ConsoleError>> {
        &self.last_error
    }

    pub fn action(&self) -> &DataStore<Action> {
        &self.action
    }

    pub fn forms(&self) -> &DataStore<Vec<Form>> {
        self.forms.store()
    }

    pub fn columns(&self) -> &DataStore<Vec<Column>> {
        self.columns.store()
    }

    pub fn signups(&self) -> &DataStore<Vec<Signup>> {
        self.signups.store()
    }

    pub fn rows(&self) -> &RowDataStore<Signup> {
        &self.rows
    }

    pub fn search(&self) -> &ActivistSearch {
        &self.search
    }

    /// Apply `step` to the phase under the lock, then publish the new phase.
    /// `Unmounted` is terminal. Returns whether the phase changed.
    fn transition(&self, step: impl FnOnce(&ViewPhase) -> Option<ViewPhase>) -> bool {
        let next = {
            let mut phase = lock(&self.phase_lock);
            if *phase == ViewPhase::Unmounted {
                return false;
            }
            match step(&phase) {
                Some(next) if next != *phase => {
                    log::info!("action {}: {:?} -> {:?}", self.action_id, *phase, next);
                    *phase = next.clone();
                    next
                }
                _ => return false,
            }
        };
        self.phase.set_data(next);
        true
    }

    fn ensure_mounted(&self) -> Result<()> {
        if self.is_unmounted() {
            return Err(ConsoleError::Unmounted);
        }
        Ok(())
    }

    fn is_unmounted(&self) -> bool {
        *lock(&self.phase_lock) == ViewPhase::Unmounted || self.scope.is_cancelled()
    }

    fn record(&self, err: &ConsoleError) {
        if self.is_unmounted() {
            return;
        }
        self.last_error.set_data(Some(err.clone()));
    }

    fn clear_error(&self) {
        if self.last_error.with(Option::is_some) {
            self.last_error.set_data(None);
        }
    }

    /// Fetch the document and publish it. Results arriving after teardown
    /// are dropped, and so is any fetch older than the last one published.
    async fn refresh(&self) -> Result<()> {
        let seq = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        let action = self.scope.run(self.backend.get_action(self.action_id)).await?;
        if self.is_unmounted() {
            log::warn!("action {}: dropping document fetched after unmount", self.action_id);
            return Err(ConsoleError::Unmounted);
        }

        let mut applied = lock(&self.applied);
        if seq < *applied {
            log::debug!(
                "action {}: dropping fetch {} superseded by fetch {}",
                self.action_id,
                seq,
                *applied
            );
            return Ok(());
        }
        *applied = seq;
        self.titles.set_subtitle(&action.name);
        self.action.set_data(action);
        Ok(())
    }

    /// Fetch the action. A failed first load moves the view to `LoadError`;
    /// a failed reload keeps the current document and records the error.
    pub async fn load(&self) -> Result<()> {
        self.ensure_mounted()?;
        {
            let phase = lock(&self.phase_lock);
            if phase.is_busy() {
                return Err(ConsoleError::Busy);
            }
        }
        let first = !self.action.is_loaded();
        if first {
            self.transition(|_| Some(ViewPhase::Loading));
        }

        match self.refresh().await {
            Ok(()) => {
                self.clear_error();
                self.transition(|phase| match phase {
                    ViewPhase::Loading | ViewPhase::LoadError { .. } => Some(ViewPhase::Loaded),
                    _ => None,
                });
                Ok(())
            }
            Err(err) => {
                if self.is_unmounted() {
                    return Err(err);
                }
                log::warn!("action {}: load failed: {}", self.action_id, err);
                self.record(&err);
                if first {
                    let message = err.to_string();
                    self.transition(|_| Some(ViewPhase::LoadError { message }));
                }
                Err(err)
            }
        }
    }

    pub async fn reload(&self) -> Result<()> {
        self.load().await
    }

    /// Leave `LoadError` and try the first load again.
    pub async fn retry(&self) -> Result<()> {
        self.transition(|phase| match phase {
            ViewPhase::LoadError { .. } => Some(ViewPhase::Loading),
            _ => None,
        });
        self.load().await
    }

    fn begin(&self, kind: MutationKind) -> Result<MutationGuard<'_>> {
        let next = {
            let mut phase = lock(&self.phase_lock);
            match &*phase {
                ViewPhase::Loaded => {}
                ViewPhase::Mutating(_) => return Err(ConsoleError::Busy),
                ViewPhase::Unmounted => return Err(ConsoleError::Unmounted),
                ViewPhase::Loading | ViewPhase::LoadError { .. } => {
                    return Err(ConsoleError::NotLoaded)
                }
            }
            log::info!("action {}: starting {}", self.action_id, kind);
            *phase = ViewPhase::Mutating(kind);
            phase.clone()
        };
        self.phase.set_data(next);
        self.clear_error();
        Ok(MutationGuard { view: self, kind })
    }

    /// Refetch after a committed write. A failure here does not undo the
    /// write, so it is only recorded.
    async fn refresh_after_write(&self, kind: MutationKind) {
        if let Err(err) = self.refresh().await {
            log::warn!("action {}: refetch after {} failed: {}", self.action_id, kind, err);
            self.record(&err);
        }
    }

    /// Run one write under `Mutating`, then refetch on success. The write's
    /// result is returned even if the refetch fails.
    async fn mutate<T, F>(&self, kind: MutationKind, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let _guard = self.begin(kind)?;
        match self.scope.run(request).await {
            Ok(value) => {
                self.refresh_after_write(kind).await;
                Ok(value)
            }
            Err(err) => {
                log::warn!("action {}: {} failed: {}", self.action_id, kind, err);
                self.record(&err);
                Err(err)
            }
        }
    }

    /// Move every selected signup to `state`. The PATCHes run concurrently
    /// and all settle before the document is refetched, whatever their
    /// outcome. Failed rows are not rolled back or retried. A failed refetch
    /// is recorded in `last_error`; the outcome is still returned.
    pub async fn bulk_set_state(&self, state: SignupState) -> Result<BulkOutcome> {
        self.ensure_mounted()?;
        let ids = self.rows.selected_ids();
        if ids.is_empty() {
            log::debug!("action {}: bulk change with empty selection", self.action_id);
            return Ok(BulkOutcome::empty(state));
        }

        let _guard = self.begin(MutationKind::BulkState)?;
        let patch = SignupPatch { state };
        let patch = &patch;
        let settled = join_all(ids.into_iter().map(|id| async move {
            let result = self.scope.run(self.backend.patch_signup(id, patch)).await;
            (id, result)
        }))
        .await;

        let mut outcome = BulkOutcome::empty(state);
        for (id, result) in settled {
            match result {
                Ok(_) => outcome.updated.push(id),
                Err(err) => {
                    log::warn!("signup {}: state change to {} failed: {}", id, state, err);
                    outcome.failed.push((id, err));
                }
            }
        }
        if let Some((_, err)) = outcome.failed.first() {
            self.record(err);
        }

        self.refresh_after_write(MutationKind::BulkState).await;
        Ok(outcome)
    }

    /// Sign `activist` up for this action as a prospective participant.
    pub async fn add_activist(&self, activist: &Activist) -> Result<Signup> {
        self.ensure_mounted()?;
        let action_url = self.action.with(|action| action.url.clone());
        let action_url = if action_url.is_empty() {
            Endpoint::Action(self.action_id).path()
        } else {
            action_url
        };
        let activist_url = if activist.url.is_empty() {
            Endpoint::Activist(activist.id).path()
        } else {
            activist.url.clone()
        };

        let signup = NewSignup::prospective(&activist_url, &action_url);
        self.mutate(MutationKind::AddActivist, self.backend.create_signup(&signup))
            .await
    }

    pub async fn set_form_active(&self, form: FormId, active: bool) -> Result<Form> {
        self.ensure_mounted()?;
        let patch = FormPatch { active };
        self.mutate(MutationKind::ToggleForm, self.backend.patch_form(form, &patch))
            .await
    }

    /// Email every selected signup.
    pub async fn send_email(&self, subject: &str, body: &str) -> Result<EmailPreview> {
        self.ensure_mounted()?;
        let email = self.email_for_selection(subject, body)?;
        self.mutate(
            MutationKind::SendEmail,
            self.backend.email_activists(self.action_id, &email),
        )
        .await
    }

    /// Render `body` as the first selected signup would receive it. Does not
    /// change the view's phase.
    pub async fn preview_email(&self, body: &str) -> Result<EmailPreview> {
        self.ensure_mounted()?;
        let email = self.email_for_selection("Preview", body)?;
        self.scope
            .run(self.backend.email_preview(self.action_id, &email))
            .await
    }

    fn email_for_selection(&self, subject: &str, body: &str) -> Result<EmailRequest> {
        let signups = self.rows.selected_ids();
        if signups.is_empty() {
            return Err(ConsoleError::EmptySelection);
        }
        Ok(EmailRequest {
            subject: subject.to_string(),
            body: body.to_string(),
            signups,
        })
    }

    /// Show only signups in one of `states`; an empty slice removes the filter.
    pub fn filter_states(&self, states: &[SignupState]) {
        let column = ColumnKey::Status.to_string();
        match columns::state_filter(states) {
            Some(accept) => self.rows.set_filter(&column, move |signup: &Signup| accept(signup)),
            None => {
                self.rows.clear_filter(&column);
            }
        }
    }

    /// Substring filter on one column; a blank needle removes it.
    pub fn filter_text(&self, column: &Column, needle: &str) {
        if needle.trim().is_empty() {
            self.rows.clear_filter(&column.id());
            return;
        }
        let accept = columns::text_filter(column, needle);
        self.rows.set_filter(&column.id(), move |signup: &Signup| accept(signup));
    }

    /// Cancel in-flight requests, detach every subscriber and enter
    /// `Unmounted`. Further operations fail with `Unmounted`.
    pub fn unmount(&self) {
        self.scope.cancel();
        if !self.transition(|_| Some(ViewPhase::Unmounted)) {
            return;
        }
        self.action.clear_subscribers();
        self.forms.store().clear_subscribers();
        self.columns.store().clear_subscribers();
        self.signups.store().clear_subscribers();
        self.rows.store().clear_subscribers();
        self.search.clear_subscribers();
        self.last_error.clear_subscribers();
        self.phase.clear_subscribers();
        log::info!("unmounted report view for action {}", self.action_id);
    }
}

impl Drop for ReportView {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}
