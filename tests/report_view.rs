//! End-to-end report view scenarios against the in-process server.
//!
//! Each test mounts a `ReportView` over a `SimulatedServer`, drives it the way
//! the admin page does (select rows, submit, watch the stores) and checks the
//! stores against the server's authoritative copy.
//!
//! Run with:
//!   cargo test --test report_view

use std::sync::{Arc, Mutex};
use std::time::Duration;

use organizer::model::{Action, Activist, Signup, SignupState};
use organizer::store::RowBundle;
use organizer::view::{
    MutationKind, RecordingTitles, ReportView, SearchResult, ViewOptions, ViewPhase,
};
use organizer::{ConsoleError, SimulatedServer, StoreBinding};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// An action with one signup per given state, plus its view (not yet loaded).
fn mount_with_states(states: &[SignupState], options: ViewOptions) -> (Arc<SimulatedServer>, Action, ReportView) {
    let server = SimulatedServer::new();
    let action = server.add_action("Door knocking");
    for (n, state) in states.iter().enumerate() {
        let activist = server.add_activist(&format!("Volunteer {}", n), &format!("v{}@example.org", n));
        server.add_signup(action.id, activist.id, *state).unwrap();
    }
    let view = ReportView::mount(
        action.id,
        server.clone(),
        Arc::new(RecordingTitles::default()),
        options,
    );
    (server, action, view)
}

fn states_of(view: &ReportView) -> Vec<SignupState> {
    view.signups().get_data().iter().map(|s| s.state).collect()
}

// ---------------------------------------------------------------------------
// Bulk edit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_bulk_edit_two_signups() {
    let (server, action, view) = mount_with_states(
        &[SignupState::Prospective, SignupState::Confirmed],
        ViewOptions::default(),
    );
    view.load().await.unwrap();
    assert_eq!(states_of(&view), vec![SignupState::Prospective, SignupState::Confirmed]);

    assert!(view.rows().select_all_visible());
    assert_eq!(view.rows().selected_ids().len(), 2);

    let phases = Arc::new(Mutex::new(Vec::new()));
    let phases_clone = Arc::clone(&phases);
    let _watch = view.phase_store().subscribe(move |phase: &ViewPhase| {
        phases_clone.lock().unwrap().push(phase.clone());
    });

    let outcome = view.bulk_set_state(SignupState::Attended).await.unwrap();
    assert_eq!(outcome.updated.len(), 2);
    assert!(outcome.failed.is_empty());

    assert_eq!(states_of(&view), vec![SignupState::Attended, SignupState::Attended]);
    assert_eq!(view.phase(), ViewPhase::Loaded);
    assert_eq!(
        *phases.lock().unwrap(),
        vec![ViewPhase::Mutating(MutationKind::BulkState), ViewPhase::Loaded]
    );

    // Two PATCHes, then exactly one refetch after both settled.
    let requests = server.requests();
    let patches = requests.iter().filter(|r| r.starts_with("PATCH")).count();
    assert_eq!(patches, 2);
    assert_eq!(requests.last().unwrap(), &format!("GET /api/actions/{}/", action.id));
}

#[tokio::test]
async fn test_bulk_edit_failure_stays_visible() {
    let (server, _action, view) = mount_with_states(
        &[SignupState::Prospective, SignupState::Prospective, SignupState::Prospective],
        ViewOptions::default(),
    );
    view.load().await.unwrap();
    let ids: Vec<_> = view.signups().get_data().iter().map(|s| s.id).collect();
    server.fail_signup(ids[1]);

    view.rows().select_all_visible();
    let outcome = view.bulk_set_state(SignupState::Confirmed).await.unwrap();

    assert_eq!(outcome.updated, vec![ids[0], ids[2]]);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(outcome.failed[0].0, ids[1]);
    assert!(!outcome.is_complete());

    // The refetched document is server truth: no rollback, no retry.
    assert_eq!(
        states_of(&view),
        vec![SignupState::Confirmed, SignupState::Prospective, SignupState::Confirmed]
    );
    assert!(matches!(
        view.last_error(),
        Some(ConsoleError::Server { status: 500, .. })
    ));
    assert_eq!(view.phase(), ViewPhase::Loaded);
}

#[tokio::test]
async fn test_preserved_selection_survives_refetch() {
    let options = ViewOptions {
        preserve_selection: true,
        ..ViewOptions::default()
    };
    let (_server, _action, view) = mount_with_states(
        &[SignupState::Prospective, SignupState::Confirmed],
        options,
    );
    view.load().await.unwrap();
    let first = view.signups().get_data()[0].id;
    view.rows().select(first);

    view.bulk_set_state(SignupState::NoShow).await.unwrap();
    assert_eq!(view.rows().selected_ids(), vec![first]);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_submit_is_busy() {
    let (server, _action, view) = mount_with_states(&[SignupState::Prospective], ViewOptions::default());
    view.load().await.unwrap();
    view.rows().select_all_visible();
    server.set_latency(Duration::from_secs(1));

    let view = Arc::new(view);
    let first = tokio::spawn({
        let view = Arc::clone(&view);
        async move { view.bulk_set_state(SignupState::Confirmed).await }
    });
    while !view.phase().is_busy() {
        tokio::task::yield_now().await;
    }

    let second = view.bulk_set_state(SignupState::Cancelled).await;
    assert_eq!(second.unwrap_err(), ConsoleError::Busy);

    let outcome = first.await.unwrap().unwrap();
    assert!(outcome.is_complete());
    assert_eq!(view.phase(), ViewPhase::Loaded);
    assert_eq!(states_of(&view), vec![SignupState::Confirmed]);
}

#[tokio::test(start_paused = true)]
async fn test_slow_reload_does_not_overwrite_newer_document() {
    let (server, _action, view) = mount_with_states(&[SignupState::Prospective], ViewOptions::default());
    view.load().await.unwrap();
    view.rows().select_all_visible();
    server.set_latency(Duration::from_secs(10));

    // The reload's GET is answered with the pre-edit document but arrives
    // after the bulk edit's own refetch.
    let (reload, bulk) = tokio::join!(view.reload(), async {
        tokio::task::yield_now().await;
        server.set_latency(Duration::ZERO);
        view.bulk_set_state(SignupState::Confirmed).await
    });

    assert!(reload.is_ok());
    assert!(bulk.unwrap().is_complete());
    assert_eq!(states_of(&view), vec![SignupState::Confirmed]);
    assert_eq!(view.phase(), ViewPhase::Loaded);
}

// ---------------------------------------------------------------------------
// Loading, timeouts and teardown
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_derived_stores_track_document() {
    let (server, action, view) = mount_with_states(&[SignupState::Confirmed], ViewOptions::default());
    server.add_form(action.id, "RSVP", true).unwrap();
    server.add_field(action.id, "Dietary needs").unwrap();
    view.load().await.unwrap();

    let document = view.action().get_data();
    assert_eq!(view.forms().get_data(), document.forms);
    assert_eq!(view.signups().get_data(), document.signups);
    let labels: Vec<String> = view.columns().get_data().into_iter().map(|c| c.label).collect();
    assert_eq!(labels, vec!["Name", "E-mail", "Status", "Dietary needs"]);
}

#[tokio::test(start_paused = true)]
async fn test_load_times_out() {
    let options = ViewOptions {
        request_timeout: Duration::from_secs(5),
        ..ViewOptions::default()
    };
    let (server, _action, view) = mount_with_states(&[SignupState::Confirmed], options);
    server.set_latency(Duration::from_secs(60));

    assert_eq!(view.load().await.unwrap_err(), ConsoleError::Timeout);
    assert!(matches!(view.phase(), ViewPhase::LoadError { .. }));
    assert!(!view.action().is_loaded());

    server.set_latency(Duration::ZERO);
    view.retry().await.unwrap();
    assert_eq!(view.phase(), ViewPhase::Loaded);
}

#[tokio::test(start_paused = true)]
async fn test_unmount_cancels_in_flight_load() {
    let (server, _action, view) = mount_with_states(&[SignupState::Confirmed], ViewOptions::default());
    server.set_latency(Duration::from_secs(10));

    let (result, _) = tokio::join!(view.load(), async {
        tokio::task::yield_now().await;
        view.unmount();
    });

    assert_eq!(result.unwrap_err(), ConsoleError::Cancelled);
    assert_eq!(view.phase(), ViewPhase::Unmounted);
    assert!(!view.action().is_loaded());
    assert!(view.last_error().is_none());
}

// ---------------------------------------------------------------------------
// Bindings and search
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_binding_renders_and_unmounts() {
    let (_server, _action, view) = mount_with_states(
        &[SignupState::Prospective, SignupState::Confirmed],
        ViewOptions::default(),
    );
    let before = view.rows().store().listener_count();

    let visible = Arc::new(Mutex::new(Vec::new()));
    let visible_clone = Arc::clone(&visible);
    let mut binding = StoreBinding::mount(view.rows().store(), move |bundle: &RowBundle<Signup>| {
        visible_clone.lock().unwrap().push(bundle.visible.len());
    });
    assert_eq!(view.rows().store().listener_count(), before + 1);

    view.load().await.unwrap();
    view.filter_states(&[SignupState::Confirmed]);
    assert_eq!(*visible.lock().unwrap(), vec![0, 2, 1]);
    assert_eq!(binding.render_count(), 3);

    binding.unmount();
    assert_eq!(view.rows().store().listener_count(), before);
    view.filter_states(&[]);
    assert_eq!(binding.render_count(), 3);
}

#[tokio::test]
async fn test_search_without_matches_renders_empty() {
    let (server, _action, view) = mount_with_states(&[], ViewOptions::default());
    server.add_activist("Bo", "bo@example.org");

    let rendered = Arc::new(Mutex::new(Vec::new()));
    let rendered_clone = Arc::clone(&rendered);
    let binding = StoreBinding::mount(view.search().results(), move |found: &Vec<Activist>| {
        rendered_clone.lock().unwrap().push(found.len());
    });

    let result = view.search().search("ana").await;
    assert_eq!(result, Ok(SearchResult::Current(0)));
    assert_eq!(*rendered.lock().unwrap(), vec![0, 0]);
    assert!(binding.data().is_empty());
}

#[tokio::test]
async fn test_pick_searched_activist_and_add() {
    let (server, _action, view) = mount_with_states(&[], ViewOptions::default());
    let ana = server.add_activist("Ana Lima", "ana@example.org");
    view.load().await.unwrap();

    view.search().search("ana").await.unwrap();
    let picked = view.search().choose(ana.id).unwrap();
    let signup = view.add_activist(&picked).await.unwrap();

    assert_eq!(signup.activist.name, "Ana Lima");
    assert_eq!(view.signups().get_data().len(), 1);
    assert_eq!(view.signups().get_data()[0].state_name, "prospective");
}
