//! In-process organizing server
//!
//! Keeps actions, forms, signups and activists in memory and answers the same
//! calls as the HTTP API, computing server-side fields (`state_name`, resource
//! URLs) the way the real server does. Failures, latency and validation errors
//! can be injected, which is what the integration tests use to exercise
//! partial-failure and timeout paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{ApiBackend, Endpoint};
use crate::error::{ConsoleError, FieldErrors, Result};
use crate::model::{
    Action, ActionId, Activist, ActivistId, EmailPreview, EmailRequest, FieldId, Form, FormField,
    FormId, FormPatch, FormResponse, NewSignup, SearchPage, Signup, SignupId, SignupPatch,
    SignupState,
};
use crate::store::lock;

#[derive(Default)]
struct ServerState {
    next_id: u64,
    actions: BTreeMap<ActionId, Action>,
    activists: BTreeMap<ActivistId, Activist>,
    failing_signups: BTreeSet<SignupId>,
    failing_loads: usize,
    requests: Vec<String>,
    sent: Vec<(ActionId, EmailRequest)>,
}

impl ServerState {
    fn allocate(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn action_mut(&mut self, id: ActionId) -> Result<&mut Action> {
        self.actions
            .get_mut(&id)
            .ok_or_else(|| ConsoleError::NotFound(Endpoint::Action(id).path()))
    }

    fn signup_mut(&mut self, id: SignupId) -> Option<&mut Signup> {
        self.actions
            .values_mut()
            .flat_map(|action| action.signups.iter_mut())
            .find(|signup| signup.id == id)
    }

    fn form_mut(&mut self, id: FormId) -> Option<&mut Form> {
        self.actions
            .values_mut()
            .flat_map(|action| action.forms.iter_mut())
            .find(|form| form.id == id)
    }
}

fn invalid(field: &str, message: &str) -> ConsoleError {
    let mut errors = FieldErrors::new();
    errors.insert(field.to_string(), vec![message.to_string()]);
    ConsoleError::Validation { status: 400, errors }
}

/// Simulated organizing API.
pub struct SimulatedServer {
    state: Mutex<ServerState>,
    latency: Mutex<Duration>,
}

impl SimulatedServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ServerState::default()),
            latency: Mutex::new(Duration::ZERO),
        })
    }

    /// Delay applied to every call. Writes take effect after the delay;
    /// action reads are answered from the state at arrival, so a slow read
    /// can return a document older than a faster write's. Uses tokio time,
    /// so paused clocks in tests advance instantly.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = latency;
    }

    pub fn add_activist(&self, name: &str, email: &str) -> Activist {
        let mut state = lock(&self.state);
        let id = state.allocate();
        let activist = Activist {
            id,
            url: Endpoint::Activist(id).path(),
            name: name.to_string(),
            email: email.to_string(),
            ..Activist::default()
        };
        state.activists.insert(id, activist.clone());
        activist
    }

    pub fn add_action(&self, name: &str) -> Action {
        let mut state = lock(&self.state);
        let id = state.allocate();
        let action = Action {
            id,
            url: Endpoint::Action(id).path(),
            name: name.to_string(),
            ..Action::default()
        };
        state.actions.insert(id, action.clone());
        action
    }

    pub fn add_form(&self, action: ActionId, title: &str, active: bool) -> Result<Form> {
        let mut state = lock(&self.state);
        let id = state.allocate();
        let form = Form {
            id,
            url: Endpoint::Form(id).path(),
            title: title.to_string(),
            active,
            ..Form::default()
        };
        state.action_mut(action)?.forms.push(form.clone());
        Ok(form)
    }

    pub fn add_field(&self, action: ActionId, name: &str) -> Result<FormField> {
        let mut state = lock(&self.state);
        let id = state.allocate();
        let field = FormField {
            id,
            name: name.to_string(),
            ..FormField::default()
        };
        state.action_mut(action)?.fields.push(field.clone());
        Ok(field)
    }

    pub fn add_signup(&self, action: ActionId, activist: ActivistId, signup_state: SignupState) -> Result<Signup> {
        let mut state = lock(&self.state);
        let activist = state
            .activists
            .get(&activist)
            .cloned()
            .ok_or_else(|| ConsoleError::NotFound(Endpoint::Activist(activist).path()))?;
        let id = state.allocate();
        let signup = Signup {
            id,
            url: Endpoint::Signup(id).path(),
            activist,
            state: signup_state,
            state_name: signup_state.name().to_string(),
            responses: BTreeMap::new(),
        };
        state.action_mut(action)?.signups.push(signup.clone());
        Ok(signup)
    }

    /// Record a form response on an existing signup.
    pub fn set_response(&self, signup: SignupId, field: FieldId, value: &str) -> Result<()> {
        let mut state = lock(&self.state);
        let signup = state
            .signup_mut(signup)
            .ok_or_else(|| ConsoleError::NotFound(Endpoint::Signup(signup).path()))?;
        signup.responses.insert(
            field,
            FormResponse {
                value: value.to_string(),
            },
        );
        Ok(())
    }

    /// Make every PATCH of this signup fail with a 500.
    pub fn fail_signup(&self, id: SignupId) {
        lock(&self.state).failing_signups.insert(id);
    }

    /// Make the next `count` action fetches fail at the transport level.
    pub fn fail_next_loads(&self, count: usize) {
        lock(&self.state).failing_loads = count;
    }

    /// Authoritative copy of an action.
    pub fn action(&self, id: ActionId) -> Option<Action> {
        lock(&self.state).actions.get(&id).cloned()
    }

    /// Request lines seen so far, e.g. `PATCH /api/signups/3/`.
    pub fn requests(&self) -> Vec<String> {
        lock(&self.state).requests.clone()
    }

    pub fn sent_emails(&self) -> Vec<(ActionId, EmailRequest)> {
        lock(&self.state).sent.clone()
    }

    async fn delay(&self) {
        let latency = *lock(&self.latency);
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    async fn arrive(&self, method: &str, endpoint: Endpoint) {
        self.delay().await;
        lock(&self.state)
            .requests
            .push(format!("{} {}", method, endpoint));
    }

    /// Shared checks of the email endpoints. Returns the rendered body for the
    /// first recipient.
    fn render_email(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview> {
        if email.subject.trim().is_empty() {
            return Err(invalid("subject", "This field may not be blank."));
        }
        if email.signups.is_empty() {
            return Err(invalid("signups", "This list may not be empty."));
        }

        let mut state = lock(&self.state);
        let action = state.action_mut(action)?;
        let first = action
            .signups
            .iter()
            .find(|s| email.signups.contains(&s.id))
            .ok_or_else(|| invalid("signups", "No matching signups for this action."))?;
        Ok(EmailPreview {
            body: format!(
                "To: {} <{}>\nRe: {}\n\n{}",
                first.activist.name, first.activist.email, action.name, email.body
            ),
        })
    }
}

#[async_trait]
impl ApiBackend for SimulatedServer {
    async fn get_action(&self, id: ActionId) -> Result<Action> {
        let answer = {
            let mut state = lock(&self.state);
            state.requests.push(format!("GET {}", Endpoint::Action(id)));
            if state.failing_loads > 0 {
                state.failing_loads -= 1;
                Err(ConsoleError::Network("connection reset by peer".into()))
            } else {
                state
                    .actions
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| ConsoleError::NotFound(Endpoint::Action(id).path()))
            }
        };
        self.delay().await;
        answer
    }

    async fn patch_form(&self, id: FormId, patch: &FormPatch) -> Result<Form> {
        self.arrive("PATCH", Endpoint::Form(id)).await;
        let mut state = lock(&self.state);
        let form = state
            .form_mut(id)
            .ok_or_else(|| ConsoleError::NotFound(Endpoint::Form(id).path()))?;
        form.active = patch.active;
        Ok(form.clone())
    }

    async fn patch_signup(&self, id: SignupId, patch: &SignupPatch) -> Result<Signup> {
        self.arrive("PATCH", Endpoint::Signup(id)).await;
        let mut state = lock(&self.state);
        if state.failing_signups.contains(&id) {
            return Err(ConsoleError::Server {
                status: 500,
                message: "Internal Server Error".into(),
            });
        }
        let signup = state
            .signup_mut(id)
            .ok_or_else(|| ConsoleError::NotFound(Endpoint::Signup(id).path()))?;
        signup.state = patch.state;
        signup.state_name = patch.state.name().to_string();
        Ok(signup.clone())
    }

    async fn create_signup(&self, new: &NewSignup) -> Result<Signup> {
        self.arrive("POST", Endpoint::Signups).await;
        let action_id = Endpoint::id_from_url(&new.action, "actions")
            .ok_or_else(|| invalid("action", "Invalid hyperlink - No URL match."))?;
        let activist_id = Endpoint::id_from_url(&new.activist, "activists")
            .ok_or_else(|| invalid("activist", "Invalid hyperlink - No URL match."))?;

        let mut state = lock(&self.state);
        let activist = state
            .activists
            .get(&activist_id)
            .cloned()
            .ok_or_else(|| invalid("activist", "Invalid hyperlink - Object does not exist."))?;
        if !state.actions.contains_key(&action_id) {
            return Err(invalid("action", "Invalid hyperlink - Object does not exist."));
        }
        let id = state.allocate();
        let signup = Signup {
            id,
            url: Endpoint::Signup(id).path(),
            activist,
            state: new.state,
            state_name: new.state.name().to_string(),
            responses: new.responses.clone(),
        };
        state.action_mut(action_id)?.signups.push(signup.clone());
        Ok(signup)
    }

    async fn email_activists(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview> {
        self.arrive("POST", Endpoint::EmailActivists(action)).await;
        let preview = self.render_email(action, email)?;
        lock(&self.state).sent.push((action, email.clone()));
        Ok(preview)
    }

    async fn email_preview(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview> {
        self.arrive("POST", Endpoint::EmailPreview(action)).await;
        self.render_email(action, email)
    }

    async fn search_activists(&self, query: &str) -> Result<SearchPage> {
        self.arrive("GET", Endpoint::ActivistSearch).await;
        let needle = query.to_lowercase();
        let state = lock(&self.state);
        let results: Vec<Activist> = state
            .activists
            .values()
            .filter(|a| {
                a.name.to_lowercase().contains(&needle) || a.email.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        Ok(SearchPage {
            count: Some(results.len() as u64),
            results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_patch_signup_recomputes_state_name() {
        let server = SimulatedServer::new();
        let action = server.add_action("Canvass");
        let ana = server.add_activist("Ana", "ana@example.org");
        let signup = server.add_signup(action.id, ana.id, SignupState::Prospective).unwrap();

        let patched = server
            .patch_signup(signup.id, &SignupPatch { state: SignupState::NoShow })
            .await
            .unwrap();
        assert_eq!(patched.state_name, "noshow");

        let stored = server.action(action.id).unwrap();
        assert_eq!(stored.signups[0].state, SignupState::NoShow);
        assert_eq!(server.requests(), vec![format!("PATCH /api/signups/{}/", signup.id)]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let server = SimulatedServer::new();
        let action = server.add_action("Canvass");
        let ana = server.add_activist("Ana", "ana@example.org");
        let signup = server.add_signup(action.id, ana.id, SignupState::Confirmed).unwrap();
        server.fail_signup(signup.id);
        server.fail_next_loads(1);

        let err = server
            .patch_signup(signup.id, &SignupPatch { state: SignupState::Attended })
            .await
            .unwrap_err();
        assert!(matches!(err, ConsoleError::Server { status: 500, .. }));

        assert!(server.get_action(action.id).await.is_err());
        assert!(server.get_action(action.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_create_signup_validates_links() {
        let server = SimulatedServer::new();
        let action = server.add_action("Canvass");

        let err = server
            .create_signup(&NewSignup::prospective("/api/activists/999/", &action.url))
            .await
            .unwrap_err();
        assert!(err.field_errors().unwrap().contains_key("activist"));

        let ana = server.add_activist("Ana", "ana@example.org");
        let signup = server
            .create_signup(&NewSignup::prospective(&ana.url, &action.url))
            .await
            .unwrap();
        assert_eq!(signup.state_name, "prospective");
        assert_eq!(server.action(action.id).unwrap().signups.len(), 1);
    }

    #[tokio::test]
    async fn test_email_validation_and_delivery() {
        let server = SimulatedServer::new();
        let action = server.add_action("Canvass");
        let ana = server.add_activist("Ana", "ana@example.org");
        let signup = server.add_signup(action.id, ana.id, SignupState::Confirmed).unwrap();

        let blank = EmailRequest {
            subject: " ".into(),
            body: "hi".into(),
            signups: vec![signup.id],
        };
        assert!(server.email_activists(action.id, &blank).await.is_err());
        assert!(server.sent_emails().is_empty());

        let email = EmailRequest {
            subject: "Tomorrow".into(),
            ..blank
        };
        let rendered = server.email_activists(action.id, &email).await.unwrap();
        assert!(rendered.body.contains("Ana <ana@example.org>"));
        assert_eq!(server.sent_emails().len(), 1);
    }

    #[tokio::test]
    async fn test_search_matches_name_or_email() {
        let server = SimulatedServer::new();
        server.add_activist("Ana Lima", "ana@example.org");
        server.add_activist("Bo", "bo@banana.org");
        server.add_activist("Cy", "cy@example.org");

        let page = server.search_activists("ANA").await.unwrap();
        assert_eq!(page.count, Some(2));
        assert!(server.search_activists("zed").await.unwrap().results.is_empty());
    }
}
