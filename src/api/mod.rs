//! The organizing REST API as a trait, with an HTTP implementation and an
//! in-process simulation for tests and demos.

pub mod http;
pub mod simulated;

pub use http::HttpBackend;
pub use simulated::SimulatedServer;

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Action, ActionId, ActivistId, EmailPreview, EmailRequest, Form, FormId, FormPatch, NewSignup,
    SearchPage, Signup, SignupId, SignupPatch,
};

/// API resources the console talks to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    Action(ActionId),
    Activist(ActivistId),
    Form(FormId),
    Signup(SignupId),
    Signups,
    EmailActivists(ActionId),
    EmailPreview(ActionId),
    ActivistSearch,
}

impl Endpoint {
    pub fn path(&self) -> String {
        match self {
            Self::Action(id) => format!("/api/actions/{}/", id),
            Self::Activist(id) => format!("/api/activists/{}/", id),
            Self::Form(id) => format!("/api/forms/{}/", id),
            Self::Signup(id) => format!("/api/signups/{}/", id),
            Self::Signups => "/api/signups/".to_string(),
            Self::EmailActivists(id) => format!("/api/actions/{}/email_activists/", id),
            Self::EmailPreview(id) => format!("/api/actions/{}/email_activists_preview/", id),
            Self::ActivistSearch => "/api/activists/search/".to_string(),
        }
    }

    /// Recover the id from a resource URL such as `/api/actions/4/` or
    /// `https://host/api/actions/4/`.
    pub fn id_from_url(url: &str, collection: &str) -> Option<u64> {
        let marker = format!("/api/{}/", collection);
        let start = url.find(&marker)? + marker.len();
        url[start..].trim_end_matches('/').parse().ok()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

/// Everything the console needs from the server.
#[async_trait]
pub trait ApiBackend: Send + Sync {
    /// `GET /api/actions/{id}/`, with signups, forms and fields inlined.
    async fn get_action(&self, id: ActionId) -> Result<Action>;

    /// `PATCH /api/forms/{id}/`
    async fn patch_form(&self, id: FormId, patch: &FormPatch) -> Result<Form>;

    /// `PATCH /api/signups/{id}/`
    async fn patch_signup(&self, id: SignupId, patch: &SignupPatch) -> Result<Signup>;

    /// `POST /api/signups/`
    async fn create_signup(&self, signup: &NewSignup) -> Result<Signup>;

    /// `POST /api/actions/{id}/email_activists/`
    async fn email_activists(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview>;

    /// `POST /api/actions/{id}/email_activists_preview/`
    async fn email_preview(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview>;

    /// `GET /api/activists/search/?q=`
    async fn search_activists(&self, query: &str) -> Result<SearchPage>;
}
