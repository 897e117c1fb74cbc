//! reqwest-backed API client.

use async_trait::async_trait;
use reqwest::header::{HeaderValue, ACCEPT};
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::{ApiBackend, Endpoint};
use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, FieldErrors, Result};
use crate::model::{
    Action, ActionId, EmailPreview, EmailRequest, Form, FormId, FormPatch, NewSignup, SearchPage,
    Signup, SignupId, SignupPatch,
};

/// Header Django checks on unsafe methods.
pub const CSRF_HEADER: &str = "X-CSRFToken";

/// Longest server message kept in an error.
const MAX_ERROR_BODY: usize = 512;

pub struct HttpBackend {
    client: Client,
    config: ConsoleConfig,
}

impl HttpBackend {
    pub fn new(config: ConsoleConfig) -> Result<Self> {
        config.validate()?;
        let client = Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| ConsoleError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn config(&self) -> &ConsoleConfig {
        &self.config
    }

    fn request(&self, method: Method, endpoint: Endpoint) -> RequestBuilder {
        let url = self.config.endpoint(&endpoint.path());
        log::debug!("{} {}", method, url);
        let unsafe_method = method != Method::GET;
        let mut builder = self
            .client
            .request(method, url)
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        if unsafe_method {
            if let Some(token) = &self.config.csrf_token {
                builder = builder.header(CSRF_HEADER, token.as_str());
            }
        }
        builder
    }

    async fn get<T: DeserializeOwned>(&self, endpoint: Endpoint, query: &[(&str, &str)]) -> Result<T> {
        let response = self.request(Method::GET, endpoint).query(query).send().await?;
        decode(endpoint, response).await
    }

    async fn send<B, T>(&self, method: Method, endpoint: Endpoint, body: &B) -> Result<T>
    where
        B: Serialize + Sync + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.request(method, endpoint).json(body).send().await?;
        decode(endpoint, response).await
    }
}

async fn decode<T: DeserializeOwned>(endpoint: Endpoint, response: Response) -> Result<T> {
    let status = response.status();
    let body = response.bytes().await?;

    if status.is_success() {
        return serde_json::from_slice(&body).map_err(|e| {
            ConsoleError::Decode(format!("{}: {}", endpoint, e))
        });
    }

    log::warn!("{} answered {}", endpoint, status);
    if status == StatusCode::NOT_FOUND {
        return Err(ConsoleError::NotFound(endpoint.path()));
    }
    if status == StatusCode::BAD_REQUEST {
        if let Some(errors) = field_errors(&body) {
            return Err(ConsoleError::Validation {
                status: status.as_u16(),
                errors,
            });
        }
    }
    Err(ConsoleError::Server {
        status: status.as_u16(),
        message: error_message(&body),
    })
}

/// Decode `{"errors": {...}}` or a bare DRF `{"field": ["msg", ...]}` body.
pub fn field_errors(body: &[u8]) -> Option<FieldErrors> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    let object = match value.get("errors") {
        Some(serde_json::Value::Object(inner)) => inner.clone(),
        _ => value.as_object()?.clone(),
    };
    if object.is_empty() {
        return None;
    }

    let errors = object
        .into_iter()
        .map(|(field, messages)| {
            let messages = match messages {
                serde_json::Value::Array(items) => items
                    .into_iter()
                    .map(|item| match item {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    })
                    .collect(),
                serde_json::Value::String(s) => vec![s],
                other => vec![other.to_string()],
            };
            (field, messages)
        })
        .collect();
    Some(errors)
}

fn error_message(body: &[u8]) -> String {
    if let Ok(value) = serde_json::from_slice::<serde_json::Value>(body) {
        if let Some(detail) = value.get("detail").and_then(|d| d.as_str()) {
            return detail.to_string();
        }
    }
    let text = String::from_utf8_lossy(body);
    text.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait]
impl ApiBackend for HttpBackend {
    async fn get_action(&self, id: ActionId) -> Result<Action> {
        self.get(Endpoint::Action(id), &[]).await
    }

    async fn patch_form(&self, id: FormId, patch: &FormPatch) -> Result<Form> {
        self.send(Method::PATCH, Endpoint::Form(id), patch).await
    }

    async fn patch_signup(&self, id: SignupId, patch: &SignupPatch) -> Result<Signup> {
        self.send(Method::PATCH, Endpoint::Signup(id), patch).await
    }

    async fn create_signup(&self, signup: &NewSignup) -> Result<Signup> {
        self.send(Method::POST, Endpoint::Signups, signup).await
    }

    async fn email_activists(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview> {
        self.send(Method::POST, Endpoint::EmailActivists(action), email).await
    }

    async fn email_preview(&self, action: ActionId, email: &EmailRequest) -> Result<EmailPreview> {
        self.send(Method::POST, Endpoint::EmailPreview(action), email).await
    }

    async fn search_activists(&self, query: &str) -> Result<SearchPage> {
        self.get(Endpoint::ActivistSearch, &[("q", query)]).await
    }
}
