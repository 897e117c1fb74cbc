//! Records exchanged with the organizing API.
//!
//! Everything except ids decodes with a default, whether the field is
//! missing or `null`, so that partial documents still reach subscribers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::store::Row;

pub type ActionId = u64;
pub type ActivistId = u64;
pub type FieldId = u64;
pub type FormId = u64;
pub type SignupId = u64;

/// Decode `null` as the type's default. Pair with `#[serde(default)]` so a
/// missing field decodes the same way.
fn nullable<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Where an activist stands with respect to an action.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum SignupState {
    #[default]
    Prospective,
    Confirmed,
    Attended,
    NoShow,
    Cancelled,
}

impl SignupState {
    pub const ALL: [SignupState; 5] = [
        Self::Prospective,
        Self::Confirmed,
        Self::Attended,
        Self::NoShow,
        Self::Cancelled,
    ];

    pub const fn value(self) -> u8 {
        match self {
            Self::Prospective => 0,
            Self::Confirmed => 1,
            Self::Attended => 2,
            Self::NoShow => 3,
            Self::Cancelled => 4,
        }
    }

    /// The server-side enum name, as reported in `state_name`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Prospective => "prospective",
            Self::Confirmed => "confirmed",
            Self::Attended => "attended",
            Self::NoShow => "noshow",
            Self::Cancelled => "cancelled",
        }
    }

    /// Human-readable label for select boxes and tables.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Prospective => "Prospective",
            Self::Confirmed => "Confirmed",
            Self::Attended => "Attended",
            Self::NoShow => "No-Show",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl TryFrom<u8> for SignupState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::ALL
            .into_iter()
            .find(|state| state.value() == value)
            .ok_or_else(|| format!("unknown signup state {}", value))
    }
}

impl From<SignupState> for u8 {
    fn from(state: SignupState) -> u8 {
        state.value()
    }
}

impl FromStr for SignupState {
    type Err = String;

    /// Accepts the integer value, the server name or the label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(value) = s.parse::<u8>() {
            return Self::try_from(value);
        }
        Self::ALL
            .into_iter()
            .find(|state| state.name().eq_ignore_ascii_case(s) || state.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown signup state '{}'", s))
    }
}

impl fmt::Display for SignupState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Input control used by a form field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ControlType {
    #[default]
    Text,
    Boolean,
    MultipleChoice,
    Options,
}

impl TryFrom<u8> for ControlType {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Text),
            1 => Ok(Self::Boolean),
            2 => Ok(Self::MultipleChoice),
            3 => Ok(Self::Options),
            other => Err(format!("unknown control type {}", other)),
        }
    }
}

impl From<ControlType> for u8 {
    fn from(control: ControlType) -> u8 {
        match control {
            ControlType::Text => 0,
            ControlType::Boolean => 1,
            ControlType::MultipleChoice => 2,
            ControlType::Options => 3,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Activist {
    pub id: ActivistId,
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub email: String,
    #[serde(default, deserialize_with = "nullable")]
    pub phone: String,
    #[serde(default, deserialize_with = "nullable")]
    pub address: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormField {
    pub id: FieldId,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub control_type: ControlType,
    #[serde(default, deserialize_with = "nullable")]
    pub control_data: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Form {
    pub id: FormId,
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub title: String,
    #[serde(default, deserialize_with = "nullable")]
    pub description: String,
    #[serde(default, deserialize_with = "nullable")]
    pub active: bool,
    #[serde(default, deserialize_with = "nullable")]
    pub next_state: SignupState,
}

impl Form {
    /// Public link where activists fill the form in.
    pub fn public_path(&self) -> String {
        format!("/crm/f/{}/", self.id)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FormResponse {
    #[serde(default, deserialize_with = "nullable")]
    pub value: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Signup {
    pub id: SignupId,
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub activist: Activist,
    #[serde(default, deserialize_with = "nullable")]
    pub state: SignupState,
    #[serde(default, deserialize_with = "nullable")]
    pub state_name: String,
    #[serde(default, deserialize_with = "nullable")]
    pub responses: BTreeMap<FieldId, FormResponse>,
}

impl Signup {
    pub fn response(&self, field: FieldId) -> Option<&str> {
        self.responses.get(&field).map(|r| r.value.as_str())
    }
}

impl Row for Signup {
    type Id = SignupId;

    fn row_id(&self) -> SignupId {
        self.id
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(default, deserialize_with = "nullable")]
    pub id: ActionId,
    #[serde(default, deserialize_with = "nullable")]
    pub url: String,
    #[serde(default, deserialize_with = "nullable")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub campaign: Option<serde_json::Value>,
    #[serde(default, deserialize_with = "nullable")]
    pub signups: Vec<Signup>,
    #[serde(default, deserialize_with = "nullable")]
    pub forms: Vec<Form>,
    #[serde(default, deserialize_with = "nullable")]
    pub fields: Vec<FormField>,
}

impl Action {
    pub fn signup(&self, id: SignupId) -> Option<&Signup> {
        self.signups.iter().find(|s| s.id == id)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignupPatch {
    pub state: SignupState,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FormPatch {
    pub active: bool,
}

/// Body for `POST /api/signups/`. Activist and action are resource URLs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewSignup {
    pub activist: String,
    pub action: String,
    pub state: SignupState,
    #[serde(default)]
    pub responses: BTreeMap<FieldId, FormResponse>,
}

impl NewSignup {
    /// A fresh prospective signup with no form responses.
    pub fn prospective(activist_url: &str, action_url: &str) -> Self {
        Self {
            activist: activist_url.to_string(),
            action: action_url.to_string(),
            state: SignupState::Prospective,
            responses: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub subject: String,
    pub body: String,
    pub signups: Vec<SignupId>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailPreview {
    #[serde(default, deserialize_with = "nullable")]
    pub body: String,
}

/// One page of `/api/activists/search/` results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchPage {
    #[serde(default, deserialize_with = "nullable")]
    pub count: Option<u64>,
    #[serde(default, deserialize_with = "nullable")]
    pub results: Vec<Activist>,
}
