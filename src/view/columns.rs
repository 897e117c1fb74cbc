//! Signup table columns, derived from an action's form fields.

use std::fmt;

use crate::model::{Action, FieldId, Signup, SignupState};
use crate::store::RowFilter;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ColumnKey {
    Name,
    Email,
    Status,
    Response(FieldId),
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name => f.write_str("activist.name"),
            Self::Email => f.write_str("activist.email"),
            Self::Status => f.write_str("state"),
            Self::Response(field) => write!(f, "responses.{}.value", field),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Column {
    pub label: String,
    pub key: ColumnKey,
}

impl Column {
    fn new(label: &str, key: ColumnKey) -> Self {
        Self {
            label: label.to_string(),
            key,
        }
    }

    /// Name, E-mail and Status, then one column per form field.
    pub fn for_action(action: &Action) -> Vec<Column> {
        let mut columns = vec![
            Column::new("Name", ColumnKey::Name),
            Column::new("E-mail", ColumnKey::Email),
            Column::new("Status", ColumnKey::Status),
        ];
        columns.extend(
            action
                .fields
                .iter()
                .map(|field| Column::new(&field.name, ColumnKey::Response(field.id))),
        );
        columns
    }

    /// Filter key for this column.
    pub fn id(&self) -> String {
        self.key.to_string()
    }

    /// Underlying value: the state's integer for Status, text otherwise.
    /// Missing responses read as empty.
    pub fn raw(&self, signup: &Signup) -> String {
        match &self.key {
            ColumnKey::Name => signup.activist.name.clone(),
            ColumnKey::Email => signup.activist.email.clone(),
            ColumnKey::Status => signup.state.value().to_string(),
            ColumnKey::Response(field) => signup.response(*field).unwrap_or_default().to_string(),
        }
    }

    /// What a table cell shows. Status prefers the server's `state_name`.
    pub fn cell(&self, signup: &Signup) -> String {
        match &self.key {
            ColumnKey::Status if !signup.state_name.is_empty() => signup.state_name.clone(),
            ColumnKey::Status => signup.state.name().to_string(),
            _ => self.raw(signup),
        }
    }
}

/// Status filter accepting any of `states`. `None` when `states` is empty,
/// which means "no filter".
pub fn state_filter(states: &[SignupState]) -> Option<RowFilter<Signup>> {
    if states.is_empty() {
        return None;
    }
    let states = states.to_vec();
    Some(std::sync::Arc::new(move |signup: &Signup| states.contains(&signup.state)))
}

/// Case-insensitive substring filter over one column's raw value.
pub fn text_filter(column: &Column, needle: &str) -> RowFilter<Signup> {
    let column = column.clone();
    let needle = needle.to_lowercase();
    std::sync::Arc::new(move |signup: &Signup| column.raw(signup).to_lowercase().contains(&needle))
}

/// Render rows as cell text, one inner vector per row.
pub fn table(columns: &[Column], rows: &[Signup]) -> Vec<Vec<String>> {
    rows.iter()
        .map(|row| columns.iter().map(|column| column.cell(row)).collect())
        .collect()
}
