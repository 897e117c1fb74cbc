// Organizer - Reactive stores and report views for the organizing CRM

pub mod api;
pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod view;

pub use api::{ApiBackend, HttpBackend, SimulatedServer};
pub use config::ConsoleConfig;
pub use error::{ConsoleError, Result};
pub use store::{DataStore, DerivedStore, RowDataStore, StoreBinding, Subscription};
pub use view::{ReportView, ViewOptions, ViewPhase};
