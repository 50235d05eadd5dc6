//! HTTP API handlers for cardcat-verify
//!
//! REST endpoints for verification, scanning, the checklist corpus and
//! settings, plus an SSE stream of catalog events.

pub mod cards;
pub mod checklists;
pub mod health;
pub mod settings;
pub mod sse;

pub use cards::card_routes;
pub use checklists::checklist_routes;
pub use health::health_routes;
pub use settings::settings_routes;
pub use sse::event_routes;
