//! Watchpost - check scheduling and event ingestion core of a monitoring backend
//!
//! ```text
//! Store ─► Schedulerd ─► bus "check-request:*" ─► agents
//!                                                   │
//! Store ◄─ Eventd ◄──────────── bus "event:raw" ◄───┘
//!            │
//!            └──► bus "event:processed" ─► handlers
//! ```

pub mod bus;
pub mod config;
pub mod eventd;
pub mod schedulerd;
pub mod store;
pub mod types;
pub mod util;

pub use types::{
    Asset, Check, CheckConfig, CheckKey, CheckRequest, CheckState, Entity, Event, HookConfig,
};
