// THEORY:
// This file is the entry point for the `isolation_watch` library crate.
//
// The primary export is `IsolationPipeline` (the per-session engine) together
// with `SessionControl`, `Supervisor` and the collaborator traits from `session`.
// Camera capture, the detection model, rendering and the web layer live in other
// crates and only meet the engine through those traits. The `core_modules` are
// public so a different tracker or front end can reuse individual stages.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod pipeline;
pub mod session;

pub use config::{AppConfig, EngineConfig, FrameSettings, SharedSettings};
pub use error::WatchError;
pub use pipeline::{FrameAnalysis, IsolationPipeline, LiveState, PersonSummary};
pub use session::{SessionControl, Supervisor};
