//! cfsync agent library: manifest, state file, Cloud Controller client and
//! the apply loop used by the `cfsync` binary.

pub mod agent;
pub mod cloud_controller;
pub mod manifest;
pub mod state;

pub use agent::{Action, Agent, ApplyReport, Outcome};
pub use cloud_controller::CloudControllerClient;
pub use manifest::Manifest;
pub use state::{ResourceKind, ResourceRecord, StateStore};
