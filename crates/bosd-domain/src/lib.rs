pub mod component;
pub mod error;
pub mod naming;
pub mod options;
pub mod session;
mod tests;

pub use component::{
    derive_status, ActionKind, BootArtifacts, Component, ComponentActualState, ComponentState,
    ComponentStatus, EventStats, LastAction, Phase, StatusValue,
};
pub use error::DomainError;
pub use naming::{looks_like_nid, validate_name};
pub use options::OptionsSnapshot;
pub use session::{
    Arch, BootSet, Operation, Session, SessionState, SessionStatus, SessionTemplate,
};
