// src/lib.rs

pub mod backend;
pub mod challenge;
pub mod config;
pub mod test_utils;

pub use stepauth_common::error::{BackendError, Error, ErrorClass};
pub use stepauth_common::models;
pub use challenge::{
    ChallengeDelegate, ChallengeHandler, ChallengeOrchestrator, SessionRegistry,
    BackendFactory, IdentityBackend,
};
pub use config::ClientConfig;
