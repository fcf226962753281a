// File: stepauth-core/src/backend/mod.rs

pub mod memory;

pub use memory::{
    CustomChallengeSpec, DirectoryUser, InMemoryBackend, InMemoryBackendFactory, MfaEnrollment,
    UserDirectory, CUSTOM_ANSWER_KEY,
};
