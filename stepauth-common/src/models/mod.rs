// File: stepauth-common/src/models/mod.rs
pub mod challenge;
pub mod session;

pub use challenge::{
    ChallengeInput, ChallengeKind, CustomChallengeDetails, CustomChallengeInput, DeliveryMedium,
    MfaCodeDetails, MultiFactorInput, NewPasswordDetails, NewPasswordRequiredInput,
    PasswordChallengeInput, PasswordDetails,
};
pub use session::{BackendBinding, SessionKey, SignInOutcome, SignInRequest};
