// File: stepauth-common/src/models/challenge.rs

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use serde::{Deserialize, Serialize};

/// The interactive steps a sign-in flow can pause on.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeKind {
    Password,
    NewPasswordRequired,
    CustomChallenge,
    MultiFactorCode,
}

impl ChallengeKind {
    pub const ALL: [ChallengeKind; 4] = [
        ChallengeKind::Password,
        ChallengeKind::NewPasswordRequired,
        ChallengeKind::CustomChallenge,
        ChallengeKind::MultiFactorCode,
    ];
}

impl fmt::Display for ChallengeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeKind::Password => write!(f, "password"),
            ChallengeKind::NewPasswordRequired => write!(f, "new-password-required"),
            ChallengeKind::CustomChallenge => write!(f, "custom-challenge"),
            ChallengeKind::MultiFactorCode => write!(f, "mfa-code"),
        }
    }
}

impl FromStr for ChallengeKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "password" => Ok(ChallengeKind::Password),
            "new-password-required" | "new_password_required" => Ok(ChallengeKind::NewPasswordRequired),
            "custom-challenge" | "custom_challenge" => Ok(ChallengeKind::CustomChallenge),
            "mfa-code" | "multi_factor_code" | "mfa" => Ok(ChallengeKind::MultiFactorCode),
            _ => Err(format!("Unknown challenge kind: {}", s)),
        }
    }
}

/// Where a multi-factor code was sent.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMedium {
    Sms,
    Email,
    Totp,
    Unknown,
}

impl fmt::Display for DeliveryMedium {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryMedium::Sms => write!(f, "sms"),
            DeliveryMedium::Email => write!(f, "email"),
            DeliveryMedium::Totp => write!(f, "totp"),
            DeliveryMedium::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------
// Inputs handed to the application when a challenge is raised
// ---------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct PasswordChallengeInput {
    /// Username the flow was started with, if any.
    pub username: Option<String>,
    pub pool_metadata: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct NewPasswordRequiredInput {
    pub user_attributes: HashMap<String, String>,
    /// Attribute names that must be supplied together with the new password.
    pub required_attributes: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CustomChallengeInput {
    pub challenge_parameters: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MultiFactorInput {
    pub delivery_medium: DeliveryMedium,
    /// Masked destination, e.g. "+*******1234".
    pub destination: String,
}

/// Any of the four inputs, tagged by kind.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub enum ChallengeInput {
    Password(PasswordChallengeInput),
    NewPasswordRequired(NewPasswordRequiredInput),
    CustomChallenge(CustomChallengeInput),
    MultiFactorCode(MultiFactorInput),
}

impl ChallengeInput {
    pub fn kind(&self) -> ChallengeKind {
        match self {
            ChallengeInput::Password(_) => ChallengeKind::Password,
            ChallengeInput::NewPasswordRequired(_) => ChallengeKind::NewPasswordRequired,
            ChallengeInput::CustomChallenge(_) => ChallengeKind::CustomChallenge,
            ChallengeInput::MultiFactorCode(_) => ChallengeKind::MultiFactorCode,
        }
    }
}

// ---------------------------------------------------------------------
// Answers that fill a resolution slot
// ---------------------------------------------------------------------

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct PasswordDetails {
    pub username: String,
    pub password: String,
}

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct NewPasswordDetails {
    pub proposed_password: String,
    pub user_attributes: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
pub struct CustomChallengeDetails {
    pub challenge_responses: HashMap<String, String>,
}

#[derive(Serialize, Deserialize, Clone, PartialEq)]
pub struct MfaCodeDetails {
    pub code: String,
}

// Secrets never reach the logs.
impl fmt::Debug for PasswordDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PasswordDetails")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl fmt::Debug for NewPasswordDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewPasswordDetails")
            .field("proposed_password", &"<redacted>")
            .field("user_attributes", &self.user_attributes)
            .finish()
    }
}

impl fmt::Debug for MfaCodeDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaCodeDetails")
            .field("code", &"<redacted>")
            .finish()
    }
}
