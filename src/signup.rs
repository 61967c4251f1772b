//!
//! Role-conditioned signup
//! -----------------------
//! The signup form is a flat field set (email, password, name and three role
//! identifiers) plus a selected role. Validation is ordered and stops at the first
//! failure. A valid form becomes a `ProfilePayload` whose `RoleIdentity` carries
//! exactly the one identifier the role needs, so stray or contradictory fields
//! can never reach the identity provider.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::identity::{IdentityProvider, Session, SignUpRequest};
use crate::notice::Notice;
pub use crate::store::Role;

pub const CODE_MISSING_FIELDS: &str = "missing_fields";
pub const CODE_SERVICE_NUMBER: &str = "service_number_required";
pub const CODE_PPO_NUMBER: &str = "ppo_number_required";
pub const CODE_SPONSOR: &str = "sponsor_required";

/// Form fields exactly as submitted. Only the fields relevant to `role` are read.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SignupForm {
    pub role: Role,
    pub email: String,
    pub password: String,
    pub name: String,
    pub service_number: String,
    pub ppo_number: String,
    pub sponsor_service_number: String,
}

/// Role plus its single required identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum RoleIdentity {
    Personnel { service_number: String },
    Veteran { ppo_number: String },
    Family { sponsor_service_number: String },
    Civilian,
}

impl RoleIdentity {
    pub fn role(&self) -> Role {
        match self {
            RoleIdentity::Personnel { .. } => Role::Personnel,
            RoleIdentity::Veteran { .. } => Role::Veteran,
            RoleIdentity::Family { .. } => Role::Family,
            RoleIdentity::Civilian => Role::Civilian,
        }
    }
}

/// Metadata sent with the sign-up request: `{"name", "role", <identifier>}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProfilePayload {
    pub name: String,
    #[serde(flatten)]
    pub identity: RoleIdentity,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSignup {
    pub email: String,
    pub password: String,
    pub payload: ProfilePayload,
}

impl ValidatedSignup {
    pub fn into_request(self) -> AppResult<SignUpRequest> {
        let metadata = serde_json::to_value(&self.payload)
            .map_err(|e| AppError::internal("payload_encoding", e.to_string()))?;
        Ok(SignUpRequest { email: self.email, password: self.password, metadata })
    }
}

fn blank(s: &str) -> bool { s.trim().is_empty() }

impl SignupForm {
    /// Ordered validation; the first failing rule is the only error reported.
    pub fn validate(&self) -> AppResult<ValidatedSignup> {
        if blank(&self.email) || blank(&self.password) || blank(&self.name) {
            return Err(AppError::user(CODE_MISSING_FIELDS, "Please fill in all required fields."));
        }
        let identity = match self.role {
            Role::Personnel => {
                if blank(&self.service_number) {
                    return Err(AppError::user(CODE_SERVICE_NUMBER, "Service Number is required for serving personnel."));
                }
                RoleIdentity::Personnel { service_number: self.service_number.trim().to_string() }
            }
            Role::Veteran => {
                if blank(&self.ppo_number) {
                    return Err(AppError::user(CODE_PPO_NUMBER, "PPO Number is required for veterans."));
                }
                RoleIdentity::Veteran { ppo_number: self.ppo_number.trim().to_string() }
            }
            Role::Family => {
                if blank(&self.sponsor_service_number) {
                    return Err(AppError::user(
                        CODE_SPONSOR,
                        "Sponsor's Service Number or Veteran PPO Number is required for family members.",
                    ));
                }
                RoleIdentity::Family { sponsor_service_number: self.sponsor_service_number.trim().to_string() }
            }
            Role::Civilian => RoleIdentity::Civilian,
        };
        Ok(ValidatedSignup {
            email: self.email.trim().to_string(),
            password: self.password.clone(),
            payload: ProfilePayload { name: self.name.trim().to_string(), identity },
        })
    }
}

/// Notice title for a signup failure.
pub fn failure_title(err: &AppError) -> &'static str {
    match err.code_str() {
        CODE_MISSING_FIELDS => "Missing Information",
        CODE_SERVICE_NUMBER => "Service Number Required",
        CODE_PPO_NUMBER => "PPO Number Required",
        CODE_SPONSOR => "Sponsor Information Required",
        _ => match err {
            AppError::Internal { .. } => "Signup Error",
            _ => "Signup Failed",
        },
    }
}

#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub session: Session,
    pub notice: Notice,
    pub navigate: &'static str,
}

/// Validate, then hand credentials and profile payload to the provider.
/// Nothing reaches the provider when validation fails.
pub async fn submit(provider: &dyn IdentityProvider, form: &SignupForm) -> AppResult<SignupOutcome> {
    let validated = form.validate()?;
    debug!(role = validated.payload.identity.role().as_str(), "signup.validated");
    let session = provider.sign_up(validated.into_request()?).await.map_err(|e| {
        warn!(code = e.code_str(), "signup.rejected: {}", e.message());
        e
    })?;
    Ok(SignupOutcome {
        session,
        notice: Notice::info("Account Created Successfully", "Welcome! Your account has been created."),
        navigate: "/",
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct RoleOption {
    pub value: Role,
    pub label: &'static str,
    pub description: &'static str,
    /// Label of the role-specific field, when the role has one.
    pub identifier_label: Option<&'static str>,
}

pub fn role_options() -> Vec<RoleOption> {
    Role::ALL
        .iter()
        .map(|r| RoleOption {
            value: *r,
            label: r.display_name(),
            description: r.description(),
            identifier_label: match r {
                Role::Personnel => Some("Service Number"),
                Role::Veteran => Some("PPO Number"),
                Role::Family => Some("Sponsor's Service Number / Veteran PPO Number"),
                Role::Civilian => None,
            },
        })
        .collect()
}
