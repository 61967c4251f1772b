use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The four fixed account roles. Claims are self-asserted at signup.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    #[default]
    Personnel,
    Veteran,
    Family,
    Civilian,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Personnel, Role::Veteran, Role::Family, Role::Civilian];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Personnel => "personnel",
            Role::Veteran => "veteran",
            Role::Family => "family",
            Role::Civilian => "civilian",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Role::Personnel => "Serving Personnel",
            Role::Veteran => "Ex-Servicemen (Veteran)",
            Role::Family => "Family Member",
            Role::Civilian => "Civilian",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Role::Personnel => "Active military service members",
            Role::Veteran => "Former military service members",
            Role::Family => "Family member of military personnel",
            Role::Civilian => "Civilian community member",
        }
    }
}

/// Row of the `users` table. `id` equals the identity subject id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AccountProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ppo_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sponsor_service_number: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    Low,
    Medium,
    High,
}

impl Criticality {
    pub const ALL: [Criticality; 3] = [Criticality::Low, Criticality::Medium, Criticality::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criticality::Low => "low",
            Criticality::Medium => "medium",
            Criticality::High => "high",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Criticality::Low => "LOW",
            Criticality::Medium => "MEDIUM",
            Criticality::High => "HIGH",
        }
    }
}

/// Insert payload for the `evidences` table; the store assigns `id` and `upload_time`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewEvidence {
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub cid: String,
    pub criticality: Criticality,
}

/// Row of the `evidences` table. Only metadata; file bytes never reach the portal.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EvidenceRecord {
    pub id: String,
    pub user_id: String,
    pub file_name: String,
    pub file_type: String,
    pub cid: String,
    pub criticality: Criticality,
    pub upload_time: DateTime<Utc>,
}
