//! Explicit request context passed into every mutating operation.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Who is performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// A sponsor, identified by the email they supplied.
    Sponsor(String),
    /// A program administrator.
    Admin(String),
    /// Scheduled tasks and maintenance jobs.
    System,
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Sponsor(email) => write!(f, "sponsor:{}", email),
            Actor::Admin(name) => write!(f, "admin:{}", name),
            Actor::System => write!(f, "system"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct OperationContext {
    pub request_id: Uuid,
    pub actor: Actor,
}

impl OperationContext {
    pub fn new(actor: Actor) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            actor,
        }
    }

    pub fn sponsor(email: impl Into<String>) -> Self {
        Self::new(Actor::Sponsor(email.into()))
    }

    pub fn admin(name: impl Into<String>) -> Self {
        Self::new(Actor::Admin(name.into()))
    }

    pub fn system() -> Self {
        Self::new(Actor::System)
    }
}
