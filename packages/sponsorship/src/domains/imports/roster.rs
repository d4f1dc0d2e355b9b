//! Roster entries and where they come from.

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use typed_builder::TypedBuilder;

use crate::domains::children::models::{ChildKey, ChildProfile};

/// One child as listed in an imported roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
pub struct RosterEntry {
    #[builder(setter(into))]
    pub family_number: String,
    #[builder(setter(into))]
    pub letter: String,
    #[serde(flatten)]
    #[builder(default)]
    pub profile: ChildProfile,
}

impl RosterEntry {
    pub fn key(&self) -> ChildKey {
        ChildKey::new(self.family_number.as_str(), self.letter.as_str())
    }

    /// Profile with surrounding whitespace trimmed and blank fields dropped.
    pub fn normalized_profile(&self) -> ChildProfile {
        let clean = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let p = &self.profile;
        ChildProfile {
            name: clean(&p.name),
            age: p.age,
            gender: clean(&p.gender),
            grade: clean(&p.grade),
            shirt_size: clean(&p.shirt_size),
            pant_size: clean(&p.pant_size),
            shoe_size: clean(&p.shoe_size),
            interests: clean(&p.interests),
            wishes: clean(&p.wishes),
            special_needs: clean(&p.special_needs),
        }
    }
}

#[async_trait]
pub trait RosterSource: Send + Sync {
    async fn load(&self) -> anyhow::Result<Vec<RosterEntry>>;
}

#[async_trait]
impl RosterSource for Vec<RosterEntry> {
    async fn load(&self) -> anyhow::Result<Vec<RosterEntry>> {
        Ok(self.clone())
    }
}

/// A JSON array of roster entries on disk.
#[derive(Debug, Clone)]
pub struct JsonRosterFile {
    path: PathBuf,
}

impl JsonRosterFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RosterSource for JsonRosterFile {
    async fn load(&self) -> anyhow::Result<Vec<RosterEntry>> {
        let raw = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read roster {}", self.path.display()))?;
        serde_json::from_slice(&raw)
            .with_context(|| format!("Roster {} is not a JSON array of entries", self.path.display()))
    }
}
