//! Domains and chain roles.
//!
//! The domain set is closed: an objective either declares one of these
//! domains or the session falls back to the configured default.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when parsing an unknown domain or role name.
#[derive(Debug, Error)]
pub enum DomainError {
    /// The domain label is not in the closed set.
    #[error("unknown domain: {0}")]
    UnknownDomain(String),

    /// The role name is not one of the five chain roles.
    #[error("unknown role: {0}")]
    UnknownRole(String),
}

/// The closed set of supported objective domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Domain {
    /// Campaigns, positioning, audience outreach.
    Marketing,
    /// Engineering and systems work.
    Technical,
    /// Operations and process execution.
    Ops,
    /// Creative and editorial work.
    Creative,
    /// Teaching and curriculum work.
    Education,
    /// Product definition and roadmaps.
    Product,
    /// High-level planning and portfolio decisions.
    Strategy,
    /// Research and investigation.
    Research,
    /// Financial modeling and analysis.
    Finance,
}

impl Domain {
    /// All supported domains, in canonical order.
    pub const ALL: [Self; 9] = [
        Self::Marketing,
        Self::Technical,
        Self::Ops,
        Self::Creative,
        Self::Education,
        Self::Product,
        Self::Strategy,
        Self::Research,
        Self::Finance,
    ];

    /// Returns the lowercase label used in configs and prompts.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Marketing => "marketing",
            Self::Technical => "technical",
            Self::Ops => "ops",
            Self::Creative => "creative",
            Self::Education => "education",
            Self::Product => "product",
            Self::Strategy => "strategy",
            Self::Research => "research",
            Self::Finance => "finance",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Domain {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "marketing" => Ok(Self::Marketing),
            "technical" => Ok(Self::Technical),
            "ops" => Ok(Self::Ops),
            "creative" => Ok(Self::Creative),
            "education" => Ok(Self::Education),
            "product" => Ok(Self::Product),
            "strategy" => Ok(Self::Strategy),
            "research" => Ok(Self::Research),
            "finance" => Ok(Self::Finance),
            other => Err(DomainError::UnknownDomain(other.to_string())),
        }
    }
}

/// The five chain roles, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Defines positioning, audiences, hooks, and acceptance tests.
    Strategist,
    /// Pressure-tests strategy with KPIs and falsifications.
    Analyst,
    /// Produces deployable assets referencing analysis ids.
    Producer,
    /// Schedules producer assets; creates nothing new.
    Courier,
    /// Audits the full registry with cross-kind references.
    Critic,
}

impl Role {
    /// All roles in execution order.
    pub const ALL: [Self; 5] = [
        Self::Strategist,
        Self::Analyst,
        Self::Producer,
        Self::Courier,
        Self::Critic,
    ];

    /// Returns the role name as used in prompts and ledger entries.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Strategist => "Strategist",
            Self::Analyst => "Analyst",
            Self::Producer => "Producer",
            Self::Courier => "Courier",
            Self::Critic => "Critic",
        }
    }

    /// The artifact letter this role must emit its fenced array under.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Strategist => 'S',
            Self::Analyst => 'A',
            Self::Producer => 'P',
            Self::Courier => 'C',
            Self::Critic => 'X',
        }
    }

    /// The ledger action name recorded for a successful turn.
    #[must_use]
    pub const fn action(self) -> &'static str {
        match self {
            Self::Strategist => "generate_strategy",
            Self::Analyst => "validate_strategy",
            Self::Producer => "generate_assets",
            Self::Courier => "create_schedule",
            Self::Critic => "final_review",
        }
    }

    /// The lowercase file stem used for role prompt files.
    #[must_use]
    pub const fn file_stem(self) -> &'static str {
        match self {
            Self::Strategist => "strategist",
            Self::Analyst => "analyst",
            Self::Producer => "producer",
            Self::Courier => "courier",
            Self::Critic => "critic",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "strategist" => Ok(Self::Strategist),
            "analyst" => Ok(Self::Analyst),
            "producer" => Ok(Self::Producer),
            "courier" => Ok(Self::Courier),
            "critic" => Ok(Self::Critic),
            other => Err(DomainError::UnknownRole(other.to_string())),
        }
    }
}
