//! Typed chain artifacts and the session registry.
//!
//! Role outputs arrive as dynamically shaped JSON and are converted into
//! the typed variants here before anything downstream touches them. The
//! [`Registry`] is session-scoped, exclusively owned by the orchestrator,
//! and write-once per kind: a role's slice becomes immutable after it is
//! recorded.

pub mod validate;

pub use validate::{
    validate_analyses, validate_courier, validate_critiques, validate_productions,
    validate_strategies, ValidationError,
};

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The five artifact kinds, keyed by role letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ArtifactKind {
    /// Strategy objects (`S-\d+`).
    Strategy,
    /// Analysis objects (`A-\d+`).
    Analysis,
    /// Production assets (`P-\d+`).
    Production,
    /// Courier schedule rows.
    Courier,
    /// Critic findings (`X-\d+`).
    Critique,
}

impl ArtifactKind {
    /// The letter used for fenced blocks and reference keys.
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Strategy => 'S',
            Self::Analysis => 'A',
            Self::Production => 'P',
            Self::Courier => 'C',
            Self::Critique => 'X',
        }
    }
}

impl std::fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// A strategy object emitted by the Strategist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Strategy {
    /// Stable id matching `S-\d+`.
    pub s_id: String,
    /// Positioning title.
    pub title: String,
    /// Target audience description.
    pub audience: String,
    /// At least one hook.
    pub hooks: Vec<String>,
    /// The three-step plan.
    pub three_step_plan: Vec<String>,
    /// At least one acceptance test.
    pub acceptance_tests: Vec<String>,
}

/// One row of an analysis KPI table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KpiRow {
    /// Metric name (e.g. "NPV", "leads").
    pub metric: String,
    /// Numeric target for the metric.
    pub target: f64,
    /// Unit the target is expressed in (e.g. "USD", "%").
    pub unit: String,
}

/// An analysis object emitted by the Analyst.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Analysis {
    /// Stable id matching `A-\d+`.
    pub a_id: String,
    /// References to strategy ids; all must resolve.
    pub s_refs: Vec<String>,
    /// KPI table with at least one row.
    pub kpi_table: Vec<KpiRow>,
    /// At least one falsification.
    pub falsifications: Vec<String>,
    /// Identified risks.
    #[serde(default)]
    pub risks: Vec<String>,
}

/// The closed set of production asset kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecType {
    /// API contract.
    Api,
    /// Database schema.
    Ddl,
    /// Configuration table.
    Config,
    /// Publishable copy block.
    CopyBlock,
    /// Integration wiring.
    Wiring,
    /// Prompt pack.
    PromptPack,
}

/// A production asset emitted by the Producer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Production {
    /// Stable id matching `P-\d+`.
    pub p_id: String,
    /// References to analysis ids; all must resolve.
    pub a_refs: Vec<String>,
    /// What kind of asset this is.
    pub spec_type: SpecType,
    /// The asset body; non-empty.
    pub body: String,
}

/// One courier schedule row. Rows reference producer assets and never
/// introduce ids of their own.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourierRow {
    /// Schedule day (e.g. "D1").
    pub day: String,
    /// Time of day.
    pub time: String,
    /// Delivery channel.
    pub channel: String,
    /// The producer asset this row deploys.
    pub p_id: String,
    /// KPI target for the row.
    pub kpi_target: String,
    /// What the owner does.
    pub owner_action: String,
}

/// Critic finding severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Cosmetic or minor.
    Low,
    /// Material but workable.
    Med,
    /// Must fix before shipping.
    High,
}

/// Cross-kind references carried by a critic finding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CritiqueRefs {
    /// Referenced strategy ids.
    #[serde(default)]
    pub s: Vec<String>,
    /// Referenced analysis ids.
    #[serde(default)]
    pub a: Vec<String>,
    /// Referenced production ids.
    #[serde(default)]
    pub p: Vec<String>,
    /// Referenced courier rows, by the producer id they deploy.
    #[serde(default)]
    pub c: Vec<String>,
}

impl CritiqueRefs {
    /// Number of distinct kinds referenced.
    #[must_use]
    pub fn kinds_spanned(&self) -> usize {
        usize::from(!self.s.is_empty())
            + usize::from(!self.a.is_empty())
            + usize::from(!self.p.is_empty())
            + usize::from(!self.c.is_empty())
    }

    /// True when no references are present at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kinds_spanned() == 0
    }
}

/// A critic finding emitted by the Critic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Critique {
    /// Stable id matching `X-\d+`.
    pub x_id: String,
    /// Cross-kind references; collectively must span at least 3 kinds.
    pub refs: CritiqueRefs,
    /// The issue found.
    pub issue: String,
    /// The proposed fix.
    pub fix: String,
    /// Finding severity.
    pub severity: Severity,
    /// Five numeric proof dimensions.
    pub proof_scores: std::collections::BTreeMap<String, f64>,
}

/// A single micro-Q&A exchange recorded between two roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaNote {
    /// The asking role.
    pub asker: String,
    /// The answering role.
    pub responder: String,
    /// The single question (truncated to the exchange bound).
    pub question: String,
    /// The single answer (truncated to the exchange bound).
    pub answer: String,
}

/// Error raised when a role slice is written twice.
#[derive(Debug, Error)]
#[error("registry slice {kind} already written; artifacts are immutable once recorded")]
pub struct SliceAlreadyWritten {
    /// The kind that was written twice.
    pub kind: ArtifactKind,
}

/// The session-scoped artifact registry.
///
/// Owned exclusively by the orchestrator; each kind is written at most
/// once per session and immutable thereafter.
#[derive(Debug, Default, Serialize)]
pub struct Registry {
    /// Strategy slice.
    pub strategies: Vec<Strategy>,
    /// Analysis slice.
    pub analyses: Vec<Analysis>,
    /// Production slice.
    pub productions: Vec<Production>,
    /// Courier schedule slice.
    pub courier_rows: Vec<CourierRow>,
    /// Critic findings slice.
    pub critiques: Vec<Critique>,
    /// Micro-Q&A notes, in exchange order.
    pub qa_notes: Vec<QaNote>,

    #[serde(skip)]
    written: BTreeSet<ArtifactKind>,
}

impl Registry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn mark_written(&mut self, kind: ArtifactKind) -> Result<(), SliceAlreadyWritten> {
        if !self.written.insert(kind) {
            return Err(SliceAlreadyWritten { kind });
        }
        Ok(())
    }

    /// Records the strategist slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice was already written.
    pub fn record_strategies(&mut self, items: Vec<Strategy>) -> Result<(), SliceAlreadyWritten> {
        self.mark_written(ArtifactKind::Strategy)?;
        self.strategies = items;
        Ok(())
    }

    /// Records the analyst slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice was already written.
    pub fn record_analyses(&mut self, items: Vec<Analysis>) -> Result<(), SliceAlreadyWritten> {
        self.mark_written(ArtifactKind::Analysis)?;
        self.analyses = items;
        Ok(())
    }

    /// Records the producer slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice was already written.
    pub fn record_productions(&mut self, items: Vec<Production>) -> Result<(), SliceAlreadyWritten> {
        self.mark_written(ArtifactKind::Production)?;
        self.productions = items;
        Ok(())
    }

    /// Records the courier slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice was already written.
    pub fn record_courier_rows(&mut self, items: Vec<CourierRow>) -> Result<(), SliceAlreadyWritten> {
        self.mark_written(ArtifactKind::Courier)?;
        self.courier_rows = items;
        Ok(())
    }

    /// Records the critic slice.
    ///
    /// # Errors
    ///
    /// Returns an error if the slice was already written.
    pub fn record_critiques(&mut self, items: Vec<Critique>) -> Result<(), SliceAlreadyWritten> {
        self.mark_written(ArtifactKind::Critique)?;
        self.critiques = items;
        Ok(())
    }

    /// Appends a micro-Q&A note.
    pub fn record_qa(&mut self, note: QaNote) {
        self.qa_notes.push(note);
    }

    /// The set of strategy ids.
    #[must_use]
    pub fn s_ids(&self) -> BTreeSet<String> {
        self.strategies.iter().map(|s| s.s_id.clone()).collect()
    }

    /// The set of analysis ids.
    #[must_use]
    pub fn a_ids(&self) -> BTreeSet<String> {
        self.analyses.iter().map(|a| a.a_id.clone()).collect()
    }

    /// The set of production ids.
    #[must_use]
    pub fn p_ids(&self) -> BTreeSet<String> {
        self.productions.iter().map(|p| p.p_id.clone()).collect()
    }

    /// The set of producer ids actually deployed by courier rows.
    #[must_use]
    pub fn c_ids(&self) -> BTreeSet<String> {
        self.courier_rows.iter().map(|c| c.p_id.clone()).collect()
    }
}

/// A sum over the five artifact kinds, used where a single heterogeneous
/// item must be carried (failure evidence, report rows).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind")]
pub enum Artifact {
    /// A strategy object.
    Strategy(Strategy),
    /// An analysis object.
    Analysis(Analysis),
    /// A production asset.
    Production(Production),
    /// A courier row.
    Courier(CourierRow),
    /// A critic finding.
    Critique(Critique),
}

impl Artifact {
    /// The artifact kind of this value.
    #[must_use]
    pub const fn kind(&self) -> ArtifactKind {
        match self {
            Self::Strategy(_) => ArtifactKind::Strategy,
            Self::Analysis(_) => ArtifactKind::Analysis,
            Self::Production(_) => ArtifactKind::Production,
            Self::Courier(_) => ArtifactKind::Courier,
            Self::Critique(_) => ArtifactKind::Critique,
        }
    }
}
