//! Insight, frame, and subject-graph types.

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical semantic frames for normalized insights.
///
/// A closed vocabulary: unknown values loaded from storage fail loudly
/// rather than defaulting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Frame {
    /// `{condition} causes {effect}` (optionally `… because {mechanism}`).
    #[default]
    Causal,
    /// `{action} requires {precondition}`.
    Constraint,
    /// `When {situation}, prefer {approach} over {alternative} because {reason}`.
    Pattern,
    /// `{A} is equivalent to {B} in context {C}`.
    Equivalence,
    /// `{specific} is a type of {general} with property {distinguishing_property}`.
    Taxonomy,
    /// `To achieve {goal}, do: {step1}, then {step2}, …`.
    Procedure,
}

impl Frame {
    /// Returns all frame variants.
    #[must_use]
    pub const fn all() -> &'static [Self] {
        &[
            Self::Causal,
            Self::Constraint,
            Self::Pattern,
            Self::Equivalence,
            Self::Taxonomy,
            Self::Procedure,
        ]
    }

    /// Returns the frame as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Constraint => "constraint",
            Self::Pattern => "pattern",
            Self::Equivalence => "equivalence",
            Self::Taxonomy => "taxonomy",
            Self::Procedure => "procedure",
        }
    }

    /// Parses a frame from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "causal" => Ok(Self::Causal),
            "constraint" => Ok(Self::Constraint),
            "pattern" => Ok(Self::Pattern),
            "equivalence" => Ok(Self::Equivalence),
            "taxonomy" => Ok(Self::Taxonomy),
            "procedure" => Ok(Self::Procedure),
            other => Err(Error::InvalidInput(format!("unknown frame: {other}"))),
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Subject node kinds in the knowledge graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubjectKind {
    /// Caller-supplied domain label (e.g. `node`, `auth`).
    Domain,
    /// Technical thing mentioned (tool, library, protocol, construct).
    Entity,
    /// Issue, bug, failure, or pain point.
    Problem,
    /// Fix, solution, or workaround.
    Resolution,
    /// Situational qualifier (e.g. `production`, `CI pipeline`).
    Context,
    /// Git repository.
    Repo,
    /// Pull request.
    Pr,
    /// Person (PR author, contributor).
    Person,
    /// Project within a repository.
    Project,
    /// Orchestrated task.
    Task,
}

impl SubjectKind {
    /// Returns the kind as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Domain => "domain",
            Self::Entity => "entity",
            Self::Problem => "problem",
            Self::Resolution => "resolution",
            Self::Context => "context",
            Self::Repo => "repo",
            Self::Pr => "pr",
            Self::Person => "person",
            Self::Project => "project",
            Self::Task => "task",
        }
    }

    /// Parses a subject kind from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "domain" => Ok(Self::Domain),
            "entity" => Ok(Self::Entity),
            "problem" => Ok(Self::Problem),
            "resolution" => Ok(Self::Resolution),
            "context" => Ok(Self::Context),
            "repo" => Ok(Self::Repo),
            "pr" => Ok(Self::Pr),
            "person" => Ok(Self::Person),
            "project" => Ok(Self::Project),
            "task" => Ok(Self::Task),
            other => Err(Error::InvalidInput(format!("unknown subject kind: {other}"))),
        }
    }
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Directed subject↔subject relation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubjectRelationType {
    /// Containment (repo→project, project→task).
    Contains,
    /// A domain scopes an entity.
    Scopes,
    /// A context frames a problem.
    Frames,
    /// A problem is solved by a resolution.
    SolvedBy,
    /// A resolution is implemented in a PR.
    ImplementedIn,
    /// A context or resolution applies to a domain or entity.
    AppliesTo,
    /// A context involves an entity.
    Involves,
    /// An entity has a problem.
    HasProblem,
    /// A resolution addresses a problem.
    Addresses,
    /// A task produces a PR.
    Produces,
    /// A person works on a project.
    WorksOn,
    /// A person authors a PR.
    Authors,
    /// A PR resolves a task or problem.
    Resolves,
    /// Two insights share at least one subject (insight-relation vocabulary).
    SharedSubject,
}

impl SubjectRelationType {
    /// Returns the relation type as a string slice.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::Scopes => "scopes",
            Self::Frames => "frames",
            Self::SolvedBy => "solved_by",
            Self::ImplementedIn => "implemented_in",
            Self::AppliesTo => "applies_to",
            Self::Involves => "involves",
            Self::HasProblem => "has_problem",
            Self::Addresses => "addresses",
            Self::Produces => "produces",
            Self::WorksOn => "works_on",
            Self::Authors => "authors",
            Self::Resolves => "resolves",
            Self::SharedSubject => "shared_subject",
        }
    }

    /// Parses a relation type from its string form.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidInput`] for values outside the closed set.
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "contains" => Ok(Self::Contains),
            "scopes" => Ok(Self::Scopes),
            "frames" => Ok(Self::Frames),
            "solved_by" => Ok(Self::SolvedBy),
            "implemented_in" => Ok(Self::ImplementedIn),
            "applies_to" => Ok(Self::AppliesTo),
            "involves" => Ok(Self::Involves),
            "has_problem" => Ok(Self::HasProblem),
            "addresses" => Ok(Self::Addresses),
            "produces" => Ok(Self::Produces),
            "works_on" => Ok(Self::WorksOn),
            "authors" => Ok(Self::Authors),
            "resolves" => Ok(Self::Resolves),
            "shared_subject" => Ok(Self::SharedSubject),
            other => Err(Error::InvalidInput(format!(
                "unknown subject relation type: {other}"
            ))),
        }
    }
}

impl fmt::Display for SubjectRelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A typed, lowercased tag node in the knowledge graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Deterministic id (UUIDv5 of `"{kind}:{name}"`).
    pub id: String,
    /// Normalized (stripped, lowercased) name.
    pub name: String,
    /// Subject kind.
    pub kind: SubjectKind,
}

/// An outgoing edge in the subject relation graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubjectRelationEdge {
    /// Source subject name.
    pub from_name: String,
    /// Source subject kind.
    pub from_kind: SubjectKind,
    /// Target subject name.
    pub to_name: String,
    /// Target subject kind.
    pub to_kind: SubjectKind,
    /// Relation type.
    pub relation_type: SubjectRelationType,
}

/// A single atomic insight stored in semantic memory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    /// Row id (assigned at insert when `None`).
    pub id: Option<String>,
    /// Verbatim input atom.
    pub text: String,
    /// Canonical rewrite under the frame's template.
    pub normalized_text: String,
    /// Semantic frame.
    pub frame: Frame,
    /// Caller-supplied domain labels.
    pub domains: Vec<String>,
    /// Extracted entities.
    pub entities: Vec<String>,
    /// Extracted problems.
    pub problems: Vec<String>,
    /// Extracted resolutions.
    pub resolutions: Vec<String>,
    /// Extracted situational contexts.
    pub contexts: Vec<String>,
    /// Deterministic confidence score in `[0, 1]`.
    pub confidence: f32,
    /// Free-form provenance.
    pub source: String,
    /// Creation timestamp (assigned at insert).
    pub created_at: Option<DateTime<Utc>>,
    /// Last-update timestamp (assigned at insert/update).
    pub updated_at: Option<DateTime<Utc>>,
}

impl Insight {
    /// Creates an insight from raw text with everything else defaulted.
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: None,
            normalized_text: String::new(),
            frame: Frame::default(),
            domains: Vec::new(),
            entities: Vec::new(),
            problems: Vec::new(),
            resolutions: Vec::new(),
            contexts: Vec::new(),
            confidence: 1.0,
            source: String::new(),
            created_at: None,
            updated_at: None,
            text,
        }
    }

    /// The tag list for a given extraction kind.
    ///
    /// Only the five tag kinds have lists; git-context kinds return an
    /// empty slice.
    #[must_use]
    pub fn tags_for(&self, kind: SubjectKind) -> &[String] {
        match kind {
            SubjectKind::Domain => &self.domains,
            SubjectKind::Entity => &self.entities,
            SubjectKind::Problem => &self.problems,
            SubjectKind::Resolution => &self.resolutions,
            SubjectKind::Context => &self.contexts,
            _ => &[],
        }
    }
}

/// Optional git metadata to associate with an insight at insert time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitContext {
    /// Repository name.
    #[serde(default)]
    pub repo: String,
    /// Pull request identifier.
    #[serde(default)]
    pub pr: String,
    /// PR author.
    #[serde(default)]
    pub author: String,
    /// Project name.
    #[serde(default)]
    pub project: String,
    /// Task name.
    #[serde(default)]
    pub task: String,
}

impl GitContext {
    /// Returns true when no git field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repo.is_empty()
            && self.pr.is_empty()
            && self.author.is_empty()
            && self.project.is_empty()
            && self.task.is_empty()
    }
}

/// An insight with its similarity (or relation weight) score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// The matched insight.
    pub insight: Insight,
    /// Cosine similarity or relation weight.
    pub score: f32,
}

/// Typed field updates for [`crate::InsightStore::update`].
///
/// `None` fields are left untouched. The set of fields mirrors the update
/// allowlist: `text`, `normalized_text`, `frame`, the five tag lists,
/// `confidence`, and `source`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InsightUpdate {
    /// Replacement for `text`.
    pub text: Option<String>,
    /// Replacement for `normalized_text`.
    pub normalized_text: Option<String>,
    /// Replacement for `frame`.
    pub frame: Option<Frame>,
    /// Replacement for `domains`.
    pub domains: Option<Vec<String>>,
    /// Replacement for `entities`.
    pub entities: Option<Vec<String>>,
    /// Replacement for `problems`.
    pub problems: Option<Vec<String>>,
    /// Replacement for `resolutions`.
    pub resolutions: Option<Vec<String>>,
    /// Replacement for `contexts`.
    pub contexts: Option<Vec<String>>,
    /// Replacement for `confidence`.
    pub confidence: Option<f32>,
    /// Replacement for `source`.
    pub source: Option<String>,
}

impl InsightUpdate {
    /// The update allowlist, as accepted from raw field maps.
    pub const ALLOWED_FIELDS: &'static [&'static str] = &[
        "text",
        "normalized_text",
        "frame",
        "domains",
        "entities",
        "problems",
        "resolutions",
        "contexts",
        "confidence",
        "source",
    ];

    /// Returns true when no field is set.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.text.is_none()
            && self.normalized_text.is_none()
            && self.frame.is_none()
            && self.domains.is_none()
            && self.entities.is_none()
            && self.problems.is_none()
            && self.resolutions.is_none()
            && self.contexts.is_none()
            && self.confidence.is_none()
            && self.source.is_none()
    }
}
