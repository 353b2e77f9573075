//! Core data model — closed sum types with a discriminator field, rejecting
//! unknown tags at the edge. See spec §3.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Reference
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Restricted,
    Hidden,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Reference {
    pub id: Uuid,
    pub visibility: Visibility,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ExternalIdentifier
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum IdentifierType {
    PmId,
    Doi,
    OpenAlex,
    Other,
}

impl std::fmt::Display for IdentifierType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            IdentifierType::PmId => "pm_id",
            IdentifierType::Doi => "doi",
            IdentifierType::OpenAlex => "open_alex",
            IdentifierType::Other => "other",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for IdentifierType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pm_id" => Ok(Self::PmId),
            "doi" => Ok(Self::Doi),
            "open_alex" => Ok(Self::OpenAlex),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown identifier_type: {other}")),
        }
    }
}

/// `(reference_id, identifier_type, identifier, other_identifier_name?)`.
///
/// Uniqueness invariant enforced by the persistence gateway, not here:
/// `(identifier_type, identifier, other_identifier_name)` is globally unique.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExternalIdentifier {
    pub reference_id: Uuid,
    pub identifier_type: IdentifierType,
    pub identifier: String,
    pub other_identifier_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ExternalIdentifier {
    /// The tuple that must be globally unique among active identifiers.
    pub fn collision_key(&self) -> (IdentifierType, &str, Option<&str>) {
        (
            self.identifier_type,
            self.identifier.as_str(),
            self.other_identifier_name.as_deref(),
        )
    }
}

static DOI_RE: &str = r"^10\.\d{4,9}/\S+$";
static OPEN_ALEX_RE: &str = r"^W\d+$";

/// Validate the value constraints named in spec §4.D step 2.
pub fn validate_identifier_value(
    identifier_type: IdentifierType,
    identifier: &str,
    other_identifier_name: &Option<String>,
) -> Result<(), String> {
    match identifier_type {
        IdentifierType::PmId => {
            identifier
                .parse::<i64>()
                .map_err(|_| format!("pm_id must be integer-parseable, got '{identifier}'"))?;
        }
        IdentifierType::Doi => {
            let re = regex::Regex::new(DOI_RE).expect("static DOI regex compiles");
            if !re.is_match(identifier) {
                return Err(format!("doi '{identifier}' does not match {DOI_RE}"));
            }
        }
        IdentifierType::OpenAlex => {
            let re = regex::Regex::new(OPEN_ALEX_RE).expect("static open_alex regex compiles");
            if !re.is_match(identifier) {
                return Err(format!(
                    "open_alex id '{identifier}' must be prefix W + digits"
                ));
            }
        }
        IdentifierType::Other => {
            if other_identifier_name.is_none() {
                return Err("identifier_type=other requires other_identifier_name".to_string());
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Enhancement
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "enhancement_type", rename_all = "snake_case")]
pub enum EnhancementContent {
    Bibliographic {
        title: String,
        authors: Vec<String>,
        publication_year: Option<i32>,
        venue: Option<String>,
    },
    Abstract {
        text: String,
    },
    Annotation {
        label: String,
        score: Option<f64>,
    },
    Location {
        scheme: String,
        value: String,
    },
}

impl EnhancementContent {
    pub fn enhancement_type(&self) -> &'static str {
        match self {
            EnhancementContent::Bibliographic { .. } => "bibliographic",
            EnhancementContent::Abstract { .. } => "abstract",
            EnhancementContent::Annotation { .. } => "annotation",
            EnhancementContent::Location { .. } => "location",
        }
    }
}

/// `(reference_id, source, enhancement_type, robot_version?, content)`.
///
/// Append-only physically; the persistence gateway resolves "latest wins"
/// for the key `(reference_id, source, enhancement_type)` by insertion order.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Enhancement {
    pub id: Uuid,
    pub reference_id: Uuid,
    pub source: String,
    pub robot_version: Option<String>,
    pub content: EnhancementContent,
    pub created_at: DateTime<Utc>,
}

impl Enhancement {
    pub fn enhancement_type(&self) -> &'static str {
        self.content.enhancement_type()
    }

    /// The logical update key: a new enhancement with the same key
    /// supersedes the prior one by insertion order.
    pub fn update_key(&self) -> (Uuid, &str, &'static str) {
        (self.reference_id, self.source.as_str(), self.enhancement_type())
    }
}

// ---------------------------------------------------------------------------
// ReferenceDuplicateDecision
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Determination {
    Canonical,
    Duplicate,
    ExactDuplicate,
    Decoupled,
    Unresolved,
}

impl std::fmt::Display for Determination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Determination::Canonical => "CANONICAL",
            Determination::Duplicate => "DUPLICATE",
            Determination::ExactDuplicate => "EXACT_DUPLICATE",
            Determination::Decoupled => "DECOUPLED",
            Determination::Unresolved => "UNRESOLVED",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReferenceDuplicateDecision {
    pub id: Uuid,
    pub reference_id: Uuid,
    pub canonical_reference_id: Option<Uuid>,
    pub determination: Determination,
    pub active: bool,
    pub version: i64,
    pub created_at: DateTime<Utc>,
}

impl ReferenceDuplicateDecision {
    /// Invariant: `active && determination == DUPLICATE` implies a non-null
    /// canonical reference id.
    pub fn is_well_formed(&self) -> bool {
        if self.active && self.determination == Determination::Duplicate {
            return self.canonical_reference_id.is_some();
        }
        true
    }
}

// ---------------------------------------------------------------------------
// ImportRecord / ImportBatch / ImportResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum CollisionStrategy {
    Fail,
    Overwrite,
    MergeDefensive,
    MergeAggressive,
    Discard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ImportResultStatus {
    Completed,
    Failed,
    PartiallyFailed,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportBatch {
    pub id: Uuid,
    pub collision_strategy: CollisionStrategy,
    pub storage_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportRecord {
    pub id: Uuid,
    pub batch_id: Uuid,
    pub line_number: u64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ImportResult {
    pub record_id: Uuid,
    pub status: ImportResultStatus,
    pub reference_id: Option<Uuid>,
    pub reason: Option<String>,
    pub colliding_reference_ids: Vec<Uuid>,
}

// ---------------------------------------------------------------------------
// EnhancementRequest / RobotEnhancementBatch / RobotEnhancementBatchResult
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnhancementRequestStatus {
    Received,
    Accepted,
    Processing,
    Importing,
    Indexing,
    PartialFailed,
    Failed,
    IndexingFailed,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnhancementRequest {
    pub id: Uuid,
    pub robot_id: Uuid,
    pub status: EnhancementRequestStatus,
    pub reference_ids: Vec<Uuid>,
    /// Robot id that produced the enhancement triggering this request, if any
    /// — carried for cycle protection (spec §4.G).
    pub originating_robot_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RobotEnhancementBatch {
    pub id: Uuid,
    pub request_id: Uuid,
    pub robot_id: Uuid,
    pub reference_ids: Vec<Uuid>,
    pub reference_storage_url: String,
    pub result_storage_url: String,
    pub deadline: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RobotEnhancementBatchResult {
    pub batch_id: Uuid,
    pub error: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// A single line of a batch result JSONL payload.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum RobotResultLine {
    Enhancement(EnhancementPayload),
    LinkedError(LinkedRobotError),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnhancementPayload {
    pub reference_id: Uuid,
    pub source: String,
    pub robot_version: Option<String>,
    pub content: EnhancementContent,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LinkedRobotError {
    pub reference_id: Uuid,
    pub reason: String,
}

// ---------------------------------------------------------------------------
// Robot / RobotAutomation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Robot {
    pub id: Uuid,
    pub base_url: String,
    pub client_secret_hash: String,
    pub name: String,
    pub owner: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RobotAutomation {
    pub robot_id: Uuid,
    /// Percolator-style boolean expression over `{reference, changeset}`.
    /// Must reference the `changeset` subdocument (spec §4.H) — rejected at
    /// registration otherwise, see `destiny_store::percolate::validate_query`.
    pub query: serde_json::Value,
}

// ---------------------------------------------------------------------------
// DeduplicatedReferenceProjection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectedIdentifier {
    pub reference_id: Uuid,
    pub identifier_type: IdentifierType,
    pub identifier: String,
    pub other_identifier_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ProjectedEnhancement {
    pub reference_id: Uuid,
    pub source: String,
    pub content: EnhancementContent,
}

/// Derived from a canonical reference and all references whose active
/// decision points to it. Never a second source of truth — rebuilt by the
/// projection builder on every relevant write (spec §3, §4.F).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeduplicatedReferenceProjection {
    pub canonical_id: Uuid,
    pub member_reference_ids: Vec<Uuid>,
    pub identifiers: Vec<ProjectedIdentifier>,
    pub enhancements: Vec<ProjectedEnhancement>,
}

/// The minimal document describing what just changed on a reference — the
/// discriminating half of a percolation document (spec glossary).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Changeset {
    pub reference_id: Uuid,
    pub added_identifiers: Vec<ProjectedIdentifier>,
    pub added_enhancements: Vec<ProjectedEnhancement>,
}

/// The two-field percolation document (spec §4.H, §6).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PercolationDocument {
    pub reference: DeduplicatedReferenceProjection,
    pub changeset: Changeset,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pm_id_must_be_integer() {
        assert!(validate_identifier_value(IdentifierType::PmId, "987654", &None).is_ok());
        assert!(validate_identifier_value(IdentifierType::PmId, "not-a-number", &None).is_err());
    }

    #[test]
    fn doi_regex_rejects_malformed() {
        assert!(validate_identifier_value(IdentifierType::Doi, "10.1234/x", &None).is_ok());
        assert!(validate_identifier_value(IdentifierType::Doi, "not-a-doi", &None).is_err());
    }

    #[test]
    fn open_alex_requires_w_prefix() {
        assert!(validate_identifier_value(IdentifierType::OpenAlex, "W123", &None).is_ok());
        assert!(validate_identifier_value(IdentifierType::OpenAlex, "123", &None).is_err());
    }

    #[test]
    fn other_requires_name() {
        assert!(validate_identifier_value(IdentifierType::Other, "x", &None).is_err());
        assert!(validate_identifier_value(
            IdentifierType::Other,
            "x",
            &Some("local_id".to_string())
        )
        .is_ok());
    }

    #[test]
    fn decision_well_formed_requires_canonical_for_active_duplicate() {
        let mut d = ReferenceDuplicateDecision {
            id: Uuid::nil(),
            reference_id: Uuid::nil(),
            canonical_reference_id: None,
            determination: Determination::Duplicate,
            active: true,
            version: 1,
            created_at: Utc::now(),
        };
        assert!(!d.is_well_formed());
        d.canonical_reference_id = Some(Uuid::nil());
        assert!(d.is_well_formed());
    }
}
