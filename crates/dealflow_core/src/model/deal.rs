//! Deal domain model.
//!
//! # Responsibility
//! - Define the canonical deal record mirrored from the remote store.
//! - Define create/update inputs (`DealDraft`, `DealPatch`).
//! - Own every deal invariant through `validate()`.
//!
//! # Invariants
//! - `id` is positive and never reassigned.
//! - `stage` is one of the five pipeline stages (enforced by the type).
//! - `value` is finite and non-negative.
//! - `probability` is within `0..=100`.
//! - `updated_at` is not earlier than `created_at`.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

/// Server-assigned deal identifier.
pub type DealId = i64;

/// Reference to a contact record owned by the contacts service.
pub type ContactId = i64;

/// Probability used when a draft does not provide one.
pub const DEFAULT_PROBABILITY: u8 = 25;

/// Pipeline phase a deal currently occupies.
///
/// Ordering follows the board's left-to-right column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Stage {
    Lead,
    Qualified,
    Proposal,
    Negotiation,
    #[serde(rename = "Closed Won", alias = "ClosedWon", alias = "closed_won")]
    ClosedWon,
}

impl Stage {
    /// All stages in board order.
    pub const ALL: [Stage; 5] = [
        Stage::Lead,
        Stage::Qualified,
        Stage::Proposal,
        Stage::Negotiation,
        Stage::ClosedWon,
    ];

    /// Human-readable column label.
    pub fn label(self) -> &'static str {
        match self {
            Self::Lead => "Lead",
            Self::Qualified => "Qualified",
            Self::Proposal => "Proposal",
            Self::Negotiation => "Negotiation",
            Self::ClosedWon => "Closed Won",
        }
    }

    /// Whether the deal is closed as won.
    ///
    /// Informational only: the store allows moving deals out of this stage.
    pub fn is_won(self) -> bool {
        matches!(self, Self::ClosedWon)
    }

    /// Parses a stage from a label or identifier.
    ///
    /// Accepts `Closed Won`, `ClosedWon`, `closed_won` and `closed-won`
    /// style spellings, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, DealValidationError> {
        let normalized: String = value
            .trim()
            .chars()
            .filter(|c| !matches!(c, ' ' | '_' | '-'))
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "lead" => Ok(Self::Lead),
            "qualified" => Ok(Self::Qualified),
            "proposal" => Ok(Self::Proposal),
            "negotiation" => Ok(Self::Negotiation),
            "closedwon" => Ok(Self::ClosedWon),
            _ => Err(DealValidationError::UnknownStage(value.trim().to_string())),
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Stage {
    type Err = DealValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Invariant violations for deals, drafts and patches.
#[derive(Debug, Clone, PartialEq)]
pub enum DealValidationError {
    NonPositiveId(DealId),
    BlankName,
    InvalidValue(f64),
    ProbabilityOutOfRange(u8),
    NonPositiveContactId(ContactId),
    InvalidTimestamps { created_at: i64, updated_at: i64 },
    UnknownStage(String),
    EmptyPatch,
}

impl Display for DealValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NonPositiveId(id) => write!(f, "deal id must be positive, got {id}"),
            Self::BlankName => write!(f, "deal name must not be blank"),
            Self::InvalidValue(value) => {
                write!(f, "deal value must be a finite non-negative number, got {value}")
            }
            Self::ProbabilityOutOfRange(value) => {
                write!(f, "probability must be between 0 and 100, got {value}")
            }
            Self::NonPositiveContactId(id) => {
                write!(f, "contact id must be positive, got {id}")
            }
            Self::InvalidTimestamps {
                created_at,
                updated_at,
            } => write!(
                f,
                "updated_at ({updated_at}) must be >= created_at ({created_at})"
            ),
            Self::UnknownStage(value) => write!(f, "unknown deal stage `{value}`"),
            Self::EmptyPatch => write!(f, "deal patch does not change any field"),
        }
    }
}

impl Error for DealValidationError {}

/// Canonical deal record as mirrored from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawDeal")]
pub struct Deal {
    pub id: DealId,
    pub name: String,
    /// Monetary amount in the account currency.
    pub value: f64,
    pub stage: Stage,
    pub contact_id: Option<ContactId>,
    pub expected_close_date: NaiveDate,
    /// Win likelihood in percent.
    pub probability: u8,
    pub description: Option<String>,
    /// Unix epoch milliseconds, assigned by the store on create.
    pub created_at: i64,
    /// Unix epoch milliseconds, bumped on every mutation.
    pub updated_at: i64,
}

impl Deal {
    /// Builds a persisted record from a draft.
    ///
    /// Used by repository implementations once an id has been assigned.
    pub fn from_draft(id: DealId, draft: &DealDraft, now_ms: i64) -> Self {
        Self {
            id,
            name: draft.name.trim().to_string(),
            value: draft.value,
            stage: draft.stage,
            contact_id: draft.contact_id,
            expected_close_date: draft.expected_close_date,
            probability: draft.probability,
            description: draft.description.clone(),
            created_at: now_ms,
            updated_at: now_ms,
        }
    }

    /// Checks every record invariant.
    pub fn validate(&self) -> Result<(), DealValidationError> {
        if self.id <= 0 {
            return Err(DealValidationError::NonPositiveId(self.id));
        }
        validate_fields(
            &self.name,
            self.value,
            self.probability,
            self.contact_id,
        )?;
        if self.updated_at < self.created_at {
            return Err(DealValidationError::InvalidTimestamps {
                created_at: self.created_at,
                updated_at: self.updated_at,
            });
        }
        Ok(())
    }

    /// Value scaled by win probability.
    pub fn weighted_value(&self) -> f64 {
        self.value * f64::from(self.probability) / 100.0
    }
}

#[derive(Deserialize)]
struct RawDeal {
    id: DealId,
    name: String,
    value: f64,
    stage: Stage,
    contact_id: Option<ContactId>,
    expected_close_date: NaiveDate,
    probability: u8,
    description: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl TryFrom<RawDeal> for Deal {
    type Error = DealValidationError;

    fn try_from(raw: RawDeal) -> Result<Self, Self::Error> {
        let deal = Deal {
            id: raw.id,
            name: raw.name,
            value: raw.value,
            stage: raw.stage,
            contact_id: raw.contact_id,
            expected_close_date: raw.expected_close_date,
            probability: raw.probability,
            description: raw.description,
            created_at: raw.created_at,
            updated_at: raw.updated_at,
        };
        deal.validate()?;
        Ok(deal)
    }
}

/// Input for creating a deal. The remote store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DealDraft {
    pub name: String,
    pub value: f64,
    #[serde(default = "default_stage")]
    pub stage: Stage,
    #[serde(default)]
    pub contact_id: Option<ContactId>,
    pub expected_close_date: NaiveDate,
    #[serde(default = "default_probability")]
    pub probability: u8,
    #[serde(default)]
    pub description: Option<String>,
}

impl DealDraft {
    /// Creates a draft in `Lead` with the default probability.
    pub fn new(name: impl Into<String>, value: f64, expected_close_date: NaiveDate) -> Self {
        Self {
            name: name.into(),
            value,
            stage: Stage::Lead,
            contact_id: None,
            expected_close_date,
            probability: DEFAULT_PROBABILITY,
            description: None,
        }
    }

    pub fn validate(&self) -> Result<(), DealValidationError> {
        validate_fields(&self.name, self.value, self.probability, self.contact_id)
    }
}

fn default_stage() -> Stage {
    Stage::Lead
}

fn default_probability() -> u8 {
    DEFAULT_PROBABILITY
}

/// Partial update for an existing deal.
///
/// `None` leaves a field untouched. For nullable fields, `Some(None)`
/// clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DealPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<Stage>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub contact_id: Option<Option<ContactId>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_close_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probability: Option<u8>,
    #[serde(
        default,
        deserialize_with = "present_or_null",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
}

impl DealPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.value.is_none()
            && self.stage.is_none()
            && self.contact_id.is_none()
            && self.expected_close_date.is_none()
            && self.probability.is_none()
            && self.description.is_none()
    }

    /// Validates only the fields this patch sets.
    pub fn validate(&self) -> Result<(), DealValidationError> {
        if self.is_empty() {
            return Err(DealValidationError::EmptyPatch);
        }
        if let Some(name) = &self.name {
            if name.trim().is_empty() {
                return Err(DealValidationError::BlankName);
            }
        }
        if let Some(value) = self.value {
            validate_value(value)?;
        }
        if let Some(probability) = self.probability {
            validate_probability(probability)?;
        }
        if let Some(Some(contact_id)) = self.contact_id {
            validate_contact_id(contact_id)?;
        }
        Ok(())
    }

    /// Returns `deal` with this patch applied and `updated_at` bumped.
    ///
    /// `updated_at` never moves backwards, even for a stale `now_ms`.
    /// Does not validate; callers validate the patch or the result.
    pub fn apply_to(&self, deal: &Deal, now_ms: i64) -> Deal {
        let mut patched = deal.clone();
        if let Some(name) = &self.name {
            patched.name = name.trim().to_string();
        }
        if let Some(value) = self.value {
            patched.value = value;
        }
        if let Some(stage) = self.stage {
            patched.stage = stage;
        }
        if let Some(contact_id) = self.contact_id {
            patched.contact_id = contact_id;
        }
        if let Some(date) = self.expected_close_date {
            patched.expected_close_date = date;
        }
        if let Some(probability) = self.probability {
            patched.probability = probability;
        }
        if let Some(description) = &self.description {
            patched.description = description.clone();
        }
        patched.updated_at = now_ms.max(deal.updated_at);
        patched
    }
}

/// A present field (including `null`) deserializes as `Some(_)`; a missing
/// one falls back to `default` (`None`, leave unchanged).
fn present_or_null<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Current wall-clock time in Unix epoch milliseconds.
pub fn now_epoch_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn validate_fields(
    name: &str,
    value: f64,
    probability: u8,
    contact_id: Option<ContactId>,
) -> Result<(), DealValidationError> {
    if name.trim().is_empty() {
        return Err(DealValidationError::BlankName);
    }
    validate_value(value)?;
    validate_probability(probability)?;
    if let Some(contact_id) = contact_id {
        validate_contact_id(contact_id)?;
    }
    Ok(())
}

fn validate_value(value: f64) -> Result<(), DealValidationError> {
    if !value.is_finite() || value < 0.0 {
        return Err(DealValidationError::InvalidValue(value));
    }
    Ok(())
}

fn validate_probability(probability: u8) -> Result<(), DealValidationError> {
    if probability > 100 {
        return Err(DealValidationError::ProbabilityOutOfRange(probability));
    }
    Ok(())
}

fn validate_contact_id(contact_id: ContactId) -> Result<(), DealValidationError> {
    if contact_id <= 0 {
        return Err(DealValidationError::NonPositiveContactId(contact_id));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{Deal, DealDraft, DealPatch, DealValidationError, Stage};
    use chrono::NaiveDate;

    fn close_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()
    }

    #[test]
    fn stage_parse_accepts_label_and_identifier_spellings() {
        assert_eq!(Stage::parse("Closed Won").unwrap(), Stage::ClosedWon);
        assert_eq!(Stage::parse("closed_won").unwrap(), Stage::ClosedWon);
        assert_eq!(Stage::parse(" closed-won ").unwrap(), Stage::ClosedWon);
        assert_eq!(Stage::parse("NEGOTIATION").unwrap(), Stage::Negotiation);
    }

    #[test]
    fn stage_parse_rejects_unknown_values() {
        let err = Stage::parse("closed-lost").unwrap_err();
        assert_eq!(err, DealValidationError::UnknownStage("closed-lost".into()));
    }

    #[test]
    fn stage_order_follows_board_columns() {
        let mut shuffled = vec![Stage::ClosedWon, Stage::Lead, Stage::Proposal];
        shuffled.sort();
        assert_eq!(shuffled, vec![Stage::Lead, Stage::Proposal, Stage::ClosedWon]);
    }

    #[test]
    fn from_draft_trims_name_and_stamps_both_timestamps() {
        let draft = DealDraft::new("  Acme renewal ", 1200.0, close_date());
        let deal = Deal::from_draft(7, &draft, 1_000);

        assert_eq!(deal.name, "Acme renewal");
        assert_eq!(deal.stage, Stage::Lead);
        assert_eq!(deal.probability, 25);
        assert_eq!(deal.created_at, 1_000);
        assert_eq!(deal.updated_at, 1_000);
        deal.validate().unwrap();
    }

    #[test]
    fn patch_apply_clears_nullable_fields() {
        let mut draft = DealDraft::new("Beta", 10.0, close_date());
        draft.contact_id = Some(3);
        draft.description = Some("warm intro".into());
        let deal = Deal::from_draft(1, &draft, 100);

        let patch = DealPatch {
            contact_id: Some(None),
            description: Some(None),
            ..DealPatch::default()
        };
        let patched = patch.apply_to(&deal, 200);

        assert_eq!(patched.contact_id, None);
        assert_eq!(patched.description, None);
        assert_eq!(patched.updated_at, 200);
        assert_eq!(patched.name, "Beta");
    }

    #[test]
    fn patch_apply_never_moves_updated_at_backwards() {
        let draft = DealDraft::new("Gamma", 10.0, close_date());
        let mut deal = Deal::from_draft(2, &draft, 100);
        deal.updated_at = 500;

        let patch = DealPatch {
            probability: Some(40),
            ..DealPatch::default()
        };
        let patched = patch.apply_to(&deal, 300);

        assert_eq!(patched.updated_at, 500);
        assert_eq!(patched.probability, 40);
        patched.validate().unwrap();
    }

    #[test]
    fn patch_validate_rejects_empty_patch() {
        assert_eq!(
            DealPatch::default().validate().unwrap_err(),
            DealValidationError::EmptyPatch
        );
    }
}
