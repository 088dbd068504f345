use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::store::Document;

// ============================================================================
// Persona document field names
// ============================================================================

pub const FIELD_NAME: &str = "name";
pub const FIELD_PERSONALITY: &str = "personality";
pub const FIELD_MBTI: &str = "mbti";
pub const FIELD_GENDER: &str = "gender";
pub const FIELD_UPDATED_AT: &str = "updatedAt";
pub const FIELD_CREATED_AT: &str = "createdAt";

// ============================================================================
// Gender
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
        }
    }
}

impl fmt::Display for Gender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Gender {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "male" => Ok(Gender::Male),
            "female" => Ok(Gender::Female),
            other => Err(AppError::Validation(format!(
                "Gender must be 'male' or 'female', got '{other}'"
            ))),
        }
    }
}

// ============================================================================
// PersonaRecord
// ============================================================================

/// Typed view over the persona fields reconciliation cares about.
///
/// A trait counts as set when the stored value is present in the truthiness
/// sense of `Document::present`, whatever its JSON type. Non-string values are
/// rendered as JSON text for display only; the stored value is never rewritten.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaRecord {
    pub id: String,
    pub name: Option<String>,
    pub personality: Option<String>,
    pub mbti: Option<String>,
    pub gender: Option<String>,
    pub updated_at: Option<String>,
}

impl PersonaRecord {
    pub fn from_document(doc: &Document) -> Self {
        let text = |field: &str| doc.present_str(field).map(str::to_string);
        let trait_value = |field: &str| {
            doc.present(field).map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
        };
        Self {
            id: doc.id.clone(),
            name: text(FIELD_NAME),
            personality: text(FIELD_PERSONALITY),
            mbti: trait_value(FIELD_MBTI),
            gender: trait_value(FIELD_GENDER),
            updated_at: text(FIELD_UPDATED_AT),
        }
    }

    pub fn has_all_traits(&self) -> bool {
        self.mbti.is_some() && self.gender.is_some()
    }

    /// Name for log lines, falling back to the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// One trait assignment read back after reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraitSample {
    pub id: String,
    pub name: Option<String>,
    pub mbti: Option<String>,
    pub gender: Option<String>,
}

impl From<&PersonaRecord> for TraitSample {
    fn from(record: &PersonaRecord) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            mbti: record.mbti.clone(),
            gender: record.gender.clone(),
        }
    }
}

// ============================================================================
// Sample persona input
// ============================================================================

/// Fully specified persona for the creation path.
#[derive(Debug, Clone)]
pub struct NewPersona {
    pub name: String,
    pub age: u32,
    pub description: String,
    pub personality: String,
    pub mbti: String,
    pub gender: Gender,
    pub photo_urls: Vec<String>,
}
