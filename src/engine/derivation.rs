//! Pure trait derivation for persona records.
//!
//! Group selection is deterministic in the input text; the final pick inside a
//! group comes from the caller's RNG, so a seeded generator yields exact values.

use rand::seq::SliceRandom;
use rand::Rng;

use crate::db::models::Gender;
use crate::error::AppError;

/// The full universe of categorical trait values.
pub const MBTI_TYPES: [&str; 16] = [
    "INTJ", "INTP", "ENTJ", "ENTP", // NT
    "INFJ", "INFP", "ENFJ", "ENFP", // NF
    "ISTJ", "ISFJ", "ESTJ", "ESFJ", // SJ
    "ISTP", "ISFP", "ESTP", "ESFP", // SP
];

/// Keywords that route a personality description to a subset of types.
#[derive(Debug, PartialEq, Eq)]
pub struct KeywordGroup {
    pub label: &'static str,
    pub keywords: &'static [&'static str],
    pub types: &'static [&'static str],
}

/// Scanned in order; the first group with a matching keyword wins.
pub const KEYWORD_GROUPS: [KeywordGroup; 4] = [
    KeywordGroup {
        label: "analytical",
        keywords: &["분석", "논리"],
        types: &["INTJ", "INTP", "ENTJ", "ENTP"],
    },
    KeywordGroup {
        label: "empathetic",
        keywords: &["감정", "공감"],
        types: &["INFJ", "INFP", "ENFJ", "ENFP"],
    },
    KeywordGroup {
        label: "outgoing",
        keywords: &["활발", "외향"],
        types: &["ENTJ", "ENTP", "ENFJ", "ENFP", "ESTJ", "ESFJ", "ESTP", "ESFP"],
    },
    KeywordGroup {
        label: "reserved",
        keywords: &["조용", "내성"],
        types: &["INTJ", "INTP", "INFJ", "INFP", "ISTJ", "ISFJ", "ISTP", "ISFP"],
    },
];

/// Female-associated given-name fragments. Checked before the male list.
pub const FEMALE_NAMES: [&str; 14] = [
    "수진", "지영", "미나", "하은", "서연", "예원", "다연", "수빈", "채원", "윤서", "지우", "민서",
    "서준", "혜린",
];

pub const MALE_NAMES: [&str; 14] = [
    "민수", "지훈", "성호", "준영", "태영", "동현", "승민", "현우", "상혁", "재원", "진호", "우진",
    "도윤", "시우",
];

/// The keyword group `personality` falls into, if any.
pub fn keyword_group(personality: Option<&str>) -> Option<&'static KeywordGroup> {
    let text = personality?.to_lowercase();
    if text.is_empty() {
        return None;
    }
    KEYWORD_GROUPS
        .iter()
        .find(|group| group.keywords.iter().any(|kw| text.contains(kw)))
}

/// Pick an MBTI type for a personality description.
pub fn derive_categorical_trait<R: Rng + ?Sized>(personality: Option<&str>, rng: &mut R) -> &'static str {
    let pool: &'static [&'static str] = match keyword_group(personality) {
        Some(group) => group.types,
        None => &MBTI_TYPES,
    };
    // Both pools are non-empty constants.
    pool.choose(rng).copied().unwrap_or(MBTI_TYPES[0])
}

/// Guess a gender from a Korean full name, falling back to a uniform pick.
pub fn derive_gender_trait<R: Rng + ?Sized>(name: Option<&str>, rng: &mut R) -> Gender {
    let name = name.unwrap_or("");
    if FEMALE_NAMES.iter().any(|f| name.contains(f)) {
        Gender::Female
    } else if MALE_NAMES.iter().any(|m| name.contains(m)) {
        Gender::Male
    } else if rng.gen_bool(0.5) {
        Gender::Male
    } else {
        Gender::Female
    }
}

/// Canonical upper-case form of a known MBTI type.
pub fn normalize_mbti(raw: &str) -> Result<&'static str, AppError> {
    let upper = raw.trim().to_ascii_uppercase();
    MBTI_TYPES
        .iter()
        .copied()
        .find(|t| *t == upper)
        .ok_or_else(|| AppError::Validation(format!("Unknown MBTI type '{raw}'")))
}
