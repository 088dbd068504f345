use serde_json::{json, Value};

use super::derivation::normalize_mbti;
use crate::db::models::{Gender, NewPersona, FIELD_GENDER, FIELD_MBTI, FIELD_UPDATED_AT};
use crate::error::AppError;
use crate::store::{DocumentStore, Fields, WriteOp};

// ============================================================================
// Explicit override
// ============================================================================

/// Write `mbti` and `gender` to one record regardless of what it holds.
pub async fn apply_trait_override<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    id: &str,
    mbti: &str,
    gender: &str,
) -> Result<(), AppError> {
    if id.trim().is_empty() {
        return Err(AppError::Validation("Persona id must not be empty".into()));
    }
    let mbti = normalize_mbti(mbti)?;
    let gender: Gender = gender.parse()?;

    let mut fields = Fields::new();
    fields.insert(FIELD_MBTI.into(), Value::from(mbti));
    fields.insert(FIELD_GENDER.into(), Value::from(gender.as_str()));
    fields.insert(
        FIELD_UPDATED_AT.into(),
        Value::from(chrono::Utc::now().to_rfc3339()),
    );

    store
        .batch_write(
            collection,
            vec![WriteOp::Merge {
                id: id.to_string(),
                fields,
            }],
        )
        .await?;

    tracing::info!(id, mbti, gender = %gender, "Applied trait override");
    Ok(())
}

// ============================================================================
// Sample personas
// ============================================================================

pub fn sample_personas() -> Vec<NewPersona> {
    vec![
        NewPersona {
            name: "테스트 INTJ 남성".into(),
            age: 25,
            description: "분석적이고 전략적인 사고를 하는 스마트한 사람".into(),
            personality: "논리적이고 계획적이며, 혁신적인 아이디어를 좋아함".into(),
            mbti: "INTJ".into(),
            gender: Gender::Male,
            photo_urls: Vec::new(),
        },
        NewPersona {
            name: "테스트 ENFP 여성".into(),
            age: 23,
            description: "밝고 에너지 넘치는 창의적인 사람".into(),
            personality: "열정적이고 사교적이며, 새로운 가능성을 탐구하는 것을 좋아함".into(),
            mbti: "ENFP".into(),
            gender: Gender::Female,
            photo_urls: Vec::new(),
        },
    ]
}

fn placeholder_photo(name: &str) -> String {
    format!(
        "https://via.placeholder.com/400?text={}",
        urlencoding::encode(name)
    )
}

/// Full persona document for `persona`, stamped with the current time.
pub fn persona_fields(persona: &NewPersona) -> Fields {
    let photo_urls = if persona.photo_urls.is_empty() {
        vec![placeholder_photo(&persona.name)]
    } else {
        persona.photo_urls.clone()
    };
    let now = chrono::Utc::now().to_rfc3339();

    let doc = json!({
        "name": persona.name,
        "age": persona.age,
        "description": persona.description,
        "personality": persona.personality,
        "photoUrls": photo_urls,
        "preferences": {},
        "currentRelationship": "friend",
        "relationshipScore": 0,
        "isCasualSpeech": false,
        "gender": persona.gender.as_str(),
        "mbti": persona.mbti,
        "isActive": true,
        "createdAt": now,
        "updatedAt": now,
    });
    match doc {
        Value::Object(map) => map,
        _ => Fields::new(),
    }
}

pub async fn create_persona<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
    persona: &NewPersona,
) -> Result<String, AppError> {
    let id = store.add(collection, persona_fields(persona)).await?;
    tracing::info!(
        id = %id,
        name = %persona.name,
        mbti = %persona.mbti,
        gender = %persona.gender,
        "Created test persona"
    );
    Ok(id)
}

/// Create the two sample personas. Returns their ids in creation order.
pub async fn create_test_personas<S: DocumentStore + ?Sized>(
    store: &S,
    collection: &str,
) -> Result<Vec<String>, AppError> {
    let mut ids = Vec::new();
    for persona in sample_personas() {
        ids.push(create_persona(store, collection, &persona).await?);
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_override_replaces_existing_traits() {
        let store = MemoryStore::new();
        store.insert(
            "personas",
            "p1",
            json!({ "name": "수진", "mbti": "ISTJ", "gender": "female" })
                .as_object()
                .unwrap()
                .clone(),
        );

        apply_trait_override(&store, "personas", "p1", "entp", "Male")
            .await
            .unwrap();

        let doc = store.get("personas", "p1").await.unwrap().unwrap();
        assert_eq!(doc.fields["mbti"], "ENTP");
        assert_eq!(doc.fields["gender"], "male");
        assert_eq!(doc.fields["name"], "수진");
        assert!(doc.present_str("updatedAt").is_some());
    }

    #[tokio::test]
    async fn test_override_of_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let err = apply_trait_override(&store, "personas", "ghost", "INTJ", "male")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_override_rejects_bad_values_before_writing() {
        let store = MemoryStore::new();
        store.insert("personas", "p1", Fields::new());

        for (mbti, gender) in [("QQQQ", "male"), ("INTJ", "robot")] {
            let err = apply_trait_override(&store, "personas", "p1", mbti, gender)
                .await
                .unwrap_err();
            assert!(matches!(err, AppError::Validation(_)));
        }
        assert!(store.commit_sizes().is_empty());
    }

    #[tokio::test]
    async fn test_create_test_personas() {
        let store = MemoryStore::new();
        let ids = create_test_personas(&store, "personas").await.unwrap();
        assert_eq!(ids.len(), 2);

        let intj = store.get("personas", &ids[0]).await.unwrap().unwrap();
        assert_eq!(intj.fields["name"], "테스트 INTJ 남성");
        assert_eq!(intj.fields["age"], 25);
        assert_eq!(intj.fields["mbti"], "INTJ");
        assert_eq!(intj.fields["gender"], "male");
        assert_eq!(intj.fields["currentRelationship"], "friend");
        assert_eq!(intj.fields["isActive"], true);
        assert_eq!(intj.fields["preferences"], json!({}));

        let enfp = store.get("personas", &ids[1]).await.unwrap().unwrap();
        assert_eq!(enfp.fields["gender"], "female");
        assert_eq!(enfp.fields["mbti"], "ENFP");
    }

    #[test]
    fn test_placeholder_photo_is_url_encoded() {
        let fields = persona_fields(&sample_personas()[0]);
        let url = fields["photoUrls"][0].as_str().unwrap();
        assert!(url.starts_with("https://via.placeholder.com/400?text="));
        assert!(!url.contains(' '));
        assert!(url.ends_with(&urlencoding::encode("테스트 INTJ 남성").into_owned()));
    }

    #[test]
    fn test_explicit_photo_urls_are_kept() {
        let mut persona = sample_personas().remove(1);
        persona.photo_urls = vec!["https://cdn.example.com/a.jpg".into()];
        let fields = persona_fields(&persona);
        assert_eq!(fields["photoUrls"], json!(["https://cdn.example.com/a.jpg"]));
    }
}
