use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

// Candidate records

/// Empty strings and the literal `"null"` are read as absent, and list fields
/// that are missing or hold only null-like entries come back empty. Fields the
/// engine does not know about are kept in `extra` so that the serialized copy
/// stays complete.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateRecord {
    #[serde(default, deserialize_with = "null_like_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub profession: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub location: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub country: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub gender: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub email: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub github_link: Option<String>,
    #[serde(default, deserialize_with = "null_like_string")]
    pub linkedin_link: Option<String>,
    #[serde(default, deserialize_with = "null_like_skills")]
    pub skills: Vec<Skill>,
    #[serde(default, deserialize_with = "null_like_list")]
    pub education: Vec<String>,
    #[serde(default, deserialize_with = "null_like_list")]
    pub experience: Vec<String>,
    #[serde(default, deserialize_with = "null_like_list")]
    pub certifications: Vec<String>,
    #[serde(default, deserialize_with = "null_like_list")]
    pub achievements: Vec<String>,
    #[serde(default, deserialize_with = "null_like_projects")]
    pub projects: Vec<Project>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

/// A skill arrives either as a bare string or as `{ "name": ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skill {
    Plain(String),
    Named { name: String },
}

impl Skill {
    pub fn name(&self) -> &str {
        match self {
            Skill::Plain(name) => name,
            Skill::Named { name } => name,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Project {
    #[serde(default, deserialize_with = "null_like_string")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "null_like_list")]
    pub links: Vec<String>,
}

impl CandidateRecord {
    pub fn skill_names(&self) -> Vec<&str> {
        self.skills.iter().map(Skill::name).collect()
    }

    pub fn skills_flat(&self) -> String {
        self.skill_names().join(", ")
    }

    pub fn profile_links(&self) -> Vec<String> {
        [self.github_link.as_deref(), self.linkedin_link.as_deref()]
            .into_iter()
            .flatten()
            .map(normalize_link)
            .collect()
    }
}

pub fn normalize_link(link: &str) -> String {
    let link = link.trim();
    if link.starts_with("http") {
        link.to_string()
    } else {
        format!("https://{}", link)
    }
}

fn is_null_like(value: &str) -> bool {
    let trimmed = value.trim();
    trimmed.is_empty() || trimmed.eq_ignore_ascii_case("null")
}

fn null_like_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|s| !is_null_like(s)))
}

fn null_like_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Vec<Option<String>>> = Option::deserialize(deserializer)?;
    Ok(value
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter(|s| !is_null_like(s))
        .collect())
}

fn null_like_skills<'de, D>(deserializer: D) -> Result<Vec<Skill>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Vec<Option<Skill>>> = Option::deserialize(deserializer)?;
    Ok(value
        .unwrap_or_default()
        .into_iter()
        .flatten()
        .filter(|s| !is_null_like(s.name()))
        .collect())
}

fn null_like_projects<'de, D>(deserializer: D) -> Result<Vec<Project>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<Vec<Option<Project>>> = Option::deserialize(deserializer)?;
    Ok(value.unwrap_or_default().into_iter().flatten().collect())
}

// Chat wire types (OpenAI-compatible gateway)

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

// HTTP surface

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub session_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub session_id: Uuid,
    pub reply: String,
    pub retrieved: Vec<RetrievedCandidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedCandidate {
    pub id: usize,
    pub name: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatasetResponse {
    pub fingerprint: String,
    pub records: usize,
}
