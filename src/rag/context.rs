use std::collections::BTreeSet;

use crate::filters::candidate_sanitizer::{sanitize, SanitizedCandidate};
use crate::models::{CandidateRecord, Message, RetrievedCandidate};

use super::vector_store::RankedChunk;

pub const FALLBACK_REPLY: &str =
    "Sorry, I couldn't generate an answer right now. Please try again in a moment.";

pub const NO_MATCH_REPLY: &str =
    "I couldn't find any candidates relevant to that question in the current dataset.";

pub const INDEX_BUILDING_REPLY: &str =
    "The candidate index is still being built. Please ask again in a moment.";

pub const NO_DATASET_REPLY: &str =
    "No candidate data has been loaded yet, so I have nothing to search.";

/// Dataset-wide facts given to the model alongside the retrieved records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatasetSummary {
    pub total: usize,
    pub professions: Vec<String>,
    pub countries: Vec<String>,
}

impl DatasetSummary {
    pub fn from_records(records: &[CandidateRecord]) -> Self {
        let professions: BTreeSet<&str> =
            records.iter().filter_map(|r| r.profession.as_deref()).collect();
        let countries: BTreeSet<&str> =
            records.iter().filter_map(|r| r.country.as_deref()).collect();

        Self {
            total: records.len(),
            professions: professions.into_iter().map(str::to_string).collect(),
            countries: countries.into_iter().map(str::to_string).collect(),
        }
    }
}

/// A retrieved chunk reduced to what the model may see.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedRecord {
    pub id: usize,
    pub score: f32,
    pub candidate: SanitizedCandidate,
}

impl RetrievedRecord {
    pub fn provenance(&self) -> RetrievedCandidate {
        RetrievedCandidate {
            id: self.id,
            name: self.candidate.name.clone(),
            score: self.score,
        }
    }
}

pub fn sanitize_retrieved(ranked: &[RankedChunk]) -> Vec<RetrievedRecord> {
    ranked
        .iter()
        .map(|r| RetrievedRecord {
            id: r.chunk.id,
            score: r.score,
            candidate: sanitize(&r.chunk.full_data),
        })
        .collect()
}

pub fn system_instruction(summary: &DatasetSummary, records: &[RetrievedRecord]) -> String {
    let mut prompt = String::from(
        "You are a recruiting assistant helping a recruiter explore a candidate database.\n\n",
    );

    prompt.push_str(&format!("Dataset overview: {} candidates.\n", summary.total));
    if !summary.professions.is_empty() {
        prompt.push_str(&format!("Professions: {}\n", summary.professions.join(", ")));
    }
    if !summary.countries.is_empty() {
        prompt.push_str(&format!("Countries: {}\n", summary.countries.join(", ")));
    }

    prompt.push_str(
        "\nAnswer only from the candidate records below. If they do not contain what the \
         recruiter asks for, say that no matching candidate was found. Never invent \
         candidates, skills, employers or qualifications. Contact details are withheld; \
         do not guess them.\n\nRelevant candidate records (most similar first):\n",
    );

    for (rank, record) in records.iter().enumerate() {
        let body = serde_json::to_string_pretty(&record.candidate).unwrap_or_default();
        prompt.push_str(&format!(
            "\n[{}] similarity {:.3}\n{}\n",
            rank + 1,
            record.score,
            body
        ));
    }

    prompt
}

/// System instruction, then the history window, then the new question.
pub fn assemble_messages(system: String, history: &[Message], user_message: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(user_message));
    messages
}

pub fn provenance_note(records: &[RetrievedRecord]) -> String {
    let sources: Vec<String> = records
        .iter()
        .map(|r| format!("{} (#{}, {:.3})", r.candidate.name, r.id, r.score))
        .collect();
    format!("\n\n---\nRetrieved candidates: {}", sources.join(", "))
}
