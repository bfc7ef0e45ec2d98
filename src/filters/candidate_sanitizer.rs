use serde::Serialize;

use crate::filters::pii_scrubber::scrub;
use crate::models::CandidateRecord;

/// The part of a candidate that may be shown to the generative model.
///
/// Contact identifiers (e-mail, phone, address, coordinates, profile links,
/// project links) never make it into this view. Retained strings are also
/// scrubbed for contact details typed into free text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SanitizedCandidate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profession: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    pub skills: Vec<String>,
    pub education: Vec<String>,
    pub experience: Vec<String>,
    pub certifications: Vec<String>,
    pub achievements: Vec<String>,
    pub projects: Vec<String>,
}

pub fn sanitize(record: &CandidateRecord) -> SanitizedCandidate {
    let mut scrubbed = 0usize;
    let project_names: Vec<String> = record
        .projects
        .iter()
        .filter_map(|p| p.name.clone())
        .collect();

    let candidate = SanitizedCandidate {
        name: record.name.clone().unwrap_or_else(|| "Unnamed candidate".to_string()),
        profession: record.profession.clone(),
        country: record.country.clone(),
        skills: record.skill_names().into_iter().map(str::to_string).collect(),
        education: clean_all(&record.education, &mut scrubbed),
        experience: clean_all(&record.experience, &mut scrubbed),
        certifications: clean_all(&record.certifications, &mut scrubbed),
        achievements: clean_all(&record.achievements, &mut scrubbed),
        projects: clean_all(&project_names, &mut scrubbed),
    };

    if scrubbed > 0 {
        tracing::debug!("Scrubbed {} contact details from candidate {}", scrubbed, candidate.name);
    }
    candidate
}

fn clean_all(values: &[String], scrubbed: &mut usize) -> Vec<String> {
    values
        .iter()
        .map(|value| {
            let (text, count) = scrub(value);
            *scrubbed += count;
            text
        })
        .collect()
}
