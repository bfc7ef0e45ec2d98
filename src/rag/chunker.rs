use serde::{Deserialize, Serialize};

use crate::models::{normalize_link, CandidateRecord};

/// Searchable unit built from one candidate record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    /// Position of the source record in the dataset snapshot.
    pub id: usize,
    /// Flattened text sent to the embedding provider. Never shown to users.
    pub text: String,
    pub full_data: CandidateRecord,
    pub metadata: ChunkMetadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub name: String,
    pub profession: String,
    pub country: String,
    pub skills: String,
}

pub fn build_chunks(records: &[CandidateRecord]) -> Vec<Chunk> {
    records
        .iter()
        .enumerate()
        .map(|(id, record)| Chunk {
            id,
            text: render_text(record),
            full_data: record.clone(),
            metadata: ChunkMetadata {
                name: record.name.clone().unwrap_or_default(),
                profession: record.profession.clone().unwrap_or_default(),
                country: record.country.clone().unwrap_or_default(),
                skills: record.skills_flat(),
            },
        })
        .collect()
}

fn render_text(record: &CandidateRecord) -> String {
    let mut lines = Vec::new();

    if let Some(profession) = &record.profession {
        lines.push(format!("Profession: {}", profession));
    }
    push_list(&mut lines, "Skills", &record.skill_names(), ", ");
    push_list(&mut lines, "Experience", &record.experience, "; ");
    push_list(&mut lines, "Education", &record.education, "; ");
    push_list(&mut lines, "Certifications", &record.certifications, "; ");
    push_list(&mut lines, "Achievements", &record.achievements, "; ");

    let project_names: Vec<&str> = record
        .projects
        .iter()
        .filter_map(|p| p.name.as_deref())
        .collect();
    push_list(&mut lines, "Projects", &project_names, "; ");

    let mut links = record.profile_links();
    links.extend(
        record
            .projects
            .iter()
            .flat_map(|p| p.links.iter())
            .map(|link| normalize_link(link)),
    );
    push_list(&mut lines, "Links", &links, ", ");

    lines.join("\n")
}

fn push_list<S: AsRef<str>>(lines: &mut Vec<String>, label: &str, items: &[S], sep: &str) {
    if items.is_empty() {
        return;
    }
    let joined = items.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(sep);
    lines.push(format!("{}: {}", label, joined));
}
