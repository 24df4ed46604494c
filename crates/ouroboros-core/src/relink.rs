//! Smart relink of projects to their capsule documents
//!
//! Scans the container listing and proposes, per project, the document that
//! most likely holds its details. Applying the result is a normal turn with a
//! maintenance instruction, so the update still passes the non-loss gate.

use crate::config::EnvelopeNaming;
use crate::state::MemoryState;
use crate::storage::ObjectInfo;
use std::collections::HashSet;

/// Proposal for one project
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelinkCandidate {
    /// Project id
    pub project_id: String,

    /// Project name
    pub project_name: String,

    /// Document currently linked, if any
    pub current_id: Option<String>,

    /// Best matching document, if any
    pub proposed: Option<RelinkMatch>,
}

impl RelinkCandidate {
    /// Whether a match was found that differs from the current link
    pub fn is_change(&self) -> bool {
        self.proposed
            .as_ref()
            .map_or(false, |m| self.current_id.as_deref() != Some(m.file_id.as_str()))
    }
}

/// A matched document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelinkMatch {
    /// Object id
    pub file_id: String,

    /// Object name
    pub file_name: String,
}

/// A document no project links to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnlinkedFile {
    /// Object id
    pub file_id: String,

    /// Object name
    pub file_name: String,

    /// MIME type
    pub content_type: String,
}

/// Result of a relink scan
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelinkPlan {
    /// One entry per project, in memory order
    pub candidates: Vec<RelinkCandidate>,

    /// Documents not referenced by any project
    pub unlinked: Vec<UnlinkedFile>,
}

impl RelinkPlan {
    /// Assignments for every candidate whose match changes its link
    pub fn proposed_assignments(&self) -> Vec<RelinkAssignment> {
        self.candidates
            .iter()
            .filter(|c| c.is_change())
            .filter_map(|c| {
                c.proposed.as_ref().map(|m| RelinkAssignment {
                    project_id: c.project_id.clone(),
                    project_name: c.project_name.clone(),
                    file_id: m.file_id.clone(),
                    file_name: m.file_name.clone(),
                })
            })
            .collect()
    }
}

/// A confirmed project → document link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelinkAssignment {
    /// Project id
    pub project_id: String,

    /// Project name
    pub project_name: String,

    /// Object id to link
    pub file_id: String,

    /// Object name, for the instruction text
    pub file_name: String,
}

impl RelinkAssignment {
    fn line(&self) -> String {
        format!(
            "- Project '{}' (id: {}) -> externalDocumentRef: {} (file: {})",
            self.project_name, self.project_id, self.file_id, self.file_name
        )
    }
}

/// Match projects to documents by id, then name, then the first words of the name
pub fn plan_relink(memory: &MemoryState, files: &[ObjectInfo], naming: &EnvelopeNaming) -> RelinkPlan {
    let documents: Vec<&ObjectInfo> = files
        .iter()
        .filter(|f| !naming.is_envelope_object(&f.name))
        .collect();

    let mut linked: HashSet<&str> = HashSet::new();
    let mut candidates = Vec::with_capacity(memory.projects.len());

    for project in &memory.projects {
        if let Some(current) = project.external_document_ref.as_deref() {
            linked.insert(current);
        }

        let contains = |needle: &str| {
            if needle.is_empty() {
                return None;
            }
            documents.iter().find(|f| f.name.contains(needle)).copied()
        };

        let found = contains(&project.id)
            .or_else(|| contains(&project.name))
            .or_else(|| {
                let words: Vec<&str> = project.name.split_whitespace().collect();
                if words.len() > 1 {
                    contains(&words[..words.len().min(3)].join(" "))
                } else {
                    None
                }
            });

        candidates.push(RelinkCandidate {
            project_id: project.id.clone(),
            project_name: project.name.clone(),
            current_id: project.external_document_ref.clone(),
            proposed: found.map(|f| RelinkMatch {
                file_id: f.id.clone(),
                file_name: f.name.clone(),
            }),
        });
    }

    let unlinked = documents
        .into_iter()
        .filter(|f| !linked.contains(f.id.as_str()))
        .map(|f| UnlinkedFile {
            file_id: f.id.clone(),
            file_name: f.name.clone(),
            content_type: f.content_type.clone(),
        })
        .collect();

    RelinkPlan {
        candidates,
        unlinked,
    }
}

/// Instruction asking the model to apply confirmed links; `None` when there is nothing to do
pub fn maintenance_instruction(updates: &[RelinkAssignment]) -> Option<String> {
    if updates.is_empty() {
        return None;
    }
    let lines: Vec<String> = updates.iter().map(RelinkAssignment::line).collect();
    Some(format!(
        "SYSTEM MAINTENANCE: The user has verified file associations through the relink scan.\n\n\
         Update the projects list so each project below points at the given document id:\n{}\n\n\
         Preserve all other project data exactly as is.",
        lines.join("\n")
    ))
}
