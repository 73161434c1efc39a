//! Subject index maintenance: deterministic ids, upserts, and the
//! auto-relation rules applied on every insert.

use crate::models::{GitContext, SubjectKind, SubjectRelationType};
use crate::{Error, Result};
use rusqlite::{Connection, params};
use uuid::Uuid;

/// Auto-relation rules: for each `(from_kind, relation, to_kind)` pair the
/// Cartesian product of the two tag lists becomes `subject_relations`
/// edges (duplicates ignored).
pub(crate) const AUTO_RELATION_RULES: &[(SubjectKind, SubjectRelationType, SubjectKind)] = &[
    (
        SubjectKind::Context,
        SubjectRelationType::Frames,
        SubjectKind::Problem,
    ),
    (
        SubjectKind::Context,
        SubjectRelationType::AppliesTo,
        SubjectKind::Domain,
    ),
    (
        SubjectKind::Context,
        SubjectRelationType::Involves,
        SubjectKind::Entity,
    ),
    (
        SubjectKind::Entity,
        SubjectRelationType::HasProblem,
        SubjectKind::Problem,
    ),
    (
        SubjectKind::Problem,
        SubjectRelationType::SolvedBy,
        SubjectKind::Resolution,
    ),
    (
        SubjectKind::Resolution,
        SubjectRelationType::AppliesTo,
        SubjectKind::Entity,
    ),
    (
        SubjectKind::Domain,
        SubjectRelationType::Scopes,
        SubjectKind::Entity,
    ),
];

/// Normalizes a subject name: strip surrounding whitespace, lowercase.
/// Empty results are dropped by callers.
#[must_use]
pub fn normalize_subject_name(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Deterministic subject id: UUIDv5 over `"{kind}:{normalized_name}"`.
///
/// Identical names collide on purpose across runs and processes, which
/// makes insert-or-ignore idempotent and survives database rebuilds.
#[must_use]
pub fn subject_id(kind: SubjectKind, normalized_name: &str) -> String {
    Uuid::new_v5(
        &Uuid::NAMESPACE_DNS,
        format!("{}:{normalized_name}", kind.as_str()).as_bytes(),
    )
    .to_string()
}

fn storage_err(operation: &str, e: &rusqlite::Error) -> Error {
    Error::Storage {
        operation: operation.to_string(),
        cause: e.to_string(),
    }
}

/// Upserts one subject row, returning its deterministic id.
pub(crate) fn upsert_subject(
    conn: &Connection,
    kind: SubjectKind,
    normalized_name: &str,
    now: &str,
) -> Result<String> {
    let id = subject_id(kind, normalized_name);
    conn.execute(
        "INSERT OR IGNORE INTO subjects (id, name, kind, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, normalized_name, kind.as_str(), now],
    )
    .map_err(|e| storage_err("upsert_subject", &e))?;
    Ok(id)
}

/// Upserts the tag subjects of an insight-shaped row and links them
/// through the given membership table (`insight_subjects` or
/// `kb_chunk_subjects`).
///
/// `membership_sql` must be an `INSERT OR IGNORE` with two positional
/// parameters: owner id, subject id.
pub(crate) fn upsert_tag_subjects(
    conn: &Connection,
    membership_sql: &str,
    owner_id: &str,
    tags: &[(SubjectKind, &[String])],
    now: &str,
) -> Result<()> {
    for (kind, items) in tags {
        for item in *items {
            let name = normalize_subject_name(item);
            if name.is_empty() {
                continue;
            }
            let subject = upsert_subject(conn, *kind, &name, now)?;
            conn.execute(membership_sql, params![owner_id, subject])
                .map_err(|e| storage_err("upsert_membership", &e))?;
        }
    }
    Ok(())
}

/// Inserts one subject relation edge, ignoring duplicates.
pub(crate) fn insert_relation(
    conn: &Connection,
    from_subject_id: &str,
    relation_type: SubjectRelationType,
    to_subject_id: &str,
    now: &str,
) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO subject_relations
         (from_subject_id, to_subject_id, relation_type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![from_subject_id, to_subject_id, relation_type.as_str(), now],
    )
    .map_err(|e| storage_err("insert_subject_relation", &e))?;
    Ok(())
}

/// Applies the auto-relation rules to the tag lists of a newly inserted
/// row: for each rule whose two lists are both non-empty, the full
/// Cartesian product gains an edge.
pub(crate) fn auto_relate(
    conn: &Connection,
    tags_for: impl Fn(SubjectKind) -> Vec<String>,
    now: &str,
) -> Result<()> {
    for (from_kind, relation_type, to_kind) in AUTO_RELATION_RULES {
        let from_items = tags_for(*from_kind);
        let to_items = tags_for(*to_kind);
        if from_items.is_empty() || to_items.is_empty() {
            continue;
        }

        for from_item in &from_items {
            let from_name = normalize_subject_name(from_item);
            if from_name.is_empty() {
                continue;
            }
            let from_id = subject_id(*from_kind, &from_name);
            for to_item in &to_items {
                let to_name = normalize_subject_name(to_item);
                if to_name.is_empty() {
                    continue;
                }
                let to_id = subject_id(*to_kind, &to_name);
                insert_relation(conn, &from_id, *relation_type, &to_id, now)?;
            }
        }
    }
    Ok(())
}

/// Upserts git-context subjects for an insight, links them to the insight,
/// and emits the fixed git relations for every pair of supplied endpoints:
///
/// - repo ─contains→ project
/// - project ─contains→ task
/// - task ─produces→ pr
/// - person ─authors→ pr
/// - person ─works_on→ project
/// - each resolution ─implemented_in→ pr
pub(crate) fn upsert_git_subjects(
    conn: &Connection,
    insight_id: &str,
    git: &GitContext,
    resolutions: &[String],
    now: &str,
) -> Result<()> {
    let fields: [(SubjectKind, &str); 5] = [
        (SubjectKind::Repo, git.repo.as_str()),
        (SubjectKind::Pr, git.pr.as_str()),
        (SubjectKind::Person, git.author.as_str()),
        (SubjectKind::Project, git.project.as_str()),
        (SubjectKind::Task, git.task.as_str()),
    ];

    let mut ids: [Option<String>; 5] = [const { None }; 5];
    for (slot, (kind, raw)) in ids.iter_mut().zip(fields) {
        let name = normalize_subject_name(raw);
        if name.is_empty() {
            continue;
        }
        let subject = upsert_subject(conn, kind, &name, now)?;
        conn.execute(
            "INSERT OR IGNORE INTO insight_subjects (insight_id, subject_id) VALUES (?1, ?2)",
            params![insight_id, subject],
        )
        .map_err(|e| storage_err("upsert_git_membership", &e))?;
        *slot = Some(subject);
    }
    let [repo, pr, person, project, task] = ids;

    let mut relations: Vec<(String, SubjectRelationType, String)> = Vec::new();
    if let (Some(repo), Some(project)) = (&repo, &project) {
        relations.push((repo.clone(), SubjectRelationType::Contains, project.clone()));
    }
    if let (Some(project), Some(task)) = (&project, &task) {
        relations.push((project.clone(), SubjectRelationType::Contains, task.clone()));
    }
    if let (Some(task), Some(pr)) = (&task, &pr) {
        relations.push((task.clone(), SubjectRelationType::Produces, pr.clone()));
    }
    if let (Some(person), Some(pr)) = (&person, &pr) {
        relations.push((person.clone(), SubjectRelationType::Authors, pr.clone()));
    }
    if let (Some(person), Some(project)) = (&person, &project) {
        relations.push((person.clone(), SubjectRelationType::WorksOn, project.clone()));
    }
    if let Some(pr) = &pr {
        for resolution in resolutions {
            let name = normalize_subject_name(resolution);
            if name.is_empty() {
                continue;
            }
            relations.push((
                subject_id(SubjectKind::Resolution, &name),
                SubjectRelationType::ImplementedIn,
                pr.clone(),
            ));
        }
    }

    for (from_id, relation_type, to_id) in relations {
        insert_relation(conn, &from_id, relation_type, &to_id, now)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_subject_name() {
        assert_eq!(normalize_subject_name("  Memory Leak "), "memory leak");
        assert_eq!(normalize_subject_name(""), "");
        assert_eq!(normalize_subject_name("   "), "");
    }

    #[test]
    fn test_subject_id_is_deterministic() {
        let a = subject_id(SubjectKind::Domain, "auth");
        let b = subject_id(SubjectKind::Domain, "auth");
        assert_eq!(a, b);
        // Kind participates in the hash
        assert_ne!(a, subject_id(SubjectKind::Entity, "auth"));
        // Matches the historical uuid5(NAMESPACE_DNS, "domain:auth") id
        assert_eq!(
            a,
            Uuid::new_v5(&Uuid::NAMESPACE_DNS, b"domain:auth").to_string()
        );
    }

    #[test]
    fn test_rule_table_is_complete() {
        assert_eq!(AUTO_RELATION_RULES.len(), 7);
        // solved_by links problems to resolutions
        assert!(AUTO_RELATION_RULES.contains(&(
            SubjectKind::Problem,
            SubjectRelationType::SolvedBy,
            SubjectKind::Resolution
        )));
    }
}
