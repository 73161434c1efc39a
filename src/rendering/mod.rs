//! Human-readable rendering of typed operation results.
//!
//! Programmatic consumers serialize the typed values directly; these
//! helpers produce the compact line formats shown to humans.

use crate::models::{Insight, KnowledgeBase, SearchResult, SubjectRelationEdge};
use crate::service::{KbOutcome, KbSearchOutcome, StoreOutcome};
use std::fmt::Write;

fn short_id(id: Option<&String>) -> &str {
    id.map_or("unknown", |id| id.get(..8).unwrap_or(id))
}

/// Renders the outcome of a store operation.
#[must_use]
pub fn render_store_outcome(outcome: &StoreOutcome) -> String {
    match outcome {
        StoreOutcome::NoInsights => "No insights extracted from text.".to_string(),
        StoreOutcome::Stored { ids } => {
            format!("Stored {} insight(s): {}", ids.len(), ids.join(", "))
        },
    }
}

/// Renders ranked search results as `[score] (frame) normalized` lines
/// with indented detail lines.
#[must_use]
pub fn render_search_results(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No matching insights found.".to_string();
    }
    let mut out = String::new();
    for result in results {
        let insight = &result.insight;
        let _ = writeln!(
            out,
            "[{:.3}] ({}) {}",
            result.score, insight.frame, insight.normalized_text
        );
        if insight.text != insight.normalized_text {
            let _ = writeln!(out, "  Original: {}", insight.text);
        }
        if !insight.domains.is_empty() {
            let _ = writeln!(out, "  Domains: {}", insight.domains.join(", "));
        }
    }
    out.trim_end().to_string()
}

/// Renders KB search results; `source` carries the page URL.
#[must_use]
pub fn render_kb_search_outcome(outcome: &KbSearchOutcome) -> String {
    match outcome {
        KbSearchOutcome::KbNotFound { name } => {
            format!("Knowledge base '{name}' not found.")
        },
        KbSearchOutcome::Results(results) => {
            if results.is_empty() {
                return "No matching content found in knowledge bases.".to_string();
            }
            let mut out = String::new();
            for result in results {
                let insight = &result.insight;
                let _ = writeln!(
                    out,
                    "[{:.3}] ({}) {}",
                    result.score, insight.frame, insight.normalized_text
                );
                if insight.text != insight.normalized_text {
                    let _ = writeln!(out, "  Original: {}", insight.text);
                }
                if !insight.source.is_empty() {
                    let _ = writeln!(out, "  Source: {}", insight.source);
                }
            }
            out.trim_end().to_string()
        },
    }
}

/// Renders an insight listing as `[id] (frame) normalized` lines.
#[must_use]
pub fn render_insight_list(insights: &[Insight], empty_message: &str) -> String {
    if insights.is_empty() {
        return empty_message.to_string();
    }
    let mut out = String::new();
    for insight in insights {
        let _ = writeln!(
            out,
            "[{}] ({}) {}",
            short_id(insight.id.as_ref()),
            insight.frame,
            insight.normalized_text
        );
        if !insight.domains.is_empty() {
            let _ = writeln!(out, "  Domains: {}", insight.domains.join(", "));
        }
    }
    out.trim_end().to_string()
}

/// Renders related insights with their relation weights.
#[must_use]
pub fn render_related_insights(results: &[SearchResult]) -> String {
    if results.is_empty() {
        return "No related insights found.".to_string();
    }
    let mut out = format!("Found {} related insight(s):\n", results.len());
    for result in results {
        let _ = writeln!(
            out,
            "- [{}] (score={:.3}) {}",
            result.insight.id.as_deref().unwrap_or("unknown"),
            result.score,
            result.insight.normalized_text
        );
    }
    out.trim_end().to_string()
}

/// Renders subject relation edges as
/// `(name:kind) --[type]--> (name:kind)` arrows.
#[must_use]
pub fn render_relation_edges(edges: &[SubjectRelationEdge]) -> String {
    if edges.is_empty() {
        return "No relations found for that subject.".to_string();
    }
    let mut out = format!("Found {} relation(s):\n", edges.len());
    for edge in edges {
        let _ = writeln!(
            out,
            "({}:{}) --[{}]--> ({}:{})",
            edge.from_name, edge.from_kind, edge.relation_type, edge.to_name, edge.to_kind
        );
    }
    out.trim_end().to_string()
}

/// Renders the outcome of creating a subject relation.
#[must_use]
pub fn render_relation_created(
    created: bool,
    from_name: &str,
    from_kind: &str,
    relation_type: &str,
    to_name: &str,
    to_kind: &str,
) -> String {
    if created {
        format!(
            "Created relation: ({from_name}:{from_kind}) --[{relation_type}]--> ({to_name}:{to_kind})"
        )
    } else {
        "Failed to create relation.".to_string()
    }
}

/// Renders a knowledge-base listing.
#[must_use]
pub fn render_kb_list(kbs: &[KnowledgeBase]) -> String {
    if kbs.is_empty() {
        return "No knowledge bases found.".to_string();
    }
    let mut out = String::new();
    for kb in kbs {
        let description = if kb.description.is_empty() {
            "(no description)"
        } else {
            &kb.description
        };
        let _ = writeln!(out, "- {}: {description} [{}]", kb.name, kb.source_type);
    }
    out.trim_end().to_string()
}

/// Renders the outcome of knowledge-base creation.
#[must_use]
pub fn render_kb_outcome(outcome: &KbOutcome) -> String {
    match outcome {
        KbOutcome::AlreadyExists { name } => {
            format!("Knowledge base '{name}' already exists.")
        },
        KbOutcome::Created {
            name,
            chunks,
            url,
            crawl_limit,
        } => crawl_limit.map_or_else(
            || format!("Created KB '{name}' with {chunks} chunks from {url}"),
            |limit| {
                format!(
                    "Created KB '{name}' with {chunks} chunks from {url} (crawled up to {limit} pages)"
                )
            },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Frame, SubjectKind, SubjectRelationType};

    fn sample_result(score: f32) -> SearchResult {
        let mut insight = Insight::new("raw text");
        insight.id = Some("0123456789abcdef".to_string());
        insight.normalized_text = "normalized text".to_string();
        insight.frame = Frame::Causal;
        insight.domains = vec!["node".to_string()];
        SearchResult { insight, score }
    }

    #[test]
    fn test_render_search_results() {
        let rendered = render_search_results(&[sample_result(0.912_3)]);
        assert!(rendered.starts_with("[0.912] (causal) normalized text"));
        assert!(rendered.contains("  Original: raw text"));
        assert!(rendered.contains("  Domains: node"));

        assert_eq!(render_search_results(&[]), "No matching insights found.");
    }

    #[test]
    fn test_render_insight_list_short_ids() {
        let mut insight = Insight::new("text");
        insight.id = Some("0123456789abcdef".to_string());
        insight.normalized_text = "n".to_string();
        let rendered = render_insight_list(&[insight], "No insights stored.");
        assert!(rendered.starts_with("[01234567] "));

        assert_eq!(render_insight_list(&[], "No insights stored."), "No insights stored.");
    }

    #[test]
    fn test_render_relation_edges() {
        let edge = SubjectRelationEdge {
            from_name: "memory leak".to_string(),
            from_kind: SubjectKind::Problem,
            to_name: "connection pooling".to_string(),
            to_kind: SubjectKind::Resolution,
            relation_type: SubjectRelationType::SolvedBy,
        };
        let rendered = render_relation_edges(&[edge]);
        assert!(rendered.contains(
            "(memory leak:problem) --[solved_by]--> (connection pooling:resolution)"
        ));
    }

    #[test]
    fn test_render_store_outcome() {
        assert_eq!(
            render_store_outcome(&StoreOutcome::NoInsights),
            "No insights extracted from text."
        );
        let rendered = render_store_outcome(&StoreOutcome::Stored {
            ids: vec!["a".to_string(), "b".to_string()],
        });
        assert_eq!(rendered, "Stored 2 insight(s): a, b");
    }

    #[test]
    fn test_render_kb_outcome() {
        let rendered = render_kb_outcome(&KbOutcome::Created {
            name: "docs".to_string(),
            chunks: 12,
            url: "https://example.com".to_string(),
            crawl_limit: Some(100),
        });
        assert!(rendered.contains("12 chunks"));
        assert!(rendered.contains("crawled up to 100 pages"));
    }
}
