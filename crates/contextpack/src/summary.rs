//! Rolling-summary bullet selection.

use gl_domain::session::SummaryBullet;
use gl_domain::vecmath::cosine_similarity;
use serde::Serialize;

/// How the bullets for this turn were chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Semantic,
    Recency,
}

/// Telemetry for one selection pass.
#[derive(Debug, Clone, Serialize)]
pub struct SelectionStats {
    pub mode: SelectionMode,
    pub considered: usize,
    pub selected: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_reason: Option<String>,
}

/// Remove exact-duplicate bullet texts, preserving first-seen order.
/// Idempotent: `dedupe(dedupe(xs)) == dedupe(xs)`.
pub fn dedupe_bullets(texts: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    texts
        .into_iter()
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Select up to `top_m` summary bullets.
///
/// Semantic mode ranks bullets by cosine similarity against the
/// question embedding; it requires the question embedding and an
/// embedding on every candidate bullet. When either is missing (the
/// usual cause is an embedding-call failure upstream) selection falls
/// back to recency — the last `top_m` bullets — and records why.
pub fn select_bullets(
    bullets: &[SummaryBullet],
    question_embedding: Option<&[f32]>,
    top_m: usize,
    semantic_enabled: bool,
) -> (Vec<String>, SelectionStats) {
    let considered = bullets.len();

    if semantic_enabled {
        match question_embedding {
            Some(question) if bullets.iter().all(|b| b.embedding.is_some()) => {
                let mut scored: Vec<(f32, &SummaryBullet)> = bullets
                    .iter()
                    .map(|b| {
                        let sim = cosine_similarity(
                            question,
                            b.embedding.as_deref().unwrap_or(&[]),
                        );
                        (sim, b)
                    })
                    .collect();
                scored.sort_by(|a, b| {
                    b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal)
                });
                let selected: Vec<String> = dedupe_bullets(
                    scored
                        .into_iter()
                        .take(top_m)
                        .map(|(_, b)| b.text.clone())
                        .collect(),
                );
                let stats = SelectionStats {
                    mode: SelectionMode::Semantic,
                    considered,
                    selected: selected.len(),
                    fallback_reason: None,
                };
                return (selected, stats);
            }
            Some(_) => {
                return recency_selection(
                    bullets,
                    top_m,
                    Some("missing_bullet_embeddings".into()),
                );
            }
            None => {
                return recency_selection(
                    bullets,
                    top_m,
                    Some("question_embedding_unavailable".into()),
                );
            }
        }
    }

    recency_selection(bullets, top_m, None)
}

fn recency_selection(
    bullets: &[SummaryBullet],
    top_m: usize,
    fallback_reason: Option<String>,
) -> (Vec<String>, SelectionStats) {
    let start = bullets.len().saturating_sub(top_m);
    let selected = dedupe_bullets(bullets[start..].iter().map(|b| b.text.clone()).collect());
    let stats = SelectionStats {
        mode: SelectionMode::Recency,
        considered: bullets.len(),
        selected: selected.len(),
        fallback_reason,
    };
    (selected, stats)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
