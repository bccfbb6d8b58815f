//! optimizer
//!
//! The SQL optimization subloop used by the Test agent.
//!
//! For each embedded query site, in stable order:
//!
//! 1. harvest the schema of the referenced tables
//! 2. ask the language model for N functionally identical candidates
//! 3. measure original and candidates under EXPLAIN ANALYZE
//! 4. select the cheapest candidate (cost, then runtime, then response
//!    order), keeping the original unless strictly cheaper
//! 5. hand the caller a rebuilt site slice for in-place replacement
//!
//! Site-level failures (no candidates, malformed model output, plan
//! errors) skip the site; they never fail the pipeline. Database or
//! model unavailability degrades the whole subloop to a no-op upstream.

pub mod extract;
pub mod splice;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::context::QuerySite;
use crate::core::types::{ErrorKind, ErrorRecord};
use crate::db::{DbError, PlanAnalyzer, PlanMetrics};
use crate::llm::LanguageModel;

/// Candidates requested per site.
pub const CANDIDATE_COUNT: usize = 3;

/// Measurement capability consumed by the subloop.
///
/// [`PlanAnalyzer`] is the production implementation; tests supply a
/// deterministic one.
#[async_trait]
pub trait QueryMeasurer: Send + Sync {
    /// Concatenated schema brief for the referenced tables.
    async fn schema_brief(&self, tables: &[String]) -> String;

    /// Planner cost and measured runtime for one query.
    async fn measure(&self, query: &str) -> Result<PlanMetrics, DbError>;
}

#[async_trait]
impl QueryMeasurer for PlanAnalyzer {
    async fn schema_brief(&self, tables: &[String]) -> String {
        PlanAnalyzer::schema_brief(self, tables).await
    }

    async fn measure(&self, query: &str) -> Result<PlanMetrics, DbError> {
        PlanAnalyzer::measure(self, query).await
    }
}

/// Why a site kept its original query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeepReason {
    /// The slice no longer contains a recognizable SQL literal.
    NoSqlLiteral,
    /// The model produced no usable candidates.
    NoCandidates,
    /// The original query itself failed to plan.
    OriginalPlanFailed,
    /// Every candidate failed to plan.
    NoViableCandidates,
    /// The best candidate was not strictly cheaper.
    NoImprovement,
}

/// Decision for one site.
#[derive(Debug, Clone)]
pub enum SiteDecision {
    /// Replace the site with `chosen_query`.
    Replace {
        original_query: String,
        chosen_query: String,
        original: PlanMetrics,
        chosen: PlanMetrics,
        improvement_rate: f64,
        candidates: Vec<String>,
    },
    /// Keep the original.
    Keep {
        reason: KeepReason,
        original_query: Option<String>,
        original: Option<PlanMetrics>,
        candidates: Vec<String>,
        /// Soft site-level failure, classified per the error taxonomy.
        error: Option<ErrorRecord>,
    },
}

/// Per-site report persisted in the Test agent cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteReport {
    pub file: String,
    pub symbol: String,
    pub line_start: usize,
    pub line_end: usize,
    pub original_query: Option<String>,
    pub chosen_query: Option<String>,
    pub original_cost: Option<f64>,
    pub chosen_cost: Option<f64>,
    pub original_time_ms: Option<f64>,
    pub chosen_time_ms: Option<f64>,
    pub improvement_rate: Option<f64>,
    pub candidates: Vec<String>,
    /// `optimized`, `no_improvement`, or a skip reason.
    pub outcome: String,
    /// Soft site-level failure, when the outcome is a skip.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

/// Relative planner-cost reduction, in percent.
pub fn improvement_rate(original_cost: f64, chosen_cost: f64) -> f64 {
    (original_cost - chosen_cost) / original_cost.max(1.0) * 100.0
}

/// Select the winning candidate among `measured` `(index, metrics)`.
///
/// Minimum total cost, tie-broken by actual runtime, then by response
/// order. Returns `None` when the best candidate is not strictly
/// cheaper than the original.
pub fn select_candidate(
    original: PlanMetrics,
    measured: &[(usize, PlanMetrics)],
) -> Option<(usize, PlanMetrics)> {
    let best = measured.iter().min_by(|(ai, a), (bi, b)| {
        a.total_cost
            .partial_cmp(&b.total_cost)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(
                a.actual_time_ms
                    .partial_cmp(&b.actual_time_ms)
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
            .then(ai.cmp(bi))
    })?;

    if best.1.total_cost < original.total_cost {
        Some(*best)
    } else {
        None
    }
}

/// The site slice without its indentation, plus the indent to restore.
///
/// The dedented form is valid standalone Python, which is what the
/// literal relocation parses.
pub(crate) fn dedented_slice(site: &QuerySite) -> Option<(String, String)> {
    let indent: String = site
        .original_text
        .lines()
        .next()?
        .chars()
        .take_while(|c| c.is_whitespace())
        .collect();
    Some((splice::deindent(&site.original_text, &indent), indent))
}

/// Evaluate one site against the model and the database.
pub async fn evaluate_site(
    llm: &dyn LanguageModel,
    db: &dyn QueryMeasurer,
    site: &QuerySite,
) -> SiteDecision {
    let span = dedented_slice(site)
        .and_then(|(bare, _)| extract::sql_literal_in_slice(&bare));
    let Some(span) = span else {
        return SiteDecision::Keep {
            reason: KeepReason::NoSqlLiteral,
            original_query: None,
            original: None,
            candidates: vec![],
            error: None,
        };
    };
    let original_query = span.content.clone();

    let schema = db.schema_brief(&site.referenced_tables).await;

    let candidates = match llm
        .suggest_queries(&schema, &original_query, &site.dialect, CANDIDATE_COUNT)
        .await
    {
        Ok(candidates) => candidates,
        Err(e) => {
            debug!(error = %e, "candidate generation failed, skipping site");
            return SiteDecision::Keep {
                reason: KeepReason::NoCandidates,
                original_query: Some(original_query),
                original: None,
                candidates: vec![],
                error: Some(
                    ErrorRecord::new(ErrorKind::LlmUnavailable, "no candidates generated")
                        .with_cause(e.to_string()),
                ),
            };
        }
    };

    let original = match db.measure(&original_query).await {
        Ok(metrics) => metrics,
        Err(e) => {
            debug!(error = %e, "original query failed to plan, skipping site");
            return SiteDecision::Keep {
                reason: KeepReason::OriginalPlanFailed,
                original_query: Some(original_query),
                original: None,
                candidates,
                error: Some(
                    ErrorRecord::new(ErrorKind::QueryParseFailed, "original query failed to plan")
                        .with_cause(e.to_string()),
                ),
            };
        }
    };

    let mut measured = Vec::new();
    for (index, candidate) in candidates.iter().enumerate() {
        match db.measure(candidate).await {
            Ok(metrics) => measured.push((index, metrics)),
            Err(e) => debug!(%candidate, error = %e, "candidate discarded"),
        }
    }

    if measured.is_empty() {
        return SiteDecision::Keep {
            reason: KeepReason::NoViableCandidates,
            original_query: Some(original_query),
            original: Some(original),
            candidates,
            error: Some(ErrorRecord::new(
                ErrorKind::QueryParseFailed,
                "every candidate failed to plan",
            )),
        };
    }

    match select_candidate(original, &measured) {
        Some((index, chosen)) => SiteDecision::Replace {
            chosen_query: candidates[index].clone(),
            improvement_rate: improvement_rate(original.total_cost, chosen.total_cost),
            original_query,
            original,
            chosen,
            candidates,
        },
        None => SiteDecision::Keep {
            reason: KeepReason::NoImprovement,
            original_query: Some(original_query),
            original: Some(original),
            candidates,
            error: None,
        },
    }
}

/// Rebuild the site slice with `chosen_query` substituted for the
/// original literal content.
///
/// Returns the de-indented replacement slice and the indent to restore,
/// ready for [`splice::splice_lines`]. `None` when the slice no longer
/// holds a SQL literal (the file changed under us).
pub fn build_replacement(site: &QuerySite, chosen_query: &str) -> Option<(String, String)> {
    let (bare, indent) = dedented_slice(site)?;
    let span = extract::sql_literal_in_slice(&bare)?;

    let mut replacement = String::with_capacity(bare.len());
    replacement.push_str(&bare[..span.content_start]);
    replacement.push_str(chosen_query);
    replacement.push_str(&bare[span.content_end..]);
    Some((replacement, indent))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockLanguageModel};
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Deterministic measurer keyed by query text.
    #[derive(Default)]
    struct MockMeasurer {
        metrics: Mutex<HashMap<String, PlanMetrics>>,
    }

    impl MockMeasurer {
        fn with(entries: &[(&str, f64, f64)]) -> Self {
            let metrics = entries
                .iter()
                .map(|(q, cost, time)| {
                    (
                        q.to_string(),
                        PlanMetrics {
                            total_cost: *cost,
                            actual_time_ms: *time,
                        },
                    )
                })
                .collect();
            Self {
                metrics: Mutex::new(metrics),
            }
        }
    }

    #[async_trait]
    impl QueryMeasurer for MockMeasurer {
        async fn schema_brief(&self, tables: &[String]) -> String {
            format!("tables: {}", tables.join(", "))
        }

        async fn measure(&self, query: &str) -> Result<PlanMetrics, DbError> {
            self.metrics
                .lock()
                .unwrap()
                .get(query)
                .copied()
                .ok_or_else(|| DbError::PlanFailed(format!("unknown query: {}", query)))
        }
    }

    fn site(slice: &str) -> QuerySite {
        QuerySite {
            file_path: PathBuf::from("/hub/app/repo.py"),
            symbol: "fetch".to_string(),
            line_start: 25,
            line_end: 25,
            original_text: slice.to_string(),
            dialect: "postgresql".to_string(),
            referenced_tables: vec!["users".to_string()],
        }
    }

    const SLICE: &str = "    rows = conn.execute(\"SELECT * FROM users\")";

    #[test]
    fn improvement_rate_matches_contract() {
        // The literal scenario: 37.8 -> 12.4 is about 67.2%.
        let rate = improvement_rate(37.8, 12.4);
        assert!((rate - 67.19).abs() < 0.1, "got {}", rate);
        // Guard against division blowups on tiny costs.
        assert_eq!(improvement_rate(0.5, 0.25), 25.0);
    }

    mod selection {
        use super::*;

        fn m(cost: f64, time: f64) -> PlanMetrics {
            PlanMetrics {
                total_cost: cost,
                actual_time_ms: time,
            }
        }

        #[test]
        fn min_cost_wins() {
            let chosen = select_candidate(
                m(37.8, 5.0),
                &[(0, m(20.0, 9.0)), (1, m(12.4, 3.0)), (2, m(30.0, 1.0))],
            )
            .unwrap();
            assert_eq!(chosen.0, 1);
        }

        #[test]
        fn runtime_breaks_cost_ties() {
            let chosen = select_candidate(
                m(37.8, 5.0),
                &[(0, m(12.4, 9.0)), (1, m(12.4, 3.0))],
            )
            .unwrap();
            assert_eq!(chosen.0, 1);
        }

        #[test]
        fn response_order_breaks_full_ties() {
            let chosen = select_candidate(
                m(37.8, 5.0),
                &[(0, m(12.4, 3.0)), (1, m(12.4, 3.0))],
            )
            .unwrap();
            assert_eq!(chosen.0, 0);
        }

        #[test]
        fn equal_cost_keeps_original() {
            assert!(select_candidate(m(12.4, 5.0), &[(0, m(12.4, 1.0))]).is_none());
            assert!(select_candidate(m(12.4, 5.0), &[(0, m(15.0, 1.0))]).is_none());
        }
    }

    #[tokio::test]
    async fn replace_decision_carries_metrics() {
        let llm = MockLanguageModel::new();
        llm.queue_queries(vec![
            "SELECT id, status FROM users",
            "SELECT * FROM users WHERE true",
        ]);
        let db = MockMeasurer::with(&[
            ("SELECT * FROM users", 37.8, 5.0),
            ("SELECT id, status FROM users", 12.4, 2.0),
            ("SELECT * FROM users WHERE true", 37.8, 5.0),
        ]);

        match evaluate_site(&llm, &db, &site(SLICE)).await {
            SiteDecision::Replace {
                chosen_query,
                original,
                chosen,
                improvement_rate,
                ..
            } => {
                assert_eq!(chosen_query, "SELECT id, status FROM users");
                assert_eq!(original.total_cost, 37.8);
                assert_eq!(chosen.total_cost, 12.4);
                assert!((improvement_rate - 67.19).abs() < 0.1);
            }
            other => panic!("expected Replace, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn malformed_model_output_skips_site() {
        let llm = MockLanguageModel::new();
        llm.queue_queries_error(LlmError::Malformed("prose".to_string()));
        let db = MockMeasurer::with(&[("SELECT * FROM users", 37.8, 5.0)]);

        match evaluate_site(&llm, &db, &site(SLICE)).await {
            SiteDecision::Keep { reason, error, .. } => {
                assert_eq!(reason, KeepReason::NoCandidates);
                assert_eq!(error.unwrap().kind, ErrorKind::LlmUnavailable);
            }
            other => panic!("expected Keep, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn original_plan_failure_skips_site() {
        let llm = MockLanguageModel::new();
        llm.queue_queries(vec!["SELECT id FROM users"]);
        // Measurer knows the candidate but not the original.
        let db = MockMeasurer::with(&[("SELECT id FROM users", 1.0, 1.0)]);

        match evaluate_site(&llm, &db, &site(SLICE)).await {
            SiteDecision::Keep { reason, error, .. } => {
                assert_eq!(reason, KeepReason::OriginalPlanFailed);
                assert_eq!(error.unwrap().kind, ErrorKind::QueryParseFailed);
            }
            other => panic!("expected Keep, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn all_candidates_discarded_keeps_original() {
        let llm = MockLanguageModel::new();
        llm.queue_queries(vec!["SELECT broken ("]);
        let db = MockMeasurer::with(&[("SELECT * FROM users", 37.8, 5.0)]);

        match evaluate_site(&llm, &db, &site(SLICE)).await {
            SiteDecision::Keep { reason, .. } => {
                assert_eq!(reason, KeepReason::NoViableCandidates)
            }
            other => panic!("expected Keep, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn no_improvement_keeps_original() {
        let llm = MockLanguageModel::new();
        llm.queue_queries(vec!["SELECT * FROM users WHERE true"]);
        let db = MockMeasurer::with(&[
            ("SELECT * FROM users", 12.0, 5.0),
            ("SELECT * FROM users WHERE true", 12.0, 5.0),
        ]);

        match evaluate_site(&llm, &db, &site(SLICE)).await {
            SiteDecision::Keep { reason, original, .. } => {
                assert_eq!(reason, KeepReason::NoImprovement);
                assert_eq!(original.unwrap().total_cost, 12.0);
            }
            other => panic!("expected Keep, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn slice_without_sql_is_skipped() {
        let llm = MockLanguageModel::new();
        let db = MockMeasurer::default();
        let decision = evaluate_site(&llm, &db, &site("    x = compute()")).await;
        match decision {
            SiteDecision::Keep { reason, .. } => assert_eq!(reason, KeepReason::NoSqlLiteral),
            other => panic!("expected Keep, got {:?}", other),
        }
        // The model must not be consulted at all.
        assert!(llm.calls().is_empty());
    }

    mod replacement {
        use super::*;

        #[test]
        fn substitutes_query_and_returns_indent() {
            let (replacement, indent) =
                build_replacement(&site(SLICE), "SELECT id FROM users").unwrap();
            assert_eq!(indent, "    ");
            assert_eq!(replacement, "rows = conn.execute(\"SELECT id FROM users\")");
        }

        #[test]
        fn splice_round_trip_preserves_surroundings() {
            let file = format!("import db\n\n{}\nprint('done')\n", SLICE);
            let s = site(SLICE);
            let (replacement, indent) =
                build_replacement(&s, "SELECT id FROM users").unwrap();
            let out = splice::splice_lines(&file, 3, 3, &replacement, &indent);
            assert_eq!(
                out,
                "import db\n\n    rows = conn.execute(\"SELECT id FROM users\")\nprint('done')\n"
            );
        }

        #[test]
        fn none_when_no_literal_left() {
            assert!(build_replacement(&site("    x = 1"), "SELECT 1").is_none());
        }
    }
}
