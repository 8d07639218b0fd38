//! Gene-set enrichment of each subset's significant genes

mod library;

pub use library::{parse_gmt, GeneSet, GeneSetLibrary};

use serde::{Deserialize, Serialize};

use crate::diffexp::{Direction, SignificanceFilter, SubsetResult};
use crate::error::Result;
use crate::io::Record;

/// One enriched term returned by a service
#[derive(Debug, Clone, PartialEq)]
pub struct TermResult {
    pub term: String,
    /// "k/K": query genes in the term over term size
    pub overlap: String,
    pub pvalue: f64,
    pub adjusted_pvalue: f64,
    pub odds_ratio: f64,
    pub combined_score: f64,
    pub genes: Vec<String>,
}

/// Terms of one database for one query
#[derive(Debug, Clone, PartialEq)]
pub struct DatabaseTerms {
    pub database: String,
    pub terms: Vec<TermResult>,
}

/// Answers enrichment queries for a gene list against named databases
pub trait EnrichmentService {
    fn enrich(&self, genes: &[String], databases: &[String]) -> Result<Vec<DatabaseTerms>>;
}

/// A row of the combined enrichment table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichmentRow {
    pub index: usize,
    #[serde(rename = "Term")]
    pub term: String,
    #[serde(rename = "Overlap")]
    pub overlap: String,
    #[serde(rename = "P-value")]
    pub pvalue: f64,
    #[serde(rename = "Adjusted P-value")]
    pub adjusted_pvalue: f64,
    #[serde(rename = "Odds Ratio")]
    pub odds_ratio: f64,
    #[serde(rename = "Combined Score")]
    pub combined_score: f64,
    /// Overlapping genes joined with ';'
    #[serde(rename = "Genes")]
    pub genes: String,
    pub subset: String,
    pub direction: Direction,
    pub database: String,
}

impl Record for EnrichmentRow {
    const COLUMNS: &'static [&'static str] = &[
        "index",
        "Term",
        "Overlap",
        "P-value",
        "Adjusted P-value",
        "Odds Ratio",
        "Combined Score",
        "Genes",
        "subset",
        "direction",
        "database",
    ];
}

/// An enrichment call that failed; the other calls still ran
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentFailure {
    pub subset: String,
    pub direction: Direction,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnrichmentReport {
    pub rows: Vec<EnrichmentRow>,
    pub failures: Vec<EnrichmentFailure>,
}

/// Query `service` for every subset (in order) and direction (up, then down).
///
/// Empty gene lists are skipped without a call. A failed call is recorded in
/// `failures` and does not stop the remaining calls.
pub fn enrich_subsets<S: EnrichmentService + ?Sized>(
    results: &[SubsetResult],
    service: &S,
    databases: &[String],
    filter: &SignificanceFilter,
) -> EnrichmentReport {
    let mut report = EnrichmentReport::default();

    for result in results {
        for direction in Direction::ALL {
            let genes = filter.select(&result.table, direction);
            if genes.is_empty() {
                log::info!("Subset {} {}: no significant genes, skipping", result.subset, direction);
                continue;
            }
            log::info!(
                "Subset {} {}: querying {} genes against {} databases",
                result.subset,
                direction,
                genes.len(),
                databases.len()
            );

            match service.enrich(&genes, databases) {
                Ok(tables) => {
                    for table in tables {
                        for term in table.terms {
                            report.rows.push(EnrichmentRow {
                                index: report.rows.len(),
                                term: term.term,
                                overlap: term.overlap,
                                pvalue: term.pvalue,
                                adjusted_pvalue: term.adjusted_pvalue,
                                odds_ratio: term.odds_ratio,
                                combined_score: term.combined_score,
                                genes: term.genes.join(";"),
                                subset: result.subset.clone(),
                                direction,
                                database: table.database.clone(),
                            });
                        }
                    }
                }
                Err(e) => {
                    log::warn!("Enrichment for subset {} {} failed: {}", result.subset, direction, e);
                    report.failures.push(EnrichmentFailure {
                        subset: result.subset.clone(),
                        direction,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
    report
}

/// Top `n` terms of one (subset, direction, database) by adjusted p-value
pub fn top_terms<'a>(
    rows: &'a [EnrichmentRow],
    subset: &str,
    direction: Direction,
    database: &str,
    n: usize,
) -> Vec<&'a EnrichmentRow> {
    let mut selected: Vec<&EnrichmentRow> = rows
        .iter()
        .filter(|r| r.subset == subset && r.direction == direction && r.database == database)
        .collect();
    selected.sort_by(|a, b| a.adjusted_pvalue.total_cmp(&b.adjusted_pvalue));
    selected.truncate(n);
    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::io::{DeRow, DeTable};
    use std::cell::RefCell;

    struct FakeService {
        calls: RefCell<Vec<Vec<String>>>,
        fail_on: Option<String>,
    }

    impl EnrichmentService for FakeService {
        fn enrich(&self, genes: &[String], databases: &[String]) -> Result<Vec<DatabaseTerms>> {
            assert!(!genes.is_empty());
            self.calls.borrow_mut().push(genes.to_vec());
            if self.fail_on.as_deref() == genes.first().map(String::as_str) {
                return Err(PipelineError::Enrichment {
                    reason: "service unavailable".to_string(),
                });
            }
            Ok(databases
                .iter()
                .map(|db| DatabaseTerms {
                    database: db.clone(),
                    terms: vec![TermResult {
                        term: format!("term for {}", genes[0]),
                        overlap: format!("{}/10", genes.len()),
                        pvalue: 0.001,
                        adjusted_pvalue: 0.01,
                        odds_ratio: 5.0,
                        combined_score: 34.5,
                        genes: genes.to_vec(),
                    }],
                })
                .collect())
        }
    }

    fn row(id: &str, lfc: f64) -> DeRow {
        DeRow {
            gene_id: id.to_string(),
            base_mean: 100.0,
            log2_fold_change: lfc,
            lfc_se: 0.1,
            stat: lfc * 10.0,
            pvalue: 1e-4,
            padj: 1e-3,
        }
    }

    fn subsets() -> Vec<SubsetResult> {
        vec![
            SubsetResult {
                subset: "t1".into(),
                table: DeTable::new(vec![row("up1", 2.0), row("up2", 1.5)]),
            },
            SubsetResult {
                subset: "t2".into(),
                table: DeTable::new(vec![row("up3", 3.0), row("down1", -2.0)]),
            },
        ]
    }

    #[test]
    fn test_empty_lists_are_skipped() {
        let service = FakeService {
            calls: RefCell::new(Vec::new()),
            fail_on: None,
        };
        let dbs = vec!["DB1".to_string(), "DB2".to_string()];
        let report = enrich_subsets(&subsets(), &service, &dbs, &SignificanceFilter::default());

        // t1 has no down genes: three calls, not four
        assert_eq!(service.calls.borrow().len(), 3);
        assert_eq!(report.rows.len(), 6);
        assert!(report.failures.is_empty());
        let indices: Vec<usize> = report.rows.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..6).collect::<Vec<_>>());
        assert_eq!(report.rows[0].subset, "t1");
        assert_eq!(report.rows[0].direction, Direction::Up);
        assert_eq!(report.rows[5].direction, Direction::Down);
        assert_eq!(report.rows[5].database, "DB2");
        assert_eq!(report.rows[0].genes, "up1;up2");
    }

    #[test]
    fn test_failed_call_does_not_abort() {
        let service = FakeService {
            calls: RefCell::new(Vec::new()),
            fail_on: Some("up3".to_string()),
        };
        let dbs = vec!["DB1".to_string()];
        let report = enrich_subsets(&subsets(), &service, &dbs, &SignificanceFilter::default());
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].subset, "t2");
        assert_eq!(report.rows.len(), 2);
        assert_eq!(report.rows[1].index, 1);
    }

    #[test]
    fn test_top_terms() {
        let mut rows = Vec::new();
        for (i, q) in [0.3, 0.01, 0.2].iter().enumerate() {
            rows.push(EnrichmentRow {
                index: i,
                term: format!("T{}", i),
                overlap: "1/5".into(),
                pvalue: q / 2.0,
                adjusted_pvalue: *q,
                odds_ratio: 1.0,
                combined_score: 1.0,
                genes: String::new(),
                subset: "t1".into(),
                direction: Direction::Up,
                database: "DB".into(),
            });
        }
        let top = top_terms(&rows, "t1", Direction::Up, "DB", 2);
        let names: Vec<&str> = top.iter().map(|r| r.term.as_str()).collect();
        assert_eq!(names, vec!["T1", "T2"]);
    }
}
