//! Local gene-set library read from GMT files
//!
//! Each database is one `<name>.gmt` file: one term per line, tab-separated as
//! term name, description, then member genes.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use statrs::distribution::{DiscreteCDF, Hypergeometric};

use super::{DatabaseTerms, EnrichmentService, TermResult};
use crate::error::{PipelineError, Result};
use crate::testing::benjamini_hochberg;

#[derive(Debug, Clone, PartialEq)]
pub struct GeneSet {
    pub name: String,
    pub genes: Vec<String>,
}

/// Parse GMT text; empty lines are skipped and duplicate members collapsed
pub fn parse_gmt(text: &str) -> Result<Vec<GeneSet>> {
    let mut sets = Vec::new();
    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let mut fields = line.split('\t');
        let name = fields.next().map(str::trim).unwrap_or_default();
        if name.is_empty() || fields.next().is_none() {
            return Err(PipelineError::Enrichment {
                reason: format!("GMT line {}: expected name, description and genes", line_no + 1),
            });
        }
        let mut seen = HashSet::new();
        let genes: Vec<String> = fields
            .map(str::trim)
            .filter(|g| !g.is_empty() && seen.insert(*g))
            .map(str::to_string)
            .collect();
        sets.push(GeneSet {
            name: name.to_string(),
            genes,
        });
    }
    Ok(sets)
}

/// Gene sets grouped by database name
#[derive(Debug, Clone, Default)]
pub struct GeneSetLibrary {
    databases: BTreeMap<String, Vec<GeneSet>>,
}

impl GeneSetLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_database(&mut self, name: &str, sets: Vec<GeneSet>) {
        self.databases.insert(name.to_string(), sets);
    }

    /// Load `<dir>/<database>.gmt` for every requested database
    pub fn load<P: AsRef<Path>>(dir: P, databases: &[String]) -> Result<Self> {
        let mut library = Self::new();
        for db in databases {
            let path = dir.as_ref().join(format!("{}.gmt", db));
            let text = std::fs::read_to_string(&path).map_err(|e| PipelineError::Enrichment {
                reason: format!("cannot read gene-set database {}: {}", path.display(), e),
            })?;
            let sets = parse_gmt(&text)?;
            log::info!("Loaded {} gene sets from {}", sets.len(), path.display());
            library.add_database(db, sets);
        }
        Ok(library)
    }

    pub fn database_names(&self) -> Vec<&str> {
        self.databases.keys().map(String::as_str).collect()
    }

    fn enrich_database(&self, database: &str, sets: &[GeneSet], genes: &[String]) -> Result<DatabaseTerms> {
        let universe: HashSet<&str> = sets
            .iter()
            .flat_map(|s| s.genes.iter().map(String::as_str))
            .collect();
        let query: HashSet<&str> = genes
            .iter()
            .map(String::as_str)
            .filter(|g| universe.contains(g))
            .collect();
        let population = universe.len() as u64;
        let draws = query.len() as u64;
        log::debug!(
            "{}: {} of {} query genes in a universe of {}",
            database,
            draws,
            genes.len(),
            population
        );

        let mut terms = Vec::new();
        for set in sets {
            let overlapping: Vec<String> = set
                .genes
                .iter()
                .filter(|g| query.contains(g.as_str()))
                .cloned()
                .collect();
            let k = overlapping.len() as u64;
            if k == 0 {
                continue;
            }
            let successes = set.genes.len() as u64;
            let pvalue = Hypergeometric::new(population, successes, draws)
                .map(|h| h.sf(k - 1))
                .map_err(|e| PipelineError::Enrichment {
                    reason: format!("{} / {}: {}", database, set.name, e),
                })?;

            let a = k as f64;
            let b = (draws - k) as f64;
            let c = (successes - k) as f64;
            let d = (population + k - successes - draws) as f64;
            let odds_ratio = ((a + 0.5) * (d + 0.5)) / ((b + 0.5) * (c + 0.5));

            terms.push(TermResult {
                term: set.name.clone(),
                overlap: format!("{}/{}", k, successes),
                pvalue,
                adjusted_pvalue: f64::NAN,
                odds_ratio,
                combined_score: odds_ratio * -pvalue.max(f64::MIN_POSITIVE).ln(),
                genes: overlapping,
            });
        }

        let pvalues: Vec<f64> = terms.iter().map(|t| t.pvalue).collect();
        for (term, q) in terms.iter_mut().zip(benjamini_hochberg(&pvalues)) {
            term.adjusted_pvalue = q;
        }
        terms.sort_by(|a, b| {
            a.adjusted_pvalue
                .total_cmp(&b.adjusted_pvalue)
                .then(a.pvalue.total_cmp(&b.pvalue))
        });

        Ok(DatabaseTerms {
            database: database.to_string(),
            terms,
        })
    }
}

impl EnrichmentService for GeneSetLibrary {
    fn enrich(&self, genes: &[String], databases: &[String]) -> Result<Vec<DatabaseTerms>> {
        databases
            .iter()
            .map(|db| {
                let sets = self.databases.get(db).ok_or_else(|| PipelineError::Enrichment {
                    reason: format!("unknown gene-set database '{}'", db),
                })?;
                self.enrich_database(db, sets, genes)
            })
            .collect()
    }
}
