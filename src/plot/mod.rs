//! SVG plots of the persisted tables

mod cluster;

pub use cluster::hierarchical_order;

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use plotters::prelude::*;

use crate::data::SampleMetadata;
use crate::diffexp::{Direction, SignificanceFilter, SubsetResult};
use crate::enrich::EnrichmentRow;
use crate::error::{PipelineError, Result};
use crate::explore::PcaRow;
use crate::io::DeTable;
use crate::model::DispersionRow;
use crate::transform::StabilizedMatrix;

const PALETTE: [RGBColor; 8] = [
    RGBColor(31, 119, 180),
    RGBColor(255, 127, 14),
    RGBColor(44, 160, 44),
    RGBColor(214, 39, 40),
    RGBColor(148, 103, 189),
    RGBColor(140, 86, 75),
    RGBColor(227, 119, 194),
    RGBColor(127, 127, 127),
];
const UP_COLOR: RGBColor = RGBColor(178, 24, 43);
const DOWN_COLOR: RGBColor = RGBColor(33, 102, 172);
const FONT: &str = "sans-serif";

fn plot_err<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::Plot {
        reason: e.to_string(),
    }
}

/// Range of finite values padded by 5% on each side
fn padded_range<I: IntoIterator<Item = f64>>(values: I) -> Option<(f64, f64)> {
    let (lo, hi) = values
        .into_iter()
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() {
        return None;
    }
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 1.0 };
    Some((lo - pad, hi + pad))
}

/// Linear blend between two colours, `t` clamped to [0, 1]
fn blend(a: RGBColor, b: RGBColor, t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let mix = |x: u8, y: u8| (x as f64 + (y as f64 - x as f64) * t).round() as u8;
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Blue-white-red scale for z-scores in [-limit, limit]
fn diverging(z: f64, limit: f64) -> RGBColor {
    let white = RGBColor(247, 247, 247);
    if z < 0.0 {
        blend(white, DOWN_COLOR, -z / limit)
    } else {
        blend(white, UP_COLOR, z / limit)
    }
}

/// Mean dispersion against mean normalized count, both log10
pub fn dispersion_plot(path: &Path, rows: &[DispersionRow]) -> Result<()> {
    let usable: Vec<&DispersionRow> = rows.iter().filter(|r| r.base_mean > 0.0).collect();
    let log10_pos = |v: f64| if v > 0.0 { v.log10() } else { f64::NAN };
    let (x0, x1) = padded_range(usable.iter().map(|r| r.base_mean.log10())).ok_or_else(|| {
        PipelineError::Plot {
            reason: "no genes with positive mean to plot".to_string(),
        }
    })?;
    let (y0, y1) = padded_range(
        usable
            .iter()
            .flat_map(|r| [log10_pos(r.gene_wise), log10_pos(r.final_disp)]),
    )
    .unwrap_or((-3.0, 1.0));

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Dispersion estimates", (FONT, 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("log10 mean of normalized counts")
        .y_desc("log10 dispersion")
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(usable.iter().filter(|r| r.gene_wise > 0.0).map(|r| {
            Circle::new((r.base_mean.log10(), r.gene_wise.log10()), 2, BLACK.mix(0.4).filled())
        }))
        .map_err(plot_err)?
        .label("gene-wise")
        .legend(|(x, y)| Circle::new((x, y), 3, BLACK.filled()));
    chart
        .draw_series(usable.iter().filter(|r| r.final_disp > 0.0).map(|r| {
            let style = if r.outlier {
                BLACK.stroke_width(1)
            } else {
                PALETTE[0].mix(0.6).filled()
            };
            Circle::new((r.base_mean.log10(), r.final_disp.log10()), 2, style)
        }))
        .map_err(plot_err)?
        .label("final")
        .legend(|(x, y)| Circle::new((x, y), 3, PALETTE[0].filled()));

    let mut trend: Vec<(f64, f64)> = usable
        .iter()
        .filter(|r| r.fitted > 0.0)
        .map(|r| (r.base_mean.log10(), r.fitted.log10()))
        .collect();
    trend.sort_by(|a, b| a.0.total_cmp(&b.0));
    chart
        .draw_series(LineSeries::new(trend, RED.stroke_width(2)))
        .map_err(plot_err)?
        .label("fitted")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 15, y)], RED));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Samples on PC1/PC2, coloured by one covariate
pub fn pca_plot(path: &Path, rows: &[PcaRow], metadata: &SampleMetadata, color_by: &str) -> Result<()> {
    let first = rows.first().ok_or_else(|| PipelineError::Plot {
        reason: "no PCA coordinates".to_string(),
    })?;
    let values = metadata.require_condition(color_by)?;
    let group_of: HashMap<&str, &str> = metadata
        .sample_ids()
        .iter()
        .zip(values)
        .map(|(s, v)| (s.as_str(), v.as_str()))
        .collect();
    let levels = metadata.levels(color_by).unwrap_or_default();

    let (x0, x1) = padded_range(rows.iter().map(|r| r.pc1)).unwrap_or((-1.0, 1.0));
    let (y0, y1) = padded_range(rows.iter().map(|r| r.pc2)).unwrap_or((-1.0, 1.0));

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(format!("PCA coloured by {}", color_by), (FONT, 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(x0..x1, y0..y1)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(format!("PC1: {:.0}% variance", first.pc1_percent_var))
        .y_desc(format!("PC2: {:.0}% variance", first.pc2_percent_var))
        .draw()
        .map_err(plot_err)?;

    for (i, level) in levels.iter().enumerate() {
        let color = PALETTE[i % PALETTE.len()];
        let points: Vec<(f64, f64)> = rows
            .iter()
            .filter(|r| group_of.get(r.sample_id.as_str()) == Some(&level.as_str()))
            .map(|r| (r.pc1, r.pc2))
            .collect();
        chart
            .draw_series(points.into_iter().map(|p| Circle::new(p, 5, color.filled())))
            .map_err(plot_err)?
            .label(level.as_str())
            .legend(move |(x, y)| Circle::new((x, y), 4, color.filled()));
    }
    chart
        .draw_series(rows.iter().map(|r| {
            Text::new(r.sample_id.clone(), (r.pc1, r.pc2), (FONT, 10).into_font())
        }))
        .map_err(plot_err)?;

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// log2 fold change against -log10 adjusted p-value with threshold lines
pub fn volcano_plot(path: &Path, table: &DeTable, filter: &SignificanceFilter, title: &str) -> Result<()> {
    let points: Vec<(f64, f64, Option<Direction>)> = table
        .rows
        .iter()
        .filter(|r| r.padj.is_finite() && r.log2_fold_change.is_finite())
        .map(|r| {
            let y = -r.padj.max(1e-300).log10();
            (r.log2_fold_change, y, filter.classify(r))
        })
        .collect();

    let lfc_limit = filter.abs_lfc_above * 1.5;
    let x_max = points
        .iter()
        .map(|p| p.0.abs())
        .fold(lfc_limit, f64::max)
        * 1.05;
    let y_line = -filter.padj_below.log10();
    let y_max = points.iter().map(|p| p.1).fold(y_line * 1.5, f64::max) * 1.05;

    let root = SVGBackend::new(path, (800, 600)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(-x_max..x_max, 0.0..y_max)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10 adjusted p-value")
        .draw()
        .map_err(plot_err)?;

    let color_of = |d: Option<Direction>| match d {
        Some(Direction::Up) => UP_COLOR.mix(0.8),
        Some(Direction::Down) => DOWN_COLOR.mix(0.8),
        None => RGBColor(160, 160, 160).mix(0.5),
    };
    chart
        .draw_series(
            points
                .iter()
                .map(|&(x, y, d)| Circle::new((x, y), 2, color_of(d).filled())),
        )
        .map_err(plot_err)?;

    let guide = BLACK.mix(0.6).stroke_width(1);
    chart
        .draw_series(LineSeries::new(vec![(-x_max, y_line), (x_max, y_line)], guide))
        .map_err(plot_err)?;
    for x in [-filter.abs_lfc_above, filter.abs_lfc_above] {
        chart
            .draw_series(LineSeries::new(vec![(x, 0.0), (x, y_max)], guide))
            .map_err(plot_err)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Number of significant genes for one subset and direction
#[derive(Debug, Clone, PartialEq)]
pub struct GeneCount {
    pub subset: String,
    pub direction: Direction,
    pub count: usize,
}

pub fn count_significant(results: &[SubsetResult], filter: &SignificanceFilter) -> Vec<GeneCount> {
    results
        .iter()
        .flat_map(|r| {
            Direction::ALL.into_iter().map(move |direction| GeneCount {
                subset: r.subset.clone(),
                direction,
                count: filter.select(&r.table, direction).len(),
            })
        })
        .collect()
}

/// Subsets in the configured order, then any others alphabetically
pub fn ordered_subsets(counts: &[GeneCount], order: &[String]) -> Vec<String> {
    let present: BTreeSet<&str> = counts.iter().map(|c| c.subset.as_str()).collect();
    let mut out: Vec<String> = order
        .iter()
        .filter(|s| present.contains(s.as_str()))
        .cloned()
        .collect();
    for s in present {
        if !order.iter().any(|o| o == s) {
            out.push(s.to_string());
        }
    }
    out
}

/// One point per (subset, direction) with the count of significant genes
pub fn gene_count_plot(path: &Path, counts: &[GeneCount], order: &[String]) -> Result<()> {
    let subsets = ordered_subsets(counts, order);
    if subsets.is_empty() {
        return Err(PipelineError::Plot {
            reason: "no subsets to plot".to_string(),
        });
    }
    let y_max = counts.iter().map(|c| c.count).max().unwrap_or(0).max(1) as f64 * 1.1;

    let root = SVGBackend::new(path, (800, 500)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Significant genes per subset", (FONT, 20))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d((0..subsets.len() as i32).into_segmented(), 0.0..y_max)
        .map_err(plot_err)?;
    let label = |v: &SegmentValue<i32>| match v {
        SegmentValue::CenterOf(i) | SegmentValue::Exact(i) => {
            subsets.get(*i as usize).cloned().unwrap_or_default()
        }
        SegmentValue::Last => String::new(),
    };
    chart
        .configure_mesh()
        .x_labels(subsets.len())
        .x_label_formatter(&label)
        .x_desc("subset")
        .y_desc("genes")
        .draw()
        .map_err(plot_err)?;

    for (direction, color) in [(Direction::Up, UP_COLOR), (Direction::Down, DOWN_COLOR)] {
        let points: Vec<(SegmentValue<i32>, f64)> = counts
            .iter()
            .filter(|c| c.direction == direction)
            .filter_map(|c| {
                subsets
                    .iter()
                    .position(|s| *s == c.subset)
                    .map(|i| (SegmentValue::CenterOf(i as i32), c.count as f64))
            })
            .collect();
        chart
            .draw_series(points.into_iter().map(|p| Circle::new(p, 6, color.filled())))
            .map_err(plot_err)?
            .label(direction.as_str())
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }
    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(())
}

/// Row-wise z-scores of the listed genes; genes absent or with zero variance are dropped
pub fn zscore_rows(stabilized: &StabilizedMatrix, genes: &[String]) -> (Vec<String>, Vec<Vec<f64>>) {
    let index: HashMap<&str, usize> = stabilized
        .gene_ids
        .iter()
        .enumerate()
        .map(|(i, g)| (g.as_str(), i))
        .collect();
    let mut names = Vec::new();
    let mut rows = Vec::new();
    for gene in genes {
        let Some(&i) = index.get(gene.as_str()) else {
            continue;
        };
        let row = stabilized.data.row(i);
        let n = row.len() as f64;
        let mean = row.sum() / n;
        let sd = (row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
        if sd.is_nan() || sd <= 0.0 {
            continue;
        }
        names.push(gene.clone());
        rows.push(row.iter().map(|v| (v - mean) / sd).collect());
    }
    (names, rows)
}

/// Clustered heatmap of per-gene z-scores with covariate bars above the samples.
/// Returns the number of genes drawn.
pub fn heatmap(
    path: &Path,
    stabilized: &StabilizedMatrix,
    genes: &[String],
    metadata: &SampleMetadata,
    annotate: &[String],
    title: &str,
) -> Result<usize> {
    let (names, z) = zscore_rows(stabilized, genes);
    if z.is_empty() {
        return Err(PipelineError::Plot {
            reason: format!("{}: no genes with non-zero variance", title),
        });
    }
    let n_samples = stabilized.n_samples();
    let row_order = hierarchical_order(&z);
    let columns: Vec<Vec<f64>> = (0..n_samples)
        .map(|j| z.iter().map(|r| r[j]).collect())
        .collect();
    let col_order = hierarchical_order(&columns);

    let n_rows = z.len();
    let n_bars = annotate.len();
    let show_genes = n_rows <= 60;
    let width = 300 + 30 * n_samples as u32;
    let height = (200 + 12 * (n_rows + n_bars) as u32).min(4000);

    let root = SVGBackend::new(path, (width, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let x_right = n_samples as f64 + if show_genes { 4.0 } else { 0.5 };
    let y_top = (n_rows + n_bars) as f64 + 0.5;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 18))
        .margin(10)
        .build_cartesian_2d(-0.2..x_right, -2.0..y_top)
        .map_err(plot_err)?;

    for (draw_row, &i) in row_order.iter().enumerate() {
        let y = (n_rows - 1 - draw_row) as f64;
        chart
            .draw_series(col_order.iter().enumerate().map(|(x, &j)| {
                let color = diverging(z[i][j].clamp(-2.5, 2.5), 2.5);
                Rectangle::new([(x as f64, y), (x as f64 + 1.0, y + 1.0)], color.filled())
            }))
            .map_err(plot_err)?;
        if show_genes {
            chart
                .draw_series(std::iter::once(Text::new(
                    names[i].clone(),
                    (n_samples as f64 + 0.2, y + 0.8),
                    (FONT, 10).into_font(),
                )))
                .map_err(plot_err)?;
        }
    }

    let sample_ids = &stabilized.sample_ids;
    for (k, covariate) in annotate.iter().enumerate() {
        let values = metadata.require_condition(covariate)?;
        let levels = metadata.levels(covariate).unwrap_or_default();
        let y = (n_rows + k) as f64 + 0.1;
        chart
            .draw_series(col_order.iter().enumerate().map(|(x, &j)| {
                let level = metadata
                    .sample_ids()
                    .iter()
                    .position(|s| *s == sample_ids[j])
                    .map(|p| values[p].as_str())
                    .unwrap_or_default();
                let li = levels.iter().position(|l| l == level).unwrap_or(0);
                let color = PALETTE[(li + 3 * k) % PALETTE.len()];
                Rectangle::new([(x as f64, y), (x as f64 + 1.0, y + 0.8)], color.filled())
            }))
            .map_err(plot_err)?;
        chart
            .draw_series(std::iter::once(Text::new(
                covariate.clone(),
                (n_samples as f64 + 0.2, y + 0.7),
                (FONT, 10).into_font(),
            )))
            .map_err(plot_err)?;
    }

    chart
        .draw_series(col_order.iter().enumerate().map(|(x, &j)| {
            Text::new(
                sample_ids[j].clone(),
                (x as f64 + 0.1, -0.3),
                (FONT, 10).into_font(),
            )
        }))
        .map_err(plot_err)?;
    root.present().map_err(plot_err)?;
    Ok(n_rows)
}

/// Ranked terms: x = -log10 adjusted p-value, colour = combined score, label = overlap
pub fn enrichment_dot_plot(path: &Path, terms: &[&EnrichmentRow], title: &str) -> Result<()> {
    if terms.is_empty() {
        return Err(PipelineError::Plot {
            reason: format!("{}: no terms to plot", title),
        });
    }
    let n = terms.len();
    let score = |r: &EnrichmentRow| -r.adjusted_pvalue.max(1e-300).log10();
    let x_max = terms.iter().map(|r| score(*r)).fold(1.0, f64::max) * 1.6;
    let (s_lo, s_hi) = terms
        .iter()
        .map(|r| r.combined_score)
        .filter(|s| s.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), s| (lo.min(s), hi.max(s)));
    let span = if s_hi > s_lo { s_hi - s_lo } else { 1.0 };

    let root = SVGBackend::new(path, (900, 80 + 40 * n as u32)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(title, (FONT, 18))
        .margin(15)
        .x_label_area_size(40)
        .y_label_area_size(20)
        .build_cartesian_2d(0.0..x_max, 0.0..(n as f64 + 0.5))
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .disable_y_axis()
        .disable_y_mesh()
        .x_desc("-log10 adjusted p-value")
        .draw()
        .map_err(plot_err)?;

    for (rank, row) in terms.iter().enumerate() {
        let y = (n - rank) as f64;
        let x = score(*row);
        let t = if row.combined_score.is_finite() {
            (row.combined_score - s_lo) / span
        } else {
            1.0
        };
        let color = blend(DOWN_COLOR, UP_COLOR, t);
        let mut label: String = row.term.chars().take(60).collect();
        label.push_str(&format!(" ({})", row.overlap));
        chart
            .draw_series(std::iter::once(Circle::new((x, y), 7, color.filled())))
            .map_err(plot_err)?;
        chart
            .draw_series(std::iter::once(Text::new(
                label,
                (x + x_max * 0.02, y + 0.15),
                (FONT, 11).into_font(),
            )))
            .map_err(plot_err)?;
    }
    root.present().map_err(plot_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::DeRow;
    use ndarray::array;
    use tempfile::tempdir;

    fn de_row(id: &str, lfc: f64, padj: f64) -> DeRow {
        DeRow {
            gene_id: id.to_string(),
            base_mean: 50.0,
            log2_fold_change: lfc,
            lfc_se: 0.2,
            stat: lfc / 0.2,
            pvalue: padj,
            padj,
        }
    }

    #[test]
    fn test_ordered_subsets() {
        let counts: Vec<GeneCount> = ["zeta", "8wpi", "alpha", "4wpi"]
            .iter()
            .map(|s| GeneCount {
                subset: s.to_string(),
                direction: Direction::Up,
                count: 1,
            })
            .collect();
        let order = vec!["4wpi".to_string(), "8wpi".to_string(), "12wpi".to_string()];
        assert_eq!(ordered_subsets(&counts, &order), vec!["4wpi", "8wpi", "alpha", "zeta"]);
    }

    #[test]
    fn test_count_significant() {
        let results = vec![SubsetResult {
            subset: "t1".into(),
            table: DeTable::new(vec![de_row("a", 2.0, 0.001), de_row("b", -2.0, 0.001), de_row("c", 2.0, 0.5)]),
        }];
        let counts = count_significant(&results, &SignificanceFilter::default());
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].count, 1);
        assert_eq!(counts[1].direction, Direction::Down);
    }

    #[test]
    fn test_zscore_rows_drops_flat_genes() {
        let m = StabilizedMatrix {
            data: array![[1.0, 2.0, 3.0], [5.0, 5.0, 5.0]],
            gene_ids: vec!["a".into(), "b".into()],
            sample_ids: vec!["s1".into(), "s2".into(), "s3".into()],
        };
        let (names, rows) = zscore_rows(&m, &["a".to_string(), "b".to_string(), "zz".to_string()]);
        assert_eq!(names, vec!["a"]);
        assert_eq!(rows[0], vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_volcano_writes_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volcano.svg");
        let table = DeTable::new(vec![de_row("a", 2.0, 0.001), de_row("b", -1.0, 0.3)]);
        volcano_plot(&path, &table, &SignificanceFilter::default(), "t1").unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
    }

    #[test]
    fn test_heatmap_requires_variable_genes() {
        let dir = tempdir().unwrap();
        let m = StabilizedMatrix {
            data: array![[5.0, 5.0]],
            gene_ids: vec!["flat".into()],
            sample_ids: vec!["s1".into(), "s2".into()],
        };
        let meta = SampleMetadata::new(vec!["s1".into(), "s2".into()]).unwrap();
        let err = heatmap(&dir.path().join("h.svg"), &m, &["flat".to_string()], &meta, &[], "t");
        assert!(matches!(err, Err(PipelineError::Plot { .. })));
    }
}
