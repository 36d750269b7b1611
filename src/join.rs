//! Joining of the gene annotation, barcode counts, and sample metadata into
//! long-format observations.
//!
//! Strains are matched to the gene containing their insertion position on the
//! same scaffold. Insertions outside a gene (intergenic) are excluded by
//! design, not by error; the drop counts are kept for diagnostics.

use crate::tables::CountTable;
use crate::{FitnessConfig, FitnessError, FitnessResult, Gene, Observation, Sample, Strain};
use std::collections::HashMap;

/// Row counts observed while joining, for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinDiagnostics {
    pub strains_in: usize,
    pub strains_joined: usize,
    /// Insertions on no gene (intergenic)
    pub strains_unmatched: usize,
    /// Insertions on a gene but outside its central fraction
    pub strains_noncentral: usize,
    /// Count columns with no metadata row
    pub columns_dropped: usize,
}

/// The unified per-(strain, sample) record set
#[derive(Debug, Clone)]
pub struct JoinedData {
    pub genes: Vec<Gene>,
    pub strains: Vec<Strain>,
    pub samples: Vec<Sample>,
    pub observations: Vec<Observation>,
    pub diagnostics: JoinDiagnostics,
}

/// Per-scaffold containment lookup over genes sorted by begin
struct GeneLookup {
    /// scaffold -> (gene indices sorted by begin, max gene length)
    by_scaffold: HashMap<String, (Vec<usize>, u32)>,
}

impl GeneLookup {
    fn new(genes: &[Gene]) -> Self {
        let mut by_scaffold: HashMap<String, (Vec<usize>, u32)> = HashMap::new();

        for (idx, gene) in genes.iter().enumerate() {
            let entry = by_scaffold
                .entry(gene.scaffold.clone())
                .or_insert_with(|| (Vec::new(), 0));
            entry.0.push(idx);
            entry.1 = entry.1.max(gene.end.saturating_sub(gene.begin));
        }

        for (sorted, _) in by_scaffold.values_mut() {
            sorted.sort_by_key(|&idx| (genes[idx].begin, genes[idx].end, idx));
        }

        Self { by_scaffold }
    }

    /// Find the first gene containing `position` on `scaffold`
    fn find(&self, genes: &[Gene], scaffold: &str, position: u32) -> Option<usize> {
        let (sorted, max_len) = self.by_scaffold.get(scaffold)?;

        // Genes starting after the position cannot contain it; walk backward
        // from there, bounded by the longest gene on the scaffold.
        let upper = sorted.partition_point(|&idx| genes[idx].begin <= position);
        let lower_bound = position.saturating_sub(*max_len);

        let mut found = None;
        for &idx in sorted[..upper].iter().rev() {
            let gene = &genes[idx];
            if gene.begin < lower_bound {
                break;
            }
            if gene.begin <= position && position <= gene.end {
                found = Some(idx);
            }
        }

        found
    }
}

/// Fraction of the gene length at which the insertion sits
fn insertion_fraction(gene: &Gene, position: u32) -> f64 {
    let length = gene.end.saturating_sub(gene.begin);
    if length == 0 {
        return 0.5;
    }
    (position.saturating_sub(gene.begin)) as f64 / length as f64
}

/// Merge the three input tables into one long-format record set.
///
/// Genes flagged non-central are dropped before the join; joined insertions
/// are restricted to the configured central fraction of their gene's length.
pub fn join_tables(
    genes: Vec<Gene>,
    counts: CountTable,
    samples: Vec<Sample>,
    config: &FitnessConfig,
) -> FitnessResult<JoinedData> {
    // Central flag filtering applies only when the annotation carries the flag
    let genes: Vec<Gene> = genes
        .into_iter()
        .filter(|gene| gene.central != Some(false))
        .collect();

    if genes.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "no gene passed the central flag filter".to_string(),
        ));
    }

    let lookup = GeneLookup::new(&genes);

    let sample_by_filename: HashMap<&str, usize> = samples
        .iter()
        .enumerate()
        .map(|(idx, sample)| (sample.filename.as_str(), idx))
        .collect();

    // Map count columns onto metadata rows; a metadata sample without a count
    // column is a schema error, an extra count column is dropped with a warning.
    let mut kept_columns: Vec<(usize, usize)> = Vec::new();
    let mut columns_dropped = 0;
    for (col_idx, name) in counts.sample_names.iter().enumerate() {
        match sample_by_filename.get(name.as_str()) {
            Some(&sample_idx) => kept_columns.push((col_idx, sample_idx)),
            None => {
                log::warn!("count column '{}' has no metadata row, dropping it", name);
                columns_dropped += 1;
            }
        }
    }

    let named_columns: std::collections::HashSet<&str> =
        counts.sample_names.iter().map(|s| s.as_str()).collect();
    for sample in &samples {
        if !named_columns.contains(sample.filename.as_str()) {
            return Err(FitnessError::MissingColumn {
                table: "count".to_string(),
                column: sample.filename.clone(),
            });
        }
    }

    let mut diagnostics = JoinDiagnostics {
        strains_in: counts.strains.len(),
        columns_dropped,
        ..JoinDiagnostics::default()
    };

    let mut strains = Vec::new();
    let mut observations = Vec::new();

    for (raw, row) in counts.strains.iter().zip(&counts.counts) {
        let gene_idx = match lookup.find(&genes, &raw.scaffold, raw.position) {
            Some(idx) => idx,
            None => {
                diagnostics.strains_unmatched += 1;
                continue;
            }
        };

        let fraction = insertion_fraction(&genes[gene_idx], raw.position);
        if fraction < config.central_min_frac || fraction > config.central_max_frac {
            diagnostics.strains_noncentral += 1;
            continue;
        }

        let strain_idx = strains.len();
        strains.push(Strain {
            barcode: raw.barcode.clone(),
            scaffold: raw.scaffold.clone(),
            position: raw.position,
            gene: gene_idx,
        });

        for &(col_idx, sample_idx) in &kept_columns {
            observations.push(Observation {
                strain: strain_idx,
                sample: sample_idx,
                counts: row[col_idx],
            });
        }
    }

    diagnostics.strains_joined = strains.len();

    log::info!(
        "Joined {} of {} barcodes to genes ({} intergenic, {} non-central)",
        diagnostics.strains_joined,
        diagnostics.strains_in,
        diagnostics.strains_unmatched,
        diagnostics.strains_noncentral
    );

    if observations.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "no insertion matched a gene".to_string(),
        ));
    }

    Ok(JoinedData {
        genes,
        strains,
        samples,
        observations,
        diagnostics,
    })
}
