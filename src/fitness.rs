//! Strain- and gene-level fitness estimation.
//!
//! Strain fitness is a pseudocount-stabilized log2 ratio of post-selection to
//! time-zero counts; gene fitness is the inverse-variance-weighted mean over
//! the gene's strains, with per-strain weights capped so that a handful of
//! deeply sequenced strains cannot dominate the average.

use crate::join::JoinedData;
use crate::stats::{median, weighted_mean};
use crate::{FitnessConfig, FitnessError, FitnessResult, StrainMeasure};
use std::collections::{HashMap, HashSet};

/// ln(2)^2, the scale factor turning count variances into log2 units
const LN2_SQUARED: f64 = std::f64::consts::LN_2 * std::f64::consts::LN_2;

/// Poisson-motivated variance of the log2 ratio of two counts
pub fn count_variance(n: f64, n0: f64) -> f64 {
    (1.0 / (1.0 + n) + 1.0 / (1.0 + n0)) / LN2_SQUARED
}

/// Pseudocount-stabilized log2 fitness of a single strain
pub fn strain_fitness_value(n: f64, pseudocount: f64, n0: f64) -> f64 {
    (n + pseudocount.sqrt()).log2() - (n0 + (1.0 / pseudocount).sqrt()).log2()
}

/// Ceiling on per-strain weights, 1/Var(cap, cap)
pub fn weight_cap(config: &FitnessConfig) -> f64 {
    1.0 / count_variance(config.weight_cap_reads, config.weight_cap_reads)
}

/// Pseudocount strategy for one gene.
///
/// Genes with few strains get the global read ratio uniformly; genes with
/// enough strains get a per-sample factor incorporating a first-pass estimate
/// of the gene's own fold-change.
#[derive(Debug, Clone, PartialEq)]
pub enum PseudocountModel {
    FixedFactor(f64),
    /// sample index -> pseudocount factor
    EstimatedFactor(HashMap<usize, f64>),
}

impl PseudocountModel {
    /// Pseudocount for the gene in the given sample
    pub fn factor(&self, sample: usize) -> Option<f64> {
        match self {
            PseudocountModel::FixedFactor(p) => Some(*p),
            PseudocountModel::EstimatedFactor(factors) => factors.get(&sample).copied(),
        }
    }
}

/// One strain observation with its fitness and weight
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrainFitness {
    pub strain: usize,
    pub sample: usize,
    pub counts: f64,
    pub n0: f64,
    pub fitness: f64,
    pub weight: f64,
}

/// The fitness estimate for the whole data set
#[derive(Debug, Clone)]
pub struct FitnessTable {
    pub strain_fitness: Vec<StrainFitness>,
    /// (gene, sample) -> weighted mean of strain fitness
    pub gene_fitness: HashMap<(usize, usize), f64>,
    /// Distinct strains per gene over the whole filtered data set
    pub strains_per_gene: HashMap<usize, usize>,
    /// Global post-selection to time-zero count ratio
    pub read_ratio: f64,
}

/// Count distinct strains per gene over the filtered data set
pub fn count_strains_per_gene(
    data: &JoinedData,
    measures: &[StrainMeasure],
) -> HashMap<usize, usize> {
    let mut per_gene: HashMap<usize, HashSet<usize>> = HashMap::new();
    for measure in measures {
        let gene = data.strains[measure.strain].gene;
        per_gene.entry(gene).or_default().insert(measure.strain);
    }

    per_gene
        .into_iter()
        .map(|(gene, strains)| (gene, strains.len()))
        .collect()
}

/// Select the pseudocount strategy for every gene.
///
/// Genes with `< min_strains_for_estimate` strains use the global read ratio.
/// Genes at or above the boundary get a preliminary per-strain fitness at
/// pseudocount 1, the per-(gene, sample) median of which - centered by its
/// global median - scales the read ratio per sample.
pub fn select_pseudocount_models(
    data: &JoinedData,
    measures: &[StrainMeasure],
    strains_per_gene: &HashMap<usize, usize>,
    read_ratio: f64,
    config: &FitnessConfig,
) -> FitnessResult<HashMap<usize, PseudocountModel>> {
    let estimated_genes: HashSet<usize> = strains_per_gene
        .iter()
        .filter(|(_, &count)| count >= config.min_strains_for_estimate)
        .map(|(&gene, _)| gene)
        .collect();

    // First pass at pseudocount 1 for the estimated regime
    let mut preliminary: HashMap<(usize, usize), Vec<f64>> = HashMap::new();
    for measure in measures {
        let gene = data.strains[measure.strain].gene;
        if estimated_genes.contains(&gene) {
            preliminary
                .entry((gene, measure.sample))
                .or_default()
                .push(strain_fitness_value(measure.counts, 1.0, measure.n0));
        }
    }

    let mut provisional: HashMap<(usize, usize), f64> = HashMap::new();
    for ((gene, sample), values) in &preliminary {
        let value = median(values).ok_or_else(|| {
            FitnessError::UndefinedStatistic(
                "preliminary gene fitness on an empty strain set".to_string(),
            )
        })?;
        provisional.insert((*gene, *sample), value);
    }

    // Center the provisional estimates at zero across all genes and samples
    let global_median = if provisional.is_empty() {
        0.0
    } else {
        let values: Vec<f64> = provisional.values().copied().collect();
        median(&values).ok_or_else(|| {
            FitnessError::UndefinedStatistic("global median of preliminary fitness".to_string())
        })?
    };

    let mut factors_by_gene: HashMap<usize, HashMap<usize, f64>> = HashMap::new();
    for (&(gene, sample), &value) in &provisional {
        factors_by_gene
            .entry(gene)
            .or_default()
            .insert(sample, (value - global_median).exp2() * read_ratio);
    }

    let mut models: HashMap<usize, PseudocountModel> = HashMap::new();
    for &gene in strains_per_gene.keys() {
        if estimated_genes.contains(&gene) {
            let factors = factors_by_gene.remove(&gene).unwrap_or_default();
            models.insert(gene, PseudocountModel::EstimatedFactor(factors));
        } else {
            models.insert(gene, PseudocountModel::FixedFactor(read_ratio));
        }
    }

    Ok(models)
}

/// Compute strain fitness, weights, and weighted gene fitness
pub fn estimate_fitness(
    data: &JoinedData,
    measures: &[StrainMeasure],
    config: &FitnessConfig,
) -> FitnessResult<FitnessTable> {
    let strains_per_gene = count_strains_per_gene(data, measures);

    let sum_after: f64 = measures.iter().map(|m| m.counts).sum();
    let sum_n0: f64 = measures.iter().map(|m| m.n0).sum();
    if sum_after <= 0.0 {
        return Err(FitnessError::UndefinedStatistic(
            "total post-selection read count is zero".to_string(),
        ));
    }
    let read_ratio = sum_after / sum_n0;

    let models = select_pseudocount_models(data, measures, &strains_per_gene, read_ratio, config)?;
    let w_max = weight_cap(config);

    let mut strain_fitness = Vec::with_capacity(measures.len());
    let mut group_values: HashMap<(usize, usize), (Vec<f64>, Vec<f64>)> = HashMap::new();

    for measure in measures {
        let gene = data.strains[measure.strain].gene;
        let pseudocount = models
            .get(&gene)
            .and_then(|model| model.factor(measure.sample))
            .ok_or_else(|| {
                FitnessError::UndefinedStatistic(format!(
                    "no pseudocount for gene '{}'",
                    data.genes[gene].locus_id
                ))
            })?;

        let fitness = strain_fitness_value(measure.counts, pseudocount, measure.n0);
        let weight = (1.0 / count_variance(measure.counts, measure.n0)).min(w_max);

        strain_fitness.push(StrainFitness {
            strain: measure.strain,
            sample: measure.sample,
            counts: measure.counts,
            n0: measure.n0,
            fitness,
            weight,
        });

        let entry = group_values.entry((gene, measure.sample)).or_default();
        entry.0.push(fitness);
        entry.1.push(weight);
    }

    let mut gene_fitness = HashMap::with_capacity(group_values.len());
    for ((gene, sample), (values, weights)) in &group_values {
        let mean = weighted_mean(values, weights).ok_or_else(|| {
            FitnessError::UndefinedStatistic(format!(
                "gene fitness for '{}' has zero total weight",
                data.genes[*gene].locus_id
            ))
        })?;
        gene_fitness.insert((*gene, *sample), mean);
    }

    log::info!(
        "Estimated fitness for {} strain observations across {} genes (read ratio {:.4})",
        strain_fitness.len(),
        strains_per_gene.len(),
        read_ratio
    );

    Ok(FitnessTable {
        strain_fitness,
        gene_fitness,
        strains_per_gene,
        read_ratio,
    })
}
