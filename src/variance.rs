//! Noise model and significance testing.
//!
//! A prior gene variance is estimated from the spread between the two halves
//! of well-covered genes, scaled per gene by its count depth, combined with
//! the empirical residual variance of the gene's strains, and turned into a
//! t-like statistic against a fixed threshold.

use crate::fitness::{count_variance, FitnessTable};
use crate::join::JoinedData;
use crate::normalize::NormalizedTable;
use crate::stats::median;
use crate::{FitnessConfig, FitnessError, FitnessResult};
use std::collections::{HashMap, HashSet};

/// Normal-consistency constant relating a median absolute difference to a
/// standard deviation
const MAD_TO_SD: f64 = 0.674;

/// Significance scores for one gene in one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneScore {
    pub sum_counts: f64,
    pub sum_n0: f64,
    /// Naive count variance of the gene's summed reads
    pub vn: f64,
    /// Empirical residual variance plus the scaled prior
    pub ve: f64,
    pub t: f64,
    pub significant: bool,
}

/// Output of the noise model
#[derive(Debug, Clone)]
pub struct SignificanceTable {
    /// (gene, sample) -> scores
    pub scores: HashMap<(usize, usize), GeneScore>,
    /// Median absolute half-gene fitness difference
    pub mad12: f64,
    /// Prior gene variance derived from mad12
    pub prior_variance: f64,
}

#[derive(Default)]
struct SideAggregate {
    left_values: Vec<f64>,
    right_values: Vec<f64>,
    /// n0 per distinct strain; replicate samples must not multi-count a strain
    left_n0: HashMap<usize, f64>,
    right_n0: HashMap<usize, f64>,
}

/// Absolute half-gene fitness differences per (gene, condition), and the set
/// of pairs with at least `side_min_n0` reference reads on each side.
///
/// Uses the original (pre-normalization) strain fitness. Pairs failing the
/// coverage requirement are excluded from the prior estimate only; their
/// genes still receive fitness scores.
pub fn half_gene_differences(
    data: &JoinedData,
    fitness: &FitnessTable,
    config: &FitnessConfig,
) -> (Vec<f64>, HashSet<(usize, String)>) {
    let mut aggregates: HashMap<(usize, String), SideAggregate> = HashMap::new();

    for row in &fitness.strain_fitness {
        let strain = &data.strains[row.strain];
        let gene = &data.genes[strain.gene];
        let condition = data.samples[row.sample].condition.clone();

        let aggregate = aggregates.entry((strain.gene, condition)).or_default();
        if (strain.position as f64) <= gene.middle() {
            aggregate.left_values.push(row.fitness);
            aggregate.left_n0.insert(row.strain, row.n0);
        } else {
            aggregate.right_values.push(row.fitness);
            aggregate.right_n0.insert(row.strain, row.n0);
        }
    }

    let mut diffs = Vec::new();
    let mut qualifying = HashSet::new();

    for ((gene, condition), aggregate) in aggregates {
        let left_total: f64 = aggregate.left_n0.values().sum();
        let right_total: f64 = aggregate.right_n0.values().sum();
        if left_total < config.side_min_n0 || right_total < config.side_min_n0 {
            continue;
        }

        let (left_median, right_median) = match (
            median(&aggregate.left_values),
            median(&aggregate.right_values),
        ) {
            (Some(left), Some(right)) => (left, right),
            _ => continue,
        };

        diffs.push((right_median - left_median).abs());
        qualifying.insert((gene, condition));
    }

    (diffs, qualifying)
}

/// Estimate the noise model and compute t statistics and significance calls
pub fn test_significance(
    data: &JoinedData,
    fitness: &FitnessTable,
    normalized: &NormalizedTable,
    config: &FitnessConfig,
) -> FitnessResult<SignificanceTable> {
    let (diffs, qualifying) = half_gene_differences(data, fitness, config);

    let mad12 = median(&diffs).ok_or_else(|| {
        FitnessError::UndefinedStatistic(
            "no gene has enough reference reads on both halves to estimate the variance prior"
                .to_string(),
        )
    })?;
    let prior_variance = (mad12 * mad12) / ((2.0 * MAD_TO_SD) * (2.0 * MAD_TO_SD));

    log::info!(
        "Variance prior from {} half-gene splits: mad12 = {:.4}, Vt = {:.6}",
        diffs.len(),
        mad12,
        prior_variance
    );

    // Per-(gene, sample) count sums and residual accumulators
    #[derive(Default)]
    struct GeneAccumulator {
        sum_counts: f64,
        sum_n0: f64,
        sum_vi: f64,
        sum_w: f64,
    }

    let mut accumulators: HashMap<(usize, usize), GeneAccumulator> = HashMap::new();
    for row in &fitness.strain_fitness {
        let gene = data.strains[row.strain].gene;
        let norm = normalized
            .norm_fg
            .get(&(gene, row.sample))
            .copied()
            .ok_or_else(|| {
                FitnessError::UndefinedStatistic(format!(
                    "no normalized fitness for gene '{}'",
                    data.genes[gene].locus_id
                ))
            })?;

        let accumulator = accumulators.entry((gene, row.sample)).or_default();
        accumulator.sum_counts += row.counts;
        accumulator.sum_n0 += row.n0;
        accumulator.sum_vi += row.weight * (row.fitness - norm) * (row.fitness - norm);
        accumulator.sum_w += row.weight;
    }

    // Naive variance of the gene sums, and its per-sample median over the
    // genes that calibrated the prior
    let vn: HashMap<(usize, usize), f64> = accumulators
        .iter()
        .map(|(&key, accumulator)| {
            (key, count_variance(accumulator.sum_counts, accumulator.sum_n0))
        })
        .collect();

    let mut samples_seen: Vec<usize> = accumulators
        .keys()
        .map(|&(_, sample)| sample)
        .collect::<HashSet<usize>>()
        .into_iter()
        .collect();
    samples_seen.sort_unstable();

    let mut median_vn: HashMap<usize, f64> = HashMap::new();
    for &sample in &samples_seen {
        let condition = data.samples[sample].condition.as_str();
        let calibrating: Vec<f64> = vn
            .iter()
            .filter(|(&(gene, s), _)| {
                s == sample && qualifying.contains(&(gene, condition.to_string()))
            })
            .map(|(_, &value)| value)
            .collect();

        let values = if calibrating.is_empty() {
            // No calibrating gene in this sample; fall back to all of its genes
            vn.iter()
                .filter(|(&(_, s), _)| s == sample)
                .map(|(_, &value)| value)
                .collect()
        } else {
            calibrating
        };

        let value = median(&values).ok_or_else(|| {
            FitnessError::UndefinedStatistic(format!(
                "median naive variance for sample '{}'",
                data.samples[sample].id
            ))
        })?;
        median_vn.insert(sample, value);
    }

    let floor_squared = config.variance_floor * config.variance_floor;
    let mut scores = HashMap::with_capacity(accumulators.len());

    for ((gene, sample), accumulator) in &accumulators {
        let key = (*gene, *sample);
        let norm = normalized.norm_fg[&key];
        let gene_vn = vn[&key];
        let strains = fitness.strains_per_gene[gene] as f64;

        let vg = prior_variance * gene_vn / median_vn[sample];
        let ve = (accumulator.sum_vi / accumulator.sum_w + vg) / strains;
        let t = norm / (floor_squared + ve.max(gene_vn)).sqrt();

        scores.insert(
            key,
            GeneScore {
                sum_counts: accumulator.sum_counts,
                sum_n0: accumulator.sum_n0,
                vn: gene_vn,
                ve,
                t,
                significant: t.abs() > config.t_threshold,
            },
        );
    }

    Ok(SignificanceTable {
        scores,
        mad12,
        prior_variance,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fitness::StrainFitness;
    use crate::join::JoinDiagnostics;
    use crate::{Gene, Sample, Strain};

    fn gene(locus: &str, begin: u32, end: u32) -> Gene {
        Gene::new(
            locus.to_string(),
            "sc1".to_string(),
            begin,
            end,
            "+".to_string(),
        )
    }

    fn sample(filename: &str, condition: &str) -> Sample {
        Sample {
            filename: filename.to_string(),
            id: filename.to_string(),
            date: "2024-01-01".to_string(),
            time: "0".to_string(),
            condition: condition.to_string(),
            replicate: "A".to_string(),
            reference: false,
        }
    }

    /// Two genes with four strains each, two strains per gene half
    fn two_gene_data() -> JoinedData {
        let genes = vec![gene("g0", 0, 1000), gene("g1", 2000, 3000)];
        let mut strains = Vec::new();
        for g in 0..2 {
            let begin = g as u32 * 2000;
            for (s, offset) in [200, 400, 600, 800].iter().enumerate() {
                strains.push(Strain {
                    barcode: format!("bc{}_{}", g, s),
                    scaffold: "sc1".to_string(),
                    position: begin + offset,
                    gene: g,
                });
            }
        }

        JoinedData {
            genes,
            strains,
            samples: vec![sample("after", "glucose")],
            observations: Vec::new(),
            diagnostics: JoinDiagnostics::default(),
        }
    }

    fn table_for(data: &JoinedData, fitness_values: &[f64], n0: f64) -> FitnessTable {
        let strain_fitness: Vec<StrainFitness> = fitness_values
            .iter()
            .enumerate()
            .map(|(strain, &fitness)| StrainFitness {
                strain,
                sample: 0,
                counts: n0,
                n0,
                fitness,
                weight: 1.0 / count_variance(n0, n0),
            })
            .collect();

        let mut gene_fitness = HashMap::new();
        let mut strains_per_gene = HashMap::new();
        for (g, chunk) in fitness_values.chunks(4).enumerate() {
            let mean = chunk.iter().sum::<f64>() / chunk.len() as f64;
            gene_fitness.insert((g, 0), mean);
            strains_per_gene.insert(g, chunk.len());
        }

        FitnessTable {
            strain_fitness,
            gene_fitness,
            strains_per_gene,
            read_ratio: 1.0,
        }
    }

    fn normalized_identity(fitness: &FitnessTable) -> NormalizedTable {
        NormalizedTable {
            local_centered: fitness.gene_fitness.clone(),
            norm_fg: fitness.gene_fitness.clone(),
        }
    }

    #[test]
    fn test_half_gene_differences() {
        let data = two_gene_data();
        // Gene 0: left strains at 0.1/0.3, right at 0.5/0.9
        // Gene 1: symmetric halves
        let fitness = table_for(&data, &[0.1, 0.3, 0.5, 0.9, 0.2, 0.4, 0.2, 0.4], 10.0);
        let config = FitnessConfig::default();

        let (diffs, qualifying) = half_gene_differences(&data, &fitness, &config);

        assert_eq!(qualifying.len(), 2);
        let mut sorted = diffs.clone();
        sorted.sort_by(f64::total_cmp);
        assert!((sorted[0] - 0.0).abs() < 1e-12);
        assert!((sorted[1] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_thin_half_excluded_from_prior_but_scored() {
        let data = two_gene_data();
        let mut fitness = table_for(&data, &[0.1, 0.3, 0.5, 0.9, 0.2, 0.4, 0.2, 0.4], 10.0);
        // Gene 1's right half drops to 5 reference reads in total
        for row in fitness.strain_fitness.iter_mut() {
            if row.strain == 6 || row.strain == 7 {
                row.n0 = 2.5;
            }
        }

        let config = FitnessConfig::default();
        let (_, qualifying) = half_gene_differences(&data, &fitness, &config);
        assert!(qualifying.contains(&(0, "glucose".to_string())));
        assert!(!qualifying.contains(&(1, "glucose".to_string())));

        let normalized = normalized_identity(&fitness);
        let table = test_significance(&data, &fitness, &normalized, &config).unwrap();
        assert!(table.scores.contains_key(&(1, 0)));
    }

    #[test]
    fn test_prior_variance_from_mad12() {
        let data = two_gene_data();
        let fitness = table_for(&data, &[0.1, 0.3, 0.5, 0.9, 0.2, 0.4, 0.2, 0.4], 10.0);
        let normalized = normalized_identity(&fitness);
        let config = FitnessConfig::default();

        let table = test_significance(&data, &fitness, &normalized, &config).unwrap();

        // diffs are 0.5 and 0.0, so mad12 = 0.25
        assert!((table.mad12 - 0.25).abs() < 1e-12);
        let expected = 0.25 * 0.25 / ((2.0 * 0.674) * (2.0 * 0.674));
        assert!((table.prior_variance - expected).abs() < 1e-12);
    }

    #[test]
    fn test_t_statistic_formula() {
        let data = two_gene_data();
        let fitness = table_for(&data, &[0.1, 0.3, 0.5, 0.9, 0.2, 0.4, 0.2, 0.4], 10.0);
        let normalized = normalized_identity(&fitness);
        let config = FitnessConfig::default();

        let table = test_significance(&data, &fitness, &normalized, &config).unwrap();
        let score = table.scores[&(0, 0)];

        assert!((score.sum_counts - 40.0).abs() < 1e-12);
        assert!((score.sum_n0 - 40.0).abs() < 1e-12);
        let expected_vn = count_variance(40.0, 40.0);
        assert!((score.vn - expected_vn).abs() < 1e-12);

        let norm = normalized.norm_fg[&(0, 0)];
        let expected_t = norm / (0.01 + score.ve.max(score.vn)).sqrt();
        assert!((score.t - expected_t).abs() < 1e-12);
    }

    #[test]
    fn test_no_qualifying_gene_is_fatal() {
        let data = two_gene_data();
        let fitness = table_for(&data, &[0.1, 0.3, 0.5, 0.9, 0.2, 0.4, 0.2, 0.4], 2.0);
        let normalized = normalized_identity(&fitness);
        let config = FitnessConfig::default();

        // Every half sums to 4 < 15 reference reads
        assert!(matches!(
            test_significance(&data, &fitness, &normalized, &config),
            Err(FitnessError::UndefinedStatistic(_))
        ));
    }

    #[test]
    fn test_strong_phenotype_is_significant() {
        let data = two_gene_data();
        // Gene 0 strains strongly depleted and consistent
        let fitness = table_for(
            &data,
            &[-3.0, -3.1, -2.9, -3.0, 0.0, 0.1, -0.1, 0.0],
            200.0,
        );
        let normalized = normalized_identity(&fitness);
        let config = FitnessConfig::default();

        let table = test_significance(&data, &fitness, &normalized, &config).unwrap();

        assert!(table.scores[&(0, 0)].significant);
        assert!(!table.scores[&(1, 0)].significant);
        assert!(table.scores[&(0, 0)].t < -config.t_threshold);
    }
}
