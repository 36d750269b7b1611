//! Positional normalization of gene fitness.
//!
//! Gene fitness varies systematically along a scaffold (replication timing,
//! copy number near the origin). A sliding median over the 251 nearest genes
//! by scaffold order removes the local trend; a kernel density mode per
//! scaffold and sample removes the residual scaffold-wide shift. Windows wrap
//! around the scaffold ends, treating each scaffold as circular.

use crate::fitness::FitnessTable;
use crate::join::JoinedData;
use crate::stats::{density_mode, median};
use crate::{FitnessConfig, FitnessError, FitnessResult};
use rayon::prelude::*;
use std::collections::{HashMap, HashSet};

/// Per-scaffold ordinal gene positions, ordered by gene midpoint
#[derive(Debug, Clone)]
pub struct ScaffoldIndex {
    /// scaffold name -> gene indices ordered by midpoint
    pub order: Vec<(String, Vec<usize>)>,
}

/// Order the genes carrying fitness values along each scaffold
pub fn build_scaffold_index(data: &JoinedData, genes_with_values: &HashSet<usize>) -> ScaffoldIndex {
    let mut by_scaffold: HashMap<&str, Vec<usize>> = HashMap::new();
    for &gene in genes_with_values {
        by_scaffold
            .entry(data.genes[gene].scaffold.as_str())
            .or_default()
            .push(gene);
    }

    let mut order: Vec<(String, Vec<usize>)> = by_scaffold
        .into_iter()
        .map(|(scaffold, mut genes)| {
            genes.sort_by(|&a, &b| {
                data.genes[a]
                    .middle()
                    .total_cmp(&data.genes[b].middle())
                    .then(a.cmp(&b))
            });
            (scaffold.to_string(), genes)
        })
        .collect();
    order.sort_by(|a, b| a.0.cmp(&b.0));

    ScaffoldIndex { order }
}

/// Normalized gene fitness values
#[derive(Debug, Clone)]
pub struct NormalizedTable {
    /// (gene, sample) -> fitness minus the local window median
    pub local_centered: HashMap<(usize, usize), f64>,
    /// (gene, sample) -> fully normalized fitness (mode-centered)
    pub norm_fg: HashMap<(usize, usize), f64>,
}

/// Window member values for the gene at 1-based ordinal `index` on a scaffold
/// of `k` genes. Out-of-range ordinals wrap once; ordinals still out of range
/// after a single wrap are excluded.
fn window_values(values: &[Option<f64>], index: usize, radius: usize) -> Vec<f64> {
    let k = values.len() as isize;
    let mut members = Vec::with_capacity(2 * radius + 1);

    for offset in -(radius as isize)..=(radius as isize) {
        let mut ordinal = index as isize + offset;
        if ordinal < 1 {
            ordinal += k;
        } else if ordinal > k {
            ordinal -= k;
        }
        if ordinal < 1 || ordinal > k {
            continue;
        }
        if let Some(value) = values[(ordinal - 1) as usize] {
            members.push(value);
        }
    }

    members
}

/// Remove the positional trend and scaffold-wide shift from gene fitness
pub fn normalize_positions(
    data: &JoinedData,
    fitness: &FitnessTable,
    config: &FitnessConfig,
) -> FitnessResult<NormalizedTable> {
    let genes_with_values: HashSet<usize> =
        fitness.gene_fitness.keys().map(|&(gene, _)| gene).collect();
    let index = build_scaffold_index(data, &genes_with_values);

    let mut sample_indices: Vec<usize> = fitness
        .gene_fitness
        .keys()
        .map(|&(_, sample)| sample)
        .collect::<HashSet<usize>>()
        .into_iter()
        .collect();
    sample_indices.sort_unstable();

    // Each (scaffold, sample) group is independent
    let groups: Vec<(&[usize], usize)> = index
        .order
        .iter()
        .flat_map(|(_, genes)| {
            sample_indices
                .iter()
                .map(move |&sample| (genes.as_slice(), sample))
        })
        .collect();

    let normalized: Vec<Vec<(usize, usize, f64, f64)>> = groups
        .par_iter()
        .map(|&(genes, sample)| {
            let values: Vec<Option<f64>> = genes
                .iter()
                .map(|&gene| fitness.gene_fitness.get(&(gene, sample)).copied())
                .collect();

            // Local median per gene, then the scaffold-wide density mode
            let mut centered: Vec<(usize, usize, f64)> = Vec::new();
            for (position, &gene) in genes.iter().enumerate() {
                let gene_value = match values[position] {
                    Some(value) => value,
                    None => continue,
                };
                let members = window_values(&values, position + 1, config.window_radius);
                let local_median = match median(&members) {
                    Some(value) => value,
                    None => continue,
                };
                centered.push((gene, sample, gene_value - local_median));
            }

            if centered.is_empty() {
                return Vec::new();
            }

            let offsets: Vec<f64> = centered.iter().map(|&(_, _, value)| value).collect();
            let mode = density_mode(&offsets).unwrap_or(0.0);

            centered
                .into_iter()
                .map(|(gene, sample, value)| (gene, sample, value, value - mode))
                .collect()
        })
        .collect();

    let mut local_centered = HashMap::new();
    let mut norm_fg = HashMap::new();
    for group in normalized {
        for (gene, sample, centered, value) in group {
            local_centered.insert((gene, sample), centered);
            norm_fg.insert((gene, sample), value);
        }
    }

    if norm_fg.is_empty() {
        return Err(FitnessError::UndefinedStatistic(
            "positional normalization produced no values".to_string(),
        ));
    }

    Ok(NormalizedTable {
        local_centered,
        norm_fg,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::JoinDiagnostics;
    use crate::{Gene, Sample};

    fn gene_at(locus: &str, scaffold: &str, begin: u32) -> Gene {
        Gene::new(
            locus.to_string(),
            scaffold.to_string(),
            begin,
            begin + 1000,
            "+".to_string(),
        )
    }

    fn sample(filename: &str) -> Sample {
        Sample {
            filename: filename.to_string(),
            id: filename.to_string(),
            date: "2024-01-01".to_string(),
            time: "0".to_string(),
            condition: "glucose".to_string(),
            replicate: "A".to_string(),
            reference: false,
        }
    }

    fn data_with_genes(genes: Vec<Gene>) -> JoinedData {
        JoinedData {
            genes,
            strains: Vec::new(),
            samples: vec![sample("after")],
            observations: Vec::new(),
            diagnostics: JoinDiagnostics::default(),
        }
    }

    fn fitness_table(values: &[f64]) -> FitnessTable {
        FitnessTable {
            strain_fitness: Vec::new(),
            gene_fitness: values
                .iter()
                .enumerate()
                .map(|(gene, &value)| ((gene, 0), value))
                .collect(),
            strains_per_gene: HashMap::new(),
            read_ratio: 1.0,
        }
    }

    #[test]
    fn test_scaffold_index_orders_by_middle() {
        let data = data_with_genes(vec![
            gene_at("g0", "sc1", 5000),
            gene_at("g1", "sc1", 100),
            gene_at("g2", "sc1", 2000),
        ]);
        let with_values: HashSet<usize> = [0, 1, 2].into_iter().collect();
        let index = build_scaffold_index(&data, &with_values);

        assert_eq!(index.order.len(), 1);
        assert_eq!(index.order[0].1, vec![1, 2, 0]);
    }

    #[test]
    fn test_window_values_wrap_once() {
        let values: Vec<Option<f64>> = (0..5).map(|v| Some(v as f64)).collect();

        // Window of radius 2 around ordinal 1 wraps to the scaffold end
        let members = window_values(&values, 1, 2);
        assert_eq!(members, vec![3.0, 4.0, 0.0, 1.0, 2.0]);

        // Around the end it wraps to the start
        let members = window_values(&values, 5, 2);
        assert_eq!(members, vec![2.0, 3.0, 4.0, 0.0, 1.0]);
    }

    #[test]
    fn test_window_values_skip_double_wrap() {
        // Radius 3 on a 2-gene scaffold: offsets beyond one wrap are excluded
        let values = vec![Some(10.0), Some(20.0)];
        let members = window_values(&values, 1, 3);
        assert_eq!(members.len(), 6);
    }

    #[test]
    fn test_window_values_skip_missing() {
        let values = vec![Some(1.0), None, Some(3.0)];
        let members = window_values(&values, 2, 1);
        assert_eq!(members, vec![1.0, 3.0]);
    }

    #[test]
    fn test_local_median_zero_when_windows_cover_scaffold() {
        // Five genes, radius large enough that every window is the whole
        // scaffold: every local median equals the global median, so the
        // median of the centered values is exactly zero.
        let data = data_with_genes(
            (0..5)
                .map(|i| gene_at(&format!("g{}", i), "sc1", 1000 * (i + 1) as u32))
                .collect(),
        );
        let fitness = fitness_table(&[0.5, -0.25, 0.0, 1.5, -1.0]);
        let config = FitnessConfig::default();

        let normalized = normalize_positions(&data, &fitness, &config).unwrap();

        let centered: Vec<f64> = (0..5)
            .map(|gene| normalized.local_centered[&(gene, 0)])
            .collect();
        assert_eq!(median(&centered), Some(0.0));
    }

    #[test]
    fn test_scaffolds_normalized_independently() {
        // A constant shift on one scaffold must not leak into the other
        let mut genes: Vec<Gene> = (0..5)
            .map(|i| gene_at(&format!("a{}", i), "scA", 1000 * (i + 1) as u32))
            .collect();
        genes.extend((0..5).map(|i| gene_at(&format!("b{}", i), "scB", 1000 * (i + 1) as u32)));
        let data = data_with_genes(genes);

        let mut values = vec![0.0; 5];
        values.extend(vec![2.0; 5]);
        let fitness = fitness_table(&values);

        let normalized =
            normalize_positions(&data, &fitness, &FitnessConfig::default()).unwrap();

        for gene in 0..10 {
            let value = normalized.norm_fg[&(gene, 0)];
            assert!(value.abs() < 1e-9, "gene {} norm {}", gene, value);
        }
    }

    #[test]
    fn test_mode_centering_shifts_cluster_to_zero() {
        // Nine genes clustered near fitness -0.5 and one strong outlier;
        // after normalization the cluster should sit at zero.
        let mut values = vec![-0.5; 9];
        values.push(3.0);
        let data = data_with_genes(
            (0..10)
                .map(|i| gene_at(&format!("g{}", i), "sc1", 1000 * (i + 1) as u32))
                .collect(),
        );
        let fitness = fitness_table(&values);

        let normalized =
            normalize_positions(&data, &fitness, &FitnessConfig::default()).unwrap();

        for gene in 0..9 {
            assert!(
                normalized.norm_fg[&(gene, 0)].abs() < 0.1,
                "gene {} norm {}",
                gene,
                normalized.norm_fg[&(gene, 0)]
            );
        }
        assert!(normalized.norm_fg[&(9, 0)] > 2.0);
    }

    #[test]
    fn test_normalization_is_deterministic() {
        let data = data_with_genes(
            (0..20)
                .map(|i| gene_at(&format!("g{}", i), "sc1", 500 * (i + 1) as u32))
                .collect(),
        );
        let values: Vec<f64> = (0..20).map(|i| ((i * 7) % 5) as f64 * 0.3 - 0.6).collect();
        let fitness = fitness_table(&values);
        let config = FitnessConfig::default();

        let first = normalize_positions(&data, &fitness, &config).unwrap();
        let second = normalize_positions(&data, &fitness, &config).unwrap();

        for (key, value) in &first.norm_fg {
            assert_eq!(value.to_bits(), second.norm_fg[key].to_bits());
        }
    }
}
