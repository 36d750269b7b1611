//! Reference (time-zero) filtering.
//!
//! Reference replicates of a condition are pooled by summation into a
//! per-(strain, condition) `n0`. Strains and genes below the coverage
//! thresholds are dropped per condition; surviving `n0` values are attached
//! to the non-reference observations and the reference rows are discarded.

use crate::join::JoinedData;
use crate::{FitnessConfig, FitnessError, FitnessResult, StrainMeasure};
use std::collections::{HashMap, HashSet};

/// Attach reference coverage to non-reference observations, applying the
/// per-condition strain and gene coverage filters.
pub fn apply_reference_filter(
    data: &JoinedData,
    config: &FitnessConfig,
) -> FitnessResult<Vec<StrainMeasure>> {
    // Pool reference replicates by summation per (strain, condition)
    let mut n0: HashMap<(usize, &str), f64> = HashMap::new();
    for obs in &data.observations {
        let sample = &data.samples[obs.sample];
        if sample.reference {
            *n0.entry((obs.strain, sample.condition.as_str()))
                .or_insert(0.0) += obs.counts;
        }
    }

    let conditions: HashSet<&str> = data
        .samples
        .iter()
        .filter(|sample| !sample.reference)
        .map(|sample| sample.condition.as_str())
        .collect();

    let reference_conditions: HashSet<&str> = data
        .samples
        .iter()
        .filter(|sample| sample.reference)
        .map(|sample| sample.condition.as_str())
        .collect();

    for &condition in &conditions {
        if !reference_conditions.contains(condition) {
            log::warn!(
                "condition '{}' has no reference sample; all of its strains are dropped",
                condition
            );
        }
    }

    // Strain-level coverage filter
    n0.retain(|_, total| *total >= config.min_strain_n0);

    // Gene-level coverage filter over the surviving strains
    let mut gene_n0: HashMap<(usize, &str), f64> = HashMap::new();
    for (&(strain, condition), &total) in &n0 {
        let gene = data.strains[strain].gene;
        *gene_n0.entry((gene, condition)).or_insert(0.0) += total;
    }

    let kept: HashMap<(usize, &str), f64> = n0
        .iter()
        .filter(|((strain, condition), _)| {
            let gene = data.strains[*strain].gene;
            gene_n0
                .get(&(gene, *condition))
                .map(|total| *total >= config.min_gene_n0)
                .unwrap_or(false)
        })
        .map(|(&key, &total)| (key, total))
        .collect();

    // Fold n0 onto the non-reference observations; reference rows are no
    // longer needed as observations.
    let mut measures = Vec::new();
    let mut rows_per_condition: HashMap<&str, usize> = HashMap::new();
    for obs in &data.observations {
        let sample = &data.samples[obs.sample];
        if sample.reference {
            continue;
        }

        if let Some(&strain_n0) = kept.get(&(obs.strain, sample.condition.as_str())) {
            measures.push(StrainMeasure {
                strain: obs.strain,
                sample: obs.sample,
                counts: obs.counts,
                n0: strain_n0,
            });
            *rows_per_condition
                .entry(sample.condition.as_str())
                .or_insert(0) += 1;
        }
    }

    for &condition in &conditions {
        match rows_per_condition.get(condition) {
            Some(rows) => log::info!(
                "condition '{}': {} strain observations passed reference filtering",
                condition,
                rows
            ),
            None => log::warn!(
                "condition '{}': no strain passed reference filtering",
                condition
            ),
        }
    }

    if measures.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "reference filtering removed every strain".to_string(),
        ));
    }

    Ok(measures)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::join::JoinDiagnostics;
    use crate::{Gene, Observation, Sample, Strain};

    fn gene(locus: &str) -> Gene {
        Gene::new(
            locus.to_string(),
            "sc1".to_string(),
            100,
            1100,
            "+".to_string(),
        )
    }

    fn sample(filename: &str, condition: &str, reference: bool) -> Sample {
        Sample {
            filename: filename.to_string(),
            id: filename.to_string(),
            date: "2024-01-01".to_string(),
            time: "0".to_string(),
            condition: condition.to_string(),
            replicate: "A".to_string(),
            reference,
        }
    }

    fn strain(barcode: &str, gene: usize) -> Strain {
        Strain {
            barcode: barcode.to_string(),
            scaffold: "sc1".to_string(),
            position: 600,
            gene,
        }
    }

    fn data(
        genes: Vec<Gene>,
        strains: Vec<Strain>,
        samples: Vec<Sample>,
        observations: Vec<Observation>,
    ) -> JoinedData {
        JoinedData {
            genes,
            strains,
            samples,
            observations,
            diagnostics: JoinDiagnostics::default(),
        }
    }

    fn obs(strain: usize, sample: usize, counts: f64) -> Observation {
        Observation {
            strain,
            sample,
            counts,
        }
    }

    #[test]
    fn test_n0_pooled_over_reference_replicates() {
        // Two reference replicates of 20 reads each; four strains on one gene
        let samples = vec![
            sample("t0a", "glucose", true),
            sample("t0b", "glucose", true),
            sample("after", "glucose", false),
        ];
        let strains: Vec<Strain> = (0..4).map(|i| strain(&format!("bc{}", i), 0)).collect();
        let mut observations = Vec::new();
        for s in 0..4 {
            observations.push(obs(s, 0, 20.0));
            observations.push(obs(s, 1, 20.0));
            observations.push(obs(s, 2, 15.0));
        }

        let joined = data(vec![gene("g1")], strains, samples, observations);
        let measures = apply_reference_filter(&joined, &FitnessConfig::default()).unwrap();

        assert_eq!(measures.len(), 4);
        for measure in &measures {
            assert_eq!(measure.n0, 40.0);
            assert_eq!(measure.counts, 15.0);
        }
    }

    #[test]
    fn test_low_coverage_strain_dropped() {
        // Strain bc1 has n0 = 2 < 3; the gene keeps enough coverage via the rest
        let samples = vec![
            sample("t0", "glucose", true),
            sample("after", "glucose", false),
        ];
        let strains = vec![strain("bc0", 0), strain("bc1", 0), strain("bc2", 0)];
        let observations = vec![
            obs(0, 0, 20.0),
            obs(1, 0, 2.0),
            obs(2, 0, 20.0),
            obs(0, 1, 5.0),
            obs(1, 1, 5.0),
            obs(2, 1, 5.0),
        ];

        let joined = data(vec![gene("g1")], strains, samples, observations);
        let measures = apply_reference_filter(&joined, &FitnessConfig::default()).unwrap();

        assert_eq!(measures.len(), 2);
        assert!(measures.iter().all(|m| m.strain != 1));
    }

    #[test]
    fn test_low_coverage_gene_dropped() {
        // Both strains pass the strain filter but the gene sums to 20 < 30
        let samples = vec![
            sample("t0", "glucose", true),
            sample("after", "glucose", false),
        ];
        let strains = vec![strain("bc0", 0), strain("bc1", 0)];
        let observations = vec![
            obs(0, 0, 10.0),
            obs(1, 0, 10.0),
            obs(0, 1, 5.0),
            obs(1, 1, 5.0),
        ];

        let joined = data(vec![gene("g1")], strains, samples, observations);
        let result = apply_reference_filter(&joined, &FitnessConfig::default());
        assert!(matches!(result, Err(FitnessError::EmptyDataset(_))));
    }

    #[test]
    fn test_filtering_is_per_condition() {
        // The strain has strong coverage in glucose but thin coverage in salt
        let samples = vec![
            sample("t0_glu", "glucose", true),
            sample("t0_salt", "salt", true),
            sample("glu", "glucose", false),
            sample("salt", "salt", false),
        ];
        let strains = vec![strain("bc0", 0), strain("bc1", 0)];
        let observations = vec![
            obs(0, 0, 20.0),
            obs(1, 0, 20.0),
            obs(0, 1, 2.0),
            obs(1, 1, 2.0),
            obs(0, 2, 7.0),
            obs(1, 2, 7.0),
            obs(0, 3, 7.0),
            obs(1, 3, 7.0),
        ];

        let joined = data(vec![gene("g1")], strains, samples, observations);
        let measures = apply_reference_filter(&joined, &FitnessConfig::default()).unwrap();

        assert_eq!(measures.len(), 2);
        let conditions: Vec<&str> = measures
            .iter()
            .map(|m| joined.samples[m.sample].condition.as_str())
            .collect();
        assert!(conditions.iter().all(|&c| c == "glucose"));
    }

    #[test]
    fn test_condition_without_reference_yields_nothing() {
        let samples = vec![
            sample("t0", "glucose", true),
            sample("glu", "glucose", false),
            sample("salt", "salt", false),
        ];
        let strains = vec![strain("bc0", 0), strain("bc1", 0)];
        let observations = vec![
            obs(0, 0, 20.0),
            obs(1, 0, 20.0),
            obs(0, 1, 5.0),
            obs(1, 1, 5.0),
            obs(0, 2, 5.0),
            obs(1, 2, 5.0),
        ];

        let joined = data(vec![gene("g1")], strains, samples, observations);
        let measures = apply_reference_filter(&joined, &FitnessConfig::default()).unwrap();

        assert!(measures
            .iter()
            .all(|m| joined.samples[m.sample].condition == "glucose"));
    }
}
