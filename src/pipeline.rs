//! The full fitness pipeline: join, reference filtering, fitness estimation,
//! positional normalization, significance testing, and table assembly.
//!
//! Stages run strictly in sequence; each consumes the complete output of the
//! previous one. The pipeline works on in-memory tables so the whole
//! computation is testable without touching the filesystem.

use crate::fitness::estimate_fitness;
use crate::join::{join_tables, JoinDiagnostics};
use crate::normalize::normalize_positions;
use crate::output::{assemble_tables, GeneFitnessRow, StrainFitnessRow};
use crate::reference::apply_reference_filter;
use crate::tables::CountTable;
use crate::variance::test_significance;
use crate::{validate_config, FitnessConfig, FitnessResult, Gene, Sample};

/// The two final tables plus join diagnostics
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub strain_rows: Vec<StrainFitnessRow>,
    pub gene_rows: Vec<GeneFitnessRow>,
    pub diagnostics: JoinDiagnostics,
}

/// Run the complete fitness computation over in-memory input tables
pub fn run_pipeline(
    genes: Vec<Gene>,
    counts: CountTable,
    samples: Vec<Sample>,
    config: &FitnessConfig,
) -> FitnessResult<PipelineOutput> {
    validate_config(config)?;

    let data = join_tables(genes, counts, samples, config)?;
    let measures = apply_reference_filter(&data, config)?;
    let fitness = estimate_fitness(&data, &measures, config)?;
    let normalized = normalize_positions(&data, &fitness, config)?;
    let significance = test_significance(&data, &fitness, &normalized, config)?;
    let (strain_rows, gene_rows) = assemble_tables(&data, &fitness, &normalized, &significance)?;

    log::info!(
        "Pipeline produced {} strain rows and {} gene rows",
        strain_rows.len(),
        gene_rows.len()
    );

    Ok(PipelineOutput {
        strain_rows,
        gene_rows,
        diagnostics: data.diagnostics,
    })
}
