//! Assembly and writing of the strain-level and gene-level fitness tables.
//!
//! Column order and names are part of the contract with downstream tooling.
//! Output paths ending in `.gz` are written gzip compressed.

use crate::fitness::FitnessTable;
use crate::join::JoinedData;
use crate::normalize::NormalizedTable;
use crate::variance::SignificanceTable;
use crate::{FitnessError, FitnessResult};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// One row of the strain-level fitness table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StrainFitnessRow {
    pub barcode: String,
    pub locus_id: String,
    pub scaffold: String,
    pub position: u32,
    pub sample_id: String,
    pub date: String,
    pub time: String,
    pub condition: String,
    pub replicate: String,
    pub counts: f64,
    pub n0: f64,
    pub strains_per_gene: usize,
    pub strain_fitness: f64,
    pub norm_fg: f64,
    pub t: f64,
    pub significant: bool,
}

/// One row of the gene-level fitness table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneFitnessRow {
    pub locus_id: String,
    pub scaffold: String,
    pub sample_id: String,
    pub date: String,
    pub time: String,
    pub condition: String,
    pub replicate: String,
    pub counts: f64,
    pub n0: f64,
    pub strains_per_gene: usize,
    pub norm_fg: f64,
    pub t: f64,
    pub significant: bool,
    pub log2fc: f64,
}

pub const STRAIN_TABLE_COLUMNS: &[&str] = &[
    "barcode",
    "locusId",
    "scaffold",
    "pos",
    "sampleId",
    "Date",
    "Time",
    "Condition",
    "Replicate",
    "Counts",
    "n0",
    "Strains_per_gene",
    "Strain_fitness",
    "Norm_fg",
    "t",
    "Significant",
];

pub const GENE_TABLE_COLUMNS: &[&str] = &[
    "locusId",
    "scaffold",
    "sampleId",
    "Date",
    "Time",
    "Condition",
    "Replicate",
    "Counts",
    "n0",
    "Strains_per_gene",
    "Norm_fg",
    "t",
    "Significant",
    "log2FC",
];

/// Build the two final tables in a deterministic row order
pub fn assemble_tables(
    data: &JoinedData,
    fitness: &FitnessTable,
    normalized: &NormalizedTable,
    significance: &SignificanceTable,
) -> FitnessResult<(Vec<StrainFitnessRow>, Vec<GeneFitnessRow>)> {
    let mut strain_rows = Vec::with_capacity(fitness.strain_fitness.len());

    for row in &fitness.strain_fitness {
        let strain = &data.strains[row.strain];
        let gene = &data.genes[strain.gene];
        let sample = &data.samples[row.sample];
        let key = (strain.gene, row.sample);

        let norm = normalized.norm_fg.get(&key).copied().ok_or_else(|| {
            FitnessError::UndefinedStatistic(format!(
                "no normalized fitness for gene '{}' in sample '{}'",
                gene.locus_id, sample.id
            ))
        })?;
        let score = significance.scores.get(&key).ok_or_else(|| {
            FitnessError::UndefinedStatistic(format!(
                "no significance score for gene '{}' in sample '{}'",
                gene.locus_id, sample.id
            ))
        })?;

        strain_rows.push(StrainFitnessRow {
            barcode: strain.barcode.clone(),
            locus_id: gene.locus_id.clone(),
            scaffold: strain.scaffold.clone(),
            position: strain.position,
            sample_id: sample.id.clone(),
            date: sample.date.clone(),
            time: sample.time.clone(),
            condition: sample.condition.clone(),
            replicate: sample.replicate.clone(),
            counts: row.counts,
            n0: row.n0,
            strains_per_gene: fitness.strains_per_gene[&strain.gene],
            strain_fitness: row.fitness,
            norm_fg: norm,
            t: score.t,
            significant: score.significant,
        });
    }

    strain_rows.sort_by(|a, b| {
        (&a.sample_id, &a.scaffold, &a.locus_id, &a.barcode).cmp(&(
            &b.sample_id,
            &b.scaffold,
            &b.locus_id,
            &b.barcode,
        ))
    });

    let mut keys: Vec<(usize, usize)> = significance.scores.keys().copied().collect();
    keys.sort_unstable();

    let mut gene_rows = Vec::with_capacity(keys.len());
    for (gene_idx, sample_idx) in keys {
        let gene = &data.genes[gene_idx];
        let sample = &data.samples[sample_idx];
        let score = &significance.scores[&(gene_idx, sample_idx)];
        let norm = normalized.norm_fg[&(gene_idx, sample_idx)];

        gene_rows.push(GeneFitnessRow {
            locus_id: gene.locus_id.clone(),
            scaffold: gene.scaffold.clone(),
            sample_id: sample.id.clone(),
            date: sample.date.clone(),
            time: sample.time.clone(),
            condition: sample.condition.clone(),
            replicate: sample.replicate.clone(),
            counts: score.sum_counts,
            n0: score.sum_n0,
            strains_per_gene: fitness.strains_per_gene[&gene_idx],
            norm_fg: norm,
            t: score.t,
            significant: score.significant,
            log2fc: (score.sum_counts / score.sum_n0).log2(),
        });
    }

    gene_rows.sort_by(|a, b| {
        (&a.sample_id, &a.scaffold, &a.locus_id).cmp(&(&b.sample_id, &b.scaffold, &b.locus_id))
    });

    verify_consistency(&strain_rows, &gene_rows)?;

    Ok((strain_rows, gene_rows))
}

/// Every strain of a gene/sample must carry the same normalized fitness,
/// t statistic, and significance call as its gene row.
pub fn verify_consistency(
    strain_rows: &[StrainFitnessRow],
    gene_rows: &[GeneFitnessRow],
) -> FitnessResult<()> {
    let by_key: HashMap<(&str, &str), &GeneFitnessRow> = gene_rows
        .iter()
        .map(|row| ((row.locus_id.as_str(), row.sample_id.as_str()), row))
        .collect();

    for row in strain_rows {
        let gene_row = by_key
            .get(&(row.locus_id.as_str(), row.sample_id.as_str()))
            .ok_or_else(|| {
                FitnessError::UndefinedStatistic(format!(
                    "strain '{}' has no gene row for '{}' in sample '{}'",
                    row.barcode, row.locus_id, row.sample_id
                ))
            })?;

        if row.norm_fg != gene_row.norm_fg
            || row.t != gene_row.t
            || row.significant != gene_row.significant
        {
            return Err(FitnessError::UndefinedStatistic(format!(
                "gene '{}' in sample '{}' has diverging scores across strains",
                row.locus_id, row.sample_id
            )));
        }
    }

    Ok(())
}

/// Open an output file, gz-encoding when the path ends in `.gz`
fn open_output<P: AsRef<Path>>(path: P) -> FitnessResult<Box<dyn Write>> {
    let file = File::create(&path)?;
    let writer: Box<dyn Write> =
        if path.as_ref().extension().and_then(|s| s.to_str()) == Some("gz") {
            Box::new(GzEncoder::new(file, Compression::default()))
        } else {
            Box::new(file)
        };
    Ok(writer)
}

fn flag(significant: bool) -> u8 {
    if significant {
        1
    } else {
        0
    }
}

/// Write the strain-level fitness table
pub fn write_strain_table<P: AsRef<Path>>(
    rows: &[StrainFitnessRow],
    path: P,
) -> FitnessResult<()> {
    let mut writer = open_output(path)?;
    writeln!(writer, "{}", STRAIN_TABLE_COLUMNS.join("\t"))?;

    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.barcode,
            row.locus_id,
            row.scaffold,
            row.position,
            row.sample_id,
            row.date,
            row.time,
            row.condition,
            row.replicate,
            row.counts,
            row.n0,
            row.strains_per_gene,
            row.strain_fitness,
            row.norm_fg,
            row.t,
            flag(row.significant),
        )?;
    }

    Ok(())
}

/// Write the gene-level fitness table
pub fn write_gene_table<P: AsRef<Path>>(rows: &[GeneFitnessRow], path: P) -> FitnessResult<()> {
    let mut writer = open_output(path)?;
    writeln!(writer, "{}", GENE_TABLE_COLUMNS.join("\t"))?;

    for row in rows {
        writeln!(
            writer,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.locus_id,
            row.scaffold,
            row.sample_id,
            row.date,
            row.time,
            row.condition,
            row.replicate,
            row.counts,
            row.n0,
            row.strains_per_gene,
            row.norm_fg,
            row.t,
            flag(row.significant),
            row.log2fc,
        )?;
    }

    Ok(())
}
