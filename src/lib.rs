//! # barfit - Pooled Mutant Fitness Tool
//!
//! A Rust implementation of gene fitness scoring for competitive pooled-mutant
//! sequencing experiments. Barcode read counts per insertion strain are compared
//! against time-zero reference samples to produce per-strain and per-gene log2
//! fitness values, normalized along each scaffold and tested for significance.

pub mod fitness;
pub mod join;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod reference;
pub mod stats;
pub mod tables;
pub mod utils;
pub mod variance;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A gene from the annotation table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gene {
    pub locus_id: String,
    pub scaffold: String,
    pub begin: u32,
    pub end: u32,
    pub strand: String,
    /// Optional flag marking genes whose central insertions are trustworthy
    pub central: Option<bool>,
}

impl Gene {
    pub fn new(locus_id: String, scaffold: String, begin: u32, end: u32, strand: String) -> Self {
        Self {
            locus_id,
            scaffold,
            begin,
            end,
            strand,
            central: None,
        }
    }

    /// Midpoint of the gene on its scaffold
    pub fn middle(&self) -> f64 {
        (self.begin as f64 + self.end as f64) / 2.0
    }
}

/// A barcoded insertion strain joined to its owning gene
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strain {
    pub barcode: String,
    pub scaffold: String,
    pub position: u32,
    /// Index of the owning gene in the joined gene vector
    pub gene: usize,
}

/// A sequenced sample from the experiment metadata table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub filename: String,
    pub id: String,
    pub date: String,
    pub time: String,
    pub condition: String,
    pub replicate: String,
    /// True for time-zero control samples
    pub reference: bool,
}

/// A read count for one strain in one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub strain: usize,
    pub sample: usize,
    pub counts: f64,
}

/// An observation that survived reference filtering; `n0` is the summed
/// time-zero count for the strain under the sample's condition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrainMeasure {
    pub strain: usize,
    pub sample: usize,
    pub counts: f64,
    pub n0: f64,
}

/// Configuration parameters for the fitness pipeline
#[derive(Debug, Clone)]
pub struct FitnessConfig {
    /// Minimum summed reference count per strain and condition
    pub min_strain_n0: f64,
    /// Minimum summed reference count per gene and condition
    pub min_gene_n0: f64,
    /// Insertions outside this fraction of gene length are discarded
    pub central_min_frac: f64,
    pub central_max_frac: f64,
    /// Strain count at which the estimated pseudocount regime starts
    pub min_strains_for_estimate: usize,
    /// Read count defining the per-strain weight cap, w_max = 1/Var(cap, cap)
    pub weight_cap_reads: f64,
    /// Genes in the positional window on each side of a gene
    pub window_radius: usize,
    /// Minimum summed reference count per gene half for the variance prior
    pub side_min_n0: f64,
    /// Variance floor added in quadrature to the t denominator
    pub variance_floor: f64,
    /// |t| threshold for the significance call
    pub t_threshold: f64,
}

impl Default for FitnessConfig {
    fn default() -> Self {
        Self {
            min_strain_n0: 3.0,
            min_gene_n0: 30.0,
            central_min_frac: 0.1,
            central_max_frac: 0.9,
            min_strains_for_estimate: 3,
            weight_cap_reads: 20.0,
            window_radius: 125,
            side_min_n0: 15.0,
            variance_floor: 0.1,
            t_threshold: 4.0,
        }
    }
}

/// Validate pipeline configuration parameters
pub fn validate_config(config: &FitnessConfig) -> FitnessResult<()> {
    if config.min_strain_n0 < 0.0 || config.min_gene_n0 < 0.0 {
        return Err(FitnessError::InvalidConfig(
            "coverage thresholds must be non-negative".to_string(),
        ));
    }

    if config.min_gene_n0 < config.min_strain_n0 {
        return Err(FitnessError::InvalidConfig(
            "min_gene_n0 must be at least min_strain_n0".to_string(),
        ));
    }

    if !(0.0..=1.0).contains(&config.central_min_frac)
        || !(0.0..=1.0).contains(&config.central_max_frac)
        || config.central_min_frac >= config.central_max_frac
    {
        return Err(FitnessError::InvalidConfig(
            "central fractions must satisfy 0 <= min < max <= 1".to_string(),
        ));
    }

    if config.weight_cap_reads <= 0.0 {
        return Err(FitnessError::InvalidConfig(
            "weight_cap_reads must be positive".to_string(),
        ));
    }

    if config.window_radius == 0 {
        return Err(FitnessError::InvalidConfig(
            "window_radius must be at least 1".to_string(),
        ));
    }

    if config.variance_floor < 0.0 {
        return Err(FitnessError::InvalidConfig(
            "variance_floor must be non-negative".to_string(),
        ));
    }

    if config.t_threshold <= 0.0 {
        return Err(FitnessError::InvalidConfig(
            "t_threshold must be positive".to_string(),
        ));
    }

    Ok(())
}

/// Error types for the barfit library
#[derive(Debug, thiserror::Error)]
pub enum FitnessError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing column '{column}' in {table} table")]
    MissingColumn { table: String, column: String },

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("no usable data: {0}")]
    EmptyDataset(String),

    #[error("undefined statistic: {0}")]
    UndefinedStatistic(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type FitnessResult<T> = Result<T, FitnessError>;
