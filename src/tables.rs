//! Input table readers for the gene annotation, barcode count, and sample
//! metadata tables. All three are tab-separated with a header row and may be
//! gzip compressed.

use crate::utils::is_gzipped;
use crate::{FitnessError, FitnessResult, Gene, Sample};
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A barcode row from the count table before joining to a gene
#[derive(Debug, Clone, PartialEq)]
pub struct RawStrain {
    pub barcode: String,
    pub scaffold: String,
    pub position: u32,
}

/// The wide-format count table: one row per barcode, one numeric column per
/// sample filename.
#[derive(Debug, Clone)]
pub struct CountTable {
    pub strains: Vec<RawStrain>,
    pub sample_names: Vec<String>,
    /// counts[strain][sample_column]
    pub counts: Vec<Vec<f64>>,
}

/// Open a table for reading, transparently decompressing gzip
fn open_table<P: AsRef<Path>>(path: P) -> FitnessResult<Box<dyn BufRead>> {
    let file = File::open(&path)
        .map_err(|_| FitnessError::FileNotFound(path.as_ref().to_string_lossy().to_string()))?;

    let reader: Box<dyn BufRead> = if is_gzipped(&path)? {
        let gz_decoder = MultiGzDecoder::new(file);
        Box::new(BufReader::new(gz_decoder))
    } else {
        Box::new(BufReader::new(file))
    };

    Ok(reader)
}

fn tsv_reader<P: AsRef<Path>>(path: P) -> FitnessResult<csv::Reader<Box<dyn BufRead>>> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .from_reader(open_table(path)?))
}

/// Locate a required column by name in a header record
fn required_column(headers: &csv::StringRecord, table: &str, name: &str) -> FitnessResult<usize> {
    headers
        .iter()
        .position(|col| col == name)
        .ok_or_else(|| FitnessError::MissingColumn {
            table: table.to_string(),
            column: name.to_string(),
        })
}

fn parse_u32(field: &str, context: &str) -> FitnessResult<u32> {
    field
        .trim()
        .parse::<u32>()
        .map_err(|_| FitnessError::InvalidValue(format!("{}: '{}'", context, field)))
}

fn parse_f64(field: &str, context: &str) -> FitnessResult<f64> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| FitnessError::InvalidValue(format!("{}: '{}'", context, field)))
}

/// Parse a boolean table field; accepts TRUE/FALSE, T/F, and 1/0 in any case
pub fn parse_bool(field: &str) -> FitnessResult<bool> {
    match field.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "1" => Ok(true),
        "false" | "f" | "0" => Ok(false),
        _ => Err(FitnessError::InvalidValue(format!(
            "expected boolean, got '{}'",
            field
        ))),
    }
}

/// Column indices for the gene annotation table
#[derive(Debug, Clone)]
struct GeneColumnIndices {
    locus_id: usize,
    scaffold: usize,
    begin: usize,
    end: usize,
    strand: usize,
    central: Option<usize>,
}

impl GeneColumnIndices {
    fn from_headers(headers: &csv::StringRecord) -> FitnessResult<Self> {
        Ok(Self {
            locus_id: required_column(headers, "gene", "locusId")?,
            scaffold: required_column(headers, "gene", "scaffold")?,
            begin: required_column(headers, "gene", "begin")?,
            end: required_column(headers, "gene", "end")?,
            strand: required_column(headers, "gene", "gene_strand")?,
            central: headers.iter().position(|col| col == "central"),
        })
    }
}

/// Read the gene annotation table
pub fn read_gene_table<P: AsRef<Path>>(path: P) -> FitnessResult<Vec<Gene>> {
    let mut reader = tsv_reader(&path)?;
    let indices = GeneColumnIndices::from_headers(reader.headers()?)?;

    let mut genes = Vec::new();
    for result in reader.records() {
        let record = result?;

        let mut gene = Gene::new(
            record[indices.locus_id].to_string(),
            record[indices.scaffold].to_string(),
            parse_u32(&record[indices.begin], "gene begin")?,
            parse_u32(&record[indices.end], "gene end")?,
            record[indices.strand].to_string(),
        );

        if let Some(central_idx) = indices.central {
            gene.central = Some(parse_bool(&record[central_idx])?);
        }

        genes.push(gene);
    }

    if genes.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "gene table contains no rows".to_string(),
        ));
    }

    Ok(genes)
}

/// Read the wide-format barcode count table. Every column after `barcode`,
/// `scaffold`, and `pos` is taken as a sample count column.
pub fn read_count_table<P: AsRef<Path>>(path: P) -> FitnessResult<CountTable> {
    let mut reader = tsv_reader(&path)?;
    let headers = reader.headers()?.clone();

    let barcode_idx = required_column(&headers, "count", "barcode")?;
    let scaffold_idx = required_column(&headers, "count", "scaffold")?;
    let pos_idx = required_column(&headers, "count", "pos")?;

    let key_columns = [barcode_idx, scaffold_idx, pos_idx];
    let sample_columns: Vec<usize> = (0..headers.len())
        .filter(|idx| !key_columns.contains(idx))
        .collect();
    let sample_names: Vec<String> = sample_columns
        .iter()
        .map(|&idx| headers[idx].to_string())
        .collect();

    let mut strains = Vec::new();
    let mut counts = Vec::new();

    for result in reader.records() {
        let record = result?;

        strains.push(RawStrain {
            barcode: record[barcode_idx].to_string(),
            scaffold: record[scaffold_idx].to_string(),
            position: parse_u32(&record[pos_idx], "insertion position")?,
        });

        let mut row = Vec::with_capacity(sample_columns.len());
        for &idx in &sample_columns {
            row.push(parse_f64(&record[idx], "read count")?);
        }
        counts.push(row);
    }

    if strains.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "count table contains no rows".to_string(),
        ));
    }

    if sample_names.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "count table contains no sample columns".to_string(),
        ));
    }

    Ok(CountTable {
        strains,
        sample_names,
        counts,
    })
}

/// Column indices for the sample metadata table
#[derive(Debug, Clone)]
struct SampleColumnIndices {
    filename: usize,
    date: usize,
    time: usize,
    id: usize,
    condition: usize,
    replicate: usize,
    reference: usize,
}

impl SampleColumnIndices {
    fn from_headers(headers: &csv::StringRecord) -> FitnessResult<Self> {
        Ok(Self {
            filename: required_column(headers, "metadata", "Filename")?,
            date: required_column(headers, "metadata", "Date")?,
            time: required_column(headers, "metadata", "Time")?,
            id: required_column(headers, "metadata", "ID")?,
            condition: required_column(headers, "metadata", "Condition")?,
            replicate: required_column(headers, "metadata", "Replicate")?,
            reference: required_column(headers, "metadata", "Reference")?,
        })
    }
}

/// Read the sample metadata table
pub fn read_sample_table<P: AsRef<Path>>(path: P) -> FitnessResult<Vec<Sample>> {
    let mut reader = tsv_reader(&path)?;
    let indices = SampleColumnIndices::from_headers(reader.headers()?)?;

    let mut samples = Vec::new();
    for result in reader.records() {
        let record = result?;

        samples.push(Sample {
            filename: record[indices.filename].to_string(),
            id: record[indices.id].to_string(),
            date: record[indices.date].to_string(),
            time: record[indices.time].to_string(),
            condition: record[indices.condition].to_string(),
            replicate: record[indices.replicate].to_string(),
            reference: parse_bool(&record[indices.reference])?,
        });
    }

    if samples.is_empty() {
        return Err(FitnessError::EmptyDataset(
            "metadata table contains no rows".to_string(),
        ));
    }

    Ok(samples)
}
