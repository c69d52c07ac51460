//! Starting values for the HMM parameters estimated from the genotype
//! data itself.

use crate::model::MISSING;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Expected minor allele frequency across the population when every
/// marker is informative
pub const EXPECTED_MAF: f64 = 0.0156;
/// Lower bound on the estimated non-informative rate
pub const MIN_NIR: f64 = 0.001;
/// Total genetic map length in cM (maize)
pub const MAP_LENGTH_CM: f64 = 1500.0;
/// Effective number of meioses (two for a backcross followed by selfing)
pub const GENERATIONS: f64 = 2.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataEstimates {
    pub missing_rate: f64,
    pub observed_maf: Option<f64>,
    pub estimated_nir: f64,
    pub expected_maf: f64,
}

/// Fraction of cells that are missing calls
pub fn missing_rate(geno: ArrayView2<u8>) -> f64 {
    if geno.is_empty() {
        return 0.0;
    }
    let missing = geno.iter().filter(|&&g| g == MISSING).count();
    missing as f64 / geno.len() as f64
}

// mean dosage over the non-missing calls
fn observed_dosage(calls: impl Iterator<Item = u8>) -> Option<f64> {
    let (sum, n) = calls
        .filter(|&g| g != MISSING)
        .fold((0.0, 0usize), |(sum, n), g| (sum + g as f64, n + 1));

    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        None
    } else {
        Some(sum / n as f64)
    }
}

/// Mean across markers of the minor allele frequency among `rows`.
/// Markers without any observed call in `rows` are skipped.
pub fn mean_minor_allele_frequency(geno: ArrayView2<u8>, rows: &[usize]) -> Option<f64> {
    let per_marker = geno.axis_iter(Axis(1)).filter_map(|marker| {
        observed_dosage(rows.iter().map(|&r| marker[r])).map(|d| d * 0.5)
    });
    mean(per_marker)
}

/// Non-informative rate from the shortfall of the observed minor allele
/// frequency against the frequency expected if every marker were
/// informative.
pub fn nir_from_expected_maf(geno: ArrayView2<u8>, expected_maf: f64) -> DataEstimates {
    let all: Vec<usize> = (0..geno.nrows()).collect();
    let observed_maf = mean_minor_allele_frequency(geno, &all);

    let estimated_nir = match observed_maf {
        Some(maf) if expected_maf > 0.0 => ((expected_maf - maf) / expected_maf).max(MIN_NIR),
        _ => MIN_NIR,
    };

    DataEstimates {
        missing_rate: missing_rate(geno),
        observed_maf,
        estimated_nir,
        expected_maf,
    }
}

/// Non-informative rate as one minus the mean minor allele frequency of
/// the putative donor parents. Each donor contributes its own mean
/// non-missing dosage / 2. `None` when no donor has an observed call.
pub fn nir_from_donors(geno: ArrayView2<u8>, donor_rows: &[usize]) -> Option<f64> {
    let per_donor = donor_rows
        .iter()
        .filter_map(|&r| observed_dosage(geno.row(r).iter().copied()).map(|d| d * 0.5));
    mean(per_donor).map(|maf| 1.0 - maf)
}

/// Average recombination frequency between adjacent markers
pub fn average_recombination_rate(n_markers: usize, map_length_cm: f64, generations: f64) -> f64 {
    if n_markers == 0 {
        return 0.0;
    }
    generations * map_length_cm / (100.0 * n_markers as f64)
}
