use crate::error::{NilError, Result};
use crate::genome::{call_introgressions, validate_genotypes, MarkerGrouping};
use crate::model::HmmModel;
use crate::params::HmmParams;
use crate::quality::{evaluate, GroupMetrics, QualityReport, SubjectGroups};
use ndarray::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

const BALANCED_DONOR_WEIGHT: f64 = 0.7;
const BALANCED_INTROGRESSION_WEIGHT: f64 = 0.3;

/// Candidate values per parameter. A single value holds that parameter
/// fixed. In a grid file every list except `mr` may be left out and falls
/// back to `HmmParams::default()`; an absent `mr` stays empty and fails
/// `validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterGrid {
    #[serde(default = "fallback::nir")]
    pub nir: Vec<f64>,
    #[serde(default = "fallback::germ")]
    pub germ: Vec<f64>,
    #[serde(default = "fallback::gert")]
    pub gert: Vec<f64>,
    #[serde(default = "fallback::p")]
    pub p: Vec<f64>,
    #[serde(default)]
    pub mr: Vec<f64>,
    #[serde(default = "fallback::r")]
    pub r: Vec<f64>,
    #[serde(default = "fallback::f1")]
    pub f1: Vec<f64>,
    #[serde(default = "fallback::f2")]
    pub f2: Vec<f64>,
}

mod fallback {
    use crate::params::HmmParams;

    pub fn nir() -> Vec<f64> {
        vec![HmmParams::default().nir]
    }
    pub fn germ() -> Vec<f64> {
        vec![HmmParams::default().germ]
    }
    pub fn gert() -> Vec<f64> {
        vec![HmmParams::default().gert]
    }
    pub fn p() -> Vec<f64> {
        vec![HmmParams::default().p]
    }
    pub fn r() -> Vec<f64> {
        vec![HmmParams::default().r]
    }
    pub fn f1() -> Vec<f64> {
        vec![HmmParams::default().f1]
    }
    pub fn f2() -> Vec<f64> {
        vec![HmmParams::default().f2]
    }
}

impl ParameterGrid {
    pub fn fixed(params: &HmmParams) -> Self {
        ParameterGrid {
            nir: vec![params.nir],
            germ: vec![params.germ],
            gert: vec![params.gert],
            p: vec![params.p],
            mr: vec![params.mr],
            r: vec![params.r],
            f1: vec![params.f1],
            f2: vec![params.f2],
        }
    }

    pub fn with_mr(mut self, mr: Vec<f64>) -> Self {
        self.mr = mr;
        self
    }

    /// Replaces the `r` candidates with multiples of a base rate
    pub fn with_r_multipliers(mut self, base_r: f64, multipliers: &[f64]) -> Self {
        self.r = multipliers.iter().map(|m| base_r * m).collect();
        self
    }

    fn axes(&self) -> [(&'static str, &[f64]); 8] {
        [
            ("nir", self.nir.as_slice()),
            ("germ", self.germ.as_slice()),
            ("gert", self.gert.as_slice()),
            ("p", self.p.as_slice()),
            ("mr", self.mr.as_slice()),
            ("r", self.r.as_slice()),
            ("f1", self.f1.as_slice()),
            ("f2", self.f2.as_slice()),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        match self.axes().iter().find(|(_, values)| values.is_empty()) {
            Some((name, _)) => Err(NilError::EmptyGrid { name: *name }),
            None => Ok(()),
        }
    }

    /// Number of combinations in the Cartesian product
    pub fn len(&self) -> usize {
        self.axes().iter().map(|(_, values)| values.len()).product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `ix`-th combination; `nir` varies slowest and `f2` fastest.
    pub fn combination(&self, ix: usize) -> Option<HmmParams> {
        if ix >= self.len() {
            return None;
        }

        let mut picked = [0.0; 8];
        let mut rest = ix;
        for (slot, (_, values)) in self.axes().iter().enumerate().rev() {
            picked[slot] = values[rest % values.len()];
            rest /= values.len();
        }

        let [nir, germ, gert, p, mr, r, f1, f2] = picked;
        Some(HmmParams {
            nir,
            germ,
            gert,
            p,
            mr,
            r,
            f1,
            f2,
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = HmmParams> + '_ {
        (0..self.len()).filter_map(move |ix| self.combination(ix))
    }
}

/// How the best combination of a sweep is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Criterion {
    DonorRateMax,
    HetRateMax,
    /// `0.7 * mean_donor_rate + 0.3 * (1 - no_introgression_fraction)`,
    /// both terms as fractions in [0, 1]
    Balanced,
}

impl Default for Criterion {
    fn default() -> Self {
        Criterion::Balanced
    }
}

impl FromStr for Criterion {
    type Err = NilError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "donor-rate-max" | "donor_rate" => Ok(Criterion::DonorRateMax),
            "het-rate-max" | "het_rate" => Ok(Criterion::HetRateMax),
            "balanced" => Ok(Criterion::Balanced),
            _ => Err(NilError::UnknownCriterion(s.to_string())),
        }
    }
}

impl Criterion {
    pub fn score(self, metrics: &GroupMetrics) -> Option<f64> {
        match self {
            Criterion::DonorRateMax => metrics.mean_donor_rate,
            Criterion::HetRateMax => metrics.mean_het_rate,
            Criterion::Balanced => {
                let donor = metrics.mean_donor_rate?;
                let none = metrics.no_introgression_fraction?;
                Some(BALANCED_DONOR_WEIGHT * donor + BALANCED_INTROGRESSION_WEIGHT * (1.0 - none))
            }
        }
    }
}

/// Metrics a combination is judged by: the test lines when subject groups
/// were given, otherwise the whole population.
pub fn scored_metrics(report: &QualityReport) -> &GroupMetrics {
    report.test.as_ref().unwrap_or(&report.overall)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchEntry {
    pub params: HmmParams,
    pub quality: QualityReport,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedEntry {
    pub params: HmmParams,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub entries: Vec<SearchEntry>,
    pub skipped: Vec<SkippedEntry>,
    /// combinations never started because the search was cancelled
    pub not_run: usize,
}

impl SearchResults {
    /// Highest-scoring entry under `criterion`. Entries whose score is
    /// undefined are ignored; ties go to the earliest entry.
    pub fn select_best(&self, criterion: Criterion) -> Option<&SearchEntry> {
        let mut best: Option<(&SearchEntry, f64)> = None;

        for entry in self.entries.iter() {
            let score = match criterion.score(scored_metrics(&entry.quality)) {
                Some(s) if !s.is_nan() => s,
                _ => continue,
            };

            match best {
                Some((_, b)) if score <= b => (),
                _ => best = Some((entry, score)),
            }
        }

        best.map(|(entry, _)| entry)
    }
}

enum Outcome {
    Done(SearchEntry),
    Skipped(SkippedEntry),
    NotRun,
}

/// Sweeps a `ParameterGrid` over one genotype matrix. Combinations run in
/// parallel and each produces a self-describing record.
pub struct ParameterSearch {
    grid: ParameterGrid,
    groups: Option<SubjectGroups>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ParameterSearch {
    pub fn new(grid: ParameterGrid) -> Self {
        ParameterSearch {
            grid,
            groups: None,
            cancel: None,
        }
    }

    pub fn with_groups(mut self, groups: SubjectGroups) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Once `flag` is set, combinations that have not started yet are
    /// not run. Finished ones are kept.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn grid(&self) -> &ParameterGrid {
        &self.grid
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    fn run_one(
        &self,
        params: &HmmParams,
        geno: ArrayView2<u8>,
        grouping: &MarkerGrouping,
    ) -> Result<SearchEntry> {
        let model = HmmModel::from_params(params)?;
        let calls = call_introgressions(geno, grouping, &model)?;
        let quality = evaluate(calls.view(), self.groups.as_ref())?;

        Ok(SearchEntry {
            params: *params,
            quality,
        })
    }

    pub fn run(&self, geno: ArrayView2<u8>, grouping: &MarkerGrouping) -> Result<SearchResults> {
        self.grid.validate()?;

        // shape and coverage problems fail the whole search
        if geno.ncols() != grouping.n_markers() {
            return Err(NilError::shape(format!(
                "genotype matrix has {} markers, grouping covers {}",
                geno.ncols(),
                grouping.n_markers()
            )));
        }
        validate_genotypes(geno)?;
        if let Some(groups) = self.groups.as_ref() {
            groups.validate(geno.nrows())?;
        }

        let total = self.grid.len();
        info!("testing {} parameter combinations", total);

        let done = AtomicUsize::new(0);

        let outcomes: Vec<Outcome> = (0..total)
            .into_par_iter()
            .map(|ix| {
                if self.is_cancelled() {
                    return Ok(Outcome::NotRun);
                }

                let params = match self.grid.combination(ix) {
                    Some(p) => p,
                    None => return Ok(Outcome::NotRun),
                };

                let outcome = match self.run_one(&params, geno, grouping) {
                    Ok(entry) => {
                        debug!("finished {}", params);
                        Outcome::Done(entry)
                    }
                    Err(err) if err.is_configuration() => {
                        warn!("skipping {}: {}", params, err);
                        Outcome::Skipped(SkippedEntry {
                            params,
                            reason: err.to_string(),
                        })
                    }
                    Err(err) => return Err(err),
                };

                let n = done.fetch_add(1, Ordering::Relaxed) + 1;
                if n % 10 == 0 {
                    info!("progress: {}/{}", n, total);
                }

                Ok(outcome)
            })
            .collect::<Result<_>>()?;

        let mut results = SearchResults::default();
        for outcome in outcomes {
            match outcome {
                Outcome::Done(entry) => results.entries.push(entry),
                Outcome::Skipped(skipped) => results.skipped.push(skipped),
                Outcome::NotRun => results.not_run += 1,
            }
        }

        if results.not_run > 0 {
            warn!(
                "search cancelled: {} of {} combinations not run",
                results.not_run, total
            );
        }
        info!(
            "grid search completed: {} recorded, {} skipped",
            results.entries.len(),
            results.skipped.len()
        );

        Ok(results)
    }
}

/// Grid search settings as read from a JSON file, e.g.
///
/// ```json
/// { "grid": { "nir": [0.001, 0.01, 0.1], "germ": [0.01, 0.05], "mr": [0.1] },
///   "base_r": 0.01, "r_multipliers": [0.5, 1.0, 2.0],
///   "criterion": "balanced" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    pub grid: ParameterGrid,
    #[serde(default)]
    pub base_r: Option<f64>,
    #[serde(default)]
    pub r_multipliers: Option<Vec<f64>>,
    #[serde(default)]
    pub criterion: Criterion,
}

impl SearchConfig {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn to_grid(&self) -> ParameterGrid {
        match self.r_multipliers.as_ref() {
            None => self.grid.clone(),
            Some(multipliers) => {
                let base_r = self.base_r.unwrap_or_else(|| HmmParams::default().r);
                self.grid.clone().with_r_multipliers(base_r, multipliers)
            }
        }
    }
}
