use crate::error::{NilError, Result};
use crate::model::State;
use ndarray::prelude::*;
use serde::{Deserialize, Serialize};

/// Row indices of the subject groups a population is summarized by:
/// recurrent-parent controls, putative donor parents and the lines under
/// test.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubjectGroups {
    pub control: Vec<usize>,
    pub donor: Vec<usize>,
    pub test: Vec<usize>,
}

impl SubjectGroups {
    /// Resolves sample names into row indices; every sample that is
    /// neither a control nor a donor is a test line.
    pub fn from_names<S: AsRef<str>>(samples: &[String], control: &[S], donor: &[S]) -> Self {
        let has = |names: &[S], sample: &str| names.iter().any(|n| n.as_ref() == sample);

        let mut groups = SubjectGroups::default();
        for (ix, sample) in samples.iter().enumerate() {
            if has(control, sample) {
                groups.control.push(ix);
            } else if has(donor, sample) {
                groups.donor.push(ix);
            } else {
                groups.test.push(ix);
            }
        }
        groups
    }

    /// Fails if any index is not a row of an `n_individuals` matrix.
    pub fn validate(&self, n_individuals: usize) -> Result<()> {
        let groups = [
            ("control", &self.control),
            ("donor", &self.donor),
            ("test", &self.test),
        ];

        for (group, rows) in groups.iter() {
            if let Some(&index) = rows.iter().find(|&&ix| ix >= n_individuals) {
                return Err(NilError::GroupIndex {
                    group: *group,
                    index,
                    n_individuals,
                });
            }
        }
        Ok(())
    }
}

/// Summary of the calls of a set of individuals. Every ratio uses the
/// total marker count as denominator. Statistics over an empty set (or
/// over zero markers) are `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupMetrics {
    pub individuals: usize,
    pub recurrent_fraction: Option<f64>,
    pub het_fraction: Option<f64>,
    pub donor_fraction: Option<f64>,
    pub mean_het_rate: Option<f64>,
    pub std_het_rate: Option<f64>,
    pub mean_donor_rate: Option<f64>,
    pub std_donor_rate: Option<f64>,
    /// fraction of individuals called recurrent at every marker
    pub no_introgression_fraction: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub overall: GroupMetrics,
    pub control: Option<GroupMetrics>,
    pub donor: Option<GroupMetrics>,
    pub test: Option<GroupMetrics>,
}

// mean and population standard deviation
fn mean_std(values: &[f64]) -> (Option<f64>, Option<f64>) {
    if values.is_empty() {
        return (None, None);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;

    (Some(mean), Some(var.sqrt()))
}

/// Fails on the first call that is not a state index.
pub fn validate_calls(calls: ArrayView2<u8>) -> Result<()> {
    for ((row, col), &value) in calls.indexed_iter() {
        if State::from_index(value as usize).is_none() {
            return Err(NilError::InvalidCall { row, col, value });
        }
    }
    Ok(())
}

fn state_counts(row: ArrayView1<u8>) -> [usize; 3] {
    let mut counts = [0; 3];
    for &c in row.iter() {
        if let Some(s) = State::from_index(c as usize) {
            counts[s.index()] += 1;
        }
    }
    counts
}

pub fn group_metrics(calls: ArrayView2<u8>, rows: &[usize]) -> GroupMetrics {
    let n_markers = calls.ncols();

    if rows.is_empty() || n_markers == 0 {
        return GroupMetrics {
            individuals: rows.len(),
            recurrent_fraction: None,
            het_fraction: None,
            donor_fraction: None,
            mean_het_rate: None,
            std_het_rate: None,
            mean_donor_rate: None,
            std_donor_rate: None,
            no_introgression_fraction: None,
        };
    }

    let m = n_markers as f64;
    let mut totals = [0usize; 3];
    let mut het_rates = Vec::with_capacity(rows.len());
    let mut donor_rates = Vec::with_capacity(rows.len());
    let mut no_introgression = 0;

    for &ix in rows {
        let counts = state_counts(calls.row(ix));
        for s in 0..3 {
            totals[s] += counts[s];
        }

        het_rates.push(counts[State::Het.index()] as f64 / m);
        donor_rates.push(counts[State::Donor.index()] as f64 / m);

        if counts[State::Recurrent.index()] == n_markers {
            no_introgression += 1;
        }
    }

    let cells = (rows.len() * n_markers) as f64;
    let (mean_het_rate, std_het_rate) = mean_std(&het_rates);
    let (mean_donor_rate, std_donor_rate) = mean_std(&donor_rates);

    GroupMetrics {
        individuals: rows.len(),
        recurrent_fraction: Some(totals[0] as f64 / cells),
        het_fraction: Some(totals[1] as f64 / cells),
        donor_fraction: Some(totals[2] as f64 / cells),
        mean_het_rate,
        std_het_rate,
        mean_donor_rate,
        std_donor_rate,
        no_introgression_fraction: Some(no_introgression as f64 / rows.len() as f64),
    }
}

/// Population summary of a call matrix, optionally broken down by
/// subject group.
pub fn evaluate(calls: ArrayView2<u8>, groups: Option<&SubjectGroups>) -> Result<QualityReport> {
    validate_calls(calls)?;

    let all: Vec<usize> = (0..calls.nrows()).collect();
    let overall = group_metrics(calls, &all);

    match groups {
        None => Ok(QualityReport {
            overall,
            control: None,
            donor: None,
            test: None,
        }),
        Some(groups) => {
            groups.validate(calls.nrows())?;
            Ok(QualityReport {
                overall,
                control: Some(group_metrics(calls, &groups.control)),
                donor: Some(group_metrics(calls, &groups.donor)),
                test: Some(group_metrics(calls, &groups.test)),
            })
        }
    }
}

/// Per-individual call counts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleSummary {
    pub sample: String,
    pub total_markers: usize,
    pub recurrent: usize,
    pub het: usize,
    pub donor: usize,
    pub pct_recurrent: Option<f64>,
    pub pct_het: Option<f64>,
    pub pct_donor: Option<f64>,
}

pub fn sample_summaries(calls: ArrayView2<u8>, samples: &[String]) -> Result<Vec<SampleSummary>> {
    if samples.len() != calls.nrows() {
        return Err(NilError::shape(format!(
            "{} sample names for {} individuals",
            samples.len(),
            calls.nrows()
        )));
    }
    validate_calls(calls)?;

    let total = calls.ncols();
    let pct = |n: usize| {
        if total == 0 {
            None
        } else {
            Some(100.0 * n as f64 / total as f64)
        }
    };

    Ok(samples
        .iter()
        .zip(calls.outer_iter())
        .map(|(sample, row)| {
            let [recurrent, het, donor] = state_counts(row);
            SampleSummary {
                sample: sample.clone(),
                total_markers: total,
                recurrent,
                het,
                donor,
                pct_recurrent: pct(recurrent),
                pct_het: pct(het),
                pct_donor: pct(donor),
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn close(a: Option<f64>, b: f64) -> bool {
        a.map(|a| (a - b).abs() < 1e-12).unwrap_or(false)
    }

    fn calls() -> Array2<u8> {
        array![
            [0, 0, 0, 0],
            [0, 1, 1, 0],
            [2, 2, 0, 0],
            [0, 0, 0, 0],
            [1, 2, 2, 2]
        ]
    }

    #[test]
    fn it_can_summarize_a_population() {
        let calls = calls();
        let report = evaluate(calls.view(), None).unwrap();
        let m = &report.overall;

        assert_eq!(m.individuals, 5);
        assert!(close(m.recurrent_fraction, 12.0 / 20.0));
        assert!(close(m.het_fraction, 3.0 / 20.0));
        assert!(close(m.donor_fraction, 5.0 / 20.0));
        assert!(close(m.mean_het_rate, (0.0 + 0.5 + 0.0 + 0.0 + 0.25) / 5.0));
        assert!(close(m.mean_donor_rate, (0.0 + 0.0 + 0.5 + 0.0 + 0.75) / 5.0));
        assert!(close(m.no_introgression_fraction, 2.0 / 5.0));

        // population standard deviation of [0, .5, 0, 0, .25]
        let mean = 0.15;
        let var = [0.0f64, 0.5, 0.0, 0.0, 0.25]
            .iter()
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / 5.0;
        assert!(close(m.std_het_rate, var.sqrt()));

        assert!(report.control.is_none());
    }

    #[test]
    fn it_has_state_fractions_summing_to_one() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..20 {
            let rows = rng.gen_range(1..10);
            let cols = rng.gen_range(1..30);
            let calls = Array2::from_shape_fn((rows, cols), |_| rng.gen_range(0..3u8));

            let m = evaluate(calls.view(), None).unwrap().overall;
            let sum = m.recurrent_fraction.unwrap()
                + m.het_fraction.unwrap()
                + m.donor_fraction.unwrap();
            assert!((sum - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn it_can_summarize_subject_groups() {
        let calls = calls();
        let groups = SubjectGroups {
            control: vec![0],
            donor: vec![],
            test: vec![1, 2, 3, 4],
        };

        let report = evaluate(calls.view(), Some(&groups)).unwrap();

        let control = report.control.unwrap();
        assert!(close(control.recurrent_fraction, 1.0));
        assert!(close(control.no_introgression_fraction, 1.0));

        let donor = report.donor.unwrap();
        assert_eq!(donor.individuals, 0);
        assert_eq!(donor.mean_het_rate, None);
        assert_eq!(donor.no_introgression_fraction, None);

        let test = report.test.unwrap();
        assert!(close(test.no_introgression_fraction, 0.25));
        assert!(close(test.mean_donor_rate, (0.0 + 0.5 + 0.0 + 0.75) / 4.0));
    }

    #[test]
    fn it_rejects_out_of_range_group_indices() {
        let calls = calls();
        let groups = SubjectGroups {
            control: vec![0],
            donor: vec![5],
            test: vec![1],
        };

        match evaluate(calls.view(), Some(&groups)) {
            Err(NilError::GroupIndex { group, index, .. }) => {
                assert_eq!(group, "donor");
                assert_eq!(index, 5);
            }
            other => panic!("expected GroupIndex, got {:?}", other),
        }
    }

    #[test]
    fn it_rejects_cells_that_are_not_states() {
        let calls = array![[0u8, 3, 1, 2]];

        match evaluate(calls.view(), None) {
            Err(NilError::InvalidCall { row, col, value }) => {
                assert_eq!((row, col, value), (0, 1, 3));
            }
            other => panic!("expected InvalidCall, got {:?}", other),
        }

        let samples = vec![String::from("NIL-1")];
        assert!(matches!(
            sample_summaries(calls.view(), &samples),
            Err(NilError::InvalidCall { .. })
        ));
    }

    #[test]
    fn it_reports_empty_call_matrices_as_undefined() {
        let calls = Array2::<u8>::zeros((0, 4));
        let m = evaluate(calls.view(), None).unwrap().overall;
        assert_eq!(m.individuals, 0);
        assert_eq!(m.recurrent_fraction, None);

        let calls = Array2::<u8>::zeros((3, 0));
        let m = evaluate(calls.view(), None).unwrap().overall;
        assert_eq!(m.mean_donor_rate, None);
    }

    #[test]
    fn it_can_resolve_groups_by_name() {
        let samples: Vec<String> = vec!["B73", "NIL-1", "Mo17", "NIL-2"]
            .into_iter()
            .map(String::from)
            .collect();

        let groups = SubjectGroups::from_names(&samples, &["B73"], &["Mo17", "CML52"]);

        assert_eq!(groups.control, vec![0]);
        assert_eq!(groups.donor, vec![2]);
        assert_eq!(groups.test, vec![1, 3]);
    }

    #[test]
    fn it_can_summarize_samples() {
        let calls = calls();
        let samples: Vec<String> = (1..=5).map(|i| format!("NIL-{}", i)).collect();

        let summaries = sample_summaries(calls.view(), &samples).unwrap();

        assert_eq!(summaries.len(), 5);
        assert_eq!(summaries[4].sample, "NIL-5");
        assert_eq!(summaries[4].total_markers, 4);
        assert_eq!(
            (summaries[4].recurrent, summaries[4].het, summaries[4].donor),
            (0, 1, 3)
        );
        assert!(close(summaries[4].pct_donor, 75.0));

        assert!(sample_summaries(calls.view(), &samples[..3]).is_err());
    }
}
