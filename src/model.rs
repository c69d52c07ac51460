use crate::error::{NilError, Result};
use crate::params::HmmParams;
use ndarray::prelude::*;

pub const N_STATES: usize = 3;
/// Observed symbols: the three dosage classes plus missing
pub const N_SYMBOLS: usize = 4;
pub const MISSING: u8 = 3;

/// Ancestry state of one marker in one individual
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Copy, Hash)]
pub enum State {
    Recurrent = 0,
    Het = 1,
    Donor = 2,
}

impl State {
    pub const ALL: [State; N_STATES] = [State::Recurrent, State::Het, State::Donor];

    pub fn from_index(ix: usize) -> Option<State> {
        State::ALL.get(ix).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Start, transition and emission probabilities derived from one
/// `HmmParams`. Immutable once built; shared by reference across every
/// chromosome and individual decoded with it.
#[derive(Debug, Clone)]
pub struct HmmModel {
    params: HmmParams,
    start: Array1<f64>,
    transition: Array2<f64>,
    emission: Array2<f64>,
    log_start: [f64; N_STATES],
    log_transition: [[f64; N_STATES]; N_STATES],
    log_emission: [[f64; N_SYMBOLS]; N_STATES],
}

// Splits the recombination mass `r` between two destination states in
// proportion to their expected frequencies.
fn split_recombination(state: usize, r: f64, a: f64, b: f64) -> Result<(f64, f64)> {
    let total = a + b;
    if total > 0.0 {
        Ok((r * a / total, r * b / total))
    } else if r == 0.0 {
        Ok((0.0, 0.0))
    } else {
        Err(NilError::DegenerateTransition { state })
    }
}

/// 3x3 transition matrix. A single crossover between adjacent markers is
/// the only way to leave a state.
pub fn transition_matrix(params: &HmmParams) -> Result<Array2<f64>> {
    let HmmParams { r, f1, f2, .. } = *params;
    let f0 = params.f0();

    let (p01, p02) = split_recombination(0, r, f1, f2)?;
    let (p10, p12) = split_recombination(1, r, f0, f2)?;
    let (p20, p21) = split_recombination(2, r, f0, f1)?;

    Ok(array![
        [1.0 - r, p01, p02],
        [p10, 1.0 - r, p12],
        [p20, p21, 1.0 - r]
    ])
}

/// 3x4 emission matrix; columns are the observed calls 0, 1, 2 and missing.
pub fn emission_matrix(params: &HmmParams) -> Array2<f64> {
    let HmmParams {
        nir,
        germ,
        gert,
        p,
        mr,
        ..
    } = *params;
    let obs = 1.0 - mr;

    array![
        [
            (1.0 - germ) * obs,
            p * germ * obs,
            (1.0 - p) * germ * obs,
            mr
        ],
        [
            ((1.0 - nir) * 0.5 * gert + nir * (1.0 - germ)) * obs,
            ((1.0 - nir) * (1.0 - gert) + nir * germ * p) * obs,
            ((1.0 - nir) * 0.5 * gert + nir * germ * (1.0 - p)) * obs,
            mr
        ],
        [
            ((1.0 - nir) * germ * (1.0 - p) + nir * (1.0 - germ)) * obs,
            germ * p * obs,
            ((1.0 - nir) * (1.0 - germ) + nir * germ * (1.0 - p)) * obs,
            mr
        ]
    ]
}

impl HmmModel {
    pub fn from_params(params: &HmmParams) -> Result<HmmModel> {
        params.validate()?;

        let start = array![params.f0(), params.f1, params.f2];
        let transition = transition_matrix(params)?;
        let emission = emission_matrix(params);

        let mut log_start = [0.0; N_STATES];
        let mut log_transition = [[0.0; N_STATES]; N_STATES];
        let mut log_emission = [[0.0; N_SYMBOLS]; N_STATES];

        for i in 0..N_STATES {
            log_start[i] = start[i].ln();
            for j in 0..N_STATES {
                log_transition[i][j] = transition[[i, j]].ln();
            }
            for o in 0..N_SYMBOLS {
                log_emission[i][o] = emission[[i, o]].ln();
            }
        }

        Ok(HmmModel {
            params: *params,
            start,
            transition,
            emission,
            log_start,
            log_transition,
            log_emission,
        })
    }

    pub fn params(&self) -> &HmmParams {
        &self.params
    }

    pub fn start(&self) -> ArrayView1<f64> {
        self.start.view()
    }

    pub fn transition(&self) -> ArrayView2<f64> {
        self.transition.view()
    }

    pub fn emission(&self) -> ArrayView2<f64> {
        self.emission.view()
    }

    #[inline]
    pub(crate) fn log_start(&self, state: usize) -> f64 {
        self.log_start[state]
    }

    #[inline]
    pub(crate) fn log_transition(&self, from: usize, to: usize) -> f64 {
        self.log_transition[from][to]
    }

    #[inline]
    pub(crate) fn log_emission(&self, state: usize, obs: u8) -> f64 {
        self.log_emission[state][obs as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_rows_sum_to_one(m: ArrayView2<f64>) {
        for (ix, row) in m.outer_iter().enumerate() {
            let sum: f64 = row.sum();
            assert!((sum - 1.0).abs() < 1e-9, "row {} sums to {}", ix, sum);
        }
    }

    #[test]
    fn it_builds_stochastic_matrices_for_the_defaults() {
        let model = HmmModel::from_params(&HmmParams::default()).unwrap();

        assert_eq!(model.transition().dim(), (3, 3));
        assert_eq!(model.emission().dim(), (3, 4));
        assert_rows_sum_to_one(model.transition());
        assert_rows_sum_to_one(model.emission());
        assert!((model.start().sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn it_builds_stochastic_matrices_across_a_grid() {
        let values = [0.0, 0.001, 0.1, 0.5, 0.9, 1.0];
        let freqs = [(0.25, 0.05), (0.0, 0.3), (0.5, 0.5), (0.007813, 0.011179)];

        for &a in values.iter() {
            for &b in values.iter() {
                for &(f1, f2) in freqs.iter() {
                    let params = HmmParams {
                        nir: a,
                        germ: b,
                        gert: 1.0 - a,
                        p: b,
                        mr: a * 0.5,
                        r: b * 0.1,
                        f1,
                        f2,
                    };
                    let model = HmmModel::from_params(&params).unwrap();
                    assert_rows_sum_to_one(model.transition());
                    assert_rows_sum_to_one(model.emission());
                }
            }
        }
    }

    #[test]
    fn it_splits_recombination_by_relative_frequency() {
        let params = HmmParams::default();
        let t = transition_matrix(&params).unwrap();

        let r = params.r;
        assert!((t[[0, 0]] - (1.0 - r)).abs() < 1e-15);
        assert!((t[[0, 1]] - r * 0.25 / 0.30).abs() < 1e-15);
        assert!((t[[0, 2]] - r * 0.05 / 0.30).abs() < 1e-15);
        assert!((t[[1, 0]] - r * 0.70 / 0.75).abs() < 1e-15);
        assert!((t[[1, 2]] - r * 0.05 / 0.75).abs() < 1e-15);
        assert!((t[[2, 0]] - r * 0.70 / 0.95).abs() < 1e-15);
        assert!((t[[2, 1]] - r * 0.25 / 0.95).abs() < 1e-15);
    }

    #[test]
    fn it_preserves_the_emission_coefficients() {
        let params = HmmParams {
            nir: 0.1,
            germ: 0.2,
            gert: 0.3,
            p: 0.4,
            mr: 0.5,
            ..HmmParams::default()
        };
        let e = emission_matrix(&params);

        let close = |a: f64, b: f64| (a - b).abs() < 1e-12;
        assert!(close(e[[0, 0]], 0.8 * 0.5));
        assert!(close(e[[0, 1]], 0.4 * 0.2 * 0.5));
        assert!(close(e[[0, 2]], 0.6 * 0.2 * 0.5));
        assert!(close(e[[1, 0]], (0.9 * 0.5 * 0.3 + 0.1 * 0.8) * 0.5));
        assert!(close(e[[1, 1]], (0.9 * 0.7 + 0.1 * 0.2 * 0.4) * 0.5));
        assert!(close(e[[1, 2]], (0.9 * 0.5 * 0.3 + 0.1 * 0.2 * 0.6) * 0.5));
        assert!(close(e[[2, 0]], (0.9 * 0.2 * 0.6 + 0.1 * 0.8) * 0.5));
        assert!(close(e[[2, 1]], 0.2 * 0.4 * 0.5));
        assert!(close(e[[2, 2]], (0.9 * 0.8 + 0.1 * 0.2 * 0.6) * 0.5));
        for row in 0..3 {
            assert_eq!(e[[row, 3]], 0.5);
        }
    }

    #[test]
    fn it_never_clamps_invalid_parameters() {
        let bad = HmmParams {
            f1: 0.8,
            f2: 0.3,
            ..HmmParams::default()
        };
        assert!(HmmModel::from_params(&bad).is_err());

        let bad = HmmParams {
            mr: 1.01,
            ..HmmParams::default()
        };
        assert!(HmmModel::from_params(&bad).is_err());
    }

    #[test]
    fn it_rejects_unsplittable_recombination() {
        let params = HmmParams {
            f1: 0.0,
            f2: 0.0,
            ..HmmParams::default()
        };

        match HmmModel::from_params(&params) {
            Err(NilError::DegenerateTransition { state }) => assert_eq!(state, 0),
            other => panic!("expected DegenerateTransition, got {:?}", other),
        }

        // all expected mass on one state leaves the other rows nowhere to go
        let params_het = HmmParams {
            f1: 1.0,
            f2: 0.0,
            ..HmmParams::default()
        };
        assert!(matches!(
            HmmModel::from_params(&params_het),
            Err(NilError::DegenerateTransition { state: 1 })
        ));

        let params_donor = HmmParams {
            f1: 0.0,
            f2: 1.0,
            ..HmmParams::default()
        };
        assert!(matches!(
            HmmModel::from_params(&params_donor),
            Err(NilError::DegenerateTransition { state: 2 })
        ));

        // without recombination there is nothing to split
        let params = HmmParams { r: 0.0, ..params };
        let model = HmmModel::from_params(&params).unwrap();
        assert_eq!(model.transition(), Array2::<f64>::eye(3).view());
    }
}
