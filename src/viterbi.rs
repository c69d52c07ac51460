//! Viterbi decoding of one chromosome of one individual.
//!
//! Works in log space. The missing call (3) is an emitted symbol with its
//! own emission column, so no marker is ever dropped or imputed before
//! decoding. Ties between equally likely states resolve to the lowest
//! state index, which keeps decoding deterministic.

use crate::error::{NilError, Result};
use crate::model::{HmmModel, State, MISSING, N_STATES};
use std::f64::NEG_INFINITY;

/// Reusable decoding buffers bound to one model.
pub struct Viterbi<'m> {
    model: &'m HmmModel,
    backptr: Vec<[u8; N_STATES]>,
}

#[inline]
fn argmax(values: &[f64; N_STATES]) -> (usize, f64) {
    let mut best = (0, NEG_INFINITY);
    for (ix, &v) in values.iter().enumerate() {
        if v > best.1 {
            best = (ix, v);
        }
    }
    best
}

impl<'m> Viterbi<'m> {
    pub fn new(model: &'m HmmModel) -> Self {
        Viterbi {
            model,
            backptr: Vec::new(),
        }
    }

    /// Writes the most probable state path for `obs` into `path` as state
    /// indices. `obs` must only hold values 0..=3 and `path` must have the
    /// same length.
    pub(crate) fn decode_into(&mut self, obs: &[u8], path: &mut [u8]) {
        assert_eq!(obs.len(), path.len());

        let n = obs.len();
        if n == 0 {
            return;
        }

        let model = self.model;

        self.backptr.clear();
        self.backptr.resize(n, [0; N_STATES]);

        let mut delta = [NEG_INFINITY; N_STATES];
        for s in 0..N_STATES {
            delta[s] = model.log_start(s) + model.log_emission(s, obs[0]);
        }

        for t in 1..n {
            let mut next = [NEG_INFINITY; N_STATES];
            let ptrs = &mut self.backptr[t];

            for j in 0..N_STATES {
                let mut scores = [NEG_INFINITY; N_STATES];
                for i in 0..N_STATES {
                    scores[i] = delta[i] + model.log_transition(i, j);
                }
                let (best_i, best_v) = argmax(&scores);

                next[j] = best_v + model.log_emission(j, obs[t]);
                ptrs[j] = best_i as u8;
            }

            delta = next;
        }

        let (mut state, _) = argmax(&delta);
        path[n - 1] = state as u8;

        for t in (1..n).rev() {
            state = self.backptr[t][state] as usize;
            path[t - 1] = state as u8;
        }
    }

    pub fn decode(&mut self, obs: &[u8]) -> Result<Vec<State>> {
        if let Some((pos, &value)) = obs.iter().enumerate().find(|&(_, &o)| o > MISSING) {
            return Err(NilError::shape(format!(
                "observation {} at position {} is not one of 0, 1, 2, 3",
                value, pos
            )));
        }

        let mut path = vec![0; obs.len()];
        self.decode_into(obs, &mut path);

        Ok(path
            .into_iter()
            .filter_map(|s| State::from_index(s as usize))
            .collect())
    }
}

/// Most probable state path for one observation sequence.
pub fn decode(model: &HmmModel, obs: &[u8]) -> Result<Vec<State>> {
    Viterbi::new(model).decode(obs)
}
