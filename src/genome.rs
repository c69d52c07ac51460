use crate::error::{NilError, Result};
use crate::model::{HmmModel, MISSING};
use crate::viterbi::Viterbi;
use ndarray::parallel::prelude::*;
use ndarray::prelude::*;
use std::cmp::Ordering;
use tracing::{debug, info};

// Comparison of chromosome names (1 < 10, 2 < 10, and 10 < x)
pub fn chr_cmp(l: &str, r: &str) -> Ordering {
    match (
        l.chars().all(|s| s.is_numeric()),
        r.chars().all(|s| s.is_numeric()),
    ) {
        // both l and r are numbers
        (true, true) => {
            // compare by length then value
            match l.len().cmp(&r.len()) {
                Ordering::Equal => l.cmp(r),
                o => o,
            }
        }
        // only one of l and r is a number, other is text
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        // both l and r are text
        (false, false) => l.cmp(r),
    }
}

/// Chromosome name to the ordered genotype-matrix columns on it. Can only
/// be built from an exact partition of `0..n_markers`.
///
/// Columns within a chromosome are decoded in the order given here, which
/// must be physical marker order; this is not checked.
#[derive(Debug, Clone, PartialEq)]
pub struct MarkerGrouping {
    chromosomes: Vec<(String, Vec<usize>)>,
    n_markers: usize,
}

impl MarkerGrouping {
    pub fn new(chromosomes: Vec<(String, Vec<usize>)>, n_markers: usize) -> Result<Self> {
        let mut owner: Vec<Option<usize>> = vec![None; n_markers];

        for (chr_ix, (chr, columns)) in chromosomes.iter().enumerate() {
            if chromosomes[..chr_ix].iter().any(|(c, _)| c == chr) {
                return Err(NilError::coverage(format!(
                    "chromosome {} is listed more than once",
                    chr
                )));
            }

            for &col in columns.iter() {
                match owner.get(col) {
                    None => {
                        return Err(NilError::coverage(format!(
                            "chromosome {} refers to column {}, but there are only {} markers",
                            chr, col, n_markers
                        )))
                    }
                    Some(Some(prev)) => {
                        return Err(NilError::coverage(format!(
                            "column {} is assigned to both chromosome {} and chromosome {}",
                            col, chromosomes[*prev].0, chr
                        )))
                    }
                    Some(None) => owner[col] = Some(chr_ix),
                }
            }
        }

        if let Some(col) = owner.iter().position(|o| o.is_none()) {
            let uncovered = owner.iter().filter(|o| o.is_none()).count();
            return Err(NilError::coverage(format!(
                "{} column(s) are not assigned to any chromosome, first is column {}",
                uncovered, col
            )));
        }

        Ok(MarkerGrouping {
            chromosomes,
            n_markers,
        })
    }

    /// Groups columns by their chromosome label, in order of first
    /// appearance. Every column is covered exactly once by construction.
    pub fn from_labels<S: AsRef<str>>(labels: &[S]) -> Self {
        let mut chromosomes: Vec<(String, Vec<usize>)> = Vec::new();

        for (col, label) in labels.iter().enumerate() {
            let label = label.as_ref();
            match chromosomes.iter_mut().find(|(c, _)| c == label) {
                Some((_, columns)) => columns.push(col),
                None => chromosomes.push((label.to_string(), vec![col])),
            }
        }

        MarkerGrouping {
            chromosomes,
            n_markers: labels.len(),
        }
    }

    pub fn n_markers(&self) -> usize {
        self.n_markers
    }

    pub fn n_chromosomes(&self) -> usize {
        self.chromosomes.len()
    }

    pub fn get(&self, chr: &str) -> Option<&[usize]> {
        self.chromosomes
            .iter()
            .find(|(c, _)| c == chr)
            .map(|(_, cols)| cols.as_slice())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[usize])> {
        self.chromosomes
            .iter()
            .map(|(c, cols)| (c.as_str(), cols.as_slice()))
    }

    pub fn sorted_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.chromosomes.iter().map(|(c, _)| c.as_str()).collect();
        names.sort_by(|l, r| chr_cmp(l, r));
        names
    }
}

/// Fails on the first cell outside 0..=3.
pub fn validate_genotypes(geno: ArrayView2<u8>) -> Result<()> {
    for ((row, col), &value) in geno.indexed_iter() {
        if value > MISSING {
            return Err(NilError::InvalidGenotype { row, col, value });
        }
    }
    Ok(())
}

// per-worker scratch space
struct Scratch<'m> {
    viterbi: Viterbi<'m>,
    obs: Vec<u8>,
    path: Vec<u8>,
}

/// Decodes every individual on every chromosome and returns the call
/// matrix. Each output cell is written at the column its marker occupies
/// in `geno`, so output column order equals input column order no matter
/// how the grouping orders chromosomes.
pub fn call_introgressions(
    geno: ArrayView2<u8>,
    grouping: &MarkerGrouping,
    model: &HmmModel,
) -> Result<Array2<u8>> {
    let (n_individuals, n_markers) = geno.dim();

    if n_markers != grouping.n_markers() {
        return Err(NilError::shape(format!(
            "genotype matrix has {} markers, grouping covers {}",
            n_markers,
            grouping.n_markers()
        )));
    }
    validate_genotypes(geno)?;

    debug!(
        "decoding {} individuals x {} markers on {} chromosomes ({})",
        n_individuals,
        n_markers,
        grouping.n_chromosomes(),
        model.params()
    );

    let mut calls = Array2::<u8>::zeros((n_individuals, n_markers));

    calls
        .axis_iter_mut(Axis(0))
        .into_par_iter()
        .zip(geno.axis_iter(Axis(0)).into_par_iter())
        .for_each_init(
            || Scratch {
                viterbi: Viterbi::new(model),
                obs: Vec::new(),
                path: Vec::new(),
            },
            |scratch, (mut out, observed)| {
                for (_, columns) in grouping.iter() {
                    scratch.obs.clear();
                    scratch.obs.extend(columns.iter().map(|&c| observed[c]));

                    scratch.path.clear();
                    scratch.path.resize(columns.len(), 0);

                    scratch.viterbi.decode_into(&scratch.obs, &mut scratch.path);

                    for (&c, &state) in columns.iter().zip(scratch.path.iter()) {
                        out[c] = state;
                    }
                }
            },
        );

    Ok(calls)
}

/// Convenience wrapper logging the run at info level.
pub fn call_genome(
    geno: ArrayView2<u8>,
    grouping: &MarkerGrouping,
    model: &HmmModel,
) -> Result<Array2<u8>> {
    for chr in grouping.sorted_names() {
        if let Some(cols) = grouping.get(chr) {
            info!("chromosome {}: {} markers", chr, cols.len());
        }
    }

    let calls = call_introgressions(geno, grouping, model)?;
    info!(
        "called {} individuals at {} markers",
        calls.nrows(),
        calls.ncols()
    );
    Ok(calls)
}
