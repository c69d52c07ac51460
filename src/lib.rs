//! Ancestry calling for near-isogenic lines: a three-state hidden Markov
//! model over SNP calls, decoded per chromosome with Viterbi, plus the
//! quality metrics and grid search used to tune its parameters.

pub mod error;
pub mod estimate;
pub mod geno;
pub mod genome;
pub mod model;
pub mod params;
pub mod quality;
pub mod search;
pub mod viterbi;

pub use error::{NilError, Result};
pub use genome::{call_genome, call_introgressions, MarkerGrouping};
pub use model::{HmmModel, State};
pub use params::{Coverage, HmmParams};
pub use quality::{evaluate, QualityReport, SubjectGroups};
pub use search::{Criterion, ParameterGrid, ParameterSearch, SearchResults};
