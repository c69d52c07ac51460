use crate::error::{NilError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The eight scalars the HMM is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HmmParams {
    /// non-informative rate: donor allele identical-by-state with the recurrent one
    pub nir: f64,
    /// SNP calling error rate on true homozygotes
    pub germ: f64,
    /// SNP calling error rate on true heterozygotes
    pub gert: f64,
    /// proportion of homozygote call errors that produce a het call
    pub p: f64,
    /// missing call rate
    pub mr: f64,
    /// recombination rate between adjacent markers
    pub r: f64,
    /// expected heterozygote frequency
    pub f1: f64,
    /// expected donor homozygote frequency
    pub f2: f64,
}

impl Default for HmmParams {
    fn default() -> Self {
        HmmParams {
            nir: 0.01,
            germ: 0.05,
            gert: 0.10,
            p: 0.5,
            mr: 0.15,
            r: 0.01,
            f1: 0.25,
            f2: 0.05,
        }
    }
}

impl HmmParams {
    pub fn for_coverage(coverage: Coverage) -> Self {
        let (nir, germ, gert, mr) = match coverage {
            Coverage::Low => (0.02, 0.08, 0.15, 0.20),
            Coverage::Medium => (0.01, 0.05, 0.10, 0.10),
            Coverage::High => (0.005, 0.02, 0.05, 0.05),
        };

        HmmParams {
            nir,
            germ,
            gert,
            mr,
            ..HmmParams::default()
        }
    }

    /// Implied recurrent-parent homozygote frequency
    pub fn f0(&self) -> f64 {
        1.0 - self.f1 - self.f2
    }

    pub fn named(&self) -> [(&'static str, f64); 8] {
        [
            ("nir", self.nir),
            ("germ", self.germ),
            ("gert", self.gert),
            ("p", self.p),
            ("mr", self.mr),
            ("r", self.r),
            ("f1", self.f1),
            ("f2", self.f2),
        ]
    }

    /// Rejects anything that is not a probability, and f1 + f2 > 1.
    /// Values are never clamped.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in self.named().iter() {
            if !value.is_finite() || *value < 0.0 || *value > 1.0 {
                return Err(NilError::InvalidParameter {
                    name: *name,
                    value: *value,
                });
            }
        }

        if self.f1 + self.f2 > 1.0 {
            return Err(NilError::InconsistentFrequencies {
                f1: self.f1,
                f2: self.f2,
            });
        }

        Ok(())
    }
}

impl fmt::Display for HmmParams {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut first = true;
        for (name, value) in self.named().iter() {
            if !first {
                write!(f, " ")?;
            }
            write!(f, "{}={}", name, value)?;
            first = false;
        }
        Ok(())
    }
}

/// Sequencing depth presets for the error and missing rates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Coverage {
    Low,
    Medium,
    High,
}

impl FromStr for Coverage {
    type Err = NilError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Coverage::Low),
            "medium" => Ok(Coverage::Medium),
            "high" => Ok(Coverage::High),
            _ => Err(NilError::UnknownCoverage(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_accepts_the_defaults() {
        let params = HmmParams::default();
        assert!(params.validate().is_ok());
        assert!((params.f0() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn it_rejects_out_of_range_values() {
        let params = HmmParams {
            germ: 1.5,
            ..HmmParams::default()
        };

        match params.validate() {
            Err(NilError::InvalidParameter { name, value }) => {
                assert_eq!(name, "germ");
                assert_eq!(value, 1.5);
            }
            other => panic!("expected InvalidParameter, got {:?}", other),
        }

        let params = HmmParams {
            r: -0.01,
            ..HmmParams::default()
        };
        assert!(params.validate().is_err());

        let params = HmmParams {
            nir: std::f64::NAN,
            ..HmmParams::default()
        };
        assert!(params.validate().is_err());
    }

    #[test]
    fn it_rejects_frequencies_above_one() {
        let params = HmmParams {
            f1: 0.7,
            f2: 0.4,
            ..HmmParams::default()
        };

        let err = params.validate().unwrap_err();
        assert!(err.is_configuration());
        match err {
            NilError::InconsistentFrequencies { .. } => (),
            other => panic!("expected InconsistentFrequencies, got {:?}", other),
        }
    }

    #[test]
    fn it_can_build_coverage_presets() {
        let low = HmmParams::for_coverage("low".parse().unwrap());
        assert_eq!(low.nir, 0.02);
        assert_eq!(low.mr, 0.20);
        assert_eq!(low.r, HmmParams::default().r);

        let high = HmmParams::for_coverage(Coverage::High);
        assert_eq!(high.germ, 0.02);
        assert_eq!(high.gert, 0.05);

        assert!("ultra".parse::<Coverage>().is_err());
    }

    #[test]
    fn it_displays_all_parameters() {
        let shown = HmmParams::default().to_string();
        assert_eq!(
            shown,
            "nir=0.01 germ=0.05 gert=0.1 p=0.5 mr=0.15 r=0.01 f1=0.25 f2=0.05"
        );
    }
}
