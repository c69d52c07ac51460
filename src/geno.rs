use crate::error::{NilError, Result};
use crate::genome::MarkerGrouping;
use crate::model::MISSING;
use crate::quality::SampleSummary;
use ndarray::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct Marker {
    pub chromosome: String,
    pub name: String,
    pub position: Option<u64>,
}

impl Marker {
    /// `<chr>_<pos>` when the position is known, otherwise the locus name
    pub fn label(&self) -> String {
        match self.position {
            Some(pos) => format!("{}_{}", self.chromosome, pos),
            None => self.name.clone(),
        }
    }
}

/// A genotype table: individuals x markers, plus the chromosome grouping
/// of the markers in file order.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub samples: Vec<String>,
    pub markers: Vec<Marker>,
    pub genotypes: Array2<u8>,
    pub grouping: MarkerGrouping,
}

/// Accepts dosage classes and unphased/phased VCF-style calls; anything
/// denoting a missing call maps to 3.
pub fn parse_genotype(token: &str) -> Option<u8> {
    match token.trim() {
        "0" | "0/0" | "0|0" => Some(0),
        "1" | "0/1" | "1/0" | "0|1" | "1|0" => Some(1),
        "2" | "1/1" | "1|1" => Some(2),
        "3" | "" | "." | "./." | ".|." | "NA" | "nan" | "NaN" => Some(MISSING),
        _ => None,
    }
}

struct Header {
    has_pos: bool,
    samples: Vec<String>,
}

// tab-separated fields without the line ending
fn fields(line: &str) -> Vec<&str> {
    line.trim_end_matches(|c: char| c == '\r' || c == '\n')
        .split('\t')
        .collect()
}

fn parse_header(line: &str) -> Result<Header> {
    let mut words = fields(line);
    while words.last().map(|w| w.trim().is_empty()).unwrap_or(false) {
        words.pop();
    }

    if words.len() < 2 || words[0] != "Chr" || words[1] != "Locus" {
        return Err(NilError::parse(
            0,
            "header must start with \"Chr\tLocus\"",
        ));
    }

    let has_pos = words.get(2).map(|w| *w == "Pos").unwrap_or(false);
    let skip_n = if has_pos { 3 } else { 2 };

    let samples: Vec<String> = words.into_iter().skip(skip_n).map(String::from).collect();
    if samples.is_empty() {
        return Err(NilError::parse(0, "header has no sample columns"));
    }

    Ok(Header { has_pos, samples })
}

fn read_line(header: &Header, line_no: usize, line: &str) -> Result<(Marker, Vec<u8>)> {
    let mut words = fields(line);
    let skip_n = if header.has_pos { 3 } else { 2 };
    let expected = skip_n + header.samples.len();

    // one trailing tab beyond the last sample column
    if words.len() == expected + 1 && words[expected].trim().is_empty() {
        words.pop();
    }

    if words.len() != expected {
        return Err(NilError::parse(
            line_no,
            format!(
                "expected {} columns, found {}",
                expected,
                words.len()
            ),
        ));
    }

    let position = if header.has_pos {
        let pos = words[2]
            .trim()
            .parse::<u64>()
            .map_err(|e| NilError::parse(line_no, format!("bad position {:?}: {}", words[2], e)))?;
        Some(pos)
    } else {
        None
    };

    let marker = Marker {
        chromosome: words[0].trim().to_string(),
        name: words[1].trim().to_string(),
        position,
    };

    let genotype = words[skip_n..]
        .iter()
        .map(|g| {
            parse_genotype(g)
                .ok_or_else(|| NilError::parse(line_no, format!("failed to parse genotype {:?}", g)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok((marker, genotype))
}

impl Dataset {
    // NOTE: markers are assumed to be sorted by chromosome and position
    // within each chromosome; decoding relies on it.
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        let mut header = None;
        let mut markers = Vec::new();
        let mut rows: Vec<u8> = Vec::new();

        for (ix, line) in reader.lines().enumerate() {
            let line = line?;
            let line_no = ix + 1;

            if line.starts_with('#') || line.trim().is_empty() {
                continue;
            }

            match header.as_ref() {
                None => {
                    header = Some(parse_header(&line).map_err(|e| match e {
                        NilError::Parse { message, .. } => NilError::parse(line_no, message),
                        other => other,
                    })?);
                }
                Some(h) => {
                    let (marker, genotype) = read_line(h, line_no, &line)?;
                    markers.push(marker);
                    rows.extend(genotype);
                }
            }
        }

        let header = header.ok_or_else(|| NilError::parse(0, "no header line found"))?;
        let n_samples = header.samples.len();

        // the file has one marker per line; transpose to individuals x markers
        let genotypes = Array2::from_shape_vec((markers.len(), n_samples), rows)
            .map_err(|e| NilError::shape(e.to_string()))?
            .reversed_axes()
            .as_standard_layout()
            .into_owned();

        let labels: Vec<&str> = markers.iter().map(|m| m.chromosome.as_str()).collect();
        let grouping = MarkerGrouping::from_labels(&labels);

        Ok(Dataset {
            samples: header.samples,
            markers,
            genotypes,
            grouping,
        })
    }

    pub fn read_file(path: &Path) -> Result<Self> {
        let f = File::open(path)?;
        Self::from_reader(BufReader::new(f))
    }

    pub fn sample_indices<S: AsRef<str>>(&self, names: &[S]) -> Vec<usize> {
        names
            .iter()
            .filter_map(|n| self.samples.iter().position(|s| s == n.as_ref()))
            .collect()
    }
}

fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.*}", 3, v),
        None => String::from("NA"),
    }
}

pub fn write_calls<W: Write>(
    out: &mut W,
    samples: &[String],
    markers: &[Marker],
    calls: ArrayView2<u8>,
) -> Result<()> {
    if calls.dim() != (samples.len(), markers.len()) {
        return Err(NilError::shape(format!(
            "call matrix is {:?}, expected {} samples x {} markers",
            calls.dim(),
            samples.len(),
            markers.len()
        )));
    }

    write!(out, "Sample")?;
    for marker in markers {
        write!(out, "\t{}", marker.label())?;
    }
    writeln!(out)?;

    for (sample, row) in samples.iter().zip(calls.outer_iter()) {
        write!(out, "{}", sample)?;
        for call in row.iter() {
            write!(out, "\t{}", call)?;
        }
        writeln!(out)?;
    }

    Ok(())
}

pub fn write_summaries<W: Write>(out: &mut W, summaries: &[SampleSummary]) -> Result<()> {
    writeln!(
        out,
        "Sample\tTotal_markers\tRecurrent_homoz\tHeterozygous\tDonor_homoz\tPct_recurrent\tPct_het\tPct_donor"
    )?;

    for s in summaries {
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
            s.sample,
            s.total_markers,
            s.recurrent,
            s.het,
            s.donor,
            fmt_pct(s.pct_recurrent),
            fmt_pct(s.pct_het),
            fmt_pct(s.pct_donor)
        )?;
    }

    Ok(())
}

pub fn write_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

/// Creates `path` and hands a buffered writer to `f`.
pub fn with_output_file<F>(path: &Path, f: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<File>) -> Result<()>,
{
    let mut out = BufWriter::new(File::create(path)?);
    f(&mut out)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::sample_summaries;

    fn table() -> String {
        [
            "# nNIL chip calls",
            "Chr\tLocus\tPos\tB73\tNIL-1\tNIL-2",
            "1\tS1_100\t100\t0/0\t0/0\t1/1",
            "1\tS1_250\t250\t0\t./.\t2",
            "2\tS2_75\t75\t0\t0/1\tNA",
            "1\tS1_900\t900\t0\t1\t2",
        ]
        .join("\n")
    }

    #[test]
    fn it_can_parse_genotype_tokens() {
        assert_eq!(parse_genotype("0/0"), Some(0));
        assert_eq!(parse_genotype("1|0"), Some(1));
        assert_eq!(parse_genotype("1/1"), Some(2));
        assert_eq!(parse_genotype("./."), Some(3));
        assert_eq!(parse_genotype(""), Some(3));
        assert_eq!(parse_genotype("3"), Some(3));
        assert_eq!(parse_genotype("B6"), None);
    }

    #[test]
    fn it_can_parse_header() {
        let header = parse_header("Chr\tLocus\tPos\tBXD1\tBXD2").unwrap();
        assert!(header.has_pos);
        assert_eq!(header.samples, vec!["BXD1", "BXD2"]);

        let header = parse_header("Chr\tLocus\tBXD1\tBXD2").unwrap();
        assert!(!header.has_pos);
        assert_eq!(header.samples, vec!["BXD1", "BXD2"]);

        assert!(parse_header("Locus\tChr\tBXD1").is_err());
        assert!(parse_header("Chr\tLocus\tPos").is_err());
    }

    #[test]
    fn it_can_read_a_genotype_table() {
        let dataset = Dataset::from_reader(table().as_bytes()).unwrap();

        assert_eq!(dataset.samples, vec!["B73", "NIL-1", "NIL-2"]);
        assert_eq!(dataset.markers.len(), 4);
        assert_eq!(dataset.markers[2].label(), "2_75");
        assert_eq!(
            dataset.genotypes,
            array![[0u8, 0, 0, 0], [0, 3, 1, 1], [2, 2, 3, 2]]
        );

        assert_eq!(dataset.grouping.get("1"), Some(&[0, 1, 3][..]));
        assert_eq!(dataset.grouping.get("2"), Some(&[2][..]));

        assert_eq!(dataset.sample_indices(&["NIL-2", "Mo17", "B73"]), vec![2, 0]);
    }

    #[test]
    fn it_accepts_trailing_tabs() {
        let text = "Chr\tLocus\tPos\tA\tB\t\n1\tm1\t10\t0\t2\t\n1\tm2\t20\t1\t\t\r\n";
        let dataset = Dataset::from_reader(text.as_bytes()).unwrap();

        assert_eq!(dataset.samples, vec!["A", "B"]);
        assert_eq!(dataset.genotypes, array![[0u8, 1], [2, 3]]);

        // an empty last cell without the trailing tab is still a missing call
        let text = "Chr\tLocus\tPos\tA\tB\n1\tm1\t10\t0\t\n";
        let dataset = Dataset::from_reader(text.as_bytes()).unwrap();
        assert_eq!(dataset.genotypes, array![[0u8], [3]]);
    }

    #[test]
    fn it_reports_bad_lines() {
        let bad = "Chr\tLocus\tPos\tA\tB\n1\tm1\t10\t0\n";
        match Dataset::from_reader(bad.as_bytes()) {
            Err(NilError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other.map(|d| d.samples)),
        }

        let bad = "Chr\tLocus\tPos\tA\n1\tm1\t10\tB6\n";
        assert!(Dataset::from_reader(bad.as_bytes()).is_err());

        assert!(Dataset::from_reader("# only comments\n".as_bytes()).is_err());
    }

    #[test]
    fn it_can_write_calls_and_summaries() {
        let dataset = Dataset::from_reader(table().as_bytes()).unwrap();
        let calls = array![[0u8, 0, 0, 0], [0, 0, 1, 1], [2, 2, 2, 2]];

        let mut buf = Vec::new();
        write_calls(&mut buf, &dataset.samples, &dataset.markers, calls.view()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "Sample\t1_100\t1_250\t2_75\t1_900");
        assert_eq!(lines[2], "NIL-1\t0\t0\t1\t1");

        let summaries = sample_summaries(calls.view(), &dataset.samples).unwrap();
        let mut buf = Vec::new();
        write_summaries(&mut buf, &summaries).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text.lines().nth(2),
            Some("NIL-1\t4\t2\t2\t0\t50.000\t50.000\t0.000")
        );

        assert!(write_calls(&mut Vec::new(), &dataset.samples[..2], &dataset.markers, calls.view()).is_err());
    }

    #[test]
    fn it_can_write_output_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("params.json");

        let params = crate::params::HmmParams::default();
        with_output_file(&path, |out| write_json(out, &params)).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let back: crate::params::HmmParams = serde_json::from_str(&text).unwrap();
        assert_eq!(back, params);
    }
}
