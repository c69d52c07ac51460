use anyhow::{bail, Context, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use structopt::StructOpt;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use nilhmm::estimate;
use nilhmm::geno::{self, Dataset};
use nilhmm::quality::{self, SubjectGroups};
use nilhmm::search::{self, Criterion, ParameterSearch, SearchConfig};
use nilhmm::{Coverage, HmmModel, HmmParams};

#[derive(StructOpt, Debug)]
struct GroupOpt {
    #[structopt(
        long = "control",
        number_of_values = 1,
        long_help = r"recurrent parent sample name, may be repeated"
    )]
    control: Vec<String>,

    #[structopt(
        long = "donor",
        number_of_values = 1,
        long_help = r"donor parent sample name, may be repeated"
    )]
    donor: Vec<String>,
}

#[derive(StructOpt, Debug)]
struct CallOpt {
    #[structopt(long = "geno")]
    genotype_file: PathBuf,

    #[structopt(
        long = "coverage",
        long_help = r"sequencing depth preset for nir, germ, gert and mr (low, medium, high)"
    )]
    coverage: Option<Coverage>,

    #[structopt(long = "nir")]
    nir: Option<f64>,
    #[structopt(long = "germ")]
    germ: Option<f64>,
    #[structopt(long = "gert")]
    gert: Option<f64>,
    #[structopt(long = "p")]
    p: Option<f64>,
    #[structopt(long = "mr")]
    mr: Option<f64>,
    #[structopt(long = "r")]
    r: Option<f64>,
    #[structopt(long = "f1")]
    f1: Option<f64>,
    #[structopt(long = "f2")]
    f2: Option<f64>,

    #[structopt(
        long = "estimate-nir",
        long_help = r"estimate nir from the donor samples, or from the expected minor allele frequency if no donor is given"
    )]
    estimate_nir: bool,

    #[structopt(long = "estimate-mr", long_help = r"use the observed missing rate as mr")]
    estimate_mr: bool,

    #[structopt(
        long = "estimate-r",
        long_help = r"derive r from the marker count and the genetic map length"
    )]
    estimate_r: bool,

    #[structopt(flatten)]
    groups: GroupOpt,

    #[structopt(short = "o", long = "output", default_value = "nilhmm")]
    output_prefix: String,

    #[structopt(
        short = "t",
        long = "threads",
        long_help = r"number of threads to use, defaults to one per core"
    )]
    threads: Option<usize>,
}

#[derive(StructOpt, Debug)]
struct SearchOpt {
    #[structopt(long = "geno")]
    genotype_file: PathBuf,

    #[structopt(long = "grid", long_help = r"JSON file with the candidate values")]
    grid_file: PathBuf,

    #[structopt(
        long = "criterion",
        long_help = r"donor-rate-max, het-rate-max or balanced; overrides the grid file"
    )]
    criterion: Option<Criterion>,

    #[structopt(long = "mr", long_help = r"missing call rate, replaces the grid's mr candidates")]
    mr: Option<f64>,

    #[structopt(
        long = "estimate-mr",
        long_help = r"use the observed missing rate as the only mr candidate"
    )]
    estimate_mr: bool,

    #[structopt(flatten)]
    groups: GroupOpt,

    #[structopt(short = "o", long = "output", default_value = "nilhmm")]
    output_prefix: String,

    #[structopt(short = "t", long = "threads")]
    threads: Option<usize>,
}

#[derive(StructOpt, Debug)]
#[structopt(name = "nilhmm", about = "HMM ancestry calls for near-isogenic lines")]
enum Opt {
    /// Call introgressions with one parameter set
    Call(CallOpt),
    /// Sweep a parameter grid and report the best combination
    Search(SearchOpt),
}

fn output_path(prefix: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}_{}", prefix, suffix))
}

fn init_threads(threads: Option<usize>) -> Result<()> {
    if let Some(n) = threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(n)
            .build_global()
            .context("failed to set up the thread pool")?;
    }
    Ok(())
}

fn read_dataset(path: &Path) -> Result<Dataset> {
    let dataset = Dataset::read_file(path)
        .with_context(|| format!("failed to read genotypes from {}", path.display()))?;

    info!(
        "read {} samples x {} markers on {} chromosomes",
        dataset.samples.len(),
        dataset.markers.len(),
        dataset.grouping.n_chromosomes()
    );
    Ok(dataset)
}

fn subject_groups(dataset: &Dataset, opt: &GroupOpt) -> Option<SubjectGroups> {
    if opt.control.is_empty() && opt.donor.is_empty() {
        return None;
    }

    for name in opt.control.iter().chain(opt.donor.iter()) {
        if !dataset.samples.contains(name) {
            warn!("sample {} not found in the genotype file", name);
        }
    }

    Some(SubjectGroups::from_names(
        &dataset.samples,
        &opt.control,
        &opt.donor,
    ))
}

fn resolve_params(opt: &CallOpt, dataset: &Dataset) -> HmmParams {
    let mut params = opt
        .coverage
        .map(HmmParams::for_coverage)
        .unwrap_or_default();

    let geno = dataset.genotypes.view();

    if opt.estimate_nir {
        let donors = dataset.sample_indices(&opt.groups.donor);
        match estimate::nir_from_donors(geno, &donors) {
            Some(nir) => {
                info!("estimated nir {:.4} from {} donor samples", nir, donors.len());
                params.nir = nir;
            }
            None => {
                let est = estimate::nir_from_expected_maf(geno, estimate::EXPECTED_MAF);
                info!(
                    "estimated nir {:.4} from observed MAF {:?} (expected {})",
                    est.estimated_nir, est.observed_maf, est.expected_maf
                );
                params.nir = est.estimated_nir;
            }
        }
    }

    if opt.estimate_mr {
        params.mr = estimate::missing_rate(geno);
        info!("estimated mr {:.4}", params.mr);
    } else if opt.mr.is_none() && opt.coverage.is_none() {
        warn!(
            "no --mr, --estimate-mr or --coverage given, using mr = {}",
            params.mr
        );
    }

    if opt.estimate_r {
        params.r = estimate::average_recombination_rate(
            dataset.markers.len(),
            estimate::MAP_LENGTH_CM,
            estimate::GENERATIONS,
        );
        info!("estimated r {:.6}", params.r);
    }

    // explicit values win over presets and estimates
    let mut overrides = [
        (&mut params.nir, opt.nir),
        (&mut params.germ, opt.germ),
        (&mut params.gert, opt.gert),
        (&mut params.p, opt.p),
        (&mut params.mr, opt.mr),
        (&mut params.r, opt.r),
        (&mut params.f1, opt.f1),
        (&mut params.f2, opt.f2),
    ];
    for (field, value) in overrides.iter_mut() {
        if let Some(v) = *value {
            **field = v;
        }
    }

    params
}

fn run_call(opt: CallOpt) -> Result<()> {
    init_threads(opt.threads)?;

    let dataset = read_dataset(&opt.genotype_file)?;
    let groups = subject_groups(&dataset, &opt.groups);

    let params = resolve_params(&opt, &dataset);
    info!("parameters: {}", params);

    let model = HmmModel::from_params(&params).context("invalid model parameters")?;
    let calls = nilhmm::call_genome(dataset.genotypes.view(), &dataset.grouping, &model)?;

    let report = quality::evaluate(calls.view(), groups.as_ref())?;
    let summaries = quality::sample_summaries(calls.view(), &dataset.samples)?;

    let prefix = &opt.output_prefix;

    let path = output_path(prefix, "introgression_calls.tsv");
    geno::with_output_file(&path, |out| {
        geno::write_calls(out, &dataset.samples, &dataset.markers, calls.view())
    })
    .with_context(|| format!("failed to write {}", path.display()))?;

    let path = output_path(prefix, "introgression_summary.tsv");
    geno::with_output_file(&path, |out| geno::write_summaries(out, &summaries))
        .with_context(|| format!("failed to write {}", path.display()))?;

    let path = output_path(prefix, "parameters.json");
    geno::with_output_file(&path, |out| geno::write_json(out, &params))
        .with_context(|| format!("failed to write {}", path.display()))?;

    let path = output_path(prefix, "quality.json");
    geno::with_output_file(&path, |out| geno::write_json(out, &report))
        .with_context(|| format!("failed to write {}", path.display()))?;

    let overall = &report.overall;
    info!(
        "mean het rate {:?}, mean donor rate {:?}, lines without introgression {:?}",
        overall.mean_het_rate, overall.mean_donor_rate, overall.no_introgression_fraction
    );

    Ok(())
}

fn run_search(opt: SearchOpt) -> Result<()> {
    init_threads(opt.threads)?;

    let dataset = read_dataset(&opt.genotype_file)?;

    let config = File::open(&opt.grid_file)
        .map_err(nilhmm::NilError::from)
        .and_then(SearchConfig::from_reader)
        .with_context(|| format!("failed to read grid from {}", opt.grid_file.display()))?;
    let criterion = opt.criterion.unwrap_or(config.criterion);

    let mut grid = config.to_grid();
    if let Some(mr) = opt.mr {
        grid = grid.with_mr(vec![mr]);
    } else if opt.estimate_mr {
        let mr = estimate::missing_rate(dataset.genotypes.view());
        info!("estimated mr {:.4}", mr);
        grid = grid.with_mr(vec![mr]);
    } else if grid.mr.is_empty() {
        bail!(
            "{} gives no mr candidates; list them in the grid or pass --mr or --estimate-mr",
            opt.grid_file.display()
        );
    }

    let mut sweep = ParameterSearch::new(grid);
    if let Some(groups) = subject_groups(&dataset, &opt.groups) {
        sweep = sweep.with_groups(groups);
    }
    info!("{} combinations, selecting by {:?}", sweep.grid().len(), criterion);

    let results = sweep.run(dataset.genotypes.view(), &dataset.grouping)?;

    let prefix = &opt.output_prefix;

    let path = output_path(prefix, "grid_search_results.json");
    geno::with_output_file(&path, |out| geno::write_json(out, &results))
        .with_context(|| format!("failed to write {}", path.display()))?;

    match results.select_best(criterion) {
        Some(best) => {
            info!(
                "best parameters by {:?}: {} (score {:?})",
                criterion,
                best.params,
                criterion.score(search::scored_metrics(&best.quality))
            );

            let path = output_path(prefix, "best_parameters.json");
            geno::with_output_file(&path, |out| geno::write_json(out, &best.params))
                .with_context(|| format!("failed to write {}", path.display()))?;
        }
        None => warn!("no combination produced a defined score"),
    }

    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "nilhmm=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match Opt::from_args() {
        Opt::Call(opt) => run_call(opt),
        Opt::Search(opt) => run_search(opt),
    }
}
