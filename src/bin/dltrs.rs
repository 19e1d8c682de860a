use anyhow::{Context, Result, bail};
use clap::Parser;
use log::{debug, info, warn};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use dltrs::discretiser::{DiscretisationConfig, EpochDiscretiser};
use dltrs::engine::{EngineConfig, ReconciliationEngine};
use dltrs::io::leafmap::read_leaf_map;
use dltrs::io::params::{RunParams, SamplingParams, load_params, save_params};
use dltrs::io::read_text;
use dltrs::mpr::{count_duplications, lca_map, seed_rates};
use dltrs::probs::DltRates;
use dltrs::progress;
use dltrs::rates::EdgeRateDensity;
use dltrs::realisation::RealisationWriter;
use dltrs::sampler::{RealisationSampler, max_probability_realisation};
use dltrs::tree::{GuestTree, HostTree};

#[derive(Parser, Debug)]
#[command(name = "dltrs")]
#[command(
    about = "Likelihood of a dated guest tree under duplication, loss and transfer in a host tree",
    long_about = None
)]
struct Cli {
    /// Dated, ultrametric host tree in Newick format, with a stem length on the root.
    host_tree: PathBuf,
    /// Guest tree in Newick format with branch lengths.
    guest_tree: PathBuf,
    /// Two columns: guest leaf name, host leaf name.
    leaf_map: PathBuf,
    #[arg(long, help = "JSON run parameters; overrides the options below")]
    params: Option<PathBuf>,
    #[arg(long = "dup")]
    duplication: Option<f64>,
    #[arg(long)]
    loss: Option<f64>,
    #[arg(long = "trans")]
    transfer: Option<f64>,
    #[arg(long, default_value_t = 3)]
    dmin: usize,
    #[arg(long, default_value_t = 10)]
    dmax: usize,
    #[arg(long, default_value_t = 0.05)]
    dts: f64,
    #[arg(long, help = "Slices in the stem epoch [default: from the number of guest leaves]")]
    dstem: Option<usize>,
    #[arg(long, default_value_t = 1.0)]
    rate_mean: f64,
    #[arg(long, default_value_t = 1.0)]
    rate_cv: f64,
    #[arg(
        long,
        num_args = 2,
        value_names = ["LOW", "HIGH"],
        help = "Use a uniform edge rate density instead of the gamma"
    )]
    uniform_rates: Option<Vec<f64>>,
    #[arg(long)]
    no_normalise_transfer: bool,
    #[arg(long, default_value_t = 0)]
    realisations: usize,
    #[arg(long, help = "Also write the maximum probability realisation")]
    map: bool,
    #[arg(long, default_value_t = 1)]
    seed: u64,
    #[arg(short, long, help = "Realisation output file [default: stdout]")]
    output: Option<PathBuf>,
    #[arg(long)]
    no_progress: bool,
    #[arg(long)]
    save_params: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let host = HostTree::from_newick(&read_text(&cli.host_tree)?)
        .with_context(|| format!("invalid host tree {:?}", cli.host_tree))?;
    let guest = GuestTree::from_newick(&read_text(&cli.guest_tree)?)
        .with_context(|| format!("invalid guest tree {:?}", cli.guest_tree))?;
    let leaf_map = read_leaf_map(&cli.leaf_map)?;
    info!(
        "host tree: {} leaves, guest tree: {} leaves, {} leaf map entries",
        host.tree().n_leaves(),
        guest.tree().n_leaves(),
        leaf_map.len()
    );

    let (config, sampling) = match &cli.params {
        Some(path) => {
            let params = load_params(path)?;
            (params.config, params.sampling)
        }
        None => (
            config_from_cli(&cli, &host, &guest, &leaf_map)?,
            SamplingParams {
                realisations: cli.realisations,
                map: cli.map,
                seed: cli.seed,
            },
        ),
    };
    info!("rates: {:?}", config.rates);

    let spinner = progress::stage_spinner("Setup", "Solving DLT probabilities", !cli.no_progress);
    let engine = ReconciliationEngine::new(host, guest, leaf_map, config)?;
    spinner.finish_with_message("DLT probabilities done");
    debug!("{engine}");

    let likelihood = engine.likelihood();
    if !(likelihood > 0.0) {
        warn!("guest tree has zero probability under the current parameters");
    }
    println!("Log-likelihood: {}", likelihood.ln());

    if sampling.realisations > 0 || sampling.map {
        let out: Box<dyn Write> = match &cli.output {
            Some(path) => Box::new(BufWriter::new(
                File::create(path).with_context(|| format!("failed to create {:?}", path))?,
            )),
            None => Box::new(std::io::stdout().lock()),
        };
        let mut writer = RealisationWriter::new(out, engine.host(), sampling.realisations > 0)?;
        let ctx = engine.context();
        if sampling.map {
            let real = max_probability_realisation(&ctx, engine.model())?;
            writer.write("map", 0, &real)?;
        }
        let mut sampler = RealisationSampler::new(SmallRng::seed_from_u64(sampling.seed));
        let pb = progress::realisation_bar(sampling.realisations as u64, !cli.no_progress);
        for i in 0..sampling.realisations {
            let real = sampler.sample(&ctx, engine.model())?;
            writer.write("sample", i, &real)?;
            pb.inc(1);
        }
        pb.finish();
        writer.flush()?;
    }

    if let Some(path) = &cli.save_params {
        save_params(path, &RunParams::from_engine(config, sampling, &engine))?;
        info!("parameters written to {}", path.display());
    }
    Ok(())
}

fn config_from_cli(
    cli: &Cli,
    host: &HostTree,
    guest: &GuestTree,
    leaf_map: &dltrs::io::leafmap::LeafMap,
) -> Result<EngineConfig> {
    let discretisation = DiscretisationConfig {
        n_min: cli.dmin,
        n_max: cli.dmax,
        delta_t: cli.dts,
        n_stem: cli
            .dstem
            .or_else(|| DiscretisationConfig::default_stem_slices(guest.tree().n_leaves())),
    };
    discretisation.validate()?;

    let rate_density = match cli.uniform_rates.as_deref() {
        Some([low, high]) => EdgeRateDensity::Uniform {
            low: *low,
            high: *high,
        },
        Some(_) => bail!("--uniform-rates takes exactly two values"),
        None => EdgeRateDensity::Gamma {
            mean: cli.rate_mean,
            cv: cli.rate_cv,
        },
    };

    let rates = match (cli.duplication, cli.loss, cli.transfer) {
        (Some(d), Some(l), Some(t)) => DltRates::new(d, l, t)?,
        (d, l, t) => {
            let disc = EpochDiscretiser::new(host, discretisation)?;
            let sigma = leaf_map.resolve(guest.tree(), host.tree())?;
            let map = lca_map(guest, host, &sigma)?;
            let seeded = seed_rates(&disc, count_duplications(guest, &map))?;
            DltRates::new(
                d.unwrap_or(seeded.duplication),
                l.unwrap_or(seeded.loss),
                t.unwrap_or(seeded.transfer),
            )?
        }
    };

    Ok(EngineConfig {
        discretisation,
        rates,
        normalise_transfer: !cli.no_normalise_transfer,
        rate_density,
        tolerance: Default::default(),
    })
}
