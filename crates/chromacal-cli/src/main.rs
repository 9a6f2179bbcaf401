//! chromacal CLI: chromatic aberration calibration and spectral reconstruction.

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use chromacal::admm::{AdmmConfig, Observation, PatchConfig, ReconstructionProblem, SpectralWarp};
use chromacal::color::gaussian_sensitivities;
use chromacal::disk::{correspondences, DiskFit, DiskFitConfig};
use chromacal::io::{load_cube, load_plane, read_json, save_cube, save_plane, write_json};
use chromacal::raytrace::{best_focus, irradiance, trace_spectrum, IrradianceConfig};
use chromacal::{
    BayerPattern, ColorWeights, Cube, DemosaicMethod, DispersionFitConfig, DispersionModel,
    GridSearchConfig, LensSystem, SpectralSampling, TraceConfig, WeightNormalization,
};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

/// Effective wavelengths assumed for R, G, B channels when none are given.
const DEFAULT_RGB_WAVELENGTHS: [f64; 3] = [610.0, 540.0, 465.0];

#[derive(Parser)]
#[command(name = "chromacal")]
#[command(about = "Calibrate chromatic aberration and reconstruct spectral images")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Trace a lens system: spot diagrams and best focus per wavelength.
    Raytrace(RaytraceArgs),

    /// Detect calibration disks in every channel of an image.
    FitDisks(FitDisksArgs),

    /// Match disks across channels and fit a dispersion model.
    FitDispersion(FitDispersionArgs),

    /// Realign the channels of an image with a dispersion model.
    Correct(CorrectArgs),

    /// Reconstruct a spectral cube with patch-wise ADMM.
    Reconstruct(ReconstructArgs),

    /// Grid-search the ADMM prior weights (L-hypersurface analysis).
    SelectWeights(SelectWeightsArgs),

    /// Score baseline demosaicking methods against ground-truth images.
    Evaluate(EvaluateArgs),
}

#[derive(Debug, Clone, Args)]
struct RaytraceArgs {
    /// Lens system (JSON). Defaults to a 50 mm N-BK7 singlet.
    #[arg(long)]
    lens: Option<PathBuf>,

    /// Trace configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to write spots and focus results (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Comma-separated wavelengths in nm (overrides the config).
    #[arg(long, value_delimiter = ',')]
    wavelengths: Option<Vec<f64>>,

    /// Half-width (mm) of the best-focus search around the sensor plane.
    #[arg(long, default_value = "5.0")]
    focus_range_mm: f64,

    /// Directory for one irradiance image per wavelength.
    #[arg(long)]
    irradiance_dir: Option<PathBuf>,

    /// Irradiance grid (JSON); centred on each spot's centroid.
    #[arg(long)]
    irradiance_config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct FitDisksArgs {
    /// Image of the disk target.
    #[arg(long)]
    image: PathBuf,

    /// Path to write per-channel disk fits (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Disk-fit configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct FitDispersionArgs {
    /// Output of `fit-disks`.
    #[arg(long)]
    disks: PathBuf,

    /// Path to write the dispersion model (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Channel whose disks define the reference frame.
    #[arg(long, default_value = "1")]
    reference_channel: usize,

    /// Comma-separated wavelength (nm) of every channel.
    #[arg(long, value_delimiter = ',')]
    wavelengths: Option<Vec<f64>>,

    /// Maximum centre distance (px) for a disk match.
    #[arg(long, default_value = "10.0")]
    max_distance: f64,

    /// Dispersion-fit configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct CorrectArgs {
    #[arg(long)]
    image: PathBuf,

    /// Dispersion model (JSON).
    #[arg(long)]
    model: PathBuf,

    #[arg(long)]
    out: PathBuf,

    /// Comma-separated wavelength (nm) of every channel.
    #[arg(long, value_delimiter = ',')]
    wavelengths: Option<Vec<f64>>,
}

#[derive(Debug, Clone, Args)]
#[group(required = true, multiple = false)]
struct ObservationArgs {
    /// Bayer RAW capture (single-channel image).
    #[arg(long)]
    raw: Option<PathBuf>,

    /// Demosaiced RGB capture.
    #[arg(long)]
    rgb: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SolverArgs {
    #[command(flatten)]
    input: ObservationArgs,

    /// Bayer layout of a RAW capture.
    #[arg(long, value_enum, default_value_t = PatternArg::Rggb)]
    pattern: PatternArg,

    /// Dispersion model (JSON) to undo during reconstruction.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Spectral setup (JSON): band wavelengths and channel weights.
    #[arg(long)]
    weights: Option<PathBuf>,

    /// ADMM configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    patch_size: Option<usize>,

    #[arg(long)]
    padding: Option<usize>,
}

#[derive(Debug, Clone, Args)]
struct ReconstructArgs {
    #[command(flatten)]
    solver: SolverArgs,

    /// Path to write the reconstructed cube (JSON).
    #[arg(long)]
    out: PathBuf,

    /// Optional image of the cube projected back through the weights.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
struct SelectWeightsArgs {
    #[command(flatten)]
    solver: SolverArgs,

    /// Ground-truth cube (JSON) for error-based selection.
    #[arg(long)]
    truth: Option<PathBuf>,

    /// Weight axes (JSON `GridSearchConfig`).
    #[arg(long)]
    grid: Option<PathBuf>,

    #[arg(long)]
    out_csv: PathBuf,

    #[arg(long)]
    out_json: PathBuf,
}

#[derive(Debug, Clone, Args)]
struct EvaluateArgs {
    /// Ground-truth RGB images.
    #[arg(long, num_args = 1.., required = true)]
    truth: Vec<PathBuf>,

    #[arg(long)]
    out_csv: PathBuf,

    #[arg(long, value_enum, default_value_t = PatternArg::Rggb)]
    pattern: PatternArg,

    /// Pixels excluded on every side before scoring.
    #[arg(long, default_value = "2")]
    border: usize,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PatternArg {
    Rggb,
    Bggr,
    Grbg,
    Gbrg,
}

impl PatternArg {
    fn to_core(self) -> BayerPattern {
        match self {
            Self::Rggb => BayerPattern::Rggb,
            Self::Bggr => BayerPattern::Bggr,
            Self::Grbg => BayerPattern::Grbg,
            Self::Gbrg => BayerPattern::Gbrg,
        }
    }
}

/// Disk fits of every channel, as written by `fit-disks`.
#[derive(Debug, Serialize, Deserialize)]
struct DiskReport {
    image: String,
    /// `[width, height]`
    image_size: [usize; 2],
    channels: Vec<Vec<DiskFit>>,
}

/// Latent band wavelengths and the channel mixing matrix.
#[derive(Debug, Serialize, Deserialize)]
struct SpectralSetup {
    wavelengths_nm: Vec<f64>,
    weights: ColorWeights,
}

impl SpectralSetup {
    /// 420–680 nm in 20 nm steps with Gaussian R, G, B responses.
    fn default_rgb() -> CliResult<Self> {
        let sampling = SpectralSampling::uniform(420.0, 680.0, 20.0)?;
        let curves = gaussian_sensitivities(&DEFAULT_RGB_WAVELENGTHS, 90.0, &sampling)?;
        let weights =
            ColorWeights::from_sensitivities(&curves, &sampling, WeightNormalization::RowSum)?;
        Ok(Self {
            wavelengths_nm: sampling.wavelengths_nm,
            weights,
        })
    }
}

fn read_or_default<T: serde::de::DeserializeOwned + Default>(path: Option<&Path>) -> CliResult<T> {
    Ok(match path {
        Some(p) => read_json(p)?,
        None => T::default(),
    })
}

/// The reference channel's wavelength is the model's zero-displacement
/// wavelength. A default config adopts it, an explicit one must agree.
fn reference_config(
    explicit: Option<DispersionFitConfig>,
    reference_nm: f64,
) -> CliResult<DispersionFitConfig> {
    match explicit {
        None => Ok(DispersionFitConfig {
            reference_nm,
            ..DispersionFitConfig::default()
        }),
        Some(c) if (c.reference_nm - reference_nm).abs() <= 1e-9 => Ok(c),
        Some(c) => Err(format!(
            "reference channel is at {reference_nm} nm but the config reference is {} nm",
            c.reference_nm
        )
        .into()),
    }
}

fn channel_wavelengths(given: Option<&[f64]>, channels: usize) -> CliResult<Vec<f64>> {
    match given {
        Some(w) if w.len() == channels => Ok(w.to_vec()),
        Some(w) => Err(format!("{} wavelengths given for {} channels", w.len(), channels).into()),
        None if channels == 3 => Ok(DEFAULT_RGB_WAVELENGTHS.to_vec()),
        None => Err(format!("--wavelengths is required for a {channels}-channel image").into()),
    }
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Raytrace(args) => run_raytrace(&args),
        Commands::FitDisks(args) => run_fit_disks(&args),
        Commands::FitDispersion(args) => run_fit_dispersion(&args),
        Commands::Correct(args) => run_correct(&args),
        Commands::Reconstruct(args) => run_reconstruct(&args),
        Commands::SelectWeights(args) => run_select_weights(&args),
        Commands::Evaluate(args) => run_evaluate(&args),
    }
}

// ── raytrace ───────────────────────────────────────────────────────────

fn run_raytrace(args: &RaytraceArgs) -> CliResult<()> {
    let system: LensSystem = read_or_default(args.lens.as_deref())?;
    let mut config: TraceConfig = read_or_default(args.config.as_deref())?;
    if let Some(w) = &args.wavelengths {
        config.wavelengths_nm = w.clone();
    }
    tracing::info!(
        "Tracing {} surfaces at {} wavelengths",
        system.surfaces.len(),
        config.wavelengths_nm.len()
    );

    let spots = trace_spectrum(&system, &config)?;
    let range = [
        system.image_z - args.focus_range_mm,
        system.image_z + args.focus_range_mm,
    ];
    let mut focus = Vec::with_capacity(spots.len());
    for spot in &spots {
        let f = best_focus(&system, &config, spot.wavelength_nm, range)?;
        tracing::info!(
            "{:.1} nm: transmission {:.3}, rms {:.5} mm at sensor, best focus z={:.4} mm",
            spot.wavelength_nm,
            spot.transmission(),
            spot.rms_radius.unwrap_or(f64::NAN),
            f.image_z
        );
        focus.push(f);
    }

    if let Some(dir) = &args.irradiance_dir {
        std::fs::create_dir_all(dir)?;
        let base: IrradianceConfig = read_or_default(args.irradiance_config.as_deref())?;
        for spot in &spots {
            let Some(centroid) = spot.centroid else {
                tracing::warn!("{:.1} nm: no rays reached the sensor", spot.wavelength_nm);
                continue;
            };
            let grid = IrradianceConfig::centered(
                centroid,
                base.pixel_pitch_mm,
                base.width,
                base.height,
                base.smoothing_sigma_px,
            );
            let map = irradiance(spot, &grid)?;
            let peak = map.fold(0.0f64, |a, &b| a.max(b));
            let normalized = if peak > 0.0 { map / peak } else { map };
            let path = dir.join(format!("irradiance_{:.0}nm.png", spot.wavelength_nm));
            save_plane(&path, &normalized)?;
            tracing::info!("Irradiance written to {}", path.display());
        }
    }

    #[derive(Serialize)]
    struct Output<'a> {
        system: &'a LensSystem,
        spots: &'a [chromacal::SpotDiagram],
        focus: &'a [chromacal::raytrace::FocusResult],
    }
    write_json(
        &args.out,
        &Output {
            system: &system,
            spots: &spots,
            focus: &focus,
        },
    )?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}

// ── fit-disks ──────────────────────────────────────────────────────────

fn run_fit_disks(args: &FitDisksArgs) -> CliResult<()> {
    let config: DiskFitConfig = read_or_default(args.config.as_deref())?;
    tracing::info!("Loading image: {}", args.image.display());
    let cube = load_cube(&args.image)?;
    let (h, w, c) = cube.dim();
    tracing::info!("Image size: {}x{} ({} channels)", w, h, c);

    let channels = chromacal::fit_disks_per_channel(&cube, &config)?;
    for (k, disks) in channels.iter().enumerate() {
        tracing::info!("Channel {}: {} disks", k, disks.len());
    }
    let report = DiskReport {
        image: args.image.display().to_string(),
        image_size: [w, h],
        channels,
    };
    write_json(&args.out, &report)?;
    tracing::info!("Results written to {}", args.out.display());
    Ok(())
}

// ── fit-dispersion ─────────────────────────────────────────────────────

fn run_fit_dispersion(args: &FitDispersionArgs) -> CliResult<()> {
    let report: DiskReport = read_json(&args.disks)?;
    let n_channels = report.channels.len();
    let Some(reference) = report.channels.get(args.reference_channel) else {
        return Err(format!(
            "reference channel {} out of range ({} channels)",
            args.reference_channel, n_channels
        )
        .into());
    };
    let wavelengths = channel_wavelengths(args.wavelengths.as_deref(), n_channels)?;
    let explicit = args
        .config
        .as_deref()
        .map(read_json::<DispersionFitConfig>)
        .transpose()?;
    let config = reference_config(explicit, wavelengths[args.reference_channel])?;

    let samples = correspondences(reference, &report.channels, &wavelengths, args.max_distance)?;
    tracing::info!(
        "{} correspondences from {} reference disks",
        samples.len(),
        reference.len()
    );
    let (model, stats) = chromacal::fit_dispersion(&samples, report.image_size, &config)?;
    for &wl in &wavelengths {
        tracing::info!(
            "{:.1} nm: max displacement {:.3} px",
            wl,
            model.max_displacement(report.image_size, wl)
        );
    }

    #[derive(Serialize)]
    struct Output<'a> {
        model: &'a DispersionModel,
        stats: &'a chromacal::DispersionFitStats,
    }
    write_json(
        &args.out,
        &Output {
            model: &model,
            stats: &stats,
        },
    )?;
    tracing::info!("Model written to {}", args.out.display());
    Ok(())
}

/// Accept either a bare model or the `fit-dispersion` output.
fn load_model(path: &Path) -> CliResult<DispersionModel> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ModelFile {
        Wrapped { model: DispersionModel },
        Bare(DispersionModel),
    }
    Ok(match read_json::<ModelFile>(path)? {
        ModelFile::Wrapped { model } | ModelFile::Bare(model) => model,
    })
}

// ── correct ────────────────────────────────────────────────────────────

fn run_correct(args: &CorrectArgs) -> CliResult<()> {
    let model = load_model(&args.model)?;
    let cube = load_cube(&args.image)?;
    let wavelengths = channel_wavelengths(args.wavelengths.as_deref(), cube.dim().2)?;
    let corrected = chromacal::correct_image(&cube, &wavelengths, &model)?;
    save_cube(&args.out, &corrected)?;
    tracing::info!("Corrected image written to {}", args.out.display());
    Ok(())
}

// ── reconstruct / select-weights ───────────────────────────────────────

struct SolverSetup {
    problem: ReconstructionProblem,
    admm: AdmmConfig,
    patches: PatchConfig,
}

fn build_solver(args: &SolverArgs) -> CliResult<SolverSetup> {
    let setup = match &args.weights {
        Some(p) => read_json::<SpectralSetup>(p)?,
        None => SpectralSetup::default_rgb()?,
    };
    let observation = match (&args.input.raw, &args.input.rgb) {
        (Some(raw), _) => {
            tracing::info!("Loading RAW capture: {}", raw.display());
            Observation::Raw {
                plane: load_plane(raw)?,
                pattern: args.pattern.to_core(),
            }
        }
        (None, Some(rgb)) => {
            tracing::info!("Loading RGB capture: {}", rgb.display());
            Observation::Rgb {
                cube: load_cube(rgb)?,
            }
        }
        (None, None) => return Err("one of --raw or --rgb is required".into()),
    };
    let dispersion = match &args.model {
        Some(p) => Some(SpectralWarp {
            model: load_model(p)?,
            wavelengths_nm: setup.wavelengths_nm.clone(),
        }),
        None => None,
    };
    let problem = ReconstructionProblem {
        observation,
        weights: setup.weights,
        dispersion,
    };
    problem.validate()?;

    let admm: AdmmConfig = read_or_default(args.config.as_deref())?;
    let mut patches = PatchConfig::default();
    if let Some(s) = args.patch_size {
        patches.patch_size = s;
    }
    if let Some(p) = args.padding {
        patches.padding = p;
    }
    Ok(SolverSetup {
        problem,
        admm,
        patches,
    })
}

fn run_reconstruct(args: &ReconstructArgs) -> CliResult<()> {
    let SolverSetup {
        problem,
        admm,
        patches,
    } = build_solver(&args.solver)?;
    let solution = chromacal::solve_patches(&problem, &admm, &patches)?;
    tracing::info!(
        "{}/{} patches converged, {:.1} iterations on average",
        solution.n_converged,
        solution.n_patches,
        solution.mean_iterations
    );
    write_json(&args.out, &solution.cube)?;
    tracing::info!("Cube written to {}", args.out.display());

    if let Some(preview) = &args.preview {
        let projected = problem.weights.project(&solution.cube)?;
        save_cube(preview, &projected)?;
        tracing::info!("Preview written to {}", preview.display());
    }
    Ok(())
}

fn run_select_weights(args: &SelectWeightsArgs) -> CliResult<()> {
    let SolverSetup {
        problem,
        admm,
        patches,
    } = build_solver(&args.solver)?;
    let mut grid: GridSearchConfig = match &args.grid {
        Some(p) => read_json(p)?,
        None => GridSearchConfig {
            axes: vec![chromacal::logspace(-4.0, -1.0, 4); admm.priors.len()],
            reference: None,
        },
    };
    if let Some(p) = &args.truth {
        grid.reference = Some(read_json::<Cube>(p)?);
    }
    tracing::info!("Evaluating {} weight combinations", grid.n_points());

    let report = chromacal::grid_search(&problem, &admm, &patches, &grid)?;
    report.write_csv(&args.out_csv)?;
    write_json(&args.out_json, &report)?;
    if let Some(best) = report.selected() {
        tracing::info!("Selected weights: {:?}", best.weights);
    }
    tracing::info!(
        "Report written to {} and {}",
        args.out_csv.display(),
        args.out_json.display()
    );
    Ok(())
}

// ── evaluate ───────────────────────────────────────────────────────────

fn run_evaluate(args: &EvaluateArgs) -> CliResult<()> {
    let images = args
        .truth
        .iter()
        .map(|p| -> CliResult<(String, Cube)> { Ok((p.display().to_string(), load_cube(p)?)) })
        .collect::<CliResult<Vec<_>>>()?;
    let table = chromacal::evaluate_demosaicking(
        &images,
        args.pattern.to_core(),
        &DemosaicMethod::ALL,
        args.border,
    )?;
    for (method, m) in table.summary() {
        tracing::info!("{}: mean rmse {:.5}, psnr {:.2} dB", method, m.rmse, m.psnr);
    }
    table.write_csv(&args.out_csv)?;
    tracing::info!("Table written to {}", args.out_csv.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_adopts_reference_channel_wavelength() {
        let config = reference_config(None, DEFAULT_RGB_WAVELENGTHS[1]).unwrap();
        assert_eq!(config.reference_nm, 540.0);
        assert_eq!(
            config.spatial_degree,
            DispersionFitConfig::default().spatial_degree
        );
    }

    #[test]
    fn explicit_config_must_match_reference_channel() {
        let matching = DispersionFitConfig {
            reference_nm: 540.0,
            ..DispersionFitConfig::default()
        };
        assert!(reference_config(Some(matching), 540.0).is_ok());
        let err = reference_config(Some(DispersionFitConfig::default()), 540.0).unwrap_err();
        assert!(err.to_string().contains("540 nm"), "{err}");
    }

    #[test]
    fn rgb_wavelengths_default_only_for_three_channels() {
        assert_eq!(channel_wavelengths(None, 3).unwrap(), DEFAULT_RGB_WAVELENGTHS);
        assert!(channel_wavelengths(None, 4).is_err());
        assert!(channel_wavelengths(Some(&[500.0, 600.0][..]), 3).is_err());
    }
}
