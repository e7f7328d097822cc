use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::ffi::OsString;
use std::fs;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use docvault_cache::{CleanupOutcome, MemoryPressure, MemorySample, MB};
use docvault_core::{
    chunk_size_for, ColorSpace, ConversionSettings, Dpi, ErrorKind, ExtractionProgress,
    OpenOptions, PageRange, ProgressCallback, QualityPreset, RasterFormat, SourceKind, Vault,
    VaultConfig,
};
use docvault_pdf_engine::ThumbnailSize;

const DEFAULT_JPEG_QUALITY: u8 = 85;
const DEFAULT_PNG_COMPRESSION: u8 = 6;

#[derive(Debug, Parser)]
#[command(name = "docvault")]
#[command(about = "Load documents and extract their pages as images")]
pub struct Cli {
    /// Configuration file to use instead of the per-user one.
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print machine-readable document metadata.
    Info {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
    /// Render pages to image files.
    Extract(ExtractArgs),
    /// Render a thumbnail PNG for a page.
    RenderThumb {
        #[arg(value_name = "FILE")]
        file: PathBuf,
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long, default_value_t = 320)]
        width: u32,
        #[arg(long, default_value_t = 320)]
        height: u32,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Print memory usage against the configured limit.
    Memory {
        /// Run a cleanup pass and report what it released.
        #[arg(long)]
        cleanup: bool,
    },
    /// Show or create the configuration file.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Print CLI version.
    Version,
}

#[derive(Debug, Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML.
    Show,
    /// Write a default configuration file.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Png,
    Jpeg,
}

#[derive(Debug, Args)]
struct ExtractArgs {
    #[arg(value_name = "FILE")]
    file: PathBuf,
    /// Pages to extract: `all`, `3`, `2-5` or `1,4,7`.
    #[arg(long, default_value = "all", value_parser = parse_pages)]
    pages: PageRange,
    /// Output resolution: 72, 150, 300 or 600.
    #[arg(long)]
    dpi: Option<u32>,
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
    /// JPEG quality, 1-100.
    #[arg(long)]
    quality: Option<u8>,
    /// PNG compression level, 0-9.
    #[arg(long)]
    compression: Option<u8>,
    #[arg(long)]
    grayscale: bool,
    /// Start from a preset: draft, standard, high or archival.
    #[arg(long)]
    preset: Option<QualityPreset>,
    /// Directory for the page images.
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Load files above the large-file threshold without asking.
    #[arg(short, long)]
    yes: bool,
}

#[derive(Debug, Serialize)]
struct InfoOutput {
    path: String,
    size_bytes: u64,
    page_count: u32,
    source_kind: SourceKind,
    chunk_size_bytes: u64,
}

#[derive(Debug, Serialize)]
struct ExtractOutput {
    path: String,
    output_dir: String,
    pages_extracted: u32,
    elapsed_ms: u64,
    files: Vec<String>,
}

#[derive(Debug, Serialize)]
struct MemoryOutput {
    limit_bytes: u64,
    sample: Option<SampleOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleanup: Option<CleanupOutput>,
}

#[derive(Debug, Serialize)]
struct SampleOutput {
    used_bytes: u64,
    total_bytes: u64,
    utilization: f64,
    pressure: MemoryPressure,
    exceeds_limit: bool,
}

impl From<MemorySample> for SampleOutput {
    fn from(sample: MemorySample) -> Self {
        Self {
            used_bytes: sample.used_bytes,
            total_bytes: sample.total_bytes,
            utilization: sample.utilization(),
            pressure: sample.pressure(),
            exceeds_limit: sample.exceeds_limit(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CleanupOutput {
    callbacks_run: usize,
    callbacks_failed: usize,
    freed_bytes: Option<i64>,
}

pub fn run<I, T>(args: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Info { file } => {
            let config = load_config(config_path)?;
            block_on(run_info(&file, config))
        }
        Commands::Extract(args) => {
            let config = load_config(config_path)?;
            block_on(run_extract(args, config))
        }
        Commands::RenderThumb {
            file,
            page,
            width,
            height,
            output,
        } => {
            let config = load_config(config_path)?;
            let size = ThumbnailSize {
                width_px: width,
                height_px: height,
            };
            block_on(run_render_thumb(&file, page, size, output, config))
        }
        Commands::Memory { cleanup } => {
            let config = load_config(config_path)?;
            block_on(run_memory(config, cleanup))
        }
        Commands::Config { action } => run_config(action, config_path),
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Logs go to stderr so stdout stays machine-readable
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("docvault=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docvault=info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn block_on<F>(future: F) -> Result<()>
where
    F: Future<Output = Result<()>>,
{
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")?
        .block_on(future)
}

fn load_config(path: Option<&Path>) -> Result<VaultConfig> {
    VaultConfig::load(path).context("failed to load configuration")
}

async fn open_document(
    vault: &Vault,
    file: &Path,
    options: OpenOptions,
) -> Result<docvault_core::DocumentHandle> {
    ensure_file_exists(file)?;
    vault.open(file, options).await.map_err(|err| {
        let context = if err.kind() == ErrorKind::LargeFileDeclined {
            "large file not loaded; rerun with --yes".to_string()
        } else {
            format!("failed to open {}", file.display())
        };
        anyhow::Error::new(err).context(context)
    })
}

async fn run_info(file: &Path, config: VaultConfig) -> Result<()> {
    let vault = Vault::new(config);
    let handle = open_document(&vault, file, OpenOptions::new()).await?;

    let payload = InfoOutput {
        path: file.display().to_string(),
        size_bytes: handle.size_bytes(),
        page_count: handle.page_count(),
        source_kind: handle.source_kind(),
        chunk_size_bytes: chunk_size_for(handle.size_bytes()),
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);

    vault.close(&handle).await;
    Ok(())
}

async fn run_extract(args: ExtractArgs, config: VaultConfig) -> Result<()> {
    let settings = conversion_settings(&args, &config)?;
    settings.validate()?;
    let output_dir = args
        .output
        .clone()
        .unwrap_or_else(|| default_output_dir(&args.file));

    let vault = Vault::new(config);
    let assume_yes = args.yes;
    let options = OpenOptions::new()
        .confirm_large_file(move |size_bytes, memory| {
            if !assume_yes {
                tracing::warn!(
                    size_mb = size_bytes / MB,
                    free_mb = memory.map(|info| info.free_bytes / MB),
                    "large file needs confirmation"
                );
            }
            assume_yes
        })
        .on_progress(|pct| tracing::debug!(percentage = pct, "loading"));
    let handle = open_document(&vault, &args.file, options).await?;

    fs::create_dir_all(&output_dir)
        .with_context(|| format!("failed to create {}", output_dir.display()))?;

    let on_progress: ProgressCallback = Arc::new(|sample: &ExtractionProgress| {
        if sample.current_page_progress == Some(100) {
            tracing::info!(
                page = sample.current_page,
                total = sample.total_pages,
                percentage = sample.percentage,
                eta_secs = sample.estimated_time_remaining_secs,
                "page written"
            );
        }
    });

    vault.start_monitoring();
    let pipeline = vault.pipeline().clone();
    let id = handle.id();
    let mut files = Vec::new();
    let mut write_error = None;
    let result = vault
        .extract(&handle, &settings, Some(on_progress), |page| {
            if write_error.is_some() {
                return;
            }
            let target = output_dir.join(page.file_name());
            match fs::write(&target, &page.data) {
                Ok(()) => files.push(target.display().to_string()),
                Err(err) => {
                    write_error = Some((target, err));
                    pipeline.cancel(id);
                }
            }
        })
        .await;
    vault.stop_monitoring();
    vault.close(&handle).await;

    if let Some((target, err)) = write_error {
        let context = format!("failed to write {}", target.display());
        return Err(anyhow::Error::new(err).context(context));
    }
    let summary = result.context("extraction failed")?;

    let payload = ExtractOutput {
        path: args.file.display().to_string(),
        output_dir: output_dir.display().to_string(),
        pages_extracted: summary.pages_extracted,
        elapsed_ms: summary.elapsed.as_millis() as u64,
        files,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

async fn run_render_thumb(
    file: &Path,
    page: u32,
    size: ThumbnailSize,
    output: Option<PathBuf>,
    config: VaultConfig,
) -> Result<()> {
    if page == 0 {
        anyhow::bail!("--page is 1-based and must be >= 1");
    }

    let vault = Vault::new(config);
    let handle = open_document(&vault, file, OpenOptions::new()).await?;
    let image = vault
        .thumbnail(&handle, page, size)
        .context("failed to render thumbnail")?;

    let output = output.unwrap_or_else(|| default_thumbnail_output(file, page));
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    image
        .save(&output)
        .with_context(|| format!("failed to write image to {}", output.display()))?;
    println!("{}", output.display());

    vault.close(&handle).await;
    Ok(())
}

async fn run_memory(config: VaultConfig, cleanup: bool) -> Result<()> {
    let vault = Vault::new(config);
    let sample = vault.memory_usage();

    let cleanup = if cleanup {
        match vault.manual_cleanup().await {
            CleanupOutcome::Completed(report) => Some(CleanupOutput {
                callbacks_run: report.callbacks_run,
                callbacks_failed: report.callbacks_failed,
                freed_bytes: report.freed_bytes(),
            }),
            CleanupOutcome::AlreadyRunning => None,
        }
    } else {
        None
    };

    let payload = MemoryOutput {
        limit_bytes: vault.coordinator().limit_bytes(),
        sample: sample.map(SampleOutput::from),
        cleanup,
    };
    println!("{}", serde_json::to_string_pretty(&payload)?);
    Ok(())
}

fn run_config(action: ConfigAction, path: Option<&Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = load_config(path)?;
            print!("{}", config.to_toml()?);
            Ok(())
        }
        ConfigAction::Init { force } => {
            let target = path
                .map(Path::to_path_buf)
                .or_else(VaultConfig::default_config_path)
                .context("no configuration directory on this platform; pass --config")?;
            if target.exists() && !force {
                anyhow::bail!(
                    "{} already exists; pass --force to overwrite",
                    target.display()
                );
            }
            VaultConfig::default()
                .save_to_file(&target)
                .with_context(|| format!("failed to write {}", target.display()))?;
            println!("{}", target.display());
            Ok(())
        }
    }
}

fn conversion_settings(args: &ExtractArgs, config: &VaultConfig) -> Result<ConversionSettings> {
    let mut settings = match args.preset {
        Some(preset) => preset.settings(),
        None => config.default_conversion_settings(),
    };
    if let Some(dpi) = args.dpi {
        settings.dpi = Dpi::try_from(dpi)?;
    }

    let lossy = match args.format {
        Some(OutputFormat::Jpeg) => true,
        Some(OutputFormat::Png) => false,
        None => matches!(settings.format, RasterFormat::Lossy { .. }),
    };
    settings.format = match (lossy, settings.format) {
        (true, RasterFormat::Lossy { quality }) => RasterFormat::Lossy {
            quality: args.quality.unwrap_or(quality),
        },
        (true, _) => RasterFormat::Lossy {
            quality: args.quality.unwrap_or(DEFAULT_JPEG_QUALITY),
        },
        (false, RasterFormat::Lossless { compression_level }) => RasterFormat::Lossless {
            compression_level: args.compression.unwrap_or(compression_level),
        },
        (false, _) => RasterFormat::Lossless {
            compression_level: args.compression.unwrap_or(DEFAULT_PNG_COMPRESSION),
        },
    };

    if args.grayscale {
        settings.color_space = ColorSpace::Grayscale;
    }
    settings.page_range = args.pages.clone();
    Ok(settings)
}

fn parse_pages(value: &str) -> std::result::Result<PageRange, String> {
    value.parse::<PageRange>().map_err(|err| err.to_string())
}

fn ensure_file_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("file does not exist: {}", path.display());
    }

    if !path.is_file() {
        anyhow::bail!("path is not a file: {}", path.display());
    }

    Ok(())
}

fn default_output_dir(file: &Path) -> PathBuf {
    let stem = file
        .file_stem()
        .and_then(|name| name.to_str())
        .unwrap_or("document");

    file.with_file_name(format!("{stem}-pages"))
}

fn default_thumbnail_output(file: &Path, page: u32) -> PathBuf {
    let stem = file
        .file_stem()
        .and_then(|name| name.to_str())
        .unwrap_or("thumbnail");

    file.with_file_name(format!("{stem}-page-{page}.png"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_args(extra: &[&str]) -> ExtractArgs {
        let mut argv = vec!["docvault", "extract", "doc.pdf"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Commands::Extract(args) => args,
            other => panic!("parsed {other:?}"),
        }
    }

    #[test]
    fn test_flags_override_configured_preset() {
        let config = VaultConfig::default();
        let args = extract_args(&["--format", "jpeg", "--quality", "40", "--dpi", "300"]);
        let settings = conversion_settings(&args, &config).unwrap();

        assert_eq!(settings.dpi, Dpi::D300);
        assert_eq!(settings.format, RasterFormat::Lossy { quality: 40 });
        assert_eq!(settings.color_space, ColorSpace::Rgb);
    }

    #[test]
    fn test_preset_knobs_survive_without_flags() {
        let config = VaultConfig::default();
        let args = extract_args(&["--preset", "draft", "--grayscale", "--pages", "2-4"]);
        let settings = conversion_settings(&args, &config).unwrap();

        assert_eq!(settings, {
            let mut draft = QualityPreset::Draft.settings();
            draft.color_space = ColorSpace::Grayscale;
            draft.page_range = PageRange::Span { start: 2, end: 4 };
            draft
        });
    }

    #[test]
    fn test_switching_to_png_uses_default_compression() {
        let config = VaultConfig::default();
        let args = extract_args(&["--preset", "draft", "--format", "png"]);
        let settings = conversion_settings(&args, &config).unwrap();

        assert_eq!(
            settings.format,
            RasterFormat::Lossless {
                compression_level: DEFAULT_PNG_COMPRESSION
            }
        );
    }

    #[test]
    fn test_unsupported_dpi_is_rejected() {
        let config = VaultConfig::default();
        let args = extract_args(&["--dpi", "100"]);
        let err = conversion_settings(&args, &config).unwrap_err();
        assert!(format!("{err:#}").contains("dpi must be one of"));
    }

    #[test]
    fn test_default_output_dir_sits_next_to_file() {
        assert_eq!(
            default_output_dir(Path::new("/tmp/report.pdf")),
            PathBuf::from("/tmp/report-pages")
        );
    }
}
