//! # Mipflow CLI
//!
//! Command-line interface for the mipflow texture residency manager.
//!
//! ## Commands
//! - `simulate` - Stream a synthetic texture set into a headless device under a budget
//! - `formats` - Show how texel formats map to device formats

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use mipflow_core::{MemorySnapshot, format_bytes, mib};
use mipflow_platform::HighResTimer;
use mipflow_renderer::format::{self, eval_texel_format};
use mipflow_renderer::{
    DeviceCallStats, HeadlessDevice, ResidencyConfig, ResidencyManager, SparseMode, TexelFormat,
    Texture, TextureDesc, TextureUsage, TransferStatsSnapshot,
};
use serde::Serialize;

/// Mipflow texture residency CLI
#[derive(Parser)]
#[command(name = "mipflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Emit worker and sweep timings
    #[arg(long)]
    pub timing: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Stream synthetic textures into a headless device
    Simulate(SimulateArgs),

    /// List texel formats and their device formats
    Formats,
}

/// Options of the `simulate` command
#[derive(clap::Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Residency configuration file (JSON)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Allowed texture memory in MiB
    #[arg(short, long)]
    pub budget: Option<u64>,

    /// Allowed texture memory in MiB from the second half of the run
    #[arg(long)]
    pub rebudget: Option<u64>,

    /// Number of textures
    #[arg(short, long, default_value = "8")]
    pub textures: usize,

    /// Width and height of the largest texture
    #[arg(short, long, default_value = "1024")]
    pub size: u32,

    /// Texel format of every texture
    #[arg(short, long, value_enum, default_value = "rgba8")]
    pub format: FormatArg,

    /// Sparse texture mode
    #[arg(long, value_enum)]
    pub sparse: Option<SparseArg>,

    /// Frames to simulate
    #[arg(long, default_value = "120")]
    pub frames: usize,

    /// Worker iterations per frame when not threaded
    #[arg(long, default_value = "4")]
    pub pumps: usize,

    /// Run the transfer worker on its own thread
    #[arg(long)]
    pub threaded: bool,

    /// Print the final report as JSON
    #[arg(long)]
    pub json: bool,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            config: None,
            budget: None,
            rebudget: None,
            textures: 8,
            size: 1024,
            format: FormatArg::Rgba8,
            sparse: None,
            frames: 120,
            pumps: 4,
            threaded: false,
            json: false,
        }
    }
}

/// Texel formats selectable on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatArg {
    R8,
    Rg8,
    Rgb8,
    Rgba8,
    Srgba8,
    Bgra8,
    Rgba16f,
    Rgba32f,
}

impl FormatArg {
    pub fn texel_format(self) -> TexelFormat {
        match self {
            Self::R8 => TexelFormat::R8,
            Self::Rg8 => TexelFormat::RG8,
            Self::Rgb8 => TexelFormat::RGB8,
            Self::Rgba8 => TexelFormat::RGBA8,
            Self::Srgba8 => TexelFormat::SRGBA8,
            Self::Bgra8 => TexelFormat::BGRA8,
            Self::Rgba16f => TexelFormat::RGBA16F,
            Self::Rgba32f => TexelFormat::RGBA32F,
        }
    }
}

/// Sparse texture modes selectable on the command line
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SparseArg {
    Auto,
    Disabled,
    Forced,
}

impl From<SparseArg> for SparseMode {
    fn from(arg: SparseArg) -> Self {
        match arg {
            SparseArg::Auto => SparseMode::Auto,
            SparseArg::Disabled => SparseMode::Disabled,
            SparseArg::Forced => SparseMode::Forced,
        }
    }
}

const FORMATS: &[(&str, TexelFormat)] = &[
    ("r8", TexelFormat::R8),
    ("rg8", TexelFormat::RG8),
    ("rgb8", TexelFormat::RGB8),
    ("rgba8", TexelFormat::RGBA8),
    ("srgba8", TexelFormat::SRGBA8),
    ("bgra8", TexelFormat::BGRA8),
    ("sbgra8", TexelFormat::SBGRA8),
    ("r16f", TexelFormat::R16F),
    ("r32f", TexelFormat::R32F),
    ("rgba16f", TexelFormat::RGBA16F),
    ("rgba32f", TexelFormat::RGBA32F),
    ("depth32f", TexelFormat::DEPTH32F),
    ("depth24_stencil8", TexelFormat::DEPTH24_STENCIL8),
];

/// Outcome of a simulation run
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub frames: usize,
    pub elapsed_millis: f64,
    pub textures: usize,
    pub ready: usize,
    pub sparse_enabled: bool,
    pub memory: MemorySnapshot,
    pub transfers: TransferStatsSnapshot,
    pub device_calls: DeviceCallStats,
}

/// Execute the CLI command
pub fn execute(cli: Cli) -> Result<()> {
    if cli.verbose {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }
    if cli.timing {
        // Log records already go to env_logger; this only carries tracing events
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_target(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .context("Failed to install timing subscriber")?;
    }

    match cli.command {
        Commands::Simulate(args) => {
            let report = simulate(&args)?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                log_report(&report);
            }
        }

        Commands::Formats => {
            for (name, texel) in FORMATS {
                match eval_texel_format(*texel) {
                    Ok(device) => log::info!(
                        "{:>18} -> {:?} ({} bytes per texel)",
                        name,
                        device.format,
                        device.texel_bytes
                    ),
                    Err(err) => log::info!("{:>18} -> {}", name, err),
                }
            }
        }
    }

    Ok(())
}

/// Load a residency configuration, defaults when no file is given
pub fn load_config(path: Option<&Path>) -> Result<ResidencyConfig> {
    let Some(path) = path else {
        return Ok(ResidencyConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))
}

/// Build the residency configuration for a run, command line over file
pub fn residency_config(args: &SimulateArgs) -> Result<ResidencyConfig> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(budget) = args.budget {
        config.allowed_memory = mib(budget);
    }
    if let Some(sparse) = args.sparse {
        config.sparse = sparse.into();
    }
    if args.config.is_none() || args.threaded {
        config.threaded = args.threaded;
    }
    Ok(config)
}

/// Stream a synthetic texture set through the residency manager
///
/// Fails on configuration errors such as an unsupported texel format.
pub fn simulate(args: &SimulateArgs) -> Result<SimulationReport> {
    let config = residency_config(args)?;
    let device = Arc::new(HeadlessDevice::new());
    let mut manager = ResidencyManager::new(device.clone(), config)
        .context("Failed to start texture residency")?;

    let textures = (0..args.textures)
        .map(|index| synthetic_texture(index, args.size, args.format.texel_format()))
        .collect::<Result<Vec<_>>>()?;
    log::info!(
        "Simulating {} textures up to {}x{} for {} frames",
        textures.len(),
        args.size,
        args.size,
        args.frames
    );

    let timer = HighResTimer::new();
    for frame in 0..args.frames {
        if frame == args.frames / 2 {
            if let Some(budget) = args.rebudget {
                manager.set_allowed_memory(mib(budget));
            }
        }

        for texture in &textures {
            manager
                .acquire_handle(texture)
                .with_context(|| format!("Texture '{}' cannot be streamed", texture.source()))?;
        }

        if manager.is_threaded() {
            std::thread::sleep(Duration::from_millis(1));
        } else {
            for _ in 0..args.pumps {
                manager.pump();
            }
        }
        manager.end_frame();
    }

    let ready = textures
        .iter()
        .filter(|texture| manager.is_ready(texture.id()))
        .count();
    Ok(SimulationReport {
        frames: args.frames,
        elapsed_millis: timer.elapsed_millis(),
        textures: textures.len(),
        ready,
        sparse_enabled: manager.sparse_enabled(),
        memory: manager.memory().snapshot(),
        transfers: manager.stats(),
        device_calls: device.stats(),
    })
}

/// Texture `index` of the set: sizes cycle through full, half and quarter size
fn synthetic_texture(index: usize, size: u32, texel: TexelFormat) -> Result<Arc<Texture>> {
    let size = (size >> (index % 3)).max(1);
    let texture = Arc::new(Texture::new(
        format!("synthetic_{}", index),
        TextureUsage::Resource,
    ));
    let desc = TextureDesc::new_2d(texel, size, size);
    texture.define(desc)?;
    for mip in 0..texture.mip_count() {
        let bytes = format::mip_face_bytes(desc.dimensions, mip, texel.texel_bytes());
        texture.assign_mip_face(mip, 0, vec![index as u8; bytes as usize])?;
    }
    Ok(texture)
}

fn log_report(report: &SimulationReport) {
    log::info!(
        "{} of {} textures ready after {} frames in {:.1} ms (sparse {})",
        report.ready,
        report.textures,
        report.frames,
        report.elapsed_millis,
        if report.sparse_enabled { "enabled" } else { "disabled" }
    );
    log::info!(
        "Resident {} of {} allowed (peak {}, sparse {}, virtual {})",
        format_bytes(report.memory.resident_bytes),
        format_bytes(report.memory.allowed_bytes),
        format_bytes(report.memory.peak_resident_bytes),
        format_bytes(report.memory.sparse_bytes),
        format_bytes(report.memory.virtual_bytes)
    );
    log::info!(
        "Transfers: {} started, {} finished, {} mips uploaded, {} failed",
        report.transfers.started,
        report.transfers.finished,
        report.transfers.steps,
        report.transfers.failures
    );
    log::info!(
        "Sweeps: {} ({:.3} ms average), {} demotions, {} deferred, {} promotions",
        report.transfers.sweeps,
        report.transfers.sweep_average_millis,
        report.transfers.demotions,
        report.transfers.deferred_demotions,
        report.transfers.promotions
    );
    log::info!(
        "Device calls: {} creates, {} destroys, {} writes, {} copies, {} commits, {} decommits",
        report.device_calls.creates,
        report.device_calls.destroys,
        report.device_calls.writes,
        report.device_calls.copies,
        report.device_calls.commits,
        report.device_calls.decommits
    );
}
