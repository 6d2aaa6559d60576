use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result, bail};
use cartlink_core::{CartReader, DeviceType, EngineConfig, NusbHost, TracingObserver};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

type Reader = CartReader<NusbHost, TracingObserver>;

#[derive(Parser, Debug)]
#[command(author, version, about = "USB GBA cartridge reader tool", long_about = None)]
struct Args {
    /// Engine configuration file (TOML). Missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List attached supported readers
    List,
    /// Show reader and cartridge details
    Info,
    /// Dump the cartridge ROM to a file
    DumpRom {
        /// Output file (default: TITLE_CODE.gba)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Start offset (decimal or 0x-prefixed hex)
        #[arg(long, default_value = "0", value_parser = parse_number)]
        offset: usize,
        /// Bytes to read, clipped to the ROM end (default: whole ROM)
        #[arg(long, value_parser = parse_number)]
        length: Option<usize>,
    },
    /// Back up the save memory to a file
    DumpSave {
        /// Output file (default: TITLE_CODE.sav)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a save file back to the cartridge
    RestoreSave {
        /// Save file, must match the cartridge's save size
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Write the default configuration to a file
    InitConfig {
        /// Destination file
        path: PathBuf,
    },
}

fn parse_number(s: &str) -> Result<usize, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => usize::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number {:?}: {}", s, e))
}

fn main() {
    let args = Args::parse();

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(if args.verbose {
                    tracing::Level::DEBUG.into()
                } else {
                    tracing::Level::INFO.into()
                })
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    if let Err(e) = run(args) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::InitConfig { path } => {
            config.save_to_file(&path)?;
            info!(path = %path.display(), "Configuration written");
            Ok(())
        }
        Command::List => {
            list(&CartReader::new(config));
            Ok(())
        }
        command => {
            let reader = CartReader::new(config);
            let device = reader.connect().context("Could not connect to a reader")?;
            let result = run_connected(&reader, device, command);
            reader.disconnect();
            result
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) if path.exists() => EngineConfig::load_from_file(path)
            .with_context(|| format!("Failed to load {}", path.display())),
        Some(path) => {
            warn!(path = %path.display(), "Config file not found, using defaults");
            Ok(EngineConfig::default())
        }
        None => Ok(EngineConfig::default()),
    }
}

fn list(reader: &Reader) {
    let devices = reader.scan();
    if devices.is_empty() {
        println!("No supported readers found");
        return;
    }
    for device in devices {
        let info = &device.candidate.info;
        println!(
            "{}  bus {} addr {:3}  {}{}",
            device.candidate.descriptor,
            info.bus_id,
            info.address,
            info.product.as_deref().unwrap_or("-"),
            if device.accessible {
                ""
            } else {
                "  [no permission]"
            }
        );
    }
}

fn run_connected(reader: &Reader, device: DeviceType, command: Command) -> Result<()> {
    let cart = reader.cartridge_info()?;

    match command {
        Command::Info => {
            if let Some(summary) = reader.device_info() {
                println!("Reader:    {}", summary);
            }
            println!("Cartridge: {}", cart);
            match cart.header_checksum_valid {
                Some(true) => println!("Header:    checksum OK"),
                Some(false) => println!("Header:    checksum MISMATCH"),
                None => println!("Header:    truncated"),
            }
            if let Some(secs) = device.estimate_secs(cart.rom_size) {
                println!("ROM dump:  ~{:.0}s at nominal speed", secs);
            }
        }
        Command::DumpRom {
            output,
            offset,
            length,
        } => {
            let path = output.unwrap_or_else(|| PathBuf::from(format!("{}.gba", cart.file_stem())));
            let mut progress = ProgressLine::new("ROM");
            let data = reader.read_rom(offset, length.unwrap_or(cart.rom_size), |f| {
                progress.update(f)
            })?;
            progress.finish();
            write_output(&path, &data)?;
        }
        Command::DumpSave { output } => {
            let path = output.unwrap_or_else(|| PathBuf::from(format!("{}.sav", cart.file_stem())));
            let mut progress = ProgressLine::new("Save");
            let data = reader.read_save(|f| progress.update(f))?;
            progress.finish();
            write_output(&path, &data)?;
        }
        Command::RestoreSave { input } => {
            let data = std::fs::read(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            if let Some(expected) = cart.save_size
                && expected > 0
                && expected != data.len()
            {
                bail!(
                    "{} is {} bytes, cartridge save is {} bytes",
                    input.display(),
                    data.len(),
                    expected
                );
            }
            let mut progress = ProgressLine::new("Restore");
            reader.write_save(&data, |f| progress.update(f))?;
            progress.finish();
            info!(path = %input.display(), "Save restored");
        }
        Command::List | Command::InitConfig { .. } => {}
    }
    Ok(())
}

fn write_output(path: &Path, data: &[u8]) -> Result<()> {
    std::fs::write(path, data).with_context(|| format!("Failed to write {}", path.display()))?;
    info!(path = %path.display(), bytes = data.len(), "Saved");
    Ok(())
}

/// Single-line percentage display on stderr.
struct ProgressLine {
    label: &'static str,
    started: Instant,
    last_percent: Option<u32>,
}

impl ProgressLine {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            started: Instant::now(),
            last_percent: None,
        }
    }

    fn update(&mut self, fraction: f32) {
        let percent = (fraction * 100.0) as u32;
        if self.last_percent == Some(percent) {
            return;
        }
        self.last_percent = Some(percent);
        let mut stderr = std::io::stderr();
        let _ = write!(
            stderr,
            "\r{:8} {:3}%  {:.1}s",
            self.label,
            percent,
            self.started.elapsed().as_secs_f32()
        );
        let _ = stderr.flush();
    }

    fn finish(&self) {
        eprintln!();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number("1024"), Ok(1024));
        assert_eq!(parse_number("0x1FFFE00"), Ok(0x1FF_FE00));
        assert!(parse_number("0xZZ").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "cartlink",
            "--verbose",
            "dump-rom",
            "--offset",
            "0x100",
            "--length",
            "512",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::DumpRom {
                offset, length, ..
            } => {
                assert_eq!(offset, 0x100);
                assert_eq!(length, Some(512));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
