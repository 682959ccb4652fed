use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use xform_codecs::{Algorithm, CompressionConfig, CompressionTransformFactory, LzmaProfile};
use xform_core::{CompressionStats, EncodedObject, Metadata, TransformPipeline, TransformRegistry};

// ── CLI definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "xform",
    about = "Compress objects through xform transforms and restore them, with a metadata sidecar",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Encode a file and write `<OUTPUT>.xform.json` next to it
    Encode {
        /// Source file
        input: PathBuf,
        /// Destination for the encoded bytes
        output: PathBuf,
        /// Algorithm: lzma | deflate | zstd
        #[arg(short, long)]
        algorithm: Option<String>,
        /// Compression level (lzma 0–9, deflate 0–9, zstd 1–22)
        #[arg(short, long)]
        level: Option<u32>,
        /// JSON compression config; flags override its fields
        #[arg(long)]
        config: Option<PathBuf>,
        /// Read encoded bytes out of the transform instead of writing into it
        #[arg(long)]
        pull: bool,
        /// Extra metadata stored with the object
        #[arg(short, long = "meta", value_name = "KEY=VALUE")]
        meta: Vec<String>,
    },
    /// Decode a file using its sidecar
    Decode {
        /// Encoded file
        input: PathBuf,
        /// Destination for the restored bytes
        output: PathBuf,
        /// Sidecar to use instead of `<INPUT>.xform.json`
        #[arg(long)]
        sidecar: Option<PathBuf>,
        /// Skip checking size and SHA-1 against the sidecar
        #[arg(long)]
        no_verify: bool,
    },
    /// Print the LZMA level table
    Profiles,
}

/// What `encode` stores next to the encoded file.
#[derive(Serialize, Deserialize)]
struct Sidecar {
    identifier: String,
    metadata: Metadata,
}

impl From<EncodedObject> for Sidecar {
    fn from(object: EncodedObject) -> Self {
        Self {
            identifier: object.identifier.to_string(),
            metadata: object.metadata,
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────────────

fn human_bytes(n: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut v = n as f64;
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", n)
    } else {
        format!("{:.2} {}", v, UNITS[unit])
    }
}

fn sidecar_path(encoded: &Path) -> PathBuf {
    let mut name = encoded.as_os_str().to_owned();
    name.push(".xform.json");
    PathBuf::from(name)
}

/// Writes `sidecar` as pretty JSON; buffered bytes are flushed before returning.
fn save_sidecar<W: Write>(out: W, sidecar: &Sidecar) -> anyhow::Result<()> {
    let mut out = BufWriter::new(out);
    serde_json::to_writer_pretty(&mut out, sidecar)?;
    out.flush()?;
    Ok(())
}

fn parse_meta(pairs: &[String]) -> anyhow::Result<Metadata> {
    pairs
        .iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => bail!("metadata {:?} is not KEY=VALUE", pair),
        })
        .collect()
}

fn load_config(
    path: Option<&Path>,
    algorithm: Option<&str>,
    level: Option<u32>,
) -> anyhow::Result<CompressionConfig> {
    let mut config = match path {
        Some(path) => {
            let file = File::open(path).with_context(|| format!("opening config {:?}", path))?;
            serde_json::from_reader(BufReader::new(file))
                .with_context(|| format!("parsing config {:?}", path))?
        }
        None => CompressionConfig::default(),
    };
    if let Some(name) = algorithm {
        let algorithm: Algorithm = name.parse()?;
        if algorithm != config.algorithm {
            config.algorithm = algorithm;
            config.level = algorithm.default_level();
            config.lzma_profile = None;
        }
    }
    if let Some(level) = level {
        config.level = level;
        config.lzma_profile = None;
    }
    Ok(config)
}

fn pipeline_for(config: CompressionConfig) -> anyhow::Result<TransformPipeline> {
    let factory = CompressionTransformFactory::new(config)?;
    let mut registry = TransformRegistry::new();
    registry.register(Box::new(factory));
    Ok(TransformPipeline::new(registry, xform_codecs::CLASS))
}

// ── Subcommand implementations ─────────────────────────────────────────────

fn run_encode(
    input: PathBuf,
    output: PathBuf,
    config: CompressionConfig,
    pull: bool,
    metadata: Metadata,
) -> anyhow::Result<()> {
    let pipeline = pipeline_for(config)?;
    let source = File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
    let sink = File::create(&output).with_context(|| format!("creating output file {:?}", output))?;
    let t0 = Instant::now();

    let object = if pull {
        let mut transform = pipeline.encode_pull(Box::new(BufReader::new(source)), metadata)?;
        let mut out = BufWriter::new(sink);
        io::copy(transform.encoded_source()?, &mut out)
            .with_context(|| format!("encoding {:?}", input))?;
        out.flush()?;
        transform.close()?;
        EncodedObject {
            identifier: transform.identifier().clone(),
            metadata: transform.metadata()?.clone(),
        }
    } else {
        pipeline
            .encode(&mut BufReader::new(source), Box::new(BufWriter::new(sink)), metadata)
            .with_context(|| format!("encoding {:?}", input))?
    };
    let elapsed = t0.elapsed();
    debug!(identifier = %object.identifier, pull, "encoded");

    let stats = CompressionStats::from_metadata(&object.metadata)?;
    let sidecar = sidecar_path(&output);
    let file = File::create(&sidecar).with_context(|| format!("creating sidecar {:?}", sidecar))?;
    save_sidecar(file, &Sidecar::from(object.clone()))
        .with_context(|| format!("writing sidecar {:?}", sidecar))?;

    eprintln!("  transform   : {}", object.identifier);
    eprintln!("  mode        : {}", if pull { "pull" } else { "push" });
    eprintln!("  raw size    : {}", human_bytes(stats.uncompressed_size));
    eprintln!("  compressed  : {}", human_bytes(stats.compressed_size));
    eprintln!("  saved       : {}", stats.ratio_string());
    eprintln!("  sha1        : {}", stats.sha1_hex());
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    eprintln!("  sidecar     : {}", sidecar.display());
    Ok(())
}

fn run_decode(
    input: PathBuf,
    output: PathBuf,
    sidecar: Option<PathBuf>,
    verify: bool,
) -> anyhow::Result<()> {
    let sidecar = sidecar.unwrap_or_else(|| sidecar_path(&input));
    let file = File::open(&sidecar).with_context(|| format!("opening sidecar {:?}", sidecar))?;
    let stored: Sidecar = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing sidecar {:?}", sidecar))?;

    let pipeline = pipeline_for(CompressionConfig::default())?;
    let source = File::open(&input).with_context(|| format!("opening input file {:?}", input))?;
    let mut transform = pipeline
        .decode(&stored.identifier, Box::new(BufReader::new(source)), stored.metadata.clone())
        .with_context(|| format!("no decoder for {}", stored.identifier))?;

    let sink = File::create(&output).with_context(|| format!("creating output file {:?}", output))?;
    let mut out = BufWriter::new(sink);
    let t0 = Instant::now();
    io::copy(transform.decoded_source()?, &mut out)
        .with_context(|| format!("decoding {:?}", input))?;
    out.flush()?;
    transform.close()?;
    let elapsed = t0.elapsed();

    let observed = CompressionStats::from_metadata(transform.observed_metadata()?)?;
    if verify {
        let expected = CompressionStats::from_metadata(&stored.metadata)
            .context("sidecar lacks compression metadata; rerun with --no-verify")?;
        if expected.uncompressed_size != observed.uncompressed_size {
            bail!(
                "size mismatch: sidecar says {} bytes, decoded {}",
                expected.uncompressed_size,
                observed.uncompressed_size
            );
        }
        if expected.sha1 != observed.sha1 {
            bail!(
                "sha1 mismatch: sidecar says {}, decoded {}",
                expected.sha1_hex(),
                observed.sha1_hex()
            );
        }
        info!(sha1 = %observed.sha1_hex(), "verified decoded payload");
    }

    eprintln!("  transform   : {}", stored.identifier);
    eprintln!("  compressed  : {}", human_bytes(observed.compressed_size));
    eprintln!("  restored    : {}", human_bytes(observed.uncompressed_size));
    eprintln!("  verified    : {}", if verify { "yes" } else { "skipped" });
    eprintln!("  elapsed     : {:.3}s", elapsed.as_secs_f64());
    Ok(())
}

fn run_profiles() -> anyhow::Result<()> {
    println!("{:<6} {:>12} {:>6} {:>7} {:>12}", "level", "dictionary", "match", "finder", "memory");
    for level in 0..=LzmaProfile::MAX_LEVEL {
        let profile = LzmaProfile::for_level(level)?;
        println!(
            "{:<6} {:>12} {:>6} {:>7} {:>12}",
            level,
            human_bytes(profile.dictionary_size.into()),
            profile.match_length,
            profile.match_finder.name(),
            human_bytes(profile.memory_estimate()),
        );
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive("warn".parse()?)
                .from_env_lossy(),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Encode {
            input,
            output,
            algorithm,
            level,
            config,
            pull,
            meta,
        } => {
            let config = load_config(config.as_deref(), algorithm.as_deref(), level)?;
            run_encode(input, output, config, pull, parse_meta(&meta)?)
        }
        Commands::Decode {
            input,
            output,
            sidecar,
            no_verify,
        } => run_decode(input, output, sidecar, !no_verify),
        Commands::Profiles => run_profiles(),
    }
}
