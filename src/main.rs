use anyhow::{anyhow, bail, Context as _, Result};
use clap::{Parser, Subcommand};
use mioty_payload::unit::script::run_worker;
use mioty_payload::util::parse_payload_hex;
use mioty_payload::{
    families, init_logger, log_error, log_info, DecodeContext, DecoderRegistry, DecodingUnit, Engine,
    EngineConfig, LayoutUnit, ScriptUnit,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "mioty-decode")]
#[command(about = "Decode mioty/LoRa sensor payloads into measurements")]
struct Cli {
    /// Engine configuration file (JSON)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory of *.json layouts and *.js decoders to register
    #[arg(long, global = true)]
    units_dir: Option<PathBuf>,

    /// Device assignment, DEVICE=UNIT (repeatable)
    #[arg(long = "assign", global = true, value_name = "DEVICE=UNIT")]
    assignments: Vec<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a single payload
    Decode {
        /// Payload as hex ("11 32 0C 1C", "0x11320c1c", ...)
        #[arg(short, long)]
        payload: String,
        #[arg(long, default_value_t = 1)]
        port: u8,
        #[arg(long, default_value = "cli")]
        device: String,
        /// Decode with a built-in family instead of the device assignment
        #[arg(long, conflicts_with_all = ["layout", "script"])]
        family: Option<String>,
        /// Decode with a JSON layout file
        #[arg(long, conflicts_with = "script")]
        layout: Option<PathBuf>,
        /// Decode with a JavaScript decoder file
        #[arg(long)]
        script: Option<PathBuf>,
    },
    /// Decode every `device,port,hex` line of a file
    Batch {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// List built-in device families
    Families,
    /// Run one script job from stdin (spawned by the engine)
    #[command(name = "script-worker", hide = true)]
    ScriptWorker,
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::from_file(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(EngineConfig::default()),
    }
}

fn build_engine(cli: &Cli) -> Result<Engine> {
    let config = load_config(cli.config.as_deref())?;
    let registry = DecoderRegistry::with_builtin_families()?;

    if let Some(dir) = &cli.units_dir {
        let loaded = registry
            .load_units_from_dir(dir, &config.script)
            .with_context(|| format!("loading units from {}", dir.display()))?;
        log_info(&format!("Loaded {loaded} decoding units"));
    }

    for assignment in &cli.assignments {
        let (device, unit) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("assignment '{assignment}' is not DEVICE=UNIT"))?;
        registry.assign(device.trim(), unit.trim())?;
    }

    Ok(Engine::new(Arc::new(registry), config))
}

fn explicit_unit(
    engine: &Engine,
    family: Option<&str>,
    layout: Option<&Path>,
    script: Option<&Path>,
) -> Result<Option<Arc<dyn DecodingUnit>>> {
    if let Some(name) = family {
        let layout = families::family(name)
            .ok_or_else(|| anyhow!("unknown family '{name}' (see `mioty-decode families`)"))?;
        return Ok(Some(Arc::new(LayoutUnit::new(layout.clone())?)));
    }
    if let Some(path) = layout {
        let json = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        return Ok(Some(Arc::new(LayoutUnit::from_json(&json)?)));
    }
    if let Some(path) = script {
        let source = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("script");
        return Ok(Some(Arc::new(ScriptUnit::new(name, source, engine.config().script.clone())?)));
    }
    Ok(None)
}

fn parse_batch_line(line: &str) -> Result<(String, u8, Vec<u8>)> {
    let mut parts = line.splitn(3, ',');
    let (Some(device), Some(port), Some(hex)) = (parts.next(), parts.next(), parts.next()) else {
        bail!("expected device,port,hex");
    };
    let port = port
        .trim()
        .parse::<u8>()
        .with_context(|| format!("invalid port '{}'", port.trim()))?;
    let bytes = parse_payload_hex(hex)?;
    Ok((device.trim().to_string(), port, bytes))
}

async fn run_batch(engine: Arc<Engine>, input: &Path) -> Result<()> {
    let text = tokio::fs::read_to_string(input)
        .await
        .with_context(|| format!("reading {}", input.display()))?;

    let mut pending = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line_no = index + 1;
        let task = match parse_batch_line(line) {
            Ok((device, port, bytes)) => {
                let engine = Arc::clone(&engine);
                Ok(tokio::task::spawn_blocking(move || {
                    let context = DecodeContext::new(port, device);
                    let outcome = engine.decode(&bytes, &context);
                    (context, outcome)
                }))
            }
            Err(e) => Err(e),
        };
        pending.push((line_no, task));
    }

    // Results are printed in input order regardless of completion order.
    for (line_no, task) in pending {
        let record = match task {
            Ok(handle) => match handle.await {
                Ok((context, outcome)) => serde_json::json!({
                    "line": line_no,
                    "device": context.device_id,
                    "port": context.port,
                    "result": outcome,
                }),
                Err(e) => serde_json::json!({ "line": line_no, "error": format!("decode task failed: {e}") }),
            },
            Err(e) => {
                log_error(&format!("{}:{}: {:#}", input.display(), line_no, e));
                serde_json::json!({ "line": line_no, "error": format!("{e:#}") })
            }
        };
        println!("{record}");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::ScriptWorker = cli.command {
        run_worker(std::io::stdin().lock(), std::io::stdout().lock())?;
        return Ok(());
    }

    init_logger();

    match &cli.command {
        Commands::Decode {
            payload,
            port,
            device,
            family,
            layout,
            script,
        } => {
            let engine = build_engine(&cli)?;
            let bytes = parse_payload_hex(payload)?;
            let context = DecodeContext::new(*port, device.clone());
            let unit = explicit_unit(&engine, family.as_deref(), layout.as_deref(), script.as_deref())?;
            let outcome = match unit {
                Some(unit) => engine.decode_with(unit.as_ref(), &bytes, &context),
                None => engine.decode(&bytes, &context),
            };
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Batch { input } => {
            let engine = Arc::new(build_engine(&cli)?);
            run_batch(engine, input).await?;
        }
        Commands::ScriptWorker => {}
        Commands::Families => {
            for layout in families::builtin_families() {
                println!(
                    "{:<14} {}",
                    layout.name,
                    layout.description.as_deref().unwrap_or("")
                );
            }
        }
    }

    Ok(())
}
