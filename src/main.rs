use atlink::config::{get_default_config_path, Config, ConfigLoader};
use atlink::port::list_ports;
use atlink::{DeviceLink, Direction, InvokeOptions, LinkSettings};
use clap::{Parser, Subcommand};
use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tokio_stream::StreamExt;
use tracing::{info, warn};

type CliResult<T> = Result<T, Box<dyn Error>>;

#[derive(Parser, Debug)]
#[command(
    name = "atlink",
    version,
    about = "Talk to AT-command vision-AI devices over serial."
)]
struct Cli {
    /// Serial port path or configured alias
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (defaults to the configured value)
    #[arg(short, long, global = true)]
    baud: Option<u32>,

    /// Configuration file to use instead of the usual search path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Per-command reply timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List serial ports on this machine
    Ports,
    /// Send one AT command and print the reply
    Send {
        /// Command text, e.g. `AT+ID?`
        command: String,
    },
    /// Print device identity, model and thresholds
    Info,
    /// Stream inference results until Ctrl+C
    Invoke {
        /// Rounds to run; -1 runs until stopped
        #[arg(long, default_value_t = -1, allow_hyphen_values = true)]
        times: i32,
        /// Only report results that changed
        #[arg(long)]
        on_change_only: bool,
        /// Leave images out of the results
        #[arg(long)]
        result_only: bool,
    },
    /// Print raw traffic until Ctrl+C
    Monitor,
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> CliResult<()> {
    let cli = Cli::parse();

    let loader = match &cli.config {
        Some(path) => ConfigLoader::load_from(path)?,
        None => ConfigLoader::load()?,
    };
    if let Err(e) = atlink::logging::init(&loader.config().logging) {
        eprintln!("logging already initialised: {e}");
    }
    if let Some(path) = &loader.config_path {
        info!(path = %path.display(), "loaded configuration");
    }
    let config = loader.into_config();

    match &cli.command {
        Commands::Ports => cmd_ports(),
        Commands::Config => cmd_config(&config),
        Commands::Send { command } => {
            let link = connect(&cli, &config).await?;
            let result = cmd_send(&link, command).await;
            link.disconnect().await?;
            result
        }
        Commands::Info => {
            let link = connect(&cli, &config).await?;
            let result = cmd_info(&link).await;
            link.disconnect().await?;
            result
        }
        Commands::Invoke {
            times,
            on_change_only,
            result_only,
        } => {
            let link = connect(&cli, &config).await?;
            let options = InvokeOptions {
                times: *times,
                on_change_only: *on_change_only,
                result_only: *result_only,
            };
            let result = cmd_invoke(&link, options).await;
            link.disconnect().await?;
            result
        }
        Commands::Monitor => {
            let link = connect(&cli, &config).await?;
            cmd_monitor(&link).await;
            link.disconnect().await?;
            Ok(())
        }
    }
}

fn require_port(cli: &Cli, config: &Config) -> CliResult<String> {
    cli.port
        .clone()
        .or_else(|| config.serial.default_port.clone())
        .ok_or_else(|| "no port given: pass --port or set serial.default_port".into())
}

async fn connect(cli: &Cli, config: &Config) -> CliResult<DeviceLink> {
    let port = require_port(cli, config)?;
    let mut settings = LinkSettings::from_config(config);
    if let Some(ms) = cli.timeout_ms {
        settings.command_timeout = Duration::from_millis(ms);
    }
    let baud = cli.baud.unwrap_or(config.serial.default_baud);

    let link = DeviceLink::serial(settings);
    link.connect(&port, baud).await?;
    Ok(link)
}

fn cmd_ports() -> CliResult<()> {
    let ports = list_ports()?;
    if ports.is_empty() {
        println!("No serial ports found.");
        return Ok(());
    }
    for port in ports {
        match (port.vid, port.pid) {
            (Some(vid), Some(pid)) => println!(
                "{}  {:04x}:{:04x}  {}",
                port.name,
                vid,
                pid,
                port.product.as_deref().unwrap_or("")
            ),
            _ => println!("{}", port.name),
        }
    }
    Ok(())
}

fn cmd_config(config: &Config) -> CliResult<()> {
    if let Some(path) = get_default_config_path() {
        println!("# user config path: {}", path.display());
    }
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}

async fn cmd_send(link: &DeviceLink, command: &str) -> CliResult<()> {
    let frame = link.send_command(command).await?;
    println!("{}", serde_json::to_string_pretty(&frame)?);
    if !frame.is_ok() {
        warn!(code = frame.code, "device reported an error");
    }
    Ok(())
}

async fn cmd_info(link: &DeviceLink) -> CliResult<()> {
    println!("id:        {}", link.device_id().await?);
    println!("name:      {}", link.device_name().await?);

    let version = link.version().await?;
    println!("software:  {}", version.software);
    println!("hardware:  {}", version.hardware);

    match link.model().await {
        Ok(model) => println!("model:     {}", model.id),
        Err(e) => println!("model:     unavailable ({e})"),
    }
    match link.sensor().await {
        Ok(sensor) => println!(
            "sensor:    {} {}",
            sensor.id,
            sensor.opt_detail.as_deref().unwrap_or("")
        ),
        Err(e) => println!("sensor:    unavailable ({e})"),
    }

    println!("score:     {}", link.score_threshold().await?);
    println!("iou:       {}", link.iou_threshold().await?);
    Ok(())
}

async fn cmd_invoke(link: &DeviceLink, options: InvokeOptions) -> CliResult<()> {
    link.start_invoke(options, |result| {
        let classes: Vec<String> = result
            .classes
            .iter()
            .map(|c| format!("{}:{:.0}", c.class_id, c.score))
            .collect();
        match result.best_box() {
            Some(best) => println!(
                "boxes={} best=[{} {:.0}] classes=[{}]",
                result.boxes.len(),
                best.class_id,
                best.score,
                classes.join(" ")
            ),
            None => println!("boxes=0 classes=[{}]", classes.join(" ")),
        }
    })
    .await?;

    signal::ctrl_c().await?;
    link.stop_all_tasks().await?;
    Ok(())
}

async fn cmd_monitor(link: &DeviceLink) {
    let mut traffic = Box::pin(link.traffic());
    let mut states = link.watch_state();
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => break,
            changed = states.changed() => {
                if changed.is_err() || !link.is_connected() {
                    warn!("port closed");
                    break;
                }
            }
            record = traffic.next() => {
                let Some(record) = record else { break };
                let arrow = match record.direction {
                    Direction::Rx => "<-",
                    Direction::Tx => "->",
                };
                println!("{} {} {:?}", record.time.format("%H:%M:%S%.3f"), arrow, record.text);
            }
        }
    }
}
