use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use phonebt::config::Config;
use phonebt::discovery::BluetoothDiscovery;
use phonebt::transport::{BluetoothTransport, MockTransport};
use phonebt::{ControllerAdapter, HfpEngine};

#[derive(Parser, Debug)]
#[command(name = "phonebt", about = "Hands-Free Profile client for a phone over Bluetooth")]
struct Cli {
    /// Bluetooth MAC address of the phone to connect to. Overrides the
    /// configured default device. If neither is set, a mock transport is
    /// used so the shell is usable without real hardware.
    #[arg(long)]
    device: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write the default config file and exit.
    InitConfig,
    /// Dial a number and exit once the dial request has been sent.
    Dial { number: String },
    /// Print current call status as JSON and exit.
    Status,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {e:#}", "error:".red().bold());
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(phonebt::errors::ConfigError::NotFound { .. }) => {
            let path = Config::write_default()?;
            eprintln!("wrote default config to {}", path.display());
            Config::default()
        }
        Err(e) => return Err(e.into()),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let device = cli.device.clone().or_else(|| config.default_device_mac.clone());
    let transport = build_transport(device.as_deref());

    let engine = Arc::new(HfpEngine::new(transport, config.to_engine_config()));
    let adapter =
        ControllerAdapter::new(engine.clone(), Arc::new(phonebt::audio::NullAudioRouter));
    let discovery = build_discovery();

    match cli.command {
        Some(Commands::InitConfig) => {
            let path = Config::write_default()?;
            println!("wrote default config to {}", path.display());
            return Ok(());
        }
        Some(Commands::Dial { number }) => {
            engine.connect().await?;
            let mut inputs = phonebt::ToolInputs::new();
            inputs.insert("number".to_string(), number);
            let result = adapter.execute("dial_number", inputs).await;
            println!("{}", result.to_canonical_json());
            engine.disconnect().await;
            return Ok(());
        }
        Some(Commands::Status) => {
            engine.connect().await?;
            let result = adapter.execute("get_call_status", phonebt::ToolInputs::new()).await;
            println!("{}", result.to_canonical_json());
            engine.disconnect().await;
            return Ok(());
        }
        None => {}
    }

    run_shell(engine, adapter, discovery.as_ref()).await
}

fn build_transport(device: Option<&str>) -> Arc<dyn BluetoothTransport> {
    #[cfg(target_os = "linux")]
    {
        if let Some(mac) = device {
            if let Ok(addr) = mac.parse() {
                return Arc::new(phonebt::transport::BluerTransport::new(addr));
            }
            eprintln!(
                "{} could not parse '{mac}' as a Bluetooth address, using a mock transport",
                "warning:".yellow()
            );
        }
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = device;
    }
    Arc::new(MockTransport::new())
}

fn build_discovery() -> Box<dyn BluetoothDiscovery> {
    #[cfg(target_os = "linux")]
    {
        Box::new(phonebt::discovery::BluerDiscovery)
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(phonebt::discovery::NullDiscovery)
    }
}

#[cfg(unix)]
async fn wait_for_terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(_) => std::future::pending::<()>().await,
    }
}

#[cfg(not(unix))]
async fn wait_for_terminate() {
    std::future::pending::<()>().await
}

/// Interactive REPL plus a background task that prints events as they
/// arrive. Reads one line at a time from stdin; `SIGINT`/`SIGTERM` trigger a
/// graceful disconnect and a clean exit rather than an abrupt kill.
async fn run_shell(
    engine: Arc<HfpEngine>,
    adapter: ControllerAdapter,
    discovery: &dyn BluetoothDiscovery,
) -> anyhow::Result<()> {
    println!("{}", "phonebt interactive shell. Type 'help' for commands.".bold());

    let mut events = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(text) = phonebt::controller::render_event(&event) {
                println!("{} {text}", "<<".dimmed());
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{} ", "phonebt>".green().bold());
        use std::io::Write;
        std::io::stdout().flush().ok();

        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                if handle_command(line.trim(), &engine, &adapter, discovery).await? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                println!("\nreceived interrupt, disconnecting...");
                break;
            }
            _ = wait_for_terminate() => {
                println!("\nreceived termination signal, disconnecting...");
                break;
            }
        }
    }

    engine.disconnect().await;
    Ok(())
}

/// Handle one REPL line. Returns `Ok(true)` when the shell should exit.
async fn handle_command(
    line: &str,
    engine: &Arc<HfpEngine>,
    adapter: &ControllerAdapter,
    discovery: &dyn BluetoothDiscovery,
) -> anyhow::Result<bool> {
    let mut parts = line.split_whitespace();
    let Some(cmd) = parts.next() else {
        return Ok(false);
    };
    let rest: Vec<&str> = parts.collect();

    match cmd {
        "help" => print_help(),
        "quit" | "exit" => return Ok(true),
        "scan" => {
            for d in discovery.scan().await {
                println!("{} {}", d.address, d.name.unwrap_or_else(|| "(unnamed)".into()));
            }
        }
        "paired" => {
            for d in discovery.paired_devices().await {
                println!("{} {}", d.address, d.name.unwrap_or_else(|| "(unnamed)".into()));
            }
        }
        "connect" => match engine.connect().await {
            Ok(()) => println!("connected"),
            Err(e) => println!("{} {e}", "connect failed:".red()),
        },
        "disconnect" => engine.disconnect().await,
        "dial" => {
            let Some(number) = rest.first() else {
                println!("usage: dial <number>");
                return Ok(false);
            };
            let mut inputs = phonebt::ToolInputs::new();
            inputs.insert("number".to_string(), number.to_string());
            println!("{}", adapter.execute("dial_number", inputs).await.to_canonical_json());
        }
        "answer" => {
            println!(
                "{}",
                adapter.execute("accept_call", phonebt::ToolInputs::new()).await.to_canonical_json()
            );
        }
        "hangup" => {
            println!(
                "{}",
                adapter.execute("end_call", phonebt::ToolInputs::new()).await.to_canonical_json()
            );
        }
        "dtmf" => {
            let Some(digit) = rest.first() else {
                println!("usage: dtmf <digit>");
                return Ok(false);
            };
            let mut inputs = phonebt::ToolInputs::new();
            inputs.insert("digit".to_string(), digit.to_string());
            println!("{}", adapter.execute("send_dtmf", inputs).await.to_canonical_json());
        }
        "status" => {
            println!(
                "{}",
                adapter.execute("get_call_status", phonebt::ToolInputs::new()).await.to_canonical_json()
            );
        }
        "phone" => {
            println!(
                "{}",
                adapter.execute("get_phone_status", phonebt::ToolInputs::new()).await.to_canonical_json()
            );
        }
        "audio" => {
            let state = engine.state();
            println!("{:?}", state.audio);
        }
        "agent" => {
            let Some(text) = rest.first() else {
                println!("usage: agent <tool_name> to dispatch a one-off tool call");
                return Ok(false);
            };
            println!("{}", adapter.execute(text, phonebt::ToolInputs::new()).await.to_canonical_json());
        }
        other => println!("unknown command '{other}', type 'help' for the command list"),
    }

    Ok(false)
}

fn print_help() {
    println!(
        "{}",
        "scan | paired | connect | disconnect | dial <n> | answer | hangup | \
         dtmf <d> | status | phone | audio | agent <tool> | help | quit"
            .dimmed()
    );
}
