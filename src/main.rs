use clap::{Parser, Subcommand};
use log::{error, info};
use proxy_insight::configuration::config::Config;
use proxy_insight::controller::supervisor::Supervisor;

#[derive(Parser)]
#[command(name = "proxy-insight")]
#[command(version = "0.1.0")]
#[command(about = "Capture, store and stream intercepted HTTP traffic")]
struct Cli {
    #[command(flatten)]
    config: Config,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the capture engine until interrupted (default)
    Capture,
    /// Print stored exchanges, newest first, one JSON object per line
    List {
        #[arg(long, default_value_t = 50)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
        /// Case-insensitive substring of the URL, method or bodies
        #[arg(long)]
        query: Option<String>,
    },
    /// Print summary statistics as JSON
    Stats,
    /// Delete every stored exchange
    Clear,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .format_target(false)
        .init();

    let cli = Cli::parse();

    println!(
        "
==============================================================================
                           proxy-insight v0.1.0
              Capture, store and stream intercepted HTTP traffic
==============================================================================
"
    );

    let supervisor = match Supervisor::from_config(&cli.config).await {
        Ok(s) => s,
        Err(e) => {
            error!("Unable to initialize: {}, exiting...", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command.unwrap_or(Command::Capture) {
        Command::Capture => capture(&supervisor).await,
        Command::List {
            limit,
            offset,
            query,
        } => match supervisor.list_exchanges(limit, offset, query.as_deref()).await {
            Ok(rows) => {
                for row in rows {
                    match serde_json::to_string(&row) {
                        Ok(line) => println!("{}", line),
                        Err(e) => error!("Unable to encode exchange: {}", e),
                    }
                }
                0
            }
            Err(e) => {
                error!("Unable to list exchanges: {}", e);
                1
            }
        },
        Command::Stats => match supervisor.get_stats().await {
            Ok(stats) => match serde_json::to_string_pretty(&stats) {
                Ok(text) => {
                    println!("{}", text);
                    0
                }
                Err(e) => {
                    error!("Unable to encode stats: {}", e);
                    1
                }
            },
            Err(e) => {
                error!("Unable to compute stats: {}", e);
                1
            }
        },
        Command::Clear => match supervisor.clear_all().await {
            Ok(()) => {
                info!("History cleared");
                0
            }
            Err(e) => {
                error!("Unable to clear history: {}", e);
                1
            }
        },
    };

    std::process::exit(code);
}

async fn capture(supervisor: &Supervisor) -> i32 {
    let toggle = supervisor.start_capture(None, None).await;
    if !toggle.success {
        error!(
            "{}",
            toggle
                .error
                .unwrap_or_else(|| "capture failed to start".to_string())
        );
        return 1;
    }
    let status = supervisor.status();
    info!(
        "Capturing on {}:{}, press Ctrl-C to stop",
        status.proxy_host, status.proxy_port
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Unable to listen for shutdown signal: {}", e);
    }
    supervisor.shutdown().await;
    0
}
