use clap::{Parser, Subcommand};
use courier::config::{self, Config};
use courier::dispatch::Dispatcher;
use courier::envelope::{EnvelopeStatus, ResultEnvelope};
use courier::wait::DEFAULT_TIMEOUT_SECS;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "courier")]
#[command(
    about = "Send email, Telegram and Signal messages; optionally wait for a reply",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Send an email (Resend).
    Email {
        subject: String,
        body: String,
        /// Recipient (default: channels.email.defaultTo)
        #[arg(long)]
        to: Option<String>,
        /// Optional HTML body
        #[arg(long, value_name = "HTML")]
        html: Option<String>,
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
        /// Print the raw result envelope as JSON
        #[arg(long)]
        json: bool,
    },

    /// Send a Telegram message and optionally wait for the reply.
    Telegram {
        message: String,
        /// Wait for a reply
        #[arg(long)]
        reply: bool,
        /// Seconds to wait for a reply
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: f64,
        /// Chat id or @username (default: TELEGRAM_CHAT_ID)
        #[arg(long)]
        chat: Option<String>,
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Send a Signal message and optionally wait for the reply.
    Signal {
        message: String,
        /// Recipient phone number, e.g. +15551230000
        recipient: String,
        #[arg(long)]
        reply: bool,
        #[arg(long, default_value_t = DEFAULT_TIMEOUT_SECS)]
        timeout: f64,
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Show which channels are configured.
    Status {
        /// Also contact each configured channel (Telegram getMe, signal-cli --version)
        #[arg(long)]
        probe: bool,
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Fetch new inbound messages once (telegram or signal).
    Receive {
        channel: String,
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },

    /// Run the HTTP gateway.
    Gateway {
        /// Config file path (default: COURIER_CONFIG_PATH or ~/.courier/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// HTTP port (default from config or 15152)
        #[arg(long, short)]
        port: Option<u16>,
    },
}

fn init_logging(default_filter: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Gateway { config, port }) => {
            // The gateway's default log level comes from its config.
            let loaded = config::load_config(config);
            let level = loaded
                .as_ref()
                .map(|(c, _)| c.gateway.log_level.clone())
                .unwrap_or_else(|_| "warn".to_string());
            init_logging(&level);
            run_gateway(loaded, port).await
        }
        command => {
            init_logging("warn");
            run(command).await
        }
    };
    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(command: Option<Commands>) -> anyhow::Result<()> {
    match command {
        Some(Commands::Version) => {
            println!("courier {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Init { config }) => run_init(config),
        Some(Commands::Email {
            subject,
            body,
            to,
            html,
            config,
            json,
        }) => {
            let dispatcher = load_dispatcher(config)?;
            let env = dispatcher
                .send_email(to.as_deref(), &subject, &body, html.as_deref())
                .await;
            report(&env, json, "Email")
        }
        Some(Commands::Telegram {
            message,
            reply,
            timeout,
            chat,
            config,
            json,
        }) => {
            let dispatcher = load_dispatcher(config)?;
            let env = dispatcher
                .send_with_reply("telegram", &message, chat.as_deref(), reply, timeout)
                .await;
            report(&env, json, "Telegram message")
        }
        Some(Commands::Signal {
            message,
            recipient,
            reply,
            timeout,
            config,
            json,
        }) => {
            let dispatcher = load_dispatcher(config)?;
            let env = dispatcher
                .send_with_reply("signal", &message, Some(&recipient), reply, timeout)
                .await;
            report(&env, json, "Signal message")
        }
        Some(Commands::Status {
            probe,
            config,
            json,
        }) => run_status(config, probe, json).await,
        Some(Commands::Receive {
            channel,
            config,
            json,
        }) => run_receive(config, &channel, json).await,
        Some(Commands::Gateway { config, port }) => {
            run_gateway(config::load_config(config), port).await
        }
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    }
}

fn load_dispatcher(config_path: Option<PathBuf>) -> anyhow::Result<Dispatcher> {
    let (config, path) = config::load_config(config_path)?;
    log::debug!("loaded config from {}", path.display());
    Ok(Dispatcher::from_config(&config))
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(config::default_config_path);
    let dir = courier::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

/// Print an envelope the way a person wants to read it (or raw JSON), and fail on error statuses.
fn report(env: &ResultEnvelope, json: bool, what: &str) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(env)?);
    } else {
        match env.status {
            EnvelopeStatus::Sent => {
                let to = env
                    .message_sent
                    .as_ref()
                    .map(|m| format!(" to {}", m.target))
                    .unwrap_or_default();
                println!("✅ {} sent{}", what, to);
            }
            EnvelopeStatus::CompletedWithReply => {
                let wait = match &env.reply {
                    Some(courier::envelope::ReplyReport::ReplyReceived {
                        wait_time_seconds, ..
                    }) => *wait_time_seconds,
                    _ => 0.0,
                };
                println!(
                    "✅ Reply received ({:.1}s): {}",
                    wait,
                    env.reply_text().unwrap_or_default()
                );
            }
            EnvelopeStatus::SentButNoReply => {
                println!("📤 Message sent, no reply received");
            }
            EnvelopeStatus::SentButErrorWaiting
            | EnvelopeStatus::SendFailed
            | EnvelopeStatus::Error => {}
        }
    }
    match env.status {
        EnvelopeStatus::Error | EnvelopeStatus::SendFailed => anyhow::bail!(
            "Failed: {}",
            env.error.as_deref().unwrap_or("unknown error")
        ),
        EnvelopeStatus::SentButErrorWaiting => anyhow::bail!(
            "Message sent, but waiting for a reply failed: {}",
            env.error.as_deref().unwrap_or("unknown error")
        ),
        _ => Ok(()),
    }
}

async fn run_status(config_path: Option<PathBuf>, probe: bool, json: bool) -> anyhow::Result<()> {
    let dispatcher = load_dispatcher(config_path)?;
    let statuses = dispatcher.status_all();
    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(());
    }
    println!("📊 Service Status:");
    for status in &statuses {
        let mark = if status.configured { "✅" } else { "❌" };
        let target = status
            .default_target
            .as_deref()
            .map(|t| format!(" (default: {})", t))
            .unwrap_or_default();
        println!("{} {}{}", mark, status.service, target);
        if let Some(detail) = &status.detail {
            println!("   {}", detail);
        }
        if probe && status.configured && status.cursor.is_some() {
            match dispatcher.probe(&status.service).await {
                Ok(info) => println!("   probe: {}", info),
                Err(e) => println!("   probe failed: {}", e),
            }
        }
    }
    Ok(())
}

async fn run_receive(
    config_path: Option<PathBuf>,
    channel: &str,
    json: bool,
) -> anyhow::Result<()> {
    let dispatcher = load_dispatcher(config_path)?;
    let messages = dispatcher.receive(channel).await?;
    if json {
        let items: Vec<serde_json::Value> = messages
            .iter()
            .map(|m| {
                serde_json::json!({
                    "from": m.sender,
                    "from_name": m.sender_name,
                    "text": m.text,
                    "date": m.timestamp,
                    "group": m.group,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }
    if messages.is_empty() {
        println!("No new messages");
    }
    for m in &messages {
        let who = m.sender_name.as_deref().unwrap_or(&m.sender);
        println!("[{}] {}: {}", m.timestamp.format("%Y-%m-%d %H:%M:%S"), who, m.text);
    }
    Ok(())
}

async fn run_gateway(
    loaded: anyhow::Result<(Config, PathBuf)>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = loaded?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!(
        "starting gateway on {}:{} (config {})",
        config.gateway.bind,
        config.gateway.port,
        path.display()
    );
    courier::gateway::run_gateway(config).await
}
