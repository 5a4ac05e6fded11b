//! Samara — supervisor entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Open the memory system
//!   7. Start supervisor bus + subsystem handlers
//!   8. Spawn Ctrl-C → shutdown signal watcher
//!   9. Run the HTTP channel until shutdown
//!  10. Cancel token + join supervisor

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use samara_bot::config;
use samara_bot::error::AppError;
use samara_bot::logger;
use samara_bot::subsystems::agents::AgentsSubsystem;
use samara_bot::subsystems::comms::{axum_channel, state::CommsState};
use samara_bot::subsystems::llm::LlmSubsystem;
use samara_bot::subsystems::memory::{MemorySubsystem, MemorySystem};
use samara_bot::supervisor;
use samara_bot::supervisor::bus::SupervisorBus;
use samara_bot::supervisor::dispatch::BusHandler;
use samara_bot::supervisor::health::HealthRegistry;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        service = %config.service_name,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    // Shared shutdown token — Ctrl-C cancels it, all tasks watch it.
    let shutdown = CancellationToken::new();

    let memory = Arc::new(MemorySystem::new(&config.work_dir, &config.memory)?);

    let health = HealthRegistry::new();
    let bus = SupervisorBus::new(64);
    let bus_handle = bus.handle.clone();

    // Ctrl-C handler — cancels the token so all tasks shut down.
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    // Build subsystem handlers and register with the supervisor.
    let mut handlers: Vec<Box<dyn BusHandler>> = Vec::new();

    let llm = LlmSubsystem::new(&config.llm, config.llm_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?
        .with_health_reporter(health.reporter("llm"));
    llm.spawn_health_checker(shutdown.clone());
    handlers.push(Box::new(llm));

    handlers.push(Box::new(
        MemorySubsystem::new(memory.clone(), config.retrieval.clone())
            .with_health_reporter(health.reporter("memory")),
    ));

    let agents = AgentsSubsystem::new(
        config.agents.clone(),
        config.retrieval.clone(),
        config.thinking.clone(),
        &config.memory,
        config.prompts_dir.clone(),
        bus_handle.clone(),
        memory.clone(),
    )
    .with_health_reporter(health.reporter("agents"));
    handlers.push(Box::new(agents));

    // Spawn supervisor run-loop (owns the bus receiver).
    let sup_token = shutdown.clone();
    let sup_handle = tokio::spawn(async move {
        supervisor::run(bus, sup_token, handlers).await;
    });

    print_startup_summary(&config);

    if config.comms.http.enabled {
        let comms = Arc::new(CommsState::new(bus_handle, health));
        axum_channel::run("http0", &config.comms.http.bind, comms, shutdown.clone()).await?;
    } else {
        info!("http channel disabled — running until ctrl-c");
        shutdown.cancelled().await;
    }

    // If the channel exited on its own, still signal everything to stop.
    shutdown.cancel();
    sup_handle.await.ok();

    Ok(())
}

fn print_startup_summary(config: &config::Config) {
    let fit = |text: String| -> String {
        const WIDTH: usize = 58;
        let char_count = text.chars().count();
        if char_count >= WIDTH {
            let mut out = text.chars().take(WIDTH - 1).collect::<String>();
            out.push('…');
            out
        } else {
            format!("{text:<WIDTH$}")
        }
    };

    let http_line = if config.comms.http.enabled {
        format!("🌐 http: {}", config.comms.http.bind)
    } else {
        "🌐 http: disabled".to_string()
    };
    let llm_line = format!(
        "provider={} model={} temp={} timeout={}s",
        config.llm.provider,
        config.llm.openai.model,
        config.llm.openai.temperature,
        config.llm.openai.timeout_seconds
    );
    let retrieval_line = format!(
        "chunk={}±{} top_k={} min_score={}",
        config.retrieval.chunk_size,
        config.retrieval.chunk_overlap,
        config.retrieval.top_k,
        config.retrieval.min_score
    );

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║ 🤖 Samara Supervisor Status                                  ║");
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧾 Service: {:<48}║", config.service_name);
    println!("║ 🧠 PID: {:<52}║", std::process::id());
    println!("║ 📁 Work dir: {:<47}║", config.work_dir.display());
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 📡 Comms                                                     ║");
    println!("║   {}║", fit(http_line));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🧠 LLM                                                       ║");
    println!("║   {}║", fit(llm_line));
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🤝 Agents                                                    ║");
    println!(
        "║   {}║",
        fit(format!(
            "chat{}: retrieval-augmented answers",
            if config.agents.default_agent == "chat" { " (default)" } else { "" }
        ))
    );
    println!(
        "║   {}║",
        fit(format!(
            "thinking{}: sequential multi-step reasoning",
            if config.agents.default_agent == "thinking" { " (default)" } else { "" }
        ))
    );
    println!("╟──────────────────────────────────────────────────────────────╢");
    println!("║ 🔎 Retrieval                                                 ║");
    println!("║   {}║", fit(retrieval_line));
    println!("╚══════════════════════════════════════════════════════════════╝");
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: samara-bot [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // Each -v raises verbosity one tier from the config default:
    //   -v      → warn   (suppress info noise, show warnings+errors only)
    //   -vv     → info   (normal operational output — the typical default)
    //   -vvv    → debug  (flow-level diagnostics: routing, handler registration)
    //   -vvvv+  → trace  (full payload dumps, very verbose)
    let log_level = match verbosity {
        0 => None,
        1 => Some("warn"),
        2 => Some("info"),
        3 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
