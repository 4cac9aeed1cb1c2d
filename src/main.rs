//! Cromwell Proxy - authenticating reverse proxy for the Cromwell workflow engine

use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use cromwell_proxy::{
    cli::{Cli, Command},
    config::Config,
    gateway::{Gateway, RouteTable},
    setup_tracing,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = setup_tracing(&cli.log_level, cli.log_format.map(|f| f.as_str())) {
        eprintln!("Failed to setup tracing: {e}");
        return ExitCode::FAILURE;
    }

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Some(Command::Routes) => print_routes(&config),
        Some(Command::CheckConfig) => check_config(&config),
        Some(Command::Serve) | None => run_server(config).await,
    }
}

/// Load configuration and apply CLI overrides
fn load_config(cli: &Cli) -> cromwell_proxy::Result<Config> {
    let mut config = Config::load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(ref host) = cli.host {
        config.server.host = host.clone();
    }
    if let Some(ref upstream) = cli.upstream {
        config.upstream.base_url = upstream.clone();
    }

    Ok(config)
}

/// Print the effective route table
fn print_routes(config: &Config) -> ExitCode {
    let table = match RouteTable::from_config(&config.effective_routes()) {
        Ok(table) => table,
        Err(e) => {
            eprintln!("❌ {e}");
            return ExitCode::FAILURE;
        }
    };

    let source = if config.routes.is_empty() { "built-in" } else { "configured" };
    println!("{} route(s) ({source}), first match wins:\n", table.len());

    for rule in table.rules() {
        let methods = if rule.methods().is_empty() {
            "*".to_string()
        } else {
            rule.methods()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(",")
        };
        print!("  {methods:<10} {}", rule.pattern());
        if let Some(upstream) = rule.upstream() {
            print!("  ->  {upstream}");
        }
        println!("  [{}]", rule.requirement());
    }

    ExitCode::SUCCESS
}

/// Validate configuration and print a summary
fn check_config(config: &Config) -> ExitCode {
    if let Err(e) = config.validate() {
        eprintln!("❌ {e}");
        return ExitCode::FAILURE;
    }

    println!("✅ Configuration valid");
    println!("   Listen:   {}:{}", config.server.host, config.server.port);
    println!("   Upstream: {}", config.upstream.base_url);
    if config.requires_auth() {
        println!(
            "   Issuer:   {}",
            config.auth.expected_issuer().unwrap_or_default()
        );
        println!(
            "   Audience: {}",
            config.auth.audience.as_deref().unwrap_or_default()
        );
        println!("   JWKS:     {}", config.auth.jwks_url().unwrap_or_default());
    } else {
        println!("   Auth:     no route requires a token");
    }
    println!("   Routes:   {}", config.effective_routes().len());

    ExitCode::SUCCESS
}

/// Run the proxy until shutdown
async fn run_server(config: Config) -> ExitCode {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = config.server.port,
        upstream = %config.upstream.base_url,
        "Starting Cromwell proxy"
    );

    let gateway = match Gateway::new(config) {
        Ok(g) => g,
        Err(e) => {
            error!("Failed to create proxy: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = gateway.run().await {
        error!("Proxy error: {e}");
        return ExitCode::FAILURE;
    }

    info!("Proxy shutdown complete");
    ExitCode::SUCCESS
}
