//! vpn-session - command-line front end for the VPN API session core.
//!
//! Logs in and out, shows the session state and prints the cached server
//! list, OpenVPN ports and streaming catalog. Every command goes through
//! the same recovering session, so rate limits, expired sessions and a
//! blocked API are handled the same way the client does it.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vpn_session_core::api::HttpTransport;
use vpn_session_core::cache::age_display;
use vpn_session_core::{ApiSession, Config, KeyringStore, SessionOptions, SessionState};

type Session = ApiSession<HttpTransport, KeyringStore>;

const USAGE: &str = "\
Usage: vpn-session <command> [args]

Commands:
  login [username]     Log in and store the session in the keyring
  logout               Log out and remove stored credentials and caches
  status               Show the session state
  refresh              Refresh the API session
  servers [--force]    List VPN servers from the cache
  ports                Show the default OpenVPN ports
  streaming <country>  List streaming services available in a country
  get <path>           Authenticated GET of an API path, printed as JSON";

/// Initialize the tracing subscriber for logging
fn init_tracing() {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };
    if command == "--help" || command == "-h" || command == "help" {
        println!("{USAGE}");
        return Ok(());
    }

    let mut session = open_session()?;
    match command.as_str() {
        "login" => login(&mut session, args.get(1).cloned()).await,
        "logout" => {
            session.logout().await;
            println!("Logged out");
            Ok(())
        }
        "status" => status(&session),
        "refresh" => {
            session.refresh().await.context("Session refresh failed")?;
            println!("Session refreshed");
            Ok(())
        }
        "servers" => servers(&mut session, args.iter().any(|a| a == "--force")).await,
        "ports" => ports(&mut session).await,
        "streaming" => {
            let country = args
                .get(1)
                .ok_or_else(|| anyhow!("Usage: vpn-session streaming <country>"))?;
            streaming(&mut session, country).await
        }
        "get" => {
            let path = args.get(1).ok_or_else(|| anyhow!("Usage: vpn-session get <path>"))?;
            let body = session.call(path).await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(())
        }
        other => bail!("Unknown command '{other}'\n\n{USAGE}"),
    }
}

fn open_session() -> Result<Session> {
    let config = Config::load().context("Failed to load config")?;
    let cache_dir = Config::cache_dir()?;
    info!(api_url = %config.api_url, cache_dir = %cache_dir.display(), "Opening session");

    let transport = HttpTransport::new(
        &config.api_url,
        &config.app_version,
        config.alternate_routes.clone(),
    )
    .context("Failed to create HTTP client")?;

    Ok(ApiSession::new(
        transport,
        KeyringStore::new(),
        Arc::new(config),
        SessionOptions::new(&cache_dir),
    ))
}

fn prompt_username() -> Result<String> {
    print!("Username: ");
    io::stdout().flush()?;

    let mut username = String::new();
    io::stdin().read_line(&mut username)?;
    Ok(username.trim().to_string())
}

async fn login(session: &mut Session, username: Option<String>) -> Result<()> {
    if let SessionState::Authenticated { username } = session.state() {
        bail!("Already logged in as {username}, log out first");
    }

    let username = match username {
        Some(username) => username,
        None => prompt_username()?,
    };
    if username.is_empty() {
        bail!("Username is required");
    }
    let password = rpassword::prompt_password("Password: ")?;

    if session.authenticate(&username, &password).await? {
        println!("Logged in as {username}");
        Ok(())
    } else {
        bail!("Login rejected by the API")
    }
}

fn status(session: &Session) -> Result<()> {
    match session.state() {
        SessionState::Authenticated { username } => println!("Logged in as {username}"),
        SessionState::Unauthenticated => println!("Not logged in"),
    }
    println!("API: {}", session.current_url());
    Ok(())
}

async fn servers(session: &mut Session, force: bool) -> Result<()> {
    if let Err(e) = session.update_servers_if_needed(force).await {
        if force {
            return Err(e).context("Server list refresh failed");
        }
        info!(error = %e, "Using cached server list");
    }
    if let Some(cached_at) = session.servers_updated_at() {
        println!("Server list updated {}", age_display(cached_at, Utc::now()));
    }

    let servers = session.servers().await;
    if servers.is_empty() {
        println!("No servers cached");
        return Ok(());
    }
    for server in &servers.logicals {
        println!(
            "{:<12} {:<3} tier {} load {:>3}%{}",
            server.name,
            server.exit_country,
            server.tier,
            server.load,
            if server.is_online() { "" } else { " (offline)" }
        );
    }
    Ok(())
}

async fn ports(session: &mut Session) -> Result<()> {
    let udp = session.openvpn_udp_ports().await?;
    let tcp = session.openvpn_tcp_ports().await?;
    println!("OpenVPN UDP: {udp:?}");
    println!("OpenVPN TCP: {tcp:?}");
    Ok(())
}

async fn streaming(session: &mut Session, country: &str) -> Result<()> {
    let tier = match session.vpn_credentials().await {
        Ok(credentials) => credentials.tier,
        Err(e) => {
            info!(error = %e, "VPN tier unknown, showing free tier services");
            0
        }
    };

    let services = session.streaming().await.for_country(country, tier);
    if services.is_empty() {
        println!("No streaming services listed for {country}");
        return Ok(());
    }
    let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
    println!("{}", names.join(", "));
    Ok(())
}
