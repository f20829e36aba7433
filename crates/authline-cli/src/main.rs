//! authline - command-line front end for the authenticated API client.
//!
//! Log in once, then make requests that carry the stored bearer credential
//! and renew it transparently when the backend reports it expired.

use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use authline_core::api::{ApiRequest, Method};
use authline_core::{ApiClient, AuthState, Config, Surface};

const PASSWORD_ENV: &str = "AUTHLINE_PASSWORD";

#[derive(Parser, Debug)]
#[command(name = "authline", version, about = "Authenticated client for the storefront API")]
struct Cli {
    /// Application surface whose credentials to use (web, admin, mobile)
    #[arg(long, global = true)]
    surface: Option<Surface>,

    /// Backend origin, e.g. https://shop.example.com
    #[arg(long, global = true)]
    base_url: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
    },
    /// Store a credential pair delivered by an OAuth redirect
    OauthCallback {
        #[arg(long)]
        access_token: String,
        #[arg(long)]
        refresh_token: String,
    },
    /// End the session and forget stored credentials
    Logout,
    /// Show whether this surface is authenticated
    Status,
    /// Send an authenticated request and print the response body
    Request {
        method: String,
        path: String,
        /// JSON request body
        #[arg(long)]
        data: Option<String>,
    },
}

/// Initialize the tracing subscriber for logging.
/// Use RUST_LOG to control the level (e.g. RUST_LOG=authline_core=debug).
fn init_tracing(log_file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let name = path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid log file path: {}", path.display()))?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(dir, name));
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            Ok(None)
        }
    }
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        return Ok(password);
    }
    rpassword::prompt_password("Password: ").context("Failed to read password")
}

fn build_request(method: &str, path: &str, data: Option<&str>) -> Result<ApiRequest> {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())
        .with_context(|| format!("Invalid HTTP method: {}", method))?;
    let request = ApiRequest::new(method, path);
    match data {
        Some(data) => {
            let body: serde_json::Value =
                serde_json::from_str(data).context("--data must be valid JSON")?;
            Ok(request.json(&body)?)
        }
        None => Ok(request),
    }
}

/// Pretty-print JSON bodies; anything else is printed as-is
fn render_body(body: &[u8]) -> String {
    match serde_json::from_slice::<serde_json::Value>(body) {
        Ok(value) => serde_json::to_string_pretty(&value)
            .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned()),
        Err(_) => String::from_utf8_lossy(body).into_owned(),
    }
}

async fn run(cli: Cli, mut config: Config) -> Result<()> {
    if let Some(surface) = cli.surface {
        config.surface = surface;
    }
    if let Some(base_url) = cli.base_url {
        config.base_url = base_url;
    }

    let client = ApiClient::from_config(&config).await?;
    let session = client.session();

    match cli.command {
        Command::Login { email } => {
            let password = read_password()?;
            session.login(&email, &password).await?;
            println!("Logged in to {} as {}", config.surface, email);
        }
        Command::OauthCallback {
            access_token,
            refresh_token,
        } => {
            session
                .complete_oauth_callback(&access_token, &refresh_token)
                .await?;
            println!("Stored credentials for {}", config.surface);
        }
        Command::Logout => {
            session.logout().await?;
            println!("Logged out of {}", config.surface);
        }
        Command::Status => {
            let state = if session.is_authenticated().await {
                AuthState::Authenticated
            } else {
                AuthState::Anonymous
            };
            println!("{}: {}", config.surface, state);
        }
        Command::Request { method, path, data } => {
            let request = build_request(&method, &path, data.as_deref())?;
            let response = client.execute(request).await?;
            println!("{}", render_body(&response.body));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing(cli.log_file.as_deref())?;
    info!("authline starting");

    let config = Config::load()?;
    run(cli, config).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_request_with_global_flags() {
        let cli = Cli::try_parse_from([
            "authline",
            "request",
            "post",
            "/api/v1/cart",
            "--data",
            r#"{"sku":"TEE-001"}"#,
            "--surface",
            "admin",
        ])
        .unwrap();

        assert_eq!(cli.surface, Some(Surface::Admin));
        match cli.command {
            Command::Request { method, path, data } => {
                assert_eq!(method, "post");
                assert_eq!(path, "/api/v1/cart");
                assert_eq!(data.as_deref(), Some(r#"{"sku":"TEE-001"}"#));
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_surface_is_rejected() {
        assert!(Cli::try_parse_from(["authline", "--surface", "kiosk", "status"]).is_err());
    }

    #[test]
    fn test_build_request() {
        let request = build_request("put", "api/v1/cart/3", Some(r#"{"quantity":2}"#)).unwrap();
        assert_eq!(request.method, Method::PUT);
        assert_eq!(request.path, "/api/v1/cart/3");
        assert_eq!(request.body.unwrap()["quantity"], 2);

        assert!(build_request("get", "/x", Some("not json")).is_err());
        assert!(build_request("GE T", "/x", None).is_err());
    }

    #[test]
    fn test_render_body() {
        assert_eq!(render_body(br#"{"a":1}"#), "{\n  \"a\": 1\n}");
        assert_eq!(render_body(b"plain text"), "plain text");
    }
}
