//! Spindle: serves a project whose routes are separately built worker
//! processes.
//!
//! Usage:
//!   spindle                                  # Project in the current directory
//!   spindle --project ./site                 # Project elsewhere
//!   spindle --no-tls --https-port 3000       # Plain HTTP for development
//!   spindle --tls-cert cert.pem --tls-key key.pem

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use clap::Parser;
use spindle_runtime::ProjectLayout;
use spindle_server::{ProjectConfig, ServerOptions, Spindle, redirect_router};
use spindle_transport::{RegistrationConfig, RpcConfig};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spindle", about = "Spindle: one process per route")]
struct Cli {
    /// Project directory (contains spindle.json, src/ and static/)
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Project config file (defaults to <project>/spindle.json)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Hostname the HTTP servers bind to
    #[arg(long, default_value = "0.0.0.0")]
    hostname: String,

    /// Plain HTTP port; redirects to the secure port
    #[arg(long, default_value = "8080")]
    http_port: u16,

    /// Port serving the routes
    #[arg(long, default_value = "8443")]
    https_port: u16,

    /// Worker registration port
    #[arg(long, default_value = "11000")]
    registry_port: u16,

    /// Session bridge port
    #[arg(long, default_value = "12000")]
    rpc_port: u16,

    /// Seconds a worker has to finish a request
    #[arg(long, default_value = "30")]
    session_timeout: u64,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Serve routes over plain HTTP and skip the redirect server
    #[arg(long)]
    no_tls: bool,

    /// Path to custom TLS certificate (PEM)
    #[arg(long)]
    tls_cert: Option<PathBuf>,

    /// Path to custom TLS private key (PEM)
    #[arg(long)]
    tls_key: Option<PathBuf>,

    /// Write logs to a file (defaults to ~/.spindle/logs/spindle.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

fn spindle_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
    PathBuf::from(home).join(".spindle")
}

fn init_tracing(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(ref log_file_arg) = cli.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return;
    };

    let log_path = if log_file_arg == "DEFAULT" {
        spindle_home().join("logs/spindle.log")
    } else {
        PathBuf::from(log_file_arg)
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {e}", log_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(file))
        .with_ansi(false)
        .init();

    eprintln!("Logging to {}", log_path.display());
}

/// Compute SHA-256 fingerprint from a PEM certificate file.
/// Returns `"sha256:<hex>"` or None if parsing fails.
fn fingerprint_from_pem(cert_path: &Path) -> Option<String> {
    use base64::Engine;
    use sha2::{Digest, Sha256};

    let pem = std::fs::read_to_string(cert_path).ok()?;
    let b64: String = pem.lines().filter(|l| !l.starts_with("-----")).collect();
    let der = base64::engine::general_purpose::STANDARD.decode(&b64).ok()?;
    Some(format!("sha256:{}", hex::encode(Sha256::digest(&der))))
}

/// Ensure a self-signed certificate and key exist under `~/.spindle/tls/`.
/// Returns (cert_path, key_path, fingerprint).
fn ensure_tls_certs() -> Result<(PathBuf, PathBuf, String), Box<dyn std::error::Error>> {
    let tls_dir = spindle_home().join("tls");
    let cert_path = tls_dir.join("cert.pem");
    let key_path = tls_dir.join("key.pem");

    if cert_path.exists() && key_path.exists() {
        let fingerprint = fingerprint_from_pem(&cert_path).unwrap_or_default();
        return Ok((cert_path, key_path, fingerprint));
    }

    std::fs::create_dir_all(&tls_dir)?;

    let mut sans = vec!["localhost".to_string(), "127.0.0.1".to_string(), "::1".to_string()];
    if let Ok(hostname) = hostname::get() {
        let hostname = hostname.to_string_lossy().to_string();
        if !sans.contains(&hostname) {
            sans.push(hostname);
        }
    }

    let mut subject_alt_names = Vec::with_capacity(sans.len());
    for san in &sans {
        match san.parse::<std::net::IpAddr>() {
            Ok(ip) => subject_alt_names.push(rcgen::SanType::IpAddress(ip)),
            Err(_) => subject_alt_names.push(rcgen::SanType::DnsName(san.clone().try_into()?)),
        }
    }

    let mut params = rcgen::CertificateParams::new(Vec::<String>::new())?;
    params.subject_alt_names = subject_alt_names;

    let key_pair = rcgen::KeyPair::generate()?;
    let cert = params.self_signed(&key_pair)?;

    let fingerprint = {
        use sha2::{Digest, Sha256};
        format!("sha256:{}", hex::encode(Sha256::digest(cert.der())))
    };

    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, key_pair.serialize_pem())?;

    Ok((cert_path, key_path, fingerprint))
}

/// Bind now so a taken port is reported at startup.
fn bind(hostname: &str, port: u16, what: &str) -> std::net::TcpListener {
    let listener = std::net::TcpListener::bind((hostname, port)).and_then(|l| {
        l.set_nonblocking(true)?;
        Ok(l)
    });
    match listener {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {what} port {hostname}:{port}: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli);

    let project = cli.project.canonicalize().unwrap_or_else(|_| cli.project.clone());
    let config_path = cli.config.clone().unwrap_or_else(|| project.join("spindle.json"));
    let config = match ProjectConfig::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    // Resolve TLS material
    let tls = if cli.no_tls {
        None
    } else if let (Some(cert), Some(key)) = (&cli.tls_cert, &cli.tls_key) {
        Some((cert.clone(), key.clone(), fingerprint_from_pem(cert).unwrap_or_default()))
    } else {
        match ensure_tls_certs() {
            Ok(material) => Some(material),
            Err(e) => {
                error!("Failed to generate TLS certificate: {e}");
                std::process::exit(1);
            }
        }
    };
    let rustls = match &tls {
        Some((cert, key, _)) => match RustlsConfig::from_pem_file(cert, key).await {
            Ok(config) => Some(config),
            Err(e) => {
                error!("Failed to load TLS certificate {}: {e}", cert.display());
                std::process::exit(1);
            }
        },
        None => None,
    };

    let options = ServerOptions {
        registration: RegistrationConfig {
            port: cli.registry_port,
            ..Default::default()
        },
        rpc: RpcConfig {
            port: cli.rpc_port,
            ..Default::default()
        },
        session_timeout: Duration::from_secs(cli.session_timeout),
        ..Default::default()
    };

    let project_name = if config.name.is_empty() {
        project.display().to_string()
    } else {
        config.name.clone()
    };
    let route_count = config.routes.len();

    let spindle = match Spindle::start(config, ProjectLayout::new(&project), options).await {
        Ok(spindle) => spindle,
        Err(e) => {
            error!("{e}");
            std::process::exit(1);
        }
    };

    let handle = Handle::new();
    let app = spindle.app().into_make_service_with_connect_info::<SocketAddr>();
    let secure = bind(&cli.hostname, cli.https_port, "route");

    let serving = match rustls {
        Some(rustls) => {
            let plain = bind(&cli.hostname, cli.http_port, "redirect");
            let redirect = redirect_router(cli.https_port);
            let redirect_handle = handle.clone();
            tokio::spawn(async move {
                if let Err(e) = axum_server::from_tcp(plain)
                    .handle(redirect_handle)
                    .serve(redirect.into_make_service())
                    .await
                {
                    error!("Redirect server failed: {e}");
                }
            });
            tokio::spawn(axum_server::from_tcp_rustls(secure, rustls).handle(handle.clone()).serve(app))
        }
        None => tokio::spawn(axum_server::from_tcp(secure).handle(handle.clone()).serve(app)),
    };

    let scheme = if tls.is_some() { "https" } else { "http" };
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║                           Spindle                            ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("  Project:    {project_name}");
    println!("  Routes:     {route_count}");
    println!("  Serving:    {scheme}://{}:{}", cli.hostname, cli.https_port);
    match &tls {
        Some((cert, _, fingerprint)) => {
            println!("  Redirect:   http://{}:{} → {scheme}", cli.hostname, cli.http_port);
            println!("  TLS:        enabled (cert: {})", cert.display());
            if !fingerprint.is_empty() {
                println!("              {fingerprint}");
            }
        }
        None => println!("  TLS:        disabled (--no-tls)"),
    }
    println!("  Workers:    registry {} · bridge {}", spindle.registry_addr(), spindle.rpc_addr());
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    let coordinator = spindle.coordinator().clone();
    tokio::spawn(async move { coordinator.start().await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        result = serving => {
            match result {
                Ok(Err(e)) => error!("Route server failed: {e}"),
                Err(e) => error!("Route server task failed: {e}"),
                Ok(Ok(())) => warn!("Route server exited"),
            }
        }
    }

    println!();
    println!("  Shutting down...");
    handle.graceful_shutdown(Some(Duration::from_secs(5)));
    spindle.shutdown().await;
    info!("Bye");
}
