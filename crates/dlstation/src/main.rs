use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dlstation_server::{
    store::{CatalogStats, FileRecord},
    ServerConfig, StorageKind,
};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

// ── CLI definition ─────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "dlstation", about = "Download Station: a small file-download catalog", version)]
struct Cli {
    /// Server URL (default: http://localhost:3000 or $DLS_SERVER)
    #[arg(long, env = "DLS_SERVER", default_value = "http://localhost:3000")]
    server: String,

    /// Admin session token from `dlstation login` ($DLS_TOKEN)
    #[arg(long, env = "DLS_TOKEN")]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve {
        /// Port to listen on (default: $DLS_PORT or 3000)
        #[arg(long, env = "DLS_PORT", default_value = "3000")]
        port: u16,
        /// Host to bind (default: $DLS_HOST or 0.0.0.0)
        #[arg(long, env = "DLS_HOST", default_value = "0.0.0.0")]
        host: String,
        /// Storage backend: redb or memory (default: $DLS_STORAGE or redb)
        #[arg(long, env = "DLS_STORAGE", default_value = "redb")]
        storage: StorageKind,
    },
    /// Create tables and seed the admin password and sample files, without starting the server
    Init {
        /// Skip inserting the sample catalog
        #[arg(long)]
        no_samples: bool,
    },
    /// Log in as admin and print a session token
    Login {
        /// Admin password
        #[arg(long, env = "DLS_PASSWORD")]
        password: String,
    },
    /// List catalog entries
    List {
        /// Search name and description
        #[arg(long)]
        q: Option<String>,
        /// Only show this category
        #[arg(long)]
        category: Option<String>,
    },
    /// Add a file to the catalog
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        url: String,
        #[arg(long)]
        category: Option<String>,
        /// Size in bytes
        #[arg(long)]
        size: Option<i64>,
        /// File type, e.g. pdf or zip
        #[arg(long = "type")]
        file_type: Option<String>,
        #[arg(long)]
        description: Option<String>,
    },
    /// Remove a file from the catalog
    Rm {
        id: u64,
    },
    /// Count a download and print the file URL
    Download {
        id: u64,
    },
    /// Change the admin password (ends every session)
    Passwd {
        #[arg(long)]
        current: String,
        #[arg(long)]
        new: String,
    },
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("DLS_LOG_LEVEL")
                .unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    match cli.command {
        Commands::Serve {
            port,
            host,
            storage,
        } => cmd_serve(host, port, storage).await,

        Commands::Init { no_samples } => cmd_init(no_samples),

        Commands::Login { password } => cmd_login(&cli.server, &password).await,

        Commands::List { q, category } => {
            cmd_list(&cli.server, q.as_deref(), category.as_deref()).await
        }

        Commands::Add {
            name,
            url,
            category,
            size,
            file_type,
            description,
        } => {
            let token = require_token(&cli.token)?;
            let body = json!({
                "name": name,
                "url": url,
                "category": category,
                "size": size,
                "type": file_type,
                "description": description,
            });
            cmd_add(&cli.server, &token, &body).await
        }

        Commands::Rm { id } => {
            let token = require_token(&cli.token)?;
            cmd_rm(&cli.server, &token, id).await
        }

        Commands::Download { id } => cmd_download(&cli.server, id).await,

        Commands::Passwd { current, new } => {
            let token = require_token(&cli.token)?;
            cmd_passwd(&cli.server, &token, &current, &new).await
        }
    }
}

// ── Command implementations ───────────────────────────────────────────────────

async fn cmd_serve(host: String, port: u16, storage: StorageKind) -> Result<()> {
    let cfg = ServerConfig {
        host,
        port,
        storage,
        ..Default::default()
    };
    dlstation_server::run(cfg).await
}

fn cmd_init(no_samples: bool) -> Result<()> {
    let mut cfg = ServerConfig::default();
    if cfg.storage == StorageKind::Memory {
        anyhow::bail!("init only makes sense for persistent storage (unset DLS_STORAGE=memory)");
    }
    if no_samples {
        cfg.seed_samples = false;
    }
    let store = dlstation_server::open_store(&cfg)?;
    let report = store.initialize(&cfg.init_options())?;
    if report.admin_seeded {
        println!("✓ admin password set to the default");
    }
    println!("✓ initialized ({} sample file(s) added)", report.files_seeded);
    Ok(())
}

async fn cmd_login(server: &str, password: &str) -> Result<()> {
    let resp = Client::new()
        .post(url(server, "/api/login"))
        .json(&json!({"username": "admin", "password": password}))
        .send()
        .await
        .context("HTTP request failed")?;
    let json = expect_success(resp).await?;
    let token = json["sessionId"].as_str().context("response has no sessionId")?;
    println!("{token}");
    Ok(())
}

async fn cmd_list(server: &str, q: Option<&str>, category: Option<&str>) -> Result<()> {
    let mut query = Vec::new();
    if let Some(q) = q {
        query.push(("q", q));
    }
    if let Some(c) = category {
        query.push(("category", c));
    }

    let resp = Client::new()
        .get(url(server, "/api/files"))
        .query(&query)
        .send()
        .await
        .context("HTTP request failed")?;
    if !resp.status().is_success() {
        let status = resp.status();
        anyhow::bail!("server returned {status}");
    }
    let files: Vec<FileRecord> = resp.json().await.context("parse file list")?;

    if files.is_empty() {
        println!("(no files)");
        return Ok(());
    }
    for f in &files {
        println!(
            "  #{:<4} {} [{}] {}, {} download(s)",
            f.id,
            f.name,
            f.category,
            format_size(f.size),
            f.downloads
        );
    }

    let resp = Client::new()
        .get(url(server, "/api/stats"))
        .send()
        .await
        .context("HTTP request failed")?;
    let stats: CatalogStats = resp.json().await.context("parse stats")?;
    println!(
        "{} shown; catalog has {} file(s) in {} categor(ies), {} download(s) total",
        files.len(),
        stats.files,
        stats.categories,
        stats.downloads
    );
    Ok(())
}

async fn cmd_add(server: &str, token: &str, body: &Value) -> Result<()> {
    let resp = authed(Client::new().post(url(server, "/api/files")), token)
        .json(body)
        .send()
        .await
        .context("HTTP request failed")?;
    let json = expect_success(resp).await?;
    match json["file"]["id"].as_u64() {
        Some(id) => println!("✓ added #{id}"),
        None => println!("✓ added"),
    }
    Ok(())
}

async fn cmd_rm(server: &str, token: &str, id: u64) -> Result<()> {
    let resp = authed(
        Client::new().delete(url(server, &format!("/api/files/{id}"))),
        token,
    )
    .send()
    .await
    .context("HTTP request failed")?;
    expect_success(resp).await?;
    println!("✓ removed #{id}");
    Ok(())
}

async fn cmd_download(server: &str, id: u64) -> Result<()> {
    let client = Client::new();
    let resp = client
        .get(url(server, &format!("/api/files/{id}")))
        .send()
        .await
        .context("HTTP request failed")?;
    let file = expect_success(resp).await?;
    let link = file["url"].as_str().context("file has no url")?.to_owned();

    let resp = client
        .post(url(server, &format!("/api/files/{id}/download")))
        .send()
        .await
        .context("HTTP request failed")?;
    expect_success(resp).await?;

    println!("{link}");
    Ok(())
}

async fn cmd_passwd(server: &str, token: &str, current: &str, new: &str) -> Result<()> {
    let resp = authed(Client::new().post(url(server, "/api/change-password")), token)
        .json(&json!({"currentPassword": current, "newPassword": new}))
        .send()
        .await
        .context("HTTP request failed")?;
    expect_success(resp).await?;
    println!("✓ password changed; log in again to get a new token");
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn require_token(token: &Option<String>) -> Result<String> {
    token
        .clone()
        .context("--token / DLS_TOKEN is required for this command (see `dlstation login`)")
}

fn url(server: &str, path: &str) -> String {
    format!("{}{}", server.trim_end_matches('/'), path)
}

fn authed(builder: RequestBuilder, token: &str) -> RequestBuilder {
    builder.header("X-Session-ID", token)
}

/// Parse the JSON body, turning non-2xx responses into an error carrying the server's message.
async fn expect_success(resp: Response) -> Result<Value> {
    let status = resp.status();
    let json: Value = resp.json().await.unwrap_or_default();
    if !status.is_success() {
        let message = json["message"]
            .as_str()
            .or_else(|| json["error"].as_str())
            .unwrap_or("");
        anyhow::bail!("server returned {status}: {message}");
    }
    Ok(json)
}

fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
