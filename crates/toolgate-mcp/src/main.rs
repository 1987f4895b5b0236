use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use env_flags::env_flags;
use once_cell::sync::OnceCell;
use rust_mcp_sdk::error::SdkResult;
use rust_mcp_sdk::mcp_server::{
    HyperServerOptions, ServerRuntime, hyper_server_core, server_runtime_core,
};
use rust_mcp_sdk::schema::{
    Implementation, InitializeResult, LATEST_PROTOCOL_VERSION, ServerCapabilities,
    ServerCapabilitiesPrompts, ServerCapabilitiesResources, ServerCapabilitiesTools,
};
use rust_mcp_sdk::{McpServer, StdioTransport, TransportOptions};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, Layer, prelude::*};

use toolgate_mcp::config::{HostCfg, UserConfig, expand_home, load_user_config};
use toolgate_mcp::handler::ToolgateHandler;
use toolgate_mcp::model::ModelManager;
use toolgate_mcp::server::{ServerConfig, ServerManager, ServerSettings};
use toolgate_mcp::store::JsonFileStore;

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

#[derive(Clone, Copy)]
enum LogStyle {
    Json,
    Compact,
    Pretty,
    Full,
}

fn toolgate_home() -> PathBuf {
    env_flags! {
        /// Toolgate home directory (absolute). Defaults to $HOME/.toolgate
        TOOLGATE_HOME: &str = "";
    }
    if !(*TOOLGATE_HOME).is_empty() {
        PathBuf::from((*TOOLGATE_HOME).to_string())
    } else if let Ok(home) = std::env::var("HOME") {
        PathBuf::from(home).join(".toolgate")
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(".toolgate")
    }
}

fn env_set(k: &str) -> bool {
    std::env::var_os(k).is_some()
}

fn fmt_layer<W>(writer: W, ansi: bool, style: LogStyle) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let base = tracing_subscriber::fmt::layer()
        .with_file(false)
        .with_line_number(false)
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);
    match style {
        LogStyle::Json => base.json().boxed(),
        LogStyle::Compact => base.compact().boxed(),
        LogStyle::Pretty => base.pretty().boxed(),
        LogStyle::Full => base.boxed(),
    }
}

fn init_tracing(home: &Path, user_cfg: Option<&UserConfig>) {
    env_flags! {
        /// Tracing filter, e.g. "info", "debug", or targets format.
        RUST_LOG: &str = "info";
        /// Preferred filter env (alias). If set, overrides RUST_LOG.
        TRACING_FILTER: &str = "";
        /// Pretty formatting for logs (ignored if TRACING_JSON=true).
        TRACING_PRETTY: bool = false;
        /// Compact single-line formatting for logs (ignored if TRACING_JSON=true)
        TRACING_COMPACT: bool = true;
        /// JSON formatting for logs
        TRACING_JSON: bool = false;
        /// If true, also log to file under <TOOLGATE_HOME>/logs or LOG_DIR
        LOG_TO_FILE: bool = true;
        /// Optional explicit log directory (absolute). Defaults to <TOOLGATE_HOME>/logs
        LOG_DIR: &str = "";
    }

    let mut rust_log = if !(*TRACING_FILTER).is_empty() {
        (*TRACING_FILTER).to_string()
    } else {
        (*RUST_LOG).to_string()
    };
    let mut tracing_json = *TRACING_JSON;
    let mut tracing_compact = *TRACING_COMPACT;
    let mut tracing_pretty = *TRACING_PRETTY;
    let mut log_to_file = *LOG_TO_FILE;
    let mut log_dir: Option<PathBuf> = if !(*LOG_DIR).is_empty() {
        Some(PathBuf::from((*LOG_DIR).to_string()))
    } else {
        None
    };

    if let Some(cfg) = user_cfg.and_then(|c| c.logging.as_ref()) {
        if !(env_set("TRACING_FILTER") || env_set("RUST_LOG"))
            && let Some(level) = cfg.level.as_ref()
        {
            rust_log = level.clone();
        }
        if !env_set("TRACING_JSON")
            && let Some(v) = cfg.json
        {
            tracing_json = v;
        }
        if !env_set("TRACING_COMPACT")
            && let Some(v) = cfg.compact
        {
            tracing_compact = v;
        }
        if !env_set("TRACING_PRETTY")
            && let Some(v) = cfg.pretty
        {
            tracing_pretty = v;
        }
        if !env_set("LOG_TO_FILE")
            && let Some(v) = cfg.to_file
        {
            log_to_file = v;
        }
        if !env_set("LOG_DIR")
            && let Some(dir) = cfg.dir.as_ref()
        {
            log_dir = Some(expand_home(dir));
        }
    }

    let style = if tracing_json {
        LogStyle::Json
    } else if tracing_compact {
        LogStyle::Compact
    } else if tracing_pretty {
        LogStyle::Pretty
    } else {
        LogStyle::Full
    };
    let filter = EnvFilter::try_new(rust_log).unwrap_or_else(|_| EnvFilter::new("info"));

    // stdout carries the stdio JSON-RPC stream.
    let mut layers: Vec<BoxedLayer> = vec![fmt_layer(std::io::stderr, true, style)];
    static FILE_GUARD: OnceCell<tracing_appender::non_blocking::WorkerGuard> = OnceCell::new();
    let mut dir_error = None;
    if log_to_file {
        let dir = log_dir.unwrap_or_else(|| home.join("logs"));
        match std::fs::create_dir_all(&dir) {
            Ok(()) => {
                let appender = tracing_appender::rolling::daily(&dir, "toolgate-mcp.log");
                let (nb, guard) = tracing_appender::non_blocking(appender);
                let _ = FILE_GUARD.set(guard);
                layers.push(fmt_layer(nb, false, style));
            }
            Err(e) => dir_error = Some((dir, e)),
        }
    }

    if let Err(e) = tracing_subscriber::registry().with(layers).with(filter).try_init() {
        tracing::debug!("tracing already set: {:?}", e);
    }
    if let Some((dir, e)) = dir_error {
        tracing::warn!("failed to create log dir {}: {}", dir.display(), e);
    }
}

/// Everything `main` needs after startup.
struct Host {
    models: Arc<ModelManager>,
    servers: Arc<ServerManager>,
    active: String,
}

struct HostOptions {
    server_id: String,
    settings: ServerSettings,
    seed_default_models: bool,
    deepseek_api_key: String,
    qwen_api_key: String,
}

fn build_host(home: &Path, opts: HostOptions) -> anyhow::Result<Host> {
    std::fs::create_dir_all(home)?;
    let model_store = JsonFileStore::open(home.join("model-configs.json"), &[("models", json!({}))])?;
    let server_store = JsonFileStore::open(home.join("mcp-servers.json"), &[("servers", json!({}))])?;

    let models = Arc::new(ModelManager::new(Arc::new(model_store)));
    if opts.seed_default_models && models.models()?.is_empty() {
        models.add_default_models(&opts.deepseek_api_key, &opts.qwen_api_key)?;
        tracing::info!("seeded default models");
    }

    let servers = Arc::new(ServerManager::new(Arc::new(server_store), opts.settings)?);
    if servers.get_server(&opts.server_id).is_none() {
        servers.create_server(ServerConfig {
            id: opts.server_id.clone(),
            name: "Toolgate".to_string(),
            description: Some("Default tool server".to_string()),
            model: None,
        })?;
    }
    Ok(Host {
        models,
        servers,
        active: opts.server_id,
    })
}

/// Log every step the served server issues, following the server across
/// updates that replace its instance.
fn spawn_step_logger(servers: Arc<ServerManager>, server_id: String) {
    tokio::spawn(async move {
        loop {
            let Some(server) = servers.get_server(&server_id) else {
                tokio::time::sleep(Duration::from_secs(1)).await;
                continue;
            };
            let mut rx = server.subscribe();
            drop(server);
            loop {
                match rx.recv().await {
                    Ok(step) => tracing::info!(
                        server_id = %server_id,
                        step_id = %step.id,
                        tool = %step.tool,
                        params = %step.params,
                        "execution step awaiting confirmation"
                    ),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!(server_id = %server_id, skipped = n, "step logger lagged")
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    });
}

fn spawn_reaper(servers: Arc<ServerManager>, ttl: Duration) {
    let period = (ttl / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(period);
        loop {
            tick.tick().await;
            let dropped = servers.purge_expired_steps();
            if dropped > 0 {
                tracing::debug!(dropped, "reaper purged steps");
            }
        }
    });
}

#[tokio::main]
async fn main() -> SdkResult<()> {
    let home = toolgate_home();
    let user_cfg = match load_user_config(&home) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("ignoring unreadable {}: {e:#}", home.join("config.toml").display());
            None
        }
    };
    init_tracing(&home, user_cfg.as_ref());

    env_flags! {
        /// Transport: "stdio" (default) or "http"
        TRANSPORT: &str = "stdio";
        /// Host for HTTP transport
        HOST: &str = "127.0.0.1";
        /// Port for HTTP transport
        PORT: u16 = 8081;
        /// Ping interval for HTTP SSE
        PING_SECS: u64 = 5;
        /// Enable JSON response mode for HTTP
        HTTP_JSON: bool = false;
        /// Server answering requests that do not name one; created if missing.
        SERVER_ID: &str = "default";
        /// Unconfirmed steps expire after this many seconds (0 keeps them forever)
        STEP_TTL_SECS: u64 = 600;
        /// Simulated latency of the weather lookup
        WEATHER_LATENCY_MS: u64 = 500;
        /// Seed the stock model set when the model store is empty
        SEED_DEFAULT_MODELS: bool = true;
        DEEPSEEK_API_KEY: &str = "";
        QWEN_API_KEY: &str = "";
    }

    let host_cfg = user_cfg.as_ref().and_then(|c| c.host.as_ref());
    let pick_str = |key: &str, env: &str, cfg: fn(&HostCfg) -> Option<&String>| -> String {
        if env_set(key) {
            return env.to_string();
        }
        host_cfg
            .and_then(cfg)
            .cloned()
            .unwrap_or_else(|| env.to_string())
    };
    let transport = pick_str("TRANSPORT", *TRANSPORT, |h| h.transport.as_ref());
    let bind_host = pick_str("HOST", *HOST, |h| h.host.as_ref());
    let server_id = pick_str("SERVER_ID", *SERVER_ID, |h| h.server_id.as_ref());
    let deepseek_api_key = pick_str("DEEPSEEK_API_KEY", *DEEPSEEK_API_KEY, |h| h.deepseek_api_key.as_ref());
    let qwen_api_key = pick_str("QWEN_API_KEY", *QWEN_API_KEY, |h| h.qwen_api_key.as_ref());
    let port = if env_set("PORT") {
        *PORT
    } else {
        host_cfg.and_then(|h| h.port).unwrap_or(*PORT)
    };
    let ping_secs = if env_set("PING_SECS") {
        *PING_SECS
    } else {
        host_cfg.and_then(|h| h.ping_secs).unwrap_or(*PING_SECS)
    };
    let http_json = if env_set("HTTP_JSON") {
        *HTTP_JSON
    } else {
        host_cfg.and_then(|h| h.http_json).unwrap_or(*HTTP_JSON)
    };
    let step_ttl_secs = if env_set("STEP_TTL_SECS") {
        *STEP_TTL_SECS
    } else {
        host_cfg.and_then(|h| h.step_ttl_secs).unwrap_or(*STEP_TTL_SECS)
    };
    let weather_latency_ms = if env_set("WEATHER_LATENCY_MS") {
        *WEATHER_LATENCY_MS
    } else {
        host_cfg
            .and_then(|h| h.weather_latency_ms)
            .unwrap_or(*WEATHER_LATENCY_MS)
    };
    let seed_default_models = if env_set("SEED_DEFAULT_MODELS") {
        *SEED_DEFAULT_MODELS
    } else {
        host_cfg
            .and_then(|h| h.seed_default_models)
            .unwrap_or(*SEED_DEFAULT_MODELS)
    };

    tracing::info!("starting toolgate-mcp (transport={})", transport);
    tracing::info!("toolgate_home={}", home.display());

    let step_ttl = (step_ttl_secs > 0).then(|| Duration::from_secs(step_ttl_secs));
    let opts = HostOptions {
        server_id,
        settings: ServerSettings {
            step_ttl,
            weather_latency: Duration::from_millis(weather_latency_ms),
        },
        seed_default_models,
        deepseek_api_key,
        qwen_api_key,
    };
    let host = match build_host(&home, opts) {
        Ok(h) => h,
        Err(e) => {
            tracing::error!("startup failed: {:#}", e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        server_id = %host.active,
        servers = host.servers.servers().len(),
        "serving"
    );

    spawn_step_logger(host.servers.clone(), host.active.clone());
    if let Some(ttl) = step_ttl {
        spawn_reaper(host.servers.clone(), ttl);
    }

    let server_details = InitializeResult {
        server_info: Implementation {
            name: "toolgate-mcp".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            title: Some("Toolgate MCP Server".to_string()),
        },
        capabilities: ServerCapabilities {
            tools: Some(ServerCapabilitiesTools { list_changed: None }),
            resources: Some(ServerCapabilitiesResources {
                list_changed: None,
                subscribe: None,
            }),
            prompts: Some(ServerCapabilitiesPrompts { list_changed: None }),
            ..Default::default()
        },
        meta: None,
        instructions: Some(
            "Tools that require confirmation return a pending step; the host approves or \
             rejects it with the execution/confirm request."
                .to_string(),
        ),
        protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
    };

    let handler = ToolgateHandler::new(host.models, host.servers, host.active);

    if transport == "stdio" {
        let transport = StdioTransport::new(TransportOptions::default())?;
        let server: ServerRuntime =
            server_runtime_core::create_server(server_details, transport, handler);
        tracing::info!("starting stdio server");
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("server runtime error: {}", msg);
        }
    } else {
        let ping = Duration::from_secs(ping_secs);
        let server = hyper_server_core::create_server(
            server_details,
            handler,
            HyperServerOptions {
                host: bind_host.clone(),
                port,
                ping_interval: ping,
                enable_json_response: Some(http_json),
                ..Default::default()
            },
        );
        tracing::info!(
            "http server configured; starting listener on {}:{} (json={}, ping_secs={})",
            bind_host,
            port,
            http_json,
            ping_secs
        );
        if let Err(e) = server.start().await {
            let msg = match e.rpc_error_message() {
                Some(m) => m.to_string(),
                None => e.to_string(),
            };
            tracing::error!("hyper server error: {}", msg);
        }
    }
    tracing::info!("server stopped");
    Ok(())
}
