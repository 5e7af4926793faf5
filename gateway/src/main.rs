use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use clap::{Parser, Subcommand};
use http::{
    Method,
    header::{CACHE_CONTROL, CONTENT_TYPE},
};
use tokio::net::TcpListener;
use tokio::sync::broadcast::error::RecvError;
use tower_governor::{
    GovernorLayer, governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;

use anyhow::{anyhow, bail};

use ptt_gateway::core::audio::wav::read_wav_mono;
use ptt_gateway::core::audio::{
    DevicePolicy, EnvironmentHints, PROTOCOL_OUTPUT_RATE, UserAgentPolicy, WavBackend,
};
use ptt_gateway::core::realtime::{
    ConnectionNegotiator, HttpTokenSource, LocalTokenSource, SessionContext, SessionEvent,
    TokenSource, VoiceClient, WsConnector,
};
use ptt_gateway::core::token::{
    CandidateContext, Credential, CredentialDiagnostics, TokenGrant, TokenMinter,
    build_candidates, merge_candidates, probe_header_strategies,
};
use ptt_gateway::{ServerConfig, routes, state::AppState};

/// Delay between opening the WAV capture and its first buffer, so that
/// push-to-talk is already active when audio starts flowing.
const TALK_LEAD_IN: Duration = Duration::from_millis(300);

/// Push-to-talk gateway - realtime token minting and voice client tools
#[derive(Parser, Debug)]
#[command(name = "ptt-gateway")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (YAML)
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Subcommand to run (defaults to `serve`)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the token minting server
    Serve,

    /// Inspect the configured credential offline; never prints the secret
    CheckKey,

    /// Try every connection candidate in order and report which one opens
    Probe {
        /// Also try credential and token in an Authorization header
        #[arg(long)]
        headers: bool,

        /// Per-candidate timeout in milliseconds
        #[arg(long, value_name = "MS")]
        timeout_ms: Option<u64>,
    },

    /// Speak one utterance from a WAV file and save the spoken reply
    Talk {
        /// WAV file to send as the user's utterance
        #[arg(short = 'i', long = "input", value_name = "FILE")]
        input: PathBuf,

        /// Where to write the assistant's audio
        #[arg(short = 'o', long = "output", value_name = "FILE")]
        output: PathBuf,

        /// Fetch tokens from this minting endpoint instead of signing locally
        #[arg(long, value_name = "URL")]
        token_endpoint: Option<String>,

        /// How long to wait for the response after committing
        #[arg(long, default_value_t = 30)]
        wait_seconds: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists (must be done before config loading)
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Must be installed before any TLS connection is attempted
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let cli = Cli::parse();

    let config = if let Some(config_path) = cli.config {
        println!("Loading configuration from {}", config_path.display());
        ServerConfig::from_file(&config_path).map_err(|e| anyhow!(e.to_string()))?
    } else {
        ServerConfig::from_env().map_err(|e| anyhow!(e.to_string()))?
    };

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::CheckKey => check_key(&config),
        Commands::Probe {
            headers,
            timeout_ms,
        } => probe(&config, headers, timeout_ms).await,
        Commands::Talk {
            input,
            output,
            token_endpoint,
            wait_seconds,
        } => talk(&config, input, output, token_endpoint, wait_seconds).await,
    }
}

// =============================================================================
// serve
// =============================================================================

async fn serve(config: ServerConfig) -> anyhow::Result<()> {
    let address = config.address();
    let tls_config = config.tls.clone();
    let rate_limit_rps = config.rate_limit_requests_per_second;
    let rate_limit_burst = config.rate_limit_burst_size;
    let cors_origins = config.cors_allowed_origins.clone();

    if config.api_key().trim().is_empty() {
        warn!("No realtime credential configured; /api/token will answer 400");
    }
    println!("Starting server on {address}");

    let app_state = AppState::new(config).await;

    let public_routes = Router::new().route(
        "/",
        axum::routing::get(ptt_gateway::handlers::api::health_check),
    );

    // Rate limiting is disabled when rate >= 100000 for load testing
    let governor_layer = if rate_limit_rps < 100000 {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(rate_limit_rps as u64)
            .burst_size(rate_limit_burst)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow!("Failed to build rate limiter config"))?;
        Some(GovernorLayer::new(governor_config))
    } else {
        println!("Rate limiting disabled (rate >= 100000/s)");
        None
    };

    let cors_layer = if let Some(ref origins) = cors_origins {
        if origins == "*" {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, CACHE_CONTROL])
                .allow_credentials(false)
        } else {
            let origins: Vec<_> = origins
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([Method::GET, Method::OPTIONS])
                .allow_headers([CONTENT_TYPE, CACHE_CONTROL])
                .allow_credentials(true)
        }
    } else {
        info!(
            "CORS not configured, defaulting to same-origin only. \
             Set CORS_ALLOWED_ORIGINS to enable cross-origin access."
        );
        CorsLayer::new()
            .allow_methods([Method::GET, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, CACHE_CONTROL])
            .allow_credentials(false)
    };

    let security_headers = tower::ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_CONTENT_TYPE_OPTIONS,
            http::HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            http::header::X_FRAME_OPTIONS,
            http::HeaderValue::from_static("DENY"),
        ));

    let app = public_routes
        .merge(routes::api::create_api_router())
        .with_state(app_state)
        .layer(cors_layer)
        .layer(tower::util::option_layer(governor_layer))
        .layer(security_headers);

    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    if let Some(tls) = tls_config {
        let rustls_config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
            .await
            .map_err(|e| {
                anyhow!(
                    "Failed to load TLS certificates from {} and {}: {}",
                    tls.cert_path.display(),
                    tls.key_path.display(),
                    e
                )
            })?;

        println!("Server listening on https://{} (TLS enabled)", socket_addr);

        axum_server::bind_rustls(socket_addr, rustls_config)
            .serve(app.into_make_service_with_connect_info::<SocketAddr>())
            .await
            .map_err(|e| anyhow!("TLS server error: {}", e))?;
    } else {
        println!("Server listening on http://{}", socket_addr);

        let listener = TcpListener::bind(&socket_addr).await?;
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;
    }

    Ok(())
}

// =============================================================================
// check-key
// =============================================================================

fn check_key(config: &ServerConfig) -> anyhow::Result<()> {
    let raw = config.api_key();
    let diag = CredentialDiagnostics::inspect(raw);
    println!("{}", serde_json::to_string_pretty(&diag)?);

    Credential::parse(raw)?;
    if diag.looks_abnormal() {
        bail!(
            "credential looks abnormal: ensure the full '{{id}}.{{secret}}' was copied, not a masked display"
        );
    }

    println!("credential looks well-formed");
    Ok(())
}

// =============================================================================
// probe
// =============================================================================

async fn probe(config: &ServerConfig, headers: bool, timeout_ms: Option<u64>) -> anyhow::Result<()> {
    let minter = TokenMinter::new(config.token_default_lifetime_seconds);
    let signed = minter.mint(config.api_key(), None)?;
    let grant = TokenGrant::new(
        signed,
        &config.negotiation.base_url,
        &config.negotiation.strategies,
    );

    let ctx = CandidateContext {
        base_url: &config.negotiation.base_url,
        token: &grant.token,
        credential: Some(config.api_key().trim()),
        model: &config.session.model,
    };
    let header_candidates = if headers {
        build_candidates(&ctx, &probe_header_strategies())
    } else {
        Vec::new()
    };
    let configured = grant.candidates(build_candidates(&ctx, &config.negotiation.strategies));
    let candidates = merge_candidates([header_candidates, configured]);

    let timeout = timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.negotiation.connect_timeout());
    println!(
        "Trying {} candidates ({} ms each)",
        candidates.len(),
        timeout.as_millis()
    );
    for (i, candidate) in candidates.iter().enumerate() {
        println!("  [{}] {}@{}", i + 1, candidate.label, candidate.host());
    }

    let negotiator = ConnectionNegotiator::new(Arc::new(WsConnector), timeout);
    match negotiator.connect(&candidates).await {
        Ok(mut negotiated) => {
            for attempt in &negotiated.failed {
                println!("FAIL {attempt}");
            }
            println!(
                "OPEN [{}] {}@{}",
                negotiated.index,
                negotiated.endpoint.label,
                negotiated.endpoint.host()
            );
            negotiated.transport.close().await;
            Ok(())
        }
        Err(e) => {
            for attempt in e.attempts() {
                println!("FAIL {attempt}");
            }
            bail!("no candidate opened: {e}")
        }
    }
}

// =============================================================================
// talk
// =============================================================================

async fn talk(
    config: &ServerConfig,
    input: PathBuf,
    output: PathBuf,
    token_endpoint: Option<String>,
    wait_seconds: u64,
) -> anyhow::Result<()> {
    let token_source: Arc<dyn TokenSource> = match token_endpoint {
        Some(endpoint) => Arc::new(HttpTokenSource::new(endpoint)?),
        None => Arc::new(LocalTokenSource::new(
            config.api_key(),
            TokenMinter::new(config.token_default_lifetime_seconds),
            config.negotiation.base_url.clone(),
            config.negotiation.strategies.clone(),
        )),
    };

    let (samples, rate) = read_wav_mono(&input)?;
    let speech = Duration::from_secs_f64(samples.len() as f64 / rate.max(1) as f64);
    drop(samples);

    let policy = UserAgentPolicy {
        forced: config.device_tier,
    };
    let ctx = SessionContext {
        settings: config.session.clone(),
        negotiation: config.negotiation.clone(),
        token_source,
        connector: Arc::new(WsConnector),
        backend: Arc::new(WavBackend {
            input,
            output: output.clone(),
            output_rate: PROTOCOL_OUTPUT_RATE,
            realtime: true,
            lead_in: TALK_LEAD_IN,
        }),
        profile: policy.profile(&EnvironmentHints::default()),
    };

    let mut client = VoiceClient::new(ctx);
    let mut events = client.subscribe();
    client.connect().await?;
    if let Some(endpoint) = client.active_endpoint() {
        println!("Connected via {}@{}", endpoint.label, endpoint.host());
    }

    if !client.start_capture() {
        client.shutdown().await;
        bail!("session is not ready for capture");
    }
    tokio::time::sleep(TALK_LEAD_IN + speech + Duration::from_millis(200)).await;
    client.stop_capture_and_respond();

    let deadline = tokio::time::sleep(Duration::from_secs(wait_seconds));
    tokio::pin!(deadline);
    let mut failure = None;
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!("No complete response after {} s", wait_seconds);
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::UserTranscript(text)) => println!("you: {text}"),
                Ok(SessionEvent::AssistantTranscript(text)) => println!("assistant: {text}"),
                Ok(SessionEvent::ResponseDone) => break,
                Ok(SessionEvent::Disconnected) => {
                    failure = Some("connection closed by server".to_string());
                    break;
                }
                Ok(SessionEvent::Error(message)) => {
                    failure = Some(message);
                    break;
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    }

    let diagnostic = client.last_error();
    client.shutdown().await;
    if let Some(message) = failure {
        bail!("{}", diagnostic.unwrap_or(message));
    }

    println!("Reply written to {}", output.display());
    Ok(())
}
