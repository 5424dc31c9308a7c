//! Authorization code flow service over TCP.
//!
//! Issues codes through the stock handlers and redeems them for opaque
//! bearer tokens. Configuration is read from an optional JSON file;
//! command line flags override it.
//!
//! ```text
//! cargo run --example code_flow_server -- --port 9000 --concurrency 8
//! ```

use std::time::Duration;

use async_trait::async_trait;
use authcode_flow::{
    AccessRequest, Config, Error, ExchangeHandler, FlowBuilder, FlowCtx, GrantSession, Result,
    Server, TokenEndpointResponse,
};
use clap::Parser;
use tracing::{error, info, warn, Level};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const ACCESS_TOKEN_TTL_SECS: u64 = 3600;

#[derive(Parser, Debug)]
#[command(name = "code_flow_server", about = "OAuth2 authorization code flow service")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[arg(long)]
    host: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum grant requests in flight
    #[arg(long)]
    concurrency: Option<usize>,

    /// Tag issued codes with this service id
    #[arg(long)]
    service_id: Option<String>,

    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn load_config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };
        if let Some(host) = &self.host {
            config.service.host = host.clone();
        }
        if let Some(port) = self.port {
            config.service.port = port;
        }
        if let Some(concurrency) = self.concurrency {
            config.concurrency = concurrency;
        }
        if let Some(service_id) = &self.service_id {
            config.service_id = Some(service_id.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Mints random bearer tokens for redeemed codes.
struct BearerTokenHandler;

#[async_trait]
impl ExchangeHandler for BearerTokenHandler {
    async fn handle_access_request(
        &self,
        ctx: &FlowCtx,
        _request: &AccessRequest,
        session: &GrantSession,
        response: &mut TokenEndpointResponse,
    ) -> Result<()> {
        let Some(redeemed) = &session.redeemed else {
            return Err(Error::server("code session was not redeemed"));
        };
        response.access_token = Some(uuid::Uuid::new_v4().simple().to_string());
        response.token_type = Some("Bearer".to_string());
        response.expires_in = Some(ACCESS_TOKEN_TTL_SECS);
        info!(
            "Request {} issued access token to client {}",
            ctx.request_id(),
            redeemed.client_id
        );
        Ok(())
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(if args.verbose { Level::DEBUG } else { Level::INFO })
        .init();

    let config = args.load_config()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.concurrency)
        .enable_all()
        .build()?;

    runtime.block_on(serve(config))
}

async fn serve(config: Config) -> Result<()> {
    if let Some(address) = &config.session_store.address {
        warn!(
            "Session store address {} ignored, using the in-memory store",
            address
        );
    }

    let flow = FlowBuilder::standard(&config)
        .exchange_handler(BearerTokenHandler)
        .build();
    let server = Server::new(flow.clone())
        .serve_tcp(config.bind_addr())
        .await?;
    info!(
        "Serving on {:?} with {} workers",
        server.bound_addr,
        flow.concurrency()
    );

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    flow.shutdown();
    match tokio::time::timeout(SHUTDOWN_GRACE, server.stop()).await {
        Ok(result) => result,
        Err(_) => {
            error!("Server did not stop within {:?}", SHUTDOWN_GRACE);
            Ok(())
        }
    }
}
