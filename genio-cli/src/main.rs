use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use genio_engine::{
    Credential, CredentialCache, DispatchConfig, DispatchError, Dispatcher, GenerationRequest,
    HttpConfig, HttpSlotGate, HttpTransport, Provenance, ServerDirectory, ServiceKind,
    StatusCallback,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "genio", version, about = "Dispatch a generation job across the relay pool")]
struct Cli {
    /// Prompt text for the generation job
    prompt: String,

    /// Service to target
    #[arg(long, value_enum, default_value_t = ServiceKind::Image)]
    service: ServiceKind,

    /// Logical request path under the service root
    #[arg(long, default_value = "/generate")]
    path: String,

    /// Response field that carries the generation result
    #[arg(long, default_value = "images")]
    result_field: String,

    /// Credential cache file written by the session layer
    #[arg(long, default_value = "credentials.json")]
    cache: PathBuf,

    /// Explicit bearer token; disables credential rotation for this call
    #[arg(long)]
    token: Option<String>,

    /// With --token: probe exactly that token, without pool fallback
    #[arg(long, requires = "token")]
    probe: bool,

    /// Pin a relay for this service (e.g. relay-03)
    #[arg(long)]
    relay: Option<String>,

    /// Slot counting service endpoint
    #[arg(
        long,
        default_value = "https://slots.genio.app/rpc/request_generation_slot"
    )]
    slot_endpoint: String,

    /// Caller identity sent to the relay
    #[arg(long)]
    username: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<serde_json::Value, DispatchError> {
    let config = DispatchConfig::default();

    let source = Arc::new(CredentialCache::new(
        cli.cache,
        config.failover.eligible_pool_window,
    ));
    let directory = Arc::new(ServerDirectory::new());
    if let Some(relay) = &cli.relay {
        directory.prefer(cli.service, relay);
    }

    let transport = HttpTransport::new(&HttpConfig::default())?;
    let gate = Arc::new(HttpSlotGate::new(
        transport.client().clone(),
        &cli.slot_endpoint,
    )?);
    let dispatcher = Dispatcher::new(source, directory, Arc::new(transport), gate, config);

    let status: StatusCallback = Arc::new(|msg: &str| eprintln!("{msg}"));
    let mut request = GenerationRequest::new(
        cli.service,
        cli.path,
        serde_json::json!({ "prompt": cli.prompt }),
        cli.result_field,
    )
    .with_label("cli")
    .with_status(status);

    if let Some(username) = cli.username {
        request = request.with_username(username);
    }
    if let Some(token) = cli.token {
        request = request.with_credential(Credential::new(token, Provenance::Specific));
        if cli.probe {
            request = request.as_probe();
        }
    }

    let dispatched = dispatcher.dispatch(request).await?;
    Ok(dispatched.payload)
}

fn failure_exit_code(err: &DispatchError) -> ExitCode {
    match err {
        DispatchError::NoCredentials => ExitCode::from(2),
        DispatchError::Rejected { .. } => ExitCode::from(3),
        DispatchError::Exhausted { .. } => ExitCode::from(4),
        _ => ExitCode::FAILURE,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(payload) => {
            match serde_json::to_string_pretty(&payload) {
                Ok(rendered) => println!("{rendered}"),
                Err(_) => println!("{payload}"),
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("genio: {e}");
            failure_exit_code(&e)
        }
    }
}
