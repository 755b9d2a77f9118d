use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use clap::error::ErrorKind;
use h2get::{Client, ConfigBuilder, FetchError, Output};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Fetch a single resource over HTTP/2 and TLS. The response body is written
/// to stdout; status lines and header dumps go to stderr.
#[derive(Parser, Debug)]
#[command(name = "h2get", version, about)]
struct Args {
    /// Absolute https URI of the resource.
    #[arg(value_name = "HTTPS_URI")]
    uri: String,

    /// Deadline for DNS resolution and each TCP connect attempt.
    #[arg(long, env = "H2GET_CONNECT_TIMEOUT_MS", default_value_t = 10_000)]
    connect_timeout_ms: u64,

    /// Maximum wait for socket activity once connected. 0 waits forever.
    #[arg(long, env = "H2GET_IO_TIMEOUT_MS", default_value_t = 30_000)]
    io_timeout_ms: u64,

    /// SETTINGS_MAX_CONCURRENT_STREAMS advertised to the server.
    #[arg(long, default_value_t = 100)]
    max_concurrent_streams: u32,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => return report(FetchError::Usage(err.render().to_string())),
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => report(err),
    }
}

fn run(args: Args) -> Result<(), FetchError> {
    let io_timeout = (args.io_timeout_ms > 0).then(|| Duration::from_millis(args.io_timeout_ms));
    let config = ConfigBuilder::new()
        .connect_timeout(Duration::from_millis(args.connect_timeout_ms))
        .io_timeout(io_timeout)
        .max_concurrent_streams(args.max_concurrent_streams)
        .build()?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(FetchError::ConnectFailure)?;

    let outcome = runtime.block_on(Client::new(config).fetch(&args.uri, Output::stdio()))?;
    tracing::debug!(?outcome, "fetch finished");
    Ok(())
}

/// Setup failures have not been reported yet; connection failures already
/// printed their status line.
fn report(err: FetchError) -> ExitCode {
    if err.is_setup_failure() {
        eprintln!("h2get: {err}");
    }
    ExitCode::from(err.exit_code())
}
