//! jointd command client
//!
//! Sends one request to a running daemon over zenoh and prints the reply.
//!
//! ```text
//! jointd_command get encs
//! jointd_command set refs 0.5 0.0 -0.5
//! jointd_command '{"op":"get","target":"pid","axis":1,"pid_kind":"velocity"}'
//! ```

use clap::Parser;

#[cfg(feature = "zenoh-integration")]
use {
    anyhow::{anyhow, Result},
    jointd::{protocol::Reply, zenoh_transport::rpc_key},
    std::time::{Duration, Instant},
    tracing::{error, info},
    zenoh::query::QueryTarget,
};

#[derive(Parser)]
#[command(name = "jointd_command")]
#[command(about = "Send a request to a running jointd over zenoh")]
#[command(version)]
struct Args {
    /// Request words (`get enc 0`) or one JSON object
    #[arg(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    request: Vec<String>,

    /// Key prefix the daemon serves under
    #[arg(long, default_value = "jointd")]
    prefix: String,

    /// Maximum time to wait for the reply in seconds
    #[arg(long, default_value = "10")]
    rpc_timeout: u64,

    /// Zenoh endpoint override (optional)
    #[arg(long)]
    zenoh_endpoint: Option<String>,

    /// Print the raw reply JSON
    #[arg(long)]
    json: bool,

    /// Show timing information
    #[arg(long)]
    timing: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[cfg(feature = "zenoh-integration")]
#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(if args.verbose { "jointd=debug,info" } else { "warn" })
        .with_writer(std::io::stderr)
        .init();

    let mut config = zenoh::Config::default();
    if let Some(endpoint) = &args.zenoh_endpoint {
        let endpoint = endpoint
            .parse()
            .map_err(|e| anyhow!("Invalid endpoint format: {}", e))?;
        config
            .connect
            .endpoints
            .set(vec![endpoint])
            .map_err(|e| anyhow!("Failed to set endpoint: {:?}", e))?;
    }

    let session = zenoh::open(config)
        .await
        .map_err(|e| anyhow!("Failed to connect to Zenoh network: {}\nMake sure jointd is running", e))?;

    let line = args.request.join(" ");
    let key = rpc_key(&args.prefix);
    info!("Sending '{}' to {}", line, key);

    let start_time = Instant::now();
    let replies = session
        .get(key.as_str())
        .payload(line.clone())
        .target(QueryTarget::BestMatching)
        .timeout(Duration::from_secs(args.rpc_timeout))
        .await
        .map_err(|e| anyhow!("Failed to send query: {}", e))?;

    if let Ok(reply) = replies.recv_async().await {
        match reply.result() {
            Ok(sample) => {
                let bytes: Vec<u8> = sample.payload().to_bytes().into();
                let text = String::from_utf8_lossy(&bytes);
                let reply: Reply = serde_json::from_str(&text).map_err(|e| anyhow!("Invalid reply '{}': {}", text, e))?;

                if args.json {
                    println!("{}", text);
                } else {
                    print_reply(&reply);
                }
                if args.timing {
                    eprintln!("Round trip: {:?}", start_time.elapsed());
                }
                std::process::exit(if reply.is_ok() { 0 } else { 1 });
            }
            Err(e) => {
                error!("Query failed: {:?}", e);
                eprintln!("Query failed: {:?}", e);
                std::process::exit(3);
            }
        }
    }

    eprintln!("No reply from {} within {}s", key, args.rpc_timeout);
    std::process::exit(4);
}

#[cfg(feature = "zenoh-integration")]
fn print_reply(reply: &Reply) {
    match &reply.error {
        Some(error) => println!("failed ({:?}): {}", error.kind, error.message),
        None if reply.payload.is_empty() => println!("ok"),
        None => {
            let values: Vec<String> = reply.payload.iter().map(|v| v.to_string()).collect();
            println!("{}", values.join(" "));
        }
    }
}

#[cfg(not(feature = "zenoh-integration"))]
fn main() {
    let _ = Args::parse();
    eprintln!("jointd_command requires the zenoh-integration feature.");
    eprintln!("Run with: cargo run --bin jointd_command --features zenoh-integration -- get encs");
    std::process::exit(1);
}
