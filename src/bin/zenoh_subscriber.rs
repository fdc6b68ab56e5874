//! Zenoh telemetry subscriber
//!
//! Prints the joint state frames a running jointd publishes to `<prefix>/state`.

#[cfg(feature = "zenoh-integration")]
use {
    clap::Parser,
    jointd::{telemetry::JointState, zenoh_transport::state_key},
    tracing::{error, info, Level},
};

#[cfg(feature = "zenoh-integration")]
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Key prefix the daemon publishes under
    #[arg(long, default_value = "jointd")]
    prefix: String,

    /// Print every frame as raw JSON
    #[arg(long)]
    json: bool,
}

#[cfg(feature = "zenoh-integration")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt().with_max_level(Level::INFO).init();

    let session = zenoh::open(zenoh::Config::default())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to open Zenoh session: {}", e))?;

    let key = state_key(&args.prefix);
    let subscriber = session
        .declare_subscriber(key.as_str())
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create subscriber: {}", e))?;

    info!("Subscribed to {} (Ctrl+C to stop)", key);

    let mut last_sequence: Option<u64> = None;
    loop {
        match subscriber.recv_async().await {
            Ok(sample) => {
                let bytes = sample.payload().to_bytes();
                if args.json {
                    println!("{}", String::from_utf8_lossy(&bytes));
                    continue;
                }
                match serde_json::from_slice::<JointState>(&bytes) {
                    Ok(frame) => {
                        if let Some(last) = last_sequence {
                            if frame.sequence != last + 1 {
                                info!("Missed {} frames", frame.sequence.saturating_sub(last + 1));
                            }
                        }
                        last_sequence = Some(frame.sequence);
                        let position: Vec<String> = frame.position.iter().map(|p| format!("{:.3}", p)).collect();
                        info!("#{} t={:.3} position=[{}]", frame.sequence, frame.timestamp, position.join(", "));
                    }
                    Err(_) => info!("Received frame (raw): {} bytes", bytes.len()),
                }
            }
            Err(e) => {
                error!("Subscriber closed: {}", e);
                break;
            }
        }
    }
    Ok(())
}

#[cfg(not(feature = "zenoh-integration"))]
fn main() {
    eprintln!("This tool requires the zenoh-integration feature.");
    eprintln!("Run with: cargo run --bin zenoh_subscriber --features zenoh-integration");
    std::process::exit(1);
}
