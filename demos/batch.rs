//! Example: count cars in several photos and report as each finishes
//!
//! ```bash
//! cargo run --features testing --example batch -- --mock
//! ```

use automan_client::testing::{confident_estimate, low_confidence_estimate, MockBackend, MockReply};
use automan_client::{Client, ClientConfig, EstimateBuilder, ServerSupervisor};
use clap::Parser;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const IMAGES: [&str; 3] = [
    "https://docs.google.com/uc?id=1kpw8sjiZtJwRlVJ3_tYBo26ZcqAeVb5c",
    "https://docs.google.com/uc?id=1Gdlsk24_dAP3YP6eT6Q9A_khVPsMpJzL",
    "https://docs.google.com/uc?id=1tN9E4wpacVpFmTaAkgoUeIyBZek5cBv7",
];

#[derive(Parser, Debug)]
#[command(about = "Count vehicles in several parking lot photos")]
struct Args {
    /// Crowdsourcing access id
    #[arg(long, default_value = "access id here")]
    access_id: String,

    /// Crowdsourcing access key
    #[arg(long, default_value = "access key here")]
    access_key: String,

    /// Backend port
    #[arg(long, default_value_t = 50051)]
    port: u16,

    /// Scan for finished tasks every interval instead of waiting on all at once
    #[arg(long)]
    polling: bool,

    /// Use the in-process mock backend
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automan_client::logging::init_tracing("automan_client=info")?;
    let args = Args::parse();

    let (client, _mock) = if args.mock {
        // Later submissions finish first.
        let submitted = AtomicUsize::new(0);
        let mock = MockBackend::new(move |_| {
            let n = submitted.fetch_add(1, Ordering::SeqCst);
            let delay = Duration::from_millis(300 * IMAGES.len().saturating_sub(n) as u64);
            let response = if n % 2 == 0 {
                confident_estimate(10.0 + n as f64, 14.0 + n as f64, 12.0 + n as f64, 0.92, 1.10)
            } else {
                low_confidence_estimate(8.0, 20.0, 13.0, 0.81, 1.50)
            };
            MockReply::Delayed(delay, response)
        });
        let client = Client::from_parts(mock.connect(), Arc::new(ServerSupervisor::external(args.port)));
        (client, Some(mock))
    } else {
        let adapter = HashMap::from([
            ("access_id".to_string(), args.access_id),
            ("access_key".to_string(), args.access_key),
            ("sandbox_mode".to_string(), "true".to_string()),
            ("type".to_string(), "MTurk".to_string()),
        ]);
        let config = ClientConfig {
            port: args.port,
            suppress_output: "none".to_string(),
            ..ClientConfig::default()
        };
        (Client::connect(adapter, config).await?, None)
    };

    let template = EstimateBuilder::new("Count the number of vehicles in this parking lot", 1.50)
        .title("Car Counting")
        .confidence(0.9)
        .question_timeout_multiplier(10);
    let batch = client.estimate_batch(template, IMAGES).await?;

    if args.polling {
        let mut completed = batch.as_completed_polling(client.poll_interval());
        while let Some(handle) = completed.next().await {
            handle.print_outcome(None).await?;
        }
    } else {
        let mut reports = batch.for_each_completed(|handle| handle.request_id());
        while let Some(request_id) = reports.next().await {
            println!("request {request_id} finished");
        }
    }

    batch.wait_all_done().await?;
    for (index, handle) in batch.iter().enumerate() {
        println!("--- image {index} ---");
        handle.print_outcome(None).await?;
    }

    client.close().await?;
    Ok(())
}
