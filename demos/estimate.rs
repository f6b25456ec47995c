//! Example: submit one estimate task and report its outcome
//!
//! Run against a local backend:
//!
//! ```bash
//! cargo run --features testing --example estimate -- --access-id ID --access-key KEY
//! ```
//!
//! Or fully offline against the in-process mock backend:
//!
//! ```bash
//! cargo run --features testing --example estimate -- --mock
//! ```

use automan_client::testing::{confident_estimate, MockBackend, MockReply};
use automan_client::{Client, ClientConfig, EstimateBuilder, ServerSupervisor};
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;

const PHOTO_URL: &str = "https://docs.google.com/uc?id=1kpw8sjiZtJwRlVJ3_tYBo26ZcqAeVb5c";

#[derive(Parser, Debug)]
#[command(about = "Count the cars in a parking lot photo")]
struct Args {
    /// Crowdsourcing access id
    #[arg(long, default_value = "access id here")]
    access_id: String,

    /// Crowdsourcing access key
    #[arg(long, default_value = "access key here")]
    access_key: String,

    /// Post to the sandbox instead of the live marketplace
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    sandbox: bool,

    /// Backend port
    #[arg(long, default_value_t = 50051)]
    port: u16,

    /// Backend output to suppress: all, stdout, file, none
    #[arg(long, default_value = "none")]
    suppress_output: String,

    /// Task budget
    #[arg(long, default_value_t = 1.50)]
    budget: f64,

    /// Use the in-process mock backend
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automan_client::logging::init_tracing("automan_client=info")?;
    let args = Args::parse();

    let task = EstimateBuilder::new("How many cars are in this parking lot?", args.budget)
        .title("Car Counting")
        .confidence(0.9)
        .question_timeout_multiplier(5)
        .initial_worker_timeout_secs(30)
        .image_url(PHOTO_URL);

    let (client, _mock) = if args.mock {
        let mock = MockBackend::new(|_| MockReply::Respond(confident_estimate(10.0, 14.0, 12.0, 0.92, 1.10)));
        let client = Client::from_parts(mock.connect(), Arc::new(ServerSupervisor::external(args.port)));
        (client, Some(mock))
    } else {
        let adapter = HashMap::from([
            ("access_id".to_string(), args.access_id),
            ("access_key".to_string(), args.access_key),
            ("sandbox_mode".to_string(), args.sandbox.to_string()),
            ("type".to_string(), "MTurk".to_string()),
        ]);
        let config = ClientConfig {
            port: args.port,
            suppress_output: args.suppress_output,
            log_level: "warn".parse()?,
            ..ClientConfig::default()
        };
        (Client::connect(adapter, config).await?, None)
    };

    // The question lives for question_timeout_multiplier * initial_worker_timeout_secs
    // seconds before the backend reposts it.
    let handle = client.estimate(task).await?;
    handle.print_outcome(None).await?;

    let outcome = handle.resolve(None).await?;
    println!("confidence: {:.2}, cost: {:.2}", outcome.confidence(), outcome.cost());

    client.close().await?;
    Ok(())
}
