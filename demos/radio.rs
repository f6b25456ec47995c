//! Example: ask workers to pick the matching image
//!
//! ```bash
//! cargo run --features testing --example radio -- --mock
//! ```

use automan_client::testing::{over_budget, MockBackend, MockReply};
use automan_client::{Client, ClientConfig, RadioBuilder, RadioOption, ServerSupervisor, TaskKind};
use clap::Parser;
use std::collections::HashMap;
use std::sync::Arc;

const PHOTO_URL: &str = "https://docs.google.com/uc?id=1kpw8sjiZtJwRlVJ3_tYBo26ZcqAeVb5c";

const CHOICES: [(&str, &str, &str); 4] = [
    ("choice1", "a", "https://docs.google.com/uc?id=1Gdlsk24_dAP3YP6eT6Q9A_khVPsMpJzL"),
    ("choice2", "b", "https://docs.google.com/uc?id=1tN9E4wpacVpFmTaAkgoUeIyBZek5cBv7"),
    ("choice3", "c", "https://docs.google.com/uc?id=1nNZ3P8gYjYkH5ZlYVhK1u0bA4lq8QW2c"),
    ("choice4", "d", PHOTO_URL),
];

#[derive(Parser, Debug)]
#[command(about = "Pick the image that matches the photo")]
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

    /// Use the in-process mock backend
    #[arg(long)]
    mock: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    automan_client::logging::init_tracing("automan_client=info")?;
    let args = Args::parse();

    let task = RadioBuilder::new("Choose the matching image", 1.50)
        .title("Image match")
        .question_timeout_multiplier(5)
        .initial_worker_timeout_secs(60)
        .image_url(PHOTO_URL)
        .options(
            CHOICES
                .iter()
                .map(|(key, label, url)| (*key, RadioOption::with_image(*label, *url))),
        );

    let (client, _mock) = if args.mock {
        let mock = MockBackend::new(|_| MockReply::Respond(over_budget(TaskKind::Radio, 2.00, 1.50)));
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

    let handle = client.radio(task).await?;
    if handle.is_over_budget(None).await? {
        let outcome = handle.resolve(None).await?;
        println!("Outcome: Over Budget");
        println!(" need: {:.2} have: {:.2}", outcome.need(), outcome.have());
    } else {
        handle.print_outcome(None).await?;
    }

    client.close().await?;
    Ok(())
}
