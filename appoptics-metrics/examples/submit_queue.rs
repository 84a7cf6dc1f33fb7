//! Submits a few measurements through a queue.
//!
//! ```sh
//! APPOPTICS_API_KEY=... cargo run --example submit_queue
//! ```
//!
//! Without an API key the queue uses in-memory persistence and prints the
//! batch it would have sent.

use std::time::Duration;

use appoptics_metrics::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(LoggingConfig::development())?;

    let client = Client::from_env();
    if client.api_key().is_none() {
        client.set_persistence(Persistence::Test);
    }
    client.set_agent_identifier(&["submit-queue-example", env!("CARGO_PKG_VERSION"), "local"])?;

    let queue = client.new_queue(
        QueueOptions::new()
            .with_prefix("example")
            .with_source("localhost")
            .with_tag("env", "dev")
            .with_autosubmit_count(8),
    );

    for i in 0..10 {
        let submitted = queue
            .add_and_autosubmit([
                Measurement::counter("loop.iterations", 1.0),
                Measurement::gauge("loop.index", f64::from(i)),
            ])
            .await?;
        if submitted {
            println!("autosubmitted after iteration {i}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let batch = queue.queued()?;
    println!("{}", serde_json::to_string_pretty(&batch)?);

    queue.submit().await?;
    if let Some(persisted) = queue.persister().persisted() {
        println!("captured {} entries in memory", persisted.len());
    }
    Ok(())
}
