//! Watch - follow changes under a path while writing to it.
//!
//! # Running
//!
//! ```sh
//! DOOZER_URI='doozer:?ca=127.0.0.1:8046' cargo run --example watch
//! ```

use std::time::Duration;

use doozer_client::Client;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::builder().connect().await?;
    let start = client.rev().await? + 1;

    let writer = client.clone();
    tokio::spawn(async move {
        for i in 0..5 {
            if let Err(e) = writer.set("/watch-demo/counter", i.to_string(), -1).await {
                tracing::warn!("set failed: {}", e);
            }
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    });

    // Stops after three quiet request timeouts in a row.
    let mut watch = client.watch("/watch-demo/**", start).idle_limit(3);
    while let Some(change) = watch.next().await? {
        let kind = if change.is_del() { "del" } else { "set" };
        println!(
            "rev {}: {} {} = {}",
            change.rev(),
            kind,
            change.path(),
            change.value_str()
        );
    }

    println!("no more changes after rev {}", watch.rev() - 1);
    Ok(())
}
