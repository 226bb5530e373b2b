//! Basic client - set, get, list and delete.
//!
//! This example demonstrates:
//! - Connecting with the builder (addresses from `DOOZER_URI` or localhost)
//! - Revision-checked writes and reading them back
//! - Paginated GETDIR/WALK listings
//!
//! # Running
//!
//! ```sh
//! DOOZER_URI='doozer:?ca=127.0.0.1:8046' RUST_LOG=doozer_client=debug \
//!     cargo run --example client
//! ```

use doozer_client::{Client, ErrorCode};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let client = Client::builder().connect().await?;
    println!(
        "connected to {}",
        client.connection().address().unwrap_or_default()
    );

    let rev = client.rev().await?;
    println!("tree is at rev {}", rev);

    // rev 0 only creates; on an existing file fall back to its current rev.
    let rev = match client.set("/demo/greeting", "hello", 0).await {
        Ok(rev) => rev,
        Err(e) if e.code() == Some(ErrorCode::RevMismatch) => {
            let current = client.get("/demo/greeting", None).await?;
            client.set("/demo/greeting", "hello", current.rev()).await?
        }
        Err(e) => return Err(e.into()),
    };
    client.set("/demo/colors/red", "#f00", -1).await?;
    client.set("/demo/colors/green", "#0f0", -1).await?;

    let greeting = client.get("/demo/greeting", None).await?;
    println!("/demo/greeting = {} (rev {})", greeting.value_str(), greeting.rev());

    for entry in client.getdir("/demo", 0, None).await? {
        println!("dir entry: {}", entry.path());
    }
    for file in client.walk("/demo/**", 0, None).await? {
        println!("file: {} = {}", file.path(), file.value_str());
    }

    let stat = client.stat("/demo/greeting", None).await?;
    println!("/demo/greeting is {} bytes", stat.len());

    client.delete("/demo/greeting", rev).await?;
    println!("deleted /demo/greeting");

    client.disconnect().await;
    Ok(())
}
