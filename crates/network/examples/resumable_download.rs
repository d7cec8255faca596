// crates/network/examples/resumable_download.rs
//! Resumable download demonstration
//!
//! ```text
//! RUST_LOG=steadyline_network=debug cargo run --example resumable_download -- <url> <output> [config]
//! ```
//!
//! Retry and timeout settings come from `[config]` (default `steadyline.toml`,
//! defaults when absent) with `STEADYLINE_*` overrides applied on top.
//! Severed connections are picked up again from the last byte written,
//! using a range request when the server allows it.

use steadyline_network::{parse_url, CancellationToken, Client};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let (Some(url), Some(output)) = (args.next(), args.next()) else {
        eprintln!("usage: resumable_download <url> <output> [config]");
        std::process::exit(2);
    };
    let config_path = args.next().unwrap_or_else(|| "steadyline.toml".to_string());

    let client = Client::from_path(&config_path)?;
    let cancel = CancellationToken::new();

    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    println!("Downloading {}", url);
    let mut reader = client.download(parse_url(&url)?, cancel).await?;
    let mut file = File::create(&output).await?;

    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n]).await?;
    }
    file.flush().await?;
    reader.close();

    println!("  ✓ {} bytes written to {}", reader.offset(), output);
    for (key, value) in client.counters().snapshot() {
        println!("    {} = {}", key, value);
    }

    client.shutdown();
    Ok(())
}
