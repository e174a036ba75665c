/// Entry point for the connection class monitor.
///
/// Samples the received bytes of one uid from the kernel's traffic accounting and logs the
/// resulting connection quality until interrupted.
///
/// # Errors
///
/// Returns an error if the configuration is invalid or sampling cannot be started.
///
/// # Examples
///
/// ```bash
/// RUST_LOG=info CONNCLASS_UID=10123 cargo run
/// ```
#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    connclass::run().await?;
    Ok(())
}
