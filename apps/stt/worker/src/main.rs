//! Speech-to-Text Worker - Entry Point

use core_config::tracing::install_color_eyre;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    install_color_eyre();

    stt_worker::run().await
}
