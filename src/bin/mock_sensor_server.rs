use anyhow::Result;
use clap::Parser;
use sensor_edge_rs::mock_server::{MockSensorServer, MockServerConfig};

#[derive(Parser, Debug)]
#[command(name = "mock-sensor-server", about = "Standalone mock sensor server")]
struct Args {
    /// Address to bind to
    #[arg(long, default_value = "127.0.0.1:8888")]
    bind: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args = Args::parse();
    let server = MockSensorServer::start(MockServerConfig {
        bind_address: args.bind,
        readings: None,
    })
    .await?;

    println!("Mock sensor server ready at {}", server.url());
    println!("Press Ctrl+C to exit");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            println!();
        }
        _ = server.wait_for_shutdown() => {
            println!("Shutdown requested by a client");
        }
    }

    server.stop().await;
    Ok(())
}
