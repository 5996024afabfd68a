//! MJPEG relay example
//!
//! Run with: cargo run --example relay_server [--bind ADDR] CAMERA_URL...
//!
//! Examples:
//!   cargo run --example relay_server https://192.168.1.20
//!   cargo run --example relay_server --bind 127.0.0.1:9000 https://192.168.1.20 https://192.168.1.21
//!
//! For camera number `i` (in argument order) two streams are served:
//!
//!   http://<bind>/stream/<i>/live          raw camera image
//!   http://<bind>/stream/<i>/live_overlay  camera image with the camera's own overlay
//!
//! Open either in a browser, or:
//!   ffplay http://localhost:8080/stream/0/live

use std::net::SocketAddr;

use mjpeg_relay::broadcast::{BroadcastConfig, FrameBroadcaster, TransformChain};
use mjpeg_relay::media::{blank_jpeg, Frame};
use mjpeg_relay::server::{RelayServer, ServerConfig};
use mjpeg_relay::source::{
    feed_url, CameraTopic, HttpUpstream, SourceConfig, SourceHandle, StreamSource,
};

fn print_usage() {
    eprintln!("Usage: relay_server [--bind ADDR] CAMERA_URL...");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  --bind ADDR    Address to bind to (default: 0.0.0.0:8080)");
    eprintln!("  CAMERA_URL     Base URL of a camera, e.g. https://192.168.1.20");
}

struct Args {
    bind_addr: SocketAddr,
    cameras: Vec<String>,
}

fn parse_args() -> Result<Args, String> {
    let mut args = std::env::args().skip(1);
    let mut bind_addr = ServerConfig::default().bind_addr;
    let mut cameras = Vec::new();

    while let Some(arg) = args.next() {
        if arg == "--bind" {
            let value = args.next().ok_or("--bind needs an address")?;
            bind_addr = value
                .replace("localhost", "127.0.0.1")
                .parse()
                .map_err(|e| format!("Invalid bind address '{}': {}", value, e))?;
        } else {
            cameras.push(arg);
        }
    }

    if cameras.is_empty() {
        return Err("at least one camera URL is required".into());
    }

    Ok(Args { bind_addr, cameras })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if std::env::args().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("mjpeg_relay=info".parse()?)
                .add_directive("relay_server=debug".parse()?),
        )
        .init();

    let source_config = SourceConfig::default();
    let placeholder = Frame::decode(blank_jpeg(source_config.width, source_config.height))?;

    let mut server = RelayServer::new(ServerConfig::default().bind(args.bind_addr));
    let mut sources: Vec<SourceHandle> = Vec::new();

    for (i, base) in args.cameras.iter().enumerate() {
        let routes = [
            (CameraTopic::Display, "live"),
            (CameraTopic::Overlay, "live_overlay"),
        ];
        for (topic, suffix) in routes {
            let url = feed_url(base, topic, &source_config)?;
            let mut source = StreamSource::new(source_config.clone(), HttpUpstream::new(url)?)?;

            let chain = TransformChain::new(source.subscribe(), placeholder.clone());
            let key = format!("{}/{}", i, suffix);
            let broadcaster = FrameBroadcaster::new(key.clone(), chain, BroadcastConfig::default());
            server.add_broadcaster(broadcaster.start())?;

            sources.push(source.start());
            println!("Output stream available: http://{}/stream/{}", args.bind_addr, key);
        }
    }

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
            println!("\nShutting down...");
        })
        .await?;

    for source in &sources {
        source.stop();
    }
    for source in sources {
        source.join().await;
    }

    Ok(())
}
