use clap::Parser;
use client::config::ClientConfig;
use client::input::InputManager;
use client::network::{Client, ClientStatus};
use client::rendering::Renderer;
use log::{error, info};
use macroquad::prelude::*;
use shared::DEFAULT_PORT;
use std::net::SocketAddr;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value_t = SocketAddr::from(([127, 0, 0, 1], DEFAULT_PORT)))]
    server: SocketAddr,

    /// Name shown to other players
    #[arg(short, long, default_value = "player")]
    username: String,

    /// Share of the prediction error corrected when a snapshot arrives
    #[arg(long, default_value_t = 0.2)]
    lerp_factor: f32,

    /// How far behind the server remote players are drawn
    #[arg(long)]
    interpolation_delay_ms: Option<u64>,
}

impl From<Args> for ClientConfig {
    fn from(args: Args) -> Self {
        let defaults = ClientConfig::default();
        ClientConfig {
            server: args.server,
            username: args.username,
            lerp_factor: args.lerp_factor.clamp(0.0, 1.0),
            interpolation_delay: args
                .interpolation_delay_ms
                .map_or(defaults.interpolation_delay, |ms| ms as f64 / 1000.0),
            ..defaults
        }
    }
}

fn window_conf() -> Conf {
    Conf {
        window_title: "Arena".to_owned(),
        window_width: 800,
        window_height: 800,
        ..Default::default()
    }
}

#[macroquad::main(window_conf)]
async fn main() {
    env_logger::init();

    if std::env::var("RUST_LOG").is_err() {
        eprintln!("Set RUST_LOG=info for detailed logging");
    }

    let config = ClientConfig::from(Args::parse());
    info!("Connecting to {} as {}", config.server, config.username);

    let mut client = match Client::new(config) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to start client: {}", e);
            return;
        }
    };
    let mut input = InputManager::new();
    let mut renderer = Renderer::new();

    loop {
        if is_key_pressed(KeyCode::Escape) {
            break;
        }
        if is_key_pressed(KeyCode::R)
            && matches!(
                client.status(),
                ClientStatus::Rejected { .. } | ClientStatus::Ended { .. }
            )
        {
            client.search_again();
        }

        let frame = input.update();
        client.frame(&frame);
        renderer.render(&client);

        next_frame().await;
    }

    let stats = client.shutdown();
    info!(
        "Sent {} and received {} datagrams ({} dropped)",
        stats.sent, stats.received, stats.dropped
    );
}
