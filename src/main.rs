//! filecoffee - command line entry point
//!
//! Sends or receives a single file over a WebRTC data channel, using the
//! relay only for room management and signaling.

mod args;

use args::{Args, Command};
use clap::Parser;
use filecoffee_core::webrtc::PeerState;
use filecoffee_core::{run_receive, run_send, Config, ReceiveOptions, SendOptions, SessionEvent};
use log::{error, info, warn};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let loaded = args.load_config();
    let default_level = match (&loaded, args.verbose) {
        (_, true) => "debug".to_string(),
        (Ok(cfg), false) => cfg.logging.level.clone(),
        (Err(_), false) => "info".to_string(),
    };

    // Initialize logging with noise filtering for third-party WebRTC crates
    env_logger::Builder::new()
        .parse_filters(&std::env::var("FILECOFFEE_LOG").unwrap_or(default_level))
        .filter_module("webrtc_ice", log::LevelFilter::Error)
        .filter_module("webrtc_dtls", log::LevelFilter::Error)
        .filter_module("webrtc_mdns", log::LevelFilter::Error)
        .filter_module("webrtc_sctp", log::LevelFilter::Error)
        .init();

    info!("filecoffee v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match loaded {
        Ok(cfg) => {
            info!("Loaded configuration from {:?}", args.config);
            cfg
        }
        Err(e) => {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        }
    };

    if let Some(ref server) = args.server {
        info!("Overriding relay url to {}", server);
        config.signaling.url = server.clone();
    }
    if let Command::Receive { output_dir: Some(ref dir), .. } = args.command {
        config.transfer.output_dir = dir.clone();
    }

    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(e);
    }

    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let renderer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            render(&event);
        }
    });

    let result = match args.command {
        Command::Send { file, password, stay_open } => {
            run_send(config, SendOptions { file, password, stay_open }, events_tx).await
        }
        Command::Receive {
            room_id,
            password,
            skip_room_check,
            stay_open,
            ..
        } => {
            let options = ReceiveOptions {
                room_id,
                password,
                skip_room_check,
                stay_open,
            };
            run_receive(config, options, events_tx).await
        }
    };

    // The sender half is gone once the session returns.
    let _ = renderer.await;

    if let Err(e) = result {
        error!("{}", e);
        return Err(e.into());
    }

    info!("Done");
    Ok(())
}

fn render(event: &SessionEvent) {
    match event {
        SessionEvent::RoomCreated { room_id, share_url } => {
            println!("Room created: {}", room_id);
            if let Some(url) = share_url {
                println!("Share this link: {}", url);
            }
            println!("Waiting for a peer to join...");
        }
        SessionEvent::RoomJoined { room_id } => println!("Joined room {}", room_id),
        SessionEvent::RoomStatus { exists, has_password } => {
            if *exists && *has_password {
                println!("Room is password protected");
            }
        }
        SessionEvent::PeerJoined { .. } => println!("Peer joined, connecting..."),
        SessionEvent::PeerLeft { .. } => println!("Peer left"),
        SessionEvent::StateChanged(PeerState::Connected) => println!("Connected"),
        SessionEvent::StateChanged(_) => {}
        SessionEvent::IncomingFile(meta) => {
            println!("Receiving {} ({} bytes, {})", meta.name, meta.size, meta.mime_type)
        }
        SessionEvent::Progress { percent } => println!("Progress: {}%", percent),
        SessionEvent::SendFinished { bytes } => println!("Sent {} bytes, waiting for confirmation", bytes),
        SessionEvent::TransferComplete => println!("Transfer complete"),
        SessionEvent::FileReceived { path, .. } => println!("Saved to {}", path.display()),
        SessionEvent::ServerError { message, .. } => eprintln!("Relay error: {}", message),
        SessionEvent::Error(message) => eprintln!("Error: {}", message),
    }
}
