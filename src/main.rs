use std::env;

use anyhow::{bail, Context};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use whip_publish::capture::file::FileCapture;
use whip_publish::util::init_log;
use whip_publish::{
    BearerToken, CaptureDevices, CaptureSource, PublishConfig, SessionController, SessionEvent,
};

const TOKEN_VAR: &str = "WHIP_BEARER_TOKEN";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_log();

    let args: Vec<String> = env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("devices") if args.len() > 2 => list_devices(&args[2..]),
        Some("publish") if args.len() > 3 => publish(&args[2], &args[3], &args[4..]).await,
        _ => {
            print_usage();
            Ok(())
        }
    }
}

fn list_devices(files: &[String]) -> anyhow::Result<()> {
    let capture = FileCapture::new(files);
    for device in capture.enumerate_devices() {
        println!("{:?}\t{}\t{}", device.kind, device.label, device.id);
    }
    Ok(())
}

async fn publish(endpoint: &str, file: &str, rest: &[String]) -> anyhow::Result<()> {
    let config = match rest {
        [] => PublishConfig::default(),
        [flag, path] if flag == "--config" => PublishConfig::from_file(path)?,
        _ => bail!("unexpected arguments: {}", rest.join(" ")),
    };

    let token = env::var(TOKEN_VAR).with_context(|| format!("{TOKEN_VAR} is not set"))?;

    let capture = FileCapture::new([file]);
    let source = capture
        .enumerate_devices()
        .first()
        .map_or(CaptureSource::Camera, CaptureSource::for_device);

    let constraints = config.capture;
    let mut controller = SessionController::new(capture, config);
    let mut events = controller.subscribe();

    controller.begin_capture(source, constraints).await?;
    controller
        .start_streaming(endpoint, BearerToken::new(token))
        .await?;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, stopping");
                break;
            }
            event = events.recv() => match event {
                Ok(SessionEvent::StateChanged { to, .. }) if to.is_terminal() => {
                    info!("Session ended: {}", to);
                    break;
                }
                Ok(event) => info!("{}", serde_json::to_string(&event)?),
                Err(RecvError::Lagged(n)) => warn!("Missed {} session events", n),
                Err(RecvError::Closed) => break,
            },
        }
    }

    controller.stop_streaming().await?;
    Ok(())
}

fn print_usage() {
    println!("WHIP publisher");
    println!("Usage:");
    println!("  whip-publish devices <file.h264>...");
    println!("  whip-publish publish <endpoint> <file.h264> [--config <path>]");
    println!();
    println!("The bearer token is read from {TOKEN_VAR}.");
}
