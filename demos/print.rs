use std::time::Duration;

use nwws_bridge::config::XmppConfig;
use nwws_bridge::receiver::{self, ReceiverEvent};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter_module("nwws_bridge", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let username = std::env::var("NWWS_USERNAME").expect("NWWS_USERNAME must be set");
    let password = std::env::var("NWWS_PASSWORD").expect("NWWS_PASSWORD must be set");
    let server = std::env::var("NWWS_SERVER").unwrap_or_else(|_| "nwws-oi.weather.gov".to_string());
    let port = std::env::var("NWWS_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5222);

    let xmpp = XmppConfig { username, password, server, port };
    let (queue_tx, mut queue_rx) = mpsc::channel(32);
    let mut handle = receiver::spawn(xmpp, queue_tx, Duration::from_secs(5), None);

    loop {
        tokio::select! {
            event = handle.recv() => match event {
                Some(ReceiverEvent::ConnectionState(state)) => log::info!("state -> {state:?}"),
                Some(ReceiverEvent::Error(e)) => log::error!("error: {e}"),
                None => break,
            },
            Some(event) = queue_rx.recv() => {
                println!("{:#?}", event);
            }
        }
    }
}
