use std::time::Duration;

use nwws_bridge::config::XmppConfig;
use nwws_bridge::pipeline::types::PipelineEvent;
use nwws_bridge::receiver::{self, ReceiverEvent};

#[tokio::test]
async fn smoke_test() {
    env_logger::builder()
        .filter(None, log::LevelFilter::Info)
        .filter_module("nwws_bridge", log::LevelFilter::Info)
        .parse_default_env()
        .init();

    let (username, password) = match (
        std::env::var("NWWS_USERNAME"),
        std::env::var("NWWS_PASSWORD"),
    ) {
        (Ok(user), Ok(pass)) if !user.is_empty() && !pass.is_empty() => (user, pass),
        _ => {
            log::warn!("NWWS_USERNAME and NWWS_PASSWORD must be set");
            log::warn!("skipping smoke test");
            return;
        }
    };

    let xmpp = XmppConfig {
        username,
        password,
        server: std::env::var("NWWS_SERVER").unwrap_or_else(|_| "nwws-oi.weather.gov".to_string()),
        port: std::env::var("NWWS_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(5222),
    };

    let (queue_tx, mut queue_rx) = tokio::sync::mpsc::channel(32);
    let mut handle = receiver::spawn(xmpp, queue_tx, Duration::from_secs(5), None);

    let wait_for_test_message = async {
        loop {
            tokio::select! {
                event = handle.recv() => match event {
                    Some(ReceiverEvent::ConnectionState(state)) => log::info!("state -> {state:?}"),
                    Some(ReceiverEvent::Error(e)) => log::error!("receiver error: {e:?}"),
                    None => return false,
                },
                Some(event) = queue_rx.recv() => {
                    if let PipelineEvent::RawIngest(raw) = &event {
                        log::info!("rx: {}.{}", raw.ttaaii, raw.cccc);
                        // THIS IS A COMMUNICATIONS TEST MESSAGE ORIGINATING FROM THE ANCF
                        if raw.ttaaii == "WOUS99" && raw.cccc == "KNCF" {
                            return true;
                        }
                    }
                }
            }
        }
    };

    match tokio::time::timeout(Duration::from_secs(75), wait_for_test_message).await {
        Ok(true) => log::info!("received ANCF test message from NWWS OI"),
        Ok(false) => panic!("receiver stopped before the ANCF test message arrived"),
        Err(_) => panic!("timed out without receiving the ANCF test message"),
    }
}
