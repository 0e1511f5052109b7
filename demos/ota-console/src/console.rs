//! Scripted console client: walks search, download and install, printing
//! every status line the session produces.

use anyhow::Context;
use ota_client::{ClientConfig, Event, Phase, SessionState, StatusKind, UpdateClient, transport};
use std::time::Duration;

/// Which steps to run after searching.
#[derive(Debug, Clone, Copy)]
pub struct Plan {
    pub all_channels: bool,
    pub download: bool,
    pub install: bool,
}

const STEP_TIMEOUT: Duration = Duration::from_secs(60);

pub async fn run(config: ClientConfig, url: &str, plan: Plan) -> anyhow::Result<SessionState> {
    let (client, engine) = UpdateClient::new(&config);
    tokio::spawn(engine.run());

    let mut events = client.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            print_event(&event);
        }
    });

    let connection = transport::connect_websocket(url)
        .await
        .with_context(|| format!("connecting to {url}"))?;
    client.bind(connection);

    client.query_os_version()?;
    client.set_channel_preference(config.preferences.channel)?;
    client.set_wifi_only(config.preferences.wifi_only)?;

    client.search(plan.all_channels)?;
    let mut state = settle(&client, Phase::Searching).await?;

    if plan.download && state.phase == Phase::Found {
        client.download()?;
        state = settle(&client, Phase::Downloading).await?;
    }
    if plan.install && state.phase == Phase::Downloaded {
        client.install()?;
        state = settle(&client, Phase::Installing).await?;
    }

    client.flush().await?;
    client.unbind();
    printer.abort();
    Ok(state)
}

/// Wait until the session leaves `phase`.
async fn settle(client: &UpdateClient, phase: Phase) -> anyhow::Result<SessionState> {
    // The request must be registered before the phase is worth watching.
    client.flush().await?;
    let mut rx = client.watch();
    let state = tokio::time::timeout(STEP_TIMEOUT, rx.wait_for(|s| s.phase != phase))
        .await
        .with_context(|| format!("no reply while {phase}"))??
        .clone();
    Ok(state)
}

fn print_event(event: &Event) {
    match event {
        Event::Status(status) => match status.kind {
            StatusKind::Info => println!("  {status}"),
            _ => println!("! {status}"),
        },
        Event::Progress { stage, progress } => println!("  {stage}: {progress}"),
        Event::Bound => println!("  connected to update service"),
        Event::Unbound => println!("  disconnected"),
    }
}
