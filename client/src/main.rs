use meshchat_client::{
    init_tracing, ChatConfig, Direction, SessionContainer, Transcript, TranscriptEvent,
    TranscriptKind, TranscriptStore,
};
use meshchat_transport::{MemoryHub, Reliability, SessionEvent, SessionTransport};
use std::path::Path;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ChatConfig::from_env()?;
    info!(
        display_name = %config.display_name,
        room = %config.service_type,
        "starting MeshChat demo session"
    );

    // Demo wiring: an in-memory hub with a local endpoint and an echo peer
    // standing in for the real transport.
    let hub = MemoryHub::new();
    let (local, local_events) = hub.join(config.display_name.clone()).await?;
    spawn_echo_peer(&hub).await?;

    let (container, mut transcripts) = SessionContainer::start(&config, local, local_events);
    let store = TranscriptStore::new();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    println!("type a message, `/send <path>` to transfer a file, `/quit` to exit");

    loop {
        tokio::select! {
            event = transcripts.recv() => {
                let Some(event) = event else { break };
                println!("{}", render(event.transcript()));
                store.apply(event).await;
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                if line == "/quit" {
                    break;
                }
                if let Some(path) = line.strip_prefix("/send ") {
                    match container.send_resource(Path::new(path.trim())).await {
                        Ok(echo) => {
                            println!("{}", render(&echo));
                            store.apply(TranscriptEvent::Appended(echo)).await;
                        }
                        Err(err) => eprintln!("send failed: {err}"),
                    }
                    continue;
                }
                match container.send_message(line).await {
                    Ok(echo) => {
                        println!("{}", render(&echo));
                        store.apply(TranscriptEvent::Appended(echo)).await;
                    }
                    Err(err) => eprintln!("send failed: {err}"),
                }
            }
        }
    }

    info!(entries = store.len().await, "session ended");
    Ok(())
}

/// A hub participant that echoes every text message back to its sender.
async fn spawn_echo_peer(hub: &MemoryHub) -> anyhow::Result<()> {
    let (endpoint, mut events) = hub.join("Echo").await?;
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let SessionEvent::DataReceived { peer, bytes } = event {
                let _ = endpoint
                    .submit_data(&[peer], bytes, Reliability::Reliable)
                    .await;
            }
        }
    });
    Ok(())
}

fn render(transcript: &Transcript) -> String {
    let who = match transcript.direction {
        Direction::Sent => "me".to_string(),
        Direction::Received => transcript.peer.display_name.clone(),
        Direction::Local => "*".to_string(),
    };
    match &transcript.kind {
        TranscriptKind::Text { body } => format!("{who}: {body}"),
        TranscriptKind::ResourceInProgress { name, progress } => {
            let percent = progress
                .as_ref()
                .map(|p| p.fraction_completed() * 100.0)
                .unwrap_or(0.0);
            format!("{who}: sending {name} ({percent:.0}%)")
        }
        TranscriptKind::ResourceComplete { name, location } => {
            format!("{who}: {name} -> {}", location.display())
        }
        TranscriptKind::ResourceFailed { name, reason } => {
            format!("{who}: {name} failed ({reason})")
        }
        TranscriptKind::ResourceCancelled { name } => format!("{who}: {name} cancelled"),
    }
}
