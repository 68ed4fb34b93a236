use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use client_core::{
    DurableSnapshotStore, EngineConfig, EngineEvent, PassthroughRestriction, PlainMarkupParser,
    ReconciliationEngine, SendOptions, SystemClock, WsTransport,
};
use shared::domain::{ChatStatus, SpaceId};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

mod settings;

#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    server_url: Option<String>,
    #[arg(long)]
    space: Option<String>,
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let mut settings = settings::load_settings();
    if let Some(v) = args.server_url {
        settings.server_url = v;
    }
    if let Some(v) = args.space {
        settings.space = Some(v);
    }
    if let Some(v) = args.database_url {
        settings.database_url = v;
    }

    let transport = WsTransport::connect(&settings.server_url).await?;
    let snapshots = DurableSnapshotStore::initialize(
        &settings.database_url,
        DurableSnapshotStore::random_session_key(),
    )
    .await?;
    let engine = ReconciliationEngine::new_with_dependencies(
        EngineConfig::default(),
        transport.clone(),
        Arc::new(PassthroughRestriction),
        Arc::new(PlainMarkupParser),
        snapshots,
        Arc::new(SystemClock),
    );

    let mut server_events = transport.subscribe_server_events();
    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Ok(event) = server_events.recv().await {
                engine.handle_server_event(event).await;
            }
        });
    }

    let _sweeper = engine.spawn_sweep_task();

    if let Some(space) = settings.space.clone() {
        engine.enter_space(Some(SpaceId::new(space))).await;
    }

    {
        let mut events = engine.subscribe_events();
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    EngineEvent::MessageNotify => {
                        if let Some(entry) = engine.messages().await.last() {
                            let from = entry
                                .message
                                .from
                                .map(|id| id.0.to_string())
                                .unwrap_or_else(|| "server".into());
                            let text = entry.message.text.clone().unwrap_or_default();
                            println!("<{from}> {text}");
                        }
                    }
                    EngineEvent::Warning(message) => eprintln!("warning: {message}"),
                    _ => {}
                }
            }
        });
    }

    info!(
        server = %settings.server_url,
        "connected; type to chat, /edit <text>, /delete, /quit"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        if line == "/delete" {
            match engine.last_message_edit().await {
                Some(id) => {
                    if let Err(err) = engine.delete_message(id).await {
                        eprintln!("delete failed: {err}");
                    }
                }
                None => eprintln!("nothing editable to delete"),
            }
            continue;
        }
        if let Some(text) = line.strip_prefix("/edit ") {
            match engine.last_message_edit().await {
                Some(id) => {
                    let options = SendOptions {
                        editing: Some(id),
                        ..SendOptions::default()
                    };
                    if let Err(err) = engine.send_message(text, options).await {
                        eprintln!("edit failed: {err}");
                    }
                }
                None => eprintln!("nothing editable"),
            }
            continue;
        }

        engine.set_status(ChatStatus::None, None).await;
        if let Err(err) = engine.send_message(&line, SendOptions::default()).await {
            eprintln!("send failed: {err}");
        }
    }

    Ok(())
}
