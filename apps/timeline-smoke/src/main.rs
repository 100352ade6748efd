mod logging;

use std::{error::Error, fmt, process, sync::Arc, time::Duration};

use timeline_core::{
    EventStream, Message, MessageEvent, ReactionAggregate, ReactionSummary, Reactions,
    TimelineChannelError, TimelineCommand, TimelineConfig, TimelineError, TimelineEvent,
    TimelineSnapshot,
};
use timeline_runtime::{TimelineRuntimeHandle, spawn_runtime};
use timeline_source::InMemoryHistorySource;
use tokio::{sync::broadcast::error::RecvError, time::timeout};
use tracing::{info, warn};

const ROOM_ID: &str = "room-smoke";
const SEEDED_MESSAGES: u64 = 240;
const BASE_TIMESTAMP_MS: u64 = 1_731_000_000_000;
const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    logging::init();

    let config = match TimelineConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            process::exit(2);
        }
    };

    if let Err(err) = run(config).await {
        eprintln!("Timeline smoke run failed: {err}");
        process::exit(1);
    }
}

async fn run(config: TimelineConfig) -> Result<(), SmokeError> {
    info!(
        window_size = config.window_size,
        page_size = config.page_size,
        "starting timeline smoke run"
    );

    let source = InMemoryHistorySource::new();
    source.insert_messages(ROOM_ID, (0..SEEDED_MESSAGES).map(seeded_message))?;

    let handle = spawn_runtime(Arc::new(source), config);
    let mut events = handle.subscribe();

    send(
        &handle,
        TimelineCommand::OpenRoom {
            room_id: ROOM_ID.to_owned(),
        },
    )
    .await?;
    let backfill = wait_for(&mut events, "initial backfill", |s| {
        !s.loading && s.total_messages > 0
    })
    .await?;
    print_snapshot("backfill", &backfill)?;

    let live = seeded_message(SEEDED_MESSAGES);
    let live_serial = live.serial.clone();
    send(
        &handle,
        TimelineCommand::Ingest {
            room_id: ROOM_ID.to_owned(),
            events: vec![
                MessageEvent::Created(live),
                MessageEvent::ReactionsUpdated(ReactionSummary {
                    serial: live_serial,
                    reactions: thumbs_up("smoke-bot"),
                }),
            ],
        },
    )
    .await?;
    let expected = backfill.total_messages + 1;
    let with_live = wait_for(&mut events, "live message", |s| {
        s.total_messages == expected
    })
    .await?;
    print_snapshot("live", &with_live)?;

    send(&handle, TimelineCommand::LoadMoreHistory).await?;
    let before = with_live.total_messages;
    let older = wait_for(&mut events, "older history", |s| {
        !s.loading && s.total_messages > before
    })
    .await?;
    print_snapshot("older", &older)?;

    if let Some(target) = older.messages.first().map(|m| m.serial.clone()) {
        send(&handle, TimelineCommand::ShowMessagesAround { serial: target }).await?;
        let centered = wait_for(&mut events, "centered window", |s| {
            s.anchored_serial.is_some()
        })
        .await?;
        print_snapshot("centered", &centered)?;
    }

    send(
        &handle,
        TimelineCommand::Discontinuity {
            room_id: ROOM_ID.to_owned(),
        },
    )
    .await?;
    wait_for(&mut events, "discontinuity reset", |s| s.loading).await?;
    let reloaded = wait_for(&mut events, "reload after discontinuity", |s| !s.loading).await?;
    print_snapshot("reloaded", &reloaded)?;

    send(&handle, TimelineCommand::CloseRoom).await?;
    info!("timeline smoke run finished");
    Ok(())
}

fn seeded_message(index: u64) -> Message {
    let created_at_ms = BASE_TIMESTAMP_MS + index * 1_000;
    Message::new(
        format!("{created_at_ms:016}-{index:06}"),
        if index % 2 == 0 { "alice" } else { "bob" },
        format!("message #{index}"),
        created_at_ms,
    )
}

fn thumbs_up(client_id: &str) -> Reactions {
    let mut reactions = Reactions::new();
    reactions.insert(
        "👍".to_owned(),
        ReactionAggregate {
            total: 1,
            client_ids: [client_id.to_owned()].into(),
        },
    );
    reactions
}

async fn send(handle: &TimelineRuntimeHandle, command: TimelineCommand) -> Result<(), SmokeError> {
    handle.send(command).await.map_err(SmokeError::Channel)
}

async fn wait_for<F>(
    events: &mut EventStream,
    step: &'static str,
    matches: F,
) -> Result<TimelineSnapshot, SmokeError>
where
    F: Fn(&TimelineSnapshot) -> bool,
{
    loop {
        let received = timeout(EVENT_TIMEOUT, events.recv())
            .await
            .map_err(|_| SmokeError::Timeout(step))?;

        match received {
            Ok(TimelineEvent::Snapshot(snapshot)) if matches(&snapshot) => return Ok(snapshot),
            Ok(TimelineEvent::Snapshot(_)) => {}
            Ok(TimelineEvent::HistoryLoadFailed { code, message, .. })
            | Ok(TimelineEvent::CommandRejected { code, message }) => {
                return Err(SmokeError::Rejected { code, message });
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "smoke subscriber lagged behind runtime events");
            }
            Err(RecvError::Closed) => return Err(SmokeError::Closed),
        }
    }
}

fn print_snapshot(label: &str, snapshot: &TimelineSnapshot) -> Result<(), SmokeError> {
    info!(
        label,
        visible = snapshot.messages.len(),
        total = snapshot.total_messages,
        has_more = snapshot.has_more_history,
        "snapshot"
    );
    let json = serde_json::to_string(snapshot).map_err(SmokeError::Serialize)?;
    println!("{label}: {json}");
    Ok(())
}

#[derive(Debug)]
enum SmokeError {
    Channel(TimelineChannelError),
    Source(TimelineError),
    Rejected { code: String, message: String },
    Timeout(&'static str),
    Closed,
    Serialize(serde_json::Error),
}

impl From<TimelineError> for SmokeError {
    fn from(err: TimelineError) -> Self {
        Self::Source(err)
    }
}

impl fmt::Display for SmokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Channel(err) => write!(f, "{err}"),
            Self::Source(err) => write!(f, "history source error: {err}"),
            Self::Rejected { code, message } => write!(f, "runtime reported {code}: {message}"),
            Self::Timeout(step) => write!(f, "timed out waiting for {step}"),
            Self::Closed => write!(f, "runtime event stream closed"),
            Self::Serialize(err) => write!(f, "failed to serialize snapshot: {err}"),
        }
    }
}

impl Error for SmokeError {}
