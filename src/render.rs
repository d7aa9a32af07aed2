use std::time::{Duration, Instant};

use tokio::{sync::mpsc::UnboundedReceiver, task::JoinHandle};

use crate::{
    event::{EventKind, ProgressEvent},
    progress::{parse_chunk, ParsedEvent, ProgressState},
};

/// Consume progress events until every sender is gone, logging what happens along the way.
/// Resolves to the last progress state.
pub fn spawn(mut rx: UnboundedReceiver<ProgressEvent>) -> JoinHandle<ProgressState> {
    tokio::spawn(async move {
        let started = Instant::now();
        let mut state = ProgressState::default();

        while let Some(event) = rx.recv().await {
            for line in event.data.lines().map(str::trim).filter(|l| !l.is_empty()) {
                match event.kind {
                    EventKind::Progress => debug!("{}", line),
                    EventKind::Error => warn!("{}", line),
                }
            }

            // gamdl logs to stderr, so both kinds can carry progress
            for parsed in parse_chunk(&event.data) {
                state.apply(&parsed);

                info!(
                    elapsed = %format_elapsed(started.elapsed()),
                    "{}",
                    describe(&state, &parsed)
                );
            }
        }

        debug!(
            size = ?state.total_size,
            speed = ?state.speed,
            eta = ?state.eta.as_ref().map(ToString::to_string),
            fragment = ?state.fragment,
            finished = state.final_stats.is_some(),
            "progress stream closed"
        );

        state
    })
}

fn describe(state: &ProgressState, event: &ParsedEvent) -> String {
    match event {
        ParsedEvent::Song(song) => format!(
            "{:?} ({})",
            song.title,
            state.song_status.as_deref().unwrap_or_default()
        ),
        ParsedEvent::Finished => state
            .song_status
            .clone()
            .unwrap_or_else(|| "song finished".to_string()),
        ParsedEvent::Fragment(_) | ParsedEvent::Completed(_) | ParsedEvent::Started => {
            state.text.clone()
        }
    }
}

/// `m:ss`
fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    format!("{}:{:02}", secs / 60, secs % 60)
}
