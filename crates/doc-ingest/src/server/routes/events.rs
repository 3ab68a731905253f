//! Server-sent progress events

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};

use crate::processing::ProgressEvent;
use crate::server::state::AppState;

/// Query for `GET /api/events`
#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Only forward events of this task
    pub task_id: Option<String>,
}

/// GET /api/events - Stream progress events as SSE
///
/// Each event is named `progress`, or `terminal` for the last event of a task.
/// A slow client that falls behind gets a `lagged` event with the number of dropped events.
pub async fn progress_events(
    State(state): State<AppState>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events().subscribe();
    let task_id = filter.task_id;

    let stream = BroadcastStream::new(receiver).filter_map(move |message| match message {
        Ok(event) => {
            if !matches_filter(task_id.as_deref(), &event) {
                return None;
            }
            to_sse(&event).map(Ok)
        }
        Err(BroadcastStreamRecvError::Lagged(dropped)) => {
            tracing::warn!("SSE subscriber lagged, {} events dropped", dropped);
            Some(Ok(Event::default().event("lagged").data(dropped.to_string())))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn matches_filter(task_id: Option<&str>, event: &ProgressEvent) -> bool {
    task_id.map_or(true, |id| id == event.task_id)
}

fn to_sse(event: &ProgressEvent) -> Option<Event> {
    let name = if event.is_terminal() { "terminal" } else { "progress" };
    match Event::default().event(name).id(event.task_id.clone()).json_data(event) {
        Ok(sse) => Some(sse),
        Err(e) => {
            tracing::error!("[{}] failed to encode progress event: {}", event.task_id, e);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::{StatisticsAggregate, TaskKind, TaskState};

    fn event(task_id: &str, state: TaskState) -> ProgressEvent {
        ProgressEvent {
            task_id: task_id.to_string(),
            kind: TaskKind::WebScrape,
            state,
            progress: 40,
            message: "Scraped 2/5 URLs".to_string(),
            stage: "scrape".to_string(),
            stats: StatisticsAggregate::new().to_snapshot(),
            details: None,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_task_filter() {
        let e = event("abc", TaskState::Processing);
        assert!(matches_filter(None, &e));
        assert!(matches_filter(Some("abc"), &e));
        assert!(!matches_filter(Some("other"), &e));
    }

    #[test]
    fn test_terminal_events_are_named() {
        assert!(to_sse(&event("abc", TaskState::Processing)).is_some());
        assert!(to_sse(&event("abc", TaskState::Completed)).is_some());
    }
}
