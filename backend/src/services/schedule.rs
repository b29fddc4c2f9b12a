use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use tracing::{info, warn};

use crate::db::{CreateScheduledStream, ScheduledStreamRepository, Streamer, StreamerRepository};
use crate::error::AppResult;
use crate::services::twitch::ScheduleSegment;
use crate::AppState;

/// Length given to a segment Twitch returns without an end time.
const DEFAULT_SEGMENT_LENGTH_HOURS: i64 = 1;

/// Mirrors each streamer's native Twitch schedule into `scheduled_streams`.
///
/// Rows are keyed by `twitch_segment_id`, so repeated passes update in place.
/// Segments that disappear (or get canceled) are deleted; local rows and Google
/// Calendar rows are never touched.
pub struct ScheduleSyncManager;

impl ScheduleSyncManager {
    pub async fn sync_all(state: &AppState) -> AppResult<()> {
        let streamers = StreamerRepository::list_all(&state.db).await?;
        info!("Syncing Twitch schedules of {} streamer(s)", streamers.len());

        for streamer in &streamers {
            if let Err(e) = Self::sync_for_streamer(state, streamer).await {
                warn!("Failed to sync schedule of {}: {:?}", streamer.twitch_login, e);
            }
        }

        Ok(())
    }

    pub async fn sync_for_streamer(state: &AppState, streamer: &Streamer) -> AppResult<()> {
        let schedule = state
            .twitch
            .get_schedule(&streamer.twitch_id.to_string())
            .await?;

        let segments = schedule.and_then(|s| s.segments).unwrap_or_default();
        let mut keep: Vec<String> = Vec::with_capacity(segments.len());

        for segment in &segments {
            if segment.canceled_until.is_some() {
                continue;
            }
            keep.push(segment.id.clone());

            let Some(create) = segment_to_stream(segment) else {
                warn!(
                    "Failed to parse segment start_time '{}'; skipping segment {}",
                    segment.start_time, segment.id
                );
                continue;
            };

            ScheduledStreamRepository::upsert_twitch_segment(&state.db, &streamer.id, &segment.id, create)
                .await?;
        }

        let removed =
            ScheduledStreamRepository::delete_stale_twitch_segments(&state.db, &streamer.id, &keep).await?;
        if removed > 0 {
            info!(
                "Removed {} stale Twitch segment(s) for {}",
                removed, streamer.twitch_login
            );
        }

        Ok(())
    }
}

fn segment_to_stream(segment: &ScheduleSegment) -> Option<CreateScheduledStream> {
    let start = parse_rfc3339_to_naive(&segment.start_time)?;
    let end = segment
        .end_time
        .as_deref()
        .and_then(parse_rfc3339_to_naive)
        .unwrap_or_else(|| start + Duration::hours(DEFAULT_SEGMENT_LENGTH_HOURS));

    Some(CreateScheduledStream {
        title: segment.title.clone(),
        start,
        end,
        category: segment.category.as_ref().map(|c| c.name.clone()),
        weekly: segment.is_recurring,
    })
}

/// Parse an RFC3339 datetime string into a UTC NaiveDateTime.
fn parse_rfc3339_to_naive(s: &str) -> Option<NaiveDateTime> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc).naive_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::streamer::tests::new_streamer;
    use crate::services::test_support::test_state;
    use crate::services::twitch::ScheduleCategory;

    fn segment(id: &str, start: &str, end: Option<&str>) -> ScheduleSegment {
        ScheduleSegment {
            id: id.to_string(),
            start_time: start.to_string(),
            end_time: end.map(str::to_string),
            title: "Science".to_string(),
            canceled_until: None,
            category: Some(ScheduleCategory {
                id: "509670".to_string(),
                name: "Science & Technology".to_string(),
            }),
            is_recurring: true,
        }
    }

    #[test]
    fn segment_times_are_converted_to_utc() {
        let create = segment_to_stream(&segment(
            "a",
            "2030-01-06T20:00:00+01:00",
            Some("2030-01-06T22:30:00+01:00"),
        ))
        .unwrap();
        assert_eq!(create.start.to_string(), "2030-01-06 19:00:00");
        assert_eq!(create.end - create.start, Duration::minutes(150));
        assert!(create.weekly);
        assert_eq!(create.category.as_deref(), Some("Science & Technology"));
    }

    #[test]
    fn open_ended_segment_gets_default_length() {
        let create = segment_to_stream(&segment("a", "2030-01-06T19:00:00Z", None)).unwrap();
        assert_eq!(create.end - create.start, Duration::hours(DEFAULT_SEGMENT_LENGTH_HOURS));
        assert!(segment_to_stream(&segment("b", "tomorrow", None)).is_none());
    }

    #[tokio::test]
    async fn sync_upserts_segments_and_removes_stale_ones() {
        let state = test_state("http://127.0.0.1:9").await;
        let mut create = new_streamer("vortex", "Le Vortex");
        create.twitch_id = 1234;
        let streamer = StreamerRepository::create(&state.db, create).await.unwrap();

        let start = NaiveDateTime::parse_from_str("2030-01-01 18:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
        let base = CreateScheduledStream {
            title: "Vieux segment".to_string(),
            start,
            end: start + Duration::hours(2),
            category: None,
            weekly: false,
        };
        ScheduledStreamRepository::upsert_twitch_segment(&state.db, &streamer.id, "seg-gone", base.clone())
            .await
            .unwrap();
        let local = ScheduledStreamRepository::create(&state.db, &streamer.id, base)
            .await
            .unwrap();

        ScheduleSyncManager::sync_for_streamer(&state, &streamer).await.unwrap();
        ScheduleSyncManager::sync_for_streamer(&state, &streamer).await.unwrap();

        let rows = ScheduledStreamRepository::find_by_streamer(&state.db, &streamer.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().any(|r| r.id == local.id));
        assert!(rows.iter().all(|r| r.twitch_segment_id.as_deref() != Some("seg-gone")));

        let tuesday = rows
            .iter()
            .find(|r| r.twitch_segment_id.as_deref() == Some("seg-b"))
            .unwrap();
        assert_eq!(tuesday.title, "Mardi Q&A");
        assert_eq!(tuesday.category, None);
        assert_eq!(tuesday.duration(), Duration::hours(1));
    }

    #[tokio::test]
    async fn missing_schedule_clears_twitch_rows_only() {
        let state = test_state("http://127.0.0.1:9").await;
        let streamer = StreamerRepository::create(&state.db, new_streamer("quiet", "Quiet"))
            .await
            .unwrap();
        let start = Utc::now().naive_utc();
        let base = CreateScheduledStream {
            title: "Ancien".to_string(),
            start,
            end: start + Duration::hours(1),
            category: None,
            weekly: false,
        };
        ScheduledStreamRepository::upsert_twitch_segment(&state.db, &streamer.id, "seg-x", base.clone())
            .await
            .unwrap();
        ScheduledStreamRepository::create(&state.db, &streamer.id, base)
            .await
            .unwrap();

        ScheduleSyncManager::sync_for_streamer(&state, &streamer).await.unwrap();

        let rows = ScheduledStreamRepository::find_by_streamer(&state.db, &streamer.id)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].twitch_segment_id.is_none());
    }
}
