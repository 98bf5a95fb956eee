use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::{Catalog, Track};
use crate::config::Settings;
use crate::sched::{Job, ScheduleEntry, Trigger};
use crate::transport::{audio_addr, AudioArg, ControlLink, VideoCommand, VideoTarget};

/// Playlist entry 0 on the video players is the designated black screen.
const BLACK_SCREEN_INDEX: i32 = 0;

/// Global transport state. While PAUSED, recurring jobs are suppressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportState {
    Running,
    Paused,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown track {0:?}")]
    UnknownTrack(String),
}

/// The fixed delays inside command sequences. Best-effort ordering aids,
/// tunable from the config file.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub video_load_delay: Duration,
    pub pause_settle_delay: Duration,
}

impl Timing {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            video_load_delay: Duration::from_millis(settings.video_load_delay_ms),
            pause_settle_delay: Duration::from_millis(settings.pause_settle_delay_ms),
        }
    }
}

/// Job list and transport state live behind one lock: pause/resume, job
/// registration and job firing are mutually exclusive, and each holds the
/// lock for its whole command sequence so per-operation send ordering is
/// preserved.
struct EngineInner {
    jobs: Vec<Job>,
    state: TransportState,
}

/// The show control engine: holds the catalog, drives the audio engine and
/// the video players through a [`ControlLink`], and fires scheduled jobs.
pub struct ShowControl {
    catalog: Arc<Catalog>,
    link: Box<dyn ControlLink>,
    timing: Timing,
    inner: Mutex<EngineInner>,
}

impl ShowControl {
    pub fn new(catalog: Arc<Catalog>, link: Box<dyn ControlLink>, timing: Timing) -> Self {
        Self {
            catalog,
            link,
            timing,
            inner: Mutex::new(EngineInner {
                jobs: Vec::new(),
                state: TransportState::Running,
            }),
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    // --- Playback coordinator ---------------------------------------------

    /// Starts the given track on the audio engine and, if it has video, on
    /// the players. With `pause_scheduler`, the standing schedule is
    /// suspended first: a manual play wins over whatever was programmed.
    pub async fn play_track(&self, track_id: &str, pause_scheduler: bool) -> Result<(), EngineError> {
        let track = self
            .catalog
            .lookup(track_id)
            .ok_or_else(|| EngineError::UnknownTrack(track_id.to_string()))?
            .clone();

        let mut inner = self.inner.lock().await;
        if pause_scheduler {
            inner.state = TransportState::Paused;
            self.link.send_audio(audio_addr::TRACK1_MUTE, &[AudioArg::Int(0)]);
        }
        info!(
            track = %track.name,
            audio_index = track.audio_index,
            video_index = ?track.video_index,
            "play track"
        );
        self.run_play_sequence(&track).await;
        Ok(())
    }

    /// Audio region select, stop, play, then the video start. The order is
    /// load-bearing: the region must be selected before the transport
    /// restarts, and the players must have their playlist entry before the
    /// unpause lands.
    async fn run_play_sequence(&self, track: &Track) {
        self.link.send_audio(audio_addr::REGION, &[AudioArg::Int(track.audio_index)]);
        self.link.send_audio(audio_addr::STOP, &[AudioArg::Float(1.0)]);
        self.link.send_audio(audio_addr::PLAY, &[AudioArg::Float(1.0)]);
        if let Some(video_index) = track.video_index {
            self.start_video(video_index, false).await;
        }
    }

    /// Selects a playlist entry on every player. The players freeze on the
    /// first frame, so unless `stay_paused`, an unpause follows after the
    /// configured frame-load delay. The unpause goes to the video port only;
    /// the info displays stay as they are.
    async fn start_video(&self, video_index: i32, stay_paused: bool) {
        self.link
            .broadcast_video(&VideoCommand::playlist_select(video_index), VideoTarget::AllPorts);
        if !stay_paused {
            tokio::time::sleep(self.timing.video_load_delay).await;
            self.link
                .broadcast_video(&VideoCommand::unpause(), VideoTarget::VideoPort);
        }
    }

    // --- Transport state machine ------------------------------------------

    /// Mute first so the operator hears silence immediately, wait for the
    /// mute to land, then stop the audio transport and park the players on
    /// the black screen. Suppresses recurring jobs. No-op while PAUSED.
    pub async fn pause(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Paused {
            return;
        }
        inner.state = TransportState::Paused;
        info!("pausing scheduler and playback");

        self.link.send_audio(audio_addr::TRACK1_MUTE, &[AudioArg::Int(1)]);
        tokio::time::sleep(self.timing.pause_settle_delay).await;
        self.link.send_audio(audio_addr::STOP, &[AudioArg::Float(1.0)]);
        self.start_video(BLACK_SCREEN_INDEX, true).await;
    }

    /// Unmutes and re-enables recurring jobs. Does not restart playback:
    /// the operator or the next trigger decides what plays. No-op while
    /// RUNNING.
    pub async fn resume(&self) {
        let mut inner = self.inner.lock().await;
        if inner.state == TransportState::Running {
            return;
        }
        info!("resuming scheduler");
        self.link.send_audio(audio_addr::TRACK1_MUTE, &[AudioArg::Int(0)]);
        inner.state = TransportState::Running;
    }

    pub async fn state(&self) -> TransportState {
        self.inner.lock().await.state
    }

    pub async fn is_running(&self) -> bool {
        self.state().await == TransportState::Running
    }

    // --- Scheduler engine -------------------------------------------------

    /// Registers one job per schedule entry. Entries whose trigger cannot
    /// produce a future fire time are logged and dropped.
    pub async fn load_schedule(&self, entries: Vec<ScheduleEntry>) {
        let now = Local::now();
        let mut inner = self.inner.lock().await;
        for entry in entries {
            match entry.trigger {
                Trigger::Cron(spec) => match Job::recurring(&entry.track_id, spec, &now) {
                    Some(job) => inner.jobs.push(job),
                    None => warn!(track = %entry.track_id, "schedule entry never fires, dropping"),
                },
                Trigger::At(at) => {
                    if at <= now {
                        warn!(track = %entry.track_id, %at, "one-shot entry is in the past, dropping");
                        continue;
                    }
                    inner.jobs.push(Job::one_shot(&entry.track_id, at));
                }
            }
        }
        info!(jobs = inner.jobs.len(), "schedule loaded");
    }

    /// Registers a one-shot job firing `after_seconds` from now.
    pub async fn schedule_one_shot(
        &self,
        track_id: &str,
        after_seconds: u64,
    ) -> Result<DateTime<Local>, EngineError> {
        if self.catalog.lookup(track_id).is_none() {
            return Err(EngineError::UnknownTrack(track_id.to_string()));
        }
        let at = Local::now() + chrono::Duration::seconds(after_seconds as i64);
        let job = Job::one_shot(track_id, at);
        info!(track = %track_id, %at, job = %job.id, "one-shot scheduled");
        self.inner.lock().await.jobs.push(job);
        Ok(at)
    }

    /// At most `limit` upcoming (fire time, track title) pairs, ascending.
    /// Jobs whose track is no longer in the catalog are left out.
    pub async fn upcoming(&self, limit: usize) -> Vec<(DateTime<Local>, String)> {
        let inner = self.inner.lock().await;
        let mut next: Vec<(DateTime<Local>, String)> = inner
            .jobs
            .iter()
            .filter_map(|job| {
                self.catalog
                    .lookup(&job.track_id)
                    .map(|track| (job.next_fire, track.title.clone()))
            })
            .collect();
        next.sort_by_key(|(at, _)| *at);
        next.truncate(limit);
        next
    }

    /// Fires every job due at `now`. Recurring jobs are rescheduled to
    /// their next occurrence whether or not they fired; while PAUSED their
    /// firing is skipped, not queued. One-shot jobs are an explicit operator
    /// request, fire regardless of transport state, and are removed after.
    pub async fn fire_due(&self, now: DateTime<Local>) {
        let mut inner = self.inner.lock().await;

        let mut due: Vec<(Uuid, String, bool)> = Vec::new();
        let mut idx = 0;
        while idx < inner.jobs.len() {
            if inner.jobs[idx].next_fire > now {
                idx += 1;
                continue;
            }
            let job = inner.jobs[idx].clone();
            match &job.trigger {
                Trigger::At(_) => {
                    inner.jobs.remove(idx);
                    due.push((job.id, job.track_id, false));
                }
                Trigger::Cron(spec) => {
                    match spec.next_occurrence(&now) {
                        Some(next_fire) => {
                            inner.jobs[idx].next_fire = next_fire;
                            idx += 1;
                        }
                        None => {
                            warn!(job = %job.id, "no further occurrence, removing job");
                            inner.jobs.remove(idx);
                        }
                    }
                    due.push((job.id, job.track_id.clone(), true));
                }
            }
        }

        for (id, track_id, recurring) in due {
            if recurring && inner.state == TransportState::Paused {
                debug!(job = %id, track = %track_id, "trigger skipped while paused");
                continue;
            }
            let Some(track) = self.catalog.lookup(&track_id).cloned() else {
                warn!(job = %id, track = %track_id, "scheduled track missing from catalog");
                continue;
            };
            info!(job = %id, track = %track_id, "scheduled trigger");
            self.run_play_sequence(&track).await;
        }
    }

    /// Background worker: checks for due jobs once a second until the task
    /// is aborted at shutdown.
    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            self.fire_due(Local::now()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::testutil::{catalog, track};
    use crate::sched::TimeSpec;
    use crate::transport::testing::{RecordingLink, Sent};
    use chrono::{TimeZone, Weekday};

    fn engine_with(tracks: Vec<Track>) -> (Arc<ShowControl>, std::sync::Arc<std::sync::Mutex<Vec<Sent>>>) {
        let (link, log) = RecordingLink::new();
        let timing = Timing {
            video_load_delay: Duration::from_millis(30),
            pause_settle_delay: Duration::from_millis(500),
        };
        let engine = ShowControl::new(Arc::new(catalog(tracks)), Box::new(link), timing);
        (Arc::new(engine), log)
    }

    fn audio(address: &str, args: &[AudioArg]) -> Sent {
        Sent::Audio {
            address: address.to_string(),
            args: args.to_vec(),
        }
    }

    fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).single().unwrap()
    }

    fn monday_spec(h: u32, m: u32, s: u32) -> TimeSpec {
        TimeSpec::new(h, m, s, vec![Weekday::Mon]).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn play_track_issues_commands_in_order() {
        let (engine, log) = engine_with(vec![track("intro", 5, Some(3))]);
        engine.play_track("intro", false).await.unwrap();

        let sent = log.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                audio(audio_addr::REGION, &[AudioArg::Int(5)]),
                audio(audio_addr::STOP, &[AudioArg::Float(1.0)]),
                audio(audio_addr::PLAY, &[AudioArg::Float(1.0)]),
                Sent::Video {
                    payload: serde_json::json!({"command": ["playlist-play-index", 3]}),
                    target: VideoTarget::AllPorts,
                },
                Sent::Video {
                    payload: serde_json::json!({"command": ["set_property", "pause", "no"], "async": true}),
                    target: VideoTarget::VideoPort,
                },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn play_track_without_video_skips_broadcasts() {
        let (engine, log) = engine_with(vec![track("audio-only", 2, None)]);
        engine.play_track("audio-only", false).await.unwrap();
        let sent = log.lock().unwrap();
        assert_eq!(sent.len(), 3);
        assert!(sent.iter().all(|s| matches!(s, Sent::Audio { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn manual_play_pauses_scheduler_and_unmutes() {
        let (engine, log) = engine_with(vec![track("intro", 5, None)]);
        engine.play_track("intro", true).await.unwrap();

        assert!(!engine.is_running().await);
        let sent = log.lock().unwrap();
        assert_eq!(sent[0], audio(audio_addr::TRACK1_MUTE, &[AudioArg::Int(0)]));
        assert_eq!(sent[1], audio(audio_addr::REGION, &[AudioArg::Int(5)]));
    }

    #[tokio::test(start_paused = true)]
    async fn play_unknown_track_fails_without_commands() {
        let (engine, log) = engine_with(vec![]);
        let err = engine.play_track("ghost", true).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownTrack(name) if name == "ghost"));
        assert!(log.lock().unwrap().is_empty());
        // A bad request must not have flipped the transport state.
        assert!(engine.is_running().await);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_sequence_mutes_then_stops_then_black_screen() {
        let (engine, log) = engine_with(vec![]);
        engine.pause().await;

        assert!(!engine.is_running().await);
        let sent = log.lock().unwrap();
        assert_eq!(
            *sent,
            vec![
                audio(audio_addr::TRACK1_MUTE, &[AudioArg::Int(1)]),
                audio(audio_addr::STOP, &[AudioArg::Float(1.0)]),
                Sent::Video {
                    payload: serde_json::json!({"command": ["playlist-play-index", 0]}),
                    target: VideoTarget::AllPorts,
                },
            ]
        );
        // The black screen stays frozen: no unpause broadcast.
    }

    #[tokio::test(start_paused = true)]
    async fn pause_twice_issues_sequence_once() {
        let (engine, log) = engine_with(vec![]);
        engine.pause().await;
        engine.pause().await;
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_then_resume_leaves_running() {
        let (engine, log) = engine_with(vec![]);
        engine.pause().await;
        engine.resume().await;

        assert!(engine.is_running().await);
        let sent = log.lock().unwrap();
        assert_eq!(*sent.last().unwrap(), audio(audio_addr::TRACK1_MUTE, &[AudioArg::Int(0)]));
        // Still no unpause for the black-screen track anywhere.
        assert!(!sent.iter().any(|s| matches!(
            s,
            Sent::Video { payload, .. } if payload["command"][0] == "set_property"
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn resume_while_running_is_a_no_op() {
        let (engine, log) = engine_with(vec![]);
        engine.resume().await;
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_job_fires_only_on_matching_weekday() {
        let (engine, log) = engine_with(vec![track("intro", 1, None)]);
        // 2024-01-01 is a Monday; register relative to the Sunday before.
        let sunday = local(2023, 12, 31, 9, 0, 0);
        {
            let mut inner = engine.inner.lock().await;
            inner
                .jobs
                .push(Job::recurring("intro", monday_spec(10, 0, 0), &sunday).unwrap());
        }

        // Job was registered on Sunday, so the first occurrence is Monday.
        engine.fire_due(local(2024, 1, 1, 10, 0, 0)).await;
        assert_eq!(log.lock().unwrap().len(), 3);

        // Tuesday 10:00:00 does not match: next fire is the following Monday.
        engine.fire_due(local(2024, 1, 2, 10, 0, 0)).await;
        assert_eq!(log.lock().unwrap().len(), 3);

        engine.fire_due(local(2024, 1, 8, 10, 0, 0)).await;
        assert_eq!(log.lock().unwrap().len(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_job_skipped_while_paused_but_rescheduled() {
        let (engine, log) = engine_with(vec![track("intro", 1, None)]);
        let sunday = local(2023, 12, 31, 9, 0, 0);
        {
            let mut inner = engine.inner.lock().await;
            inner
                .jobs
                .push(Job::recurring("intro", monday_spec(10, 0, 0), &sunday).unwrap());
        }

        engine.pause().await;
        let pause_sends = log.lock().unwrap().len();

        engine.fire_due(local(2024, 1, 1, 10, 0, 0)).await;
        // No play commands went out, and the job still has a next occurrence.
        assert_eq!(log.lock().unwrap().len(), pause_sends);
        let next = engine.upcoming(10).await;
        assert_eq!(next[0].0, local(2024, 1, 8, 10, 0, 0));

        // After resuming, the rescheduled occurrence fires normally.
        engine.resume().await;
        engine.fire_due(local(2024, 1, 8, 10, 0, 0)).await;
        assert!(log.lock().unwrap().len() > pause_sends + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_exactly_once() {
        let (engine, log) = engine_with(vec![track("intro", 1, None)]);
        let base = Local::now();
        engine.schedule_one_shot("intro", 5).await.unwrap();

        engine.fire_due(base + chrono::Duration::seconds(6)).await;
        assert_eq!(log.lock().unwrap().len(), 3);
        assert!(engine.upcoming(10).await.is_empty());

        engine.fire_due(base + chrono::Duration::seconds(16)).await;
        assert_eq!(log.lock().unwrap().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_for_unknown_track_is_rejected() {
        let (engine, _log) = engine_with(vec![track("intro", 1, None)]);
        assert!(engine.schedule_one_shot("ghost", 5).await.is_err());
        assert!(engine.upcoming(10).await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn upcoming_sorts_limits_and_drops_unresolvable() {
        let (engine, _log) = engine_with(vec![
            track("a", 1, None),
            track("b", 2, None),
            track("c", 3, None),
            track("d", 4, None),
            track("e", 5, None),
        ]);
        let base = local(2024, 1, 1, 9, 0, 0);
        {
            let mut inner = engine.inner.lock().await;
            // Registered out of order on purpose; "ghost" is not in the catalog.
            for (track_id, secs) in [("c", 30), ("a", 10), ("ghost", 15), ("e", 50), ("b", 20), ("d", 40)] {
                inner
                    .jobs
                    .push(Job::one_shot(track_id, base + chrono::Duration::seconds(secs)));
            }
        }

        let next = engine.upcoming(3).await;
        let titles: Vec<&str> = next.iter().map(|(_, title)| title.as_str()).collect();
        assert_eq!(titles, vec!["Title of a", "Title of b", "Title of c"]);
        assert!(next.windows(2).all(|w| w[0].0 <= w[1].0));
    }

    #[tokio::test(start_paused = true)]
    async fn load_schedule_drops_past_one_shots() {
        let (engine, _log) = engine_with(vec![track("intro", 1, None)]);
        let past = Local::now() - chrono::Duration::hours(1);
        let future = Local::now() + chrono::Duration::hours(1);
        engine
            .load_schedule(vec![
                ScheduleEntry {
                    command: crate::sched::CommandKind::Play,
                    track_id: "intro".into(),
                    trigger: Trigger::At(past),
                },
                ScheduleEntry {
                    command: crate::sched::CommandKind::Play,
                    track_id: "intro".into(),
                    trigger: Trigger::At(future),
                },
            ])
            .await;
        assert_eq!(engine.upcoming(10).await.len(), 1);
    }
}
