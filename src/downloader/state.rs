// Per-run execution state, fed one output line at a time

use std::path::PathBuf;

use super::events::EngineEvent;
use super::models::Phase;
use super::parsers;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaylistState {
    pub current: u32,
    pub total: u32,
    /// Progress of the current item, 0-100
    pub item_progress: u8,
}

impl Default for PlaylistState {
    fn default() -> Self {
        Self {
            current: 1,
            total: 1,
            item_progress: 0,
        }
    }
}

impl PlaylistState {
    /// `round((completed * 100 + item) / total)` clamped to [0, 100].
    pub fn overall_progress(&self) -> u8 {
        overall_progress(self.current.saturating_sub(1), self.total, self.item_progress)
    }
}

pub fn overall_progress(completed_items: u32, total_items: u32, item_progress: u8) -> u8 {
    let total = total_items.max(1) as f64;
    let value = (completed_items as f64 * 100.0 + item_progress as f64) / total;
    value.round().clamp(0.0, 100.0) as u8
}

#[derive(Debug, Default)]
pub struct ExecutionState {
    pub phase: Phase,
    pub is_playlist: bool,
    pub playlist: PlaylistState,
    pub last_progress: u8,
    pub final_path: Option<PathBuf>,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start of a new attempt. Emits nothing: the run's visible progress and
    /// phase belong to the caller.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Feed one line, pushing any events it causes onto `out`.
    pub fn ingest(&mut self, line: &str, out: &mut Vec<EngineEvent>) {
        if let Some(path) = parsers::parse_output_path(line) {
            self.final_path = Some(PathBuf::from(path));
        }

        if let Some((current, total)) = parsers::parse_playlist_position(line) {
            let changed = !self.is_playlist
                || self.playlist.current != current
                || self.playlist.total != total;
            if changed {
                self.is_playlist = true;
                self.playlist = PlaylistState {
                    current,
                    total,
                    item_progress: 0,
                };
                out.push(EngineEvent::Playlist { current, total });
                self.publish_progress(out);
            }
        }

        if let Some(phase) = parsers::detect_phase(line) {
            if phase != self.phase {
                self.phase = phase;
                out.push(EngineEvent::Phase(phase));
            }
        }

        if parsers::is_download_progress_line(line) {
            if let Some(percent) = parsers::parse_progress_percent(line) {
                self.playlist.item_progress = percent;
                self.publish_progress(out);
            }
        }
    }

    /// Emits the overall value when it moved forward.
    fn publish_progress(&mut self, out: &mut Vec<EngineEvent>) {
        let overall = self.playlist.overall_progress();
        if overall > self.last_progress {
            self.last_progress = overall;
            out.push(EngineEvent::Progress(overall));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut ExecutionState, lines: &[&str]) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        for line in lines {
            state.ingest(line, &mut out);
        }
        out
    }

    #[test]
    fn test_overall_progress_formula() {
        assert_eq!(overall_progress(2, 5, 50), 50);
        assert_eq!(overall_progress(0, 1, 73), 73);
        assert_eq!(overall_progress(4, 4, 100), 100);
        assert_eq!(overall_progress(0, 0, 40), 40);
    }

    #[test]
    fn test_single_video_progress_and_phases() {
        let mut state = ExecutionState::new();
        let events = feed(
            &mut state,
            &[
                "[youtube] abc: Downloading webpage",
                "[download]  10.0% of 5MiB",
                "[download]  10.2% of 5MiB",
                "[download]  60.0% of 5MiB",
                "[Merger] Merging formats into \"/tmp/clip.mp4\"",
                "Deleting original file /tmp/clip.f251.webm (pass -k to keep)",
            ],
        );
        assert_eq!(
            events,
            vec![
                EngineEvent::Progress(10),
                EngineEvent::Progress(60),
                EngineEvent::Phase(Phase::Merging),
            ]
        );
        assert_eq!(state.final_path, Some(PathBuf::from("/tmp/clip.mp4")));
    }

    #[test]
    fn test_progress_never_goes_backwards_within_attempt() {
        let mut state = ExecutionState::new();
        let events = feed(
            &mut state,
            &[
                "[download] 100% of 5MiB",
                "[download] Destination: clip.f251.webm",
                "[download]   3.0% of 1MiB",
            ],
        );
        assert_eq!(events, vec![EngineEvent::Progress(100)]);
        assert_eq!(state.last_progress, 100);
    }

    #[test]
    fn test_playlist_progress_combines_items() {
        let mut state = ExecutionState::new();
        let events = feed(
            &mut state,
            &[
                "[download] Downloading item 3 of 5",
                "[download]  50.0% of 2MiB",
            ],
        );
        assert_eq!(
            events,
            vec![
                EngineEvent::Playlist { current: 3, total: 5 },
                EngineEvent::Progress(40),
                EngineEvent::Progress(50),
            ]
        );
        assert!(state.is_playlist);
    }

    #[test]
    fn test_single_item_playlist_matches_item_progress() {
        let mut state = ExecutionState::new();
        let events = feed(
            &mut state,
            &["Downloading video 1 of 1", "[download]  42.0% of 2MiB"],
        );
        assert_eq!(
            events,
            vec![
                EngineEvent::Playlist { current: 1, total: 1 },
                EngineEvent::Progress(42),
            ]
        );
    }

    #[test]
    fn test_phase_resets_to_downloading_on_progress() {
        let mut state = ExecutionState::new();
        let events = feed(
            &mut state,
            &[
                "[download] Downloading item 1 of 2",
                "[download] 100% of 2MiB",
                "[Merger] Merging formats into \"a.mp4\"",
                "[download] Downloading item 2 of 2",
                "[download]  20.0% of 2MiB",
            ],
        );
        assert_eq!(
            events,
            vec![
                EngineEvent::Playlist { current: 1, total: 2 },
                EngineEvent::Progress(50),
                EngineEvent::Phase(Phase::Merging),
                EngineEvent::Playlist { current: 2, total: 2 },
                EngineEvent::Phase(Phase::Downloading),
                EngineEvent::Progress(60),
            ]
        );
    }

    #[test]
    fn test_reset_restarts_attempt_state() {
        let mut state = ExecutionState::new();
        feed(
            &mut state,
            &[
                "[download] Destination: /tmp/clip.f137.mp4",
                "[download]  80.0% of 2MiB",
                "[Merger] Merging formats into \"/tmp/clip.mp4\"",
            ],
        );
        state.reset();
        assert_eq!(state.last_progress, 0);
        assert_eq!(state.phase, Phase::Downloading);
        assert_eq!(state.final_path, None);

        let events = feed(&mut state, &["[download]  30.0% of 2MiB"]);
        assert_eq!(events, vec![EngineEvent::Progress(30)]);
    }
}
