// Output parsers - pure functions over single lines of tool output
//
// yt-dlp and ffmpeg only talk to us through text. Everything here takes one
// line (trailing CR already stripped) and extracts one kind of signal.

use lazy_static::lazy_static;
use regex::Regex;

use super::models::Phase;

lazy_static! {
    static ref PLAYLIST_NAMED_RE: Regex = Regex::new(
        r"(?i)downloading\s+(?:item|video|entry|episode|chapter)\s+(\d+)\s+of\s+(\d+)"
    )
    .unwrap();
    static ref PLAYLIST_GENERIC_RE: Regex =
        Regex::new(r"(?i)downloading\s+(\d+)\s+of\s+(\d+)").unwrap();
    static ref MERGE_TARGET_RE: Regex =
        Regex::new(r#"(?i)merging formats into\s+"(.+)"\s*$"#).unwrap();
    static ref DESTINATION_RE: Regex = Regex::new(
        r"(?i)^\[(?:download|extractaudio|videoremuxer|videoconvertor)\].*?destination:\s*(.+?)\s*$"
    )
    .unwrap();
    static ref ALREADY_DOWNLOADED_RE: Regex =
        Regex::new(r"^\[download\]\s+(.+?) has already been downloaded").unwrap();
}

/// Last well-formed percentage on the line, rounded and clamped to [0, 100].
///
/// Lines like `[download] 45.5% of 10MiB ... (33%)` carry several
/// percent-looking tokens; the last one that parses wins.
pub fn parse_progress_percent(line: &str) -> Option<u8> {
    let bytes = line.as_bytes();
    let mut found = None;

    for (percent_pos, _) in line.match_indices('%') {
        let mut start = percent_pos;
        while start > 0 && (bytes[start - 1].is_ascii_digit() || bytes[start - 1] == b'.') {
            start -= 1;
        }
        if start == percent_pos {
            continue;
        }
        // digits and dots are ASCII, so both ends sit on char boundaries
        if let Ok(value) = line[start..percent_pos].parse::<f64>() {
            if value.is_finite() {
                found = Some(value.round().clamp(0.0, 100.0) as u8);
            }
        }
    }

    found
}

/// `(current, total)` from "Downloading item N of M" style lines.
pub fn parse_playlist_position(line: &str) -> Option<(u32, u32)> {
    let caps = PLAYLIST_NAMED_RE
        .captures(line)
        .or_else(|| PLAYLIST_GENERIC_RE.captures(line))?;

    let current: u32 = caps.get(1)?.as_str().parse().ok()?;
    let total: u32 = caps.get(2)?.as_str().parse().ok()?;
    if current == 0 || total == 0 || current > total {
        return None;
    }
    Some((current, total))
}

/// A `[download]` line that carries a percentage.
pub fn is_download_progress_line(line: &str) -> bool {
    line.contains("[download]") && parse_progress_percent(line).is_some()
}

/// Phase implied by the line, `None` when the line says nothing about it.
pub fn detect_phase(line: &str) -> Option<Phase> {
    let lower = line.to_lowercase();

    if lower.contains("[merger]") || lower.contains("merging formats into") {
        return Some(Phase::Merging);
    }

    if lower.contains("[extractaudio]")
        || lower.contains("[videoremuxer]")
        || lower.contains("[videoconvertor]")
        || lower.contains("remuxing video")
    {
        return Some(Phase::Converting);
    }

    if is_download_progress_line(line) {
        return Some(Phase::Downloading);
    }

    None
}

/// Whether a failed batch of output points at the ffmpeg hwaccel flags.
pub fn is_hwaccel_failure<S: AsRef<str>>(lines: &[S]) -> bool {
    lines.iter().any(|line| {
        let lower = line.as_ref().to_lowercase();
        lower.contains("option hwaccel")
            || (lower.contains("cannot be applied to output url") && lower.contains("hwaccel"))
            || (lower.contains("invalid argument")
                && lower.contains("error opening output")
                && lower.contains("postprocessing"))
    })
}

/// ffmpeg run directly: the signatures above plus its own init failures.
pub fn is_ffmpeg_hwaccel_failure<S: AsRef<str>>(lines: &[S]) -> bool {
    is_hwaccel_failure(lines)
        || lines.iter().any(|line| {
            let lower = line.as_ref().to_lowercase();
            lower.contains("hwaccel initialisation returned error")
                || lower.contains("failed setup for format")
                || lower.contains("device creation failed")
        })
}

/// File a yt-dlp step announces it is writing: a download destination, the
/// merger's target or a post-processor's output. The last one seen in an
/// attempt is where the media ended up.
pub fn parse_output_path(line: &str) -> Option<&str> {
    let line = line.trim();
    let caps = MERGE_TARGET_RE
        .captures(line)
        .or_else(|| DESTINATION_RE.captures(line))
        .or_else(|| ALREADY_DOWNLOADED_RE.captures(line))?;
    let path = caps.get(1)?.as_str().trim();
    if path.is_empty() {
        None
    } else {
        Some(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_last_match_wins() {
        let line = "download 45.5% of 10MiB at 1.2MiB/s ETA 00:10 (33%)";
        assert_eq!(parse_progress_percent(line), Some(33));
    }

    #[test]
    fn test_progress_no_percent() {
        assert_eq!(parse_progress_percent("[youtube] Extracting URL"), None);
        assert_eq!(parse_progress_percent("100 % done"), None);
    }

    #[test]
    fn test_progress_rounding_and_clamp() {
        assert_eq!(parse_progress_percent("[download]  12.5% of 3MiB"), Some(13));
        assert_eq!(parse_progress_percent("[download] 100.0% of 3MiB"), Some(100));
        assert_eq!(parse_progress_percent("weird 250%"), Some(100));
    }

    #[test]
    fn test_progress_skips_unparsable_token() {
        assert_eq!(parse_progress_percent("v1.2.3% then 7%"), Some(7));
        assert_eq!(parse_progress_percent("40% then 1.2.3%"), Some(40));
    }

    #[test]
    fn test_playlist_named_pattern() {
        assert_eq!(
            parse_playlist_position("[download] Downloading item 3 of 12"),
            Some((3, 12))
        );
        assert_eq!(parse_playlist_position("Downloading video 1 of 1"), Some((1, 1)));
        assert_eq!(
            parse_playlist_position("[download] DOWNLOADING EPISODE 2 of 5"),
            Some((2, 5))
        );
    }

    #[test]
    fn test_playlist_generic_pattern() {
        assert_eq!(parse_playlist_position("Downloading 4 of 9"), Some((4, 9)));
    }

    #[test]
    fn test_playlist_rejects_invalid_positions() {
        assert_eq!(parse_playlist_position("Downloading item 5 of 3"), None);
        assert_eq!(parse_playlist_position("Downloading item 0 of 3"), None);
        assert_eq!(parse_playlist_position("Downloading webpage"), None);
    }

    #[test]
    fn test_phase_markers() {
        assert_eq!(
            detect_phase("[Merger] Merging formats into \"clip.mp4\""),
            Some(Phase::Merging)
        );
        assert_eq!(
            detect_phase("[ExtractAudio] Destination: song.mp3"),
            Some(Phase::Converting)
        );
        assert_eq!(
            detect_phase("[VideoRemuxer] Remuxing video from webm to mkv"),
            Some(Phase::Converting)
        );
        assert_eq!(detect_phase("[download]  50.0% of 3MiB"), Some(Phase::Downloading));
        assert_eq!(detect_phase("[download] Destination: clip.f137.mp4"), None);
        assert_eq!(detect_phase("[info] Available formats"), None);
    }

    #[test]
    fn test_hwaccel_failure_signatures() {
        assert!(is_hwaccel_failure(&["Unrecognized option hwaccel"]));
        assert!(is_hwaccel_failure(&[
            "Option hwaccel (use HW accelerated decoding) cannot be applied to output url out.mp4"
        ]));
        assert!(is_hwaccel_failure(&[
            "ERROR: Postprocessing: Error opening output files: Invalid argument"
        ]));
        assert!(!is_hwaccel_failure(&["ERROR: HTTP Error 403: Forbidden"]));
        assert!(!is_hwaccel_failure::<&str>(&[]));
    }

    #[test]
    fn test_ffmpeg_hwaccel_failure_signatures() {
        assert!(is_ffmpeg_hwaccel_failure(&[
            "[AVHWDeviceContext] Failed setup for format cuda: hwaccel initialisation returned error."
        ]));
        assert!(!is_ffmpeg_hwaccel_failure(&["Conversion failed!"]));
    }

    #[test]
    fn test_output_path_announcements() {
        assert_eq!(
            parse_output_path("[Merger] Merging formats into \"/tmp/out/My \"clip\".mp4\""),
            Some("/tmp/out/My \"clip\".mp4")
        );
        assert_eq!(
            parse_output_path("[download] Destination: /tmp/out/clip.f137.mp4"),
            Some("/tmp/out/clip.f137.mp4")
        );
        assert_eq!(
            parse_output_path("[ExtractAudio] Destination: /tmp/out/song.mp3"),
            Some("/tmp/out/song.mp3")
        );
        assert_eq!(
            parse_output_path(
                "[VideoRemuxer] Remuxing video from webm to mkv; Destination: /tmp/out/clip.mkv"
            ),
            Some("/tmp/out/clip.mkv")
        );
        assert_eq!(
            parse_output_path("[download] /tmp/out/clip.mp4 has already been downloaded"),
            Some("/tmp/out/clip.mp4")
        );
        assert_eq!(parse_output_path("[download] Destination:   "), None);
        assert_eq!(parse_output_path("[download]  5.0% of 10MiB"), None);
    }
}
