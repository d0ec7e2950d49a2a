use std::time::Duration;

use stashbot_transfer::{Direction, ProgressEvent, TransferState};

/// Cells in a rendered progress bar.
const BAR_CELLS: usize = 10;

/// Converts a byte count to a human-readable size.
pub fn human_bytes(size: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];
    if size < 1024 {
        return format!("{size} B");
    }
    let mut value = size as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.2} {}", UNITS[unit])
}

/// Formats seconds as `MM:SS`, or `HH:MM:SS` once hours are involved.
pub fn format_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Renders a fixed-width progress bar for a percentage in `[0, 100]`.
pub fn progress_bar(percentage: f64) -> String {
    let clamped = percentage.clamp(0.0, 100.0);
    let filled = ((clamped / 100.0) * BAR_CELLS as f64).floor() as usize;
    let mut bar = String::with_capacity(BAR_CELLS + 2);
    bar.push('[');
    for i in 0..BAR_CELLS {
        bar.push(if i < filled { '█' } else { '○' });
    }
    bar.push(']');
    bar
}

fn verb(direction: Direction) -> &'static str {
    match direction {
        Direction::Upload => "Uploading",
        Direction::Download => "Downloading",
    }
}

/// Renders an in-flight progress update in the bot's message style.
///
/// With an unknown total there is no bar or ETA, just the running count.
pub fn render_progress(
    direction: Direction,
    event: &ProgressEvent,
    speed_bps: f64,
    eta: Option<Duration>,
) -> String {
    let mut text = format!("**{}...**\n", verb(direction));

    match event.total_bytes {
        Some(total) if total > 0 => {
            let percentage = (event.transferred_bytes as f64 / total as f64) * 100.0;
            text.push_str(&format!("{} {percentage:.2}%\n", progress_bar(percentage)));
            text.push_str(&format!("**Total:** {}\n", human_bytes(total)));
        }
        _ => {}
    }
    text.push_str(&format!(
        "**Done:** {}",
        human_bytes(event.transferred_bytes)
    ));
    if speed_bps > 0.0 {
        text.push_str(&format!("\n**Speed:** {}/s", human_bytes(speed_bps as u64)));
    }
    if let Some(eta) = eta {
        text.push_str(&format!("\n**ETA:** {}", format_duration(eta)));
    }
    text
}

/// Renders the terminal message for a finished transfer.
pub fn render_result(direction: Direction, key: &str, event: &ProgressEvent) -> String {
    let noun = match direction {
        Direction::Upload => "Upload",
        Direction::Download => "Download",
    };
    match event.state {
        TransferState::Completed => format!(
            "✅ **{noun} complete**\n**File:** `{key}`\n**Size:** {}",
            human_bytes(event.transferred_bytes)
        ),
        TransferState::Failed => format!("❌ **{noun} failed**\n**File:** `{key}`"),
        TransferState::Cancelled => format!("🚫 **{noun} cancelled**\n**File:** `{key}`"),
        // Non-terminal states never reach this function.
        _ => format!("**{noun}:** `{key}`"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stashbot_transfer::TaskId;

    fn event(state: TransferState, transferred: u64, total: Option<u64>) -> ProgressEvent {
        ProgressEvent {
            task_id: TaskId::new(),
            state,
            transferred_bytes: transferred,
            total_bytes: total,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(0), "0 B");
        assert_eq!(human_bytes(500), "500 B");
        assert_eq!(human_bytes(1024), "1.00 KB");
        assert_eq!(human_bytes(5 * 1024 * 1024), "5.00 MB");
        assert_eq!(human_bytes(11_534_336), "11.00 MB");
        assert_eq!(human_bytes(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn duration_formats() {
        assert_eq!(format_duration(Duration::from_secs(0)), "00:00");
        assert_eq!(format_duration(Duration::from_secs(59)), "00:59");
        assert_eq!(format_duration(Duration::from_secs(125)), "02:05");
        assert_eq!(format_duration(Duration::from_secs(3725)), "01:02:05");
    }

    #[test]
    fn bar_fills_proportionally() {
        assert_eq!(progress_bar(0.0), "[○○○○○○○○○○]");
        assert_eq!(progress_bar(50.0), "[█████○○○○○]");
        assert_eq!(progress_bar(100.0), "[██████████]");
        // Out-of-range input is clamped.
        assert_eq!(progress_bar(250.0), "[██████████]");
        assert_eq!(progress_bar(-5.0), "[○○○○○○○○○○]");
    }

    #[test]
    fn progress_with_known_total() {
        let e = event(TransferState::Active, 5 * 1024 * 1024, Some(10 * 1024 * 1024));
        let text = render_progress(Direction::Upload, &e, 1024.0 * 1024.0, Some(Duration::from_secs(5)));

        assert!(text.starts_with("**Uploading...**"));
        assert!(text.contains("50.00%"));
        assert!(text.contains("**Total:** 10.00 MB"));
        assert!(text.contains("**Done:** 5.00 MB"));
        assert!(text.contains("**Speed:** 1.00 MB/s"));
        assert!(text.contains("**ETA:** 00:05"));
    }

    #[test]
    fn progress_with_unknown_total_has_no_bar() {
        let e = event(TransferState::Active, 2048, None);
        let text = render_progress(Direction::Download, &e, 0.0, None);

        assert!(text.starts_with("**Downloading...**"));
        assert!(!text.contains('%'));
        assert!(!text.contains("ETA"));
        assert!(text.contains("**Done:** 2.00 KB"));
    }

    #[test]
    fn result_messages_per_terminal_state() {
        let done = event(TransferState::Completed, 11_534_336, Some(11_534_336));
        let text = render_result(Direction::Upload, "users/7/movie.mkv", &done);
        assert!(text.contains("✅"));
        assert!(text.contains("`users/7/movie.mkv`"));
        assert!(text.contains("11.00 MB"));

        let failed = event(TransferState::Failed, 0, None);
        assert!(render_result(Direction::Download, "k", &failed).contains("❌"));

        let cancelled = event(TransferState::Cancelled, 0, None);
        assert!(render_result(Direction::Upload, "k", &cancelled).contains("🚫"));
    }
}
