//! Output formatting for CLI

use feedreel_core::{EventRecord, Notice, SessionEvent};
use serde::Serialize;

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
}

impl From<&str> for OutputFormat {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => OutputFormat::Json,
            _ => OutputFormat::Text,
        }
    }
}

/// Print a serializable value as one JSON line
pub fn print_json<T: Serialize>(data: &T) {
    match serde_json::to_string(data) {
        Ok(json) => println!("{}", json),
        Err(e) => eprintln!("Error: failed to serialize output: {}", e),
    }
}

/// Render one session event
pub fn print_event(record: &EventRecord, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(record);
        return;
    }

    let time = record.timestamp.format("%H:%M:%S");
    let line = match &record.event {
        SessionEvent::CatalogLoaded {
            entries,
            from_cache,
        } => format!(
            "catalog: {} entries{}",
            entries,
            if *from_cache { " (cached)" } else { "" }
        ),
        SessionEvent::StatusChanged { from, to, index } => {
            format!("status: {} -> {} [{}]", from, to, index)
        }
        SessionEvent::IndexChanged {
            index,
            id,
            direction,
        } => format!("select: #{} [{}] ({})", id, index, direction),
        SessionEvent::Preloading { index, url } => format!("preload: [{}] {}", index, url),
        SessionEvent::Blacklisted { url } => format!("blacklisted: {}", url),
        SessionEvent::Notice(notice) => format!("{} {}", notice_marker(notice), notice),
        // Nothing to draw in a scrolling log
        SessionEvent::NoticeDismissed => return,
        SessionEvent::MuteChanged { muted } => format!("muted: {}", muted),
    };
    println!("{}  {}", time, line);
}

fn notice_marker(notice: &Notice) -> &'static str {
    if notice.is_sticky() {
        "!!"
    } else {
        " !"
    }
}
