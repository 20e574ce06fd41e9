//! Output formatting utilities for the CLI
//!
//! Tables for saved shortcuts and colored status lines. Status lines for
//! failures go to stderr so they never mix with an editor's own output.

use tabled::{
    settings::{Style, Width},
    Table, Tabled,
};

use rc_core::{LatestSessionPointer, ShortcutEntry};

/// Format saved shortcuts as a table, or a hint when there are none
pub fn format_shortcuts(shortcuts: &[ShortcutEntry]) -> String {
    if shortcuts.is_empty() {
        return "No shortcuts saved (use --shortcut-name NAME when opening a path)".to_string();
    }

    #[derive(Tabled)]
    struct ShortcutRow {
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "HOST")]
        host: String,
        #[tabled(rename = "PATH")]
        path: String,
    }

    let rows: Vec<ShortcutRow> = shortcuts
        .iter()
        .map(|s| ShortcutRow {
            name: s.name.clone(),
            host: s.host.clone(),
            path: if s.path.is_empty() {
                "-".to_string()
            } else {
                s.path.clone()
            },
        })
        .collect();

    Table::new(rows)
        .with(Style::rounded())
        .with(Width::wrap(100))
        .to_string()
}

/// One line describing the latest pointer
pub fn format_latest(latest: &LatestSessionPointer, now_millis: u64) -> String {
    let age = format_duration(now_millis.saturating_sub(latest.timestamp) / 1000);
    match &latest.path {
        Some(path) => format!("Latest: {}:{} ({} ago)", latest.host, path, age),
        None => format!("Latest: {} ({} ago)", latest.host, age),
    }
}

/// Format duration in human-readable form
fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Green),
        Print("✓ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an error message in red with an X prefix, to stderr
pub fn print_error(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Red),
        Print("✗ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a warning message in yellow, to stderr
pub fn print_warning(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stderr = std::io::stderr();
    let _ = crossterm::execute!(
        stderr,
        SetForegroundColor(Color::Yellow),
        Print("⚠ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print an informational message in cyan
pub fn print_info(msg: &str) {
    use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};

    let mut stdout = std::io::stdout();
    let _ = crossterm::execute!(
        stdout,
        SetForegroundColor(Color::Cyan),
        Print("ℹ "),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_shortcuts_table() {
        let table = format_shortcuts(&[
            ShortcutEntry {
                name: "abc".into(),
                host: "myhost".into(),
                path: "/srv/project".into(),
            },
            ShortcutEntry {
                name: "empty".into(),
                host: "local".into(),
                path: String::new(),
            },
        ]);
        assert!(table.contains("NAME"));
        assert!(table.contains("abc"));
        assert!(table.contains("/srv/project"));
        assert!(table.contains("-"));
    }

    #[test]
    fn test_format_shortcuts_empty() {
        assert!(format_shortcuts(&[]).starts_with("No shortcuts saved"));
    }

    #[test]
    fn test_format_latest() {
        let latest = LatestSessionPointer {
            host: "myhost".into(),
            timestamp: 1_000_000,
            path: Some("/srv".into()),
        };
        assert_eq!(
            format_latest(&latest, 1_000_000 + 125_000),
            "Latest: myhost:/srv (2m 5s ago)"
        );

        let latest = LatestSessionPointer { path: None, ..latest };
        assert_eq!(format_latest(&latest, 1_000_000), "Latest: myhost (0s ago)");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(59), "59s");
        assert_eq!(format_duration(3661), "1h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }
}
