//! Output formatting for notifications and identity lists.

use anyhow::Result;
use owo_colors::OwoColorize;
use serde::Serialize;
use time::OffsetDateTime;

use relink_core::{DisconnectReason, Notification};
use relink_types::DeviceId;

/// A notification stamped with the time it was printed.
#[derive(Serialize)]
struct StampedNotification<'a> {
    #[serde(with = "time::serde::rfc3339")]
    timestamp: OffsetDateTime,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// One JSON object per line.
pub fn format_notification_json(
    notification: &Notification,
    at: OffsetDateTime,
) -> Result<String> {
    let stamped = StampedNotification {
        timestamp: at,
        notification,
    };
    Ok(serde_json::to_string(&stamped)?)
}

pub fn format_notification_text(
    notification: &Notification,
    at: OffsetDateTime,
    no_color: bool,
) -> String {
    let clock = format!("{:02}:{:02}:{:02}", at.hour(), at.minute(), at.second());
    let (tag, detail) = describe(notification);
    let label = notification
        .device()
        .map(|d| format!("{} ({}) ", d.display_name(), d.id))
        .unwrap_or_default();

    if no_color {
        return format!("{} {:<14} {}{}", clock, tag, label, detail);
    }
    let tag = format!("{:<14}", tag);
    let tag = match notification {
        Notification::Connected { .. } => tag.green().to_string(),
        Notification::Disconnected { retry: true, .. } => tag.yellow().to_string(),
        Notification::Disconnected { .. } | Notification::ConnectFailed { .. } => {
            tag.red().to_string()
        }
        Notification::PowerChanged { .. } => tag.cyan().to_string(),
        _ => tag,
    };
    format!("{} {} {}{}", clock.dimmed(), tag, label, detail)
}

fn describe(notification: &Notification) -> (&'static str, String) {
    match notification {
        Notification::Discovered { rssi, .. } => (
            "discovered",
            rssi.map(|r| format!("{} dBm", r)).unwrap_or_default(),
        ),
        Notification::WillConnect { .. } => ("connecting", String::new()),
        Notification::Connected { .. } => ("connected", String::new()),
        Notification::Disconnected { retry, reason, .. } => {
            let next = if *retry { ", reconnecting" } else { "" };
            ("disconnected", format!("{}{}", reason_text(reason), next))
        }
        Notification::ConnectFailed {
            error,
            attempt,
            will_retry,
            ..
        } => {
            let next = if *will_retry { ", retrying" } else { ", giving up" };
            (
                "connect-failed",
                format!("attempt {}: {}{}", attempt, error, next),
            )
        }
        Notification::PowerChanged { state } => ("power", state.to_string()),
        _ => ("event", String::new()),
    }
}

fn reason_text(reason: &DisconnectReason) -> String {
    match reason {
        DisconnectReason::UserRequested => "requested".to_string(),
        DisconnectReason::LinkLost => "link lost".to_string(),
        DisconnectReason::AdapterPoweredOff => "adapter powered off".to_string(),
        DisconnectReason::BleError(error) => error.clone(),
        _ => "unknown".to_string(),
    }
}

pub fn format_identities_text(ids: &[DeviceId]) -> String {
    if ids.is_empty() {
        return "No remembered identities.\n".to_string();
    }
    let mut out = String::new();
    for id in ids {
        out.push_str(id.as_str());
        out.push('\n');
    }
    out
}

pub fn format_identities_json(ids: &[DeviceId]) -> Result<String> {
    Ok(serde_json::to_string_pretty(ids)? + "\n")
}

/// Format a success message.
pub fn format_success(message: &str, no_color: bool) -> String {
    if no_color {
        format!("[OK] {}", message)
    } else {
        format!("{} {}", "[OK]".green(), message)
    }
}
