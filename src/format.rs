use chrono::{DateTime, FixedOffset};
use teloxide::utils::html;

use crate::event::BrokerEvent;

/// Render a broker event as the HTML notification body sent to subscribers.
pub fn render_notification(event: &BrokerEvent) -> String {
    format!(
        "<blockquote><b>🕛 Timestamp:</b> {}\n<b>🗨️ Message:</b> {}</blockquote>",
        render_timestamp(&event.timestamp),
        html::escape(&event.message.to_string()),
    )
}

/// `HH:MM:SS.mmm DD.MM.YYYY ZONE`, where ZONE is `UTC` or a `±HHMM` offset.
pub fn render_timestamp(timestamp: &DateTime<FixedOffset>) -> String {
    let zone = if timestamp.offset().local_minus_utc() == 0 {
        "UTC".to_string()
    } else {
        timestamp.format("%z").to_string()
    };
    format!("{} {}", timestamp.format("%H:%M:%S%.3f %d.%m.%Y"), zone)
}
