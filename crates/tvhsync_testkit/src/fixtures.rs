//! Record builders and small helpers shared by tests.
//!
//! Builders return bare records as a server stores them. Wrap one with
//! [`pushed`] to send it as a live push.

use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::io::Cursor;
use tvhsync_protocol::{HtspMessage, Value};

/// Fixed "now" used by test clocks.
pub const NOW: i64 = 1_700_000_000;

/// A channel record.
pub fn channel(id: u32, name: &str, number: i64) -> HtspMessage {
    HtspMessage::new()
        .with("channelId", id)
        .with("channelName", name)
        .with("channelNumber", number)
}

/// A channel record with an icon reference.
pub fn channel_with_icon(id: u32, name: &str, number: i64, icon: &str) -> HtspMessage {
    channel(id, name, number).with("channelIcon", icon)
}

/// A channel record pointing at its current and next event.
pub fn channel_with_events(id: u32, name: &str, number: i64, event: u32, next: u32) -> HtspMessage {
    channel(id, name, number)
        .with("eventId", event)
        .with("nextEventId", next)
}

/// A tag record with its member channels.
pub fn tag(id: u32, name: &str, members: &[u32]) -> HtspMessage {
    let members: Vec<Value> = members.iter().map(|&m| Value::from(m)).collect();
    HtspMessage::new()
        .with("tagId", id)
        .with("tagName", name)
        .with("members", members)
}

/// An EPG event record. `next` of 0 ends the chain.
pub fn event(id: u32, channel: u32, start: i64, stop: i64, title: &str, next: u32) -> HtspMessage {
    let msg = HtspMessage::new()
        .with("eventId", id)
        .with("channelId", channel)
        .with("start", start)
        .with("stop", stop)
        .with("title", title);
    if next == 0 {
        msg
    } else {
        msg.with("nextEventId", next)
    }
}

/// `count` chained events on one channel, one hour each, starting at
/// `start`.
pub fn event_chain(channel: u32, first_id: u32, start: i64, count: u32) -> Vec<HtspMessage> {
    (0..count)
        .map(|i| {
            let id = first_id + i;
            let next = if i + 1 < count { id + 1 } else { 0 };
            let begin = start + i64::from(i) * 3600;
            event(id, channel, begin, begin + 3600, &format!("Show {id}"), next)
        })
        .collect()
}

/// A recording record.
pub fn recording(id: u32, channel: u32, title: &str, state: &str) -> HtspMessage {
    HtspMessage::new()
        .with("id", id)
        .with("channel", channel)
        .with("title", title)
        .with("state", state)
        .with("start", NOW + 3600)
        .with("stop", NOW + 7200)
}

/// A series recording rule.
pub fn autorec(id: &str, title: &str) -> HtspMessage {
    HtspMessage::new()
        .with("id", id)
        .with("title", title)
        .with("enabled", true)
}

/// A timer recording rule.
pub fn timerec(id: &str, title: &str) -> HtspMessage {
    HtspMessage::new()
        .with("id", id)
        .with("title", title)
        .with("enabled", true)
}

/// A profile entry for `getProfiles` or `getDvrConfigs`.
pub fn profile(uuid: &str, name: &str) -> HtspMessage {
    HtspMessage::new().with("uuid", uuid).with("name", name)
}

/// `record` as a push of `method`.
pub fn pushed(method: &str, record: HtspMessage) -> HtspMessage {
    record.with("method", method)
}

/// A solid PNG image.
pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_pixel(width, height, Rgba([200, 30, 30, 255]));
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("Failed to encode PNG");
    bytes
}
