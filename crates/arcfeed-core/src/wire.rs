//! CoT XML rendering and the bus envelope.
//!
//! ```text
//! <event version="2.0" uid=".." type=".." time=".." start=".." stale=".." how="h-e">
//!   <point lat=".." lon=".." hae=".." ce=".." le=".."/>
//!   <detail><contact callsign=".."/><remarks>..</remarks></detail>
//! </event>
//! ```
//!
//! Removal events carry no `<detail>`. Each message on the bus is the XML
//! wrapped in a JSON object together with the publishing node's id.

use arcfeed_types::CotEvent;
use chrono::{DateTime, SecondsFormat, Utc};
use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use serde::{Deserialize, Serialize};

/// CoT schema version written on every event.
pub const COT_VERSION: &str = "2.0";

/// Errors produced while rendering an event.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The XML writer failed.
    #[error("xml write failed: {message}")]
    Xml {
        /// Writer error text.
        message: String,
    },

    /// The rendered document was not valid UTF-8.
    #[error("rendered xml is not utf-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// The envelope could not be serialized.
    #[error("envelope serialization failed: {0}")]
    Json(#[from] serde_json::Error),
}

/// JSON message published on the bus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CotEnvelope {
    /// The CoT event as XML text.
    pub cot: String,
    /// Identifier of the publishing node.
    pub uid: String,
}

/// Render `event` as a CoT XML document without declaration.
pub fn to_xml(event: &CotEvent) -> Result<String, WireError> {
    let mut writer = Writer::new(Vec::new());

    let time = format_time(event.time);
    let start = format_time(event.start);
    let stale = format_time(event.stale);
    let mut root = BytesStart::new("event");
    root.push_attribute(("version", COT_VERSION));
    root.push_attribute(("uid", event.uid.as_str()));
    root.push_attribute(("type", event.event_type.as_str()));
    root.push_attribute(("time", time.as_str()));
    root.push_attribute(("start", start.as_str()));
    root.push_attribute(("stale", stale.as_str()));
    root.push_attribute(("how", event.how.as_str()));
    write(&mut writer, Event::Start(root))?;

    let lat = format_coord(event.point.lat);
    let lon = format_coord(event.point.lon);
    let hae = format_coord(event.point.hae);
    let ce = format_coord(event.point.ce);
    let le = format_coord(event.point.le);
    let mut point = BytesStart::new("point");
    point.push_attribute(("lat", lat.as_str()));
    point.push_attribute(("lon", lon.as_str()));
    point.push_attribute(("hae", hae.as_str()));
    point.push_attribute(("ce", ce.as_str()));
    point.push_attribute(("le", le.as_str()));
    write(&mut writer, Event::Empty(point))?;

    if !event.is_removal() {
        write(&mut writer, Event::Start(BytesStart::new("detail")))?;
        if let Some(callsign) = &event.callsign {
            let mut contact = BytesStart::new("contact");
            contact.push_attribute(("callsign", callsign.as_str()));
            write(&mut writer, Event::Empty(contact))?;
        }
        if let Some(remarks) = &event.remarks {
            write(&mut writer, Event::Start(BytesStart::new("remarks")))?;
            write(&mut writer, Event::Text(BytesText::new(remarks)))?;
            write(&mut writer, Event::End(BytesEnd::new("remarks")))?;
        }
        write(&mut writer, Event::End(BytesEnd::new("detail")))?;
    }

    write(&mut writer, Event::End(BytesEnd::new("event")))?;
    Ok(String::from_utf8(writer.into_inner())?)
}

/// Render `event` and wrap it in the JSON envelope for `node_id`.
pub fn encode_envelope(event: &CotEvent, node_id: &str) -> Result<Vec<u8>, WireError> {
    let envelope = CotEnvelope {
        cot: to_xml(event)?,
        uid: node_id.to_owned(),
    };
    Ok(serde_json::to_vec(&envelope)?)
}

fn write(writer: &mut Writer<Vec<u8>>, event: Event<'_>) -> Result<(), WireError> {
    writer.write_event(event).map_err(|e| WireError::Xml {
        message: e.to_string(),
    })
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

// Debug keeps the trailing ".0" on integral values (9999999.0).
fn format_coord(value: f64) -> String {
    format!("{value:?}")
}
