//! Cursor-on-Target events.
//!
//! A [`CotEvent`] is the transport-agnostic form of one CoT message. The
//! event builder produces it, the wire encoder renders it to XML, and it is
//! dropped once published.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// CoT type instructing consumers to delete a marker.
pub const REMOVAL_TYPE: &str = "t-x-d-d";

/// Placeholder for unknown point components (height, error ellipses).
pub const UNKNOWN_POINT_VALUE: f64 = 9_999_999.0;

/// Position block of a CoT event.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CotPoint {
    /// Latitude in decimal degrees.
    pub lat: f64,
    /// Longitude in decimal degrees.
    pub lon: f64,
    /// Height above ellipsoid in metres.
    pub hae: f64,
    /// Circular error in metres.
    pub ce: f64,
    /// Linear error in metres.
    pub le: f64,
}

impl CotPoint {
    /// A surface point with unknown height and error.
    pub const fn at(lat: f64, lon: f64) -> Self {
        Self {
            lat,
            lon,
            hae: UNKNOWN_POINT_VALUE,
            ce: UNKNOWN_POINT_VALUE,
            le: UNKNOWN_POINT_VALUE,
        }
    }

    /// A point where every component is unknown.
    pub const fn unknown() -> Self {
        Self::at(UNKNOWN_POINT_VALUE, UNKNOWN_POINT_VALUE)
    }
}

/// One rendered CoT event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CotEvent {
    /// Marker identifier, stable across cycles for the same feature.
    pub uid: String,
    /// CoT type string (MIL-STD-2525 derived, or [`REMOVAL_TYPE`]).
    #[serde(rename = "type")]
    pub event_type: String,
    /// How the position was obtained.
    pub how: String,
    /// Generation time.
    pub time: DateTime<Utc>,
    /// Start of the validity window.
    pub start: DateTime<Utc>,
    /// End of the validity window.
    pub stale: DateTime<Utc>,
    /// Position of the marker.
    pub point: CotPoint,
    /// Display name of the marker, absent on removal events.
    pub callsign: Option<String>,
    /// Free-text remarks, absent when the feature has nothing to show.
    pub remarks: Option<String>,
    /// Routing group the event is published to.
    pub group: String,
    /// Whether this event deletes a marker instead of placing one.
    pub removal: bool,
}

impl CotEvent {
    /// Whether this event deletes a marker.
    pub const fn is_removal(&self) -> bool {
        self.removal
    }
}
