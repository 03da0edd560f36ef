//! Feature to CoT event conversion.
//!
//! Pure functions: the generation time is passed in by the caller so that
//! every event of one cycle shares the same timestamp.

use arcfeed_types::{
    AttributeValue, CotEvent, CotPoint, Feature, FeatureId, FeedConfig, REMOVAL_TYPE,
};
use chrono::{DateTime, TimeDelta, Utc};

/// `how` attribute of every event: human entered.
pub const HOW: &str = "h-e";

/// Stale window of removal events.
pub const REMOVAL_STALE_MINUTES: i64 = 1;

/// Attributes tried in order when the configured callsign field is empty.
pub const CALLSIGN_FALLBACK_FIELDS: [&str; 7] = [
    "IncidentName",
    "InstallationName",
    "Plant_Name",
    "Name",
    "NAME",
    "Affiliation",
    "OWNER",
];

/// Internal or computed attributes left out of the remarks.
pub const REMARKS_SKIP_FIELDS: [&str; 13] = [
    "FID",
    "OBJECTID",
    "OBJECTID_1",
    "ObjectId",
    "SourceOID",
    "Shape__Length",
    "Shape__Len",
    "Shape__Area",
    "GlobalID",
    "SourceGlobalID",
    "IrwinID",
    "CreatedOnDateTime_dt",
    "ModifiedOnDateTime_dt",
];

/// Placeholder some layers use for "no value".
const NO_VALUE_SENTINEL: &str = "-999999";

/// Marker uid of a feature: `arcgis-{feed}-{id}`.
pub fn uid_for(feed: &str, id: &FeatureId) -> String {
    format!("arcgis-{feed}-{id}")
}

/// Effective CoT type of a feature.
///
/// The mapped type when `cot_type_field` is set and the feature's value
/// for it is a mapping key; otherwise the feed's `cot_type`. A missing
/// field, a null and an unmapped value all fall back.
pub fn resolve_cot_type<'a>(feature: &Feature, config: &'a FeedConfig) -> &'a str {
    config
        .cot_type_field
        .as_deref()
        .and_then(|field| feature.attributes.lookup(field).value())
        .and_then(AttributeValue::render)
        .and_then(|key| config.cot_type_mapping.get(&key))
        .map_or(config.cot_type.as_str(), String::as_str)
}

/// Display name of a feature.
///
/// `field` first, then [`CALLSIGN_FALLBACK_FIELDS`], then the feature id.
pub fn resolve_callsign(feature: &Feature, field: &str) -> String {
    std::iter::once(field)
        .chain(CALLSIGN_FALLBACK_FIELDS)
        .find_map(|name| feature.attributes.non_blank(name))
        .unwrap_or_else(|| feature.id.to_string())
}

/// `key: value` lines for every displayable attribute, or `None` if there
/// are none.
pub fn build_remarks(feature: &Feature) -> Option<String> {
    let lines: Vec<String> = feature
        .attributes
        .iter()
        .filter(|(key, _)| !REMARKS_SKIP_FIELDS.contains(key))
        .filter_map(|(key, value)| {
            let rendered = value.render()?;
            let trimmed = rendered.trim();
            if trimmed.is_empty() || trimmed == NO_VALUE_SENTINEL {
                return None;
            }
            Some(format!("{key}: {rendered}"))
        })
        .collect();

    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

/// Event placing or refreshing the marker of `feature`.
///
/// `default_callsign_field` is used unless the feed names its own.
pub fn build_present_event(
    feature: &Feature,
    config: &FeedConfig,
    default_callsign_field: &str,
    now: DateTime<Utc>,
) -> CotEvent {
    let callsign_field = config
        .callsign_field
        .as_deref()
        .unwrap_or(default_callsign_field);

    CotEvent {
        uid: uid_for(&config.name, &feature.id),
        event_type: resolve_cot_type(feature, config).to_owned(),
        how: HOW.to_owned(),
        time: now,
        start: now,
        stale: stale_after(now, config.stale_minutes),
        point: CotPoint::at(feature.latitude, feature.longitude),
        callsign: Some(resolve_callsign(feature, callsign_field)),
        remarks: build_remarks(feature),
        group: config.group.clone(),
        removal: false,
    }
}

/// Event deleting the marker of feature `id`.
pub fn build_removal_event(id: &FeatureId, config: &FeedConfig, now: DateTime<Utc>) -> CotEvent {
    let stale = TimeDelta::try_minutes(REMOVAL_STALE_MINUTES)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(now);

    CotEvent {
        uid: uid_for(&config.name, id),
        event_type: REMOVAL_TYPE.to_owned(),
        how: HOW.to_owned(),
        time: now,
        start: now,
        stale,
        point: CotPoint::unknown(),
        callsign: None,
        remarks: None,
        group: config.group.clone(),
        removal: true,
    }
}

/// `now + minutes`, saturating at the largest representable time.
fn stale_after(now: DateTime<Utc>, minutes: u64) -> DateTime<Utc> {
    i64::try_from(minutes)
        .ok()
        .and_then(TimeDelta::try_minutes)
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::float_cmp,
    clippy::arithmetic_side_effects
)]
mod tests {
    use super::*;
    use arcfeed_types::UNKNOWN_POINT_VALUE;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn status_feed() -> FeedConfig {
        let mut config = FeedConfig::new("bases", "https://example.test/query");
        config.cot_type_field = Some("status".to_owned());
        config
            .cot_type_mapping
            .insert("active".to_owned(), "a-f-G-U-C".to_owned());
        config
            .cot_type_mapping
            .insert("damaged".to_owned(), "a-f-G-U-C-D".to_owned());
        config
    }

    #[test]
    fn mapped_value_overrides_type() {
        let config = status_feed();
        let damaged = Feature::new(1, 10.0, 20.0).with_attribute("status", "damaged");
        assert_eq!(resolve_cot_type(&damaged, &config), "a-f-G-U-C-D");
    }

    #[test]
    fn unmapped_missing_or_null_falls_back() {
        let mut config = status_feed();
        config.cot_type = "a-n-G".to_owned();

        let unknown = Feature::new(1, 0.0, 0.0).with_attribute("status", "unknown");
        assert_eq!(resolve_cot_type(&unknown, &config), "a-n-G");

        let missing = Feature::new(2, 0.0, 0.0);
        assert_eq!(resolve_cot_type(&missing, &config), "a-n-G");

        let null = Feature::new(3, 0.0, 0.0).with_attribute("status", AttributeValue::Null);
        assert_eq!(resolve_cot_type(&null, &config), "a-n-G");
    }

    #[test]
    fn numeric_values_match_rendered_keys() {
        let mut config = FeedConfig::new("f", "https://example.test");
        config.cot_type_field = Some("class".to_owned());
        config
            .cot_type_mapping
            .insert("3".to_owned(), "a-h-G".to_owned());

        let integer = Feature::new(1, 0.0, 0.0).with_attribute("class", 3_i64);
        assert_eq!(resolve_cot_type(&integer, &config), "a-h-G");
        let float = Feature::new(2, 0.0, 0.0).with_attribute("class", 3.0);
        assert_eq!(resolve_cot_type(&float, &config), "a-h-G");
    }

    #[test]
    fn callsign_fallback_chain() {
        let named = Feature::new(7, 0.0, 0.0).with_attribute("InstallationName", "Fort A");
        assert_eq!(resolve_callsign(&named, "InstallationName"), "Fort A");

        let blank = Feature::new(7, 0.0, 0.0)
            .with_attribute("Site", "   ")
            .with_attribute("NAME", "Plant B");
        assert_eq!(resolve_callsign(&blank, "Site"), "Plant B");

        let bare = Feature::new(7, 0.0, 0.0);
        assert_eq!(resolve_callsign(&bare, "Site"), "7");
    }

    #[test]
    fn remarks_skip_internal_and_empty_fields() {
        let feature = Feature::new(1, 0.0, 0.0)
            .with_attribute("OBJECTID", 1_i64)
            .with_attribute("Shape__Area", 12.5)
            .with_attribute("Name", "Depot")
            .with_attribute("Acres", -999_999_i64)
            .with_attribute("Notes", "  ")
            .with_attribute("Owner", AttributeValue::Null)
            .with_attribute("Capacity", 40_i64);
        assert_eq!(
            build_remarks(&feature).as_deref(),
            Some("Capacity: 40\nName: Depot")
        );

        let internal_only = Feature::new(2, 0.0, 0.0).with_attribute("GlobalID", "{abc}");
        assert_eq!(build_remarks(&internal_only), None);
    }

    #[test]
    fn present_event_fields() {
        let mut config = status_feed();
        config.group = "Fire Crews".to_owned();
        config.stale_minutes = 30;
        let feature = Feature::new(42, 34.5, -117.25)
            .with_attribute("status", "damaged")
            .with_attribute("InstallationName", "Station 9");

        let event = build_present_event(&feature, &config, "InstallationName", now());
        assert_eq!(event.uid, "arcgis-bases-42");
        assert_eq!(event.event_type, "a-f-G-U-C-D");
        assert_eq!(event.how, "h-e");
        assert_eq!(event.time, now());
        assert_eq!(event.start, now());
        assert_eq!(event.stale, now() + TimeDelta::minutes(30));
        assert_eq!(event.point, CotPoint::at(34.5, -117.25));
        assert_eq!(event.callsign.as_deref(), Some("Station 9"));
        assert_eq!(event.group, "Fire Crews");
        assert!(!event.is_removal());
    }

    #[test]
    fn feed_callsign_field_wins_over_default() {
        let mut config = FeedConfig::new("f", "https://example.test");
        config.callsign_field = Some("Unit".to_owned());
        let feature = Feature::new(1, 0.0, 0.0)
            .with_attribute("Unit", "E-12")
            .with_attribute("InstallationName", "Station 9");
        let event = build_present_event(&feature, &config, "InstallationName", now());
        assert_eq!(event.callsign.as_deref(), Some("E-12"));
    }

    #[test]
    fn huge_stale_window_saturates() {
        let mut config = FeedConfig::new("f", "https://example.test");
        config.stale_minutes = u64::MAX;
        let event = build_present_event(&Feature::new(1, 0.0, 0.0), &config, "Name", now());
        assert_eq!(event.stale, DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn removal_event_fields() {
        let config = FeedConfig::new("bases", "https://example.test");
        let event = build_removal_event(&FeatureId::from(1), &config, now());
        assert_eq!(event.uid, "arcgis-bases-1");
        assert_eq!(event.event_type, REMOVAL_TYPE);
        assert_eq!(event.stale, now() + TimeDelta::minutes(1));
        assert_eq!(event.point.lat, UNKNOWN_POINT_VALUE);
        assert_eq!(event.point.lon, UNKNOWN_POINT_VALUE);
        assert!(event.callsign.is_none());
        assert!(event.remarks.is_none());
        assert!(event.is_removal());
    }
}
