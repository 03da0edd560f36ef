//! Marker lifecycle tests across polling cycles.
//!
//! Drive the registry and the management service with the in-memory source
//! and publisher, checking which present and removal events reach the bus
//! and what each feed remembers between cycles.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use arcfeed_core::stub::{RecordingPublisher, ScriptedSource};
use arcfeed_core::{CycleSettings, FeedRegistry, FeedService, ServiceConfig, SourceError};
use arcfeed_types::{Feature, FeatureId, FeedConfig};

const URL: &str = "https://example.test/arcgis/rest/services/Bases/FeatureServer/0/query";

type Registry = FeedRegistry<ScriptedSource, RecordingPublisher>;

fn features(ids: &[i64]) -> Vec<Feature> {
    ids.iter()
        .map(|&id| Feature::new(id, 38.9, -77.0).with_attribute("Name", format!("site {id}")))
        .collect()
}

fn ids(values: &[i64]) -> BTreeSet<FeatureId> {
    values.iter().copied().map(FeatureId::from).collect()
}

fn feed(name: &str) -> FeedConfig {
    let mut config = FeedConfig::new(name, URL);
    config.interval_minutes = 1;
    config
}

fn registry_with(source: ScriptedSource) -> Registry {
    FeedRegistry::new(
        source,
        RecordingPublisher::new(),
        CycleSettings {
            publish_backoff: Duration::from_millis(1),
            ..CycleSettings::default()
        },
        true,
    )
}

fn registry() -> Registry {
    registry_with(ScriptedSource::new())
}

async fn until_fetches(registry: &Registry, calls: usize) {
    while registry.source().calls() < calls {
        tokio::task::yield_now().await;
    }
}

#[tokio::test]
async fn second_cycle_removes_vanished_feature() {
    let source = ScriptedSource::new();
    source.set_features(URL, features(&[1, 2, 3]));
    let config = ServiceConfig {
        feeds: vec![FeedConfig::new("bases", URL)],
        ..ServiceConfig::default()
    };
    let (service, _) = FeedService::start(config, source, RecordingPublisher::new())
        .await
        .unwrap();
    let registry = service.registry();

    let first = service.fetch_one("bases").await.unwrap();
    assert!(first.success);
    assert_eq!((first.published, first.removed), (3, 0));
    assert_eq!(registry.known_ids("bases").await.unwrap(), ids(&[1, 2, 3]));

    registry.publisher().reset();
    registry.source().set_features(URL, features(&[2, 3, 4]));
    let second = service.fetch_one("bases").await.unwrap();
    assert_eq!((second.published, second.removed), (3, 1));
    assert_eq!(
        registry.publisher().present(),
        vec!["arcgis-bases-2", "arcgis-bases-3", "arcgis-bases-4"]
    );
    assert_eq!(registry.publisher().removals(), vec!["arcgis-bases-1"]);
    assert_eq!(registry.known_ids("bases").await.unwrap(), ids(&[2, 3, 4]));

    service.shutdown().await;
}

#[tokio::test]
async fn repeating_identical_data_removes_nothing() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1, 2]));
    registry.register(feed("a")).await.unwrap();

    registry.trigger_now("a").await.unwrap();
    let again = registry.trigger_now("a").await.unwrap();

    assert_eq!(again.removed, 0);
    assert!(registry.publisher().removals().is_empty());
    assert_eq!(registry.known_ids("a").await.unwrap(), ids(&[1, 2]));
    registry.shutdown().await;
}

#[tokio::test]
async fn outage_does_not_delete_markers() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1, 2]));
    registry.register(feed("a")).await.unwrap();
    registry.trigger_now("a").await.unwrap();
    registry.publisher().reset();

    registry.source().fail_with(
        URL,
        SourceError::Status {
            status: 503,
            body: "unavailable".to_owned(),
        },
    );
    let failed = registry.trigger_now("a").await.unwrap();
    assert!(!failed.is_success());
    assert!(registry.publisher().events().is_empty());
    assert_eq!(registry.known_ids("a").await.unwrap(), ids(&[1, 2]));

    // the feature that vanished during the outage is only removed once the
    // source answers again
    registry.source().set_features(URL, features(&[2]));
    let recovered = registry.trigger_now("a").await.unwrap();
    assert_eq!(recovered.removed, 1);
    assert_eq!(registry.publisher().removals(), vec!["arcgis-a-1"]);
    registry.shutdown().await;
}

#[tokio::test]
async fn clear_then_repopulate() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1, 2, 3]));
    registry.register(feed("a")).await.unwrap();
    registry.trigger_now("a").await.unwrap();
    registry.publisher().reset();

    let cleared = registry.clear("a").await.unwrap();
    assert_eq!(cleared.removed, 3);
    assert_eq!(
        registry.publisher().removals(),
        vec!["arcgis-a-1", "arcgis-a-2", "arcgis-a-3"]
    );
    assert!(registry.known_ids("a").await.unwrap().is_empty());

    registry.publisher().reset();
    let next = registry.trigger_now("a").await.unwrap();
    assert_eq!((next.published, next.removed), (3, 0));
    assert_eq!(registry.known_ids("a").await.unwrap(), ids(&[1, 2, 3]));
    registry.shutdown().await;
}

#[tokio::test]
async fn committed_disappearance_then_reappearance() {
    let registry = registry();
    registry.register(feed("a")).await.unwrap();

    registry.source().set_features(URL, features(&[1, 2]));
    registry.trigger_now("a").await.unwrap();
    registry.source().set_features(URL, features(&[2]));
    registry.trigger_now("a").await.unwrap();
    registry.source().set_features(URL, features(&[1, 2]));
    registry.trigger_now("a").await.unwrap();

    let timeline: Vec<(String, bool)> = registry
        .publisher()
        .events()
        .into_iter()
        .filter(|event| event.uid == "arcgis-a-1")
        .map(|event| (event.uid, event.removal))
        .collect();
    assert_eq!(
        timeline,
        vec![
            ("arcgis-a-1".to_owned(), false),
            ("arcgis-a-1".to_owned(), true),
            ("arcgis-a-1".to_owned(), false),
        ]
    );
    registry.shutdown().await;
}

#[tokio::test]
async fn status_field_selects_symbology() {
    let registry = registry();
    registry.source().set_features(
        URL,
        vec![
            Feature::new(1, 0.0, 0.0).with_attribute("status", "damaged"),
            Feature::new(2, 0.0, 0.0).with_attribute("status", "unknown"),
            Feature::new(3, 0.0, 0.0).with_attribute("status", "active"),
        ],
    );
    let mut config = feed("a");
    config.cot_type = "a-n-G".to_owned();
    config.cot_type_field = Some("status".to_owned());
    config
        .cot_type_mapping
        .insert("active".to_owned(), "a-f-G-U-C".to_owned());
    config
        .cot_type_mapping
        .insert("damaged".to_owned(), "a-f-G-U-C-D".to_owned());
    registry.register(config).await.unwrap();

    registry.trigger_now("a").await.unwrap();
    let types: Vec<String> = registry
        .publisher()
        .events()
        .into_iter()
        .map(|event| event.event_type)
        .collect();
    assert_eq!(types, vec!["a-f-G-U-C-D", "a-n-G", "a-f-G-U-C"]);
    registry.shutdown().await;
}

#[tokio::test]
async fn events_are_routed_to_feed_group() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1]));
    let mut config = feed("a");
    config.group = "Fire Crews".to_owned();
    registry.register(config).await.unwrap();

    registry.trigger_now("a").await.unwrap();
    let groups: Vec<String> = registry
        .publisher()
        .published()
        .into_iter()
        .map(|(_, group)| group)
        .collect();
    assert_eq!(groups, vec!["Fire Crews"]);
    registry.shutdown().await;
}

#[tokio::test]
async fn failed_removal_is_sent_on_next_cycle() {
    let registry = registry();
    registry.register(feed("a")).await.unwrap();
    registry.source().set_features(URL, features(&[1, 2]));
    registry.trigger_now("a").await.unwrap();

    registry.publisher().fail_uid("arcgis-a-1");
    registry.source().set_features(URL, features(&[2]));
    let failed = registry.trigger_now("a").await.unwrap();
    assert_eq!(failed.removed, 0);
    assert_eq!(failed.errors.len(), 1);
    assert_eq!(registry.known_ids("a").await.unwrap(), ids(&[2]));

    registry.publisher().heal_uid("arcgis-a-1");
    let retried = registry.trigger_now("a").await.unwrap();
    assert_eq!(retried.removed, 1);

    let after = registry.trigger_now("a").await.unwrap();
    assert_eq!(after.removed, 0);
    assert_eq!(registry.publisher().removals(), vec!["arcgis-a-1"]);
    registry.shutdown().await;
}

#[tokio::test]
async fn same_feed_never_runs_twice_at_once() {
    let (source, gate) = ScriptedSource::with_gate();
    source.set_features(URL, features(&[1]));
    let registry = Arc::new(registry_with(source));
    registry.register(feed("a")).await.unwrap();

    let first = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.trigger_now("a").await }
    });
    until_fetches(&registry, 1).await;

    let second = registry.trigger_now("a").await.unwrap();
    assert!(second.is_busy());
    assert_eq!(second.published, 0);

    gate.add_permits(1);
    let first = first.await.unwrap().unwrap();
    assert!(first.is_success());
    assert_eq!(registry.source().calls(), 1);
    assert_eq!(registry.source().max_concurrent(), 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn reregistered_feed_waits_for_outgoing_cycle() {
    let (source, gate) = ScriptedSource::with_gate();
    source.set_features(URL, features(&[1]));
    let registry = Arc::new(registry_with(source));
    registry.register(feed("a")).await.unwrap();

    let first = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.trigger_now("a").await }
    });
    until_fetches(&registry, 1).await;

    let unregister = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.unregister("a").await }
    });
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!unregister.is_finished());

    gate.add_permits(2);
    assert!(first.await.unwrap().unwrap().is_success());
    assert!(unregister.await.unwrap());

    registry.register(feed("a")).await.unwrap();
    let second = registry.trigger_now("a").await.unwrap();
    assert!(second.is_success());
    assert_eq!((second.published, second.removed), (1, 0));
    assert_eq!(registry.source().calls(), 2);
    assert_eq!(registry.source().max_concurrent(), 1);
    registry.shutdown().await;
}

#[tokio::test]
async fn different_feeds_run_in_parallel() {
    let (source, gate) = ScriptedSource::with_gate();
    source.set_features(URL, features(&[1, 2]));
    let registry = registry_with(source);
    registry.register(feed("a")).await.unwrap();
    registry.register(feed("b")).await.unwrap();

    let (a, b, ()) = tokio::join!(registry.trigger_now("a"), registry.trigger_now("b"), async {
        until_fetches(&registry, 2).await;
        gate.add_permits(2);
    });

    assert!(a.unwrap().is_success());
    assert!(b.unwrap().is_success());
    assert_eq!(registry.source().max_concurrent(), 2);
    assert_eq!(registry.known_ids("a").await.unwrap(), ids(&[1, 2]));
    assert_eq!(registry.known_ids("b").await.unwrap(), ids(&[1, 2]));
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn timer_polls_every_interval() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1]));
    registry.register(feed("a")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(registry.source().calls(), 1);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(registry.source().calls(), 2);
    assert_eq!(registry.known_ids("a").await.unwrap(), ids(&[1]));
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_registry_only_runs_on_demand() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1]));
    registry.set_enabled(false);
    registry.register(feed("a")).await.unwrap();

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert_eq!(registry.source().calls(), 0);

    let manual = registry.trigger_now("a").await.unwrap();
    assert!(manual.is_success());
    assert_eq!(registry.source().calls(), 1);

    registry.set_enabled(true);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(registry.source().calls(), 2);
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unregister_stops_timer_without_removals() {
    let registry = registry();
    registry.source().set_features(URL, features(&[1]));
    registry.register(feed("a")).await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(registry.source().calls(), 1);

    assert!(registry.unregister("a").await);
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(registry.source().calls(), 1);
    assert!(registry.publisher().removals().is_empty());
    assert!(registry.known_ids("a").await.is_none());
    registry.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn tick_during_manual_cycle_is_skipped() {
    let (source, gate) = ScriptedSource::with_gate();
    source.set_features(URL, features(&[1]));
    // long enough that the held fetch outlives the first tick
    let settings = CycleSettings {
        request_timeout: Duration::from_secs(3600),
        ..CycleSettings::default()
    };
    let registry = Arc::new(FeedRegistry::new(
        source,
        RecordingPublisher::new(),
        settings,
        true,
    ));
    registry.register(feed("a")).await.unwrap();

    let manual = tokio::spawn({
        let registry = Arc::clone(&registry);
        async move { registry.trigger_now("a").await }
    });
    until_fetches(&registry, 1).await;

    // the scheduled tick at 60s finds the manual cycle still running
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(registry.source().calls(), 1);

    gate.add_permits(10);
    assert!(manual.await.unwrap().unwrap().is_success());

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(registry.source().calls(), 2);
    assert_eq!(registry.source().max_concurrent(), 1);
    registry.shutdown().await;
}
