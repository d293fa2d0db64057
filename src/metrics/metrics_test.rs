use super::*;

fn create_test_registry() -> Registry {
    let registry = Registry::new_custom(Some("dispatch".to_string()), None).unwrap();
    register_custom_metrics(&registry);
    registry
}

#[test]
fn test_custom_registry() {
    let registry = create_test_registry();

    CHANGES_DELIVERED_METRIC.with_label_values(&["enwiki"]).inc();
    let metrics = &registry.gather();
    assert!(!metrics.is_empty());

    let metric_names: Vec<_> = metrics.iter().map(|m| m.get_name()).collect();
    assert!(
        metric_names.contains(&"dispatch_changes_delivered"),
        "Missing dispatch_changes_delivered"
    );
    assert!(metric_names.contains(&"dispatch_store_unavailable_alert"));
}

#[test]
fn test_counter_increment() {
    CHANGES_REJECTED_METRIC.reset();

    CHANGES_REJECTED_METRIC.with_label_values(&["metrics_test_wiki"]).inc();
    CHANGES_REJECTED_METRIC.with_label_values(&["metrics_test_wiki"]).inc();

    let value = CHANGES_REJECTED_METRIC.with_label_values(&["metrics_test_wiki"]).get();
    assert_eq!(value, 2, "Counter should increment correctly");
}
