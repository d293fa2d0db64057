// -
// Database namespaces

/// Sled tree namespaces, repository side
pub(crate) const CHANGES_TREE: &str = "changes";
pub(crate) const CHANGE_META_TREE: &str = "change_meta";
pub(crate) const DISPATCH_CURSORS_TREE: &str = "dispatch_cursors";
pub(crate) const SUBSCRIPTIONS_BY_TARGET_TREE: &str = "subs_by_target";
pub(crate) const SUBSCRIPTIONS_BY_SITE_TREE: &str = "subs_by_site";
pub(crate) const REJECTED_CHANGES_TREE: &str = "rejected_changes";

/// Sled tree namespaces, client side
pub(crate) const USAGE_BY_PAGE_TREE: &str = "usage_by_page";
pub(crate) const USAGE_BY_ENTITY_TREE: &str = "usage_by_entity";
pub(crate) const CLIENT_META_TREE: &str = "client_meta";

/// Sled entry keys
pub(crate) const CHANGE_META_KEY_LAST_CHANGE_ID: &str = "_last_change_id";
pub(crate) const CLIENT_META_KEY_APPLIED_WATERMARK: &str = "_applied_watermark";

/// Subscription target tags
pub(crate) const TARGET_TAG_ENTITY: u8 = b'e';
pub(crate) const TARGET_TAG_NAMESPACE: u8 = b'n';

// -
// Timings

/// Longest time a queued mutation waits before the ingestor appends it
pub(crate) const INGEST_FLUSH_INTERVAL: std::time::Duration = std::time::Duration::from_millis(50);

/// Slack a site lease keeps beyond one bounded transmission
pub(crate) const LEASE_TRANSMIT_MARGIN: std::time::Duration = std::time::Duration::from_secs(1);
