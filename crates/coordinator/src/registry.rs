//! Request registry
//!
//! Source of truth for `SigningRequest` aggregates and the single writer of
//! their state. Each aggregate sits behind its own mutex; a transition runs
//! on a copy under that lock and is committed only if it still satisfies the
//! aggregate invariants: storage first, then the audit entries as one batch,
//! then memory. When the audit batch fails the stored row is put back, so
//! state never moves without its entries. Different requests never contend
//! with each other.

use crate::error::CoordinatorError;
use crate::events::{CoordinatorEvent, EventBus};
use crate::store::RequestStore;
use chrono::{DateTime, Utc};
use coldsign_audit::{AuditLog, AuditRecord};
use coldsign_core::{RequestKind, RequestStatus, SigningRequest};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use strum::IntoEnumIterator;

pub const DEFAULT_PAGE_SIZE: usize = 50;
pub const MAX_PAGE_SIZE: usize = 500;

/// Result of a transition function, with the audit entries and events it
/// produced. Entries are appended even when `result` is an error: rejected
/// attempts are part of the record.
#[must_use]
pub struct Transition<T> {
    result: Result<T, CoordinatorError>,
    audit: Vec<AuditRecord>,
    events: Vec<CoordinatorEvent>,
}

impl<T> Transition<T> {
    pub fn accept(value: T) -> Self {
        Self {
            result: Ok(value),
            audit: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn reject(error: CoordinatorError) -> Self {
        Self {
            result: Err(error),
            audit: Vec::new(),
            events: Vec::new(),
        }
    }

    pub fn audit(mut self, record: AuditRecord) -> Self {
        self.audit.push(record);
        self
    }

    pub fn publish(mut self, event: CoordinatorEvent) -> Self {
        self.events.push(event);
        self
    }
}

/// Listing filter
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<RequestStatus>,
    pub kind: Option<RequestKind>,
    /// Exact signer id
    pub signer: Option<String>,
    /// Case-insensitive match on request id, asset symbol or signer name
    pub search: Option<String>,
    pub offset: Option<usize>,
    pub limit: Option<usize>,
}

impl ListQuery {
    fn matches(&self, request: &SigningRequest) -> bool {
        if self.status.is_some_and(|s| s != request.status) {
            return false;
        }
        if self.kind.is_some_and(|k| k != request.kind) {
            return false;
        }
        if let Some(signer) = &self.signer {
            if request.signer(signer).is_none() {
                return false;
            }
        }
        if let Some(search) = self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            let needle = search.to_lowercase();
            let hit = request.id.to_lowercase().contains(&needle)
                || request
                    .transaction_bundles
                    .iter()
                    .any(|b| b.asset_symbol.to_lowercase().contains(&needle))
                || request.signers.iter().any(|s| {
                    s.display_name.to_lowercase().contains(&needle)
                        || s.id.to_lowercase().contains(&needle)
                });
            if !hit {
                return false;
            }
        }
        true
    }

    fn limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}

/// One page of a listing, newest first
#[derive(Debug, Clone, Serialize)]
pub struct RequestPage {
    pub items: Vec<SigningRequest>,
    pub total: usize,
}

/// Request counts per status
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total: usize,
    pub by_status: BTreeMap<String, usize>,
}

type Handle = Arc<Mutex<SigningRequest>>;

pub struct RequestRegistry {
    store: RequestStore,
    audit: Arc<AuditLog>,
    events: EventBus,
    requests: RwLock<HashMap<String, Handle>>,
}

impl RequestRegistry {
    /// Build the registry, loading every stored request
    pub fn load(
        store: RequestStore,
        audit: Arc<AuditLog>,
        events: EventBus,
    ) -> Result<Self, CoordinatorError> {
        let stored = store.load_all()?;
        tracing::info!(requests = stored.len(), "Loaded signing requests");

        let requests = stored
            .into_iter()
            .map(|r| (r.id.clone(), Arc::new(Mutex::new(r))))
            .collect();

        Ok(Self {
            store,
            audit,
            events,
            requests: RwLock::new(requests),
        })
    }

    /// Persist a new `pending` request and log its creation.
    pub fn create(
        &self,
        request: SigningRequest,
        record: AuditRecord,
        at: DateTime<Utc>,
    ) -> Result<SigningRequest, CoordinatorError> {
        if request.status != RequestStatus::Pending || request.obtained_signatures != 0 {
            return Err(CoordinatorError::InvalidRequest(
                "new requests must start pending with no signatures".to_string(),
            ));
        }
        request.check_invariants()?;

        let mut requests = self.requests.write();
        if requests.contains_key(&request.id) {
            return Err(CoordinatorError::InvalidRequest(format!(
                "request {} already exists",
                request.id
            )));
        }

        self.store.save(&request).inspect_err(|e| {
            tracing::error!(request_id = %request.id, error = %e, "Failed to persist new request");
        })?;
        if let Err(e) = self.append_all(vec![record], at) {
            // a request nobody can audit must not exist
            if let Err(undo) = self.store.delete(&request.id) {
                tracing::error!(request_id = %request.id, error = %undo, "Failed to undo unaudited creation");
            }
            return Err(e);
        }
        requests.insert(request.id.clone(), Arc::new(Mutex::new(request.clone())));
        drop(requests);

        tracing::info!(
            request_id = %request.id,
            kind = %request.kind,
            required = request.required_signatures,
            signers = request.signers.len(),
            "Signing request created"
        );
        Ok(request)
    }

    fn handle(&self, id: &str) -> Option<Handle> {
        self.requests.read().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.requests.read().contains_key(id)
    }

    /// Snapshot of one request
    pub fn get(&self, id: &str) -> Option<SigningRequest> {
        self.handle(id).map(|h| h.lock().clone())
    }

    /// Apply a transition to request `id` under its lock.
    ///
    /// Fails `NotFound` without calling `f` when the id is unknown. A changed
    /// aggregate that breaks an invariant or moves status backwards is
    /// discarded with `Internal`.
    pub fn update<T>(
        &self,
        id: &str,
        at: DateTime<Utc>,
        f: impl FnOnce(&mut SigningRequest) -> Transition<T>,
    ) -> Result<T, CoordinatorError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| CoordinatorError::NotFound(id.to_string()))?;
        let mut current = handle.lock();
        let mut draft = current.clone();
        let Transition {
            result,
            audit,
            events,
        } = f(&mut draft);

        let changed = draft != *current;
        if changed {
            check_commit(&current, &draft)?;
            self.store.save(&draft).inspect_err(|e| {
                tracing::error!(request_id = id, error = %e, "Failed to persist transition");
            })?;
        }

        if let Err(e) = self.append_all(audit, at) {
            if changed {
                // roll the store back; the caller may retry the whole attempt
                if let Err(undo) = self.store.save(&current) {
                    tracing::error!(request_id = id, error = %undo, "Failed to roll back unaudited transition");
                }
            }
            return Err(e);
        }

        if changed {
            if draft.status != current.status {
                tracing::info!(
                    request_id = id,
                    from = %current.status,
                    to = %draft.status,
                    obtained = draft.obtained_signatures,
                    "Status changed"
                );
            }
            *current = draft;
        }
        drop(current);

        for event in events {
            self.events.publish(event);
        }
        result
    }

    /// Log an attempt against a request that has no aggregate to lock
    pub fn record(&self, record: AuditRecord, at: DateTime<Utc>) -> Result<(), CoordinatorError> {
        self.append_all(vec![record], at)
    }

    fn append_all(
        &self,
        records: Vec<AuditRecord>,
        at: DateTime<Utc>,
    ) -> Result<(), CoordinatorError> {
        if records.is_empty() {
            return Ok(());
        }
        self.audit.append_all(records, at).map(|_| ()).map_err(|e| {
            tracing::error!(error = %e, "Failed to append audit entry");
            CoordinatorError::Audit(e)
        })
    }

    /// Filtered, paged listing, newest first
    pub fn list(&self, query: &ListQuery) -> RequestPage {
        let mut matching: Vec<SigningRequest> = self
            .requests
            .read()
            .values()
            .map(|h| h.lock().clone())
            .filter(|r| query.matches(r))
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let total = matching.len();
        let items = matching
            .into_iter()
            .skip(query.offset.unwrap_or(0))
            .take(query.limit())
            .collect();
        RequestPage { items, total }
    }

    /// Ids of non-terminal requests whose deadline has passed
    pub fn overdue_ids(&self, now: DateTime<Utc>) -> Vec<String> {
        self.requests
            .read()
            .values()
            .filter_map(|h| {
                let request = h.lock();
                request.is_overdue(now).then(|| request.id.clone())
            })
            .collect()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut by_status: BTreeMap<String, usize> =
            RequestStatus::iter().map(|s| (s.to_string(), 0)).collect();
        let requests = self.requests.read();
        for handle in requests.values() {
            *by_status.entry(handle.lock().status.to_string()).or_default() += 1;
        }
        RegistryStats {
            total: requests.len(),
            by_status,
        }
    }

    pub fn len(&self) -> usize {
        self.requests.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fields fixed at creation stay fixed; status only moves forward.
fn check_commit(current: &SigningRequest, draft: &SigningRequest) -> Result<(), CoordinatorError> {
    let internal = |msg: String| Err(CoordinatorError::Internal(msg));

    if current.is_terminal() {
        return internal(format!("request {} is terminal", current.id));
    }
    if draft.id != current.id
        || draft.kind != current.kind
        || draft.required_signatures != current.required_signatures
        || draft.created_at != current.created_at
        || draft.expires_at != current.expires_at
        || draft.transaction_bundles.len() != current.transaction_bundles.len()
        || draft.signers.len() != current.signers.len()
    {
        return internal(format!("immutable field of {} changed", current.id));
    }
    if draft.status != current.status && !current.status.can_transition_to(draft.status) {
        return internal(format!(
            "illegal transition {} -> {} on {}",
            current.status, draft.status, current.id
        ));
    }
    if draft.obtained_signatures < current.obtained_signatures {
        return internal(format!("signature count of {} went down", current.id));
    }
    draft
        .check_invariants()
        .map_err(|e| CoordinatorError::Internal(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use coldsign_audit::AuditAction;
    use coldsign_audit::AuditSink;
    use coldsign_core::{Amount, RequestMetadata, SignatureScheme, Signer, TransactionBundle};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Sink that fails while the switch is on
    struct SwitchedSink(Arc<AtomicBool>);

    impl AuditSink for SwitchedSink {
        fn append(&mut self, _batch: &[u8]) -> std::io::Result<()> {
            if self.0.load(Ordering::SeqCst) {
                Err(std::io::Error::other("disk full"))
            } else {
                Ok(())
            }
        }
    }

    fn failing_registry() -> (RequestRegistry, Arc<AuditLog>, Arc<AtomicBool>) {
        let failing = Arc::new(AtomicBool::new(false));
        let audit = Arc::new(AuditLog::with_sink(Box::new(SwitchedSink(Arc::clone(
            &failing,
        )))));
        let registry = RequestRegistry::load(
            RequestStore::in_memory().unwrap(),
            Arc::clone(&audit),
            EventBus::default(),
        )
        .unwrap();
        (registry, audit, failing)
    }

    fn t0() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_704_067_200, 0).unwrap()
    }

    fn request(id: &str, asset: &str, offset_mins: i64) -> SigningRequest {
        let created = t0() + Duration::minutes(offset_mins);
        SigningRequest::new(
            id,
            RequestKind::Rebalancing,
            vec![TransactionBundle::new(
                "b1",
                asset,
                Amount::new(dec!(1)).unwrap(),
                Amount::new(dec!(0.001)).unwrap(),
                "cold",
                "hot",
                "unsigned",
            )],
            vec![
                Signer::new("alice", "Alice Nguyen", "aa", SignatureScheme::Ed25519),
                Signer::new("bob", "Bob Tran", "bb", SignatureScheme::Ed25519),
            ],
            2,
            created,
            created + Duration::hours(1),
            RequestMetadata::default(),
        )
        .unwrap()
    }

    fn registry() -> (RequestRegistry, Arc<AuditLog>) {
        let audit = Arc::new(AuditLog::in_memory());
        let registry = RequestRegistry::load(
            RequestStore::in_memory().unwrap(),
            Arc::clone(&audit),
            EventBus::default(),
        )
        .unwrap();
        (registry, audit)
    }

    fn created(id: &str) -> AuditRecord {
        AuditRecord::new(id, AuditAction::Created)
    }

    #[test]
    fn test_create_and_get() {
        let (registry, audit) = registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();

        assert_eq!(registry.get("SR-1").unwrap().status, RequestStatus::Pending);
        assert!(registry.get("SR-2").is_none());
        assert_eq!(audit.for_request("SR-1").len(), 1);
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let (registry, _) = registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();
        let result = registry.create(request("SR-1", "ETH", 0), created("SR-1"), t0());
        assert!(matches!(result, Err(CoordinatorError::InvalidRequest(_))));
    }

    #[test]
    fn test_update_unknown_id() {
        let (registry, _) = registry();
        let result = registry.update("SR-404", t0(), |_| Transition::accept(()));
        assert!(matches!(result, Err(CoordinatorError::NotFound(_))));
    }

    #[test]
    fn test_rejected_transition_still_commits_changes_and_audit() {
        let (registry, audit) = registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();

        let at = t0() + Duration::hours(2);
        let result: Result<(), _> = registry.update("SR-1", at, |req| {
            req.expire(at).unwrap();
            Transition::reject(CoordinatorError::ExpiredRequest(req.id.clone()))
                .audit(AuditRecord::new("SR-1", AuditAction::Expired))
                .audit(AuditRecord::new("SR-1", AuditAction::SignatureRejected))
        });

        assert!(matches!(result, Err(CoordinatorError::ExpiredRequest(_))));
        assert_eq!(registry.get("SR-1").unwrap().status, RequestStatus::Expired);
        assert_eq!(audit.for_request("SR-1").len(), 3);
    }

    #[test]
    fn test_illegal_change_is_discarded() {
        let (registry, _) = registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();

        let result = registry.update("SR-1", t0(), |req| {
            req.obtained_signatures = 1;
            Transition::accept(())
        });
        assert!(matches!(result, Err(CoordinatorError::Internal(_))));
        assert_eq!(registry.get("SR-1").unwrap().obtained_signatures, 0);

        let result = registry.update("SR-1", t0(), |req| {
            req.required_signatures = 1;
            Transition::accept(())
        });
        assert!(matches!(result, Err(CoordinatorError::Internal(_))));
    }

    #[test]
    fn test_terminal_request_cannot_change() {
        let (registry, _) = registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();
        registry
            .update("SR-1", t0(), |req| {
                req.cancel("typo", "ops", t0()).unwrap();
                Transition::accept(())
            })
            .unwrap();

        let result = registry.update("SR-1", t0(), |req| {
            req.status = RequestStatus::Pending;
            Transition::accept(())
        });
        assert!(matches!(result, Err(CoordinatorError::Internal(_))));
        assert_eq!(registry.get("SR-1").unwrap().status, RequestStatus::Cancelled);
    }

    #[test]
    fn test_list_filters_and_pages() {
        let (registry, _) = registry();
        for (i, asset) in ["BTC", "ETH", "SOL", "BTC"].iter().enumerate() {
            let id = format!("SR-{i}");
            registry
                .create(request(&id, asset, i as i64), created(&id), t0())
                .unwrap();
        }
        registry
            .update("SR-2", t0(), |req| {
                req.cancel("wrong", "ops", t0()).unwrap();
                Transition::accept(())
            })
            .unwrap();

        let all = registry.list(&ListQuery::default());
        assert_eq!(all.total, 4);
        assert_eq!(all.items[0].id, "SR-3");

        let btc = registry.list(&ListQuery {
            search: Some("btc".into()),
            ..Default::default()
        });
        assert_eq!(btc.total, 2);

        let by_name = registry.list(&ListQuery {
            search: Some("nguyen".into()),
            ..Default::default()
        });
        assert_eq!(by_name.total, 4);

        let cancelled = registry.list(&ListQuery {
            status: Some(RequestStatus::Cancelled),
            ..Default::default()
        });
        assert_eq!(cancelled.items.len(), 1);
        assert_eq!(cancelled.items[0].id, "SR-2");

        let page = registry.list(&ListQuery {
            offset: Some(1),
            limit: Some(2),
            ..Default::default()
        });
        assert_eq!(page.total, 4);
        let ids: Vec<_> = page.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["SR-2", "SR-1"]);

        let nobody = registry.list(&ListQuery {
            signer: Some("carol".into()),
            ..Default::default()
        });
        assert_eq!(nobody.total, 0);
    }

    #[test]
    fn test_stats_and_overdue() {
        let (registry, _) = registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();
        registry
            .create(request("SR-2", "BTC", 90), created("SR-2"), t0())
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.by_status["pending"], 2);
        assert_eq!(stats.by_status["completed"], 0);

        let overdue = registry.overdue_ids(t0() + Duration::minutes(61));
        assert_eq!(overdue, vec!["SR-1".to_string()]);
    }

    #[test]
    fn test_unaudited_transition_is_rolled_back() {
        let (registry, audit, failing) = failing_registry();
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();
        let mut events = registry.events.subscribe();

        let sign = |req: &mut SigningRequest| {
            let signed = [("b1".to_string(), "signed".to_string())].into();
            req.record_signature("alice", "00", &signed, t0()).unwrap();
            Transition::accept(())
                .audit(AuditRecord::new("SR-1", AuditAction::SignatureAccepted))
        };

        failing.store(true, Ordering::SeqCst);
        let result = registry.update("SR-1", t0(), sign);
        assert!(matches!(result, Err(CoordinatorError::Audit(_))));
        assert_eq!(registry.get("SR-1").unwrap().obtained_signatures, 0);
        assert_eq!(
            registry.store.get("SR-1").unwrap().unwrap().obtained_signatures,
            0
        );
        assert_eq!(audit.for_request("SR-1").len(), 1);
        assert!(events.try_recv().is_err());

        // the same attempt goes through once the log is writable again
        failing.store(false, Ordering::SeqCst);
        registry.update("SR-1", t0(), sign).unwrap();
        assert_eq!(registry.get("SR-1").unwrap().obtained_signatures, 1);
        assert_eq!(audit.for_request("SR-1").len(), 2);
    }

    #[test]
    fn test_unaudited_creation_leaves_nothing_behind() {
        let (registry, audit, failing) = failing_registry();
        failing.store(true, Ordering::SeqCst);

        let result = registry.create(request("SR-1", "BTC", 0), created("SR-1"), t0());
        assert!(matches!(result, Err(CoordinatorError::Audit(_))));
        assert!(!registry.contains("SR-1"));
        assert_eq!(registry.store.count().unwrap(), 0);
        assert!(audit.is_empty());

        failing.store(false, Ordering::SeqCst);
        registry
            .create(request("SR-1", "BTC", 0), created("SR-1"), t0())
            .unwrap();
        assert!(registry.contains("SR-1"));
    }
}
