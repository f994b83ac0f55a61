//! End-to-end request flows through the public API

use askperm::audit::{AuditError, AuditEvent, AuditEventType, AuditSink, MemoryAuditSink};
use askperm::gateway::{ResponseMode, SimulatedGateway, UserAnswer};
use askperm::permission::{
    AutoRationaleRenderer, CoordinatorBuilder, DenialPolicy, MemoryStateStore,
    PermissionStateStore, RationaleKind, RecordingRationaleRenderer, RequestOptions, StoreError,
};
use askperm::{
    permission_ids, Coordinator, HostGrant, HostPermissionGateway, HostResponder, Outcome,
    OutcomeStatus, PermissionId, RequestError, RequestStatus, RequestToken,
};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

const CAMERA: &str = "android.permission.CAMERA";
const MIC: &str = "android.permission.RECORD_AUDIO";
const LOCATION: &str = "android.permission.ACCESS_FINE_LOCATION";

fn collect(
    coordinator: &Coordinator,
    ids: &[&str],
    token: i32,
    options: RequestOptions,
) -> (RequestStatus, mpsc::Receiver<Outcome>) {
    let (tx, rx) = mpsc::channel();
    let status = coordinator
        .request(
            &permission_ids(ids.iter().copied()),
            RequestToken(token),
            options,
            move |outcome| {
                tx.send(outcome).expect("receiver alive");
            },
        )
        .expect("request accepted");
    (status, rx)
}

#[test]
fn test_first_run_then_permanent_denial() {
    let host = Arc::new(SimulatedGateway::new());
    host.answer(CAMERA, UserAnswer::Grant);
    host.answer(MIC, UserAnswer::DenyForever);
    let store = Arc::new(MemoryStateStore::new());
    let coordinator = Coordinator::new(host.clone(), store.clone());

    let (status, rx) = collect(&coordinator, &[CAMERA, MIC], 100, RequestOptions::new());
    assert_eq!(status, RequestStatus::Delivered);
    let first = rx.recv().unwrap();
    assert_eq!(first.granted, permission_ids([CAMERA]));
    assert_eq!(first.denied, permission_ids([MIC]));

    // MIC is now "don't ask again" and was asked before
    let (_, rx) = collect(&coordinator, &[CAMERA, MIC], 101, RequestOptions::new());
    let second = rx.recv().unwrap();
    assert_eq!(second.permanently_denied, permission_ids([CAMERA, MIC]));
    assert_eq!(second.status_of(&MIC.into()), Some(OutcomeStatus::PermanentlyDenied));
    assert_eq!(host.request_count(), 1);
}

#[test]
fn test_rationale_keeps_permission_requestable() {
    let host = Arc::new(SimulatedGateway::new());
    host.answer(LOCATION, UserAnswer::Deny);
    let coordinator = Coordinator::new(host.clone(), Arc::new(MemoryStateStore::new()));

    let (_, rx) = collect(&coordinator, &[LOCATION], 1, RequestOptions::new());
    assert_eq!(rx.recv().unwrap().denied, permission_ids([LOCATION]));

    host.answer(LOCATION, UserAnswer::Grant);
    let (_, rx) = collect(&coordinator, &[LOCATION], 2, RequestOptions::new());
    assert!(rx.recv().unwrap().is_all_granted());
    assert_eq!(host.request_count(), 2);
}

#[test]
fn test_per_permission_policy_keeps_other_ids() {
    let host = Arc::new(SimulatedGateway::new().with_default_answer(UserAnswer::Grant));
    host.block(MIC);
    host.grant(LOCATION);
    let store = Arc::new(MemoryStateStore::with_requested([MIC]));
    let coordinator = Coordinator::new(host.clone(), store);

    let options = RequestOptions::new().with_denial_policy(DenialPolicy::PerPermission);
    let (_, rx) = collect(&coordinator, &[LOCATION, MIC, CAMERA], 3, options);
    let outcome = rx.recv().unwrap();

    assert_eq!(outcome.granted, permission_ids([LOCATION, CAMERA]));
    assert_eq!(outcome.permanently_denied, permission_ids([MIC]));
    assert!(outcome.is_partition_of(&permission_ids([LOCATION, MIC, CAMERA])));
}

#[test]
fn test_settings_offer_then_decline() {
    let host = Arc::new(SimulatedGateway::new());
    host.block(CAMERA);
    let store = Arc::new(MemoryStateStore::with_requested([CAMERA]));
    let coordinator = Coordinator::new(host.clone(), store);
    let renderer = Arc::new(RecordingRationaleRenderer::aborting());

    let options = RequestOptions::new()
        .with_renderer(renderer.clone())
        .offer_settings(true);
    let (_, rx) = collect(&coordinator, &[CAMERA], 4, options);

    assert_eq!(rx.recv().unwrap().permanently_denied, permission_ids([CAMERA]));
    assert_eq!(renderer.count(RationaleKind::Settings), 1);
    assert!(host.settings_opened().is_empty());
}

#[test]
fn test_reason_after_opens_settings_for_ask_never() {
    let host = Arc::new(SimulatedGateway::new());
    host.answer(CAMERA, UserAnswer::DenyForever);
    host.settings_grant(true);
    let coordinator = Coordinator::new(host.clone(), Arc::new(MemoryStateStore::new()));

    let options = RequestOptions::new().reason_after(AutoRationaleRenderer::always_proceed());
    let (_, rx) = collect(&coordinator, &[CAMERA], 5, options);

    assert!(rx.recv().unwrap().is_all_granted());
    assert_eq!(host.request_count(), 1);
    assert_eq!(host.settings_opened().len(), 1);
}

#[test]
fn test_late_result_after_cancel_is_dropped() {
    let host = Arc::new(SimulatedGateway::with_mode(ResponseMode::Deferred));
    let store = Arc::new(MemoryStateStore::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let coordinator = CoordinatorBuilder::new()
        .shared_gateway(host.clone())
        .shared_store(store.clone())
        .shared_audit(audit.clone())
        .build()
        .unwrap();

    let (status, rx) = collect(&coordinator, &[CAMERA], 6, RequestOptions::new());
    assert_eq!(status, RequestStatus::Pending);
    assert_eq!(coordinator.cancel_all(), 1);

    assert_eq!(host.deliver_pending(), 1);
    assert!(rx.try_recv().is_err());
    assert!(store.is_first_request(&CAMERA.into()).unwrap());
    assert_eq!(audit.find_by_type(AuditEventType::RequestCancelled).len(), 1);
    assert!(audit
        .find_by_type(AuditEventType::PermissionDenied)
        .is_empty());
}

#[test]
fn test_rejected_requests_leave_no_state() {
    let host = Arc::new(SimulatedGateway::new());
    let coordinator = Coordinator::new(host.clone(), Arc::new(MemoryStateStore::new()));
    let ids = permission_ids([CAMERA, CAMERA]);

    let err = coordinator
        .request(&ids, RequestToken(7), RequestOptions::new(), |_| {
            panic!("callback must not run")
        })
        .unwrap_err();
    assert!(matches!(err, RequestError::DuplicatePermission(id) if id.as_str() == CAMERA));
    assert!(!coordinator.is_pending(RequestToken(7)));
    assert_eq!(host.request_count(), 0);
}

/// Host answering from its own thread, like a UI event loop would
struct ThreadedHost {
    grant: bool,
}

impl HostPermissionGateway for ThreadedHost {
    fn query_granted(&self, _id: &PermissionId) -> bool {
        false
    }

    fn should_show_rationale(&self, _id: &PermissionId) -> bool {
        false
    }

    fn request_permissions(
        &self,
        ids: &[PermissionId],
        _token: RequestToken,
        responder: HostResponder,
    ) {
        let ids = ids.to_vec();
        let grant = self.grant;
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            let grants = ids
                .into_iter()
                .map(|id| HostGrant { id, granted: grant })
                .collect();
            responder.respond(grants);
        });
    }
}

#[test]
fn test_result_delivered_from_another_thread() {
    let coordinator = Coordinator::new(
        Arc::new(ThreadedHost { grant: true }),
        Arc::new(MemoryStateStore::new()),
    );

    let (status, rx) = collect(&coordinator, &[CAMERA, MIC], 8, RequestOptions::new());
    assert_eq!(status, RequestStatus::Pending);

    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.granted, permission_ids([CAMERA, MIC]));
    assert_eq!(coordinator.pending_count(), 0);
    assert!(!coordinator.store().is_first_request(&MIC.into()).unwrap());
}

#[tokio::test]
async fn test_request_async_resolves() {
    let host = Arc::new(
        SimulatedGateway::with_mode(ResponseMode::Deferred).with_default_answer(UserAnswer::Grant),
    );
    let coordinator = Coordinator::new(host.clone(), Arc::new(MemoryStateStore::new()));

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move {
            coordinator
                .request_async(&permission_ids([CAMERA]), RequestToken(9), RequestOptions::new())
                .await
        })
    };

    while host.queued_count() == 0 {
        tokio::task::yield_now().await;
    }
    host.deliver_pending();

    let outcome = waiter.await.unwrap().unwrap();
    assert!(outcome.is_all_granted());
    assert_eq!(outcome.token, RequestToken(9));
}

/// Host answering on a fresh thread while it is still inside the call
struct SlowReturningHost;

impl HostPermissionGateway for SlowReturningHost {
    fn query_granted(&self, _id: &PermissionId) -> bool {
        false
    }

    fn should_show_rationale(&self, _id: &PermissionId) -> bool {
        false
    }

    fn request_permissions(
        &self,
        ids: &[PermissionId],
        _token: RequestToken,
        responder: HostResponder,
    ) {
        let grants: Vec<HostGrant> = ids.iter().cloned().map(HostGrant::granted).collect();
        thread::spawn(move || responder.respond(grants));
        thread::sleep(Duration::from_millis(20));
    }
}

/// Audit sink stalling on grant events
struct StallingAudit;

impl AuditSink for StallingAudit {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        if event.event_type == AuditEventType::PermissionGranted {
            thread::sleep(Duration::from_millis(100));
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

#[test]
fn test_status_reports_delivery_before_callback_runs() {
    let coordinator = Coordinator::with_audit(
        Arc::new(SlowReturningHost),
        Arc::new(MemoryStateStore::new()),
        Arc::new(StallingAudit),
    );

    let (status, rx) = collect(&coordinator, &[CAMERA], 10, RequestOptions::new());

    assert_eq!(status, RequestStatus::Delivered);
    let outcome = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(outcome.granted, permission_ids([CAMERA]));
}

/// First-request store whose reads or writes fail
#[derive(Default)]
struct BrokenStore {
    fail_reads: bool,
    write_attempts: AtomicUsize,
}

fn disk_error() -> StoreError {
    StoreError::Io(io::Error::new(io::ErrorKind::Other, "disk unavailable"))
}

impl PermissionStateStore for BrokenStore {
    fn is_first_request(&self, _id: &PermissionId) -> Result<bool, StoreError> {
        if self.fail_reads {
            Err(disk_error())
        } else {
            Ok(true)
        }
    }

    fn mark_requested(&self, _id: &PermissionId) -> Result<(), StoreError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        Err(disk_error())
    }

    fn requested(&self) -> Result<Vec<PermissionId>, StoreError> {
        Ok(Vec::new())
    }
}

#[test]
fn test_failed_history_write_still_delivers() {
    let host = Arc::new(SimulatedGateway::new());
    host.answer(CAMERA, UserAnswer::Grant);
    host.answer(MIC, UserAnswer::Deny);
    let store = Arc::new(BrokenStore::default());
    let coordinator = Coordinator::new(host.clone(), store.clone());

    let (status, rx) = collect(&coordinator, &[CAMERA, MIC], 11, RequestOptions::new());

    assert_eq!(status, RequestStatus::Delivered);
    let outcome = rx.recv().unwrap();
    assert_eq!(outcome.granted, permission_ids([CAMERA]));
    assert_eq!(outcome.denied, permission_ids([MIC]));
    assert_eq!(store.write_attempts.load(Ordering::SeqCst), 2);
    assert_eq!(coordinator.pending_count(), 0);
}

#[test]
fn test_failed_history_read_releases_token() {
    let host = Arc::new(SimulatedGateway::new());
    let store = Arc::new(BrokenStore {
        fail_reads: true,
        ..Default::default()
    });
    let coordinator = Coordinator::new(host.clone(), store);
    let ids = permission_ids([CAMERA]);

    for _ in 0..2 {
        let err = coordinator
            .request(&ids, RequestToken(12), RequestOptions::new(), |_| {
                panic!("callback must not run")
            })
            .unwrap_err();
        assert!(matches!(err, RequestError::Store(StoreError::Io(_))));
        assert!(!coordinator.is_pending(RequestToken(12)));
    }

    assert_eq!(host.request_count(), 0);
    assert_eq!(coordinator.pending_count(), 0);
}
