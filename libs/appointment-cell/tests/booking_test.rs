mod common;

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use futures::future::join_all;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use appointment_cell::models::{AppointmentError, SlotTarget};
use appointment_cell::services::AppointmentBookingService;
use shared_config::{AppConfig, StorageBackend};
use shared_database::{build_store, SchedulingStore};
use shared_models::error::AppError;
use shared_models::{AppointmentChanges, AppointmentDetails, AppointmentPriority, AppointmentStatus, SlotUpdate};
use shared_utils::test_utils::{clock_at, date, hm};
use slot_cell::{LocationCatalog, SchedulingContext};

use common::{at_slot, details, today, tomorrow, Harness};

fn service(h: &Harness) -> AppointmentBookingService {
    AppointmentBookingService::new(h.ctx.clone())
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn booking_confirms_and_binds_the_slot() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let patient = Uuid::new_v4();

    let outcome = service(&h)
        .book(at_slot(&slot), None, patient, false, details("Follow-up"))
        .await
        .unwrap();

    assert_eq!(outcome.appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(outcome.appointment.appointment_date, tomorrow());
    assert_eq!(outcome.appointment.appointment_time, hm(10, 0));
    assert_eq!(outcome.appointment.duration_minutes, 30);
    assert_eq!(outcome.appointment.location, "MAIN");
    assert_eq!(outcome.appointment.reason.as_deref(), Some("Follow-up"));

    let stored = h.reload(slot.id).await;
    assert!(stored.is_bound_to(outcome.appointment.id));
    assert_eq!(stored.booked_by, Some(patient));
    h.assert_consistent().await;
}

#[tokio::test]
async fn second_booking_of_a_slot_conflicts_and_leaves_the_first_untouched() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let first_patient = Uuid::new_v4();

    let first = service(&h)
        .book(at_slot(&slot), None, first_patient, false, AppointmentDetails::default())
        .await
        .unwrap();

    let second = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await;
    let err = second.unwrap_err();
    assert_matches!(err, AppointmentError::SlotUnavailable(id) if id == slot.id);
    assert_matches!(AppError::from(err), AppError::Conflict(_));

    let stored = h.reload(slot.id).await;
    assert_eq!(stored.appointment_id, Some(first.appointment.id));
    assert_eq!(stored.booked_by, Some(first_patient));
    assert_eq!(h.store.appointment_count().await, 1);
}

#[tokio::test]
async fn concurrent_bookings_of_one_slot_have_exactly_one_winner() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 30), "MAIN").await;

    let attempts = (0..8).map(|_| {
        let booking = service(&h);
        let target = at_slot(&slot);
        async move {
            booking
                .book(target, None, Uuid::new_v4(), false, AppointmentDetails::default())
                .await
        }
    });
    let results = join_all(attempts).await;

    let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(result, Err(AppointmentError::SlotUnavailable(_)));
    }

    let stored = h.reload(slot.id).await;
    assert_eq!(stored.appointment_id, Some(winners[0].appointment.id));
    assert_eq!(h.store.appointment_count().await, 1);
    h.assert_consistent().await;
}

#[tokio::test]
async fn booking_by_date_and_time_uses_the_configured_practitioner() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(11, 0), "MAIN").await;

    let outcome = service(&h)
        .book(
            SlotTarget::At {
                date: tomorrow(),
                time: hm(11, 0),
                location: None,
            },
            None,
            Uuid::new_v4(),
            false,
            AppointmentDetails::default(),
        )
        .await
        .unwrap();

    assert_eq!(outcome.slot.id, slot.id);
    assert_eq!(outcome.appointment.doctor_id, h.doctor_id);
}

#[tokio::test]
async fn booking_an_unknown_time_is_not_found() {
    let h = Harness::new();
    h.slot(tomorrow(), hm(11, 0), "MAIN").await;

    let result = service(&h)
        .book(
            SlotTarget::At {
                date: tomorrow(),
                time: hm(11, 15),
                location: None,
            },
            None,
            Uuid::new_v4(),
            false,
            AppointmentDetails::default(),
        )
        .await;

    let err = result.unwrap_err();
    assert_matches!(err, AppointmentError::NoSlotAt { .. });
    assert_matches!(AppError::from(err), AppError::NotFound(_));
}

#[tokio::test]
async fn same_time_at_two_locations_needs_a_location() {
    let h = Harness::new();
    h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let outreach = h.slot(tomorrow(), hm(10, 0), "OUTREACH").await;

    let ambiguous = service(&h)
        .book(
            SlotTarget::At {
                date: tomorrow(),
                time: hm(10, 0),
                location: None,
            },
            None,
            Uuid::new_v4(),
            false,
            AppointmentDetails::default(),
        )
        .await;
    assert_matches!(ambiguous, Err(AppointmentError::ValidationError(_)));

    let outcome = service(&h)
        .book(
            SlotTarget::At {
                date: tomorrow(),
                time: hm(10, 0),
                location: Some("OUTREACH".to_string()),
            },
            None,
            Uuid::new_v4(),
            false,
            AppointmentDetails::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.slot.id, outreach.id);
}

#[tokio::test]
async fn doctor_cannot_be_booked_twice_at_the_same_instant() {
    let h = Harness::new();
    let main = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let outreach = h.slot(tomorrow(), hm(10, 0), "OUTREACH").await;

    service(&h)
        .book(at_slot(&main), None, Uuid::new_v4(), true, AppointmentDetails::default())
        .await
        .unwrap();

    let clash = service(&h)
        .book(at_slot(&outreach), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await;
    assert_matches!(clash, Err(AppointmentError::DoctorConflict { time, .. }) if time == hm(10, 0));

    assert!(!h.reload(outreach.id).await.is_booked);
    h.assert_consistent().await;
}

#[tokio::test]
async fn started_and_withdrawn_slots_cannot_be_booked() {
    let h = Harness::new();
    let started = h.slot(today(), hm(6, 30), "MAIN").await;
    let withdrawn = h.slot(tomorrow(), hm(12, 0), "MAIN").await;
    h.store
        .update_slot(withdrawn.id, SlotUpdate::availability(false))
        .await
        .unwrap();

    let late = service(&h)
        .book(at_slot(&started), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await;
    assert_matches!(late, Err(AppointmentError::ValidationError(_)));

    let closed = service(&h)
        .book(at_slot(&withdrawn), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await;
    assert_matches!(closed, Err(AppointmentError::SlotUnavailable(id)) if id == withdrawn.id);

    assert_eq!(h.store.appointment_count().await, 0);
}

#[tokio::test]
async fn orphaned_slot_is_reclaimed_on_booking() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;

    let first = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();
    assert!(h.store.purge_appointment_row(first.appointment.id).await);

    let second = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();

    assert!(h.reload(slot.id).await.is_bound_to(second.appointment.id));
    h.assert_consistent().await;
}

// ==============================================================================
// CANCEL / RELEASE
// ==============================================================================

#[tokio::test]
async fn cancel_deletes_the_appointment_and_frees_the_slot() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let booked = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();

    let removed = service(&h)
        .cancel(booked.appointment.id, Some("Feeling better".to_string()))
        .await
        .unwrap();

    assert_eq!(removed.appointment.id, booked.appointment.id);
    assert_eq!(removed.released_slot.map(|s| s.id), Some(slot.id));
    assert!(h.reload(slot.id).await.is_bookable());
    assert_matches!(
        service(&h).get(booked.appointment.id).await,
        Err(AppointmentError::NotFound(_))
    );

    // Freed slot is immediately bookable again.
    service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();
    h.assert_consistent().await;
}

#[tokio::test]
async fn past_dated_confirmed_appointment_can_still_be_cancelled() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let booked = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();

    let next_week = Arc::new(SchedulingContext::new(
        h.ctx.config.clone(),
        h.store.clone() as Arc<dyn SchedulingStore>,
        clock_at(date(2025, 6, 20), hm(9, 0)),
        LocationCatalog::builtin(),
    ));

    let removed = AppointmentBookingService::new(next_week)
        .cancel(booked.appointment.id, None)
        .await
        .unwrap();
    assert_eq!(removed.released_slot.map(|s| s.id), Some(slot.id));
}

#[tokio::test]
async fn finished_appointments_cannot_be_cancelled() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let id = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap()
        .appointment
        .id;

    service(&h).set_status(id, AppointmentStatus::InProgress, None).await.unwrap();
    service(&h).set_status(id, AppointmentStatus::Completed, None).await.unwrap();

    let err = service(&h).cancel(id, None).await.unwrap_err();
    assert_matches!(
        err,
        AppointmentError::InvalidTransition {
            status: AppointmentStatus::Completed,
            ..
        }
    );
    assert_eq!(AppError::from(err).status_code().as_u16(), 422);

    // The completed appointment keeps its slot as history.
    assert!(h.reload(slot.id).await.is_bound_to(id));
}

#[tokio::test]
async fn cancel_of_unknown_appointment_is_not_found() {
    let h = Harness::new();
    let result = service(&h).cancel(Uuid::new_v4(), None).await;
    assert_matches!(result, Err(AppointmentError::NotFound(_)));
}

#[tokio::test]
async fn release_is_idempotent() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let id = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap()
        .appointment
        .id;

    let first = service(&h).release(id).await.unwrap();
    assert_eq!(first.map(|s| s.id), Some(slot.id));

    let second = service(&h).release(id).await.unwrap();
    assert!(second.is_none());
    assert!(service(&h).release(Uuid::new_v4()).await.unwrap().is_none());
    assert!(h.reload(slot.id).await.is_bookable());
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

#[tokio::test]
async fn reschedule_moves_the_same_appointment_to_the_new_slot() {
    let h = Harness::new();
    let s1 = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let s2 = h.slot(date(2025, 6, 14), hm(11, 30), "MAIN").await;

    let booked = service(&h)
        .book(at_slot(&s1), None, Uuid::new_v4(), true, details("Checkup"))
        .await
        .unwrap();
    assert_eq!(booked.appointment.status, AppointmentStatus::Pending);

    let moved = service(&h)
        .reschedule(
            booked.appointment.id,
            at_slot(&s2),
            AppointmentChanges {
                priority: Some(AppointmentPriority::High),
                ..AppointmentChanges::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(moved.appointment.id, booked.appointment.id);
    assert_eq!(moved.appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(moved.appointment.appointment_date, date(2025, 6, 14));
    assert_eq!(moved.appointment.appointment_time, hm(11, 30));
    assert_eq!(moved.appointment.priority, AppointmentPriority::High);
    assert_eq!(moved.appointment.reason.as_deref(), Some("Checkup"));

    assert!(h.reload(s1.id).await.is_bookable());
    assert!(h.reload(s2.id).await.is_bound_to(booked.appointment.id));
    assert_eq!(h.store.appointment_count().await, 1);
    h.assert_consistent().await;
}

#[tokio::test]
async fn reschedule_onto_a_taken_slot_changes_nothing() {
    let h = Harness::new();
    let s1 = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let s2 = h.slot(tomorrow(), hm(10, 30), "MAIN").await;

    let mine = service(&h)
        .book(at_slot(&s1), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();
    let theirs = service(&h)
        .book(at_slot(&s2), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap();

    let result = service(&h)
        .reschedule(mine.appointment.id, at_slot(&s2), AppointmentChanges::default())
        .await;
    assert_matches!(result, Err(AppointmentError::SlotUnavailable(id)) if id == s2.id);

    assert!(h.reload(s1.id).await.is_bound_to(mine.appointment.id));
    assert!(h.reload(s2.id).await.is_bound_to(theirs.appointment.id));
    assert_eq!(service(&h).get(mine.appointment.id).await.unwrap().appointment_time, hm(10, 0));
}

#[tokio::test]
async fn in_progress_appointment_cannot_be_rescheduled() {
    let h = Harness::new();
    let s1 = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let s2 = h.slot(tomorrow(), hm(10, 30), "MAIN").await;
    let id = service(&h)
        .book(at_slot(&s1), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap()
        .appointment
        .id;
    service(&h).set_status(id, AppointmentStatus::InProgress, None).await.unwrap();

    let result = service(&h).reschedule(id, at_slot(&s2), AppointmentChanges::default()).await;
    assert_matches!(result, Err(AppointmentError::InvalidTransition { .. }));
    assert!(h.reload(s2.id).await.is_bookable());
}

// ==============================================================================
// APPROVAL
// ==============================================================================

#[tokio::test]
async fn pending_request_holds_the_slot_until_approved() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let staff = Uuid::new_v4();

    let requested = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), true, AppointmentDetails::default())
        .await
        .unwrap();
    assert_eq!(requested.appointment.status, AppointmentStatus::Pending);
    assert!(h.reload(slot.id).await.is_bound_to(requested.appointment.id));

    let competing = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await;
    assert_matches!(competing, Err(AppointmentError::SlotUnavailable(_)));

    let approved = service(&h).approve(requested.appointment.id, Some(staff)).await.unwrap();
    assert_eq!(approved.status, AppointmentStatus::Confirmed);
    assert_eq!(approved.updated_by, Some(staff));

    let again = service(&h).approve(requested.appointment.id, Some(staff)).await;
    assert_matches!(again, Err(AppointmentError::InvalidTransition { .. }));
}

#[tokio::test]
async fn rejection_deletes_the_request_and_frees_the_slot() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let requested = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), true, AppointmentDetails::default())
        .await
        .unwrap();

    let blank = service(&h).reject(requested.appointment.id, "  ".to_string(), None).await;
    assert_matches!(blank, Err(AppointmentError::ValidationError(_)));

    let removed = service(&h)
        .reject(requested.appointment.id, "Doctor on leave".to_string(), None)
        .await
        .unwrap();
    assert_eq!(removed.reason.as_deref(), Some("Doctor on leave"));
    assert!(h.reload(slot.id).await.is_bookable());
    assert_eq!(h.store.appointment_count().await, 0);
}

#[tokio::test]
async fn confirmed_appointment_cannot_be_rejected_or_set_to_cancelled() {
    let h = Harness::new();
    let slot = h.slot(tomorrow(), hm(10, 0), "MAIN").await;
    let id = service(&h)
        .book(at_slot(&slot), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap()
        .appointment
        .id;

    assert_matches!(
        service(&h).reject(id, "No".to_string(), None).await,
        Err(AppointmentError::InvalidTransition { .. })
    );
    assert_matches!(
        service(&h).set_status(id, AppointmentStatus::Cancelled, None).await,
        Err(AppointmentError::InvalidTransition { .. })
    );
    assert_eq!(service(&h).get(id).await.unwrap().status, AppointmentStatus::Confirmed);
}

// ==============================================================================
// INVARIANTS / STORAGE
// ==============================================================================

#[tokio::test]
async fn slot_and_appointment_stay_consistent_across_a_mixed_sequence() {
    let h = Harness::new();
    let slots = [
        h.slot(tomorrow(), hm(10, 0), "MAIN").await,
        h.slot(tomorrow(), hm(10, 30), "MAIN").await,
        h.slot(tomorrow(), hm(11, 0), "MAIN").await,
        h.slot(tomorrow(), hm(11, 30), "MAIN").await,
    ];

    let a = service(&h)
        .book(at_slot(&slots[0]), None, Uuid::new_v4(), false, AppointmentDetails::default())
        .await
        .unwrap()
        .appointment
        .id;
    h.assert_consistent().await;

    let b = service(&h)
        .book(at_slot(&slots[1]), None, Uuid::new_v4(), true, AppointmentDetails::default())
        .await
        .unwrap()
        .appointment
        .id;
    h.assert_consistent().await;

    service(&h).reschedule(a, at_slot(&slots[2]), AppointmentChanges::default()).await.unwrap();
    h.assert_consistent().await;

    let _ = service(&h).reschedule(b, at_slot(&slots[2]), AppointmentChanges::default()).await;
    h.assert_consistent().await;

    service(&h).cancel(b, None).await.unwrap();
    h.assert_consistent().await;

    service(&h).reschedule(a, at_slot(&slots[3]), AppointmentChanges::default()).await.unwrap();
    h.assert_consistent().await;

    let booked: Vec<_> = futures::future::join_all(slots.iter().map(|s| h.reload(s.id)))
        .await
        .into_iter()
        .filter(|s| s.is_booked)
        .collect();
    assert_eq!(booked.len(), 1);
    assert_eq!(booked[0].id, slots[3].id);
}

#[tokio::test]
async fn slow_storage_surfaces_as_retryable_unavailability() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/rest/v1/slots"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!([]))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let config = AppConfig {
        storage_backend: StorageBackend::Supabase,
        supabase_url: server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        practitioner_id: Some(Uuid::new_v4()),
        storage_timeout_ms: 50,
        ..AppConfig::default()
    };
    let store = build_store(&config);
    let ctx = Arc::new(SchedulingContext::new(
        Arc::new(config),
        store,
        clock_at(today(), hm(7, 0)),
        LocationCatalog::builtin(),
    ));

    let err = AppointmentBookingService::new(ctx)
        .book(
            SlotTarget::Slot(Uuid::new_v4()),
            None,
            Uuid::new_v4(),
            false,
            AppointmentDetails::default(),
        )
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    let app_error = AppError::from(err);
    assert_matches!(app_error, AppError::StorageUnavailable(_));
    assert!(app_error.is_retryable());
}
