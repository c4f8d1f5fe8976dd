mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_config::{AppConfig, StorageBackend};
use shared_database::supabase::SupabaseClient;
use shared_database::{SchedulingStore, StoreError, SupabaseStore};
use shared_models::{AppointmentStatus, SlotFilter, SlotUpdate};
use shared_utils::test_utils::{appointment_for, date, hm};
use shared_utils::ClinicClock;
use slot_cell::{LocationCatalog, PractitionerResolver, SlotError, SlotLifecycleService, SlotService};

use common::{single_location_catalog, Harness};

async fn generated(h: &Harness) {
    SlotLifecycleService::new(h.ctx.clone())
        .ensure_rolling_window(2)
        .await
        .unwrap();
}

#[tokio::test]
async fn bookable_listing_hides_started_booked_and_withdrawn_slots() {
    // Thursday 09:10: the 09:00 slot has already started.
    let h = Harness::new(single_location_catalog(), date(2025, 6, 12), hm(9, 10));
    generated(&h).await;
    let service = SlotService::new(h.ctx.clone());

    let today = service.list_bookable_slots(date(2025, 6, 12), None).await.unwrap();
    assert_eq!(today.len(), 1);
    assert_eq!(today[0].start_time, hm(9, 30));

    let tomorrow = service.list_slots(date(2025, 6, 13), None, None).await.unwrap();
    h.store
        .book_slot(tomorrow[0].id, appointment_for(Uuid::new_v4(), AppointmentStatus::Confirmed))
        .await
        .unwrap();
    service.set_availability(tomorrow[1].id, false).await.unwrap();

    let bookable = service.list_bookable_slots(date(2025, 6, 13), None).await.unwrap();
    assert!(bookable.is_empty());

    service.set_availability(tomorrow[1].id, true).await.unwrap();
    let restored = service.list_bookable_slots(date(2025, 6, 13), None).await.unwrap();
    assert_eq!(restored.len(), 1);
}

#[tokio::test]
async fn orphaned_slot_is_listed_as_bookable() {
    let h = Harness::new(single_location_catalog(), date(2025, 6, 12), hm(7, 0));
    generated(&h).await;
    let service = SlotService::new(h.ctx.clone());

    let slot = service.list_slots(date(2025, 6, 12), None, None).await.unwrap().remove(0);
    let (_, appointment) = h
        .store
        .book_slot(slot.id, appointment_for(Uuid::new_v4(), AppointmentStatus::Confirmed))
        .await
        .unwrap();
    h.store.purge_appointment_row(appointment.id).await;

    let bookable = service.list_bookable_slots(date(2025, 6, 12), None).await.unwrap();
    assert_eq!(bookable.len(), 2);
    assert!(bookable.iter().all(|s| !s.is_booked && s.binding_is_consistent()));
}

#[tokio::test]
async fn past_dates_have_no_bookable_slots() {
    let h = Harness::new(single_location_catalog(), date(2025, 6, 12), hm(7, 0));
    let service = SlotService::new(h.ctx.clone());
    assert!(service.list_bookable_slots(date(2025, 6, 11), None).await.unwrap().is_empty());
}

#[tokio::test]
async fn admin_slot_creation_enforces_uniqueness_and_times() {
    let h = Harness::new(single_location_catalog(), date(2025, 6, 12), hm(7, 0));
    let service = SlotService::new(h.ctx.clone());

    let slot = service
        .create_slot(date(2025, 6, 14), hm(16, 0), hm(16, 30), " B ".to_string(), None, None)
        .await
        .unwrap();
    assert_eq!(slot.location, "B");
    assert_eq!(slot.duration_minutes, 30);
    assert_eq!(slot.doctor_id, h.doctor_id);

    let duplicate = service
        .create_slot(date(2025, 6, 14), hm(16, 0), hm(16, 45), "B".to_string(), None, None)
        .await;
    assert_matches!(duplicate, Err(SlotError::Store(StoreError::DuplicateSlot(_))));

    let backwards = service
        .create_slot(date(2025, 6, 14), hm(17, 0), hm(16, 0), "B".to_string(), None, None)
        .await;
    assert_matches!(backwards, Err(SlotError::Validation(_)));

    let past = service
        .create_slot(date(2025, 6, 1), hm(9, 0), hm(9, 30), "B".to_string(), None, None)
        .await;
    assert_matches!(past, Err(SlotError::Validation(_)));
}

#[tokio::test]
async fn booked_slots_cannot_be_moved_or_deleted() {
    let h = Harness::new(single_location_catalog(), date(2025, 6, 12), hm(7, 0));
    generated(&h).await;
    let service = SlotService::new(h.ctx.clone());

    let slots = service.list_slots(date(2025, 6, 12), None, None).await.unwrap();
    h.store
        .book_slot(slots[0].id, appointment_for(Uuid::new_v4(), AppointmentStatus::Confirmed))
        .await
        .unwrap();

    let moved = service
        .edit_slot(
            slots[0].id,
            SlotUpdate {
                start_time: Some(hm(11, 0)),
                end_time: Some(hm(11, 30)),
                ..SlotUpdate::default()
            },
        )
        .await;
    assert_matches!(moved, Err(SlotError::Store(StoreError::SlotBooked(_))));
    assert_matches!(
        service.delete_slot(slots[0].id).await,
        Err(SlotError::Store(StoreError::SlotBooked(_)))
    );

    // Notes may still change on a booked slot.
    let noted = service
        .edit_slot(
            slots[0].id,
            SlotUpdate {
                notes: Some("bring reports".to_string()),
                ..SlotUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(noted.notes.as_deref(), Some("bring reports"));

    // The free one can be moved, then deleted.
    let edited = service
        .edit_slot(
            slots[1].id,
            SlotUpdate {
                start_time: Some(hm(11, 0)),
                end_time: Some(hm(11, 45)),
                ..SlotUpdate::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.duration_minutes, 45);
    service.delete_slot(slots[1].id).await.unwrap();

    let remaining = h.store.list_slots(&SlotFilter::on(date(2025, 6, 12))).await.unwrap();
    assert_eq!(remaining.len(), 1);
}

#[tokio::test]
async fn edit_rejects_end_before_start() {
    let h = Harness::new(single_location_catalog(), date(2025, 6, 12), hm(7, 0));
    generated(&h).await;
    let service = SlotService::new(h.ctx.clone());
    let slot = service.list_slots(date(2025, 6, 12), None, None).await.unwrap().remove(0);

    let result = service
        .edit_slot(
            slot.id,
            SlotUpdate {
                end_time: Some(hm(8, 0)),
                ..SlotUpdate::default()
            },
        )
        .await;
    assert_matches!(result, Err(SlotError::Validation(_)));
}

#[tokio::test]
async fn practitioner_is_looked_up_once_over_postgrest() {
    let server = MockServer::start().await;
    let doctor = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/profiles"))
        .and(query_param("role", "in.(doctor,admin)"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "id": doctor }])))
        .expect(1)
        .mount(&server)
        .await;

    let config = AppConfig {
        storage_backend: StorageBackend::Supabase,
        supabase_url: server.uri(),
        supabase_anon_key: "test-anon-key".to_string(),
        ..AppConfig::default()
    };
    let store: Arc<dyn SchedulingStore> = Arc::new(SupabaseStore::new(Arc::new(SupabaseClient::new(&config))));
    let resolver = PractitionerResolver::new(None, store);

    assert_eq!(resolver.resolve().await.unwrap(), doctor);
    assert_eq!(resolver.resolve().await.unwrap(), doctor);
}

#[tokio::test]
async fn catalog_file_is_loaded_from_config() {
    use std::io::Write;

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{"locations":[{{"code":"EVENING","sessions":[{{"days":[2],"from":"18:00","to":"19:00","slot_minutes":15}}]}}]}}"#
    )
    .unwrap();

    let config = AppConfig {
        slot_catalog_path: Some(file.path().display().to_string()),
        ..AppConfig::default()
    };
    let catalog = tokio_test::assert_ok!(LocationCatalog::from_config(&config));
    assert_eq!(catalog.time_slots_for("EVENING", 2).len(), 4);
    assert!(!catalog.contains("MAIN"));

    let missing = AppConfig {
        slot_catalog_path: Some("/nonexistent/catalog.json".to_string()),
        ..AppConfig::default()
    };
    assert_matches!(
        LocationCatalog::from_config(&missing),
        Err(slot_cell::CatalogError::Io { .. })
    );

    // Tuesday in IST.
    assert_eq!(ClinicClock::day_of_week(date(2025, 6, 10)), 2);
}
