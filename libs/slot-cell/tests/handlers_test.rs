mod common;

use assert_matches::assert_matches;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;

use shared_models::error::AppError;
use shared_utils::test_utils::{date, hm};
use slot_cell::handlers::*;
use slot_cell::models::{
    BookableSlotQuery, CreateSlotRequest, EditSlotRequest, GenerateSlotsRequest, RollingWindowQuery,
    SetAvailabilityRequest, SlotListQuery,
};

use common::{single_location_catalog, Harness};

fn harness() -> Harness {
    Harness::new(single_location_catalog(), date(2025, 6, 12), hm(7, 0))
}

#[tokio::test]
async fn ensure_window_then_list_by_flexible_date() {
    let h = harness();

    let Json(body) = ensure_rolling_window(State(h.ctx.clone()), Query(RollingWindowQuery::default()))
        .await
        .unwrap();
    assert_eq!(body["report"]["operation"], "ensure_rolling_window");
    assert_eq!(body["report"]["affected"], 12);
    assert_eq!(body["through"], "2025-06-18");

    let Json(listed) = list_slots(
        State(h.ctx.clone()),
        Query(SlotListQuery {
            date: "13/06/2025".to_string(),
            location: Some("A".to_string()),
            doctor_id: None,
        }),
    )
    .await
    .unwrap();
    assert_eq!(listed["total"], 2);
    assert_eq!(listed["slots"][0]["start_time"], "09:00");
    assert_eq!(listed["slots"][1]["start_time"], "09:30");
}

#[tokio::test]
async fn malformed_date_is_a_validation_error() {
    let h = harness();
    let result = list_bookable_slots(
        State(h.ctx.clone()),
        Query(BookableSlotQuery {
            date: "2025-13-45".to_string(),
            location: None,
        }),
    )
    .await;

    let err = result.unwrap_err();
    assert_matches!(err, AppError::ValidationError(_));
    assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn generate_requires_both_range_ends() {
    let h = harness();
    let result = generate_slots(
        State(h.ctx.clone()),
        Json(GenerateSlotsRequest {
            from: Some("2025-06-12".to_string()),
            ..GenerateSlotsRequest::default()
        }),
    )
    .await;
    assert_matches!(result, Err(AppError::ValidationError(_)));

    let Json(report) = generate_slots(
        State(h.ctx.clone()),
        Json(GenerateSlotsRequest {
            date: Some("2025-06-14".to_string()),
            ..GenerateSlotsRequest::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(report["operation"], "generate_slots");
    assert_eq!(report["affected"], 2);
}

#[tokio::test]
async fn slot_admin_round_trip_over_handlers() {
    let h = harness();

    let Json(created) = create_slot(
        State(h.ctx.clone()),
        Json(CreateSlotRequest {
            date: "2025-06-14".to_string(),
            start_time: "15:00".to_string(),
            end_time: "15:20".to_string(),
            location: "A".to_string(),
            notes: Some("extra session".to_string()),
            created_by: None,
        }),
    )
    .await
    .unwrap();
    let slot_id: uuid::Uuid = serde_json::from_value(created["slot"]["id"].clone()).unwrap();
    assert_eq!(created["slot"]["duration_minutes"], 20);

    let duplicate = create_slot(
        State(h.ctx.clone()),
        Json(CreateSlotRequest {
            date: "14/06/2025".to_string(),
            start_time: "15:00".to_string(),
            end_time: "15:30".to_string(),
            location: "A".to_string(),
            notes: None,
            created_by: None,
        }),
    )
    .await;
    let err = duplicate.unwrap_err();
    assert_eq!(err.status_code(), StatusCode::CONFLICT);

    let Json(edited) = edit_slot(
        State(h.ctx.clone()),
        Path(slot_id),
        Json(EditSlotRequest {
            start_time: Some("15:10".to_string()),
            end_time: Some("15:40".to_string()),
            ..EditSlotRequest::default()
        }),
    )
    .await
    .unwrap();
    assert_eq!(edited["slot"]["start_time"], "15:10");

    let Json(withdrawn) = set_slot_availability(
        State(h.ctx.clone()),
        Path(slot_id),
        Json(SetAvailabilityRequest { is_available: false }),
    )
    .await
    .unwrap();
    assert_eq!(withdrawn["slot"]["is_available"], false);

    let Json(fetched) = get_slot(State(h.ctx.clone()), Path(slot_id)).await.unwrap();
    assert_eq!(fetched["slot"]["notes"], "extra session");
    assert_eq!(fetched["slot"]["end_time"], "15:40");

    delete_slot(State(h.ctx.clone()), Path(slot_id)).await.unwrap();
    let missing = get_slot(State(h.ctx.clone()), Path(slot_id)).await.unwrap_err();
    assert_eq!(missing.status_code(), StatusCode::NOT_FOUND);
    let gone = delete_slot(State(h.ctx.clone()), Path(slot_id)).await.unwrap_err();
    assert_eq!(gone.status_code(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn maintenance_endpoints_report_nothing_to_do() {
    let h = harness();

    for result in [
        cleanup_past_slots(State(h.ctx.clone())).await,
        cleanup_past_appointments(State(h.ctx.clone())).await,
        force_cleanup(State(h.ctx.clone())).await,
        repair_orphan_slots(State(h.ctx.clone())).await,
    ] {
        let Json(report) = result.unwrap();
        assert_eq!(report["affected"], 0);
        assert_eq!(report["failures"].as_array().map(Vec::len), Some(0));
    }
}

#[tokio::test]
async fn router_builds_with_nested_maintenance_routes() {
    let h = harness();
    let _router = slot_cell::router::slot_routes(h.ctx.clone());
}
