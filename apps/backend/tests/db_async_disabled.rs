mod common;

use actix_web::http::StatusCode;
use actix_web::test;
use backend_test_support::problem_details::assert_problem_details_from_service_response;

#[actix_web::test]
async fn async_routes_fail_with_config_error_when_async_disabled() {
    let registry = common::offline_registry(false);
    let app = common::create_test_app(registry.clone()).await;

    let req = test::TestRequest::get().uri("/db/async-examples").to_request();
    let resp = test::call_service(&app, req).await;
    let problem =
        assert_problem_details_from_service_response(resp, "DB_CONFIG", StatusCode::INTERNAL_SERVER_ERROR)
            .await;
    assert!(!problem.detail.contains("postgresql"));

    let req = test::TestRequest::post()
        .uri("/db/async-examples")
        .set_json(serde_json::json!({"name": "never stored"}))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_problem_details_from_service_response(resp, "DB_CONFIG", StatusCode::INTERNAL_SERVER_ERROR)
        .await;

    registry.close_db().await;
}

#[actix_web::test]
async fn disposed_registry_reports_config_error_on_sync_routes() {
    let registry = common::offline_registry(false);
    registry.close_db().await;
    let app = common::create_test_app(registry).await;

    let req = test::TestRequest::get().uri("/db/examples").to_request();
    let resp = test::call_service(&app, req).await;
    assert_problem_details_from_service_response(resp, "DB_CONFIG", StatusCode::INTERNAL_SERVER_ERROR)
        .await;
}

#[actix_web::test]
async fn error_body_trace_id_matches_request_id() {
    let registry = common::offline_registry(false);
    let app = common::create_test_app(registry.clone()).await;

    let sent = "0b7c6f4e-2d1a-4c3b-9e8f-7a6b5c4d3e2f";
    let req = test::TestRequest::get()
        .uri("/db/async-examples")
        .insert_header(("x-request-id", sent))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.headers().get("x-request-id").unwrap(), sent);
    let problem =
        assert_problem_details_from_service_response(resp, "DB_CONFIG", StatusCode::INTERNAL_SERVER_ERROR)
            .await;
    assert_eq!(problem.trace_id, sent);

    registry.close_db().await;
}
