#[macro_use]
mod common;

use actix_web::test;
use serde_json::json;

#[actix_web::test]
async fn test_login_requires_credentials() {
    let state = common::lazy_state();
    let app = test_app!(state);

    let response = test::TestRequest::post()
        .uri("/users/login/")
        .set_json(json!({ "username": "" }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = test::read_body_json(response).await;
    assert_eq!(body["error"]["fields"]["username"][0], "This field may not be blank.");
    assert_eq!(body["error"]["fields"]["password"][0], "This field is required.");
}

#[actix_web::test]
async fn test_malformed_json_is_a_validation_error() {
    let state = common::lazy_state();
    let app = test_app!(state);

    let response = test::TestRequest::post()
        .uri("/users/login")
        .insert_header(("Content-Type", "application/json"))
        .set_payload("{not json")
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = test::read_body_json(response).await;
    assert!(body["error"]["fields"]["non_field_errors"][0]
        .as_str()
        .unwrap()
        .starts_with("JSON parse error"));
}

#[actix_web::test]
async fn test_refresh_rejects_access_tokens() {
    let state = common::lazy_state();
    let app = test_app!(state);

    let tokens = state.auth.issue_tokens(&common::token_only_user()).unwrap();
    let response = test::TestRequest::post()
        .uri("/token/refresh/")
        .set_json(json!({ "refresh": tokens.access }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);

    let response = test::TestRequest::post()
        .uri("/token/refresh/")
        .set_json(json!({ "refresh": "not-a-jwt" }))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);
}

#[actix_web::test]
async fn test_refresh_token_is_not_a_bearer_credential() {
    let state = common::lazy_state();
    let app = test_app!(state);

    let tokens = state.auth.issue_tokens(&common::token_only_user()).unwrap();
    let response = test::TestRequest::get()
        .uri("/users/")
        .insert_header(("Authorization", format!("Bearer {}", tokens.refresh)))
        .send_request(&app)
        .await;
    assert_eq!(response.status(), 401);
}

#[actix_web::test]
async fn test_register_validates_before_touching_the_database() {
    let state = common::lazy_state();
    let app = test_app!(state);

    let response = test::TestRequest::post()
        .uri("/users/")
        .set_json(json!({
            "username": "bad name",
            "password": "short",
            "email": "not-an-email"
        }))
        .send_request(&app)
        .await;

    assert_eq!(response.status(), 400);
    let body: serde_json::Value = test::read_body_json(response).await;
    let fields = &body["error"]["fields"];
    assert!(fields["username"].is_array());
    assert!(fields["password"].is_array());
    assert_eq!(fields["email"][0], "Enter a valid email address.");
}
