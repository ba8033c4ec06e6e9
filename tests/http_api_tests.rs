//! HTTP API tests against the router with an in-memory store

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    use loan_ledger_server::id::SnowflakeGenerator;
    use loan_ledger_server::loan::{
        AgreementLocator, InMemoryLoanStore, LoanEventBus, LoanService,
    };
    use loan_ledger_server::middleware::REQUEST_ID_HEADER;
    use loan_ledger_server::routes;
    use loan_ledger_server::state::AppState;

    fn test_app() -> Router {
        let service = LoanService::new(
            Arc::new(InMemoryLoanStore::new()),
            Arc::new(SnowflakeGenerator::new(1).unwrap()),
            LoanEventBus::default(),
            AgreementLocator::new("/srv/agreements"),
        );
        routes::app(AppState::new(Arc::new(service)))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn propose(app: &Router, principal: &str) -> u64 {
        let (status, body) = send(
            app,
            "POST",
            "/api/loans",
            Some(json!({
                "borrower_id": 1,
                "principal_amount": principal,
                "interest_rate": "0.1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["status"], "proposed");
        body["data"]["loan_id"].as_u64().unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_full_lifecycle_over_http() {
        let app = test_app();
        let loan_id = propose(&app, "1000").await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/loans/{}/approve", loan_id),
            Some(json!({ "employee_id": 7 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "approved");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/loans/{}/invest", loan_id),
            Some(json!({ "investor_id": 9, "amount": "1000" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["status"], "invested");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/loans/{}/disburse", loan_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "disbursed");

        let (status, body) = send(
            &app,
            "GET",
            &format!("/api/loans/{}/investments", loan_id),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_business_error_maps_to_unprocessable() {
        let app = test_app();
        let loan_id = propose(&app, "500").await;

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/loans/{}/invest", loan_id),
            Some(json!({ "investor_id": 9, "amount": "100" })),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["error"]["code"], "BUSINESS_ERROR");
        assert_eq!(body["error"]["message"], "loan not approved");
    }

    #[tokio::test]
    async fn test_unknown_loan_is_not_found() {
        let app = test_app();
        let (status, body) = send(&app, "GET", "/api/loans/12345", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["message"], "loan not found");
    }

    #[tokio::test]
    async fn test_invalid_input_is_bad_request() {
        let app = test_app();

        let (status, body) = send(
            &app,
            "POST",
            "/api/loans",
            Some(json!({
                "borrower_id": 1,
                "principal_amount": "-10",
                "interest_rate": "0.1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            "POST",
            "/api/loans",
            Some(json!({ "borrower_id": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = send(
            &app,
            "POST",
            "/api/loans",
            Some(json!({
                "borrower_id": "one",
                "principal_amount": "10",
                "interest_rate": "0.1"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, _) = send(&app, "GET", "/api/loans/not-a-number", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let app = test_app();

        let request = Request::builder()
            .method("POST")
            .uri("/api/loans")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{\"borrower_id\": 1,"))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["code"], "BAD_REQUEST");

        let (status, body) = send(
            &app,
            "POST",
            &format!("/api/loans/{}/approve", 1),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_list_loans_filters_by_status() {
        let app = test_app();
        let approved = propose(&app, "100").await;
        propose(&app, "200").await;
        send(
            &app,
            "POST",
            &format!("/api/loans/{}/approve", approved),
            Some(json!({ "employee_id": 3 })),
        )
        .await;

        let (status, body) = send(&app, "GET", "/api/loans?status=approved", None).await;
        assert_eq!(status, StatusCode::OK);
        let loans = body["data"].as_array().unwrap();
        assert_eq!(loans.len(), 1);
        assert_eq!(loans[0]["id"].as_u64(), Some(approved));

        let (_, body) = send(&app, "GET", "/api/loans?borrower_id=1", None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_request_id_is_echoed_or_generated() {
        let app = test_app();

        let request = Request::builder()
            .uri("/health")
            .header(REQUEST_ID_HEADER, "req-42")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.headers()[REQUEST_ID_HEADER], "req-42");

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    }
}
