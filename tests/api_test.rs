use std::sync::Arc;

use anyhow::Result;
use doorlog::api::{handle_request, ApiState};
use hyper::{Body, Method, Request, Response, StatusCode};
use serde_json::{json, Value};
use tempfile::TempDir;

async fn test_state(auth_token: Option<&str>) -> Result<(Arc<ApiState>, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let service =
        doorlog::application::LedgerService::init(db_path.to_str().unwrap()).await?;
    let state = Arc::new(ApiState {
        service,
        auth_token: auth_token.map(String::from),
    });
    Ok((state, temp_dir))
}

fn request(method: Method, uri: &str, body: Option<Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);
    match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn body_json(response: Response<Body>) -> Result<Value> {
    let bytes = hyper::body::to_bytes(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn test_post_creates_entry() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    let response = handle_request(
        request(
            Method::POST,
            "/entries",
            Some(json!({"departureTime": "2024-01-01T10:00:00Z", "estimatedDuration": 30})),
        ),
        Arc::clone(&state),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let entry = body_json(response).await?;
    assert_eq!(entry["estimatedDuration"], 30);
    assert!(entry["returnTime"].is_null());
    assert!(entry["lateBy"].is_null());
    assert!(entry["id"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_post_without_departure_time_defaults_to_now() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    let response = handle_request(
        request(Method::POST, "/entries", Some(json!({"estimatedDuration": 30}))),
        Arc::clone(&state),
    )
    .await;

    assert_eq!(response.status(), StatusCode::CREATED);
    let entry = body_json(response).await?;
    assert!(entry["departureTime"].is_string());

    Ok(())
}

#[tokio::test]
async fn test_get_lists_entries_most_recent_first() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    for departure in ["2024-01-01T10:00:00Z", "2024-01-03T10:00:00Z", "2024-01-02T10:00:00Z"] {
        let response = handle_request(
            request(
                Method::POST,
                "/entries",
                Some(json!({"departureTime": departure, "estimatedDuration": 30})),
            ),
            Arc::clone(&state),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let response = handle_request(request(Method::GET, "/entries", None), Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::OK);

    let entries = body_json(response).await?;
    let departures: Vec<&str> = entries
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["departureTime"].as_str().unwrap())
        .collect();
    assert_eq!(
        departures,
        vec![
            "2024-01-03T10:00:00Z",
            "2024-01-02T10:00:00Z",
            "2024-01-01T10:00:00Z",
        ]
    );

    Ok(())
}

#[tokio::test]
async fn test_put_closes_entry_with_lateness() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    let created = body_json(
        handle_request(
            request(
                Method::POST,
                "/entries",
                Some(json!({"departureTime": "2024-01-01T10:00:00Z", "estimatedDuration": 30})),
            ),
            Arc::clone(&state),
        )
        .await,
    )
    .await?;
    let id = created["id"].as_str().unwrap().to_string();

    let response = handle_request(
        request(
            Method::PUT,
            &format!("/entries/{}", id),
            Some(json!({"returnTime": "2024-01-01T10:40:00Z"})),
        ),
        Arc::clone(&state),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let entry = body_json(response).await?;
    assert_eq!(entry["lateBy"], 10);
    assert_eq!(entry["returnTime"], "2024-01-01T10:40:00Z");

    Ok(())
}

#[tokio::test]
async fn test_error_categories_are_distinct() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    // Validation: non-positive duration
    let response = handle_request(
        request(Method::POST, "/entries", Some(json!({"estimatedDuration": -5}))),
        Arc::clone(&state),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await?["error"], "validation");

    // Validation: unparseable departure time
    let response = handle_request(
        request(
            Method::POST,
            "/entries",
            Some(json!({"departureTime": "yesterday", "estimatedDuration": 30})),
        ),
        Arc::clone(&state),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Not found: unknown id
    let response = handle_request(
        request(
            Method::PUT,
            "/entries/nonexistent-id",
            Some(json!({"returnTime": "2024-01-01T10:40:00Z"})),
        ),
        Arc::clone(&state),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await?["error"], "not_found");

    // Conflict: double close
    let created = body_json(
        handle_request(
            request(
                Method::POST,
                "/entries",
                Some(json!({"departureTime": "2024-01-01T10:00:00Z", "estimatedDuration": 30})),
            ),
            Arc::clone(&state),
        )
        .await,
    )
    .await?;
    let id = created["id"].as_str().unwrap().to_string();
    let close = |return_time: &str| {
        request(
            Method::PUT,
            &format!("/entries/{}", id),
            Some(json!({"returnTime": return_time})),
        )
    };
    let response = handle_request(close("2024-01-01T10:40:00Z"), Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let response = handle_request(close("2024-01-01T11:00:00Z"), Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(body_json(response).await?["error"], "conflict");

    Ok(())
}

#[tokio::test]
async fn test_post_rejects_oversized_duration() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    let response = handle_request(
        request(
            Method::POST,
            "/entries",
            Some(json!({
                "departureTime": "2024-01-01T10:00:00Z",
                "estimatedDuration": i64::MAX,
            })),
        ),
        Arc::clone(&state),
    )
    .await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await?["error"], "validation");

    Ok(())
}

#[tokio::test]
async fn test_storage_failure_maps_to_500() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let db_url = format!("sqlite:{}?mode=rwc", db_path.to_str().unwrap());
    let service =
        doorlog::application::LedgerService::init(db_path.to_str().unwrap()).await?;
    let state = Arc::new(ApiState {
        service,
        auth_token: None,
    });

    let response = handle_request(
        request(
            Method::POST,
            "/entries",
            Some(json!({"departureTime": "2024-01-01T10:00:00Z", "estimatedDuration": 30})),
        ),
        Arc::clone(&state),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    // Corrupt the payload behind the store's back
    let pool = sqlx::SqlitePool::connect(&db_url).await?;
    sqlx::query("UPDATE collections SET payload = 'not json' WHERE name = 'entries'")
        .execute(&pool)
        .await?;

    let response = handle_request(request(Method::GET, "/entries", None), Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_json(response).await?["error"], "storage");

    Ok(())
}

#[tokio::test]
async fn test_auth_token_gates_mutating_routes() -> Result<()> {
    let (state, _temp) = test_state(Some("secret")).await?;

    // Without credentials the mutating route is refused
    let response = handle_request(
        request(
            Method::POST,
            "/entries",
            Some(json!({"departureTime": "2024-01-01T10:00:00Z", "estimatedDuration": 30})),
        ),
        Arc::clone(&state),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    // Reads stay open
    let response = handle_request(request(Method::GET, "/entries", None), Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::OK);

    // With the right token the write goes through
    let authed = Request::builder()
        .method(Method::POST)
        .uri("/entries")
        .header("authorization", "Bearer secret")
        .body(Body::from(
            json!({"departureTime": "2024-01-01T10:00:00Z", "estimatedDuration": 30}).to_string(),
        ))
        .unwrap();
    let response = handle_request(authed, Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::CREATED);

    Ok(())
}

#[tokio::test]
async fn test_unknown_route_is_not_found() -> Result<()> {
    let (state, _temp) = test_state(None).await?;

    let response = handle_request(request(Method::GET, "/nope", None), Arc::clone(&state)).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    Ok(())
}
