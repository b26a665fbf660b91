//! Router-level tests over the in-memory store.

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use classroom_api::{app, AppState, MemoryStore};
use serde_json::{json, Value};
use tower::ServiceExt;

fn router() -> Router {
    app(AppState::new(MemoryStore::new()), 1024 * 1024)
}

async fn call(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(v) => builder
            .header("content-type", "application/json")
            .body(Body::from(v.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create(router: &Router, uri: &str, body: Value) -> String {
    let (status, value) = call(router, Method::POST, uri, Some(body)).await;
    assert_eq!(status, StatusCode::CREATED, "{value}");
    value["data"]["id"].as_str().unwrap().to_string()
}

struct School {
    teacher: String,
    class_a: String,
    class_c: String,
    pupil: String,
}

async fn school(router: &Router) -> School {
    let teacher = create(
        router,
        "/api/users",
        json!({ "name": "Bu Dewi", "email": "dewi@school.id", "role": "teacher" }),
    )
    .await;
    let class_a = create(router, "/api/classes", json!({ "name": "Kelas A", "teacher_id": teacher })).await;
    let class_c = create(router, "/api/classes", json!({ "name": "Kelas C", "teacher_id": teacher })).await;
    let pupil = create(
        router,
        "/api/users",
        json!({ "name": "Rudi Hartono", "email": "rudi@school.id" }),
    )
    .await;
    School {
        teacher,
        class_a,
        class_c,
        pupil,
    }
}

#[tokio::test]
async fn health_ready_and_version() {
    let router = router();
    let (status, body) = call(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = call(&router, Method::GET, "/ready", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["database"], "ok");

    let (_, body) = call(&router, Method::GET, "/version", None).await;
    assert_eq!(body["name"], "classroom-api");
}

#[tokio::test]
async fn enrollment_flow_keeps_counters_in_step() {
    let router = router();
    let s = school(&router).await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({
            "user_id": s.pupil,
            "nis": "12345",
            "class_ids": [s.class_a],
            "gender": "male",
            "birth_date": "2011-02-14"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["class_ids"], json!([s.class_a]));
    assert_eq!(body["data"]["user"]["name"], "Rudi Hartono");
    let student = body["data"]["id"].as_str().unwrap().to_string();

    let (_, class) = call(&router, Method::GET, &format!("/api/classes/{}", s.class_a), None).await;
    assert_eq!(class["data"]["student_count"], 1);
    assert_eq!(class["data"]["teacher"]["id"], json!(s.teacher));

    let uri = format!("/api/students/{}/classes", student);
    let (status, body) = call(&router, Method::POST, &uri, Some(json!({ "class_ids": [s.class_a, s.class_c] }))).await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["meta"]["added"], 1);
    assert_eq!(body["data"]["class_ids"], json!([s.class_a, s.class_c]));

    let (status, body) = call(&router, Method::POST, &uri, Some(json!({ "class_ids": [s.class_a] }))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");

    let (status, _) = call(&router, Method::DELETE, &format!("{}/{}", uri, s.class_a), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = call(&router, Method::DELETE, &format!("{}/{}", uri, s.class_c), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "invariant_violation");

    let (_, class) = call(&router, Method::GET, &format!("/api/classes/{}", s.class_a), None).await;
    assert_eq!(class["data"]["student_count"], 0);
    let (_, class) = call(&router, Method::GET, &format!("/api/classes/{}", s.class_c), None).await;
    assert_eq!(class["data"]["student_count"], 1);
}

#[tokio::test]
async fn lookups_by_class_and_user_resolve_teachers() {
    let router = router();
    let s = school(&router).await;
    create(
        &router,
        "/api/students",
        json!({
            "user_id": s.pupil,
            "nis": "12345",
            "class_id": s.class_a,
            "gender": "female",
            "birth_date": "2011-02-14"
        }),
    )
    .await;

    let (status, body) = call(&router, Method::GET, &format!("/api/students/class/{}", s.class_a), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["count"], 1);
    assert_eq!(body["data"][0]["classes"][0]["teacher"]["name"], "Bu Dewi");

    let (status, body) = call(&router, Method::GET, &format!("/api/students/user/{}", s.pupil), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["nis"], "12345");

    let (status, _) = call(&router, Method::GET, &format!("/api/students/class/{}", s.class_c), None).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = call(&router, Method::GET, "/api/users/available-students", None).await;
    assert_eq!(body["meta"]["count"], 0);

    let (status, body) = call(&router, Method::DELETE, &format!("/api/users/{}", s.pupil), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "conflict");
    let (status, _) = call(&router, Method::DELETE, &format!("/api/users/{}", s.teacher), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn errors_use_the_envelope() {
    let router = router();
    let s = school(&router).await;

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({ "user_id": s.pupil, "nis": "123", "class_id": s.class_a })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["code"], "validation_error");

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({ "user_id": s.pupil, "nis": "12345", "class_id": s.class_a, "gender": "male" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["error"]["message"], "validation: birth_date is required");

    let missing = uuid::Uuid::new_v4().to_string();
    let (status, body) = call(
        &router,
        Method::POST,
        "/api/students",
        Some(json!({
            "user_id": s.pupil,
            "nis": "12345",
            "class_ids": [s.class_a, missing],
            "gender": "male",
            "birth_date": "2011-02-14"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "invalid_reference");
    assert_eq!(body["error"]["details"]["ids"], json!([missing]));

    let (status, body) = call(&router, Method::GET, "/api/students/not-a-uuid", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = call(&router, Method::GET, &format!("/api/students/{}", missing), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(
        &router,
        Method::PATCH,
        &format!("/api/classes/{}", s.class_a),
        Some(json!({ "student_count": 99 })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn materials_and_flashcards_round_out_a_class() {
    let router = router();
    let s = school(&router).await;

    let material = create(
        &router,
        "/api/materials",
        json!({
            "title": "Pecahan",
            "content": "Fractions, part one.",
            "class_id": s.class_a,
            "teacher_id": s.teacher,
            "kind": "video",
            "tags": ["Math", " fractions "]
        }),
    )
    .await;
    let (_, body) = call(&router, Method::GET, &format!("/api/materials/class/{}", s.class_a), None).await;
    assert_eq!(body["data"][0]["order"], 1);
    assert_eq!(body["data"][0]["tags"], json!(["math", "fractions"]));

    let (status, _) = call(
        &router,
        Method::DELETE,
        &format!("/api/materials/{}?teacher_id={}", material, s.pupil),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let set = create(
        &router,
        "/api/flashcards",
        json!({
            "title": "Fractions",
            "topic": "Arithmetic",
            "description": "Quick checks on fractions.",
            "class_id": s.class_a,
            "teacher_id": s.teacher,
            "cards": [{ "question": "1/2 + 1/4?", "answer": "3/4" }]
        }),
    )
    .await;
    let (_, body) = call(&router, Method::PATCH, &format!("/api/flashcards/{}/toggle-active", set), None).await;
    assert_eq!(body["data"]["active"], false);
    assert_eq!(body["data"]["card_count"], 1);

    let (status, body) = call(
        &router,
        Method::POST,
        "/api/flashcards",
        Some(json!({
            "title": "Empty",
            "topic": "Arithmetic",
            "description": "No cards in this one.",
            "class_id": s.class_a,
            "teacher_id": s.teacher,
            "cards": []
        })),
    )
    .await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY, "{body}");
}
