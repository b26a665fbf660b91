//! Entity routes, mounted under `/api`.

use crate::handlers::{classes, flashcards, materials, students, users};
use crate::state::AppState;
use axum::{
    routing::{delete, get, patch, post, put},
    Router,
};

pub fn api_routes(state: AppState) -> Router {
    Router::new()
        .route("/users", get(users::list).post(users::create))
        .route("/users/available-students", get(users::available_students))
        .route("/users/:id", get(users::read).patch(users::update).delete(users::delete))
        .route("/classes", get(classes::list).post(classes::create))
        .route("/classes/:id", get(classes::read).patch(classes::update).delete(classes::delete))
        .route("/students", get(students::list).post(students::enroll))
        .route("/students/class/:class_id", get(students::by_class))
        .route("/students/user/:user_id", get(students::by_user))
        .route(
            "/students/:id",
            get(students::read).patch(students::update).delete(students::delete),
        )
        .route("/students/:id/classes", post(students::add_to_classes))
        .route("/students/:id/classes/:class_id", delete(students::remove_from_class))
        .route("/materials", post(materials::create))
        .route("/materials/reorder", put(materials::reorder))
        .route("/materials/class/:class_id", get(materials::by_class))
        .route(
            "/materials/:id",
            get(materials::read).patch(materials::update).delete(materials::delete),
        )
        .route("/flashcards", get(flashcards::list).post(flashcards::create))
        .route("/flashcards/class/:class_id", get(flashcards::by_class))
        .route(
            "/flashcards/:id",
            get(flashcards::read).patch(flashcards::update).delete(flashcards::delete),
        )
        .route("/flashcards/:id/toggle-active", patch(flashcards::toggle_active))
        .with_state(state)
}
