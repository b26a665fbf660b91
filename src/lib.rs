//! Classroom API: users, classes, student enrollment, materials and flashcard sets over
//! JSON document collections, with a membership migration utility.

pub mod error;
pub mod handlers;
pub mod migration;
pub mod model;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;

pub use error::{AppError, ConfigError};
pub use migration::MembershipMigration;
pub use routes::{api_routes, app, common_routes};
pub use settings::Settings;
pub use state::AppState;
pub use store::{ensure_collections, ensure_database_exists, MemoryStore, PgStore, Store};
