pub mod auth;
pub mod db;
pub mod lifecycle;
pub mod routes;

#[derive(Clone)]
pub struct AppState {
    pub db: db::DbPool,
    pub index_template: String,
}
