use axum::{
    http::header,
    response::IntoResponse,
};

pub async fn health() -> impl IntoResponse {
    ([(header::CACHE_CONTROL, "no-store")], "ok")
}
