use axum::response::Html;

pub const GREETING: &str = "<p>Hello, World!</p>";

pub async fn handle_root() -> Html<&'static str> {
    Html(GREETING)
}
