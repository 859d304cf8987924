use axum::extract::{Request, State};
use axum::http::{Method, StatusCode, Uri};
use axum::middleware::Next;
use axum::response::Response;
use crossterm::style::Stylize;
use tracing::info;

#[derive(Clone, Copy, Debug)]
pub struct AccessLog {
    pub color: bool,
}

/// One line per request on the `trailsc::access` target.
pub async fn log_request(State(log): State<AccessLog>, request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let response = next.run(request).await;
    let line = render(&method, &uri, response.status(), log.color);
    info!(target: "trailsc::access", "{line}");
    response
}

pub fn render(method: &Method, uri: &Uri, status: StatusCode, color: bool) -> String {
    let line = format!("method={method} url={uri} status={}", status.as_u16());
    match (color, status.is_success()) {
        (false, _) => line,
        (true, true) => line.green().to_string(),
        (true, false) => line.red().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_line_carries_method_url_and_status() {
        let uri: Uri = "/qa/trails-config.tar.gz".parse().unwrap();
        assert_eq!(
            render(&Method::GET, &uri, StatusCode::OK, false),
            "method=GET url=/qa/trails-config.tar.gz status=200"
        );
    }

    #[test]
    fn colored_line_keeps_the_text() {
        let uri: Uri = "/nope/x".parse().unwrap();
        let line = render(&Method::HEAD, &uri, StatusCode::NOT_IMPLEMENTED, true);
        assert!(line.contains("method=HEAD url=/nope/x status=501"));
    }
}
