use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::error::ExportError;

/// Renders every metric family of `registry` in the Prometheus text format.
pub fn render(registry: &Registry) -> Result<String, ExportError> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry.gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| ExportError::Metrics(prometheus::Error::Msg(e.to_string())))
}

/// Sample lines of the metric `name` in a rendered exposition.
#[cfg(test)]
pub(crate) fn series<'a>(text: &'a str, name: &str) -> Vec<&'a str> {
    let labelled = format!("{}{{", name);
    let bare = format!("{} ", name);
    text.lines()
        .filter(|line| line.starts_with(&labelled) || line.starts_with(&bare))
        .collect()
}

/// Function to serve the registry for Prometheus scrapes
/// # Arguments
/// * `addr` - Socket address to listen on
/// * `path` - URL path of the scrape endpoint, e.g. `/metrics`
/// * `registry` - Registry to expose
pub async fn serve(addr: SocketAddr, path: &str, registry: Registry) -> std::io::Result<()> {
    let app = Router::new()
        .route(path, get(metrics_handler))
        .with_state(registry);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, path, "metrics endpoint listening");
    axum::serve(listener, app).await
}

async fn metrics_handler(State(registry): State<Registry>) -> impl IntoResponse {
    match render(&registry) {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        ),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{IntCounter, Opts};

    #[test]
    fn test_render_and_series() {
        let registry = Registry::new();
        let counter = IntCounter::with_opts(Opts::new("scrapes_total", "Scrapes served")).unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.inc();

        let text = render(&registry).unwrap();
        assert!(text.contains("# TYPE scrapes_total counter"));
        assert_eq!(series(&text, "scrapes_total"), vec!["scrapes_total 1"]);
        assert!(series(&text, "scrapes").is_empty());
    }
}
