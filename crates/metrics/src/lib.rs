use anyhow::Result;
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server, StatusCode,
};
use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::net::SocketAddr;
use tracing::{info, warn};

#[derive(Clone)]
pub struct MetricsHandle {
    registry: Registry,
    offers: IntCounterVec,
    polls: IntCounterVec,
    ledger_size: IntGauge,
}

impl MetricsHandle {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();
        let offers = IntCounterVec::new(
            Opts::new("offers_total", "Offers processed, by dispatch outcome"),
            &["outcome"],
        )?;
        let polls = IntCounterVec::new(
            Opts::new("command_polls_total", "Bot server polls, by result"),
            &["result"],
        )?;
        let ledger_size = IntGauge::new("dedup_ledger_size", "Offer ids currently marked processed")?;
        registry.register(Box::new(offers.clone()))?;
        registry.register(Box::new(polls.clone()))?;
        registry.register(Box::new(ledger_size.clone()))?;
        Ok(Self {
            registry,
            offers,
            polls,
            ledger_size,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_offer(&self, outcome: &str) {
        self.offers.with_label_values(&[outcome]).inc();
    }

    pub fn record_poll(&self, result: &str) {
        self.polls.with_label_values(&[result]).inc();
    }

    pub fn set_ledger_size(&self, size: usize) {
        self.ledger_size.set(i64::try_from(size).unwrap_or(i64::MAX));
    }

    pub fn render(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok((encoder.format_type().to_string(), buffer))
    }

    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let make_svc = make_service_fn(move |_| {
            let metrics = self.clone();
            async move {
                Ok::<_, hyper::Error>(service_fn(move |_req: Request<Body>| {
                    let metrics = metrics.clone();
                    async move { Ok::<_, hyper::Error>(metrics.respond()) }
                }))
            }
        });

        let server = Server::bind(&addr).serve(make_svc);
        info!(%addr, "metrics exporter listening");
        server.await?;
        Ok(())
    }

    fn respond(&self) -> Response<Body> {
        match self.render() {
            Ok((content_type, buffer)) => {
                let mut response = Response::new(Body::from(buffer));
                if let Ok(value) = content_type.parse() {
                    response.headers_mut().insert("Content-Type", value);
                }
                response
            }
            Err(err) => {
                warn!(error = %err, "metrics encoding failed");
                let mut response = Response::new(Body::from("metrics unavailable"));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }
}
