use std::sync::Arc;

use prometheus::{Counter, CounterVec, Gauge, Histogram, HistogramOpts, Opts, Registry};

/// Prometheus metrics for a Bright node
#[derive(Clone)]
pub struct BrightMetrics {
    pub http_requests: CounterVec,
    pub documents_indexed: Counter,
    pub documents_deleted: Counter,
    pub searches_total: Counter,
    pub search_latency: Histogram,
    pub ingress_documents_synced: Counter,
    pub ingress_documents_deleted: Counter,
    pub cluster_leader: Gauge,

    registry: Arc<Registry>,
}

impl BrightMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests = CounterVec::new(
            Opts::new("bright_http_requests_total", "HTTP requests by method and status"),
            &["method", "status"],
        )?;
        registry.register(Box::new(http_requests.clone()))?;

        let documents_indexed = Counter::with_opts(Opts::new(
            "bright_documents_indexed_total",
            "Total number of documents indexed",
        ))?;
        registry.register(Box::new(documents_indexed.clone()))?;

        let documents_deleted = Counter::with_opts(Opts::new(
            "bright_documents_deleted_total",
            "Total number of documents deleted",
        ))?;
        registry.register(Box::new(documents_deleted.clone()))?;

        let searches_total = Counter::with_opts(Opts::new(
            "bright_searches_total",
            "Total number of searches served",
        ))?;
        registry.register(Box::new(searches_total.clone()))?;

        let search_latency = Histogram::with_opts(HistogramOpts::new(
            "bright_search_latency_seconds",
            "Search latency in seconds",
        ))?;
        registry.register(Box::new(search_latency.clone()))?;

        let ingress_documents_synced = Counter::with_opts(Opts::new(
            "bright_ingress_documents_synced_total",
            "Documents delivered by ingresses",
        ))?;
        registry.register(Box::new(ingress_documents_synced.clone()))?;

        let ingress_documents_deleted = Counter::with_opts(Opts::new(
            "bright_ingress_documents_deleted_total",
            "Document deletions delivered by ingresses",
        ))?;
        registry.register(Box::new(ingress_documents_deleted.clone()))?;

        let cluster_leader = Gauge::with_opts(Opts::new(
            "bright_cluster_leader",
            "1 if this node is the leader, 0 otherwise",
        ))?;
        registry.register(Box::new(cluster_leader.clone()))?;

        Ok(Self {
            http_requests,
            documents_indexed,
            documents_deleted,
            searches_total,
            search_latency,
            ingress_documents_synced,
            ingress_documents_deleted,
            cluster_leader,
            registry: Arc::new(registry),
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
