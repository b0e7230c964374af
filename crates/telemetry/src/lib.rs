//! telemetry - 可观测性库
//!
//! tracing 初始化与缓存事件指标

use metrics::counter;
use strata_config::TelemetryConfig;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// 指标名称
pub mod metric_names {
    pub const CACHE_HITS: &str = "strata_cache_hits_total";
    pub const CACHE_MISSES: &str = "strata_cache_misses_total";
    pub const CACHE_WRITES: &str = "strata_cache_writes_total";
    pub const CACHE_DELETES: &str = "strata_cache_deletes_total";
    pub const CACHE_CLEARS: &str = "strata_cache_clears_total";
    pub const CACHE_EXPIRES: &str = "strata_cache_expires_total";
    pub const GRACED_HITS: &str = "strata_cache_graced_hits_total";
    pub const FACTORY_ERRORS: &str = "strata_factory_errors_total";
    pub const BUS_PUBLISHED: &str = "strata_bus_messages_published_total";
    pub const BUS_RECEIVED: &str = "strata_bus_messages_received_total";
    pub const BUS_REQUEUED: &str = "strata_bus_messages_requeued_total";
}

/// 初始化 tracing
pub fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 初始化 JSON 格式的 tracing（生产环境）
pub fn init_tracing_json(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// 按配置初始化 tracing
pub fn init_from_config(config: &TelemetryConfig) {
    if config.json {
        init_tracing_json(&config.log_level);
    } else {
        init_tracing(&config.log_level);
    }
}

/// 测试用 tracing：输出到测试捕获，重复调用不会 panic
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// 初始化 Prometheus metrics
pub fn init_metrics() -> Result<metrics_exporter_prometheus::PrometheusHandle, String> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))
}

/// 记录缓存层命中
pub fn record_hit(cache: &str, layer: &'static str, graced: bool) {
    counter!(metric_names::CACHE_HITS, "cache" => cache.to_string(), "layer" => layer).increment(1);
    if graced {
        counter!(metric_names::GRACED_HITS, "cache" => cache.to_string()).increment(1);
    }
}

/// 记录一次缓存事件（非命中类）
pub fn record_event(name: &'static str, cache: &str) {
    counter!(name, "cache" => cache.to_string()).increment(1);
}

/// 记录总线消息
pub fn record_bus_message(name: &'static str, message_type: &'static str) {
    counter!(name, "type" => message_type).increment(1);
}
