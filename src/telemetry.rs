//! Copyright (c) 2025, Kirky.X
//!
//! MIT License
//!
//! 该模块定义了日志和链路追踪的初始化。

use opentelemetry::global;
use opentelemetry::trace::TracerProvider;
use opentelemetry_sdk::trace::TracerProvider as SdkTracerProvider;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// 默认日志级别，`RUST_LOG` 未设置时使用
pub const DEFAULT_LOG_FILTER: &str = "info";

/// 初始化日志和 OpenTelemetry Tracing
///
/// 应在进程启动时调用一次。日志级别由 `RUST_LOG` 控制，span 同时
/// 交给全局 tracer provider；未配置导出器时 provider 不导出任何数据。
/// 已经设置过全局 subscriber 时不做任何事。
///
/// # 参数
///
/// * `service_name` - 服务名称，作为 tracer 名称
pub fn init_tracing(service_name: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    let provider = SdkTracerProvider::builder().build();
    global::set_tracer_provider(provider.clone());
    let tracer = provider.tracer(service_name.to_string());
    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);

    let subscriber = Registry::default()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .with(telemetry);

    // 由应用层决定是否已经初始化过
    let _ = tracing::subscriber::set_global_default(subscriber);
}
