//! 日志初始化
//!
//! 控制台输出, `RUST_LOG` 优先于配置中的日志级别。

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// 构造过滤器: 环境变量优先, 否则使用配置级别 (第三方库只记录 warn)
pub fn build_filter(level: &str) -> EnvFilter {
    let filter_string = format!("warn,gate_sentinel={level},sentinel={level}");
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_string))
}

/// 初始化日志系统; 已初始化时 (例如测试中重复调用) 静默忽略
pub fn init_logging(level: &str) {
    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(true)
        .with_thread_names(true);

    let _ = tracing_subscriber::registry()
        .with(build_filter(level))
        .with(console_layer)
        .try_init();
}
