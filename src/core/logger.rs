use crate::models::config::{LogConfig, LogFormat, LogLevel, LogOutput};
use std::path::PathBuf;
use std::sync::OnceLock;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::{
    fmt,
    layer::SubscriberExt,
    reload::{self, Handle},
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// 全局日志级别 reload handle
static LOG_LEVEL_HANDLE: OnceLock<Handle<EnvFilter, Registry>> = OnceLock::new();

/// 文件写入线程的 guard，进程退出前不能释放
static FILE_GUARD: OnceLock<WorkerGuard> = OnceLock::new();

/// 初始化日志系统
///
/// 级别、格式（JSON/纯文本）与输出目标（控制台/文件/both）来自配置，
/// `RUST_LOG` 环境变量优先。级别可以通过 `update_log_level` 热更新，
/// 其余配置需要重启后生效。
pub fn init_logger(config: &LogConfig) -> anyhow::Result<()> {
    let (filter_layer, reload_handle) = reload::Layer::new(create_env_filter(config.level));
    if LOG_LEVEL_HANDLE.set(reload_handle).is_err() {
        anyhow::bail!("日志系统已初始化，不能重复初始化");
    }

    let console = matches!(config.output, LogOutput::Console | LogOutput::Both)
        .then(|| console_layer(config.format));
    let file = match config.output {
        LogOutput::File | LogOutput::Both => Some(file_layer(config)?),
        LogOutput::Console => None,
    };

    // 过滤层必须直接挂在 Registry 上，reload handle 的类型依赖于此
    Registry::default()
        .with(filter_layer)
        .with(console)
        .with(file)
        .try_init()
        .map_err(|e| anyhow::anyhow!("安装日志订阅器失败: {}", e))?;

    tracing::info!(
        level = config.level.as_str(),
        format = ?config.format,
        output = ?config.output,
        file_path = ?config.file_path,
        "日志系统初始化完成"
    );
    Ok(())
}

/// 创建环境过滤器
fn create_env_filter(level: LogLevel) -> EnvFilter {
    // 格式：RUST_LOG=debug 或 RUST_LOG=botstore=trace,rusqlite=warn
    EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(level))
}

fn default_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::new(default_directives(level))
}

// 本 crate 使用配置级别，依赖库只输出 WARN 以上
fn default_directives(level: LogLevel) -> String {
    format!("botstore={},rusqlite=warn,tokio=warn", level.as_str())
}

fn console_layer<S>(format: LogFormat) -> BoxedLayer<S>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(cfg!(debug_assertions))
        .with_ansi(true);
    match format {
        LogFormat::Text => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

fn file_layer<S>(config: &LogConfig) -> anyhow::Result<BoxedLayer<S>>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    let log_dir = get_log_dir(config.file_path.as_deref())?;
    let (writer, guard) = non_blocking(rolling::daily(log_dir, "botstore"));
    if FILE_GUARD.set(guard).is_err() {
        anyhow::bail!("日志文件输出已初始化");
    }

    let layer = fmt::layer().with_writer(writer).with_ansi(false);
    Ok(match config.format {
        LogFormat::Text => layer.with_target(cfg!(debug_assertions)).boxed(),
        LogFormat::Json => layer.json().with_target(true).with_thread_ids(true).boxed(),
    })
}

/// 获取日志目录（默认 ~/.botstore/logs）
fn get_log_dir(file_path: Option<&str>) -> anyhow::Result<PathBuf> {
    let dir = match file_path {
        Some(path) => PathBuf::from(path),
        None => dirs::home_dir()
            .ok_or_else(|| anyhow::anyhow!("无法获取用户主目录"))?
            .join(".botstore")
            .join("logs"),
    };
    std::fs::create_dir_all(&dir)
        .map_err(|e| anyhow::anyhow!("创建日志目录失败 {}: {}", dir.display(), e))?;
    Ok(dir)
}

/// 动态更新日志级别（热重载）
pub fn update_log_level(new_level: LogLevel) -> anyhow::Result<()> {
    let handle = LOG_LEVEL_HANDLE
        .get()
        .ok_or_else(|| anyhow::anyhow!("日志系统未初始化"))?;

    handle
        .reload(create_env_filter(new_level))
        .map_err(|e| anyhow::anyhow!("重载日志级别失败: {}", e))?;

    tracing::info!(new_level = new_level.as_str(), "日志级别已动态更新");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_directives_scope_crate() {
        assert_eq!(
            default_directives(LogLevel::Debug),
            "botstore=debug,rusqlite=warn,tokio=warn"
        );
    }

    #[test]
    fn test_get_log_dir_creates_custom_dir() {
        let temp_dir = TempDir::new().unwrap();
        let target = temp_dir.path().join("logs").join("nested");

        let dir = get_log_dir(target.to_str()).unwrap();
        assert_eq!(dir, target);
        assert!(dir.is_dir());
    }

    #[test]
    fn test_update_before_init_fails() {
        // 测试进程内从不初始化全局订阅器
        if LOG_LEVEL_HANDLE.get().is_none() {
            assert!(update_log_level(LogLevel::Warn).is_err());
        }
    }
}
