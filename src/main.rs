// botstore 守护进程：打开存储、安装全局 DataManager，并运行变更队列协调器直到 Ctrl-C

use anyhow::Context;
use botstore::{account_routes, init_logger, AppConfig, DataManager};
use std::path::PathBuf;
use tokio::sync::watch;

/// 配置文件路径：命令行第一个参数 > BOTSTORE_CONFIG > ./botstore.toml
fn config_path() -> PathBuf {
    std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("BOTSTORE_CONFIG"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("botstore.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let path = config_path();
    let config = AppConfig::load(&path)?;

    init_logger(&config.log).context("初始化日志系统失败")?;
    tracing::info!(config = %path.display(), "botstore 启动");

    let manager = DataManager::open(&config.database, &config.cache)
        .with_context(|| format!("打开数据库失败: {}", config.database.path.display()))?
        .install_global()?;
    tracing::info!(
        database = %manager.store().db_path().display(),
        cache_enabled = config.cache.enabled,
        "数据层已就绪"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reconciler = if config.reconciler.enabled {
        let routes = account_routes().context("注册变更路由失败")?;
        let reconciler = manager
            .reconciler(routes, &config.reconciler)
            .context("创建变更队列协调器失败")?;
        Some(reconciler.spawn(shutdown_rx))
    } else {
        tracing::info!("变更队列协调器已禁用");
        None
    };

    tokio::signal::ctrl_c()
        .await
        .context("监听退出信号失败")?;
    tracing::info!("收到退出信号，正在停止");

    // 接收端可能已随协调器退出
    let _ = shutdown_tx.send(true);
    if let Some(handle) = reconciler {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "协调器任务异常结束");
        }
    }

    let stats = manager.cache_stats();
    tracing::info!(
        hits = stats.hits,
        misses = stats.misses,
        loads = stats.loads,
        "botstore 已退出"
    );
    Ok(())
}
