use anyhow::Context;
use object_cloud_uploader::{
    config::LogConfig, logging, AppConfig, JsonlStatusSink, ManifestTaskSource, ObjectClient,
    PollScheduler, UploadOrchestrator, WorkerPool,
};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = AppConfig::config_path();
    let config = AppConfig::load_from_file(&config_path).await;

    // 配置加载失败时先用默认日志配置输出错误
    let log_config = match &config {
        Ok(config) => config.log.clone(),
        Err(_) => LogConfig::default(),
    };
    let _log_guard = logging::init_logging(&log_config);

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("加载配置失败: {:?}, 错误: {:#}", config_path, e);
            return Err(e);
        }
    };

    info!(
        "Object Cloud Uploader v{} 启动中, 配置文件: {:?}",
        env!("CARGO_PKG_VERSION"),
        config_path
    );

    let object_config = Arc::new(config.object.clone());
    let client = Arc::new(ObjectClient::new(object_config.clone()).context("创建 HTTP 客户端失败")?);
    let sink = Arc::new(JsonlStatusSink::new(&config.status.outcome_file));
    let orchestrator = Arc::new(UploadOrchestrator::new(object_config, client, sink.clone()));

    let pool = WorkerPool::start(
        config.worker.max_threads,
        config.worker.effective_queue_capacity(),
        orchestrator.clone(),
        orchestrator.policy(),
        config.worker.rate_limit_backoff(),
        sink,
    );

    let scheduler = if config.poll.enabled {
        let source = Arc::new(ManifestTaskSource::new(&config.poll.manifest_dir));
        Some(PollScheduler::start(
            source,
            pool.queue(),
            std::time::Duration::from_secs(config.poll.interval_secs),
        ))
    } else {
        warn!("任务拉取未启用，不会有新任务进入队列");
        None
    };

    info!("服务已启动，按 Ctrl-C 退出");
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("监听退出信号失败: {}", e);
    }

    info!("收到退出信号，正在停止...");
    if let Some(scheduler) = scheduler {
        scheduler.stop().await;
    }
    pool.shutdown().await;
    info!("服务已退出");

    Ok(())
}
