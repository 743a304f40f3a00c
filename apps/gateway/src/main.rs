//! 传感器网关进程入口：加载配置、启动编排器、等待终止信号后有序停止。

mod gateway;

use gateway::Gateway;
use gw_config::AppConfig;
use gw_telemetry::{init_tracing, metrics};
use tracing::{error, info};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 配置文件 + 环境变量覆盖，校验失败直接退出
    let config = AppConfig::load()?;
    // 初始化结构化日志（RUST_LOG 优先）
    init_tracing(&config.logging.level);

    info!(
        target: "gw.gateway",
        application = %config.application_name,
        sensors = config.sensors.len(),
        "gateway starting"
    );

    let mut gateway = Gateway::from_config(&config);
    gateway.start().await?;

    shutdown_signal().await;
    gateway.stop().await;

    let snapshot = metrics().snapshot();
    info!(
        target: "gw.gateway",
        collected = snapshot.readings_collected,
        published = snapshot.readings_published,
        suppressed = snapshot.readings_suppressed,
        dropped = snapshot.readings_dropped,
        "gateway exited"
    );
    Ok(())
}

/// 等待 SIGINT 或 SIGTERM。
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(target: "gw.gateway", error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                error!(target: "gw.gateway", error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!(target: "gw.gateway", "SIGINT received"),
        _ = terminate => info!(target: "gw.gateway", "SIGTERM received"),
    }
}
