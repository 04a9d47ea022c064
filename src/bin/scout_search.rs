//! scout-search - 命令行搜索
//!
//! 创建会话并提交一次查询，把效果以 JSONL 输出到 stdout，Ctrl-C 取消。
//! 配置来自 ~/.scout/config.json 与 SCOUT_* 环境变量。

use anyhow::{Context, Result};
use scout_search_client::{ClientConfig, SessionClient, SessionEffect, SessionState};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（stdout 留给 JSONL 输出）
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("scout_search_client=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();
    let Some(query) = query_from_args(&args) else {
        let program = args.first().map(String::as_str).unwrap_or("scout-search");
        eprintln!("用法: {} <查询内容>...", program);
        eprintln!("例: {} tax documents from 2023", program);
        std::process::exit(1);
    };

    let config = ClientConfig::load().context("加载配置失败")?;
    tracing::info!("🚀 scout-search v{} → {}", env!("CARGO_PKG_VERSION"), config.base_url);

    let client = SessionClient::new(config)?;
    let (_id, mut effects) = client.subscribe_all();

    // 提交在后台进行，主循环负责输出效果
    let submitter = client.clone();
    let submit = tokio::spawn(async move { submitter.submit_query(&query).await });

    let mut failure = None;
    loop {
        tokio::select! {
            effect = effects.recv() => {
                let Some(effect) = effect else { break };
                println!("{}", serde_json::to_string(&effect)?);

                match effect {
                    SessionEffect::Error { message } => {
                        failure = Some(message);
                        break;
                    }
                    SessionEffect::Status { state: SessionState::Complete, .. } => break,
                    _ => {}
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("收到中断信号，取消查询...");
                break;
            }
        }
    }

    client.disconnect().await;
    submit.await.context("查询任务异常退出")??;

    if let Some(message) = failure {
        anyhow::bail!("搜索失败: {}", message);
    }

    tracing::info!("👋 scout-search exiting");
    Ok(())
}

/// 拼接命令行参数作为查询；空白查询返回 None
fn query_from_args(args: &[String]) -> Option<String> {
    let query = args.get(1..)?.join(" ");
    let query = query.trim();
    (!query.is_empty()).then(|| query.to_string())
}
