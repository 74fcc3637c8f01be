//! 主程序入口和示例用法演示
//!
//! 并发抓取命令行给出的所有请求，打印每个请求的状态码和响应体大小：
//! 1. 获取进程内共享的 `TransferManager`。
//! 2. 把每个参数解析为请求：以 `[` 开头的参数按 `[url, options]` JSON 解析，其余当作 URL。
//! 3. 用 `join_all` 并发等待所有 `fetch_request`。
//! 4. 释放共享实例，等待工作线程退出。
//!
//! 用法: `fetch_demo https://example.com '["https://httpbin.org/post", {"method": "POST", "json": {"a": 1}}]'`

use curl_mux::{FetchError, HttpRequest, TransferManager};
use futures::future::join_all;
use std::time::Instant;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

fn parse_arg(arg: &str) -> Result<HttpRequest, FetchError> {
    if arg.trim_start().starts_with('[') {
        Ok(HttpRequest::from_json_str(arg)?)
    } else {
        Ok(HttpRequest::new(arg))
    }
}

#[tokio::main] // 使用 tokio 作为异步运行时
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // --- 初始化日志系统 ---
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false) // 不显示模块路径
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        warn!("没有给出任何请求。用法: fetch_demo <url | json-args>...");
        return Ok(());
    }

    let mut requests = Vec::with_capacity(args.len());
    for arg in &args {
        match parse_arg(arg) {
            Ok(request) => requests.push(request),
            Err(e) => error!("无法解析参数 {}: {}", arg, e),
        }
    }

    let manager = TransferManager::shared()?;
    info!("开始并发抓取 {} 个请求", requests.len());
    let start = Instant::now();

    let results = join_all(requests.iter().map(|request| manager.fetch_request(request))).await;

    let mut failures = 0;
    for (request, result) in requests.iter().zip(results) {
        match result {
            Ok(response) => {
                println!(
                    "{} {} -> {} ({} 字节)",
                    request.method,
                    request.url,
                    response.status,
                    response.data.len()
                );
                if request.binary {
                    println!("{}", response.to_json(true));
                }
            }
            Err(e) => {
                failures += 1;
                println!("{} {} -> {}", request.method, request.url, e);
            }
        }
    }
    info!(
        "全部完成，用时 {:?}，失败 {} 个",
        start.elapsed(),
        failures
    );

    drop(manager);
    TransferManager::release_shared();
    Ok(())
}
