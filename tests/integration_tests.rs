// /tests/integration_tests.rs

// 引入必要的依赖
use bytes::Bytes;
use curl_mux::curl::easy::Easy;
use curl_mux::{
    FetchError, HttpRequest, ManagerConfig, ManagerError, TransferId, TransferManager,
};
use serde_json::json;
use serial_test::serial;
use std::collections::HashSet;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{mpsc, Arc, Once};
use std::thread;
use std::time::{Duration, Instant};
use tracing::info;

// ==================================
// 本地 HTTP 端点
// ==================================

static INIT: Once = Once::new();

/// 测试只访问回环地址，不经过环境中可能配置的代理。
fn init_env() {
    INIT.call_once(|| {
        std::env::set_var("no_proxy", "*");
        std::env::set_var("NO_PROXY", "*");
    });
}

/// 读取一个请求，返回 (方法, 路径, 请求体)。
fn read_request(stream: &mut TcpStream) -> Option<(String, String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    let head_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).into_owned();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    let mut body = buf[head_end..].to_vec();
    while body.len() < content_length {
        let n = stream.read(&mut chunk).ok()?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
    }
    Some((method, path, body))
}

/// 启动一个回显端点：响应体为 `方法 路径` 加上请求体；
/// 路径 `/status/<code>` 返回对应的状态码和空响应体。
fn spawn_echo_server() -> SocketAddr {
    init_env();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        for stream in listener.incoming() {
            let Ok(mut stream) = stream else { continue };
            thread::spawn(move || {
                let Some((method, path, body)) = read_request(&mut stream) else {
                    return;
                };
                let (status, payload) = match path.strip_prefix("/status/") {
                    Some(code) => (code.parse::<u32>().unwrap_or(500), Vec::new()),
                    None => {
                        let mut payload = format!("{} {}", method, path).into_bytes();
                        payload.extend_from_slice(&body);
                        (200, payload)
                    }
                };
                let head = format!(
                    "HTTP/1.1 {} Test\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    payload.len()
                );
                let _ = stream.write_all(head.as_bytes());
                if method != "HEAD" {
                    let _ = stream.write_all(&payload);
                }
            });
        }
    });
    addr
}

/// 启动一个只接受连接、从不响应的端点。
fn spawn_stalled_server() -> SocketAddr {
    init_env();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    thread::spawn(move || {
        let mut held = Vec::new();
        for stream in listener.incoming().flatten() {
            held.push(stream);
        }
    });
    addr
}

fn easy_for(url: &str, timeout: Duration) -> Easy {
    let mut easy = Easy::new();
    easy.url(url).unwrap();
    easy.noproxy("*").unwrap();
    easy.timeout(timeout).unwrap();
    easy
}

fn test_manager() -> TransferManager {
    let config = ManagerConfig::default().with_poll_interval(Duration::from_millis(20));
    TransferManager::new(config).expect("创建传输管理器应成功")
}

// ==================================
// 测试
// ==================================

/// 10 个线程各提交 10 个传输到本地回环端点：全部成功，响应体与请求一一对应。
#[test]
#[serial]
fn test_hundred_transfers_from_ten_threads() {
    let addr = spawn_echo_server();
    let manager = Arc::new(test_manager());
    let (results_tx, results_rx) = mpsc::channel::<(String, bool, u32, Bytes)>();

    let producers: Vec<_> = (0..10)
        .map(|t| {
            let manager = Arc::clone(&manager);
            let results_tx = results_tx.clone();
            thread::spawn(move || {
                let mut ids = Vec::new();
                for i in 0..10 {
                    let path = format!("/echo/{}-{}", t, i);
                    let easy = easy_for(&format!("http://{}{}", addr, path), Duration::from_secs(10));
                    let expected = format!("GET {}", path);
                    let results_tx = results_tx.clone();
                    let id = manager
                        .submit(easy, move |status, easy, body| {
                            let code = easy.response_code().unwrap_or(0);
                            results_tx.send((expected, status.is_ok(), code, body)).ok();
                        })
                        .expect("提交应成功");
                    ids.push(id);
                }
                ids
            })
        })
        .collect();
    drop(results_tx);

    let mut ids: Vec<TransferId> = Vec::new();
    for producer in producers {
        ids.extend(producer.join().unwrap());
    }
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 100, "传输 ID 不应重复");

    let mut seen = HashSet::new();
    let deadline = Instant::now() + Duration::from_secs(30);
    while seen.len() < 100 && Instant::now() < deadline {
        if let Ok((expected, ok, code, body)) = results_rx.recv_timeout(Duration::from_millis(200)) {
            assert!(ok, "传输 {} 应成功", expected);
            assert_eq!(code, 200);
            assert_eq!(String::from_utf8(body.to_vec()).unwrap(), expected, "响应体不应串扰");
            assert!(seen.insert(expected.clone()), "{} 被回调了两次", expected);
        }
    }
    assert_eq!(seen.len(), 100);
    assert_eq!(manager.in_flight(), 0);
    info!("(集成测试) 100 个传输全部完成");
}

/// 不响应的端点配合 50ms 超时应在一两个轮询间隔内失败，响应体为空。
#[test]
#[serial]
fn test_unresponsive_endpoint_times_out_promptly() {
    let addr = spawn_stalled_server();
    let manager = TransferManager::new(ManagerConfig::default()).expect("创建传输管理器应成功");
    let (results_tx, results_rx) = mpsc::channel();
    let start = Instant::now();
    manager
        .submit(
            easy_for(&format!("http://{}/never", addr), Duration::from_millis(50)),
            move |status, _, body| {
                results_tx.send((status.is_err(), body.len(), start.elapsed())).ok();
            },
        )
        .unwrap();

    let (failed, body_len, elapsed) = results_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("超时的传输也应收到回调");
    assert!(failed);
    assert_eq!(body_len, 0);
    // 超时本身 50ms，加上默认轮询间隔 50ms 的检测延迟
    assert!(elapsed >= Duration::from_millis(50), "超时不应提前触发: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(300), "超时检测过慢: {:?}", elapsed);
}

/// HTTP 层面的非 2xx 状态码对传输层来说仍是成功。
#[test]
#[serial]
fn test_http_error_status_is_a_successful_transfer() {
    let addr = spawn_echo_server();
    let manager = test_manager();
    let (results_tx, results_rx) = mpsc::channel();
    manager
        .submit(
            easy_for(&format!("http://{}/status/404", addr), Duration::from_secs(5)),
            move |status, easy, body| {
                let code = easy.response_code().unwrap_or(0);
                results_tx.send((status.is_ok(), code, body.len())).ok();
            },
        )
        .unwrap();
    let result = results_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(result, (true, 404, 0));
}

/// 销毁时仍在进行的传输被放弃：不会有任何回调，销毁在有限时间内完成。
#[test]
#[serial]
fn test_destroy_with_transfers_in_flight() {
    let addr = spawn_stalled_server();
    let manager = test_manager();
    let (results_tx, results_rx) = mpsc::channel::<()>();
    for i in 0..8 {
        let results_tx = results_tx.clone();
        manager
            .submit(
                easy_for(&format!("http://{}/slow/{}", addr, i), Duration::from_secs(3600)),
                move |_, _, _| {
                    results_tx.send(()).ok();
                },
            )
            .unwrap();
    }
    drop(results_tx);
    thread::sleep(Duration::from_millis(100));
    assert_eq!(manager.in_flight(), 8);

    let start = Instant::now();
    drop(manager);
    assert!(start.elapsed() < Duration::from_secs(2));
    // 回调随注册表一起被丢弃，从未执行
    assert!(results_rx.recv().is_err());
}

/// 同一时刻只能有一个管理器；共享实例释放后可以重新创建。
#[test]
#[serial]
fn test_shared_instance_lifecycle() {
    init_env();
    let shared = TransferManager::shared().expect("首次获取共享实例应成功");
    let again = TransferManager::shared().unwrap();
    assert!(Arc::ptr_eq(&shared, &again));

    assert!(matches!(
        TransferManager::new(ManagerConfig::default()),
        Err(ManagerError::DuplicateInstance)
    ));

    drop(again);
    drop(shared);
    TransferManager::release_shared();

    let standalone = test_manager();
    // 有独立实例存活时，共享访问器同样无法创建新实例
    assert!(matches!(
        TransferManager::shared(),
        Err(ManagerError::DuplicateInstance)
    ));
    drop(standalone);

    let recreated = TransferManager::shared().expect("独立实例销毁后应能再次创建共享实例");
    drop(recreated);
    TransferManager::release_shared();
}

#[tokio::test]
#[serial]
async fn test_fetch_request_against_echo_endpoint() {
    let addr = spawn_echo_server();
    let manager = test_manager();

    let args = json!([format!("http://{}/submit", addr), {
        "method": "POST",
        "json": {"name": "mux"},
        "timeout": 5000,
    }]);
    let request = HttpRequest::from_json_args(&args).unwrap();
    let response = manager.fetch_request(&request).await.expect("请求应成功");
    assert_eq!(response.status, 200);
    assert_eq!(&response.data[..], br#"POST /submit{"name":"mux"}"#);

    let binary = HttpRequest::from_json_args(&json!([format!("http://{}/b", addr), {"binary": true}])).unwrap();
    let response = manager.fetch_request(&binary).await.unwrap();
    let reply: serde_json::Value = serde_json::from_str(&response.to_json(binary.binary)).unwrap();
    // "GET /b" 的 base64
    assert_eq!(reply, json!({"status": 200, "data": "R0VUIC9i"}));
}

#[tokio::test]
#[serial]
async fn test_fetch_request_reports_transfer_error() {
    init_env();
    let manager = test_manager();
    let request = HttpRequest::from_json_args(&json!(["http://127.0.0.1:1/", {"timeout": 1000}])).unwrap();
    let err = manager.fetch_request(&request).await.unwrap_err();
    assert!(matches!(err, FetchError::Transfer(_)));
    assert!(err.to_string().starts_with("CURL error: "));
}
