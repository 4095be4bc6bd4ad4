//! End-to-end scenarios, one per concrete example in spec.md §8.
//!
//! Grounded on `async-exec`'s integration-test layout (one `tests/*.rs` per
//! behavioral slice) rather than `kasync`'s heavier loom-based test
//! harness, since this crate has no loom dependency to begin with.

use coop_rt::{all, delay, race, spawn, Error, Runtime, Task, Work};
use std::collections::HashMap;
use std::io::{Read, Write as _};
use std::net::TcpListener;
use std::thread;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn sequential_delay() {
    init_tracing();
    let rt = Runtime::new();
    let _guard = rt.enter();
    let task: Task<String> = rt.queue(async {
        delay(0.0).await?;
        Ok("ok".to_string())
    });
    assert_eq!(rt.block_on(&task).unwrap(), "ok");
}

#[test]
fn parent_child_await() {
    init_tracing();
    let rt = Runtime::new();
    let _guard = rt.enter();
    let parent: Task<String> = rt.queue(async {
        let child: Task<String> = spawn(async {
            delay(0.0).await?;
            Ok("c".to_string())
        });
        let c = child.await?;
        Ok(format!("{c}-p"))
    });
    assert_eq!(rt.block_on(&parent).unwrap(), "c-p");
}

#[test]
fn race_winner_cancels_loser() {
    init_tracing();
    let rt = Runtime::new();
    let _guard = rt.enter();

    let slow: Task<String> = rt.queue(async {
        delay(0.05).await?;
        Ok("slow".to_string())
    });
    let fast: Task<String> = rt.queue(async { Ok("fast".to_string()) });

    let winner = race(vec![Work::from(slow.clone()), Work::from(fast.clone())]).unwrap();
    assert_eq!(winner, "fast");

    assert!(matches!(rt.block_on(&slow), Err(Error::Cancelled)));
}

#[test]
fn cancelling_a_parent_cascades_to_its_child() {
    init_tracing();
    let rt = Runtime::new();
    let _guard = rt.enter();

    let child_slot: std::rc::Rc<std::cell::RefCell<Option<Task<String>>>> =
        std::rc::Rc::new(std::cell::RefCell::new(None));
    let slot = child_slot.clone();

    let parent: Task<String> = rt.queue(async move {
        let child: Task<String> = spawn(async {
            delay(10.0).await?;
            Ok("child".to_string())
        });
        *slot.borrow_mut() = Some(child.clone());
        let c = child.await?;
        Ok(format!("{c}-p"))
    });

    let child = child_slot.borrow().clone().expect("child spawned synchronously");
    assert!(!parent.is_done(), "parent should be suspended on its child");
    assert!(!child.is_done(), "child should be suspended on its own delay");

    rt.cancel(&parent);

    assert!(matches!(rt.block_on(&child), Err(Error::Cancelled)));
    assert!(matches!(rt.block_on(&parent), Err(Error::Cancelled)));

    // The child's timer must have been torn down as part of the cascade, not
    // merely orphaned — otherwise `drive` would still see pending work here.
    assert!(matches!(rt.drive(|| false), Err(Error::Deadlock)));
}

#[test]
fn chunked_body_over_the_wire() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let _ = sock.read(&mut buf).unwrap();
        sock.write_all(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n")
            .unwrap();
    });

    let rt = Runtime::new();
    let _guard = rt.enter();
    let url = format!("http://{addr}/");
    let task: Task<Vec<u8>> = rt.queue(async move {
        let resp = coop_rt::http::fetch(&url, coop_rt::http::FetchOptions::default()).await?;
        Ok(resp.body)
    });
    let body = rt.block_on(&task).unwrap();
    assert_eq!(body, b"abc");
    server.join().unwrap();
}

#[test]
fn oversized_response_fails_with_response_too_large() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        sock.write_all(b"hello world").unwrap();
    });

    let rt = Runtime::new();
    let _guard = rt.enter();
    let client = std::net::TcpStream::connect(addr).unwrap();
    let stream = coop_rt::Stream::from(client);
    let task: Task<Vec<u8>> = rt.queue(async move { coop_rt::read_all(stream, 3).await });
    let err = rt.block_on(&task).unwrap_err();
    assert!(matches!(err, Error::Io(coop_rt::IoFailure::ResponseTooLarge)));
    server.join().unwrap();
}

#[test]
fn deadlock_on_empty_runtime() {
    init_tracing();
    let rt = Runtime::new();
    let _guard = rt.enter();
    assert!(matches!(rt.drive(|| false), Err(Error::Deadlock)));
}

#[test]
fn fetch_plain_http_against_loopback_server() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let n = sock.read(&mut buf).unwrap();
        assert!(String::from_utf8_lossy(&buf[..n]).starts_with("GET /hello"));
        sock.write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi").unwrap();
    });

    let rt = Runtime::new();
    let _guard = rt.enter();
    let url = format!("http://{addr}/hello");
    let task: Task<Vec<u8>> = rt.queue(async move {
        let resp = coop_rt::http::fetch(&url, coop_rt::http::FetchOptions::default()).await?;
        Ok(resp.body)
    });
    let body = rt.block_on(&task).unwrap();
    assert_eq!(body, b"hi");
    server.join().unwrap();
}

#[test]
fn fetch_surfaces_http_status_failures() {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut sock, _) = listener.accept().unwrap();
        let mut buf = [0u8; 4096];
        let _ = sock.read(&mut buf).unwrap();
        sock.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n")
            .unwrap();
    });

    let rt = Runtime::new();
    let _guard = rt.enter();
    let url = format!("http://{addr}/missing");
    let task: Task<u16> = rt.queue(async move {
        let resp = coop_rt::http::fetch(&url, coop_rt::http::FetchOptions::default()).await;
        match resp {
            Err(Error::Status { status, .. }) => Ok(status),
            other => panic!("expected Error::Status, got {other:?}"),
        }
    });
    assert_eq!(rt.block_on(&task).unwrap(), 404);
    server.join().unwrap();
}

/// Starts a loopback TLS server for `host`, serving one connection with a
/// fresh self-signed certificate, then replying with a fixed HTTP response.
/// Returns the bound address and the server thread's join handle.
fn spawn_self_signed_tls_server(
    host: &str,
    response: &'static [u8],
) -> (std::net::SocketAddr, thread::JoinHandle<()>) {
    use rcgen::{generate_simple_self_signed, CertifiedKey};
    use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};

    let CertifiedKey { cert, key_pair } =
        generate_simple_self_signed(vec![host.to_string()]).unwrap();
    let cert_der: CertificateDer<'static> = cert.der().clone();
    let key_der: PrivateKeyDer<'static> =
        PrivateKeyDer::from(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(vec![cert_der], key_der)
        .unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let conn = rustls::ServerConnection::new(std::sync::Arc::new(config)).unwrap();
        let mut tls = rustls::StreamOwned::new(conn, sock);
        let mut buf = [0u8; 4096];
        let _ = tls.read(&mut buf);
        let _ = tls.write_all(response);
        tls.conn.send_close_notify();
        let _ = tls.flush();
    });

    (addr, server)
}

#[test]
fn fetch_https_with_verify_false_accepts_a_self_signed_cert() {
    init_tracing();
    let (addr, server) = spawn_self_signed_tls_server(
        "127.0.0.1",
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
    );

    let rt = Runtime::new();
    let _guard = rt.enter();
    let url = format!("https://{addr}/");
    let task: Task<Vec<u8>> = rt.queue(async move {
        let options = coop_rt::http::FetchOptions {
            verify: false,
            ..Default::default()
        };
        let resp = coop_rt::http::fetch(&url, options).await?;
        Ok(resp.body)
    });
    let body = rt.block_on(&task).unwrap();
    assert_eq!(body, b"hi");
    server.join().unwrap();
}

#[test]
fn fetch_https_with_verify_true_rejects_a_self_signed_cert() {
    init_tracing();
    let (addr, server) = spawn_self_signed_tls_server(
        "127.0.0.1",
        b"HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nhi",
    );

    let rt = Runtime::new();
    let _guard = rt.enter();
    let url = format!("https://{addr}/");
    let task: Task<()> = rt.queue(async move {
        let options = coop_rt::http::FetchOptions::default();
        match coop_rt::http::fetch(&url, options).await {
            Err(Error::Io(_)) => Ok(()),
            other => panic!("expected a TLS verification failure, got {other:?}"),
        }
    });
    rt.block_on(&task).unwrap();
    // The server thread's single `read` may never see a finished handshake
    // once the client aborts it; join is best-effort cleanup only.
    let _ = server.join();
}

#[test]
fn all_collects_every_result_by_key() {
    init_tracing();
    let rt = Runtime::new();
    let _guard = rt.enter();
    let mut tasks = HashMap::new();
    tasks.insert("a", Work::spawn(async { Ok::<_, Error>(1) }));
    tasks.insert("b", Work::spawn(async { Ok::<_, Error>(2) }));
    let results = all(tasks).unwrap();
    assert_eq!(results["a"], 1);
    assert_eq!(results["b"], 2);
}
