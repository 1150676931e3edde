//! Panics in hooks and handlers stay contained to one connection.

use std::{sync::Arc, time::Duration};

use rstest::rstest;
use tokio::{io::AsyncReadExt, net::TcpStream, time::timeout};
use wireroute::{Context, Message, Router, packer::DefaultPacker};
use wireroute_testing::{LoggerHandle, logger, read_frame, spawn_server, write_frame};

fn router() -> Arc<Router> {
    let router = Arc::new(Router::new());
    router.register(1u32, |ctx: Context| async move {
        if ctx.request().data().as_ref() == b"explode" {
            panic!("boom");
        }
        Ok(Some(ctx.raw_response(1u32, "ok")))
    });
    router
}

/// A hook panicking on the first connection is logged and the server keeps
/// accepting.
#[rstest]
#[tokio::test]
async fn connection_panic_is_caught(mut logger: LoggerHandle) {
    let first = Arc::new(std::sync::atomic::AtomicBool::new(true));
    let server = spawn_server(router(), move |s| {
        s.on_session_create(move |_| {
            if first.swap(false, std::sync::atomic::Ordering::SeqCst) {
                panic!("boom");
            }
        })
    })
    .await;

    let mut doomed = TcpStream::connect(server.addr).await.expect("first connect");
    let mut buf = Vec::new();
    timeout(Duration::from_secs(2), doomed.read_to_end(&mut buf))
        .await
        .expect("first connection closed")
        .ok();

    let packer = DefaultPacker::default();
    let mut stream = server.connect().await.expect("second connect");
    write_frame(&packer, &mut stream, &Message::new(1u32, "hi"))
        .await
        .expect("write");
    let reply = read_frame(&packer, &mut stream).await.expect("read");
    assert_eq!(reply.data().as_ref(), b"ok");
    assert_eq!(server.server.sessions().len(), 1);
    server.stop().await.expect("stop");

    let mut found = false;
    while let Some(record) = logger.pop() {
        if record.args().contains("connection task panicked") && record.args().contains("boom") {
            found = true;
        }
    }
    assert!(found, "missing panic log");
}

/// Without recovery middleware a handler panic ends only its own session.
#[rstest]
#[tokio::test]
async fn handler_panic_closes_only_its_session(mut logger: LoggerHandle) {
    let server = spawn_server(router(), |s| s).await;
    let packer = DefaultPacker::default();

    let mut healthy = server.connect().await.expect("connect healthy");
    let mut doomed = server.connect().await.expect("connect doomed");
    write_frame(&packer, &mut doomed, &Message::new(1u32, "explode"))
        .await
        .expect("write");
    let mut buf = Vec::new();
    timeout(Duration::from_secs(2), doomed.read_to_end(&mut buf))
        .await
        .expect("doomed session closed")
        .ok();

    write_frame(&packer, &mut healthy, &Message::new(1u32, "still there"))
        .await
        .expect("write");
    let reply = read_frame(&packer, &mut healthy).await.expect("read");
    assert_eq!(reply.data().as_ref(), b"ok");
    server.stop().await.expect("stop");

    let mut found = false;
    while let Some(record) = logger.pop() {
        if record.args().contains("loop panicked") && record.args().contains("boom") {
            found = true;
        }
    }
    assert!(found, "missing session loop panic log");
}
