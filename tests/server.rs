//! Server-level behaviour: registry access, hooks and configuration.

use std::{sync::Arc, time::Duration};

use rstest::rstest;
use tokio::{net::UdpSocket, time::timeout};
use wireroute::{
    Context,
    HandlerError,
    Id,
    Message,
    Router,
    packer::{CompactPacker, Packer, TextIdPacker},
};
use wireroute_testing::{
    LoggerHandle,
    logger,
    read_frame,
    spawn_server,
    spawn_udp_server,
    write_frame,
};

fn echo_router() -> Arc<Router> {
    let router = Arc::new(Router::new());
    router.register(1u32, |ctx: Context| async move {
        Ok(Some(ctx.raw_response(1u32, ctx.request().data().clone())))
    });
    router
}

#[tokio::test]
async fn broadcast_reaches_every_live_session() {
    let server = spawn_server(echo_router(), |s| s).await;
    let packer = wireroute::packer::DefaultPacker::default();
    let mut streams = Vec::new();
    for _ in 0..3 {
        let mut stream = server.connect().await.expect("connect");
        write_frame(&packer, &mut stream, &Message::new(1u32, "hello"))
            .await
            .expect("write");
        read_frame(&packer, &mut stream).await.expect("echo");
        streams.push(stream);
    }

    let queued = server
        .server
        .sessions()
        .broadcast(&Message::new(5u32, "news"));
    assert_eq!(queued, 3);

    for stream in &mut streams {
        let msg = timeout(Duration::from_secs(2), read_frame(&packer, stream))
            .await
            .expect("broadcast in time")
            .expect("read broadcast");
        assert_eq!(msg.id(), &Id::Numeric(5));
        assert_eq!(msg.data().as_ref(), b"news");
    }
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn handlers_can_push_to_other_sessions_by_id() {
    let router: Arc<Router> = Arc::new(Router::new());
    let server = spawn_server(Arc::clone(&router), |s| s).await;
    let registry = Arc::clone(server.server.sessions());
    router.register(1u32, move |ctx: Context| {
        let registry = Arc::clone(&registry);
        async move {
            let target: u64 = std::str::from_utf8(ctx.request().data())?.parse()?;
            registry
                .send_to(target.into(), ctx.raw_response(2u32, "relayed"))
                .await?;
            Ok::<_, HandlerError>(None)
        }
    });
    let packer = wireroute::packer::DefaultPacker::default();

    let mut receiver = server.connect().await.expect("connect receiver");
    // Learn the receiver's session id from the registry once it appears.
    let receiver_id = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(id) = server.server.sessions().ids().first().copied() {
                break id;
            }
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("receiver registered");

    let mut sender = server.connect().await.expect("connect sender");
    write_frame(
        &packer,
        &mut sender,
        &Message::new(1u32, receiver_id.as_u64().to_string()),
    )
    .await
    .expect("write");

    let msg = timeout(Duration::from_secs(2), read_frame(&packer, &mut receiver))
        .await
        .expect("relay in time")
        .expect("read relay");
    assert_eq!(msg.data().as_ref(), b"relayed");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn configured_packer_frames_both_directions() {
    let server = spawn_server(echo_router(), |s| s.packer(CompactPacker::default())).await;
    let packer = CompactPacker::default();
    let mut stream = server.connect().await.expect("connect");
    write_frame(&packer, &mut stream, &Message::new(1u32, "compact"))
        .await
        .expect("write");
    let reply = read_frame(&packer, &mut stream).await.expect("read");
    assert_eq!(reply.data().as_ref(), b"compact");
    server.stop().await.expect("stop");
}

#[tokio::test]
async fn text_ids_route_through_text_packer() {
    let router: Arc<Router> = Arc::new(Router::new());
    router.register("greet", |ctx: Context| async move {
        let name = String::from_utf8_lossy(ctx.request().data()).into_owned();
        Ok(Some(ctx.display_response("greeting", &format!("hi {name}"))))
    });
    let server = spawn_server(router, |s| s.packer(TextIdPacker::default())).await;
    let packer = TextIdPacker::default();
    let mut stream = server.connect().await.expect("connect");
    write_frame(&packer, &mut stream, &Message::new("greet", "ada"))
        .await
        .expect("write");
    let reply = read_frame(&packer, &mut stream).await.expect("read");
    assert_eq!(reply.id(), &Id::from("greeting"));
    assert_eq!(reply.data().as_ref(), b"hi ada");
    server.stop().await.expect("stop");
}

#[rstest]
#[tokio::test]
async fn serving_logs_listen_address(mut logger: LoggerHandle) {
    let server = spawn_server(echo_router(), |s| s).await;
    let addr = server.addr;
    server.stop().await.expect("stop");

    let infos = logger.drain_level(log::Level::Info);
    let expected = format!("server listening: local_addr={addr}, transport=tcp");
    assert!(infos.contains(&expected), "missing listen log: {infos:?}");
}

#[rstest]
#[tokio::test]
async fn oversized_datagram_is_reported_as_truncated(mut logger: LoggerHandle) {
    let server = spawn_udp_server(echo_router(), |s| s.udp_buffer_size(16)).await;
    let packer = wireroute::packer::DefaultPacker::default();
    let client = UdpSocket::bind("127.0.0.1:0").await.expect("bind client");
    let frame = packer
        .pack(&Message::new(1u32, vec![7u8; 64]))
        .expect("pack");
    client.send_to(&frame, server.addr).await.expect("send");

    let mut warnings = Vec::new();
    let reported = timeout(Duration::from_secs(2), async {
        loop {
            warnings.extend(logger.drain_level(log::Level::Warn));
            if warnings
                .iter()
                .any(|m| m.starts_with("datagram may be truncated"))
            {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    server.stop().await.expect("stop");
    assert!(reported.is_ok(), "missing truncation warning: {warnings:?}");
}
