//! Route table behaviour: fallbacks, replacement and concurrent use.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use futures::future::join_all;
use rstest::{fixture, rstest};
use wireroute::{
    Context,
    HandlerError,
    Id,
    Message,
    Router,
    Session,
    middleware::{Handler, from_fn},
    packer::DefaultPacker,
    session::SessionConfig,
};
use wireroute_testing::{LoggerHandle, logger};

#[fixture]
fn session() -> Arc<Session> {
    Arc::new(Session::new(
        Arc::new(DefaultPacker::default()),
        SessionConfig::default(),
    ))
}

#[rstest]
#[tokio::test]
async fn not_found_handler_is_wrapped_by_globals(session: Arc<Session>) {
    let wrapped = Arc::new(AtomicUsize::new(0));
    let router: Router = Router::new();
    router.set_not_found_handler(|ctx: Context| async move {
        Ok(Some(ctx.raw_response(0u32, format!("no route for {}", ctx.request().id()))))
    });
    let counter = Arc::clone(&wrapped);
    router.use_middleware(Arc::new(from_fn(move |ctx: Context, next: Handler| {
        counter.fetch_add(1, Ordering::SeqCst);
        next(ctx)
    })));

    let resp = router
        .dispatch(&session, Message::new("missing", ""))
        .await
        .expect("fallback succeeds")
        .expect("fallback response");

    assert_eq!(resp.data().as_ref(), b"no route for missing");
    assert_eq!(wrapped.load(Ordering::SeqCst), 1);
}

#[rstest]
#[tokio::test]
async fn handler_error_sends_nothing_and_keeps_session_open(session: Arc<Session>) {
    let router: Router = Router::new();
    router.register(1u32, |_ctx: Context| async move {
        Err::<Option<Message>, HandlerError>("bad request".into())
    });

    router.handle(&session, Message::new(1u32, "")).await;

    assert!(!session.is_closed());
    assert!(
        session
            .try_send(Message::new(9u32, ""))
            .is_ok(),
        "outbound queue should still be empty and open"
    );
}

#[rstest]
#[tokio::test]
async fn text_and_numeric_ids_route_independently(session: Arc<Session>) {
    let router: Router = Router::new();
    router.register("login", |ctx: Context| async move { Ok(Some(ctx.raw_response("login", "text"))) });
    router.register(7u16, |ctx: Context| async move { Ok(Some(ctx.raw_response(7u16, "numeric"))) });

    let text = router
        .dispatch(&session, Message::new("login", ""))
        .await
        .expect("dispatch")
        .expect("response");
    let numeric = router
        .dispatch(&session, Message::new(7u32, ""))
        .await
        .expect("dispatch")
        .expect("response");

    assert_eq!(text.data().as_ref(), b"text");
    assert_eq!(numeric.data().as_ref(), b"numeric");
    assert_eq!(router.routes(), vec![Id::Numeric(7), Id::from("login")]);
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn registration_and_dispatch_run_concurrently(session: Arc<Session>) {
    let router: Arc<Router> = Arc::new(Router::new());
    let registrations = (0..32u32).map(|i| {
        let router = Arc::clone(&router);
        tokio::spawn(async move {
            router.register(i, move |ctx: Context| async move {
                Ok(Some(ctx.raw_response(i, i.to_string())))
            });
        })
    });
    let dispatches = (0..32u32).map(|i| {
        let router = Arc::clone(&router);
        let session = Arc::clone(&session);
        tokio::spawn(async move { router.dispatch(&session, Message::new(i, "")).await.is_ok() })
    });
    for res in join_all(registrations).await {
        res.expect("registration task");
    }
    for res in join_all(dispatches).await {
        assert!(res.expect("dispatch task"));
    }
    assert_eq!(router.routes().len(), 32);
}

#[rstest]
fn log_routes_lists_every_route(mut logger: LoggerHandle) {
    let router: Router = Router::new();
    router.register(2u32, |_ctx: Context| async { Ok(None) });
    router.register(1u32, |_ctx: Context| async { Ok(None) });
    router.log_routes();

    let lines: Vec<String> = logger
        .drain_level(log::Level::Info)
        .into_iter()
        .filter(|line| line.starts_with("route: "))
        .collect();
    assert_eq!(lines, ["route: id=1, middlewares=0", "route: id=2, middlewares=0"]);
}
