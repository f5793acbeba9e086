use std::time::Duration;

use nexus_match::{
    app,
    client::live,
    config::Config,
    db,
    ws::{event::Deleted, Event},
    AppState,
};
use tokio::{net::TcpListener, sync::mpsc, time::timeout};
use uuid::Uuid;

async fn next(rx: &mut mpsc::Receiver<Event>) -> Event {
    timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("no event in time")
        .expect("stream ended")
}

#[tokio::test]
async fn live_stream_receives_broadcasts() {
    let db_pool = db::memory_pool().await.unwrap();
    let config = Config { auth_disabled: true, ..Config::default() };
    let state = AppState::new(config, db_pool).await.unwrap();
    let hub = state.hub.clone();
    let me = state.dev_user.unwrap();

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app(state)).await });

    let mut rx = live::subscribe(format!("ws://{address}/ws"), None);

    assert_eq!(next(&mut rx).await, Event::AuthSuccess { user_id: me, message: "Authenticated".to_owned() });
    assert!(matches!(next(&mut rx).await, Event::Welcome { .. }));
    assert!(hub.is_online(me));

    let id = Uuid::now_v7();
    hub.to_users(&[Uuid::now_v7()], &Event::Pong);
    hub.to_all(&Event::MatchRequestDeleted { data: Deleted { id }, message: "Match request deleted".to_owned() });

    // the delivery addressed to someone else never shows up
    match next(&mut rx).await {
        Event::MatchRequestDeleted { data, .. } => assert_eq!(data.id, id),
        other => panic!("unexpected {other:?}"),
    }
}
