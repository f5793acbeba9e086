use futures_util::StreamExt;
use tokio::{sync::mpsc, time::sleep};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        client::IntoClientRequest,
        http::{header::COOKIE, HeaderValue},
        Message,
    },
};
use tracing::{debug, info, warn};

use crate::ws::Event;

use super::backoff::{Backoff, INITIAL_DELAY};

pub const CHANNEL_CAPACITY: usize = 64;

/// Keeps a socket to `url` open in the background and hands every pushed
/// event to the returned receiver. Dropping the receiver stops it, and so
/// does running out of reconnect attempts.
pub fn subscribe(url: impl Into<String>, cookie: Option<String>) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run(url.into(), cookie, tx));
    rx
}

async fn run(url: String, cookie: Option<String>, tx: mpsc::Sender<Event>) {
    let mut backoff = Backoff::new();
    sleep(INITIAL_DELAY).await;

    loop {
        match listen(&url, cookie.as_deref(), &tx, &mut backoff).await {
            Ok(()) => debug!("socket to {url} closed"),
            Err(err) => warn!("socket to {url} failed: {err:#}"),
        }
        if tx.is_closed() {
            return;
        }

        let Some(delay) = backoff.next_delay() else {
            warn!("giving up on {url} after {} attempts", backoff.attempts());
            return;
        };
        info!("reconnecting to {url} in {delay:?}");
        sleep(delay).await;
    }
}

/// One connection, until the server closes it or the receiver goes away.
async fn listen(
    url: &str,
    cookie: Option<&str>,
    tx: &mpsc::Sender<Event>,
    backoff: &mut Backoff,
) -> anyhow::Result<()> {
    let mut request = url.into_client_request()?;
    if let Some(cookie) = cookie {
        request.headers_mut().insert(COOKIE, HeaderValue::from_str(cookie)?);
    }

    let (mut stream, _) = connect_async(request).await?;
    backoff.reset();
    debug!("connected to {url}");

    while let Some(message) = stream.next().await {
        match message? {
            Message::Text(text) => match serde_json::from_str::<Event>(text.as_str()) {
                Ok(event) => {
                    if tx.send(event).await.is_err() {
                        return Ok(());
                    }
                }
                Err(err) => debug!("skipping unknown event: {err}"),
            },
            Message::Close(_) => break,
            _ => {}
        }
    }
    Ok(())
}
