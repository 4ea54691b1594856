#![allow(dead_code)]

use async_trait::async_trait;
use rss_relay::{Feed, FeedEntry, FeedSource, ItemStore, Notifier, RelayError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_test_writer()
            .try_init()
            .ok();
    });
}

/// A migrated store backed by a file in its own temp directory.
/// Keep the `TempDir` alive for as long as the store is used.
pub async fn temp_store() -> (TempDir, Arc<ItemStore>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let url = format!("sqlite://{}", dir.path().join("rss.db").display());
    let store = ItemStore::open(&url).await.expect("open store");
    store.migrate().await.expect("migrate store");
    (dir, Arc::new(store))
}

/// Like [`temp_store`], but the pool stays in the test's hands so it can
/// reshape the schema underneath the store.
pub async fn temp_store_with_pool() -> (TempDir, SqlitePool, Arc<ItemStore>) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let options = SqliteConnectOptions::new()
        .filename(dir.path().join("rss.db"))
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .expect("open pool");
    let store = ItemStore::from_pool(pool.clone());
    store.migrate().await.expect("migrate store");
    (dir, pool, Arc::new(store))
}

/// Make every insert of `link` fail with a database error.
pub async fn reject_insert_of(pool: &SqlitePool, link: &str) {
    let sql = format!(
        "CREATE TRIGGER reject_insert BEFORE INSERT ON rss WHEN NEW.link = '{}' \
         BEGIN SELECT RAISE(ABORT, 'insert rejected'); END",
        link
    );
    sqlx::query(&sql).execute(pool).await.expect("create insert trigger");
}

/// Make every update of `link` fail with a database error.
pub async fn reject_update_of(pool: &SqlitePool, link: &str) {
    let sql = format!(
        "CREATE TRIGGER reject_update BEFORE UPDATE ON rss WHEN OLD.link = '{}' \
         BEGIN SELECT RAISE(ABORT, 'update rejected'); END",
        link
    );
    sqlx::query(&sql).execute(pool).await.expect("create update trigger");
}

pub fn entry(link: &str, title: &str) -> FeedEntry {
    FeedEntry {
        title: title.to_string(),
        link: link.to_string(),
    }
}

pub fn feed(url: &str, entries: Vec<FeedEntry>) -> Feed {
    Feed {
        url: url.to_string(),
        title: None,
        entries,
    }
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn wait_until<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Feed source answering from a scripted map of URL to entries.
#[derive(Default)]
pub struct MockFeedSource {
    feeds: Mutex<HashMap<String, Vec<FeedEntry>>>,
    failing: Mutex<HashSet<String>>,
    started: AtomicUsize,
    calls: Mutex<Vec<String>>,
    gate: Option<Arc<Semaphore>>,
}

impl MockFeedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch waits for a permit on `gate` before answering.
    pub fn gated(gate: Arc<Semaphore>) -> Self {
        Self {
            gate: Some(gate),
            ..Self::default()
        }
    }

    pub fn set_feed(&self, url: &str, entries: Vec<FeedEntry>) {
        self.feeds.lock().unwrap().insert(url.to_string(), entries);
    }

    pub fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }

    /// Fetches that have begun, including ones still held at the gate.
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl FeedSource for MockFeedSource {
    async fn fetch(&self, url: &str) -> Result<Feed> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }

        self.calls.lock().unwrap().push(url.to_string());

        if self.failing.lock().unwrap().contains(url) {
            return Err(RelayError::General(format!("{} is down", url)));
        }

        let entries = self
            .feeds
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| RelayError::General(format!("no feed scripted for {}", url)))?;
        Ok(feed(url, entries))
    }
}

/// Records every delivered message; fails for messages containing a listed link.
#[derive(Default)]
pub struct MockNotifier {
    sent: Mutex<Vec<String>>,
    attempts: Mutex<Vec<String>>,
    failing_links: Mutex<HashSet<String>>,
    delay: Duration,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send takes `delay` before it completes.
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }

    pub fn fail_link(&self, link: &str) {
        self.failing_links.lock().unwrap().insert(link.to_string());
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<String> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn sent_count(&self, link: &str) -> usize {
        self.sent()
            .iter()
            .filter(|text| text.lines().nth(1) == Some(link))
            .count()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send_message(&self, text: &str) -> Result<()> {
        self.attempts.lock().unwrap().push(text.to_string());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let link = text.lines().nth(1).unwrap_or_default();
        if self.failing_links.lock().unwrap().contains(link) {
            return Err(RelayError::Telegram("chat not found".to_string()));
        }

        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StubRequest {
    pub path: String,
    pub body: String,
}

pub struct StubReply {
    pub status: u16,
    pub body: Vec<u8>,
}

impl StubReply {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// One-request-per-connection HTTP server on a loopback port.
/// The responder gets each request and its zero-based arrival index.
pub struct StubHttp {
    pub base_url: String,
    requests: Arc<Mutex<Vec<StubRequest>>>,
}

impl StubHttp {
    pub async fn start<F>(respond: F) -> Self
    where
        F: Fn(&StubRequest, usize) -> StubReply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind stub listener");
        let addr = listener.local_addr().expect("stub address");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let respond = Arc::new(respond);

        let recorded = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                let respond = Arc::clone(&respond);
                let recorded = Arc::clone(&recorded);
                tokio::spawn(async move {
                    let _ = serve_connection(socket, respond, recorded).await;
                });
            }
        });

        Self {
            base_url: format!("http://{}", addr),
            requests,
        }
    }

    pub fn requests(&self) -> Vec<StubRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn hits(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

async fn serve_connection<F>(
    mut socket: TcpStream,
    respond: Arc<F>,
    recorded: Arc<Mutex<Vec<StubRequest>>>,
) -> std::io::Result<()>
where
    F: Fn(&StubRequest, usize) -> StubReply,
{
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            return Ok(());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let request = StubRequest {
        path: head.split_whitespace().nth(1).unwrap_or("/").to_string(),
        body: String::from_utf8_lossy(&buf[header_end..]).to_string(),
    };
    let index = {
        let mut recorded = recorded.lock().unwrap();
        recorded.push(request.clone());
        recorded.len() - 1
    };

    let reply = respond(&request, index);
    let head = format!(
        "HTTP/1.1 {} Stub\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        reply.status,
        reply.body.len()
    );
    socket.write_all(head.as_bytes()).await?;
    socket.write_all(&reply.body).await?;
    socket.shutdown().await
}
