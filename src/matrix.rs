//! Minimal Matrix client-server session
//!
//! Just enough of the protocol to log in, keep a sync loop running that
//! accepts invites and tracks joined rooms, and post messages. The set of
//! joined rooms is the subscriber set the notifier reads.

use async_trait::async_trait;
use dashmap::DashSet;
use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{ChatTransport, Config, Message, ScoutError};

const SYNC_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct LoginResponse {
    access_token: String,
    #[serde(default)]
    device_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct SyncResponse {
    next_batch: String,
    #[serde(default)]
    rooms: SyncRooms,
}

#[derive(Debug, Default, Deserialize)]
struct SyncRooms {
    #[serde(default)]
    join: HashMap<String, Value>,
    #[serde(default)]
    invite: HashMap<String, Value>,
    #[serde(default)]
    leave: HashMap<String, Value>,
}

pub struct MatrixSession {
    client: Client,
    homeserver: Url,
    user_id: String,
    password: String,
    sync_timeout: Duration,
    access_token: RwLock<Option<String>>,
    next_batch: RwLock<Option<String>>,
    rooms: DashSet<String>,
}

impl MatrixSession {
    pub fn new(config: Arc<Config>) -> Result<Self, ScoutError> {
        let homeserver = Url::parse(&config.homeserver_url)
            .map_err(|e| ScoutError::Configuration(format!("homeserver_url: {e}")))?;
        // Long-poll syncs must be allowed to outlast the server-side timeout.
        let client = Client::builder()
            .timeout(config.sync_timeout + Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            homeserver,
            user_id: config.user_id.clone(),
            password: config.password.clone(),
            sync_timeout: config.sync_timeout,
            access_token: RwLock::new(None),
            next_batch: RwLock::new(None),
            rooms: DashSet::new(),
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ScoutError> {
        let mut url = self.homeserver.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ScoutError::Configuration("homeserver_url cannot be a base".into()))?;
            path.pop_if_empty();
            path.extend(["_matrix", "client", "v3"]);
            path.extend(segments);
        }
        Ok(url)
    }

    fn token(&self) -> Result<String, ScoutError> {
        self.access_token
            .read()
            .map_err(|_| ScoutError::Protocol("session state poisoned".to_string()))?
            .clone()
            .ok_or_else(|| ScoutError::Protocol("not logged in".to_string()))
    }

    fn authorized(&self, method: Method, url: Url) -> Result<RequestBuilder, ScoutError> {
        Ok(self.client.request(method, url).bearer_auth(self.token()?))
    }

    pub fn is_logged_in(&self) -> bool {
        self.token().is_ok()
    }

    pub async fn login(&self) -> Result<(), ScoutError> {
        let url = self.endpoint(&["login"])?;
        let body = json!({
            "type": "m.login.password",
            "identifier": { "type": "m.id.user", "user": self.user_id },
            "password": self.password,
            "initial_device_display_name": "screenshot-scout",
        });

        let response = self.client.post(url).json(&body).send().await?;
        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ScoutError::Protocol(format!("login failed ({status}): {detail}")));
        }

        let login: LoginResponse = response.json().await?;
        if let Ok(mut token) = self.access_token.write() {
            *token = Some(login.access_token);
        }
        info!(
            "Logged in as {} (device {})",
            self.user_id,
            login.device_id.as_deref().unwrap_or("unknown")
        );
        Ok(())
    }

    /// Log in and run a first sync so already-joined rooms are known before
    /// the first announcement.
    ///
    /// Returns `Ok(false)` if `shutdown` fires first; both steps can block for
    /// a full request timeout.
    pub async fn connect(&self, shutdown: &mut broadcast::Receiver<()>) -> Result<bool, ScoutError> {
        let startup = async {
            self.login().await?;
            if let Err(e) = self.sync_once().await {
                warn!("Initial sync failed: {}", e);
            }
            Ok::<(), ScoutError>(())
        };

        tokio::select! {
            _ = shutdown.recv() => {
                info!("Shutdown requested while connecting");
                Ok(false)
            }
            result = startup => result.map(|()| true),
        }
    }

    /// One sync round trip. Joins every pending invite and refreshes the
    /// joined room set.
    pub async fn sync_once(&self) -> Result<(), ScoutError> {
        let url = self.endpoint(&["sync"])?;
        let since = self
            .next_batch
            .read()
            .map_err(|_| ScoutError::Protocol("session state poisoned".to_string()))?
            .clone();

        let mut query = vec![("timeout", self.sync_timeout.as_millis().to_string())];
        if let Some(since) = since {
            query.push(("since", since));
        }

        let response = self
            .authorized(Method::GET, url)?
            .query(&query)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::Protocol(format!("sync failed: {status}")));
        }
        let sync: SyncResponse = response.json().await?;

        for room_id in sync.rooms.join.keys() {
            if self.rooms.insert(room_id.clone()) {
                debug!("Now subscribed to {}", room_id);
            }
        }
        for room_id in sync.rooms.leave.keys() {
            if self.rooms.remove(room_id).is_some() {
                info!("Left {}", room_id);
            }
        }
        for room_id in sync.rooms.invite.keys() {
            info!("Received invite to {}, attempting to join...", room_id);
            match self.join(room_id).await {
                Ok(()) => {
                    self.rooms.insert(room_id.clone());
                }
                Err(e) => warn!("Could not join {}: {}", room_id, e),
            }
        }

        if let Ok(mut next_batch) = self.next_batch.write() {
            *next_batch = Some(sync.next_batch);
        }
        Ok(())
    }

    pub async fn join(&self, room_id: &str) -> Result<(), ScoutError> {
        let url = self.endpoint(&["rooms", room_id, "join"])?;
        let response = self
            .authorized(Method::POST, url)?
            .json(&json!({}))
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::Protocol(format!("join {room_id} failed: {status}")));
        }
        info!("Joined {}", room_id);
        Ok(())
    }

    /// Keep syncing until `shutdown` fires. Errors are logged and retried.
    pub async fn run_sync_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("Sync loop stopping");
                    return;
                }
                result = self.sync_once() => {
                    if let Err(e) = result {
                        error!("Sync failed: {}", e);
                    }
                }
            }
            sleep(SYNC_PAUSE).await;
        }
    }

    pub async fn logout(&self) {
        let Ok(url) = self.endpoint(&["logout"]) else {
            return;
        };
        let Ok(request) = self.authorized(Method::POST, url) else {
            return;
        };
        match request.json(&json!({})).send().await {
            Ok(response) if response.status().is_success() => info!("Logged out"),
            Ok(response) => warn!("Logout returned {}", response.status()),
            Err(e) => warn!("Logout failed: {}", e),
        }
        if let Ok(mut token) = self.access_token.write() {
            *token = None;
        }
    }
}

#[async_trait]
impl ChatTransport for MatrixSession {
    async fn current_subscribers(&self) -> Vec<String> {
        let mut rooms: Vec<String> = self.rooms.iter().map(|room| room.key().clone()).collect();
        rooms.sort();
        rooms
    }

    async fn send(&self, subscriber: &str, message: &Message) -> Result<(), ScoutError> {
        let txn_id = uuid::Uuid::new_v4().to_string();
        let url = self.endpoint(&["rooms", subscriber, "send", "m.room.message", &txn_id])?;
        let content = json!({
            "msgtype": "m.text",
            "body": message.plain,
            "format": "org.matrix.custom.html",
            "formatted_body": message.html,
        });

        let response = self
            .authorized(Method::PUT, url)?
            .json(&content)
            .send()
            .await
            .map_err(|e| ScoutError::Delivery {
                room: subscriber.to_string(),
                reason: e.to_string(),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ScoutError::Delivery {
                room: subscriber.to_string(),
                reason: status.to_string(),
            });
        }
        Ok(())
    }
}
