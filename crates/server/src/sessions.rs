use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use cinemeld_core::concurrency::AbortFlag;
use cinemeld_playback::{PlaybackController, PlaybackState};
use tracing::{debug, info, warn};

use crate::bridge::Bridge;
use crate::state::ServerEvent;

const TICK: Duration = Duration::from_secs(1);

/// Running playback sessions, keyed by the id handed to the host shell.
pub struct Sessions {
    running: RwLock<HashMap<String, Arc<PlaybackController>>>,
    bridge: Arc<Bridge>,
    abort: AbortFlag,
}

impl Sessions {
    pub fn new(bridge: Arc<Bridge>, abort: AbortFlag) -> Self {
        Self {
            running: RwLock::new(HashMap::new()),
            bridge,
            abort,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<PlaybackController>> {
        self.running.read().unwrap_or_else(|e| e.into_inner()).get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.running.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn announce(&self, id: &str, state: PlaybackState) {
        self.bridge.publish(ServerEvent::Playback {
            session: id.to_string(),
            state: state.as_str().to_string(),
        });
    }

    /// Register the controller and drive it in the background: load, then
    /// tick once a second until playback ends.
    pub fn start(self: &Arc<Self>, controller: PlaybackController) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let controller = Arc::new(controller);
        self.running
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id.clone(), controller.clone());
        self.announce(&id, controller.state());

        let sessions = self.clone();
        let session = id.clone();
        tokio::spawn(async move {
            info!(session = %session, item = %controller.request().seed.key(), "playback session started");
            if let Err(e) = controller.start().await {
                warn!(session = %session, error = %e, "playback did not start");
            }
            let mut ticker = tokio::time::interval(TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut last = controller.state();
            sessions.announce(&session, last);
            while !controller.state().is_terminal() && !sessions.abort.is_aborted() {
                ticker.tick().await;
                controller.tick().await;
                let now = controller.state();
                if now != last {
                    sessions.announce(&session, now);
                    last = now;
                }
            }
            sessions.remove(&session);
            sessions.announce(&session, controller.state());
            debug!(session = %session, state = controller.state().as_str(), "playback session closed");
        });
        id
    }

    fn remove(&self, id: &str) {
        self.running.write().unwrap_or_else(|e| e.into_inner()).remove(id);
    }
}
