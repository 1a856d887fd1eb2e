use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use matrix_sdk::ruma::{OwnedRoomId, OwnedUserId, RoomId};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WatchKey {
    pub report_to: OwnedRoomId,
    pub room: OwnedRoomId,
    /// Set for `!member ... watch`, unset for the whole member list.
    pub member: Option<OwnedUserId>,
}

struct Watch {
    generation: u64,
    task: JoinHandle<()>,
}

#[derive(Clone, Default)]
pub struct Watches {
    tasks: Arc<Mutex<HashMap<WatchKey, Watch>>>,
    generations: Arc<AtomicU64>,
}

impl Watches {
    /// Spawns `fut` under `key`, aborting whatever ran there before. The entry
    /// goes away by itself once `fut` finishes. Returns whether a watch was
    /// replaced.
    pub async fn start<F>(&self, key: WatchKey, fut: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        // Held across the spawn so the task can't clean up before it's inserted.
        let mut tasks = self.tasks.lock().await;
        let registry = self.tasks.clone();
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            fut.await;
            let mut tasks = registry.lock().await;
            if tasks
                .get(&task_key)
                .is_some_and(|watch| watch.generation == generation)
            {
                tasks.remove(&task_key);
            }
        });
        match tasks.insert(key, Watch { generation, task }) {
            Some(old) => {
                old.task.abort();
                true
            }
            None => false,
        }
    }

    pub async fn stop(&self, key: &WatchKey) -> bool {
        match self.tasks.lock().await.remove(key) {
            Some(watch) => {
                watch.task.abort();
                true
            }
            None => false,
        }
    }

    pub async fn stop_room(&self, room_id: &RoomId) {
        self.tasks.lock().await.retain(|key, watch| {
            if key.room == room_id {
                watch.task.abort();
                false
            } else {
                true
            }
        });
    }

    #[cfg(test)]
    async fn keys(&self) -> Vec<WatchKey> {
        self.tasks.lock().await.keys().cloned().collect()
    }
}
