use std::{collections::HashMap, sync::Arc};

use tokio::sync::RwLock;

use crate::connection::ServerConnection;

/// Process-wide map of server id → live connection.
///
/// One instance is created at the composition root and shared through `Arc`
/// with the accept loop and every request issuer. All mutations go through a
/// single lock, so lookups never see a half-replaced slot.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_server_id: RwLock<HashMap<String, Arc<ServerConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `conn` as the live connection for its server id. Returns the
    /// connection it replaced, which the caller is responsible for closing.
    pub async fn register(&self, conn: Arc<ServerConnection>) -> Option<Arc<ServerConnection>> {
        self.by_server_id
            .write()
            .await
            .insert(conn.server_id.clone(), conn)
    }

    /// Remove the entry only if it still holds the connection `conn_id`.
    ///
    /// Teardown of an evicted connection must not erase its replacement.
    pub async fn remove_if_current(&self, server_id: &str, conn_id: &str) -> bool {
        let mut map = self.by_server_id.write().await;
        if map.get(server_id).is_some_and(|c| c.conn_id == conn_id) {
            map.remove(server_id);
            true
        } else {
            false
        }
    }

    pub async fn get(&self, server_id: &str) -> Option<Arc<ServerConnection>> {
        self.by_server_id.read().await.get(server_id).cloned()
    }

    /// Connected server ids, sorted.
    pub async fn list_server_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.by_server_id.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.by_server_id.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.by_server_id.read().await.is_empty()
    }

    /// Empty the registry, returning every connection it held.
    pub async fn drain(&self) -> Vec<Arc<ServerConnection>> {
        self.by_server_id
            .write()
            .await
            .drain()
            .map(|(_, conn)| conn)
            .collect()
    }
}
