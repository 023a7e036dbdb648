//! Interaction State Store.
//!
//! Holds the in-memory catalog and the current user's liked/saved sets.
//! Mutations are optimistic: memory changes before the first gateway call
//! suspends, and the remote result is reconciled afterwards.

mod catalog;
mod feed;
mod interaction;
mod keyed;

use crate::gateway::RemoteGateway;
use crate::notice::Notices;
use crate::session::SessionIdentity;
use crate::types::*;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

pub use keyed::KeyedLocks;
use keyed::PendingWrites;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Newest first
    pub games: Arc<RwLock<Vec<Game>>>,
    pub liked: Arc<RwLock<HashSet<GameId>>>,
    pub saved: Arc<RwLock<HashSet<GameId>>>,
    session: Arc<SessionIdentity>,
    gateway: Arc<dyn RemoteGateway>,
    notices: Notices,
    /// Bumped on every identity change; stale catalog fetches are dropped
    epoch: Arc<AtomicU64>,
    locks: KeyedLocks,
    membership_writes: PendingWrites<bool>,
    game_writes: PendingWrites<Game>,
}

impl AppState {
    pub fn new(
        session: Arc<SessionIdentity>,
        gateway: Arc<dyn RemoteGateway>,
        notices: Notices,
    ) -> Self {
        Self {
            games: Arc::new(RwLock::new(Vec::new())),
            liked: Arc::new(RwLock::new(HashSet::new())),
            saved: Arc::new(RwLock::new(HashSet::new())),
            session,
            gateway,
            notices,
            epoch: Arc::new(AtomicU64::new(0)),
            locks: KeyedLocks::new(),
            membership_writes: PendingWrites::new(),
            game_writes: PendingWrites::new(),
        }
    }

    pub fn session(&self) -> &Arc<SessionIdentity> {
        &self.session
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    /// Snapshot of the catalog
    pub async fn games(&self) -> Vec<Game> {
        self.games.read().await.clone()
    }

    pub async fn get_game(&self, id: &str) -> Option<Game> {
        self.games.read().await.iter().find(|g| g.id == id).cloned()
    }

    pub async fn is_liked(&self, id: &str) -> bool {
        self.writer().is_some() && self.liked.read().await.contains(id)
    }

    pub async fn is_saved(&self, id: &str) -> bool {
        self.writer().is_some() && self.saved.read().await.contains(id)
    }

    /// Liked games of the signed-in user; always empty for guests
    pub async fn liked_ids(&self) -> HashSet<GameId> {
        if self.writer().is_none() {
            return HashSet::new();
        }
        self.liked.read().await.clone()
    }

    pub async fn saved_ids(&self) -> HashSet<GameId> {
        if self.writer().is_none() {
            return HashSet::new();
        }
        self.saved.read().await.clone()
    }

    /// React to an identity change: reload memberships and the catalog.
    ///
    /// Both fetches run concurrently and may finish in either order.
    pub async fn sync_identity(&self, identity: Option<Identity>) {
        let epoch = self.begin_identity_change().await;
        self.reload(identity, epoch).await;
    }

    /// Invalidate in-flight fetches and drop the previous user's memberships.
    ///
    /// Makes no gateway call, so it never waits behind a slow fetch.
    pub async fn begin_identity_change(&self) -> u64 {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        self.liked.write().await.clear();
        self.saved.write().await.clear();
        epoch
    }

    /// Fetch memberships and the catalog for `identity`. Results are dropped
    /// if another identity change happened after `epoch`.
    pub async fn reload(&self, identity: Option<Identity>, epoch: u64) {
        futures::join!(
            self.load_memberships(identity.as_ref(), epoch),
            self.fetch_catalog(epoch)
        );
    }

    fn current_epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// The signed-in, non-guest user allowed to write
    fn writer(&self) -> Option<UserProfile> {
        self.session
            .current()
            .and_then(|identity| identity.as_user().cloned())
    }

    /// Whether `user_id` is still the signed-in user
    fn is_current_user(&self, user_id: &str) -> bool {
        self.writer().is_some_and(|user| user.id == user_id)
    }
}
