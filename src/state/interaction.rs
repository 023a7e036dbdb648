use super::AppState;
use crate::gateway::Membership;
use crate::notice::NoticeKind;
use crate::types::*;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::RwLock;

impl AppState {
    /// Reload the liked and saved sets for `identity`.
    ///
    /// Anonymous and guest identities just clear both sets. Fetch failures
    /// leave the affected set empty and are only logged.
    pub async fn load(&self, identity: Option<&Identity>) {
        self.liked.write().await.clear();
        self.saved.write().await.clear();
        self.load_memberships(identity, self.current_epoch()).await;
    }

    pub(super) async fn load_memberships(&self, identity: Option<&Identity>, epoch: u64) {
        let Some(user) = identity.and_then(Identity::as_user) else {
            return;
        };

        let (liked, saved) = futures::join!(
            self.gateway.fetch_memberships(Membership::Likes, &user.id),
            self.gateway.fetch_memberships(Membership::Saves, &user.id),
        );

        match liked {
            Ok(ids) => self.store_memberships(&self.liked, ids, user, epoch).await,
            Err(e) => tracing::warn!("Error fetching likes for {}: {}", user.id, e),
        }
        match saved {
            Ok(ids) => self.store_memberships(&self.saved, ids, user, epoch).await,
            Err(e) => tracing::warn!("Error fetching saves for {}: {}", user.id, e),
        }
    }

    /// Epoch is checked under the write lock, so a concurrent identity
    /// change clears after this write rather than before it.
    async fn store_memberships(
        &self,
        set: &Arc<RwLock<HashSet<GameId>>>,
        ids: HashSet<GameId>,
        user: &UserProfile,
        epoch: u64,
    ) {
        let mut members = set.write().await;
        if epoch != self.current_epoch() || !self.is_current_user(&user.id) {
            tracing::debug!("Identity changed while loading memberships, discarding");
            return;
        }
        *members = ids;
    }

    /// Flip the current user's like on a game
    pub async fn toggle_like(&self, id: &GameId) {
        let Some(user) = self.writer() else {
            self.notices
                .toast("Please login to like games", NoticeKind::Info);
            return;
        };

        self.toggle_membership(Membership::Likes, &self.liked, &user, id)
            .await;
    }

    /// Flip whether a game is in the current user's saved collection
    pub async fn toggle_save(&self, id: &GameId) {
        let Some(user) = self.writer() else {
            self.notices
                .toast("Please login to save games", NoticeKind::Info);
            return;
        };

        let now_saved = self
            .toggle_membership(Membership::Saves, &self.saved, &user, id)
            .await;
        match now_saved {
            Some(true) => self
                .notices
                .toast("Saved to your collection!", NoticeKind::Success),
            Some(false) => self.notices.toast("Removed from saved", NoticeKind::Info),
            None => {}
        }
    }

    /// Flip membership locally, then mirror it remotely in per-game order.
    ///
    /// Returns the new membership, or `None` if the remote call failed. Once
    /// the last queued flip for the game has answered, memory is reset to
    /// whatever the store ended up holding.
    async fn toggle_membership(
        &self,
        relation: Membership,
        set: &Arc<RwLock<HashSet<GameId>>>,
        user: &UserProfile,
        id: &GameId,
    ) -> Option<bool> {
        let key = format!("{}:{}:{}", relation.table(), user.id, id);
        let was_member = {
            let mut members = set.write().await;
            let was_member = members.contains(id);
            if was_member {
                members.remove(id);
            } else {
                members.insert(id.clone());
            }
            self.membership_writes.begin(&key, was_member);
            was_member
        };

        let _turn = self.locks.lock(id).await;
        let result = if was_member {
            self.gateway.delete_membership(relation, &user.id, id).await
        } else {
            self.gateway.insert_membership(relation, &user.id, id).await
        };

        let accepted = result
            .is_ok()
            .then_some(|settled: &mut bool| *settled = !was_member);
        if let Some(settled) = self.membership_writes.finish(&key, accepted) {
            if self.is_current_user(&user.id) {
                let mut members = set.write().await;
                if settled {
                    members.insert(id.clone());
                } else {
                    members.remove(id);
                }
            }
        }

        match result {
            Ok(()) => Some(!was_member),
            Err(e) => {
                tracing::error!("Error toggling {} for game {}: {}", relation.table(), id, e);
                self.notices.toast(
                    format!("Couldn't update {}: {}", relation.table(), e),
                    NoticeKind::Error,
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::fixture;
    use super::*;
    use crate::gateway::RemoteGateway;

    async fn signed_in() -> super::super::tests::Fixture {
        let f = fixture().await;
        f.session
            .sign_in_with_email("alice@example.com", "secret")
            .await
            .unwrap();
        f
    }

    #[tokio::test]
    async fn test_toggle_like_requires_login() {
        let f = fixture().await;
        let mut notices = f.state.notices().subscribe();

        f.state.toggle_like(&"g1".to_string()).await;

        assert!(!f.state.is_liked("g1").await);
        assert_eq!(f.gateway.call_count().await, 0);
        assert_eq!(
            notices.recv().await.unwrap().message,
            "Please login to like games"
        );
    }

    #[tokio::test]
    async fn test_guest_cannot_like_or_save() {
        let f = fixture().await;
        f.session.enter_as_guest().await;

        f.state.toggle_like(&"g1".to_string()).await;
        f.state.toggle_save(&"g1".to_string()).await;

        assert!(f.state.liked_ids().await.is_empty());
        assert!(f.state.saved_ids().await.is_empty());
        assert_eq!(f.gateway.call_count().await, 0);
    }

    #[tokio::test]
    async fn test_toggle_like_is_an_involution() {
        let f = signed_in().await;
        let id = "g1".to_string();

        f.state.toggle_like(&id).await;
        assert!(f.state.is_liked(&id).await);
        assert!(f.gateway.is_member(Membership::Likes, "u-1", &id).await);

        f.state.toggle_like(&id).await;
        assert!(!f.state.is_liked(&id).await);
        assert!(!f.gateway.is_member(Membership::Likes, "u-1", &id).await);
        assert_eq!(f.gateway.calls().await, vec!["insert_likes:g1", "delete_likes:g1"]);
    }

    #[tokio::test]
    async fn test_like_visible_before_network_resolves() {
        let f = signed_in().await;
        f.gateway.pause();

        let state = f.state.clone();
        let pending = tokio::spawn(async move { state.toggle_like(&"g1".to_string()).await });
        while f.gateway.call_count().await == 0 {
            tokio::task::yield_now().await;
        }

        assert!(f.state.is_liked("g1").await);
        assert!(!f.gateway.is_member(Membership::Likes, "u-1", "g1").await);

        f.gateway.resume();
        pending.await.unwrap();
        assert!(f.gateway.is_member(Membership::Likes, "u-1", "g1").await);
    }

    #[tokio::test]
    async fn test_failed_like_is_reverted() {
        let f = signed_in().await;
        f.gateway.set_failure(Some("network down")).await;
        let mut notices = f.state.notices().subscribe();

        f.state.toggle_like(&"g1".to_string()).await;

        assert!(!f.state.is_liked("g1").await);
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("network down"));
    }

    #[tokio::test]
    async fn test_rapid_toggles_converge() {
        let f = signed_in().await;
        f.gateway.pause();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let state = f.state.clone();
            handles.push(tokio::spawn(async move {
                state.toggle_like(&"g1".to_string()).await
            }));
            tokio::task::yield_now().await;
        }
        while f.gateway.call_count().await == 0 {
            tokio::task::yield_now().await;
        }

        f.gateway.resume();
        for handle in handles {
            handle.await.unwrap();
        }

        // Odd number of flips: liked locally and remotely, in call order
        assert!(f.state.is_liked("g1").await);
        assert!(f.gateway.is_member(Membership::Likes, "u-1", "g1").await);
        assert_eq!(
            f.gateway.calls().await,
            vec!["insert_likes:g1", "delete_likes:g1", "insert_likes:g1"]
        );
    }

    /// Spawn `count` likes on g1 while the gateway is paused, then let them run
    async fn burst_of_likes(f: &super::super::tests::Fixture, count: usize) {
        f.gateway.pause();
        let mut handles = Vec::new();
        for _ in 0..count {
            let state = f.state.clone();
            handles.push(tokio::spawn(async move {
                state.toggle_like(&"g1".to_string()).await
            }));
            tokio::task::yield_now().await;
        }
        while f.gateway.call_count().await == 0 {
            tokio::task::yield_now().await;
        }
        f.gateway.resume();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_failure_early_in_burst_keeps_later_toggles() {
        let f = signed_in().await;
        f.gateway.fail_next("insert_likes:g1", "conflict").await;
        let mut notices = f.state.notices().subscribe();

        burst_of_likes(&f, 3).await;

        // insert failed, delete and insert went through
        assert_eq!(
            f.gateway.calls().await,
            vec!["insert_likes:g1", "delete_likes:g1", "insert_likes:g1"]
        );
        assert!(f.gateway.is_member(Membership::Likes, "u-1", "g1").await);
        assert!(f.state.is_liked("g1").await);
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.kind, NoticeKind::Error);
        assert!(notice.message.contains("conflict"));
    }

    #[tokio::test]
    async fn test_failure_at_end_of_burst_follows_store() {
        let f = signed_in().await;
        f.gateway.fail_next("delete_likes:g1", "timeout").await;

        burst_of_likes(&f, 2).await;

        // insert went through, the unlike did not
        assert!(f.gateway.is_member(Membership::Likes, "u-1", "g1").await);
        assert!(f.state.is_liked("g1").await);
    }

    #[tokio::test]
    async fn test_toggle_save_notices() {
        let f = signed_in().await;
        let mut notices = f.state.notices().subscribe();
        let id = "g1".to_string();

        f.state.toggle_save(&id).await;
        assert!(f.state.is_saved(&id).await);
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.message, "Saved to your collection!");
        assert_eq!(notice.kind, NoticeKind::Success);

        f.state.toggle_save(&id).await;
        assert!(!f.state.is_saved(&id).await);
        let notice = notices.recv().await.unwrap();
        assert_eq!(notice.message, "Removed from saved");
        assert_eq!(notice.kind, NoticeKind::Info);
    }

    #[tokio::test]
    async fn test_load_for_guest_clears_without_calls() {
        let f = signed_in().await;
        f.state.toggle_like(&"g1".to_string()).await;
        f.state.toggle_save(&"g2".to_string()).await;
        let calls_before = f.gateway.call_count().await;

        let guest = f.session.enter_as_guest().await;
        f.state.load(Some(&Identity::Guest(guest))).await;

        assert!(f.state.liked_ids().await.is_empty());
        assert!(f.state.saved_ids().await.is_empty());
        assert_eq!(f.gateway.call_count().await, calls_before);
    }

    #[tokio::test]
    async fn test_load_fetches_both_sets() {
        let f = signed_in().await;
        let user = "u-1".to_string();
        f.gateway
            .insert_membership(Membership::Likes, &user, &"g1".to_string())
            .await
            .unwrap();
        f.gateway
            .insert_membership(Membership::Saves, &user, &"g2".to_string())
            .await
            .unwrap();

        f.state.load(f.session.current().as_ref()).await;

        assert!(f.state.is_liked("g1").await);
        assert!(f.state.is_saved("g2").await);
        assert!(!f.state.is_saved("g1").await);
    }

    #[tokio::test]
    async fn test_load_failure_leaves_sets_empty() {
        let f = signed_in().await;
        f.state.liked.write().await.insert("stale".to_string());
        f.gateway.set_failure(Some("offline")).await;
        let mut notices = f.state.notices().subscribe();

        f.state.load(f.session.current().as_ref()).await;

        assert!(f.state.liked_ids().await.is_empty());
        assert!(notices.try_recv().is_err());
    }
}
