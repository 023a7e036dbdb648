use super::AppState;
use crate::gateway::NewGameRow;
use crate::notice::NoticeKind;
use crate::types::*;
use tokio::task::JoinHandle;

impl AppState {
    /// Replace the catalog with the store's full list (newest first)
    pub async fn refresh_catalog(&self) {
        self.fetch_catalog(self.current_epoch()).await;
    }

    pub(super) async fn fetch_catalog(&self, epoch: u64) {
        tracing::info!("Fetching games from remote store...");

        match self.gateway.fetch_games().await {
            Ok(games) => {
                let mut catalog = self.games.write().await;
                if epoch != self.current_epoch() {
                    tracing::debug!("Identity changed during catalog fetch, discarding result");
                    return;
                }
                tracing::info!("Catalog refreshed with {} games", games.len());
                *catalog = games;
            }
            Err(e) => tracing::error!("Error fetching games: {}", e),
        }
    }

    /// Persist a new game and prepend it to the catalog.
    ///
    /// Returns false (with a notice) when nobody is signed in, the actor is
    /// a guest, or the store rejects the insert. The catalog only changes on
    /// success, and then with the store-assigned id.
    pub async fn add_game(&self, game: NewGame) -> bool {
        let user = match self.session.current() {
            None => {
                self.notices
                    .toast("Please login to save your game", NoticeKind::Info);
                return false;
            }
            Some(Identity::Guest(_)) => {
                self.notices.alert(
                    "Guest Account",
                    "Guest accounts cannot save to the cloud. Please create an account via the Login button.",
                    NoticeKind::Warning,
                );
                return false;
            }
            Some(Identity::User(user)) => user,
        };

        tracing::info!("Adding game to remote store: {}", game.title);

        let row = match NewGameRow::build(&game, &user.id, chrono::Utc::now()) {
            Ok(row) => row,
            Err(e) => {
                tracing::error!("Add game error: {}", e);
                self.notices.alert(
                    "Save Failed",
                    format!("Failed to save game: {}", e),
                    NoticeKind::Error,
                );
                return false;
            }
        };

        match self.gateway.create_game(row).await {
            Ok(mut created) => {
                tracing::info!("Game saved successfully with ID: {}", created.id);
                created.author_name = user.username.clone();

                if self.is_current_user(&user.id) {
                    self.games.write().await.insert(0, created);
                } else {
                    // The next catalog refresh picks it up for whoever is signed in
                    tracing::info!("Identity changed while saving, not adding game to catalog");
                }
                true
            }
            Err(e) => {
                tracing::error!("Add game error: {}", e);
                self.notices.alert(
                    "Save Failed",
                    format!("Failed to save game: {}", e),
                    NoticeKind::Error,
                );
                false
            }
        }
    }

    /// Apply a sparse patch locally, then remotely.
    ///
    /// Returns whether the store accepted the patch. Silent no-op (false)
    /// for guests and anonymous users; an empty patch succeeds without a
    /// call. When a patch fails, the game's fields are reset to what the
    /// store holds once every queued patch for it has answered.
    pub async fn update_game(&self, id: &GameId, patch: GamePatch) -> bool {
        if self.writer().is_none() {
            return false;
        }

        let patch = patch.sparse();
        if patch.is_empty() {
            return true;
        }

        let tracked = {
            let mut games = self.games.write().await;
            match games.iter_mut().find(|g| &g.id == id) {
                Some(game) => {
                    self.game_writes.begin(id, game.clone());
                    game.apply(&patch);
                    true
                }
                None => false,
            }
        };

        let _turn = self.locks.lock(id).await;
        let result = self.gateway.update_game(id, &patch).await;

        if tracked {
            let accepted = result
                .is_ok()
                .then_some(|settled: &mut Game| settled.apply(&patch));
            if let Some(settled) = self.game_writes.finish(id, accepted) {
                let mut games = self.games.write().await;
                if let Some(game) = games.iter_mut().find(|g| &g.id == id) {
                    restore_fields(game, &settled);
                }
            }
        }

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Update game error for {}: {}", id, e);
                self.notices
                    .toast(format!("Couldn't update game: {}", e), NoticeKind::Error);
                false
            }
        }
    }

    /// Remove a game locally, then remotely. Restored in place on failure.
    pub async fn delete_game(&self, id: &GameId) {
        if self.writer().is_none() {
            return;
        }

        let removed = {
            let mut games = self.games.write().await;
            games
                .iter()
                .position(|g| &g.id == id)
                .map(|index| (index, games.remove(index)))
        };

        let _turn = self.locks.lock(id).await;
        if let Err(e) = self.gateway.delete_game(id).await {
            tracing::error!("Delete game error for {}: {}", id, e);
            if let Some((index, game)) = removed {
                let mut games = self.games.write().await;
                let index = index.min(games.len());
                games.insert(index, game);
            }
            self.notices
                .toast(format!("Couldn't delete game: {}", e), NoticeKind::Error);
        }
    }

    /// Record a play in the background. Anonymous and guest plays carry no
    /// user. Failures are only logged.
    pub fn record_play(&self, game_id: &GameId) -> JoinHandle<()> {
        let gateway = self.gateway.clone();
        let game_id = game_id.clone();
        let user_id = self.writer().map(|user| user.id);

        tokio::spawn(async move {
            if let Err(e) = gateway.record_play(&game_id, user_id.as_ref()).await {
                tracing::error!("Error recording play for {}: {}", game_id, e);
            }
        })
    }
}

/// Copy the editable fields of `settled` onto `game`
fn restore_fields(game: &mut Game, settled: &Game) {
    game.title = settled.title.clone();
    game.description = settled.description.clone();
    game.code = settled.code.clone();
    game.thumbnail_url = settled.thumbnail_url.clone();
    game.status = settled.status;
}
