use super::AppState;
use crate::types::*;

/// Published games needed per creator level
const GAMES_PER_LEVEL: usize = 5;

impl AppState {
    /// Games shown in the discovery feed. Legacy records without a status
    /// count as published.
    pub async fn published_games(&self) -> Vec<Game> {
        self.games
            .read()
            .await
            .iter()
            .filter(|g| g.is_published())
            .cloned()
            .collect()
    }

    pub async fn draft_games(&self) -> Vec<Game> {
        self.games
            .read()
            .await
            .iter()
            .filter(|g| g.is_draft())
            .cloned()
            .collect()
    }

    /// Profile view of one author's games
    pub async fn creator_profile(&self, author_id: &str) -> CreatorProfile {
        let games = self.games.read().await;
        let (published, drafts): (Vec<Game>, Vec<Game>) = games
            .iter()
            .filter(|g| g.author_id == author_id)
            .cloned()
            .partition(|g| g.is_published());
        drop(games);

        let mut total_likes = 0;
        for game in &published {
            total_likes += self.display_likes(game).await;
        }
        let level = (published.len() / GAMES_PER_LEVEL + 1) as u32;

        CreatorProfile {
            published,
            drafts,
            total_likes,
            level,
        }
    }

    /// Like count as shown to the current user, including their own
    /// not-yet-counted like
    pub async fn display_likes(&self, game: &Game) -> u64 {
        if self.is_liked(&game.id).await {
            game.likes + 1
        } else {
            game.likes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::tests::{fixture, sample_game};
    use super::*;

    #[tokio::test]
    async fn test_feed_filters_split_by_status() {
        let f = fixture().await;
        {
            let mut games = f.state.games.write().await;
            games.push(sample_game("p", "u-1", 3_000, Some(GameStatus::Published)));
            games.push(sample_game("d", "u-1", 2_000, Some(GameStatus::Draft)));
            games.push(sample_game("legacy", "u-2", 1_000, None));
        }

        let published: Vec<_> = f
            .state
            .published_games()
            .await
            .into_iter()
            .map(|g| g.id)
            .collect();
        let drafts: Vec<_> = f
            .state
            .draft_games()
            .await
            .into_iter()
            .map(|g| g.id)
            .collect();

        assert_eq!(published, vec!["p", "legacy"]);
        assert_eq!(drafts, vec!["d"]);
    }

    #[tokio::test]
    async fn test_creator_profile_levels_and_likes() {
        let f = fixture().await;
        {
            let mut games = f.state.games.write().await;
            for i in 0..6 {
                let mut game = sample_game(&format!("p{}", i), "u-1", i, Some(GameStatus::Published));
                game.likes = 2;
                games.push(game);
            }
            let mut draft = sample_game("d", "u-1", 10, Some(GameStatus::Draft));
            draft.likes = 100;
            games.push(draft);
            games.push(sample_game("other", "u-2", 11, None));
        }
        f.session
            .sign_in_with_email("alice@example.com", "secret")
            .await
            .unwrap();
        f.state.liked.write().await.insert("p0".to_string());

        let profile = f.state.creator_profile("u-1").await;

        assert_eq!(profile.published.len(), 6);
        assert_eq!(profile.drafts.len(), 1);
        assert_eq!(profile.total_likes, 13);
        assert_eq!(profile.level, 2);
    }

    #[tokio::test]
    async fn test_display_likes_counts_own_like() {
        let f = fixture().await;
        let mut game = sample_game("g1", "u-2", 1_000, None);
        game.likes = 4;

        f.session
            .sign_in_with_email("alice@example.com", "secret")
            .await
            .unwrap();

        assert_eq!(f.state.display_likes(&game).await, 4);
        f.state.liked.write().await.insert("g1".to_string());
        assert_eq!(f.state.display_likes(&game).await, 5);

        f.session.enter_as_guest().await;
        assert_eq!(f.state.display_likes(&game).await, 4);
    }
}
