use super::rows::{GameIdRow, GamePatchRow, GameRow, MembershipRow, NewGameRow, PlayRow};
use super::{GatewayError, GatewayResult, Membership, RemoteGateway, SupabaseConfig};
use crate::session::BearerToken;
use crate::types::{Game, GameId, GamePatch, UserId};
use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::time::Duration;

const GAMES_SELECT: &str = "*,profiles(username)";

/// PostgREST gateway for a Supabase project
#[derive(Clone)]
pub struct SupabaseGateway {
    client: Client,
    config: SupabaseConfig,
    bearer: BearerToken,
}

impl SupabaseGateway {
    /// `bearer` is shared with the session so requests carry the user's JWT
    pub fn new(config: SupabaseConfig, bearer: BearerToken) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|source| GatewayError::Request {
                path: config.url.clone(),
                source,
            })?;

        Ok(Self {
            client,
            config,
            bearer,
        })
    }

    async fn request(&self, method: Method, table: &str) -> RequestBuilder {
        // Anonymous requests authenticate with the anon key itself
        let token = self
            .bearer
            .get()
            .await
            .unwrap_or_else(|| self.config.anon_key.clone());

        self.client
            .request(method, self.config.rest_url(table))
            .header("apikey", &self.config.anon_key)
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
    }

    async fn send(&self, builder: RequestBuilder, path: &str) -> GatewayResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|source| GatewayError::Request {
                path: path.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Status {
                path: path.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response)
    }

    async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> GatewayResult<T> {
        response.json::<T>().await.map_err(|e| GatewayError::Decode {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[async_trait]
impl RemoteGateway for SupabaseGateway {
    async fn create_game(&self, row: NewGameRow) -> GatewayResult<Game> {
        let builder = self
            .request(Method::POST, "games")
            .await
            .query(&[("select", GAMES_SELECT)])
            .header("Prefer", "return=representation")
            .header(header::ACCEPT, "application/vnd.pgrst.object+json")
            .json(&row);

        let response = self.send(builder, "games").await?;
        let created: GameRow = Self::decode(response, "games").await?;
        Game::try_from(created)
    }

    async fn fetch_games(&self) -> GatewayResult<Vec<Game>> {
        let builder = self
            .request(Method::GET, "games")
            .await
            .query(&[("select", GAMES_SELECT), ("order", "created_at.desc")]);

        let response = self.send(builder, "games").await?;
        let rows: Vec<serde_json::Value> = Self::decode(response, "games").await?;

        let mut games = Vec::with_capacity(rows.len());
        for value in rows {
            let parsed = serde_json::from_value::<GameRow>(value)
                .map_err(|e| GatewayError::MalformedRow(e.to_string()))
                .and_then(Game::try_from);
            match parsed {
                Ok(game) => games.push(game),
                Err(e) => tracing::warn!("Skipping game row: {}", e),
            }
        }

        tracing::debug!("Fetched {} games", games.len());
        Ok(games)
    }

    async fn update_game(&self, id: &GameId, patch: &GamePatch) -> GatewayResult<()> {
        let builder = self
            .request(Method::PATCH, "games")
            .await
            .query(&[("id", format!("eq.{}", id))])
            .json(&GamePatchRow::from(patch));

        self.send(builder, "games").await?;
        Ok(())
    }

    async fn delete_game(&self, id: &GameId) -> GatewayResult<()> {
        let builder = self
            .request(Method::DELETE, "games")
            .await
            .query(&[("id", format!("eq.{}", id))]);

        self.send(builder, "games").await?;
        Ok(())
    }

    async fn fetch_memberships(
        &self,
        relation: Membership,
        user_id: &UserId,
    ) -> GatewayResult<HashSet<GameId>> {
        let table = relation.table();
        let builder = self
            .request(Method::GET, table)
            .await
            .query(&[
                ("select", "game_id".to_string()),
                ("user_id", format!("eq.{}", user_id)),
            ]);

        let response = self.send(builder, table).await?;
        let rows: Vec<GameIdRow> = Self::decode(response, table).await?;
        Ok(rows.into_iter().map(|row| row.game_id).collect())
    }

    async fn insert_membership(
        &self,
        relation: Membership,
        user_id: &UserId,
        game_id: &GameId,
    ) -> GatewayResult<()> {
        let table = relation.table();
        let builder = self
            .request(Method::POST, table)
            .await
            .header("Prefer", "return=minimal")
            .json(&MembershipRow {
                user_id: user_id.clone(),
                game_id: game_id.clone(),
            });

        self.send(builder, table).await?;
        Ok(())
    }

    async fn delete_membership(
        &self,
        relation: Membership,
        user_id: &UserId,
        game_id: &GameId,
    ) -> GatewayResult<()> {
        let table = relation.table();
        let builder = self.request(Method::DELETE, table).await.query(&[
            ("user_id", format!("eq.{}", user_id)),
            ("game_id", format!("eq.{}", game_id)),
        ]);

        self.send(builder, table).await?;
        Ok(())
    }

    async fn record_play(&self, game_id: &GameId, user_id: Option<&UserId>) -> GatewayResult<()> {
        let builder = self
            .request(Method::POST, "plays")
            .await
            .header("Prefer", "return=minimal")
            .json(&PlayRow {
                game_id: game_id.clone(),
                user_id: user_id.cloned(),
            });

        self.send(builder, "plays").await?;
        Ok(())
    }
}
