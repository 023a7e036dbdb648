use crate::state::AppState;
use crate::types::Identity;
use tokio::task::JoinHandle;

/// Sync the current identity, then keep memberships and the catalog in step
/// with every later identity change from a background task.
///
/// Each change clears the previous user's memberships as soon as it is seen.
/// The fetches that follow run in their own task, so a newer change never
/// waits behind an older one.
pub async fn start_identity_sync(state: AppState) -> JoinHandle<()> {
    let mut identities = state.session().subscribe();

    let identity = identities.borrow_and_update().clone();
    log_identity(identity.as_ref());
    state.sync_identity(identity).await;

    tokio::spawn(async move {
        while identities.changed().await.is_ok() {
            let identity = identities.borrow_and_update().clone();
            log_identity(identity.as_ref());

            let epoch = state.begin_identity_change().await;
            let state = state.clone();
            tokio::spawn(async move { state.reload(identity, epoch).await });
        }
        tracing::debug!("Session closed, stopping identity sync");
    })
}

fn log_identity(identity: Option<&Identity>) {
    match identity {
        Some(identity) => tracing::info!(
            "Identity is now {} ({}), syncing",
            identity.username(),
            identity.id()
        ),
        None => tracing::info!("No identity, syncing anonymous view"),
    }
}
