use axum::{extract::Query, routing::get, Router};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, oneshot};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use playfeed::{
    creator::{resolve_style, Creator, CreatorDraft},
    gateway::{GatewayError, MemoryGateway, RemoteGateway, SupabaseConfig, SupabaseGateway},
    llm::{GenerationError, GenerationRequest, LlmConfig},
    notice::{Notice, Notices},
    session::{AuthBackend, AuthError, SessionFile, SessionIdentity, StaticAuth, SupabaseAuth},
    state::AppState,
    sync,
    types::{GameStatus, Identity},
};

const USAGE: &str = "usage: playfeed <command>

commands:
  feed                              list published games
  drafts                            list your drafts and creator level
  generate <prompt> [--style S] [--custom-style S] [--difficulty D]
           [--title T] [--out FILE] [--draft | --publish]
  edit <id> [--code FILE] [--title T] [--draft | --publish]
  idea                              suggest a game idea
  play <id> [--out FILE]            record a play and export the game
  like <id> | save <id> | delete <id>
  login <email> <password>
  register <email> <password> <username>
  login-google
  logout";

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Failed(String),
}

#[derive(Debug)]
enum Command {
    Feed,
    Drafts,
    Generate {
        request: GenerationRequest,
        title: Option<String>,
        out: Option<PathBuf>,
        save_as: Option<GameStatus>,
    },
    Edit {
        id: String,
        code: Option<PathBuf>,
        title: Option<String>,
        status: GameStatus,
    },
    Idea,
    Play {
        id: String,
        out: Option<PathBuf>,
    },
    Like(String),
    Save(String),
    Delete(String),
    Login {
        email: String,
        password: String,
    },
    Register {
        email: String,
        password: String,
        username: String,
    },
    LoginGoogle,
    Logout,
}

/// Positional arguments plus `--flag value` / `--switch` options
struct Args {
    positional: Vec<String>,
    options: HashMap<String, Option<String>>,
}

impl Args {
    const SWITCHES: [&'static str; 2] = ["draft", "publish"];

    fn parse(raw: &[String]) -> Result<Self, CliError> {
        let mut positional = Vec::new();
        let mut options = HashMap::new();
        let mut iter = raw.iter();

        while let Some(arg) = iter.next() {
            match arg.strip_prefix("--") {
                Some(name) if Self::SWITCHES.contains(&name) => {
                    options.insert(name.to_string(), None);
                }
                Some(name) => {
                    let value = iter
                        .next()
                        .ok_or_else(|| CliError::Usage(format!("--{} needs a value", name)))?;
                    options.insert(name.to_string(), Some(value.clone()));
                }
                None => positional.push(arg.clone()),
            }
        }
        Ok(Self {
            positional,
            options,
        })
    }

    fn value(&self, name: &str) -> Option<String> {
        self.options.get(name).cloned().flatten()
    }

    fn status(&self) -> Option<GameStatus> {
        if self.options.contains_key("publish") {
            Some(GameStatus::Published)
        } else if self.options.contains_key("draft") {
            Some(GameStatus::Draft)
        } else {
            None
        }
    }

    fn required(&self, index: usize, what: &str) -> Result<String, CliError> {
        self.positional
            .get(index)
            .cloned()
            .ok_or_else(|| CliError::Usage(format!("missing {}", what)))
    }
}

impl Command {
    fn parse(raw: &[String]) -> Result<Self, CliError> {
        let (name, rest) = raw
            .split_first()
            .ok_or_else(|| CliError::Usage("no command given".to_string()))?;
        let args = Args::parse(rest)?;

        let command = match name.as_str() {
            "feed" => Command::Feed,
            "drafts" => Command::Drafts,
            "generate" => {
                let prompt = args.positional.join(" ");
                let mut request = GenerationRequest::new(prompt);
                if let Some(style) = args.value("style") {
                    request = request.with_style(resolve_style(
                        &style,
                        args.value("custom-style").as_deref(),
                    ));
                }
                if let Some(difficulty) = args.value("difficulty") {
                    request = request.with_difficulty(difficulty);
                }
                Command::Generate {
                    request,
                    title: args.value("title"),
                    out: args.value("out").map(PathBuf::from),
                    save_as: args.status(),
                }
            }
            "edit" => Command::Edit {
                id: args.required(0, "game id")?,
                code: args.value("code").map(PathBuf::from),
                title: args.value("title"),
                status: args.status().unwrap_or(GameStatus::Draft),
            },
            "idea" => Command::Idea,
            "play" => Command::Play {
                id: args.required(0, "game id")?,
                out: args.value("out").map(PathBuf::from),
            },
            "like" => Command::Like(args.required(0, "game id")?),
            "save" => Command::Save(args.required(0, "game id")?),
            "delete" => Command::Delete(args.required(0, "game id")?),
            "login" => Command::Login {
                email: args.required(0, "email")?,
                password: args.required(1, "password")?,
            },
            "register" => Command::Register {
                email: args.required(0, "email")?,
                password: args.required(1, "password")?,
                username: args.required(2, "username")?,
            },
            "login-google" => Command::LoginGoogle,
            "logout" => Command::Logout,
            other => return Err(CliError::Usage(format!("unknown command `{}`", other))),
        };
        Ok(command)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        // Not an error if .env doesn't exist, only log if it's a different issue
        if !matches!(e, dotenvy::Error::Io(_)) {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "playfeed=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let raw: Vec<String> = std::env::args().skip(1).collect();
    let command = match Command::parse(&raw) {
        Ok(command) => command,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            return ExitCode::from(2);
        }
    };

    let notices = Notices::new();
    let mut notice_rx = notices.subscribe();

    let result = run(command, notices).await;
    while let Ok(notice) = notice_rx.try_recv() {
        print_notice(&notice);
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn print_notice(notice: &Notice) {
    let kind = format!("{:?}", notice.kind).to_lowercase();
    match &notice.title {
        Some(title) => println!("[{}] {}: {}", kind, title, notice.message),
        None => println!("[{}] {}", kind, notice.message),
    }
}

/// Wire the session, gateway and state from the environment
async fn connect(notices: Notices) -> Result<AppState, CliError> {
    let session_file = SessionFile::from_env();

    let supabase = match SupabaseConfig::from_env() {
        Ok(config) => {
            tracing::info!("Using Supabase project at {}", config.url);
            Some(config)
        }
        Err(e) => {
            tracing::warn!("{}. Using the in-memory store; nothing will persist.", e);
            None
        }
    };

    let backend: Arc<dyn AuthBackend> = match &supabase {
        Some(config) => Arc::new(SupabaseAuth::new(config.clone())?),
        None => Arc::new(StaticAuth::new()),
    };

    let mut session = SessionIdentity::new(backend);
    if let Some(file) = session_file {
        session = session.with_session_file(file);
    }
    let session = Arc::new(session);

    let gateway: Arc<dyn RemoteGateway> = match supabase {
        Some(config) => Arc::new(SupabaseGateway::new(config, session.bearer())?),
        None => Arc::new(MemoryGateway::new()),
    };

    if let Some(user) = session.restore().await {
        tracing::info!("Resumed session for {}", user.username);
    }

    Ok(AppState::new(session, gateway, notices))
}

async fn run(command: Command, notices: Notices) -> Result<(), CliError> {
    let state = connect(notices).await?;
    let session = state.session().clone();
    let _sync = sync::start_identity_sync(state.clone()).await;

    match command {
        Command::Feed => {
            let games = state.published_games().await;
            if games.is_empty() {
                println!("No games yet.");
            }
            for game in games {
                let liked = if state.is_liked(&game.id).await { "*" } else { " " };
                println!(
                    "{} {}  {}  by {}  ({} likes)",
                    liked,
                    game.id,
                    game.title,
                    game.author_name,
                    state.display_likes(&game).await
                );
            }
        }
        Command::Drafts => {
            let user = signed_in_user(&session)?;
            let profile = state.creator_profile(&user).await;
            println!(
                "Level {} creator: {} published, {} total likes",
                profile.level,
                profile.published.len(),
                profile.total_likes
            );
            for game in profile.drafts {
                println!("  {}  {}", game.id, game.title);
            }
        }
        Command::Generate {
            request,
            title,
            out,
            save_as,
        } => {
            let creator = creator_for(&state);
            let code = creator.generate(&request).await?;

            match &out {
                Some(path) => {
                    tokio::fs::write(path, &code).await?;
                    println!("Wrote {} chars to {}", code.len(), path.display());
                }
                None if save_as.is_none() => println!("{}", code),
                None => {}
            }

            if let Some(status) = save_as {
                let mut draft = CreatorDraft::new(request.prompt.clone(), code);
                draft.title = title;
                if !creator.save(&draft, status).await {
                    return Err(CliError::Failed("game was not saved".to_string()));
                }
            }
        }
        Command::Edit {
            id,
            code,
            title,
            status,
        } => {
            signed_in_user(&session)?;
            let game = state
                .get_game(&id)
                .await
                .ok_or_else(|| CliError::Failed(format!("no game with id {}", id)))?;

            let mut draft = CreatorDraft::editing(&game);
            if let Some(path) = code {
                draft.code = tokio::fs::read_to_string(path).await?;
            }
            if title.is_some() {
                draft.title = title;
            }
            if !creator_for(&state).save(&draft, status).await {
                return Err(CliError::Failed(format!("game {} was not updated", id)));
            }
        }
        Command::Idea => println!("{}", creator_for(&state).random_idea().await),
        Command::Play { id, out } => {
            let game = state
                .get_game(&id)
                .await
                .ok_or_else(|| CliError::Failed(format!("no game with id {}", id)))?;
            let path = out.unwrap_or_else(|| PathBuf::from(format!("{}.html", game.id)));
            tokio::fs::write(&path, &game.code).await?;
            println!("Open {} to play {}", path.display(), game.title);

            if let Err(e) = state.record_play(&game.id).await {
                tracing::warn!("Play recording task failed: {}", e);
            }
        }
        Command::Like(id) => state.toggle_like(&id).await,
        Command::Save(id) => state.toggle_save(&id).await,
        Command::Delete(id) => state.delete_game(&id).await,
        Command::Login { email, password } => {
            let user = session.sign_in_with_email(&email, &password).await?;
            println!("Signed in as {}", user.username);
        }
        Command::Register {
            email,
            password,
            username,
        } => match session.register_with_email(&email, &password, &username).await? {
            Some(user) => println!("Welcome, {}!", user.username),
            None => println!("Check your inbox to confirm {} before signing in.", email),
        },
        Command::LoginGoogle => {
            let user = login_with_google(&session).await?;
            println!("Signed in as {}", user.username);
        }
        Command::Logout => {
            session.sign_out().await;
            println!("Signed out");
        }
    }

    Ok(())
}

fn creator_for(state: &AppState) -> Creator {
    let config = LlmConfig::from_env();
    if !config.is_configured() {
        tracing::warn!("No generation API key configured");
    }
    Creator::new(config.build_provider(), state.clone())
}

fn signed_in_user(session: &SessionIdentity) -> Result<String, CliError> {
    match session.current() {
        Some(Identity::User(user)) => Ok(user.id),
        _ => Err(CliError::Failed(
            "sign in first with `playfeed login`".to_string(),
        )),
    }
}

/// Federated sign-in through a one-shot loopback callback server
async fn login_with_google(
    session: &SessionIdentity,
) -> Result<playfeed::types::UserProfile, CliError> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let redirect_to = format!("http://{}/callback", addr);

    let started = session.begin_federated_sign_in("google", &redirect_to)?;
    println!("Open this URL to continue signing in:\n\n  {}\n", started.url);

    let (code_tx, code_rx) = oneshot::channel::<String>();
    let code_tx = Arc::new(Mutex::new(Some(code_tx)));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let mut shutdown_rx = shutdown_tx.subscribe();

    let app = Router::new()
        .route(
            "/callback",
            get(move |Query(params): Query<HashMap<String, String>>| {
                let code_tx = code_tx.clone();
                async move {
                    let Some(code) = params.get("code") else {
                        return "Sign-in failed: no code in callback. You can close this tab.";
                    };
                    if let Some(tx) = code_tx.lock().unwrap_or_else(|e| e.into_inner()).take() {
                        let _ = tx.send(code.clone());
                    }
                    "Signed in. You can close this tab."
                }
            }),
        )
        .layer(TraceLayer::new_for_http());

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
    });

    let code = code_rx
        .await
        .map_err(|_| CliError::Failed("callback server stopped".to_string()))?;
    let _ = shutdown_tx.send(());
    if let Ok(Err(e)) = server.await {
        tracing::warn!("Callback server error: {}", e);
    }

    Ok(session
        .complete_federated_sign_in(&code, &started.verifier)
        .await?)
}
