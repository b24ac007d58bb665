use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tokio::task::JoinHandle;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use waypoint_auth::client::{
    HttpTokenEndpoint, IssuerTokenEndpoint, Registration, RoutingTokenEndpoint, TokenEndpoint,
};
use waypoint_auth::http::{IssuerState, issuer_router, login_router};
use waypoint_auth::policy::{PolicyRule, Requirement};
use waypoint_auth::storage::{
    InMemoryAuthorizationStorage, InMemoryClientStorage, InMemoryConsentStorage,
    InMemoryPrincipalStorage,
};
use waypoint_auth::token::SigningAlgorithm;
use waypoint_auth::{
    AuthState, AuthorizedClient, ClientTokenManager, KeyRing, LoginBridge, Mechanism,
    PolicyEngine, SecurityChain, SecurityChains, SessionStore, TokenIssuer, TokenValidator,
    enforce,
};

use crate::bootstrap;
use crate::config::AppConfig;
use crate::handlers::{self, DomainState};
use crate::middleware as app_middleware;

/// Registration used by the browser routes to call the backend.
pub const BACKEND_REGISTRATION: &str = "backend";

const HOUSEKEEPING_INTERVAL: Duration = Duration::from_secs(60);

/// Everything the routes share, created once per server.
pub struct Services {
    pub keys: Option<Arc<KeyRing>>,
    pub issuer: Option<IssuerState>,
    pub authorizations: Arc<InMemoryAuthorizationStorage>,
    pub validator: Arc<TokenValidator>,
    pub clients: Arc<ClientTokenManager>,
    pub sessions: Arc<SessionStore>,
    pub login: Option<Arc<LoginBridge>>,
    pub chains: Arc<SecurityChains>,
    pub domain: DomainState,
}

impl Services {
    pub async fn build(cfg: &AppConfig) -> anyhow::Result<Self> {
        let auth = &cfg.auth;
        let token_uri = auth.token_endpoint();
        let http_client = reqwest::Client::builder()
            .timeout(auth.client.request_timeout)
            .build()
            .context("building HTTP client")?;
        let http_endpoint = HttpTokenEndpoint::new(http_client.clone());
        let authorizations = Arc::new(InMemoryAuthorizationStorage::new());

        let (keys, issuer, endpoint): (_, _, Arc<dyn TokenEndpoint>) = if auth.authorization_server {
            let algorithm = SigningAlgorithm::parse(&auth.signing.algorithm)
                .with_context(|| format!("unsupported signing algorithm {}", auth.signing.algorithm))?;
            let keys = Arc::new(
                KeyRing::generate(algorithm, auth.signing.retired_key_retention)
                    .context("generating signing key")?,
            );

            let client_store = Arc::new(InMemoryClientStorage::new());
            let principal_store = Arc::new(InMemoryPrincipalStorage::new());
            bootstrap::seed(
                &cfg.bootstrap,
                &auth.tokens,
                client_store.as_ref(),
                principal_store.as_ref(),
            )
            .await?;

            let token_issuer = Arc::new(TokenIssuer::new(
                auth.issuer_url(),
                keys.clone(),
                client_store.clone(),
                principal_store,
                authorizations.clone(),
            ));
            let endpoint = RoutingTokenEndpoint::new(
                token_uri.clone(),
                IssuerTokenEndpoint::new(token_issuer.clone()),
                http_endpoint,
            );
            let state = IssuerState::new(
                token_issuer,
                client_store,
                Arc::new(InMemoryConsentStorage::new()),
                Arc::new(auth.clone()),
            );
            (Some(keys), Some(state), Arc::new(endpoint) as Arc<dyn TokenEndpoint>)
        } else {
            (None, None, Arc::new(http_endpoint) as Arc<dyn TokenEndpoint>)
        };

        let validator = Arc::new(TokenValidator::from_config(auth, keys.clone())?);
        let sessions = Arc::new(SessionStore::new());

        let mut manager = ClientTokenManager::new(endpoint.clone(), &auth.client, &token_uri);
        if auth.login.enabled {
            manager = manager.with_registration(Registration::from_login(&auth.login, &token_uri));
        }
        let clients = Arc::new(manager);

        let login = auth.login.enabled.then(|| {
            Arc::new(
                LoginBridge::new(auth, endpoint.clone(), validator.clone(), sessions.clone())
                    .with_client_manager(clients.clone()),
            )
        });

        let backend = auth
            .client
            .registrations
            .get(BACKEND_REGISTRATION)
            .and_then(|registration| registration.base_url.clone())
            .map(|base_url| {
                AuthorizedClient::new(http_client, clients.clone(), BACKEND_REGISTRATION, base_url)
            });

        Ok(Self {
            keys,
            issuer,
            authorizations,
            validator,
            clients,
            sessions,
            chains: Arc::new(security_chains(cfg)?),
            login,
            domain: DomainState { backend },
        })
    }

    fn auth_state(&self, cfg: &AppConfig) -> AuthState {
        let state = AuthState::new(self.validator.clone(), self.chains.clone());
        match &self.login {
            Some(_) => state.with_sessions(
                self.sessions.clone(),
                cfg.auth.login.session_cookie_name.clone(),
                cfg.auth.login.login_path(),
            ),
            None => state,
        }
    }

    /// Starts key rotation and expiry sweeps.
    pub fn spawn_background_tasks(&self, cfg: &AppConfig) -> Vec<JoinHandle<()>> {
        let mut tasks = Vec::new();
        if let (Some(keys), Some(interval)) = (&self.keys, cfg.auth.signing.rotation_interval) {
            tasks.push(keys.clone().spawn_rotation(interval));
        }

        let sessions = self.sessions.clone();
        let authorizations = self.authorizations.clone();
        let pending = self.issuer.as_ref().map(|issuer| issuer.pending.clone());
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HOUSEKEEPING_INTERVAL);
            loop {
                ticker.tick().await;
                let sessions = sessions.purge_expired();
                let authorizations = authorizations.purge_expired(time::OffsetDateTime::now_utc());
                let pending = pending.as_ref().map_or(0, |p| p.purge_expired());
                if sessions + authorizations + pending > 0 {
                    tracing::debug!(sessions, authorizations, pending, "Purged expired entries");
                }
            }
        }));
        tasks
    }
}

/// Security chains, first match wins:
///
/// | chain     | paths                                   | mechanism |
/// |-----------|-----------------------------------------|-----------|
/// | public    | `/oauth2/**`, `/.well-known/**`, `/login/**`, `/logout` | none |
/// | browser   | `/api/**` (login enabled only)          | session   |
/// | resource  | everything else                         | bearer    |
pub fn security_chains(cfg: &AppConfig) -> anyhow::Result<SecurityChains> {
    let public = Arc::new(PolicyEngine::permit_all());
    let mut chains = SecurityChains::new();
    for (name, pattern) in [
        ("issuer", "/oauth2/**"),
        ("discovery", "/.well-known/**"),
        ("login", "/login/**"),
        ("logout", "/logout"),
    ] {
        chains = chains.with(SecurityChain::new(name, pattern, Mechanism::None, public.clone())?);
    }

    if cfg.auth.login.enabled {
        let browser = PolicyEngine::new(vec![PolicyRule::new(
            &["GET"],
            "/api/auth/**",
            Requirement::PermitAll,
        )])?;
        chains = chains.with(SecurityChain::new(
            "browser",
            "/api/**",
            Mechanism::Session,
            Arc::new(browser),
        )?);
    }

    chains = chains.with(SecurityChain::new(
        "resource",
        "/**",
        Mechanism::Bearer,
        Arc::new(PolicyEngine::new(cfg.auth.policy.rules.clone())?),
    )?);
    Ok(chains)
}

pub fn build_app(cfg: &AppConfig, services: &Services) -> Router {
    let body_limit = cfg.server.body_limit_bytes;

    let domain = Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .route("/customers", get(handlers::list_customers))
        .route("/customers/{id}", get(handlers::read_customer))
        .route("/bookings", post(handlers::create_booking))
        .route(
            "/bookings/{id}",
            get(handlers::read_booking)
                .put(handlers::update_booking)
                .delete(handlers::cancel_booking),
        )
        .route("/api/customers", get(handlers::browser_customers))
        .with_state(services.domain.clone());

    let mut app = domain;
    if let Some(issuer) = &services.issuer {
        app = app.merge(issuer_router(issuer.clone()));
    }
    if let Some(login) = &services.login {
        app = app.merge(login_router(login.clone()));
    }

    app
        // Middleware stack (order: enforcement -> request id -> compression/cors/trace -> body limit)
        .layer(middleware::from_fn_with_state(
            services.auth_state(cfg),
            enforce,
        ))
        .layer(middleware::from_fn(app_middleware::request_id))
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    use tracing::field::Empty;
                    let req_id = req
                        .extensions()
                        .get::<axum::http::HeaderValue>()
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("")
                        .to_string();
                    tracing::info_span!(
                        "http.request",
                        http.method = %req.method(),
                        http.target = %req.uri().path(),
                        http.status_code = Empty,
                        request_id = %req_id
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>, latency: Duration, span: &tracing::Span| {
                        span.record("http.status_code", res.status().as_u16());
                        tracing::info!(
                            http.status = %res.status().as_u16(),
                            elapsed_ms = %latency.as_millis(),
                            "request handled"
                        );
                    },
                ),
        )
        .layer(axum::extract::DefaultBodyLimit::max(body_limit))
}

pub struct ServerBuilder {
    addr: SocketAddr,
    config: AppConfig,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerBuilder {
    pub fn new() -> Self {
        let cfg = AppConfig::default();
        Self {
            addr: cfg.addr(),
            config: cfg,
        }
    }

    pub fn with_config(mut self, cfg: AppConfig) -> Self {
        self.addr = cfg.addr();
        self.config = cfg;
        self
    }

    pub async fn build(self) -> anyhow::Result<WaypointServer> {
        let services = Services::build(&self.config).await?;
        let app = build_app(&self.config, &services);
        Ok(WaypointServer {
            addr: self.addr,
            app,
            services,
            config: self.config,
        })
    }
}

pub struct WaypointServer {
    addr: SocketAddr,
    app: Router,
    services: Services,
    config: AppConfig,
}

impl WaypointServer {
    /// The assembled router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.app.clone()
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let tasks = self.services.spawn_background_tasks(&self.config);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(
            addr = %self.addr,
            issuer = %self.config.auth.issuer_url(),
            authorization_server = self.config.auth.authorization_server,
            login = self.config.auth.login.enabled,
            "listening"
        );

        let grace = Duration::from_secs(self.config.server.shutdown_grace_secs);
        let (drained_tx, drained_rx) = tokio::sync::oneshot::channel::<()>();
        let app = self.app;
        let serve = async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    shutdown_signal().await;
                    let _ = drained_tx.send(());
                })
                .await
        };

        tokio::select! {
            result = serve => result?,
            () = async {
                let _ = drained_rx.await;
                tokio::time::sleep(grace).await;
            } => tracing::warn!(grace_secs = grace.as_secs(), "in-flight requests did not finish in time"),
        }

        for task in tasks {
            task.abort();
        }
        self.services.clients.shutdown();
        tracing::info!("server stopped");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
