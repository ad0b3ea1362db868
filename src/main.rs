//! Author subscriptions service entry point.
//!
//! Loads configuration, wires adapters into the HTTP API and the expiration
//! sweeper, and runs both until Ctrl-C.

use std::error::Error;
use std::sync::Arc;

use axum::{routing::get, Router};
use http::{header, HeaderValue, Method};
use secrecy::ExposeSecret;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use author_subscriptions::adapters::http::{subscription_router, SubscriptionAppState};
use author_subscriptions::adapters::memory::{
    InMemoryAuthorDirectory, InMemoryDiscountValidator, InMemorySubscriptionStore,
};
use author_subscriptions::adapters::postgres::{
    connect, run_migrations, PostgresAuthorDirectory, PostgresDiscountValidator,
    PostgresSubscriptionStore,
};
use author_subscriptions::adapters::stripe::{
    MockPaymentGateway, StripeConfig, StripePaymentGateway,
};
use author_subscriptions::adapters::{LogEventPublisher, SystemClock};
use author_subscriptions::application::handlers::subscription::ChargePolicy;
use author_subscriptions::application::{ExpirationSweeper, ExpirationSweeperConfig};
use author_subscriptions::config::{
    AppConfig, Environment, LogFormat, PaymentConfig, PaymentProvider, SeedAuthor, StoreBackend,
    ValidationError,
};
use author_subscriptions::domain::foundation::AuthorId;
use author_subscriptions::ports::{
    AuthorDirectory, AuthorPricing, Clock, DiscountValidator, PaymentGateway, SubscriptionStore,
};

type BoxError = Box<dyn Error + Send + Sync>;

struct Storage {
    store: Arc<dyn SubscriptionStore>,
    authors: Arc<dyn AuthorDirectory>,
    discounts: Arc<dyn DiscountValidator>,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load()?;
    config.validate()?;

    init_tracing(&config);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let storage = build_storage(&config, clock.clone()).await?;
    let gateway = build_gateway(&config.payment)?;
    let charge_policy = ChargePolicy::new(
        config.payment.currency.clone(),
        config.payment.charge_timeout(),
    );

    let state = SubscriptionAppState {
        store: storage.store.clone(),
        gateway,
        authors: storage.authors,
        discounts: storage.discounts,
        event_publisher: Arc::new(LogEventPublisher::new()),
        clock: clock.clone(),
        charge_policy,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sweeper_task = if config.sweeper.enabled {
        let sweeper = ExpirationSweeper::new(
            storage.store,
            clock,
            state.auto_renew_handler(),
            state.expire_handler(),
            state.stale_pending_handler(config.payment.pending_timeout()),
            state.reconcile_handler(),
            ExpirationSweeperConfig::from_config(&config.sweeper, &config.payment),
        );
        Some(tokio::spawn(async move { sweeper.run(shutdown_rx).await }))
    } else {
        info!("Expiration sweeper disabled");
        None
    };

    let app = Router::new()
        .route("/health", get(health))
        .nest("/api", subscription_router())
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(TimeoutLayer::new(config.server.request_timeout()))
                .layer(CompressionLayer::new())
                .layer(cors_layer(&config.server.cors_origins_list())),
        )
        .with_state(state);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, environment = ?config.server.environment, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // The sweeper finishes its current batch before returning.
    let _ = shutdown_tx.send(true);
    if let Some(task) = sweeper_task {
        if let Err(e) = task.await {
            warn!(error = %e, "Expiration sweeper task ended abnormally");
        }
    }

    info!("Shutdown complete");
    Ok(())
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    let json = config.server.log_format == LogFormat::Json
        || config.server.environment != Environment::Development;

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn build_storage(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Storage, BoxError> {
    match config.database.backend {
        StoreBackend::Memory => {
            warn!("Using in-memory store; state is lost on restart");
            let authors = seed_authors(&config.database.seed_authors()?)?;
            Ok(Storage {
                store: Arc::new(InMemorySubscriptionStore::new()),
                authors: Arc::new(authors),
                discounts: Arc::new(InMemoryDiscountValidator::new(clock)),
            })
        }
        StoreBackend::Postgres => {
            let pool = connect(&config.database).await?;
            if config.database.run_migrations {
                run_migrations(&pool).await?;
            }
            Ok(Storage {
                store: Arc::new(PostgresSubscriptionStore::new(pool.clone())),
                authors: Arc::new(PostgresAuthorDirectory::new(pool.clone())),
                discounts: Arc::new(PostgresDiscountValidator::new(pool, clock)),
            })
        }
    }
}

fn seed_authors(seeds: &[SeedAuthor]) -> Result<InMemoryAuthorDirectory, BoxError> {
    if seeds.is_empty() {
        warn!("No authors configured for the in-memory store; set DATABASE__MEMORY_AUTHORS");
    }
    let mut directory = InMemoryAuthorDirectory::new();
    for seed in seeds {
        let pricing = AuthorPricing {
            monthly_cents: seed.monthly_cents,
            yearly_cents: seed.yearly_cents,
            lifetime_cents: seed.lifetime_cents,
            trial_days: seed.trial_days,
        };
        directory = directory.with_author(AuthorId::new(seed.author_id.as_str())?, pricing);
        info!(author_id = %seed.author_id, "Seeded in-memory author");
    }
    Ok(directory)
}

fn build_gateway(config: &PaymentConfig) -> Result<Arc<dyn PaymentGateway>, ValidationError> {
    match config.provider {
        PaymentProvider::Mock => {
            warn!("Using mock payment gateway; no real charges are made");
            Ok(Arc::new(MockPaymentGateway::new()))
        }
        PaymentProvider::Stripe => {
            let api_key = config
                .stripe_api_key
                .clone()
                .ok_or(ValidationError::MissingRequired("PAYMENT__STRIPE_API_KEY"))?;
            let webhook_secret = config
                .stripe_webhook_secret
                .clone()
                .ok_or(ValidationError::MissingRequired("PAYMENT__STRIPE_WEBHOOK_SECRET"))?;
            let live = api_key.expose_secret().starts_with("sk_live_");

            let mut stripe = StripeConfig::new(api_key, webhook_secret).with_require_livemode(live);
            if let Some(url) = &config.stripe_api_base_url {
                stripe = stripe.with_base_url(url.clone());
            }
            if let Some(url) = &config.return_url {
                stripe = stripe.with_return_url(url.clone());
            }
            Ok(Arc::new(StripePaymentGateway::new(stripe)))
        }
    }
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();
    if allowed.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(allowed)
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
