use crate::{
    auth::{
        authorizer::Authorizer,
        bot::{BotKeys, HmacBotVerifier},
        hasher::PasswordHasher,
        service::AuthService,
        token::Tokener,
    },
    cli::commands::{bot, password, telegram, token},
    grpc::{self, server::shutdown_signal, AuthApi},
    store::PgStore,
};
use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use std::{
    net::{Ipv6Addr, SocketAddr},
    sync::Arc,
};
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub db_max_connections: u32,
    pub apply_schema: bool,
    pub token: token::Options,
    pub password: password::Options,
    pub bot: bot::Options,
    pub telegram: telegram::Options,
}

/// Execute the server action.
/// # Errors
/// Returns an error if the configuration is invalid, the database is unreachable, or the server
/// fails to start.
pub async fn execute(args: Args) -> Result<()> {
    let hasher = PasswordHasher::new(args.password.config.clone())
        .context("invalid password hashing configuration")?;
    let tokener = Tokener::new(args.token.config()).context("invalid token configuration")?;

    let keys = BotKeys::parse(args.bot.secrets.expose_secret()).context("invalid --bot-secrets")?;
    if keys.is_empty() {
        warn!("no bot secrets configured, bot-signed calls will be rejected");
    }
    let bots = HmacBotVerifier::new(keys)
        .with_max_age_seconds(args.bot.max_age_seconds)
        .with_max_future_seconds(args.bot.max_future_seconds);

    let store = PgStore::connect(&args.dsn, args.db_max_connections)
        .await
        .context("Failed to connect to database")?;
    if args.apply_schema {
        store
            .apply_schema()
            .await
            .context("Failed to apply database schema")?;
        info!("database schema applied");
    }

    let tokener = Arc::new(tokener);
    let auth = AuthService::new(Arc::new(hasher), tokener.clone(), Arc::new(store))
        .context("Failed to initialize auth service")?
        .with_link_code_ttl_seconds(args.telegram.link_code_ttl_seconds);

    let authorizer = Authorizer::new(grpc::method_table()?, tokener, Arc::new(bots));
    let api = AuthApi::new(Arc::new(authorizer), Arc::new(auth));

    let addr = SocketAddr::from((Ipv6Addr::UNSPECIFIED, args.port));
    grpc::server::serve(addr, api, shutdown_signal()).await
}
