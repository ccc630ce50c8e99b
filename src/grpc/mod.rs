//! gRPC surface of the auth service.

pub mod handlers;
pub mod server;

pub use self::handlers::AuthApi;

use crate::auth::authorizer::{MethodTable, TableError};

#[allow(clippy::all, clippy::pedantic, missing_docs)]
pub mod pb {
    tonic::include_proto!("bottrade.auth.v1");
}

/// Fully qualified method names as they appear on the wire.
pub mod methods {
    pub const REGISTER: &str = "/bottrade.auth.v1.AuthService/Register";
    pub const LOGIN: &str = "/bottrade.auth.v1.AuthService/Login";
    pub const CREATE_TELEGRAM_LINK_CODE: &str =
        "/bottrade.auth.v1.AuthService/CreateTelegramLinkCode";
    pub const LINK_TELEGRAM: &str = "/bottrade.auth.v1.AuthService/LinkTelegram";
    pub const TELEGRAM_AUTH: &str = "/bottrade.auth.v1.AuthService/TelegramAuth";

    /// Every RPC `AuthService` serves.
    pub const ALL: &[&str] = &[
        REGISTER,
        LOGIN,
        CREATE_TELEGRAM_LINK_CODE,
        LINK_TELEGRAM,
        TELEGRAM_AUTH,
    ];

    pub const PUBLIC: &[&str] = &[REGISTER, LOGIN];
    pub const BOT: &[&str] = &[LINK_TELEGRAM, TELEGRAM_AUTH];
}

/// Tier table for `AuthService`.
///
/// # Errors
/// Only fails if the lists above overlap.
pub fn method_table() -> Result<MethodTable, TableError> {
    MethodTable::new(methods::PUBLIC, methods::BOT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::authorizer::Tier;
    use regex::Regex;
    use std::collections::BTreeSet;
    use tonic::server::NamedService;

    const PROTO: &str = include_str!("../../proto/bottrade/auth/v1/auth.proto");

    #[test]
    fn auth_service_tiers() -> Result<(), TableError> {
        let table = method_table()?;
        assert_eq!(table.classify(methods::REGISTER), Tier::Public);
        assert_eq!(table.classify(methods::LOGIN), Tier::Public);
        assert_eq!(table.classify(methods::LINK_TELEGRAM), Tier::Bot);
        assert_eq!(table.classify(methods::TELEGRAM_AUTH), Tier::Bot);
        assert_eq!(table.classify(methods::CREATE_TELEGRAM_LINK_CODE), Tier::User);
        Ok(())
    }

    #[test]
    fn every_declared_rpc_is_listed() -> Result<(), regex::Error> {
        let service = <pb::auth_service_server::AuthServiceServer<AuthApi> as NamedService>::NAME;
        let rpc = Regex::new(r"rpc\s+(\w+)\s*\(")?;
        let declared: BTreeSet<String> = rpc
            .captures_iter(PROTO)
            .map(|caps| format!("/{service}/{}", &caps[1]))
            .collect();
        let listed: BTreeSet<String> = methods::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(declared, listed);
        Ok(())
    }

    #[test]
    fn unlisted_methods_need_a_bearer() -> Result<(), TableError> {
        let table = method_table()?;
        for method in methods::PUBLIC.iter().chain(methods::BOT) {
            assert!(methods::ALL.contains(method), "{method} is not served");
        }
        assert_eq!(
            table.classify("/bottrade.auth.v1.AuthService/DeleteAccount"),
            Tier::User
        );
        Ok(())
    }
}
