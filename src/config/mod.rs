pub mod schema;

pub use schema::{
    resolve_config_path, BackendConfig, BotConfig, Config, ConsoleConfig, SessionConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(config.backend.api_token.is_none());
        assert!(config.console.page_size > 0);
        assert!(config.sessions.idle_ttl_secs > 0);
    }
}
