pub mod install;
pub mod list;
pub mod remove;
pub mod repo;
pub mod search;
pub mod update;

use anyhow::Result;
use kerbpm::{Config, Game, Instance, KerbalGame};

/// Build the game definition, applying configuration overrides
pub fn game_from_config(config: &Config) -> KerbalGame {
    let defaults = KerbalGame::default();
    let builds_url = if config.game.refresh_builds {
        config
            .game
            .builds_url
            .clone()
            .or_else(|| defaults.builds_url().cloned())
    } else {
        None
    };
    KerbalGame::new(
        defaults.short_name(),
        config
            .game
            .repository_list_url
            .clone()
            .unwrap_or_else(|| defaults.repository_list_url().clone()),
        defaults.default_repository_url().clone(),
        builds_url,
    )
}

/// Load config and the instance state together
pub fn load_environment() -> Result<(Config, Instance)> {
    let config = Config::load()?;
    let instance = Instance::load(&config.instance_path())?;
    Ok((config, instance))
}
