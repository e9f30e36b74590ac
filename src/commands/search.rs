use anyhow::Result;
use kerbpm::{NullUser, RepoDataManager};

pub fn run(query: String) -> Result<()> {
    let (config, instance) = super::load_environment()?;
    let game = super::game_from_config(&config);
    let repos = config.effective_repositories(&game);

    let mut store = RepoDataManager::new(&config.cache_dir())?;
    store.prepopulate(&repos, &NullUser);

    let needle = query.to_lowercase();
    let mut hits = 0;
    for identifier in store.all_identifiers(&repos) {
        let releases = store.available_modules(&repos, &identifier);
        let Some(latest) = releases.first() else {
            continue;
        };
        let matches = identifier.to_lowercase().contains(&needle)
            || latest.name.to_lowercase().contains(&needle);
        if !matches {
            continue;
        }
        hits += 1;
        let installed = if instance.is_installed(&identifier) {
            " [installed]"
        } else {
            ""
        };
        let blurb = if latest.blurb.is_empty() {
            String::new()
        } else {
            format!(" - {}", latest.blurb)
        };
        println!("  {} {}{}{}", identifier, latest.version, installed, blurb);
    }

    if hits == 0 {
        println!("No modules match '{}'. Try 'kerbpm update' first.", query);
    }
    Ok(())
}
