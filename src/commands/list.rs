use anyhow::Result;
use kerbpm::{NullUser, RegistryQuerier, RepoDataManager};

pub fn run() -> Result<()> {
    let (config, instance) = super::load_environment()?;
    let game = super::game_from_config(&config);
    let repos = config.effective_repositories(&game);

    let mut store = RepoDataManager::new(&config.cache_dir())?;
    store.prepopulate(&repos, &NullUser);

    if instance.modules.is_empty() {
        println!("No mods installed.");
    } else {
        let querier = RegistryQuerier::new(
            &store,
            &repos,
            &instance.modules,
            &instance.dlls,
            &instance.dlc,
        );
        let criteria = instance.criteria();
        let tolerance = config.resolver.stability_tolerance;

        let mut installed: Vec<_> = instance.modules.values().collect();
        installed.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        for release in installed {
            let latest = querier.latest_available(&release.identifier, &criteria, tolerance);
            let status = match latest {
                Some(newer) if newer.version > release.version => {
                    format!(" (upgrade available: {})", newer.version)
                }
                Some(_) => String::new(),
                None => " (not in any repository)".to_string(),
            };
            let replacement = querier
                .replacement(&release.identifier, &criteria, tolerance)
                .map(|r| format!(" (replaced by {})", r.identifier))
                .unwrap_or_default();
            println!("  {}{}{}", release, status, replacement);
        }
    }

    // Nag when the metadata itself has gone stale.
    let age = store.last_update(&repos);
    if age > kerbpm::store::time_till_very_stale() {
        println!(
            "\n⚠ Repository data is {} days old; run 'kerbpm update'",
            age.num_days()
        );
    } else if age > kerbpm::store::time_till_stale() {
        println!("\nRepository data is {} days old; consider 'kerbpm update'", age.num_days());
    }

    Ok(())
}
