use anyhow::{anyhow, Result};
use kerbpm::{
    HttpDownloader, ModCache, ModuleKind, RegistryQuerier, RelationshipResolver, Release,
    RepoDataManager, ResolverOptions,
};

use super::update::SpinnerUser;

/// Split `SomeMod=1.2.0` into identifier and optional version
fn parse_request(raw: &str) -> (&str, Option<&str>) {
    match raw.split_once('=') {
        Some((identifier, version)) => (identifier, Some(version)),
        None => (raw, None),
    }
}

pub fn run(
    mods: Vec<String>,
    no_recommends: bool,
    with_suggests: bool,
    dry_run: bool,
) -> Result<()> {
    if mods.is_empty() {
        return Err(anyhow!("nothing to install; name at least one mod"));
    }

    let (config, mut instance) = super::load_environment()?;
    let game = super::game_from_config(&config);
    let repos = config.effective_repositories(&game);

    let mut store = RepoDataManager::new(&config.cache_dir())?;
    let user = SpinnerUser::new();
    store.prepopulate(&repos, &user);
    user.finish();

    let criteria = instance.criteria();
    let tolerance = config.resolver.stability_tolerance;
    let querier = RegistryQuerier::new(
        &store,
        &repos,
        &instance.modules,
        &instance.dlls,
        &instance.dlc,
    );

    // Pin each requested mod to a concrete release first.
    let mut requests: Vec<Release> = Vec::new();
    for raw in &mods {
        let (identifier, version) = parse_request(raw);
        let release = match version {
            Some(version) => {
                let wanted: kerbpm::ModVersion = version.parse()?;
                querier
                    .all_releases(identifier)
                    .into_iter()
                    .find(|r| r.version == wanted)
                    .ok_or_else(|| {
                        anyhow!("no release {} {} in any repository", identifier, version)
                    })?
            }
            None => querier
                .latest_available(identifier, &criteria, tolerance)
                .ok_or_else(|| {
                    anyhow!(
                        "{} has no release compatible with game version {}",
                        identifier,
                        criteria
                    )
                })?,
        };
        requests.push(release.clone());
    }

    let opts = ResolverOptions {
        with_recommends: config.resolver.with_recommends && !no_recommends,
        with_suggests: config.resolver.with_suggests || with_suggests,
        stability_tolerance: tolerance,
        ..ResolverOptions::default()
    };
    let mut resolver = RelationshipResolver::new(&querier, &criteria, opts);
    resolver.resolve(&requests, &[])?;

    let plan: Vec<Release> = resolver
        .mod_list()
        .into_iter()
        .filter(|release| !instance.is_installed(&release.identifier))
        .collect();

    if plan.is_empty() {
        println!("✓ Everything requested is already installed");
        return Ok(());
    }

    println!("The following mods will be installed:");
    for release in &plan {
        let marker = match release.kind {
            ModuleKind::Metapackage => " (metapackage)",
            ModuleKind::Dlc => " (DLC)",
            ModuleKind::Package => "",
        };
        println!("  {}{}", release, marker);
    }
    for (identifier, rec) in resolver.recommendations() {
        println!(
            "  {} {} (recommended by {})",
            identifier,
            rec.module.version,
            rec.sources.join(", ")
        );
    }

    if dry_run {
        println!("\n[dry run] nothing downloaded");
        return Ok(());
    }

    let downloader =
        HttpDownloader::new(&config.network.user_agent)?.with_workers(config.network.workers);
    let cache = ModCache::new(&config.cache_dir().join("archives"))?;
    let user = SpinnerUser::new();
    cache.fetch_all(&plan, &downloader, &user)?;
    user.finish();

    for release in &plan {
        instance.mark_installed(release);
    }
    instance.save(&config.instance_path())?;

    println!("✓ Installed {} mods", plan.len());
    Ok(())
}
