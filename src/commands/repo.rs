use anyhow::{anyhow, Result};
use kerbpm::{NullUser, RepoDataManager, Repository};

pub fn run_list() -> Result<()> {
    let (config, _instance) = super::load_environment()?;
    let game = super::game_from_config(&config);
    let repos = config.effective_repositories(&game);

    println!("Configured repositories:");
    for repo in &repos {
        let mirror = if repo.x_mirror { " (mirror)" } else { "" };
        println!("  {:3}  {}  {}{}", repo.priority, repo.name, repo.uri, mirror);
    }

    // Repositories endorsed by the ones we already fetch.
    let mut store = RepoDataManager::new(&config.cache_dir())?;
    store.prepopulate(&repos, &NullUser);
    let references = store.repository_references();
    if !references.is_empty() {
        println!("\nReferenced by your repositories:");
        for edge in references {
            println!(
                "  {}  {} (via {})",
                edge.repository.name, edge.repository.uri, edge.referrer
            );
        }
    }

    Ok(())
}

pub fn run_add(name: String, uri: String, priority: i32) -> Result<()> {
    let mut config = kerbpm::Config::load()?;
    let uri: url::Url = uri
        .parse()
        .map_err(|e| anyhow!("invalid repository URL: {}", e))?;

    let mut repo = Repository::new(&name, uri);
    repo.priority = priority;
    config.add_repository(repo);
    config.save()?;

    println!("✓ Added repository {}", name);
    Ok(())
}

pub fn run_remove(name: String) -> Result<()> {
    let mut config = kerbpm::Config::load()?;
    if !config.remove_repository(&name) {
        return Err(anyhow!("no configured repository named {}", name));
    }
    config.save()?;
    println!("✓ Removed repository {}", name);
    Ok(())
}
