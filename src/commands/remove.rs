use anyhow::{anyhow, Result};
use kerbpm::{enforce_consistency, Release};

pub fn run(mods: Vec<String>, force: bool) -> Result<()> {
    if mods.is_empty() {
        return Err(anyhow!("nothing to remove; name at least one mod"));
    }

    let (config, mut instance) = super::load_environment()?;

    for identifier in &mods {
        if !instance.is_installed(identifier) {
            return Err(anyhow!("{} is not installed", identifier));
        }
    }

    if !force {
        // The set left behind must still be consistent.
        let remaining: Vec<&Release> = instance
            .modules
            .values()
            .filter(|release| !mods.contains(&release.identifier))
            .collect();
        enforce_consistency(&remaining, &instance.dlls, &instance.dlc)?;
    }

    for identifier in &mods {
        if instance.mark_removed(identifier).is_some() {
            println!("✓ Removed {}", identifier);
        }
    }
    instance.save(&config.instance_path())?;

    Ok(())
}
