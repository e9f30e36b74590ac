use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use kerbpm::{HttpDownloader, RepoDataManager, UpdateResult, User};

/// Progress bar backed [`User`] for long-running store operations
pub struct SpinnerUser {
    spinner: ProgressBar,
}

impl SpinnerUser {
    pub fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.green} {msg}")
                .unwrap()
                .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        SpinnerUser { spinner }
    }

    pub fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl User for SpinnerUser {
    fn raise_message(&self, text: &str) {
        self.spinner.println(text);
    }

    fn raise_progress(&self, text: &str, percent: u8) {
        self.spinner.set_message(format!("[{:>3}%] {}", percent, text));
    }

    fn raise_error(&self, text: &str) {
        self.spinner.println(format!("✗ {}", text));
    }
}

pub fn run(force: bool) -> Result<()> {
    let (config, _instance) = super::load_environment()?;
    let game = super::game_from_config(&config);
    let repos = config.effective_repositories(&game);

    let mut store = RepoDataManager::new(&config.cache_dir())?;
    let user = SpinnerUser::new();
    store.prepopulate(&repos, &user);

    let downloader =
        HttpDownloader::new(&config.network.user_agent)?.with_workers(config.network.workers);

    let result = store.update(
        &repos,
        &game,
        force,
        &downloader,
        &user,
        &config.network.user_agent,
    )?;
    user.finish();

    match result {
        UpdateResult::Updated => {
            let total: usize = repos
                .iter()
                .filter_map(|r| store.index(r))
                .map(|index| index.module_count())
                .sum();
            println!("✓ Repositories updated ({} modules available)", total);
        }
        UpdateResult::NoChanges => {
            println!("✓ Already up to date");
        }
        UpdateResult::OutdatedClient => {
            println!("⚠ Updated, but some metadata needs a newer kerbpm; please upgrade");
        }
    }

    Ok(())
}
