// Entrypoint for the CLI application.
// - No arguments: register the file associations.
// - One argument: open that document in the browser, uploading it if needed.

use std::path::Path;

use anyhow::Context;
use gdocs_open::api::DriveClient;
use gdocs_open::browser::SystemBrowser;
use gdocs_open::cache::FileCache;
use gdocs_open::callback::BrowserAuthorizer;
use gdocs_open::config::Config;
use gdocs_open::credential::CredentialStore;
use gdocs_open::launcher::Launcher;
use gdocs_open::{shell, ui};
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => run_setup(),
        [file] => run_open(Path::new(file)),
        _ => ui::notify(ui::USAGE),
    }
}

/// Logs go to stderr so they don't interleave with the prompts on stdout.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("gdocs_open=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run_setup() {
    match shell::setup(shell::platform().as_ref()) {
        Ok(()) => ui::notify(ui::SETUP_DONE),
        Err(e) => ui::report_error(&e),
    }
}

fn run_open(file: &Path) {
    if let Err(e) = open_document(file) {
        ui::report_error(&format!("{e:#}"));
    }
}

fn open_document(file: &Path) -> anyhow::Result<()> {
    let config = Config::from_env();
    let store = DriveClient::new(config.upload_url.clone()).context("Failed to create HTTP client")?;
    let launcher = Launcher::new(
        config.editor_url.clone(),
        FileCache::with_path(config.cache_path()),
        CredentialStore::with_path(config.token_path()),
        Box::new(BrowserAuthorizer::new(config, Box::new(SystemBrowser))),
        Box::new(store),
        Box::new(SystemBrowser),
    );

    launcher.run(file)?;
    Ok(())
}
