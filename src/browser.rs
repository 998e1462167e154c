// Opening URLs in the user's default browser.

use tracing::warn;

use crate::error::OpenResult;

/// Something that can show a URL to the user.
pub trait Browser {
    fn open(&self, url: &str) -> OpenResult<()>;
}

/// The platform's default browser.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemBrowser;

impl Browser for SystemBrowser {
    fn open(&self, url: &str) -> OpenResult<()> {
        open::that(url)?;
        Ok(())
    }
}

/// Best effort: if the browser can't be launched, print the URL so the user
/// can paste it themselves.
pub fn open_or_print(browser: &dyn Browser, url: &str) {
    if let Err(e) = browser.open(url) {
        warn!(error = %e, "Could not launch browser");
        println!("Please open the following url in your browser: {}", url);
    }
}
