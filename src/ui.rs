// UI layer: console messages and the "press enter" pause. The tool is usually
// started from Explorer, so anything the user must read is followed by a
// pause before the console window closes.

use dialoguer::Input;

pub const SETUP_DONE: &str =
    "Setup complete. Use \"Open with\" option on document files to use the program.";
pub const USAGE: &str = "Usage: gdocs-open [FILE]\n\
    Run without arguments to register the file associations, or pass a Word, \
    Excel or PowerPoint file to open it in the browser.";

/// Print a message and wait for Enter.
pub fn notify(message: &str) {
    println!("{}", message);
    pause();
}

/// Report a failed operation and wait for Enter.
pub fn report_error(error: &dyn std::fmt::Display) {
    println!("{}", error);
    pause();
}

/// Block until the user presses Enter. Silently returns when there is no
/// interactive terminal.
pub fn pause() {
    let _ = Input::<String>::new()
        .with_prompt("Press enter to exit.")
        .allow_empty(true)
        .interact_text();
}
