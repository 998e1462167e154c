// Library root
// -----------
// Opens Word, Excel and PowerPoint files in Google's web editors. The binary
// (`main.rs`) wires these modules together.
//
// Module responsibilities:
// - `launcher`: the open/upload flow for one file.
// - `cache`: content fingerprints and the append-only fingerprint -> id file.
// - `credential`: the stored bearer token.
// - `callback`: browser authorization through a loopback listener.
// - `api`: the Drive upload client.
// - `shell`: "Open with" registration.
// - `ui`: console messages and pauses.
pub mod api;
pub mod browser;
pub mod cache;
pub mod callback;
pub mod config;
pub mod credential;
pub mod doctype;
pub mod error;
pub mod launcher;
pub mod shell;
pub mod ui;

pub use error::{OpenError, OpenResult};
