// Operating system "Open with" integration.
//
// On Windows the executable is registered as an application able to open
// the supported Office extensions and added to each extension's
// `OpenWithList`. Registry writes go through `reg.exe`. Other platforms get a
// stub that reports setup as unsupported.

use std::path::Path;
use std::process::Command;

use tracing::{debug, info};

use crate::doctype::SUPPORTED_EXTENSIONS;
use crate::error::{OpenError, OpenResult};

/// Shell capabilities needed by setup.
pub trait ShellIntegration {
    /// Whether the process may write machine-wide registration.
    fn is_elevated(&self) -> bool;

    /// Register `exe` as a handler for `extensions`.
    fn register_file_handler(&self, exe: &Path, extensions: &[&str]) -> OpenResult<()>;
}

/// Integration for the current platform.
pub fn platform() -> Box<dyn ShellIntegration> {
    if cfg!(windows) {
        Box::new(RegistryShell)
    } else {
        Box::new(UnsupportedShell)
    }
}

/// Register the running executable for all supported extensions.
pub fn setup(shell: &dyn ShellIntegration) -> OpenResult<()> {
    if !shell.is_elevated() {
        return Err(OpenError::NotElevated);
    }
    let exe = std::env::current_exe()?;
    shell.register_file_handler(&exe, &SUPPORTED_EXTENSIONS)?;
    info!(exe = ?exe, "Registered file associations");
    Ok(())
}

/// Platforms without shell integration.
#[derive(Debug, Default)]
pub struct UnsupportedShell;

impl ShellIntegration for UnsupportedShell {
    fn is_elevated(&self) -> bool {
        true
    }

    fn register_file_handler(&self, _exe: &Path, _extensions: &[&str]) -> OpenResult<()> {
        Err(OpenError::Setup("setup is only supported on Windows".into()))
    }
}

/// Windows registry integration.
#[derive(Debug, Default)]
pub struct RegistryShell;

impl ShellIntegration for RegistryShell {
    /// Raw disk access is only granted to elevated processes.
    fn is_elevated(&self) -> bool {
        std::fs::File::open(r"\\.\PHYSICALDRIVE0").is_ok()
    }

    fn register_file_handler(&self, exe: &Path, extensions: &[&str]) -> OpenResult<()> {
        let exe_name = exe
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| OpenError::Setup(format!("unusable executable path {exe:?}")))?;
        let app_key = format!(r"HKCR\Applications\{exe_name}");

        let command = format!("\"{}\" \"%1\"", exe.display());
        reg(&["add", &format!(r"{app_key}\shell\open\command"), "/ve", "/d", &command, "/f"])?;

        let types_key = format!(r"{app_key}\SupportedTypes");
        for &ext in extensions {
            reg(&["add", &types_key, "/v", ext, "/d", "", "/f"])?;
        }

        for &ext in extensions {
            add_to_open_with(ext, exe_name)?;
        }
        Ok(())
    }
}

fn open_with_key(ext: &str) -> String {
    format!(r"HKCU\Software\Microsoft\Windows\CurrentVersion\Explorer\FileExts\{ext}\OpenWithList")
}

fn add_to_open_with(ext: &str, exe_name: &str) -> OpenResult<()> {
    let key = open_with_key(ext);
    // A missing key just means an empty list.
    let values = match reg(&["query", &key]) {
        Ok(output) => parse_reg_query(&output),
        Err(_) => Vec::new(),
    };

    match next_open_with_slot(&values, exe_name) {
        Some((slot, mru)) => {
            reg(&["add", &key, "/v", &slot.to_string(), "/d", exe_name, "/f"])?;
            reg(&["add", &key, "/v", "MRUList", "/d", &mru, "/f"])?;
            debug!(ext = %ext, slot = %slot, "Added to OpenWithList");
        }
        None => debug!(ext = %ext, "Already in OpenWithList"),
    }
    Ok(())
}

fn reg(args: &[&str]) -> OpenResult<String> {
    let output = Command::new("reg").args(args).output()?;
    if !output.status.success() {
        return Err(OpenError::Setup(format!(
            "reg {} failed: {}",
            args.first().copied().unwrap_or_default(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse `reg query` output into `(name, data)` pairs.
///
/// Value lines look like `    a    REG_SZ    WINWORD.EXE`.
fn parse_reg_query(output: &str) -> Vec<(String, String)> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (name, rest) = line.split_once("    ")?;
            let rest = rest.trim_start();
            let (kind, data) = rest.split_once("    ").unwrap_or((rest, ""));
            kind.starts_with("REG_")
                .then(|| (name.to_string(), data.trim().to_string()))
        })
        .collect()
}

/// Pick the MRU letter for `exe_name`: one past the highest letter in
/// `MRUList`. `None` when the executable is already listed.
fn next_open_with_slot(values: &[(String, String)], exe_name: &str) -> Option<(char, String)> {
    let lookup = |name: &str| {
        values
            .iter()
            .find(|(n, _)| n.as_str() == name)
            .map(|(_, d)| d.as_str())
    };
    let mru = lookup("MRUList").unwrap_or("");

    let mut highest = None;
    for slot in mru.chars() {
        if lookup(&slot.to_string()).map_or(false, |p| p.eq_ignore_ascii_case(exe_name)) {
            return None;
        }
        highest = highest.max(Some(slot));
    }

    let next = match highest {
        Some(c) => char::from_u32(c as u32 + 1)?,
        None => 'a',
    };
    Some((next, format!("{mru}{next}")))
}
