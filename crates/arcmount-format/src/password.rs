//! Passphrase input.
//!
//! The passphrase is read from standard input at most once per process, with
//! terminal echo suppressed when standard input is a terminal. An empty line
//! means "no password".

use std::io::{self, BufRead, IsTerminal};

use log::debug;

/// Reads one passphrase from standard input.
///
/// Returns `None` when the line is empty or input is unavailable. The caller
/// is responsible for asking only once.
pub fn read_passphrase_from_stdin() -> Option<String> {
    let mut password = if io::stdin().is_terminal() {
        rpassword::prompt_password("Password > ").unwrap_or_default()
    } else {
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            line.clear();
        }
        line
    };

    while password.ends_with('\n') || password.ends_with('\r') {
        password.pop();
    }

    if password.is_empty() {
        debug!("got an empty password");
        None
    } else {
        debug!("got a password of {} bytes", password.len());
        Some(password)
    }
}
