use std::io::{self, BufRead, IsTerminal};
use std::thread;

use facegate_core::CancelToken;
use tracing::{debug, info};

/// Returns a token that is cancelled when the operator types `q` on an
/// interactive terminal. Non-interactive stdin never cancels.
pub fn quit_on_keypress() -> CancelToken {
    let cancel = CancelToken::new();
    if !io::stdin().is_terminal() {
        debug!("stdin is not a terminal; capture ends on timeout only");
        return cancel;
    }

    info!("press q then Enter to stop capturing early");
    let watcher = cancel.clone();
    let spawned = thread::Builder::new()
        .name("facegate-quit".into())
        .spawn(move || watch_for_quit(io::stdin().lock(), &watcher));
    if let Err(err) = spawned {
        debug!("could not start keypress watcher: {err}");
    }
    cancel
}

fn watch_for_quit(input: impl BufRead, cancel: &CancelToken) {
    for line in input.lines() {
        match line {
            Ok(line) if is_quit(&line) => {
                cancel.cancel();
                return;
            }
            Ok(_) => continue,
            Err(_) => return,
        }
    }
}

fn is_quit(line: &str) -> bool {
    line.trim().eq_ignore_ascii_case("q")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn quit_line_cancels() {
        let cancel = CancelToken::new();
        watch_for_quit(Cursor::new("hello\n  Q \n"), &cancel);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn end_of_input_leaves_token_untouched() {
        let cancel = CancelToken::new();
        watch_for_quit(Cursor::new("quit\nx\n"), &cancel);
        assert!(!cancel.is_cancelled());
    }
}
