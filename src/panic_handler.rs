//! Fatal-error path
//!
//! Work items have no recoverable-error contract. Broken invariants and GPU
//! failures during `process` end up here: the diagnostic is logged and the
//! thread unwinds. The worker run loop catches the unwind and applies the
//! pool's `FatalAction`.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt::Display;
use std::sync::Once;

/// What a worker does after a work item panicked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FatalAction {
    /// Terminate the process
    #[default]
    Abort,
    /// Stop the pool and report `EngineError::PoolPoisoned` to its callers
    Poison,
}

/// Report an unrecoverable failure of `context` and unwind
#[track_caller]
pub fn fatal(context: &str, error: &dyn Display) -> ! {
    log::error!("[fatal] {}: {}", context, error);
    panic!("{}: {}", context, error)
}

/// Report a broken scheduling invariant (a programming error) and unwind
#[track_caller]
pub fn invariant_violation(message: impl Display) -> ! {
    log::error!("[invariant] {}", message);
    panic!("invariant violated: {}", message)
}

/// Log and terminate the process immediately
pub fn abort_process(context: &str, message: &str) -> ! {
    log::error!("[fatal] {}: {} - aborting", context, message);
    eprintln!("fatal error in {}: {}", context, message);
    std::process::abort()
}

/// Extract the message carried by a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "Unknown panic".to_string()
    }
}

static HOOK: Once = Once::new();

/// Route panic reports through `log`, keeping the previous hook
pub fn install_panic_hook() {
    HOOK.call_once(|| {
        let previous = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            let thread = std::thread::current();
            let name = thread.name().unwrap_or("<unnamed>");
            let location = info
                .location()
                .map(|l| format!("{}:{}", l.file(), l.line()))
                .unwrap_or_else(|| "unknown location".to_string());
            log::error!(
                "[panic] thread '{}' panicked at {}: {}",
                name,
                location,
                panic_message(info.payload())
            );
            previous(info);
        }));
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn test_panic_message_extraction() {
        let payload = panic::catch_unwind(|| panic!("slot {} filled twice", 3))
            .expect_err("should panic");
        assert_eq!(panic_message(payload.as_ref()), "slot 3 filled twice");

        let payload = panic::catch_unwind(|| panic!("static message")).expect_err("should panic");
        assert_eq!(panic_message(payload.as_ref()), "static message");
    }

    #[test]
    fn test_fatal_unwinds_with_context() {
        let payload = panic::catch_unwind(|| fatal("upload", &"device lost"))
            .expect_err("should panic");
        assert_eq!(panic_message(payload.as_ref()), "upload: device lost");
    }

    #[test]
    fn test_fatal_action_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            action: FatalAction,
        }
        let parsed: Wrapper = toml::from_str("action = \"poison\"").expect("parse");
        assert_eq!(parsed.action, FatalAction::Poison);
        assert_eq!(FatalAction::default(), FatalAction::Abort);
    }
}
