//! Panic isolation for user callbacks.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

/// Run `call`, turning a panic into its message.
///
/// Callbacks only see shared handles whose state stays consistent at every await
/// point, so observing them after an unwind is sound.
pub(crate) fn isolate<R>(call: impl FnOnce() -> R) -> Result<R, String> {
    catch_unwind(AssertUnwindSafe(call)).map_err(|payload| panic_message(payload.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::panic)]
    use super::*;

    #[test]
    fn test_returns_value_without_panic() {
        assert_eq!(isolate(|| 7), Ok(7));
    }

    #[test]
    fn test_captures_panic_message() {
        let literal = isolate(|| -> u8 { panic!("handler blew up") });
        assert_eq!(literal, Err("handler blew up".to_string()));

        let seq = 4;
        let formatted = isolate(|| -> u8 { panic!("bad seq {seq}") });
        assert_eq!(formatted, Err("bad seq 4".to_string()));
    }
}
