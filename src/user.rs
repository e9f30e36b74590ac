//! Presentational callbacks toward the front-end
//!
//! The core never prints; it raises messages, progress and errors through
//! whatever [`User`] the caller supplies. The CLI wires up a console
//! implementation; tests and headless callers use [`NullUser`].

/// Sink for user-visible output
pub trait User {
    fn raise_message(&self, text: &str);

    /// `percent` is a single 0..=100 scalar for the current operation
    fn raise_progress(&self, text: &str, percent: u8);

    fn raise_error(&self, text: &str);
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NullUser;

impl User for NullUser {
    fn raise_message(&self, _text: &str) {}
    fn raise_progress(&self, _text: &str, _percent: u8) {}
    fn raise_error(&self, _text: &str) {}
}

/// Plain stdout/stderr implementation
#[derive(Debug, Default)]
pub struct ConsoleUser;

impl User for ConsoleUser {
    fn raise_message(&self, text: &str) {
        println!("{}", text);
    }

    fn raise_progress(&self, text: &str, percent: u8) {
        println!("  [{:>3}%] {}", percent, text);
    }

    fn raise_error(&self, text: &str) {
        eprintln!("Error: {}", text);
    }
}

/// Test double recording everything raised at it
#[doc(hidden)]
pub mod test_support {
    use super::User;
    use std::cell::RefCell;

    /// Records everything raised at it, for assertions
    #[derive(Debug, Default)]
    pub struct RecordingUser {
        pub messages: RefCell<Vec<String>>,
        pub progress: RefCell<Vec<(String, u8)>>,
        pub errors: RefCell<Vec<String>>,
    }

    impl User for RecordingUser {
        fn raise_message(&self, text: &str) {
            self.messages.borrow_mut().push(text.to_string());
        }

        fn raise_progress(&self, text: &str, percent: u8) {
            self.progress.borrow_mut().push((text.to_string(), percent));
        }

        fn raise_error(&self, text: &str) {
            self.errors.borrow_mut().push(text.to_string());
        }
    }
}
