// src/macros.rs

//
// Logging macros
//
// Every event carries a `subsystem` field naming the component that logged
// it (`news_server`, `news_client`, `web_server`, ...). The value is the
// `SUBSYSTEM` constant in scope at the call site; each logging module
// declares its own.
//
// logging feature enabled → tracing, with `subsystem` as a structured field
// logging feature disabled → only log_error prints to stderr, prefixed with
//                            the subsystem
//

#![allow(unused_macros)]

// --------------------
// ERROR
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_error {
    ($($arg:tt)*) => {
        tracing::error!(subsystem = SUBSYSTEM, $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_error {
    ($($arg:tt)*) => {
        eprintln!("[{}] {}", SUBSYSTEM, format_args!($($arg)*))
    };
}

// --------------------
// WARN
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        tracing::warn!(subsystem = SUBSYSTEM, $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_warn {
    ($($arg:tt)*) => {{
        let _ = SUBSYSTEM;
    }};
}

// --------------------
// INFO
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_info {
    ($($arg:tt)*) => {
        tracing::info!(subsystem = SUBSYSTEM, $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_info {
    ($($arg:tt)*) => {{
        let _ = SUBSYSTEM;
    }};
}

// --------------------
// DEBUG
// --------------------

#[cfg(feature = "logging")]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        tracing::debug!(subsystem = SUBSYSTEM, $($arg)*)
    };
}

#[cfg(not(feature = "logging"))]
macro_rules! log_debug {
    ($($arg:tt)*) => {{
        let _ = SUBSYSTEM;
    }};
}

pub(crate) use log_debug;
pub(crate) use log_error;
pub(crate) use log_info;
pub(crate) use log_warn;

#[cfg(all(test, feature = "logging"))]
mod tests {
    // ---
    use std::io;
    use std::sync::{Arc, Mutex};

    use tracing_subscriber::fmt::MakeWriter;

    const SUBSYSTEM: &str = "macro_test";

    /// Collects formatted log lines in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Captured {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(f: impl FnOnce()) -> String {
        // ---
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();

        tracing::subscriber::with_default(subscriber, f);
        captured.text()
    }

    #[test]
    fn test_events_carry_subsystem() {
        // ---
        let id = 7;
        let out = capture(|| {
            log_warn!("lookup failed for {id}");
            log_debug!("retrying {}", id + 1);
        });

        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2, "{out}");

        assert!(lines[0].contains("WARN"), "{out}");
        assert!(lines[0].contains("lookup failed for 7"), "{out}");
        assert!(lines[0].contains("subsystem=\"macro_test\""), "{out}");

        assert!(lines[1].contains("DEBUG"), "{out}");
        assert!(lines[1].contains("retrying 8"), "{out}");
        assert!(lines[1].contains("subsystem=\"macro_test\""), "{out}");
    }

    #[test]
    fn test_subsystem_follows_call_site() {
        // ---
        mod web {
            const SUBSYSTEM: &str = "web_server";

            pub(super) fn log() {
                log_error!("bind failed");
            }
        }

        let out = capture(web::log);
        assert!(out.contains("ERROR"), "{out}");
        assert!(out.contains("subsystem=\"web_server\""), "{out}");
        assert!(!out.contains("macro_test"), "{out}");
    }
}
