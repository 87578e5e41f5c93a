//! Chromium DevTools Protocol adapter used by the canvas validator.
//!
//! The crate owns the browser process and the single websocket connection to it, and hands
//! out [`PageHandle`]s: attached page targets that can navigate, evaluate script, poll a
//! predicate and capture full-page screenshots.

pub mod config;
pub mod error;
mod launch;
pub mod metrics;
pub mod page;
pub mod targets;
pub mod transport;

pub mod ids {
    use serde::{Deserialize, Serialize};
    use uuid::Uuid;

    /// Identifies a page opened by the adapter.
    #[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
    pub struct PageId(pub Uuid);

    impl PageId {
        pub fn new() -> Self {
            Self(Uuid::new_v4())
        }
    }

    impl Default for PageId {
        fn default() -> Self {
            Self::new()
        }
    }
}

pub use config::{detect_chrome_executable, CdpConfig};
pub use error::{AdapterError, AdapterErrorKind};
pub use ids::PageId;
pub use metrics::{register_metrics, AdapterMetricsSnapshot};
pub use page::{CdpAdapter, PageHandle};
pub use transport::{CdpTransport, ChromiumTransport, CommandTarget};
