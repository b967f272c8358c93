pub mod config;
pub mod error;
pub mod image_ref;
pub mod notifier;
pub mod runner;
pub mod upstream;
mod util;

pub use config::RelayConfig;
pub use error::{NotifyError, TaskError, UpstreamError};
pub use notifier::{Notifier, WebhookNotifier};
pub use runner::TaskRunner;
pub use upstream::{ChatCompletionsProvider, UpstreamProvider};
