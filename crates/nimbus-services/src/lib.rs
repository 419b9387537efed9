pub mod llm;
pub mod notify;
pub mod retry;

pub use llm::{GeminiClient, TextGenError, TextGenerator};
pub use notify::{LocalNotifier, Notification, Notifier, NotifyError, UserInfo};
pub use retry::{RetryPolicy, RetryState};
