pub mod http;
pub mod retry;
pub mod stream;

pub use http::BackendClient;
pub use retry::{calculate_backoff, with_retry};
pub use stream::WsEventSource;
