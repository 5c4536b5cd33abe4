pub mod client;
pub mod prompt;
pub mod provider;
pub mod response;
pub mod transport;
mod wire;

pub use client::ProviderClient;
pub use prompt::{build_prompt, PromptContext};
pub use response::extract_label;
pub use transport::{build_http_client, ProxyRequest, ProxyTarget};
