pub mod config;
pub mod error;
pub mod gateway;
pub mod http;

pub use config::ClientConfig;
pub use error::ClientError;
pub use gateway::Gateway;
pub use http::HttpApi;
