//! WebSocket gateway: session registry, resource manager, rate limiting,
//! metrics, and the HTTP/WS surface that wires them to the STT/LLM/TTS
//! engines in `gateway-pipeline` and `gateway-llm`.

pub mod error;
pub mod gateway;
pub mod http;
pub mod metrics;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod state;
pub mod sweeper;

pub use error::{GatewayError, Result};
pub use http::create_router;
pub use rate_limit::{RateLimitError, RateLimiter};
pub use registry::{ConnectionId, Session, SessionRegistry, SessionState};
pub use state::AppState;
pub use sweeper::ResourceManager;
