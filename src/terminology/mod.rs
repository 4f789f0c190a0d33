//! External resolution: terminology operations, HTTP transport and the resolution cache

pub mod cache;
pub mod terminologies;
pub mod transport;

pub use cache::{CacheKey, ResolutionCache};
pub use terminologies::{Coded, Method, Target, TerminologyRequest, Terminologies};
pub use transport::{HttpTransport, ReqwestTransport};
