pub mod call;
pub mod agent;
pub mod auth;
pub mod campaign;
pub mod contact;
pub mod lead_analytics;
pub mod lenient;
pub mod meeting;
pub mod queue;
pub mod transcript;

pub use call::*;
pub use agent::*;
pub use auth::*;
pub use campaign::*;
pub use contact::*;
pub use lead_analytics::*;
pub use meeting::*;
pub use queue::*;
pub use transcript::*;
