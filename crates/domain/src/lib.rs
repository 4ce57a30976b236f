pub mod events;
pub mod messaging;
pub mod middleware;
pub mod models;
pub mod repositories;
pub mod runtime;

pub use conductor_core::{ConductorError, ConductorResult};
pub use events::*;
pub use messaging::*;
pub use middleware::*;
pub use models::*;
pub use repositories::*;
pub use runtime::*;
