pub mod assistant;
pub mod gate;
pub mod readiness;
pub mod services;
pub mod traits;
