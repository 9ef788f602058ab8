pub mod http;
pub mod live;
pub mod services;
pub mod sweeper;

pub use http::{AppState, build_router};
pub use live::LiveRegistry;
pub use services::{ServiceBuildError, Services};
