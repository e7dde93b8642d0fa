pub mod handlers;
pub mod responses;
pub mod routes;

pub use responses::MessageResponse;
pub use routes::{create_router, AppState, Route, RouteHandler};
