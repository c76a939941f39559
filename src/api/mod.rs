//! Admin and query REST API.

mod routes;

pub use routes::{api_routes, ApiState};
