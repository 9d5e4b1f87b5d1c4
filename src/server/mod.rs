pub mod routes;
pub mod ws;
