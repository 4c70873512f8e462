pub mod groupcall_routes;
pub mod groupcall_websocket;

pub use groupcall_routes::routes;
