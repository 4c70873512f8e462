use std::sync::Arc;
use warp::Filter;

use super::groupcall_websocket;
use crate::groupcall::RoomManager;

/// Every route the server exposes
pub fn routes(
    registry: Arc<RoomManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    groupcall_websocket_route(registry.clone())
        .or(groupcall_health_check())
        .or(groupcall_rooms(registry))
}

/// Signaling WebSocket at `/groupcall`
pub fn groupcall_websocket_route(
    registry: Arc<RoomManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("groupcall")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_registry(registry))
        .map(|ws: warp::ws::Ws, registry: Arc<RoomManager>| {
            ws.on_upgrade(move |websocket| {
                groupcall_websocket::handle_groupcall_websocket(websocket, registry)
            })
        })
}

pub fn groupcall_health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("groupcall")
        .and(warp::path("health"))
        .and(warp::path::end())
        .and(warp::get())
        .map(|| {
            warp::reply::json(&serde_json::json!({
                "status": "healthy",
                "service": "Group Call Server",
                "version": env!("CARGO_PKG_VERSION")
            }))
        })
}

pub fn groupcall_rooms(
    registry: Arc<RoomManager>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("groupcall")
        .and(warp::path("rooms"))
        .and(warp::path::end())
        .and(warp::get())
        .and(with_registry(registry))
        .then(|registry: Arc<RoomManager>| async move {
            warp::reply::json(&registry.snapshot().await)
        })
}

fn with_registry(
    registry: Arc<RoomManager>,
) -> impl Filter<Extract = (Arc<RoomManager>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || registry.clone())
}
