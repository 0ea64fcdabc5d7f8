// ==============
// crates/backend-lib/src/metrics.rs

//! Central place for metric keys
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const EVENT_RECEIVED: &str = "event.received";
pub const EVENT_REJECTED: &str = "event.rejected";
pub const DELIVERY_DROPPED: &str = "delivery.dropped";
pub const ROOM_CREATED: &str = "room.created";
pub const ROOM_DELETED: &str = "room.deleted";
pub const MESSAGE_STORED: &str = "message.stored";
