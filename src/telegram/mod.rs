//! Telegram-facing side: the client capability, the grammers adapter, the
//! event router, connection health, and the entity cache.

pub mod api;
pub mod cache;
pub mod health;
pub mod mtproto;
pub mod router;
pub mod testing;

pub use api::{
    FileKind, HistoryMessage, MessageEvent, ParseMode, SentMessage, TelegramApi, UserInfo,
};
pub use cache::EntityCache;
pub use health::ConnectionHealthMonitor;
pub use mtproto::MtProtoClient;
pub use router::EventRouter;
