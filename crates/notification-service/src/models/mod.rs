//! 通知服务领域模型

pub mod delivery_log;
pub mod enums;
pub mod notification;
pub mod preference;
pub mod queue_item;
pub mod template;
pub mod user;

// 重新导出常用类型
pub use delivery_log::{DeliveryLogEntry, DeliveryTransition};
pub use enums::{Category, Channel, DeliveryStatus, NotificationType, Priority, QueueStatus};
pub use notification::{DispatchRequest, Notification};
pub use preference::{CategoryChannels, CategorySettings, NotificationPreference};
pub use queue_item::{NewQueueItem, QueueItem, QueueItemUpdate, QueuePayload};
pub use template::{FALLBACK_BODY, FALLBACK_TITLE, RenderedMessage, Template, field_names};
pub use user::User;
