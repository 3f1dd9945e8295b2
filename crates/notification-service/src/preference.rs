//! 偏好解析
//!
//! 每次 dispatch 都重新读取偏好，不做缓存，用户关闭渠道后立即生效。

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use tracing::{debug, warn};

use crate::error::{NotificationError, Result};
use crate::models::{Category, Channel, NotificationPreference, NotificationType};
use crate::repository::{PreferenceRepository, UserDirectory};

/// 偏好解析器
pub struct PreferenceResolver {
    preferences: Arc<dyn PreferenceRepository>,
    users: Arc<dyn UserDirectory>,
}

impl PreferenceResolver {
    pub fn new(preferences: Arc<dyn PreferenceRepository>, users: Arc<dyn UserDirectory>) -> Self {
        Self { preferences, users }
    }

    /// 获取偏好，不存在时按默认值创建
    pub async fn get_or_create(
        &self,
        user_id: &str,
        now: DateTime<Utc>,
    ) -> Result<NotificationPreference> {
        if let Some(existing) = self.preferences.get(user_id).await? {
            return Ok(existing);
        }

        let user = self.users.get_user(user_id).await?;
        let defaults = NotificationPreference::defaults_for(user_id, user.as_ref(), now);
        debug!(user_id, "创建默认通知偏好");
        self.preferences.insert_if_absent(&defaults).await
    }

    /// 保存修改后的偏好
    pub async fn update(&self, preference: &NotificationPreference) -> Result<NotificationPreference> {
        Self::validate(preference)?;
        self.preferences.update(preference).await
    }

    /// 偏好校验：免打扰开启时起止时间不能相同，时区必须可解析
    pub fn validate(preference: &NotificationPreference) -> Result<()> {
        if preference.user_id.trim().is_empty() {
            return Err(NotificationError::Validation("user_id 不能为空".into()));
        }
        if preference.quiet_hours_enabled
            && preference.quiet_hours_start == preference.quiet_hours_end
        {
            return Err(NotificationError::Validation(
                "免打扰开始时间与结束时间不能相同".into(),
            ));
        }
        if preference.timezone.parse::<Tz>().is_err() {
            return Err(NotificationError::Validation(format!(
                "无法识别的时区: {}",
                preference.timezone
            )));
        }
        if preference.language.trim().is_empty() {
            return Err(NotificationError::Validation("language 不能为空".into()));
        }
        Ok(())
    }

    /// 渠道总开关开启，且（类型无分类 或 分类下该渠道开启）
    ///
    /// 营销类还需 marketing_enabled
    pub fn can_receive(
        notification_type: NotificationType,
        channel: Channel,
        prefs: &NotificationPreference,
    ) -> bool {
        if !prefs.channel_enabled(channel) {
            return false;
        }
        match notification_type.category() {
            None => true,
            Some(Category::Marketing) if !prefs.marketing_enabled => false,
            Some(category) => prefs.categories.allows(category, channel),
        }
    }

    /// 当前是否处于用户本地免打扰时段
    ///
    /// 窗口为 `[start, end)`；start > end 时跨午夜，即 `[start, 24:00) ∪ [00:00, end)`。
    /// start == end 视为空窗口。
    pub fn is_in_quiet_hours(prefs: &NotificationPreference, now: DateTime<Utc>) -> bool {
        if !prefs.quiet_hours_enabled {
            return false;
        }
        let local = Self::local_time(prefs, now);
        in_window(local, prefs.quiet_hours_start, prefs.quiet_hours_end)
    }

    /// 免打扰结束的下一个 UTC 时刻，不在免打扰时段时返回 None
    pub fn quiet_hours_end_after(
        prefs: &NotificationPreference,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Utc>> {
        if !Self::is_in_quiet_hours(prefs, now) {
            return None;
        }
        let tz = resolve_timezone(&prefs.timezone);
        let local_now = now.with_timezone(&tz).naive_local();

        let mut end = NaiveDateTime::new(local_now.date(), prefs.quiet_hours_end);
        if end <= local_now {
            end += Duration::days(1);
        }
        // 夏令时跳变导致本地时间不存在时，顺延一小时
        let resolved = tz
            .from_local_datetime(&end)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(end + Duration::hours(1))).earliest())?;
        Some(resolved.with_timezone(&Utc))
    }

    fn local_time(prefs: &NotificationPreference, now: DateTime<Utc>) -> NaiveTime {
        now.with_timezone(&resolve_timezone(&prefs.timezone)).time()
    }
}

/// 解析 IANA 时区，无法识别时回退到 UTC
fn resolve_timezone(name: &str) -> Tz {
    name.parse::<Tz>().unwrap_or_else(|_| {
        warn!(timezone = name, "无法识别的时区，按 UTC 处理");
        Tz::UTC
    })
}

fn in_window(t: NaiveTime, start: NaiveTime, end: NaiveTime) -> bool {
    if start < end {
        start <= t && t < end
    } else if start > end {
        t >= start || t < end
    } else {
        false
    }
}
