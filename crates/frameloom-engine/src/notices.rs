use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

pub const DEFAULT_NOTICE_TTL_SECS: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub posted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Transient user-facing messages that dismiss themselves after a TTL.
#[derive(Debug, Clone)]
pub struct NoticeBoard {
    ttl: Duration,
    next_id: u64,
    notices: Vec<Notice>,
}

impl Default for NoticeBoard {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_NOTICE_TTL_SECS))
    }
}

impl NoticeBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            next_id: 0,
            notices: Vec::new(),
        }
    }

    pub fn info(&mut self, message: impl Into<String>) -> u64 {
        self.post_at(NoticeLevel::Info, message, Utc::now())
    }

    pub fn error(&mut self, message: impl Into<String>) -> u64 {
        self.post_at(NoticeLevel::Error, message, Utc::now())
    }

    pub fn post_at(
        &mut self,
        level: NoticeLevel,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> u64 {
        self.prune(now);
        self.next_id += 1;
        let message = message.into();
        match level {
            NoticeLevel::Info => tracing::info!(notice = %message),
            NoticeLevel::Error => tracing::warn!(notice = %message),
        }
        self.notices.push(Notice {
            id: self.next_id,
            level,
            message,
            posted_at: now,
            expires_at: now + self.ttl,
        });
        self.next_id
    }

    /// Drop expired notices and return what is still showing.
    pub fn prune(&mut self, now: DateTime<Utc>) -> &[Notice] {
        self.notices.retain(|notice| notice.expires_at > now);
        &self.notices
    }

    pub fn dismiss(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|notice| notice.id != id);
        self.notices.len() != before
    }

    /// Every notice posted and not yet pruned or dismissed.
    pub fn all(&self) -> &[Notice] {
        &self.notices
    }

    pub fn errors(&self) -> impl Iterator<Item = &Notice> {
        self.notices
            .iter()
            .filter(|notice| notice.level == NoticeLevel::Error)
    }

    pub fn clear(&mut self) {
        self.notices.clear();
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn notices_expire_after_the_ttl() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().unwrap_or_default();
        let mut board = NoticeBoard::default();
        board.post_at(NoticeLevel::Error, "Some requests failed", start);
        board.post_at(NoticeLevel::Info, "Saved", start + Duration::seconds(3));

        assert_eq!(board.prune(start + Duration::seconds(4)).len(), 2);
        let left = board.prune(start + Duration::seconds(5));
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].message, "Saved");
        assert!(board.prune(start + Duration::seconds(8)).is_empty());
    }

    #[test]
    fn posting_sweeps_expired_notices() {
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).single().unwrap_or_default();
        let mut board = NoticeBoard::default();
        board.post_at(NoticeLevel::Error, "upstream failed", start);
        board.post_at(NoticeLevel::Info, "retrying", start + Duration::seconds(2));
        assert_eq!(board.all().len(), 2);

        board.post_at(NoticeLevel::Info, "done", start + Duration::seconds(6));
        let messages: Vec<&str> = board.all().iter().map(|n| n.message.as_str()).collect();
        assert_eq!(messages, vec!["retrying", "done"]);
        assert_eq!(board.errors().count(), 0);
    }

    #[test]
    fn dismiss_by_id_and_filter_errors() {
        let mut board = NoticeBoard::new(Duration::seconds(30));
        let first = board.error("upstream failed");
        board.info("done");
        assert_eq!(board.errors().count(), 1);
        assert!(board.dismiss(first));
        assert!(!board.dismiss(first));
        assert_eq!(board.errors().count(), 0);
        assert_eq!(board.all().len(), 1);
    }
}
