//! Abuse ledger and database-backed rate limiting.
//!
//! Every throttled action writes a row into `abuse_events`; the same table
//! doubles as the rate-limit counter, so limits survive restarts and need
//! no extra infrastructure. IPs that accumulate too many events in a short
//! window get an entry in `blocked_ips` and are refused at admission.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{NewAbuseEvent, NewBlockedIp};
use crate::schema::{abuse_events, blocked_ips};

pub const AUTO_BLOCK_THRESHOLD: i64 = 30;
pub const AUTO_BLOCK_WINDOW_MINUTES: i64 = 10;
pub const AUTO_BLOCK_DURATION_HOURS: i64 = 2;
pub const AUTO_BLOCK_REASON: &str = "auto_burst";

/// A named throttle bucket. The bucket name becomes part of the ledger
/// `reason`, scoped per user or per IP by [`rate_limit_key`].
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub bucket: &'static str,
    pub limit: i64,
    pub window_secs: i64,
}

pub const TICKET_CREATE_BURST: RateLimit = RateLimit {
    bucket: "rl_ticket_create_60s",
    limit: 10,
    window_secs: 60,
};

pub const TICKET_CREATE_HOURLY: RateLimit = RateLimit {
    bucket: "rl_ticket_create_1h",
    limit: 3,
    window_secs: 3600,
};

pub const PUBLIC_REQUEST_CREATE: RateLimit = RateLimit {
    bucket: "rl_public_request_60s",
    limit: 5,
    window_secs: 60,
};

/// Ledger scope key: per-user when authenticated, per-IP otherwise.
pub fn rate_limit_key(bucket: &str, user_id: Option<Uuid>, ip: Option<&str>) -> String {
    match (user_id, ip) {
        (Some(user_id), _) => format!("{bucket}:u:{user_id}"),
        (None, Some(ip)) => format!("{bucket}:ip:{ip}"),
        (None, None) => format!("{bucket}:anon"),
    }
}

/// Counts prior hits in the bucket's window and either records this hit or
/// refuses with 429. A refusal is ledgered under `{bucket}_block` and feeds
/// the auto-block counter; only accepted hits extend the rate window, since
/// the window is counted from the scoped key alone.
pub fn enforce_rate_limit(
    conn: &mut PgConnection,
    limit: &RateLimit,
    user_id: Option<Uuid>,
    ip: Option<&str>,
    path: &str,
    user_agent: &str,
) -> AppResult<()> {
    let key = rate_limit_key(limit.bucket, user_id, ip);
    let window_start = Utc::now().naive_utc() - Duration::seconds(limit.window_secs);

    let hits: i64 = abuse_events::table
        .filter(abuse_events::reason.eq(&key))
        .filter(abuse_events::created_at.gt(window_start))
        .count()
        .get_result(conn)?;

    if hits >= limit.limit {
        tracing::warn!(bucket = limit.bucket, hits, "rate limit exceeded");
        let block_reason = format!("{}_block", limit.bucket);
        record_event(conn, ip, user_id, path, &block_reason, user_agent)?;
        if let Some(ip) = ip {
            maybe_block_ip(conn, ip)?;
        }
        return Err(AppError::too_many_requests("too many requests, slow down"));
    }

    record_event(conn, ip, user_id, path, &key, user_agent)?;
    Ok(())
}

/// Records a non-throttle abuse event (rejected uploads, probe attempts).
pub fn log_abuse(
    conn: &mut PgConnection,
    ip: Option<&str>,
    user_id: Option<Uuid>,
    path: &str,
    reason: &str,
    user_agent: &str,
) -> AppResult<()> {
    record_event(conn, ip, user_id, path, reason, user_agent)?;
    if let Some(ip) = ip {
        maybe_block_ip(conn, ip)?;
    }
    Ok(())
}

fn record_event(
    conn: &mut PgConnection,
    ip: Option<&str>,
    user_id: Option<Uuid>,
    path: &str,
    reason: &str,
    user_agent: &str,
) -> AppResult<()> {
    diesel::insert_into(abuse_events::table)
        .values(NewAbuseEvent {
            ip: ip.map(str::to_string),
            user_id,
            path: path.chars().take(255).collect(),
            reason: reason.chars().take(120).collect(),
            user_agent: user_agent.chars().take(255).collect(),
        })
        .execute(conn)?;
    Ok(())
}

/// Blocks an IP for two hours once it passes the burst threshold. Upserts
/// so an already blocked IP gets its window extended, not an error.
pub fn maybe_block_ip(conn: &mut PgConnection, ip: &str) -> AppResult<bool> {
    let now = Utc::now().naive_utc();
    let window_start = now - Duration::minutes(AUTO_BLOCK_WINDOW_MINUTES);

    let recent: i64 = abuse_events::table
        .filter(abuse_events::ip.eq(ip))
        .filter(abuse_events::created_at.gt(window_start))
        .count()
        .get_result(conn)?;

    if recent < AUTO_BLOCK_THRESHOLD {
        return Ok(false);
    }

    let blocked_until = now + Duration::hours(AUTO_BLOCK_DURATION_HOURS);
    diesel::insert_into(blocked_ips::table)
        .values(NewBlockedIp {
            ip: ip.to_string(),
            blocked_until,
            reason: AUTO_BLOCK_REASON.to_string(),
        })
        .on_conflict(blocked_ips::ip)
        .do_update()
        .set((
            blocked_ips::blocked_until.eq(blocked_until),
            blocked_ips::reason.eq(AUTO_BLOCK_REASON),
        ))
        .execute(conn)?;

    tracing::warn!(ip, events = recent, "ip auto-blocked");
    Ok(true)
}

/// Admission check. Expired blocks stay in the table and simply stop
/// matching; nothing prunes them eagerly.
pub fn is_ip_blocked(conn: &mut PgConnection, ip: &str) -> AppResult<bool> {
    let now = Utc::now().naive_utc();
    let blocked = diesel::select(diesel::dsl::exists(
        blocked_ips::table
            .filter(blocked_ips::ip.eq(ip))
            .filter(blocked_ips::blocked_until.gt(now)),
    ))
    .get_result(conn)?;
    Ok(blocked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_prefers_user_over_ip() {
        let user = Uuid::nil();
        assert_eq!(
            rate_limit_key("rl_x", Some(user), Some("10.0.0.1")),
            format!("rl_x:u:{user}")
        );
        assert_eq!(
            rate_limit_key("rl_x", None, Some("10.0.0.1")),
            "rl_x:ip:10.0.0.1"
        );
        assert_eq!(rate_limit_key("rl_x", None, None), "rl_x:anon");
    }

    #[test]
    fn buckets_have_distinct_names() {
        let names = [
            TICKET_CREATE_BURST.bucket,
            TICKET_CREATE_HOURLY.bucket,
            PUBLIC_REQUEST_CREATE.bucket,
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
