use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

use super::API_V1_PREFIX;

fn base_join(base: &str, path: &str) -> String {
    let b = base.trim_end_matches('/');
    let p = path.trim_start_matches('/');
    format!("{}/{}", b, p)
}

fn enc(s: &str) -> String {
    utf8_percent_encode(s, NON_ALPHANUMERIC).to_string()
}

fn v1(base: &str, path: &str) -> String {
    base_join(base, &format!("{}/{}", API_V1_PREFIX, path))
}

pub fn auth_login(base: &str) -> String {
    v1(base, "auth/login")
}
pub fn version(base: &str) -> String {
    v1(base, "version")
}
pub fn me(base: &str) -> String {
    v1(base, "me")
}
pub fn dashboard(base: &str) -> String {
    v1(base, "dashboard")
}
pub fn children(base: &str) -> String {
    v1(base, "children")
}
pub fn child(base: &str, child_id: &str) -> String {
    v1(base, &format!("children/{}", enc(child_id)))
}
pub fn activities(base: &str) -> String {
    v1(base, "activities")
}
pub fn activity(base: &str, activity_id: &str) -> String {
    v1(base, &format!("activities/{}", enc(activity_id)))
}
pub fn timers(base: &str) -> String {
    v1(base, "timers")
}
pub fn timers_for_child(base: &str, child_id: &str) -> String {
    format!("{}?child_id={}", timers(base), enc(child_id))
}
pub fn timer(base: &str, timer_id: &str) -> String {
    v1(base, &format!("timers/{}", enc(timer_id)))
}
pub fn timer_pause(base: &str, timer_id: &str) -> String {
    v1(base, &format!("timers/{}/pause", enc(timer_id)))
}
pub fn timer_resume(base: &str, timer_id: &str) -> String {
    v1(base, &format!("timers/{}/resume", enc(timer_id)))
}
pub fn timer_events(base: &str) -> String {
    v1(base, "timers/events")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_without_double_slashes() {
        assert_eq!(
            children("http://localhost:5151/"),
            "http://localhost:5151/api/v1/children"
        );
        assert_eq!(
            timer_pause("http://h", "abc-1"),
            "http://h/api/v1/timers/abc%2D1/pause"
        );
    }

    #[test]
    fn child_filter_is_encoded() {
        assert_eq!(
            timers_for_child("http://h", "a b"),
            "http://h/api/v1/timers?child_id=a%20b"
        );
    }
}
