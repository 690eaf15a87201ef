pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
