pub(super) fn default_name() -> String {
    "Coachline".to_string()
}
pub(super) fn default_data_dir() -> String {
    "~/.coachline".to_string()
}
pub(super) fn default_log_level() -> String {
    "info".to_string()
}
pub(super) fn default_provider() -> String {
    "none".to_string()
}
pub(super) fn default_true() -> bool {
    true
}
pub(super) fn default_deny_message() -> String {
    "Sorry, this coaching bot is private.".to_string()
}
pub(super) fn default_anthropic_model() -> String {
    "claude-3-5-haiku-latest".to_string()
}
pub(super) fn default_openai_model() -> String {
    "gpt-4o-mini".to_string()
}
pub(super) fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
pub(super) fn default_db_path() -> String {
    "~/.coachline/data/coachline.db".to_string()
}
pub(super) fn default_busy_timeout() -> u64 {
    5
}
pub(super) fn default_intent_timeout() -> u64 {
    10
}
pub(super) fn default_min_confidence() -> f64 {
    0.6
}
pub(super) fn default_recent_tasks() -> usize {
    5
}
pub(super) fn default_recent_messages() -> usize {
    10
}
pub(super) fn default_registration_ttl() -> u64 {
    30
}
pub(super) fn default_export_dir() -> String {
    "~/.coachline/exports".to_string()
}
