/// Generate a record id: `<prefix>-<unix ms>-<random suffix>`.
///
/// Unique enough for a single device; callers that need idempotent
/// resubmission supply their own id instead.
pub fn generate(prefix: &str, now_ms: i64) -> String {
  let suffix = uuid::Uuid::new_v4().simple().to_string();
  format!("{}-{}-{}", prefix, now_ms, &suffix[..12])
}
