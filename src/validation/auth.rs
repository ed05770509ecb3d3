/// Usernames may only contain letters, digits, underscores and hyphens.
///
/// # Arguments
///
/// * `username` - The username to check.
/// * `_ctx` - Unused validation context.
///
/// # Returns
///
/// A `garde::Result` describing the first offending rule.
pub fn username_charset(username: &str, _ctx: &()) -> garde::Result {
    if username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        Ok(())
    } else {
        Err(garde::Error::new(
            "can only contain letters, numbers, underscores, and hyphens",
        ))
    }
}
