//! SQL identifier quoting and sanitization utilities.

/// Quote a SQL identifier using ANSI double-quoting.
///
/// Embedded double-quotes are escaped by doubling them (`"` → `""`).
///
/// # Examples
///
/// ```
/// use chmodel_core::quote_ident;
///
/// assert_eq!(quote_ident("Events"), "\"Events\"");
/// assert_eq!(quote_ident("Tags.ID"), "\"Tags.ID\"");
/// assert_eq!(quote_ident("user\"name"), "\"user\"\"name\"");
/// ```
#[inline]
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Sanitize an identifier by removing everything but ASCII alphanumerics
/// and underscores.
///
/// Used for generated names, where quoting alone is not enough to keep the
/// name predictable.
///
/// # Examples
///
/// ```
/// use chmodel_core::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("user_name"), "user_name");
/// assert_eq!(sanitize_identifier("user;DROP TABLE--"), "userDROPTABLE");
/// ```
#[inline]
pub fn sanitize_identifier(name: &str) -> String {
    name.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect()
}

/// Is `name` usable unquoted as a ClickHouse setting name?
///
/// Setting names are inlined into `SETTINGS` clauses, so only
/// `[A-Za-z_][A-Za-z0-9_]*` is accepted.
pub fn is_valid_setting_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// The unqualified, sanitized name of a Rust type.
///
/// `my_app::models::Event<u32>` becomes `Event`.
pub fn short_type_name<T: ?Sized>() -> String {
    let full = std::any::type_name::<T>();
    let without_generics = full.split('<').next().unwrap_or(full);
    let last = without_generics.rsplit("::").next().unwrap_or(without_generics);
    sanitize_identifier(last)
}
