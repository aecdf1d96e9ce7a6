//! Identifier rendering.

/// Renders an identifier, quoting it with backticks unless it is a plain
/// `[A-Za-z_][A-Za-z0-9_]*` name.
///
/// # Examples
///
/// ```
/// use engine::query::quote_identifier;
///
/// assert_eq!(quote_identifier("amount"), "amount");
/// assert_eq!(quote_identifier("order total"), "`order total`");
/// assert_eq!(quote_identifier("we`ird"), "`we``ird`");
/// ```
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    if is_plain(name) {
        name.to_string()
    } else {
        format!("`{}`", name.replace('`', "``"))
    }
}

fn is_plain(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    }
}
