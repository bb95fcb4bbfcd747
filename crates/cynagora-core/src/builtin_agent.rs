// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! The built-in `@` agent: expands a rule value's template against the
//! querying key's fields, producing the `client;session;user`
//! 3-tuple used to resolve a subquery without a real round-trip to an
//! external agent connection.

use cynagora_db::RawKey;

/// Expand `template`'s `%c`/`%s`/`%u`/`%p` placeholders against `key`,
/// with `%%` and `%;` as escapes for a literal `%` and `;`.
pub fn expand_template(template: &str, key: &RawKey) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('c') => out.push_str(key.client.as_deref().unwrap_or("")),
            Some('s') => out.push_str(key.session.as_deref().unwrap_or("")),
            Some('u') => out.push_str(key.user.as_deref().unwrap_or("")),
            Some('p') => out.push_str(key.permission.as_deref().unwrap_or("")),
            Some('%') => out.push('%'),
            Some(';') => out.push(';'),
            Some(other) => {
                out.push('%');
                out.push(other);
            }
            None => out.push('%'),
        }
    }
    out
}

/// Split an expanded template on `;` into the client/session/user
/// fields a subquery is rebuilt from. Fewer than 3 fields leaves the
/// rest `None`; an empty field becomes `None` (`ANY`) rather than the
/// empty string.
pub fn split_fields(expanded: &str) -> (Option<String>, Option<String>, Option<String>) {
    let mut parts = expanded.splitn(3, ';');
    let field = |s: Option<&str>| s.filter(|t| !t.is_empty()).map(str::to_string);
    (field(parts.next()), field(parts.next()), field(parts.next()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> RawKey {
        RawKey::new("alice", "s1", "1000", "audio")
    }

    #[test]
    fn substitutes_each_placeholder() {
        let out = expand_template("%c/%s/%u/%p", &key());
        assert_eq!(out, "alice/s1/1000/audio");
    }

    #[test]
    fn escapes_percent_and_semicolon() {
        let out = expand_template("%%literal%;done", &key());
        assert_eq!(out, "%literal;done");
    }

    #[test]
    fn unknown_escape_is_passed_through_literally() {
        let out = expand_template("%z", &key());
        assert_eq!(out, "%z");
    }

    #[test]
    fn split_fields_collapses_empty_to_any() {
        let (client, session, user) = split_fields("alice;;1000");
        assert_eq!(client, Some("alice".to_string()));
        assert_eq!(session, None);
        assert_eq!(user, Some("1000".to_string()));
    }

    #[test]
    fn split_fields_handles_fewer_than_three() {
        let (client, session, user) = split_fields("alice");
        assert_eq!(client, Some("alice".to_string()));
        assert_eq!(session, None);
        assert_eq!(user, None);
    }
}
